//! Declaration parsing: declaration specifiers, declarators (pointers,
//! arrays, function types — including the parenthesized-declarator
//! fix-up `int (*f(void))[3]` needs), struct/union/enum bodies, typedefs,
//! and the top-level translation-unit driver.

use cvm_ast::obj::{Designator, GlobalInit, GlobalReloc, Initializer, ObjFlags, ObjKind, RelocTarget};
use cvm_ast::scope::{TagEntry, VarScope};
use cvm_ast::node::NodeKind;
use cvm_ast::{Obj, ObjId};
use cvm_diagnostics::CompileResult;
use cvm_support::intern::Symbol;
use cvm_support::EntityRef;
use cvm_types::{EnumConstant, Member, Type, TypeId, TypeKind};

use crate::parser::Parser;

const TYPE_KEYWORDS: &[&str] = &[
    "void", "_Bool", "bool", "char", "short", "int", "long", "float", "double", "signed", "unsigned",
    "struct", "union", "enum", "typeof", "typeof_unqual", "_Atomic",
];

const STORAGE_KEYWORDS: &[&str] = &["typedef", "static", "extern", "inline", "_Thread_local", "constexpr", "register", "auto"];
const QUALIFIER_KEYWORDS: &[&str] = &["const", "volatile", "restrict", "_Atomic"];

#[derive(Default, Clone, Copy)]
struct DeclAttrs {
    is_typedef: bool,
    is_static: bool,
    is_extern: bool,
    is_inline: bool,
    is_constexpr: bool,
    is_packed: bool,
    align_override: Option<u64>,
}

impl<'s> Parser<'s> {
    pub(crate) fn starts_type_name(&self, lookahead: usize) -> bool {
        let tok = self.peek_at(lookahead);
        if tok.kind == crate::token::TokenKind::Keyword && (TYPE_KEYWORDS.contains(&&*tok.text) || STORAGE_KEYWORDS.contains(&&*tok.text) || QUALIFIER_KEYWORDS.contains(&&*tok.text) || tok.is_keyword("_Alignas")) {
            return true;
        }
        if tok.is_ident() {
            if let Some(sym) = self.interner_peek(&tok.text) {
                return matches!(self.find_ident(sym), Some(VarScope::Typedef(_)));
            }
        }
        false
    }

    /// Looks up a `Symbol` without interning a new one, so speculative
    /// lookahead never pollutes the intern table with dead entries.
    fn interner_peek(&self, text: &str) -> Option<Symbol> {
        // The interner has no read-only probe; a plain identifier that
        // hasn't been declared as a typedef can't be one, so any symbol
        // not yet interned is trivially "not a typedef".
        self.interner.probe(text)
    }

    /// Parses declaration specifiers (storage class, qualifiers, and type
    /// specifiers) and returns the resulting `TypeId` plus storage flags.
    /// Consumes at least one token; callers check `starts_type_name`
    /// first.
    pub(crate) fn parse_declspec(&mut self) -> CompileResult<(TypeId, DeclAttrs)> {
        let mut attrs = DeclAttrs::default();
        let mut counts: Vec<&'static str> = Vec::new();
        let mut explicit_ty: Option<TypeId> = None;
        let mut is_unsigned = false;
        let mut saw_signed = false;

        loop {
            if self.eat_keyword("typedef") {
                attrs.is_typedef = true;
                continue;
            }
            if self.eat_keyword("static") {
                attrs.is_static = true;
                continue;
            }
            if self.eat_keyword("extern") {
                attrs.is_extern = true;
                continue;
            }
            if self.eat_keyword("inline") {
                attrs.is_inline = true;
                continue;
            }
            if self.eat_keyword("constexpr") {
                attrs.is_constexpr = true;
                attrs.is_static = true;
                continue;
            }
            if self.eat_keyword("register") || self.eat_keyword("auto") || self.eat_keyword("_Thread_local") {
                continue;
            }
            if self.eat_keyword("const") || self.eat_keyword("volatile") || self.eat_keyword("restrict") {
                continue;
            }
            if self.eat_keyword("_Alignas") {
                self.expect_punct("(")?;
                if self.starts_type_name(0) {
                    let ty = self.parse_type_name()?;
                    attrs.align_override = Some(self.types.align_of(ty).unwrap_or(1));
                } else {
                    let n = self.parse_const_expr()?;
                    attrs.align_override = Some(self.fold_const_i64(n).max(1) as u64);
                }
                self.expect_punct(")")?;
                continue;
            }
            if self.at_keyword("__attribute__") || self.at_double_bracket("[") {
                let (packed, align) = self.skip_attributes()?;
                attrs.is_packed |= packed;
                if align.is_some() {
                    attrs.align_override = align;
                }
                continue;
            }
            if self.eat_keyword("_Atomic") && self.at_punct("(") {
                self.bump();
                let ty = self.parse_type_name()?;
                self.expect_punct(")")?;
                let mut t = self.types.get(ty).clone();
                t.is_atomic = true;
                explicit_ty = Some(self.types.alloc(t));
                continue;
            }
            if self.eat_keyword("_Atomic") {
                continue;
            }
            if self.eat_keyword("typeof") || self.eat_keyword("typeof_unqual") {
                self.expect_punct("(")?;
                let ty = if self.starts_type_name(0) {
                    self.parse_type_name()?
                } else {
                    let e = self.parse_expr()?;
                    self.node_ty_pub(e)
                };
                self.expect_punct(")")?;
                explicit_ty = Some(ty);
                continue;
            }
            if self.at_keyword("struct") || self.at_keyword("union") {
                explicit_ty = Some(self.parse_struct_or_union()?);
                continue;
            }
            if self.at_keyword("enum") {
                explicit_ty = Some(self.parse_enum()?);
                continue;
            }
            if self.at_keyword("signed") {
                self.bump();
                saw_signed = true;
                continue;
            }
            if self.at_keyword("unsigned") {
                self.bump();
                is_unsigned = true;
                continue;
            }
            if TYPE_KEYWORDS.iter().any(|k| self.at_keyword(k)) {
                let text = self.cur().text.clone();
                counts.push(match &*text {
                    "void" => "void",
                    "_Bool" | "bool" => "bool",
                    "char" => "char",
                    "short" => "short",
                    "int" => "int",
                    "long" => "long",
                    "float" => "float",
                    "double" => "double",
                    _ => "int",
                });
                self.bump();
                continue;
            }
            if explicit_ty.is_none() && counts.is_empty() && !saw_signed && !is_unsigned {
                if self.cur().is_ident() {
                    let sym = self.intern_cur_text();
                    if let Some(VarScope::Typedef(ty)) = self.find_ident(sym) {
                        self.bump();
                        explicit_ty = Some(ty);
                        continue;
                    }
                }
            }
            break;
        }

        let base = if let Some(ty) = explicit_ty {
            ty
        } else {
            self.resolve_numeric_specifier(&counts, saw_signed, is_unsigned)
        };
        Ok((base, attrs))
    }

    fn resolve_numeric_specifier(&mut self, counts: &[&'static str], _signed: bool, unsigned: bool) -> TypeId {
        let longs = counts.iter().filter(|k| **k == "long").count();
        if counts.contains(&"double") {
            return if longs > 0 { self.base.long_double } else { self.base.double };
        }
        if counts.contains(&"float") {
            return self.base.float;
        }
        if counts.contains(&"void") {
            return self.base.void;
        }
        if counts.contains(&"bool") {
            return self.base.bool_;
        }
        if counts.contains(&"char") {
            return self.base.char_;
        }
        if counts.contains(&"short") {
            return self.maybe_unsigned(self.base.short, self.base.ushort, unsigned);
        }
        if longs > 0 {
            return self.maybe_unsigned(self.base.long, self.base.ulong, unsigned);
        }
        self.maybe_unsigned(self.base.int, self.base.uint, unsigned)
    }

    /// `short`/`int`/`long` each have a pre-allocated unsigned singleton
    /// (`BaseTypes::install`), so picking the unsigned variant never
    /// mutates the shared signed one other declarations still reference.
    fn maybe_unsigned(&self, signed: TypeId, unsigned_ty: TypeId, unsigned: bool) -> TypeId {
        if unsigned {
            unsigned_ty
        } else {
            signed
        }
    }

    /// Consumes a (possibly absent) `__attribute__((...))` or `[[...]]`
    /// sequence. Only `packed` and `aligned(N)` are interpreted; anything
    /// else is parsed for balance and discarded.
    pub(crate) fn skip_attributes(&mut self) -> CompileResult<(bool, Option<u64>)> {
        let mut packed = false;
        let mut align = None;
        loop {
            if self.eat_keyword("__attribute__") {
                self.expect_punct("(")?;
                self.expect_punct("(")?;
                loop {
                    if self.cur().is_ident() || self.cur().kind == crate::token::TokenKind::Keyword {
                        let name = self.cur().text.clone();
                        self.bump();
                        if &*name == "packed" {
                            packed = true;
                        }
                        if &*name == "aligned" && self.eat_punct("(") {
                            let n = self.parse_const_expr()?;
                            align = Some(self.fold_const_i64(n).max(1) as u64);
                            self.expect_punct(")")?;
                        } else if self.eat_punct("(") {
                            let mut depth = 1;
                            while depth > 0 && !self.cur().is_eof() {
                                if self.eat_punct("(") {
                                    depth += 1;
                                } else if self.eat_punct(")") {
                                    depth -= 1;
                                } else {
                                    self.bump();
                                }
                            }
                        }
                    } else {
                        self.bump();
                    }
                    if !self.eat_punct(",") {
                        break;
                    }
                }
                self.expect_punct(")")?;
                self.expect_punct(")")?;
            } else if self.at_double_bracket("[") {
                self.bump();
                self.bump();
                let mut depth = 1;
                while depth > 0 && !self.cur().is_eof() {
                    if self.at_double_bracket("[") {
                        self.bump();
                        self.bump();
                        depth += 1;
                    } else if self.at_double_bracket("]") {
                        self.bump();
                        self.bump();
                        depth -= 1;
                    } else {
                        if self.cur().is_ident() && &*self.cur().text == "packed" {
                            packed = true;
                        }
                        self.bump();
                    }
                }
            } else {
                break;
            }
        }
        Ok((packed, align))
    }

    /// Parses a declarator: leading `*`s, then either an identifier, a
    /// parenthesized nested declarator, or (in abstract-declarator
    /// contexts) nothing, followed by array/function suffixes. Returns
    /// the declared name (`None` for abstract declarators) and the full
    /// composed type.
    pub(crate) fn parse_declarator(&mut self, base_ty: TypeId) -> CompileResult<(Option<Symbol>, TypeId)> {
        let mut ty = base_ty;
        while self.eat_punct("*") {
            ty = self.types.pointer_to(ty);
            while self.eat_keyword("const") || self.eat_keyword("volatile") || self.eat_keyword("restrict") || self.eat_keyword("_Atomic") {}
        }
        if self.at_punct("(") && (self.peek_at(1).is_ident() || self.peek_at(1).is_punct("*") || self.peek_at(1).is_punct("(")) {
            self.bump();
            let placeholder = self.types.alloc(Type { kind: TypeKind::Void, size: 0, align: 1, is_unsigned: false, is_const: false, is_atomic: false });
            let (name, inner_ty) = self.parse_declarator(placeholder)?;
            self.expect_punct(")")?;
            let outer_ty = self.parse_type_suffix(ty)?;
            let patched = self.types.get(outer_ty).clone();
            *self.types.get_mut(placeholder) = patched;
            return Ok((name, inner_ty));
        }
        let name = if self.cur().is_ident() {
            let sym = self.intern_cur_text();
            self.bump();
            Some(sym)
        } else {
            None
        };
        let ty = self.parse_type_suffix(ty)?;
        Ok((name, ty))
    }

    fn parse_type_suffix(&mut self, base_ty: TypeId) -> CompileResult<TypeId> {
        if self.eat_punct("(") {
            let (params, is_variadic) = self.parse_param_list()?;
            let param_tys = params.iter().map(|(_, t)| *t).collect();
            return Ok(self.types.alloc(Type {
                kind: TypeKind::Func { ret: base_ty, params: param_tys, is_variadic },
                size: 0,
                align: 1,
                is_unsigned: false,
                is_const: false,
                is_atomic: false,
            }));
        }
        if self.eat_punct("[") {
            while self.eat_keyword("static") || self.eat_keyword("const") {}
            if self.eat_punct("*") {
                self.expect_punct("]")?;
                let base = self.parse_type_suffix(base_ty)?;
                return Ok(self.types.alloc(Type {
                    kind: TypeKind::Array { base, len: -1 },
                    size: 0,
                    align: self.types.get(base).align,
                    is_unsigned: false,
                    is_const: false,
                    is_atomic: false,
                }));
            }
            if self.eat_punct("]") {
                let base = self.parse_type_suffix(base_ty)?;
                return Ok(self.types.alloc(Type {
                    kind: TypeKind::Array { base, len: -1 },
                    size: 0,
                    align: self.types.get(base).align,
                    is_unsigned: false,
                    is_const: false,
                    is_atomic: false,
                }));
            }
            let len_node = self.parse_const_expr()?;
            self.expect_punct("]")?;
            let base = self.parse_type_suffix(base_ty)?;
            if let Some(len) = self.try_fold_const_i64(len_node) {
                let elem_size = self.types.size_of(base).unwrap_or(0);
                return Ok(self.types.alloc(Type {
                    kind: TypeKind::Array { base, len },
                    size: elem_size * len.max(0) as u64,
                    align: self.types.get(base).align,
                    is_unsigned: false,
                    is_const: false,
                    is_atomic: false,
                }));
            }
            // Non-constant bound: a VLA. `size_local` is filled in by
            // codegen once the enclosing function's locals are laid out.
            let size_local = ObjId::new(0);
            return Ok(self.types.alloc(Type {
                kind: TypeKind::Vla { base, len_expr: len_node, size_local },
                size: 0,
                align: self.types.get(base).align,
                is_unsigned: false,
                is_const: false,
                is_atomic: false,
            }));
        }
        Ok(base_ty)
    }

    pub(crate) fn parse_param_list(&mut self) -> CompileResult<(Vec<(Option<Symbol>, TypeId)>, bool)> {
        let mut params = Vec::new();
        if self.at_punct(")") {
            self.bump();
            self.pending_param_names = Vec::new();
            return Ok((params, false));
        }
        if self.at_keyword("void") && self.peek_at(1).is_punct(")") {
            self.bump();
            self.bump();
            self.pending_param_names = Vec::new();
            return Ok((params, false));
        }
        let mut is_variadic = false;
        loop {
            if self.eat_punct("...") {
                is_variadic = true;
                break;
            }
            let (base_ty, _attrs) = self.parse_declspec()?;
            let (name, mut ty) = self.parse_declarator(base_ty)?;
            ty = self.types.decay(ty);
            params.push((name, ty));
            if !self.eat_punct(",") {
                break;
            }
        }
        self.expect_punct(")")?;
        self.pending_param_names = params.iter().map(|(n, _)| *n).collect();
        Ok((params, is_variadic))
    }

    pub(crate) fn parse_type_name(&mut self) -> CompileResult<TypeId> {
        let (base_ty, _) = self.parse_declspec()?;
        let (_, ty) = self.parse_declarator(base_ty)?;
        Ok(ty)
    }

    fn parse_struct_or_union(&mut self) -> CompileResult<TypeId> {
        let is_union = self.at_keyword("union");
        self.bump();
        let tag = if self.cur().is_ident() {
            let sym = self.intern_cur_text();
            self.bump();
            Some(sym)
        } else {
            None
        };
        let (packed_attr, _) = self.skip_attributes()?;
        if !self.at_punct("{") {
            // Reference to a previously-declared (possibly still
            // incomplete) tag.
            if let Some(name) = tag {
                if let Some(entry) = self.scopes.find_tag(name) {
                    return Ok(match entry {
                        TagEntry::Struct(t) | TagEntry::Union(t) => t,
                        TagEntry::Enum(t) => t,
                    });
                }
            }
            let kind = if is_union {
                TypeKind::Union { tag, members: Vec::new(), is_packed: false }
            } else {
                TypeKind::Struct { tag, members: Vec::new(), is_packed: false, has_flexible_tail: false }
            };
            let id = self.types.alloc(Type { kind, size: 0, align: 1, is_unsigned: false, is_const: false, is_atomic: false });
            if let Some(name) = tag {
                self.declare_tag(name, if is_union { TagEntry::Union(id) } else { TagEntry::Struct(id) });
            }
            return Ok(id);
        }
        self.bump();
        let mut members = Vec::new();
        let mut packed = packed_attr;
        while !self.at_punct("}") {
            let (base_ty, attrs) = self.parse_declspec()?;
            packed |= attrs.is_packed;
            loop {
                let (name, ty) = self.parse_declarator(base_ty)?;
                let bit_width = if self.eat_punct(":") {
                    let w = self.parse_const_expr()?;
                    Some(self.fold_const_i64(w) as u32)
                } else {
                    None
                };
                self.skip_attributes()?;
                members.push(Member { name: name.unwrap_or(Symbol::new(0)), ty, offset: 0, bit_width });
                if !self.eat_punct(",") {
                    break;
                }
            }
            self.expect_punct(";")?;
        }
        self.expect_punct("}")?;
        let (packed2, _) = self.skip_attributes()?;
        packed |= packed2;
        let has_flexible_tail = members
            .last()
            .map(|m| matches!(self.types.get(m.ty).kind, TypeKind::Array { len, .. } if len < 0))
            .unwrap_or(false);
        let (laid_out, size, align) = if is_union {
            self.types.layout_union(&members, packed)
        } else {
            self.types.layout_struct(&members, packed, has_flexible_tail)
        };
        let kind = if is_union {
            TypeKind::Union { tag, members: laid_out, is_packed: packed }
        } else {
            TypeKind::Struct { tag, members: laid_out, is_packed: packed, has_flexible_tail }
        };
        let id = self.types.alloc(Type { kind, size, align, is_unsigned: false, is_const: false, is_atomic: false });
        if let Some(name) = tag {
            self.declare_tag(name, if is_union { TagEntry::Union(id) } else { TagEntry::Struct(id) });
        }
        Ok(id)
    }

    fn parse_enum(&mut self) -> CompileResult<TypeId> {
        self.bump();
        let tag = if self.cur().is_ident() {
            let sym = self.intern_cur_text();
            self.bump();
            Some(sym)
        } else {
            None
        };
        if self.eat_punct(":") {
            self.parse_type_name()?;
        }
        if !self.at_punct("{") {
            if let Some(name) = tag {
                if let Some(TagEntry::Enum(t)) = self.scopes.find_tag(name) {
                    return Ok(t);
                }
            }
            return self.error("reference to undeclared enum");
        }
        self.bump();
        let mut constants = Vec::new();
        let mut next_value = 0i64;
        while !self.at_punct("}") {
            let name = self.expect_ident()?;
            self.skip_attributes()?;
            if self.eat_punct("=") {
                let n = self.parse_const_expr()?;
                next_value = self.fold_const_i64(n);
            }
            constants.push(EnumConstant { name, value: next_value });
            self.declare_ident(name, VarScope::EnumConstant { ty: self.base.int, value: next_value });
            next_value += 1;
            if !self.eat_punct(",") {
                break;
            }
        }
        self.expect_punct("}")?;
        let id = self.types.alloc(Type {
            kind: TypeKind::Enum { constants },
            size: 4,
            align: 4,
            is_unsigned: false,
            is_const: false,
            is_atomic: false,
        });
        if let Some(name) = tag {
            self.declare_tag(name, TagEntry::Enum(id));
        }
        Ok(id)
    }

    /// Folds a constant-expression AST down to an `i64`. Only the shapes
    /// declaration parsing itself produces (literals, `sizeof`, simple
    /// arithmetic) need folding here; general constant-folding for
    /// initializers lives in `fold_global_scalar`.
    pub(crate) fn fold_const_i64(&self, node: cvm_ast::NodeId) -> i64 {
        self.try_fold_const_i64(node).unwrap_or(0)
    }

    pub(crate) fn try_fold_const_i64(&self, node: cvm_ast::NodeId) -> Option<i64> {
        use cvm_ast::node::BinOp;
        match &self.ast.node(node).kind {
            NodeKind::IntLit(v) => Some(*v),
            NodeKind::FloatLit(v) => Some(*v as i64),
            NodeKind::SizeofType(ty) => self.types.size_of(*ty).ok().map(|v| v as i64),
            NodeKind::Sizeof(n) => self.ast.node(*n).ty.and_then(|t| self.types.size_of(t).ok()).map(|v| v as i64),
            NodeKind::Alignof(ty) => self.types.align_of(*ty).ok().map(|v| v as i64),
            NodeKind::Unary { op: cvm_ast::node::UnOp::Neg, operand } => self.try_fold_const_i64(*operand).map(|v| -v),
            NodeKind::Binary { op, lhs, rhs } => {
                let a = self.try_fold_const_i64(*lhs)?;
                let b = self.try_fold_const_i64(*rhs)?;
                Some(match op {
                    BinOp::Add => a + b,
                    BinOp::Sub => a - b,
                    BinOp::Mul => a * b,
                    BinOp::Div if b != 0 => a / b,
                    BinOp::Mod if b != 0 => a % b,
                    BinOp::Shl => a << b,
                    BinOp::Shr => a >> b,
                    BinOp::BitAnd => a & b,
                    BinOp::BitOr => a | b,
                    BinOp::BitXor => a ^ b,
                    _ => return None,
                })
            }
            _ => None,
        }
    }

    pub(crate) fn node_ty_pub(&self, node: cvm_ast::NodeId) -> TypeId {
        self.ast.node(node).ty.unwrap_or(self.base.int)
    }

    // ---- Top-level driver ----------------------------------------------

    pub(crate) fn parse_translation_unit(&mut self) -> CompileResult<()> {
        while !self.cur().is_eof() {
            if let Err(diag) = self.parse_external_decl() {
                if self.sink.is_recovering() {
                    self.recover_to_stmt_boundary();
                } else {
                    return Err(diag);
                }
            }
        }
        Ok(())
    }

    fn parse_external_decl(&mut self) -> CompileResult<()> {
        let (base_ty, attrs) = self.parse_declspec()?;
        if self.eat_punct(";") {
            return Ok(()); // bare tag declaration: `struct Foo { ... };`
        }
        let (name, ty) = self.parse_declarator(base_ty)?;
        let name = match name {
            Some(n) => n,
            None => return self.error("expected a declarator name"),
        };
        self.skip_attributes()?;

        if attrs.is_typedef {
            self.declare_ident(name, VarScope::Typedef(ty));
            while self.eat_punct(",") {
                let (n2, t2) = self.parse_declarator(base_ty)?;
                if let Some(n2) = n2 {
                    self.declare_ident(n2, VarScope::Typedef(t2));
                }
            }
            self.expect_punct(";")?;
            return Ok(());
        }

        let is_function_def = matches!(self.types.get(ty).kind, TypeKind::Func { .. }) && self.at_punct("{");
        if is_function_def {
            return self.parse_function_def(name, ty, attrs.is_static, attrs.is_inline);
        }

        // One or more global declarators, optionally initialized.
        let mut decl_ty = ty;
        let mut decl_name = name;
        loop {
            let obj_flags = ObjFlags {
                is_static: attrs.is_static,
                is_definition: !attrs.is_extern,
                is_tentative: !attrs.is_extern && !self.at_punct("="),
                is_inline: attrs.is_inline,
                is_constexpr: attrs.is_constexpr,
                is_root: !attrs.is_static,
                is_live: true,
            };
            let init = if self.eat_punct("=") {
                let tree = self.parse_initializer_tree(decl_ty)?;
                Some(self.lower_global_init(decl_ty, &tree))
            } else {
                None
            };
            let obj = Obj { name: decl_name, ty: decl_ty, flags: obj_flags, kind: ObjKind::Global { init } };
            let id = self.ast.push_obj(obj);
            self.declare_ident(decl_name, VarScope::Variable(id));
            self.top_level.push(id);
            if !self.eat_punct(",") {
                break;
            }
            let (n2, t2) = self.parse_declarator(base_ty)?;
            decl_name = n2.ok_or_else(|| cvm_diagnostics::Diagnostic::new(self.span(), "expected a declarator name"))?;
            decl_ty = t2;
        }
        self.expect_punct(";")?;
        Ok(())
    }

    fn parse_function_def(&mut self, name: Symbol, func_ty: TypeId, is_static: bool, is_inline: bool) -> CompileResult<()> {
        let (param_tys, is_variadic) = match self.types.get(func_ty).kind.clone() {
            TypeKind::Func { params, is_variadic, .. } => (params, is_variadic),
            _ => unreachable!("caller checked TypeKind::Func"),
        };
        let func_id = self.ast.push_obj(Obj {
            name,
            ty: func_ty,
            flags: ObjFlags { is_static, is_definition: true, is_tentative: false, is_inline, is_constexpr: false, is_root: !is_static, is_live: true },
            kind: ObjKind::Function { params: Vec::new(), body: None, locals: Vec::new(), is_variadic, entry: None, refs: Vec::new() },
        });
        self.declare_ident(name, VarScope::Variable(func_id));
        self.top_level.push(func_id);

        self.scopes.push();
        let prev_function = self.current_function.replace(func_id);
        let prev_locals = std::mem::take(&mut self.current_locals);
        let prev_refs = std::mem::take(&mut self.current_refs);
        self.labels.clear();
        self.pending_gotos.clear();

        let param_names = std::mem::take(&mut self.pending_param_names);
        let mut param_ids = Vec::new();
        for (i, ty) in param_tys.iter().enumerate() {
            let pname = param_names.get(i).copied().flatten().unwrap_or_else(|| self.interner.intern(""));
            let pid = self.ast.push_obj(Obj {
                name: pname,
                ty: *ty,
                flags: ObjFlags::default(),
                kind: ObjKind::Local { frame_offset: 0 },
            });
            if param_names.get(i).copied().flatten().is_some() {
                self.declare_ident(pname, VarScope::Variable(pid));
            }
            param_ids.push(pid);
        }

        // `__func__`/`__FUNCTION__` are injected as string-literal-backed
        // locals of the enclosing function's own name.
        let func_name = self.interner.resolve(name).to_string();
        let func_name_sym = self.interner.intern(&func_name);
        self.intern_string_literal(func_name_sym);
        let char_ptr = self.types.pointer_to(self.base.char_);
        let dunder_func = self.interner.intern("__func__");
        // Constant-initialized: codegen reads `__func__` straight out of
        // the string pool rather than assigning it in the prologue.
        self.add_local(dunder_func, char_ptr);

        let body = self.parse_compound_stmt()?;
        self.resolve_gotos()?;

        let locals = std::mem::replace(&mut self.current_locals, prev_locals);
        let refs = std::mem::replace(&mut self.current_refs, prev_refs);
        self.current_function = prev_function;
        self.scopes.pop();

        if let ObjKind::Function { params, body: body_slot, locals: locals_slot, refs: refs_slot, .. } = &mut self.ast.obj_mut(func_id).kind {
            *params = param_ids;
            *body_slot = Some(body);
            *locals_slot = locals;
            *refs_slot = refs;
        }
        Ok(())
    }

    fn resolve_gotos(&mut self) -> CompileResult<()> {
        let pending = std::mem::take(&mut self.pending_gotos);
        for pg in pending {
            if !self.labels.contains_key(&pg.label) {
                return self.error(format!("use of undeclared label '{}'", self.interner.resolve(pg.label)));
            }
        }
        Ok(())
    }

    pub(crate) fn record_call_ref(&mut self, callee: ObjId) {
        if !self.current_refs.contains(&callee) {
            self.current_refs.push(callee);
        }
    }

    pub(crate) fn add_local(&mut self, name: Symbol, ty: TypeId) -> ObjId {
        let id = self.ast.push_obj(Obj {
            name,
            ty,
            flags: ObjFlags::default(),
            kind: ObjKind::Local { frame_offset: 0 },
        });
        self.current_locals.push(id);
        self.declare_ident(name, VarScope::Variable(id));
        id
    }

    /// A local with no name in scope, for storage a compound literal needs
    /// but that no identifier ever refers to.
    pub(crate) fn add_anon_local(&mut self, ty: TypeId) -> ObjId {
        let id = self.ast.push_obj(Obj {
            name: Symbol::new(0),
            ty,
            flags: ObjFlags::default(),
            kind: ObjKind::Local { frame_offset: 0 },
        });
        self.current_locals.push(id);
        id
    }

    // ---- Initializers ---------------------------------------------------

    /// Parses a braced or bare initializer into the designator-aware
    /// [`Initializer`] tree. `ty` is the declared type, used to resolve
    /// bare `{ ... }` nesting depth and array/struct element types.
    pub(crate) fn parse_initializer_tree(&mut self, ty: TypeId) -> CompileResult<Initializer> {
        if !self.at_punct("{") {
            let expr = self.parse_assign()?;
            return Ok(Initializer::Scalar(expr));
        }
        self.bump();
        let mut entries = Vec::new();
        let mut index = 0i64;
        while !self.at_punct("}") {
            let mut designators = Vec::new();
            loop {
                if self.eat_punct(".") {
                    let field = self.expect_ident()?;
                    designators.push(Designator::Field(field));
                    continue;
                }
                if self.eat_punct("[") {
                    let lo_node = self.parse_const_expr()?;
                    let lo = self.fold_const_i64(lo_node);
                    let hi = if self.eat_punct("...") {
                        let hi_node = self.parse_const_expr()?;
                        self.fold_const_i64(hi_node)
                    } else {
                        lo
                    };
                    self.expect_punct("]")?;
                    designators.push(Designator::Index { lo, hi });
                    continue;
                }
                break;
            }
            if !designators.is_empty() {
                self.expect_punct("=")?;
            }
            let elem_ty = self.initializer_elem_ty(ty, &designators, index);
            let value = self.parse_initializer_tree(elem_ty)?;
            if designators.is_empty() {
                index += 1;
            }
            entries.push((designators, value));
            if !self.eat_punct(",") {
                break;
            }
            if self.at_punct("}") {
                break; // trailing comma
            }
        }
        self.expect_punct("}")?;
        Ok(Initializer::Aggregate(entries))
    }

    fn initializer_elem_ty(&self, ty: TypeId, designators: &[Designator], positional_index: i64) -> TypeId {
        match &self.types.get(ty).kind {
            TypeKind::Array { base, .. } | TypeKind::Vla { base, .. } => {
                let _ = positional_index;
                let _ = designators;
                *base
            }
            TypeKind::Struct { members, .. } | TypeKind::Union { members, .. } => {
                if let Some(Designator::Field(name)) = designators.first() {
                    members.iter().find(|m| m.name == *name).map(|m| m.ty).unwrap_or(self.base.error)
                } else {
                    members.get(positional_index as usize).map(|m| m.ty).unwrap_or(self.base.error)
                }
            }
            _ => ty,
        }
    }

    /// Lowers a parsed [`Initializer`] tree into a `GlobalInit` byte
    /// buffer + relocation list. Constant scalars are written directly;
    /// address-valued scalars (`&other_global`, string literals, function
    /// names) become a [`GlobalReloc`] with a zero placeholder.
    pub(crate) fn lower_global_init(&mut self, ty: TypeId, init: &Initializer) -> GlobalInit {
        let size = self.types.size_of(ty).unwrap_or(0) as usize;
        let mut bytes = vec![0u8; size];
        let mut relocations = Vec::new();
        self.write_global_init(ty, init, 0, &mut bytes, &mut relocations);
        GlobalInit { bytes, relocations }
    }

    fn write_global_init(&mut self, ty: TypeId, init: &Initializer, offset: u64, bytes: &mut Vec<u8>, relocs: &mut Vec<GlobalReloc>) {
        match init {
            Initializer::Scalar(expr) => self.write_scalar_init(ty, *expr, offset, bytes, relocs),
            Initializer::Aggregate(entries) => {
                let mut cursor = 0i64;
                for (designators, value) in entries {
                    let (member_offset, member_ty) = self.resolve_designator_offset(ty, designators, cursor);
                    if designators.is_empty() {
                        cursor += 1;
                    }
                    self.write_global_init(member_ty, value, offset + member_offset, bytes, relocs);
                }
            }
        }
    }

    fn resolve_designator_offset(&self, ty: TypeId, designators: &[Designator], positional_index: i64) -> (u64, TypeId) {
        match &self.types.get(ty).kind {
            TypeKind::Array { base, .. } => {
                let elem_size = self.types.size_of(*base).unwrap_or(0);
                let idx = match designators.first() {
                    Some(Designator::Index { lo, .. }) => *lo,
                    _ => positional_index,
                };
                (idx.max(0) as u64 * elem_size, *base)
            }
            TypeKind::Struct { members, .. } | TypeKind::Union { members, .. } => {
                if let Some(Designator::Field(name)) = designators.first() {
                    if let Some(m) = members.iter().find(|m| m.name == *name) {
                        return (m.offset, m.ty);
                    }
                }
                if let Some(m) = members.get(positional_index.max(0) as usize) {
                    return (m.offset, m.ty);
                }
                (0, self.base.error)
            }
            _ => (0, ty),
        }
    }

    fn write_scalar_init(&mut self, ty: TypeId, expr: cvm_ast::NodeId, offset: u64, bytes: &mut Vec<u8>, relocs: &mut Vec<GlobalReloc>) {
        if let Some((target, addend)) = self.fold_address_const(expr) {
            relocs.push(GlobalReloc { offset, target, addend });
            return;
        }
        let size = self.types.size_of(ty).unwrap_or(8) as usize;
        let start = offset as usize;
        if start + size > bytes.len() {
            return;
        }
        if self.types.get(ty).is_float() {
            let v = self.try_fold_const_f64(expr).unwrap_or(0.0);
            if size == 4 {
                bytes[start..start + 4].copy_from_slice(&(v as f32).to_le_bytes());
            } else {
                bytes[start..start + size.min(8)].copy_from_slice(&v.to_le_bytes()[..size.min(8)]);
            }
            return;
        }
        let v = self.try_fold_const_i64(expr).unwrap_or(0);
        bytes[start..start + size.min(8)].copy_from_slice(&v.to_le_bytes()[..size.min(8)]);
    }

    fn try_fold_const_f64(&self, node: cvm_ast::NodeId) -> Option<f64> {
        match &self.ast.node(node).kind {
            NodeKind::FloatLit(v) => Some(*v),
            NodeKind::IntLit(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Recognizes `&global`, a bare function/array name (which decays to
    /// its own address), and string literals as address constants for a
    /// global initializer.
    fn fold_address_const(&self, node: cvm_ast::NodeId) -> Option<(RelocTarget, i64)> {
        match &self.ast.node(node).kind {
            NodeKind::Unary { op: cvm_ast::node::UnOp::Addr, operand } => self.fold_address_const(*operand).or_else(|| match &self.ast.node(*operand).kind {
                NodeKind::VarRef(id) => Some((RelocTarget::Obj(*id), 0)),
                _ => None,
            }),
            NodeKind::VarRef(id) if self.ast.obj(*id).is_function() => Some((RelocTarget::Obj(*id), 0)),
            NodeKind::FuncAddr(id) => Some((RelocTarget::Obj(*id), 0)),
            NodeKind::StringLit(sym) => {
                let idx = self.string_pool.iter().position(|s| s == sym).unwrap_or(0);
                Some((RelocTarget::StringPoolOffset(idx as u64), 0))
            }
            NodeKind::Binary { op: cvm_ast::node::BinOp::Add, lhs, rhs } => {
                let (target, addend) = self.fold_address_const(*lhs)?;
                let extra = self.try_fold_const_i64(*rhs)?;
                Some((target, addend + extra))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::token::{ident, keyword, num, punct, VecTokenStream};
    use crate::ParserConfig;
    use cvm_types::TypeKind;

    fn parse(tokens: Vec<crate::token::Token>) -> cvm_diagnostics::CompileResult<crate::ParseOutput> {
        crate::parse(&mut VecTokenStream::new(tokens), ParserConfig::default())
    }

    #[test]
    fn unsigned_int_gets_its_own_singleton() {
        // `unsigned int x;`
        let out = parse(vec![keyword("unsigned"), keyword("int"), ident("x"), punct(";")]).unwrap();
        let id = out.globals[0];
        let obj = out.ast.obj(id);
        let ty = out.types.get(obj.ty);
        assert!(matches!(ty.kind, TypeKind::Int));
        assert!(ty.is_unsigned);
    }

    #[test]
    fn unsigned_long_is_distinct_from_unsigned_int() {
        let out = parse(vec![
            keyword("unsigned"),
            keyword("long"),
            ident("a"),
            punct(";"),
            keyword("unsigned"),
            keyword("int"),
            ident("b"),
            punct(";"),
        ])
        .unwrap();
        let a = out.ast.obj(out.globals[0]);
        let b = out.ast.obj(out.globals[1]);
        assert_ne!(a.ty, b.ty);
        assert!(matches!(out.types.get(a.ty).kind, TypeKind::Long));
        assert!(matches!(out.types.get(b.ty).kind, TypeKind::Int));
        assert!(out.types.get(a.ty).is_unsigned);
        assert!(out.types.get(b.ty).is_unsigned);
    }

    #[test]
    fn signed_int_unaffected_by_unsigned_singleton_split() {
        let out = parse(vec![keyword("int"), ident("x"), punct(";")]).unwrap();
        let obj = out.ast.obj(out.globals[0]);
        assert!(!out.types.get(obj.ty).is_unsigned);
    }

    #[test]
    fn global_with_initializer_gets_a_global_init() {
        // `int x = 3;`
        let out = parse(vec![keyword("int"), ident("x"), punct("="), num(3), punct(";")]).unwrap();
        let obj = out.ast.obj(out.globals[0]);
        match &obj.kind {
            cvm_ast::obj::ObjKind::Global { init: Some(g) } => assert!(!g.bytes.is_empty()),
            other => panic!("expected an initialized global, got {other:?}"),
        }
    }

    #[test]
    fn unreferenced_static_inline_is_pruned_live_flag() {
        // `static inline int unused(void) { return 1; }`
        // `int main(void) { return 0; }`
        let out = parse(vec![
            keyword("static"),
            keyword("inline"),
            keyword("int"),
            ident("unused"),
            punct("("),
            keyword("void"),
            punct(")"),
            punct("{"),
            keyword("return"),
            num(1),
            punct(";"),
            punct("}"),
            keyword("int"),
            ident("main"),
            punct("("),
            keyword("void"),
            punct(")"),
            punct("{"),
            keyword("return"),
            num(0),
            punct(";"),
            punct("}"),
        ])
        .unwrap();
        let unused = out.ast.obj(out.globals[0]);
        let main = out.ast.obj(out.globals[1]);
        assert!(!unused.flags.is_live);
        assert!(main.flags.is_live);
    }
}
