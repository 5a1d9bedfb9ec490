//! Expression parsing: precedence climbing from assignment down to
//! primary, plus the GNU/C23 forms spec.md §4.2 calls out explicitly
//! (statement expressions, `_Generic`, compound literals, labels-as-values,
//! `va_arg`/`va_start`/`va_end`, and the `__atomic_*`/`__sync_*` builtins
//! lowered to [`NodeKind::Cas`]/[`NodeKind::AtomicExchange`]).

use cvm_ast::node::{BinOp, NodeKind, UnOp};
use cvm_ast::scope::VarScope;
use cvm_ast::obj::ObjKind;
use cvm_ast::NodeId;
use cvm_diagnostics::{CompileResult, Span};
use cvm_support::intern::Symbol;
use cvm_types::{TypeId, TypeKind};
use smallvec::SmallVec;

use crate::parser::Parser;

impl<'s> Parser<'s> {
    fn typed_node(&mut self, span: Span, kind: NodeKind, ty: TypeId) -> NodeId {
        let id = self.node(span, kind);
        self.ast.node_mut(id).ty = Some(ty);
        id
    }

    fn node_ty(&self, id: NodeId) -> TypeId {
        self.ast.node(id).ty.unwrap_or(self.base.int)
    }

    /// Usual arithmetic conversions, simplified: float beats everything,
    /// otherwise the wider integer rank wins. Good enough for codegen's
    /// register-width selection; full C integer-promotion edge cases
    /// (mixed signedness at the same rank) are not modeled.
    fn common_arith_ty(&self, a: TypeId, b: TypeId) -> TypeId {
        let ta = self.types.get(a);
        let tb = self.types.get(b);
        if matches!(ta.kind, TypeKind::Double | TypeKind::LongDouble) {
            return a;
        }
        if matches!(tb.kind, TypeKind::Double | TypeKind::LongDouble) {
            return b;
        }
        if matches!(ta.kind, TypeKind::Float) {
            return a;
        }
        if matches!(tb.kind, TypeKind::Float) {
            return b;
        }
        if ta.size >= tb.size {
            a
        } else {
            b
        }
    }

    pub(crate) fn parse_expr(&mut self) -> CompileResult<NodeId> {
        let first = self.parse_assign()?;
        if self.at_punct(",") {
            let span = self.span();
            self.bump();
            let rest = self.parse_expr()?;
            let ty = self.node_ty(rest);
            return Ok(self.typed_node(span, NodeKind::Comma { lhs: first, rhs: rest }, ty));
        }
        Ok(first)
    }

    /// A constant-expression context (array lengths, enum values, case
    /// labels, `static`/global initializers). No distinct grammar in this
    /// parser: folding happens in codegen, which rejects non-constant
    /// trees. This just parses a conditional-expression (no assignment,
    /// no comma), matching the C grammar's `constant-expression`.
    pub(crate) fn parse_const_expr(&mut self) -> CompileResult<NodeId> {
        self.parse_conditional()
    }

    pub(crate) fn parse_assign(&mut self) -> CompileResult<NodeId> {
        let lhs = self.parse_conditional()?;
        let compound = [
            ("=", None),
            ("+=", Some(BinOp::Add)),
            ("-=", Some(BinOp::Sub)),
            ("*=", Some(BinOp::Mul)),
            ("/=", Some(BinOp::Div)),
            ("%=", Some(BinOp::Mod)),
            ("&=", Some(BinOp::BitAnd)),
            ("|=", Some(BinOp::BitOr)),
            ("^=", Some(BinOp::BitXor)),
            ("<<=", Some(BinOp::Shl)),
            (">>=", Some(BinOp::Shr)),
        ];
        for (text, op) in compound {
            if self.at_punct(text) {
                let span = self.span();
                self.bump();
                let rhs = self.parse_assign()?;
                let ty = self.node_ty(lhs);
                let kind = match op {
                    None => NodeKind::Assign { lhs, rhs },
                    Some(op) => NodeKind::CompoundAssign { op, lhs, rhs },
                };
                return Ok(self.typed_node(span, kind, ty));
            }
        }
        Ok(lhs)
    }

    fn parse_conditional(&mut self) -> CompileResult<NodeId> {
        let cond = self.parse_logor()?;
        if self.at_punct("?") {
            let span = self.span();
            self.bump();
            let then = self.parse_expr()?;
            self.expect_punct(":")?;
            let els = self.parse_conditional()?;
            let ty = self.common_arith_ty(self.node_ty(then), self.node_ty(els));
            return Ok(self.typed_node(span, NodeKind::Conditional { cond, then, els }, ty));
        }
        Ok(cond)
    }

    fn binary_level(
        &mut self,
        ops: &[(&str, BinOp)],
        next: fn(&mut Self) -> CompileResult<NodeId>,
    ) -> CompileResult<NodeId> {
        let mut lhs = next(self)?;
        'outer: loop {
            for (text, op) in ops {
                if self.at_punct(text) {
                    let span = self.span();
                    self.bump();
                    let rhs = next(self)?;
                    let ty = if matches!(op, BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge | BinOp::LogAnd | BinOp::LogOr) {
                        self.base.int
                    } else {
                        self.common_arith_ty(self.node_ty(lhs), self.node_ty(rhs))
                    };
                    lhs = self.typed_node(span, NodeKind::Binary { op: *op, lhs, rhs }, ty);
                    continue 'outer;
                }
            }
            return Ok(lhs);
        }
    }

    fn parse_logor(&mut self) -> CompileResult<NodeId> {
        self.binary_level(&[("||", BinOp::LogOr)], Self::parse_logand)
    }
    fn parse_logand(&mut self) -> CompileResult<NodeId> {
        self.binary_level(&[("&&", BinOp::LogAnd)], Self::parse_bitor)
    }
    fn parse_bitor(&mut self) -> CompileResult<NodeId> {
        self.binary_level(&[("|", BinOp::BitOr)], Self::parse_bitxor)
    }
    fn parse_bitxor(&mut self) -> CompileResult<NodeId> {
        self.binary_level(&[("^", BinOp::BitXor)], Self::parse_bitand)
    }
    fn parse_bitand(&mut self) -> CompileResult<NodeId> {
        self.binary_level(&[("&", BinOp::BitAnd)], Self::parse_equality)
    }
    fn parse_equality(&mut self) -> CompileResult<NodeId> {
        self.binary_level(&[("==", BinOp::Eq), ("!=", BinOp::Ne)], Self::parse_relational)
    }
    fn parse_relational(&mut self) -> CompileResult<NodeId> {
        self.binary_level(
            &[("<", BinOp::Lt), ("<=", BinOp::Le), (">", BinOp::Gt), (">=", BinOp::Ge)],
            Self::parse_shift,
        )
    }
    fn parse_shift(&mut self) -> CompileResult<NodeId> {
        self.binary_level(&[("<<", BinOp::Shl), (">>", BinOp::Shr)], Self::parse_additive)
    }

    /// Pointer arithmetic scales here: `p + i` on a `T*` multiplies `i` by
    /// `sizeof(T)` before the `Binary::Add` node is built, so codegen never
    /// has to rediscover the pointee size from the AST shape.
    fn parse_additive(&mut self) -> CompileResult<NodeId> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = if self.at_punct("+") {
                BinOp::Add
            } else if self.at_punct("-") {
                BinOp::Sub
            } else {
                return Ok(lhs);
            };
            let span = self.span();
            self.bump();
            let rhs = self.parse_multiplicative()?;
            lhs = self.build_additive(span, op, lhs, rhs)?;
        }
    }

    fn build_additive(&mut self, span: Span, op: BinOp, lhs: NodeId, rhs: NodeId) -> CompileResult<NodeId> {
        let lty = self.node_ty(lhs);
        let rty = self.node_ty(rhs);
        let l_ptr = self.pointee(lty);
        let r_ptr = self.pointee(rty);
        match (l_ptr, r_ptr) {
            (Some(elem), None) => {
                let scaled = self.scale_index(span.clone(), rhs, elem)?;
                Ok(self.typed_node(span, NodeKind::Binary { op, lhs, rhs: scaled }, lty))
            }
            (None, Some(elem)) if op == BinOp::Add => {
                let scaled = self.scale_index(span.clone(), lhs, elem)?;
                Ok(self.typed_node(span, NodeKind::Binary { op, lhs: scaled, rhs }, rty))
            }
            (Some(elem_l), Some(_elem_r)) if op == BinOp::Sub => {
                let raw = self.typed_node(span.clone(), NodeKind::Binary { op, lhs, rhs }, self.base.long);
                let size = self.types.size_of(elem_l).unwrap_or(1).max(1) as i64;
                let divisor = self.typed_node(span.clone(), NodeKind::IntLit(size), self.base.long);
                Ok(self.typed_node(span, NodeKind::Binary { op: BinOp::Div, lhs: raw, rhs: divisor }, self.base.long))
            }
            _ => {
                let ty = self.common_arith_ty(lty, rty);
                Ok(self.typed_node(span, NodeKind::Binary { op, lhs, rhs }, ty))
            }
        }
    }

    fn pointee(&self, ty: TypeId) -> Option<TypeId> {
        match self.types.get(ty).kind {
            TypeKind::Ptr { base } | TypeKind::Array { base, .. } => Some(base),
            _ => None,
        }
    }

    fn scale_index(&mut self, span: Span, index: NodeId, elem: TypeId) -> CompileResult<NodeId> {
        let size = self.types.size_of(elem).unwrap_or(1).max(1) as i64;
        if size == 1 {
            return Ok(index);
        }
        let factor = self.typed_node(span.clone(), NodeKind::IntLit(size), self.base.long);
        Ok(self.typed_node(span, NodeKind::Binary { op: BinOp::Mul, lhs: index, rhs: factor }, self.base.long))
    }

    fn parse_multiplicative(&mut self) -> CompileResult<NodeId> {
        self.binary_level(
            &[("*", BinOp::Mul), ("/", BinOp::Div), ("%", BinOp::Mod)],
            Self::parse_cast,
        )
    }

    fn parse_cast(&mut self) -> CompileResult<NodeId> {
        if self.at_punct("(") && self.starts_type_name(1) {
            let span = self.span();
            self.bump();
            let ty = self.parse_type_name()?;
            self.expect_punct(")")?;
            // Compound literal: `(T){ ... }`. Lowered the same way a local
            // declaration's initializer is: an anonymous local holds the
            // storage, a `MemZero` + assignment sequence fills it, and the
            // literal's value is that local read back.
            if self.at_punct("{") {
                let tree = self.parse_initializer_tree(ty)?;
                let local = self.add_anon_local(ty);
                let mut stmts = self.build_init_stmts(local, ty, &tree, span.clone())?;
                let value = self.typed_node(span.clone(), NodeKind::VarRef(local), ty);
                stmts.push(self.wrap_expr_stmt(value));
                let init = self.typed_node(span.clone(), NodeKind::StmtExpr(stmts), ty);
                return Ok(self.typed_node(span, NodeKind::CompoundLiteral { ty, init }, ty));
            }
            let operand = self.parse_cast()?;
            return Ok(self.typed_node(span, NodeKind::Cast { operand }, ty));
        }
        self.parse_unary()
    }

    fn parse_unary(&mut self) -> CompileResult<NodeId> {
        let span = self.span();
        if self.eat_punct("&") {
            if self.at_punct("&") {
                // `&&label`
                self.bump();
                let label = self.expect_ident()?;
                let void_ptr = self.types.pointer_to(self.base.void);
                return Ok(self.typed_node(span, NodeKind::LabelAddr(label), void_ptr));
            }
            let operand = self.parse_cast()?;
            let ty = self.node_ty(operand);
            let ptr = self.types.pointer_to(ty);
            return Ok(self.typed_node(span, NodeKind::Unary { op: UnOp::Addr, operand }, ptr));
        }
        if self.eat_punct("*") {
            let operand = self.parse_cast()?;
            let ty = self.pointee(self.node_ty(operand)).unwrap_or(self.base.int);
            return Ok(self.typed_node(span, NodeKind::Unary { op: UnOp::Deref, operand }, ty));
        }
        for (text, op) in [("-", UnOp::Neg), ("!", UnOp::Not), ("~", UnOp::BitNot)] {
            if self.eat_punct(text) {
                let operand = self.parse_cast()?;
                let ty = if op == UnOp::Not { self.base.int } else { self.node_ty(operand) };
                return Ok(self.typed_node(span, NodeKind::Unary { op, operand }, ty));
            }
        }
        if self.eat_punct("+") {
            return self.parse_cast();
        }
        for (text, op) in [("++", UnOp::PreInc), ("--", UnOp::PreDec)] {
            if self.eat_punct(text) {
                let operand = self.parse_unary()?;
                let ty = self.node_ty(operand);
                return Ok(self.typed_node(span, NodeKind::Unary { op, operand }, ty));
            }
        }
        if self.at_keyword("sizeof") {
            self.bump();
            if self.at_punct("(") && self.starts_type_name(1) {
                self.bump();
                let ty = self.parse_type_name()?;
                self.expect_punct(")")?;
                return Ok(self.typed_node(span, NodeKind::SizeofType(ty), self.base.long));
            }
            let operand = self.parse_unary()?;
            return Ok(self.typed_node(span, NodeKind::Sizeof(operand), self.base.long));
        }
        if self.eat_keyword("_Alignof") || self.eat_keyword("__alignof__") {
            self.expect_punct("(")?;
            let ty = self.parse_type_name()?;
            self.expect_punct(")")?;
            return Ok(self.typed_node(span, NodeKind::Alignof(ty), self.base.long));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> CompileResult<NodeId> {
        let mut node = self.parse_primary()?;
        loop {
            let span = self.span();
            if self.eat_punct("[") {
                let index = self.parse_expr()?;
                self.expect_punct("]")?;
                node = self.build_additive(span.clone(), BinOp::Add, node, index)?;
                let ty = self.pointee(self.node_ty(node)).unwrap_or(self.base.int);
                let deref_span = span;
                node = self.typed_node(deref_span, NodeKind::Unary { op: UnOp::Deref, operand: node }, ty);
            } else if self.eat_punct("(") {
                let mut args = SmallVec::new();
                if !self.at_punct(")") {
                    loop {
                        args.push(self.parse_assign()?);
                        if !self.eat_punct(",") {
                            break;
                        }
                    }
                }
                self.expect_punct(")")?;
                if let NodeKind::FuncAddr(callee_id) = self.ast.node(node).kind {
                    self.record_call_ref(callee_id);
                }
                let callee_ty = self.node_ty(node);
                let func_ty = match self.types.get(callee_ty).kind {
                    TypeKind::Func { .. } => callee_ty,
                    TypeKind::Ptr { base } => base,
                    _ => callee_ty,
                };
                let ret_ty = match self.types.get(func_ty).kind {
                    TypeKind::Func { ret, .. } => ret,
                    _ => self.base.int,
                };
                let by_stack = self.types.get(ret_ty).is_aggregate();
                node = self.typed_node(
                    span,
                    NodeKind::Call { callee: node, callee_ty: func_ty, args, ret_buf: None, by_stack },
                    ret_ty,
                );
            } else if self.eat_punct(".") {
                let field = self.expect_ident()?;
                let ty = self.member_ty(self.node_ty(node), field);
                node = self.typed_node(span, NodeKind::Member { base: node, field, via_pointer: false }, ty);
            } else if self.eat_punct("->") {
                let field = self.expect_ident()?;
                let base_ty = self.pointee(self.node_ty(node)).unwrap_or(self.node_ty(node));
                let ty = self.member_ty(base_ty, field);
                node = self.typed_node(span, NodeKind::Member { base: node, field, via_pointer: true }, ty);
            } else if self.at_punct("++") || self.at_punct("--") {
                let op = if self.at_punct("++") { UnOp::PostInc } else { UnOp::PostDec };
                self.bump();
                let ty = self.node_ty(node);
                node = self.typed_node(span, NodeKind::Unary { op, operand: node }, ty);
            } else {
                return Ok(node);
            }
        }
    }

    fn member_ty(&self, struct_ty: TypeId, field: Symbol) -> TypeId {
        match &self.types.get(struct_ty).kind {
            TypeKind::Struct { members, .. } | TypeKind::Union { members, .. } => {
                members.iter().find(|m| m.name == field).map(|m| m.ty).unwrap_or(self.base.error)
            }
            _ => self.base.error,
        }
    }

    fn parse_primary(&mut self) -> CompileResult<NodeId> {
        let span = self.span();
        let tok = self.cur();

        if tok.is_punct("(") {
            self.bump();
            // GNU statement expression: `({ stmt; stmt; expr; })`.
            if self.at_punct("{") {
                let stmts = self.parse_stmt_expr_body()?;
                self.expect_punct(")")?;
                let ty = stmts.last().and_then(|&id| self.ast.node(id).ty).unwrap_or(self.base.void);
                return Ok(self.typed_node(span, NodeKind::StmtExpr(stmts), ty));
            }
            let inner = self.parse_expr()?;
            self.expect_punct(")")?;
            return Ok(inner);
        }

        if tok.kind == crate::token::TokenKind::Num {
            self.bump();
            if tok.is_float {
                return Ok(self.typed_node(span, NodeKind::FloatLit(tok.float_val), self.base.double));
            }
            let ty = match (tok.is_long, tok.is_unsigned) {
                (true, true) => self.base.ulong,
                (true, false) => self.base.long,
                (false, true) => self.base.uint,
                (false, false) => self.base.int,
            };
            return Ok(self.typed_node(span, NodeKind::IntLit(tok.int_val), ty));
        }

        if tok.kind == crate::token::TokenKind::Str {
            self.bump();
            let sym = self.interner.intern(&tok.string_val);
            self.intern_string_literal(sym);
            let char_ptr = self.types.pointer_to(self.base.char_);
            return Ok(self.typed_node(span, NodeKind::StringLit(sym), char_ptr));
        }

        if self.at_keyword("_Generic") {
            return self.parse_generic();
        }

        if tok.is_ident() {
            match &*tok.text {
                "va_start" | "__builtin_va_start" => return self.parse_va_start(span),
                "va_arg" | "__builtin_va_arg" => return self.parse_va_arg(span),
                "va_end" | "__builtin_va_end" => return self.parse_va_end(span),
                "__atomic_compare_exchange_n" | "__sync_val_compare_and_swap" => return self.parse_cas_builtin(span),
                "__atomic_exchange_n" | "__sync_lock_test_and_set" => return self.parse_atomic_exchange_builtin(span),
                _ => {}
            }
            let name = self.intern_cur_text();
            self.bump();
            return self.resolve_ident_ref(span, name);
        }

        self.error(format!("unexpected token '{}'", tok.text))
    }

    fn parse_va_start(&mut self, span: Span) -> CompileResult<NodeId> {
        self.bump();
        self.expect_punct("(")?;
        let ap = self.parse_assign()?;
        self.expect_punct(",")?;
        let name = self.expect_ident()?;
        let last_named = match self.find_ident(name) {
            Some(VarScope::Variable(id)) => id,
            _ => return self.error("va_start's second argument must name a parameter"),
        };
        self.expect_punct(")")?;
        Ok(self.typed_node(span, NodeKind::VaStart { ap, last_named }, self.base.void))
    }

    fn parse_va_arg(&mut self, span: Span) -> CompileResult<NodeId> {
        self.bump();
        self.expect_punct("(")?;
        let ap = self.parse_assign()?;
        self.expect_punct(",")?;
        let ty = self.parse_type_name()?;
        self.expect_punct(")")?;
        Ok(self.typed_node(span, NodeKind::VaArg { ap, ty }, ty))
    }

    fn parse_va_end(&mut self, span: Span) -> CompileResult<NodeId> {
        self.bump();
        self.expect_punct("(")?;
        let ap = self.parse_assign()?;
        self.expect_punct(")")?;
        Ok(self.typed_node(span, NodeKind::VaEnd { ap }, self.base.void))
    }

    /// `__atomic_compare_exchange_n(ptr, &expected, desired, ...)` and the
    /// older `__sync_val_compare_and_swap(ptr, expected, desired)` both
    /// lower to the same [`NodeKind::Cas`]; the trailing memory-order
    /// arguments `__atomic_compare_exchange_n` takes are parsed and
    /// discarded since the VM executes every CAS under a single global
    /// lock regardless (see DESIGN.md).
    fn parse_cas_builtin(&mut self, span: Span) -> CompileResult<NodeId> {
        self.bump();
        self.expect_punct("(")?;
        let ptr = self.parse_assign()?;
        self.expect_punct(",")?;
        let expected = self.parse_assign()?;
        self.expect_punct(",")?;
        let desired = self.parse_assign()?;
        while self.eat_punct(",") {
            self.parse_assign()?;
        }
        self.expect_punct(")")?;
        let ty = self.pointee(self.node_ty(ptr)).unwrap_or(self.base.int);
        Ok(self.typed_node(span, NodeKind::Cas { ptr, expected, desired }, ty))
    }

    fn parse_atomic_exchange_builtin(&mut self, span: Span) -> CompileResult<NodeId> {
        self.bump();
        self.expect_punct("(")?;
        let ptr = self.parse_assign()?;
        self.expect_punct(",")?;
        let value = self.parse_assign()?;
        while self.eat_punct(",") {
            self.parse_assign()?;
        }
        self.expect_punct(")")?;
        let ty = self.pointee(self.node_ty(ptr)).unwrap_or(self.base.int);
        Ok(self.typed_node(span, NodeKind::AtomicExchange { ptr, value }, ty))
    }

    fn resolve_ident_ref(&mut self, span: Span, name: Symbol) -> CompileResult<NodeId> {
        match self.find_ident(name) {
            Some(VarScope::Variable(obj_id)) => {
                let ty = self.ast.obj(obj_id).ty;
                if matches!(self.ast.obj(obj_id).kind, ObjKind::Function { .. }) {
                    let ptr = self.types.pointer_to(ty);
                    Ok(self.typed_node(span, NodeKind::FuncAddr(obj_id), ptr))
                } else {
                    Ok(self.typed_node(span, NodeKind::VarRef(obj_id), ty))
                }
            }
            Some(VarScope::EnumConstant { ty, value }) => Ok(self.typed_node(span, NodeKind::IntLit(value), ty)),
            Some(VarScope::Typedef(_)) => self.error("unexpected type name in expression"),
            None => self.error(format!("use of undeclared identifier '{}'", self.interner.resolve(name))),
        }
    }

    /// `_Generic(expr, T1: e1, T2: e2, default: ed)`: selects the
    /// association whose type is compatible with the controlling
    /// expression's type, falling back to `default`.
    fn parse_generic(&mut self) -> CompileResult<NodeId> {
        let span = self.span();
        self.bump();
        self.expect_punct("(")?;
        let selector = self.parse_assign()?;
        let mut assocs = Vec::new();
        let mut default = None;
        while self.eat_punct(",") {
            if self.eat_keyword("default") {
                self.expect_punct(":")?;
                default = Some(self.parse_assign()?);
            } else {
                let ty = self.parse_type_name()?;
                self.expect_punct(":")?;
                let expr = self.parse_assign()?;
                assocs.push((Some(ty), expr));
            }
        }
        self.expect_punct(")")?;
        let selector_ty = self.node_ty(selector);
        let chosen = assocs
            .iter()
            .find(|(ty, _)| ty.map(|t| self.types.compatible(t, selector_ty)).unwrap_or(false))
            .map(|(_, e)| *e)
            .or(default)
            .unwrap_or(selector);
        let result_ty = self.node_ty(chosen);
        Ok(self.typed_node(span, NodeKind::Generic { selector, assocs }, result_ty))
    }

    pub(crate) fn parse_stmt_expr_body(&mut self) -> CompileResult<Vec<NodeId>> {
        self.expect_punct("{")?;
        self.scopes.push();
        let mut stmts = Vec::new();
        while !self.at_punct("}") && !self.cur().is_eof() {
            stmts.push(self.parse_block_item()?);
        }
        self.expect_punct("}")?;
        self.scopes.pop();
        Ok(stmts)
    }
}

#[cfg(test)]
mod tests {
    use crate::token::{ident, keyword, num, num_suffixed, punct, VecTokenStream};
    use crate::ParserConfig;
    use cvm_ast::node::NodeKind;
    use cvm_types::TypeKind;

    fn parse(tokens: Vec<crate::token::Token>) -> crate::ParseOutput {
        crate::parse(&mut VecTokenStream::new(tokens), ParserConfig::default()).unwrap()
    }

    fn wrap_in_main(mut body: Vec<crate::token::Token>) -> Vec<crate::token::Token> {
        let mut tokens = vec![
            keyword("int"),
            ident("main"),
            punct("("),
            keyword("void"),
            punct(")"),
            punct("{"),
        ];
        tokens.append(&mut body);
        tokens.push(punct("}"));
        tokens
    }

    fn main_body_stmts(out: &crate::ParseOutput) -> Vec<cvm_ast::NodeId> {
        let main = out.ast.obj(out.globals[0]);
        let body = match &main.kind {
            cvm_ast::obj::ObjKind::Function { body: Some(b), .. } => *b,
            other => panic!("expected a function body, got {other:?}"),
        };
        match &out.ast.node(body).kind {
            NodeKind::Block(items) => items.clone(),
            other => panic!("expected a block, got {other:?}"),
        }
    }

    #[test]
    fn int_literal_suffixes_pick_the_right_singleton() {
        // `int main(void) { 1; 1u; 1l; 1ul; return 0; }`
        let out = parse(wrap_in_main(vec![
            num(1),
            punct(";"),
            num_suffixed(1, false, true),
            punct(";"),
            num_suffixed(1, true, false),
            punct(";"),
            num_suffixed(1, true, true),
            punct(";"),
            keyword("return"),
            num(0),
            punct(";"),
        ]));
        let stmts = main_body_stmts(&out);
        let lit_ty = |stmt_id: cvm_ast::NodeId| {
            let expr = match &out.ast.node(stmt_id).kind {
                NodeKind::ExprStmt(e) => *e,
                other => panic!("expected an expr statement, got {other:?}"),
            };
            out.ast.node(expr).ty.expect("literal should be typed")
        };
        let int_ty = lit_ty(stmts[0]);
        let uint_ty = lit_ty(stmts[1]);
        let long_ty = lit_ty(stmts[2]);
        let ulong_ty = lit_ty(stmts[3]);
        assert!(matches!(out.types.get(int_ty).kind, TypeKind::Int) && !out.types.get(int_ty).is_unsigned);
        assert!(matches!(out.types.get(uint_ty).kind, TypeKind::Int) && out.types.get(uint_ty).is_unsigned);
        assert!(matches!(out.types.get(long_ty).kind, TypeKind::Long) && !out.types.get(long_ty).is_unsigned);
        assert!(matches!(out.types.get(ulong_ty).kind, TypeKind::Long) && out.types.get(ulong_ty).is_unsigned);
    }

    #[test]
    fn compound_literal_lowers_to_an_anonymous_local_stmt_expr() {
        // `int main(void) { (int){5}; return 0; }`
        let out = parse(wrap_in_main(vec![
            punct("("),
            keyword("int"),
            punct(")"),
            punct("{"),
            num(5),
            punct("}"),
            punct(";"),
            keyword("return"),
            num(0),
            punct(";"),
        ]));
        let stmts = main_body_stmts(&out);
        let expr = match &out.ast.node(stmts[0]).kind {
            NodeKind::ExprStmt(e) => *e,
            other => panic!("expected an expr statement, got {other:?}"),
        };
        let init = match &out.ast.node(expr).kind {
            NodeKind::CompoundLiteral { init, .. } => *init,
            other => panic!("expected a compound literal, got {other:?}"),
        };
        match &out.ast.node(init).kind {
            NodeKind::StmtExpr(inner) => {
                // zero + assign + value-producing tail read.
                assert_eq!(inner.len(), 3);
                assert!(matches!(out.ast.node(inner[0]).kind, NodeKind::MemZero(_)));
            }
            other => panic!("expected a stmt-expr, got {other:?}"),
        }
    }
}
