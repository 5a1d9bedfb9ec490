use std::collections::HashMap;

use cvm_ast::scope::{TagEntry, VarScope};
use cvm_ast::{Ast, NodeId, ObjId};
use cvm_diagnostics::{CompileResult, Diagnostic, DiagnosticSink, Span};
use cvm_support::intern::{Interner, Symbol};
use cvm_types::{Type, TypeId, TypeKind, TypeStore};

use crate::config::ParserConfig;
use crate::token::{Token, TokenStream};

/// Commonly-referenced built-in `TypeId`s, resolved once so declaration
/// parsing doesn't re-allocate `int`/`char`/etc on every use.
pub struct BaseTypes {
    pub void: TypeId,
    pub bool_: TypeId,
    pub char_: TypeId,
    pub short: TypeId,
    pub ushort: TypeId,
    pub int: TypeId,
    pub uint: TypeId,
    pub long: TypeId,
    pub ulong: TypeId,
    pub float: TypeId,
    pub double: TypeId,
    pub long_double: TypeId,
    pub error: TypeId,
}

impl BaseTypes {
    fn install(types: &mut TypeStore) -> Self {
        let scalar = |types: &mut TypeStore, kind: TypeKind, size: u64, align: u64, is_unsigned: bool| {
            types.alloc(Type { kind, size, align, is_unsigned, is_const: false, is_atomic: false })
        };
        BaseTypes {
            void: scalar(types, TypeKind::Void, 0, 1, false),
            bool_: scalar(types, TypeKind::Bool, 1, 1, true),
            char_: scalar(types, TypeKind::Char, 1, 1, false),
            short: scalar(types, TypeKind::Short, 2, 2, false),
            ushort: scalar(types, TypeKind::Short, 2, 2, true),
            int: scalar(types, TypeKind::Int, 4, 4, false),
            uint: scalar(types, TypeKind::Int, 4, 4, true),
            long: scalar(types, TypeKind::Long, 8, 8, false),
            ulong: scalar(types, TypeKind::Long, 8, 8, true),
            float: scalar(types, TypeKind::Float, 4, 4, false),
            double: scalar(types, TypeKind::Double, 8, 8, false),
            long_double: scalar(types, TypeKind::LongDouble, 16, 16, false),
            error: scalar(types, TypeKind::Error, 0, 1, false),
        }
    }
}

/// A `goto` seen before its label was parsed; patched once the enclosing
/// function body is fully parsed (spec.md §4.2's post-hoc forward-goto
/// resolution).
pub(crate) struct PendingGoto {
    pub label: Symbol,
    pub node: NodeId,
}

pub struct Parser<'s> {
    pub(crate) tokens: &'s mut dyn TokenStream,
    pub(crate) interner: Interner,
    pub(crate) types: TypeStore,
    pub(crate) ast: Ast,
    pub(crate) scopes: cvm_ast::scope::ScopeStack,
    pub(crate) sink: DiagnosticSink,
    pub(crate) config: ParserConfig,
    pub(crate) base: BaseTypes,
    pub(crate) top_level: Vec<ObjId>,
    /// Labels declared so far in the current function body.
    pub(crate) labels: HashMap<Symbol, NodeId>,
    pub(crate) pending_gotos: Vec<PendingGoto>,
    /// String-pool `Symbol`s seen, in first-use order, handed to codegen so
    /// string literals get a stable data-segment slot.
    pub(crate) string_pool: Vec<Symbol>,
    /// The function currently being parsed, so nested declarations and
    /// compound literals know where to register new locals.
    pub(crate) current_function: Option<ObjId>,
    pub(crate) current_locals: Vec<ObjId>,
    /// Callees referenced from the current function body, resolved once
    /// the whole body is parsed and merged into `ObjKind::Function::refs`.
    pub(crate) current_refs: Vec<ObjId>,
    /// Parameter names from the most recently parsed parameter list.
    /// `TypeKind::Func` only records parameter *types*, so the declarator
    /// that owns a function's defining parameter list stashes the names
    /// here for `parse_function_def` to pick up right afterward.
    pub(crate) pending_param_names: Vec<Option<Symbol>>,
}

pub struct ParseOutput {
    pub ast: Ast,
    pub types: TypeStore,
    pub interner: Interner,
    pub globals: Vec<ObjId>,
    pub string_pool: Vec<Symbol>,
    pub diagnostics: Vec<Diagnostic>,
}

#[tracing::instrument(name = "cvm_parser::parse", skip_all, fields(recover = config.recover))]
pub fn parse(tokens: &mut dyn TokenStream, config: ParserConfig) -> CompileResult<ParseOutput> {
    let mut types = TypeStore::new();
    let base = BaseTypes::install(&mut types);
    let mut parser = Parser {
        tokens,
        interner: Interner::new(),
        types,
        ast: Ast::new(),
        scopes: cvm_ast::scope::ScopeStack::new(),
        sink: if config.recover { DiagnosticSink::recovering() } else { DiagnosticSink::Abort },
        config,
        base,
        top_level: Vec::new(),
        labels: HashMap::new(),
        pending_gotos: Vec::new(),
        string_pool: Vec::new(),
        current_function: None,
        current_locals: Vec::new(),
        current_refs: Vec::new(),
        pending_param_names: Vec::new(),
    };
    parser.parse_translation_unit()?;
    parser.eliminate_dead_static_inlines();
    let diagnostics = parser.sink.diagnostics().to_vec();
    tracing::debug!(globals = parser.top_level.len(), diagnostics = diagnostics.len(), "parse complete");
    Ok(ParseOutput {
        ast: parser.ast,
        types: parser.types,
        interner: parser.interner,
        globals: parser.top_level,
        string_pool: parser.string_pool,
        diagnostics,
    })
}

impl<'s> Parser<'s> {
    pub(crate) fn cur(&self) -> Token {
        self.tokens.peek(0).clone()
    }

    pub(crate) fn peek_at(&self, n: usize) -> Token {
        self.tokens.peek(n).clone()
    }

    pub(crate) fn bump(&mut self) -> Token {
        self.tokens.bump()
    }

    pub(crate) fn span(&self) -> Span {
        self.tokens.peek(0).span.clone()
    }

    pub(crate) fn at_punct(&self, text: &str) -> bool {
        self.tokens.peek(0).is_punct(text)
    }

    /// C23 attribute brackets (`[[...]]`) arrive from the tokenizer as two
    /// separate single-`[`/`]` punctuation tokens, not a combined token;
    /// this checks for two adjacent matching brackets with no space
    /// between them.
    pub(crate) fn at_double_bracket(&self, bracket: &str) -> bool {
        self.tokens.peek(0).is_punct(bracket) && self.tokens.peek(1).is_punct(bracket) && !self.tokens.peek(1).has_space
    }

    pub(crate) fn at_keyword(&self, text: &str) -> bool {
        self.tokens.peek(0).is_keyword(text)
    }

    pub(crate) fn eat_punct(&mut self, text: &str) -> bool {
        if self.at_punct(text) {
            self.bump();
            true
        } else {
            false
        }
    }

    pub(crate) fn eat_keyword(&mut self, text: &str) -> bool {
        if self.at_keyword(text) {
            self.bump();
            true
        } else {
            false
        }
    }

    pub(crate) fn expect_punct(&mut self, text: &str) -> CompileResult<()> {
        if self.eat_punct(text) {
            Ok(())
        } else {
            self.error(format!("expected '{}'", text))
        }
    }

    pub(crate) fn expect_ident(&mut self) -> CompileResult<Symbol> {
        let tok = self.cur();
        if tok.is_ident() {
            self.bump();
            Ok(self.interner.intern(&tok.text))
        } else {
            self.error("expected an identifier")
        }
    }

    pub(crate) fn intern_cur_text(&mut self) -> Symbol {
        let text = self.cur().text.clone();
        self.interner.intern(&text)
    }

    /// Reports through the diagnostic sink. In `Abort` mode this always
    /// returns `Err`; in recovery mode it records the diagnostic and
    /// returns the `error` sentinel wrapped in `Err` anyway, since most
    /// callers need a concrete `T` they cannot otherwise manufacture — the
    /// statement/declaration level is where recovery actually resumes
    /// parsing (see `recover_to_stmt_boundary`).
    pub(crate) fn error<T>(&mut self, message: impl Into<String>) -> CompileResult<T> {
        let diag = Diagnostic::new(self.span(), message);
        tracing::debug!(%diag, "parse error");
        self.sink.report(diag.clone())?;
        Err(diag)
    }

    pub(crate) fn node(&mut self, span: Span, kind: cvm_ast::node::NodeKind) -> NodeId {
        self.ast.push_node(cvm_ast::Node::new(span, kind))
    }

    /// Resumes at the next `;`, `}`, or EOF after a recoverable parse
    /// error (spec.md §4.2).
    pub(crate) fn recover_to_stmt_boundary(&mut self) {
        loop {
            let tok = self.cur();
            if tok.is_eof() || tok.is_punct(";") || tok.is_punct("}") {
                if tok.is_punct(";") {
                    self.bump();
                }
                return;
            }
            self.bump();
        }
    }

    pub(crate) fn declare_ident(&mut self, name: Symbol, entry: VarScope) {
        self.scopes.declare_ident(name, entry);
    }

    pub(crate) fn declare_tag(&mut self, name: Symbol, entry: TagEntry) {
        self.scopes.declare_tag(name, entry);
    }

    pub(crate) fn find_ident(&self, name: Symbol) -> Option<VarScope> {
        self.scopes.find_ident(name)
    }

    pub(crate) fn intern_string_literal(&mut self, sym: Symbol) {
        if !self.string_pool.contains(&sym) {
            self.string_pool.push(sym);
        }
    }

    /// Mark-and-sweep over `static inline` functions (spec.md §3.2): a
    /// `static inline` definition with no reachable reference from a root
    /// (a non-static function, or a root transitively referenced) is never
    /// emitted. `main` and every non-static function are roots.
    fn eliminate_dead_static_inlines(&mut self) {
        let mut live: Vec<ObjId> = Vec::new();
        for &id in &self.top_level {
            let obj = self.ast.obj(id);
            if obj.is_function() && !obj.flags.is_static {
                live.push(id);
            }
        }
        let mut worklist = live.clone();
        let mut seen: std::collections::HashSet<ObjId> = live.iter().copied().collect();
        while let Some(id) = worklist.pop() {
            let refs = match &self.ast.obj(id).kind {
                cvm_ast::obj::ObjKind::Function { refs, .. } => refs.clone(),
                _ => continue,
            };
            for r in refs {
                if seen.insert(r) {
                    worklist.push(r);
                }
            }
        }
        for &id in &self.top_level {
            self.ast.obj_mut(id).flags.is_live = seen.contains(&id) || !self.ast.obj(id).is_function();
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::token::{ident, keyword, num, punct, VecTokenStream};
    use crate::ParserConfig;

    #[test]
    fn abort_mode_stops_at_the_first_diagnostic() {
        // a bad token where a declarator name is expected.
        let err = crate::parse(&mut VecTokenStream::new(vec![keyword("int"), punct("@"), punct(";")]), ParserConfig::default());
        assert!(err.is_err());
    }

    #[test]
    fn static_inline_reachable_through_a_call_chain_survives() {
        // `static inline int helper(void) { return 1; }`
        // `static inline int caller(void) { return helper(); }`
        // `int main(void) { return caller(); }`
        let out = crate::parse(
            &mut VecTokenStream::new(vec![
                keyword("static"),
                keyword("inline"),
                keyword("int"),
                ident("helper"),
                punct("("),
                keyword("void"),
                punct(")"),
                punct("{"),
                keyword("return"),
                num(1),
                punct(";"),
                punct("}"),
                keyword("static"),
                keyword("inline"),
                keyword("int"),
                ident("caller"),
                punct("("),
                keyword("void"),
                punct(")"),
                punct("{"),
                keyword("return"),
                ident("helper"),
                punct("("),
                punct(")"),
                punct(";"),
                punct("}"),
                keyword("int"),
                ident("main"),
                punct("("),
                keyword("void"),
                punct(")"),
                punct("{"),
                keyword("return"),
                ident("caller"),
                punct("("),
                punct(")"),
                punct(";"),
                punct("}"),
            ]),
            ParserConfig::default(),
        )
        .unwrap();
        let helper = out.ast.obj(out.globals[0]);
        let caller = out.ast.obj(out.globals[1]);
        let main = out.ast.obj(out.globals[2]);
        assert!(helper.flags.is_live);
        assert!(caller.flags.is_live);
        assert!(main.flags.is_live);
    }
}
