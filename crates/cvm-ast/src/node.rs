use cvm_diagnostics::Span;
use cvm_support::intern::Symbol;
use cvm_types::TypeId;
use smallvec::SmallVec;

use crate::NodeId;
use crate::ObjId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    LogAnd,
    LogOr,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
    BitNot,
    Deref,
    Addr,
    PreInc,
    PreDec,
    PostInc,
    PostDec,
}

/// One AST node. Every variant carries the source [`Span`] it was parsed
/// from (diagnostics never need to re-derive it) and a resolved `ty`
/// filled in during parsing; `ty` starts `None` and is written back through
/// `Ast::node_mut` once the node's type is known.
#[derive(Clone, Debug)]
pub struct Node {
    pub span: Span,
    pub ty: Option<TypeId>,
    pub kind: NodeKind,
}

impl Node {
    pub fn new(span: Span, kind: NodeKind) -> Self {
        Node { span, ty: None, kind }
    }
}

#[derive(Clone, Debug)]
pub enum NodeKind {
    // Literals
    IntLit(i64),
    FloatLit(f64),
    StringLit(Symbol),

    // References
    VarRef(ObjId),
    /// `&&label` — labels-as-values.
    LabelAddr(Symbol),
    /// Implicit or explicit function-address decay, e.g. `&foo` or `foo`
    /// used in non-call position.
    FuncAddr(ObjId),

    // Operators
    Binary { op: BinOp, lhs: NodeId, rhs: NodeId },
    Unary { op: UnOp, operand: NodeId },
    Assign { lhs: NodeId, rhs: NodeId },
    CompoundAssign { op: BinOp, lhs: NodeId, rhs: NodeId },
    Comma { lhs: NodeId, rhs: NodeId },
    Conditional { cond: NodeId, then: NodeId, els: NodeId },
    Cast { operand: NodeId },
    Sizeof(NodeId),
    SizeofType(TypeId),
    Alignof(TypeId),
    /// `_Generic(expr, T1: e1, T2: e2, ..., default: ed)`.
    Generic { selector: NodeId, assocs: Vec<(Option<TypeId>, NodeId)> },
    Member { base: NodeId, field: Symbol, via_pointer: bool },
    Index { base: NodeId, index: NodeId },
    CompoundLiteral { ty: TypeId, init: NodeId },

    // Calls
    Call {
        callee: NodeId,
        callee_ty: TypeId,
        args: SmallVec<[NodeId; 8]>,
        /// Local the callee's struct return value is written into, for
        /// calls returning a struct/union by value (spec.md §4.3's
        /// rotating return-buffer pool).
        ret_buf: Option<ObjId>,
        /// True when the call's return value does not fit in a register
        /// bank and must be materialized through `ret_buf` on the stack.
        by_stack: bool,
    },

    // Atomics (parsed and lowered; executed non-atomically, see DESIGN.md)
    Cas { ptr: NodeId, expected: NodeId, desired: NodeId },
    AtomicExchange { ptr: NodeId, value: NodeId },

    // Variadics
    VaStart { ap: NodeId, last_named: ObjId },
    VaArg { ap: NodeId, ty: TypeId },
    VaEnd { ap: NodeId },

    // Statements
    Block(Vec<NodeId>),
    ExprStmt(NodeId),
    /// GNU `({ ...; expr })` — the block's value is the last expression.
    StmtExpr(Vec<NodeId>),
    If { cond: NodeId, then: NodeId, els: Option<NodeId> },
    For { init: Option<NodeId>, cond: Option<NodeId>, step: Option<NodeId>, body: NodeId },
    DoWhile { body: NodeId, cond: NodeId },
    Switch { cond: NodeId, body: NodeId },
    /// `case A ... B:` — a closed inclusive range; plain `case A:` is
    /// represented with `lo == hi`.
    Case { lo: i64, hi: i64, body: NodeId },
    Default(NodeId),
    Label { name: Symbol, body: NodeId },
    Goto(Symbol),
    /// `goto *expr` — computed goto.
    GotoIndirect(NodeId),
    Break,
    Continue,
    Return(Option<NodeId>),
    /// Zero-fills a local before its designated-initializer assignments
    /// run; emitted by the parser when lowering local initializers into a
    /// comma sequence (spec.md §4.2).
    MemZero(ObjId),
}
