use cvm_support::intern::Symbol;
use cvm_types::TypeId;

use crate::{NodeId, ObjId};

/// A designator re-addresses a nested position inside an initializer tree:
/// `.field = x` or `[3] = x` (and GNU range designators `[3 ... 5] = x`,
/// represented as `Index { lo, hi }`).
#[derive(Clone, Debug)]
pub enum Designator {
    Field(Symbol),
    Index { lo: i64, hi: i64 },
}

#[derive(Clone, Debug)]
pub enum Initializer {
    Scalar(NodeId),
    /// An aggregate initializer: ordered `(designator path, initializer)`
    /// pairs. An empty designator path means "next position in order".
    Aggregate(Vec<(Vec<Designator>, Initializer)>),
}

/// A global's initializer, lowered to a flat byte buffer plus relocations
/// once codegen assigns addresses (spec.md §4.2). Locals are instead
/// lowered into a `MemZero` + assignment comma sequence and never populate
/// this.
#[derive(Clone, Debug, Default)]
pub struct GlobalInit {
    pub bytes: Vec<u8>,
    pub relocations: Vec<GlobalReloc>,
}

#[derive(Clone, Debug)]
pub struct GlobalReloc {
    pub offset: u64,
    pub target: RelocTarget,
    pub addend: i64,
}

#[derive(Clone, Copy, Debug)]
pub enum RelocTarget {
    Obj(ObjId),
    /// A string-pool entry, referenced by its data-segment offset once
    /// codegen has placed the pool.
    StringPoolOffset(u64),
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ObjFlags {
    pub is_static: bool,
    pub is_definition: bool,
    pub is_tentative: bool,
    pub is_inline: bool,
    pub is_constexpr: bool,
    pub is_root: bool,
    pub is_live: bool,
}

#[derive(Clone, Debug)]
pub enum ObjKind {
    /// A local variable or parameter; `frame_offset` is the signed
    /// bp-relative byte offset codegen assigns during frame layout.
    Local { frame_offset: i64 },
    Global { init: Option<GlobalInit> },
    Function {
        params: Vec<ObjId>,
        body: Option<NodeId>,
        locals: Vec<ObjId>,
        is_variadic: bool,
        /// Filled in once codegen has assigned this function a text-segment
        /// address; `None` before codegen or for declarations never defined.
        entry: Option<u64>,
        /// Callee names this function's body references, used for the
        /// static-inline liveness mark-and-sweep (spec.md §3.2). Resolved
        /// to `ObjId`s once the whole translation unit has been parsed,
        /// rather than kept as the source's string-array `refs`.
        refs: Vec<ObjId>,
    },
}

#[derive(Clone, Debug)]
pub struct Obj {
    pub name: Symbol,
    pub ty: TypeId,
    pub flags: ObjFlags,
    pub kind: ObjKind,
}

impl Obj {
    pub fn is_function(&self) -> bool {
        matches!(self.kind, ObjKind::Function { .. })
    }
}
