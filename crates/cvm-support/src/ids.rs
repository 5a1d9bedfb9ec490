//! Entity indices shared across the frontend crates.
//!
//! These live here, rather than in `cvm-types` or `cvm-ast`, so that a
//! `Type` can reference a `NodeId` (a VLA's length expression) and a `Node`
//! can reference a `TypeId` (its resolved type) without `cvm-types` and
//! `cvm-ast` depending on each other.

crate::entity_id! {
    /// Indexes into a `TypeStore`'s arena.
    pub struct TypeId;
}

crate::entity_id! {
    /// Indexes into an AST arena.
    pub struct NodeId;
}

crate::entity_id! {
    /// Indexes into a function/global table. Also used as the frame-local
    /// table within a function body.
    pub struct ObjId;
}

crate::entity_id! {
    /// Indexes into the lexical scope stack.
    pub struct ScopeId;
}
