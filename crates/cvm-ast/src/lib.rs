//! The arena-owned AST/symbol model: [`Node`], [`Obj`], [`Initializer`],
//! and lexical [`scope::ScopeStack`].

pub mod node;
pub mod obj;
pub mod scope;

pub use cvm_support::ids::{NodeId, ObjId, TypeId};
pub use node::Node;
pub use obj::Obj;

use cvm_support::arena::Arena;

/// Owns every [`Node`] and [`Obj`] created while parsing one translation
/// unit. Dropped in one shot after codegen, per spec.md §9's arena
/// strategy for cyclic AST/Type graphs.
#[derive(Default)]
pub struct Ast {
    pub nodes: Arena<NodeId, Node>,
    pub objs: Arena<ObjId, Obj>,
}

impl Ast {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        self.nodes.get_mut(id)
    }

    pub fn push_node(&mut self, node: Node) -> NodeId {
        self.nodes.alloc(node)
    }

    pub fn obj(&self, id: ObjId) -> &Obj {
        self.objs.get(id)
    }

    pub fn obj_mut(&mut self, id: ObjId) -> &mut Obj {
        self.objs.get_mut(id)
    }

    pub fn push_obj(&mut self, obj: Obj) -> ObjId {
        self.objs.alloc(obj)
    }
}
