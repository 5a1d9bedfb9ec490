use std::collections::HashMap;

use cvm_support::intern::Symbol;
use cvm_types::TypeId;

use crate::ObjId;

/// What an identifier in the `idents` map resolves to (spec.md §3.4).
#[derive(Clone, Copy, Debug)]
pub enum VarScope {
    Variable(ObjId),
    Typedef(TypeId),
    EnumConstant { ty: TypeId, value: i64 },
}

#[derive(Clone, Copy, Debug)]
pub enum TagEntry {
    Struct(TypeId),
    Union(TypeId),
    Enum(TypeId),
}

#[derive(Default)]
pub struct Scope {
    idents: HashMap<Symbol, VarScope>,
    tags: HashMap<Symbol, TagEntry>,
}

/// A stack of lexical [`Scope`]s, pushed on block entry and popped on
/// block exit (spec.md §3.4/§4.2). `find` walks from the innermost scope
/// outward, matching C's shadowing rules.
#[derive(Default)]
pub struct ScopeStack {
    scopes: Vec<Scope>,
}

impl ScopeStack {
    pub fn new() -> Self {
        let mut stack = ScopeStack { scopes: Vec::new() };
        stack.push(); // file scope
        stack
    }

    pub fn push(&mut self) {
        self.scopes.push(Scope::default());
    }

    pub fn pop(&mut self) {
        debug_assert!(self.scopes.len() > 1, "cannot pop file scope");
        self.scopes.pop();
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    pub fn declare_ident(&mut self, name: Symbol, entry: VarScope) {
        self.scopes
            .last_mut()
            .expect("at least file scope")
            .idents
            .insert(name, entry);
    }

    pub fn declare_tag(&mut self, name: Symbol, entry: TagEntry) {
        self.scopes
            .last_mut()
            .expect("at least file scope")
            .tags
            .insert(name, entry);
    }

    pub fn find_ident(&self, name: Symbol) -> Option<VarScope> {
        self.scopes.iter().rev().find_map(|s| s.idents.get(&name).copied())
    }

    /// An identifier declared in the *current* scope only, used to reject
    /// redeclarations within one block.
    pub fn find_ident_in_current(&self, name: Symbol) -> Option<VarScope> {
        self.scopes.last().and_then(|s| s.idents.get(&name).copied())
    }

    pub fn find_tag(&self, name: Symbol) -> Option<TagEntry> {
        self.scopes.iter().rev().find_map(|s| s.tags.get(&name).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cvm_support::intern::Interner;
    use cvm_support::EntityRef;

    fn obj_id(n: usize) -> ObjId {
        ObjId::new(n)
    }

    #[test]
    fn inner_scope_shadows_outer() {
        let mut interner = Interner::new();
        let x = interner.intern("x");
        let mut scopes = ScopeStack::new();
        scopes.declare_ident(x, VarScope::Variable(obj_id(0)));
        scopes.push();
        scopes.declare_ident(x, VarScope::Variable(obj_id(1)));
        match scopes.find_ident(x) {
            Some(VarScope::Variable(id)) => assert_eq!(id, obj_id(1)),
            _ => panic!("expected inner binding"),
        }
        scopes.pop();
        match scopes.find_ident(x) {
            Some(VarScope::Variable(id)) => assert_eq!(id, obj_id(0)),
            _ => panic!("expected outer binding after pop"),
        }
    }
}
