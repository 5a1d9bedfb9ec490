//! Identifier interning. C translation units reuse the same identifiers
//! (`int`, `i`, `tmp`, member names) constantly; interning avoids
//! re-allocating and re-hashing the same bytes for every reference.

use crate::EntityRef;
use indexmap::IndexSet;

crate::entity_id! {
    /// An interned identifier. Stable for the lifetime of the owning
    /// [`Interner`]; index `0` is never produced by [`Interner::intern`]
    /// so it can be used as a niche "no name" sentinel by callers.
    pub struct Symbol;
}

#[derive(Debug, Default)]
pub struct Interner {
    strings: IndexSet<Box<str>>,
}

impl Interner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up an already-interned string without inserting it, for
    /// lookahead that must not pollute the table with strings it only
    /// speculatively considered.
    pub fn probe(&self, s: &str) -> Option<Symbol> {
        self.strings.get_index_of(s).map(Symbol::new)
    }

    pub fn intern(&mut self, s: &str) -> Symbol {
        if let Some(index) = self.strings.get_index_of(s) {
            return Symbol::new(index);
        }
        let (index, _) = self.strings.insert_full(s.into());
        Symbol::new(index)
    }

    pub fn resolve(&self, sym: Symbol) -> &str {
        self.strings
            .get_index(sym.index())
            .expect("Symbol from a foreign Interner")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_text_interns_to_same_symbol() {
        let mut interner = Interner::new();
        let a = interner.intern("foo");
        let b = interner.intern("bar");
        let c = interner.intern("foo");
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(interner.resolve(a), "foo");
        assert_eq!(interner.resolve(b), "bar");
    }
}
