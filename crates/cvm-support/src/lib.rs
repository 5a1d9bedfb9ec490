//! Arena allocation and compact entity indices shared by the frontend crates.
//!
//! AST, `Type`, and `Obj` graphs are naturally cyclic (a struct containing a
//! pointer to itself, mutually recursive types, `goto` targets that precede
//! their definition). Rather than modeling that with `Rc`/`RefCell`, every
//! node lives in a per-compilation arena and is referenced by a small
//! `Copy` index. The arena can be dropped in one shot once codegen is done,
//! and the graphs themselves have no ownership cycles to break.

pub mod arena;
pub mod ids;
pub mod intern;

pub use cranelift_entity::{EntityRef, PrimaryMap, SecondaryMap};

/// Declares a `Copy` entity index backed by a `u32`, the same pattern
/// `cranelift-entity`'s own `entity_impl!` produces for `Block`/`Value`.
#[macro_export]
macro_rules! entity_id {
    ($(#[$meta:meta])* $vis:vis struct $name:ident;) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
        $vis struct $name(u32);

        impl $crate::EntityRef for $name {
            fn new(index: usize) -> Self {
                debug_assert!(index < u32::MAX as usize);
                $name(index as u32)
            }

            fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                write!(f, "{}{}", stringify!($name), self.0)
            }
        }
    };
}
