use cvm_support::arena::Arena;

use crate::{Type, TypeId, TypeKind};

#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("use of incomplete type")]
    Incomplete,
    #[error("alignment {0} is not a power of two")]
    BadAlignment(u64),
    #[error("array length {0} exceeds representable object size")]
    ArrayTooLarge(i64),
}

/// Owns every [`Type`] created during one compilation. Struct/union/enum
/// types can reference their own `TypeId` (a linked-list node, a tree node)
/// because `TypeId` is just an index into this arena, not a borrow.
pub struct TypeStore {
    arena: Arena<TypeId, Type>,
}

const PTR_SIZE: u64 = 8;

impl TypeStore {
    pub fn new() -> Self {
        TypeStore { arena: Arena::new() }
    }

    pub fn alloc(&mut self, ty: Type) -> TypeId {
        self.arena.alloc(ty)
    }

    pub fn get(&self, id: TypeId) -> &Type {
        self.arena.get(id)
    }

    pub fn get_mut(&mut self, id: TypeId) -> &mut Type {
        self.arena.get_mut(id)
    }

    /// Builds a pointer type over `base`. Always complete, always 8 bytes:
    /// spec.md §3.1 invariant (i) exempts pointers from the "size complete
    /// before typed" rule precisely so `struct Node *next;` works inside
    /// the definition of `struct Node`.
    pub fn pointer_to(&mut self, base: TypeId) -> TypeId {
        self.alloc(Type {
            kind: TypeKind::Ptr { base },
            size: PTR_SIZE,
            align: PTR_SIZE,
            is_unsigned: true,
            is_const: false,
            is_atomic: false,
        })
    }

    /// Decays an array type to a pointer to its element, the one place
    /// outside `sizeof`/`&` where C requires the conversion (spec.md §3.1
    /// invariant iii).
    pub fn decay(&mut self, id: TypeId) -> TypeId {
        let base = match &self.get(id).kind {
            TypeKind::Array { base, .. } | TypeKind::Vla { base, .. } => *base,
            _ => return id,
        };
        self.pointer_to(base)
    }

    /// The size in bytes of a complete type. Mirrors spec.md §8.2's
    /// "sizeof preservation" property: the sum of member sizes plus
    /// alignment padding.
    pub fn size_of(&self, id: TypeId) -> Result<u64, TypeError> {
        let ty = self.get(id);
        if !ty.is_complete() {
            if matches!(ty.kind, TypeKind::Error) {
                return Ok(0);
            }
            return Err(TypeError::Incomplete);
        }
        Ok(ty.size)
    }

    pub fn align_of(&self, id: TypeId) -> Result<u64, TypeError> {
        let align = self.get(id).align;
        if !align.is_power_of_two() {
            return Err(TypeError::BadAlignment(align));
        }
        Ok(align)
    }

    /// Lays out a struct's members in declaration order, applying standard
    /// C alignment padding unless `is_packed` is set, and returns the
    /// struct's own (size, align). Flexible array members (`has_flexible_tail`)
    /// contribute zero size and are not aligned past the preceding member.
    pub fn layout_struct(&self, members: &[crate::Member], is_packed: bool, has_flexible_tail: bool) -> (Vec<crate::Member>, u64, u64) {
        let mut offset = 0u64;
        let mut max_align = 1u64;
        let mut laid_out = Vec::with_capacity(members.len());
        let total = members.len();
        for (i, m) in members.iter().enumerate() {
            let is_tail = has_flexible_tail && i + 1 == total;
            let member_align = if is_packed { 1 } else { self.get(m.ty).align };
            let member_size = if is_tail { 0 } else { self.get(m.ty).size };
            if !is_packed {
                offset = align_up(offset, member_align);
            }
            laid_out.push(crate::Member {
                name: m.name,
                ty: m.ty,
                offset,
                bit_width: m.bit_width,
            });
            if !is_tail {
                offset += member_size;
            }
            max_align = max_align.max(member_align);
        }
        let size = if is_packed { offset } else { align_up(offset, max_align) };
        (laid_out, size.max(if is_packed { 0 } else { 1 }), max_align)
    }

    /// Union layout: every member starts at offset 0; size is the widest
    /// member rounded up to the widest alignment.
    pub fn layout_union(&self, members: &[crate::Member], is_packed: bool) -> (Vec<crate::Member>, u64, u64) {
        let mut size = 0u64;
        let mut max_align = 1u64;
        let laid_out: Vec<_> = members
            .iter()
            .map(|m| {
                let member_align = if is_packed { 1 } else { self.get(m.ty).align };
                size = size.max(self.get(m.ty).size);
                max_align = max_align.max(member_align);
                crate::Member {
                    name: m.name,
                    ty: m.ty,
                    offset: 0,
                    bit_width: m.bit_width,
                }
            })
            .collect();
        let size = if is_packed { size } else { align_up(size, max_align) };
        (laid_out, size, max_align)
    }

    /// Structural compatibility, used for `_Generic` selection, parameter
    /// checking, and (at codegen time) the `__jcc_types_compatible_p`
    /// builtin `va_arg` dispatches on. The `error` sentinel type is
    /// compatible with everything so recovery mode doesn't cascade.
    pub fn compatible(&self, a: TypeId, b: TypeId) -> bool {
        if a == b {
            return true;
        }
        let ta = self.get(a);
        let tb = self.get(b);
        if matches!(ta.kind, TypeKind::Error) || matches!(tb.kind, TypeKind::Error) {
            return true;
        }
        match (&ta.kind, &tb.kind) {
            (TypeKind::Ptr { base: ba }, TypeKind::Ptr { base: bb }) => {
                matches!(self.get(*ba).kind, TypeKind::Void) || matches!(self.get(*bb).kind, TypeKind::Void) || self.compatible(*ba, *bb)
            }
            (TypeKind::Array { base: ba, .. }, TypeKind::Array { base: bb, .. }) => self.compatible(*ba, *bb),
            (TypeKind::Func { ret: ra, params: pa, is_variadic: va }, TypeKind::Func { ret: rb, params: pb, is_variadic: vb }) => {
                va == vb && pa.len() == pb.len() && self.compatible(*ra, *rb) && pa.iter().zip(pb).all(|(x, y)| self.compatible(*x, *y))
            }
            _ => ta.is_integer() && tb.is_integer() && ta.is_unsigned == tb.is_unsigned,
        }
    }
}

impl Default for TypeStore {
    fn default() -> Self {
        Self::new()
    }
}

fn align_up(offset: u64, align: u64) -> u64 {
    debug_assert!(align.is_power_of_two());
    (offset + align - 1) & !(align - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cvm_support::intern::Interner;

    fn scalar(store: &mut TypeStore, kind: TypeKind, size: u64, align: u64, is_unsigned: bool) -> TypeId {
        store.alloc(Type {
            kind,
            size,
            align,
            is_unsigned,
            is_const: false,
            is_atomic: false,
        })
    }

    #[test]
    fn pointer_is_always_complete_and_eight_bytes() {
        let mut store = TypeStore::new();
        let int_ty = scalar(&mut store, TypeKind::Int, 4, 4, false);
        let ptr = store.pointer_to(int_ty);
        assert_eq!(store.size_of(ptr).unwrap(), 8);
        assert_eq!(store.align_of(ptr).unwrap(), 8);
    }

    #[test]
    fn incomplete_array_size_errors() {
        let mut store = TypeStore::new();
        let int_ty = scalar(&mut store, TypeKind::Int, 4, 4, false);
        let incomplete = store.alloc(Type {
            kind: TypeKind::Array { base: int_ty, len: -1 },
            size: 0,
            align: 4,
            is_unsigned: false,
            is_const: false,
            is_atomic: false,
        });
        assert_eq!(store.size_of(incomplete), Err(TypeError::Incomplete));
    }

    #[test]
    fn struct_layout_matches_c_padding() {
        let mut interner = Interner::new();
        let mut store = TypeStore::new();
        let char_ty = scalar(&mut store, TypeKind::Char, 1, 1, false);
        let int_ty = scalar(&mut store, TypeKind::Int, 4, 4, false);
        let long_ty = scalar(&mut store, TypeKind::Long, 8, 8, false);
        // struct { char c; int i; long l; } -> padding after c, size multiple of 8
        let members = vec![
            crate::Member { name: interner.intern("c"), ty: char_ty, offset: 0, bit_width: None },
            crate::Member { name: interner.intern("i"), ty: int_ty, offset: 0, bit_width: None },
            crate::Member { name: interner.intern("l"), ty: long_ty, offset: 0, bit_width: None },
        ];
        let (laid_out, size, align) = store.layout_struct(&members, false, false);
        assert_eq!(laid_out[0].offset, 0);
        assert_eq!(laid_out[1].offset, 4);
        assert_eq!(laid_out[2].offset, 8);
        assert_eq!(size, 16);
        assert_eq!(align, 8);
    }

    #[test]
    fn packed_struct_has_no_padding() {
        let mut interner = Interner::new();
        let mut store = TypeStore::new();
        let char_ty = scalar(&mut store, TypeKind::Char, 1, 1, false);
        let int_ty = scalar(&mut store, TypeKind::Int, 4, 4, false);
        let members = vec![
            crate::Member { name: interner.intern("c"), ty: char_ty, offset: 0, bit_width: None },
            crate::Member { name: interner.intern("i"), ty: int_ty, offset: 0, bit_width: None },
        ];
        let (laid_out, size, _align) = store.layout_struct(&members, true, false);
        assert_eq!(laid_out[1].offset, 1);
        assert_eq!(size, 5);
    }

    #[test]
    fn void_pointer_compatible_with_any_pointer() {
        let mut store = TypeStore::new();
        let void_ty = scalar(&mut store, TypeKind::Void, 0, 1, false);
        let int_ty = scalar(&mut store, TypeKind::Int, 4, 4, false);
        let void_ptr = store.pointer_to(void_ty);
        let int_ptr = store.pointer_to(int_ty);
        assert!(store.compatible(void_ptr, int_ptr));
    }

    #[test]
    fn error_sentinel_is_universally_compatible() {
        let mut store = TypeStore::new();
        let error_ty = store.alloc(Type {
            kind: TypeKind::Error,
            size: 0,
            align: 1,
            is_unsigned: false,
            is_const: false,
            is_atomic: false,
        });
        let int_ty = scalar(&mut store, TypeKind::Int, 4, 4, false);
        assert!(store.compatible(error_ty, int_ty));
        assert_eq!(store.size_of(error_ty).unwrap(), 0);
    }
}
