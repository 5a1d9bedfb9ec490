//! Data-segment layout: globals, laid out in declaration order, followed by
//! the string-literal pool. Address-valued initializers (`&other`, a bare
//! function name, a string literal) are deferred to [`crate::generate`]'s
//! final pass, once function entry points are known.

use std::collections::HashMap;

use cvm_ast::obj::RelocTarget;
use cvm_ast::{Ast, ObjId};
use cvm_ast::obj::ObjKind;
use cvm_support::intern::{Interner, Symbol};
use cvm_types::TypeStore;

fn align_up(n: u64, align: u64) -> u64 {
    (n + align - 1) & !(align - 1)
}

pub struct PendingReloc {
    /// Absolute byte offset into the data segment that needs patching.
    pub at: u64,
    pub target: RelocTarget,
    pub addend: i64,
}

pub struct DataLayout {
    pub bytes: Vec<u8>,
    pub global_offsets: HashMap<ObjId, u64>,
    /// Data-segment byte offset of each entry in `ParseOutput::string_pool`,
    /// indexed the same way `RelocTarget::StringPoolOffset` is.
    pub string_offsets: Vec<u64>,
    pub pending: Vec<PendingReloc>,
}

pub fn layout_data(ast: &Ast, types: &TypeStore, interner: &Interner, globals: &[ObjId], string_pool: &[Symbol]) -> DataLayout {
    let mut bytes = Vec::new();
    let mut global_offsets = HashMap::new();
    let mut pending = Vec::new();

    for &obj_id in globals {
        let obj = ast.obj(obj_id);
        let init = match &obj.kind {
            ObjKind::Global { init } => init,
            ObjKind::Function { .. } => continue,
            ObjKind::Local { .. } => unreachable!("top-level Obj cannot be a Local"),
        };

        let align = types.align_of(obj.ty).unwrap_or(8).max(1);
        let size = types.size_of(obj.ty).unwrap_or(8).max(0);
        let offset = align_up(bytes.len() as u64, align);
        bytes.resize(offset as usize, 0);
        match init {
            Some(g) => {
                bytes.extend_from_slice(&g.bytes);
                for reloc in &g.relocations {
                    pending.push(PendingReloc { at: offset + reloc.offset, target: reloc.target, addend: reloc.addend });
                }
            }
            None => bytes.resize(offset as usize + size as usize, 0),
        }
        global_offsets.insert(obj_id, offset);
    }

    let mut string_offsets = Vec::with_capacity(string_pool.len());
    for &sym in string_pool {
        let text = interner.resolve(sym);
        let offset = bytes.len() as u64;
        string_offsets.push(offset);
        bytes.extend_from_slice(text.as_bytes());
        bytes.push(0);
    }

    DataLayout { bytes, global_offsets, string_offsets, pending }
}
