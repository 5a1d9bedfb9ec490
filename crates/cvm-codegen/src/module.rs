//! The output of [`crate::generate`]: a self-contained bytecode module
//! ready to hand to `cvm-image` for serialization or straight to `cvm-vm`.

use serde::{Deserialize, Serialize};

/// What a [`Relocation`] patches: a word in the text segment (a function
/// address taken by an initializer or stored in a global) or a byte offset
/// in the data segment (a pointer-typed global pointing at another global).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelocKind {
    Code,
    Data,
}

/// An unresolved reference left behind because its target is an external
/// declaration with no definition in this translation unit. `cvm::Engine::link`
/// walks every module's export table to patch these against another unit's
/// definition before the combined program is handed to `cvm-image`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Relocation {
    pub kind: RelocKind,
    /// Byte offset into `data` (for `RelocKind::Data`) or word index into
    /// `text` (for `RelocKind::Code`) that needs patching.
    pub at: u64,
    pub symbol: String,
    pub addend: i64,
}

/// A name this module defines and that other modules may link against.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Export {
    pub name: String,
    pub kind: RelocKind,
    /// Word offset into `text`, or byte offset into `data`.
    pub at: u64,
}

/// An FFI import this module's bytecode calls through `Op::CallF`, recorded
/// so `cvm-image::load` can resolve it against a live `FfiTable`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FfiImport {
    pub name: String,
    pub index: u32,
    pub fixed_args: u16,
    pub returns_double: bool,
    pub is_variadic: bool,
}

/// Self-contained compiled bytecode: the text segment (word 0 is the entry
/// offset, spec.md §4.3), the data segment (globals + string pool), and
/// whatever cross-unit bookkeeping `cvm::Engine::link` needs.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Module {
    pub text: Vec<u64>,
    pub data: Vec<u8>,
    pub relocations: Vec<Relocation>,
    pub exports: Vec<Export>,
    pub ffi_imports: Vec<FfiImport>,
}

impl Module {
    pub fn new() -> Self {
        // Word 0 is reserved for the entry offset; real code starts at
        // word 1, matching `cvm_vm::memory::TextSegment::entry`.
        Module { text: vec![0], ..Default::default() }
    }

    pub fn set_entry(&mut self, word_offset: u64) {
        self.text[0] = word_offset;
    }
}
