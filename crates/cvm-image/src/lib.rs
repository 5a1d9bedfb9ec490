//! Bytecode image file format (spec.md §6.2): serializes a [`cvm_codegen::module::Module`]
//! to a self-contained byte stream and reconstructs it, matching FFI import
//! indices up against whatever the embedder has already registered.

use std::ffi::c_void;
use std::path::Path;

use cvm_codegen::module::Module;
use cvm_ffi::FfiTable;
use thiserror::Error;

/// Four bytes identifying a cvm bytecode image; guards against loading an
/// unrelated file as if it were one.
pub const MAGIC: u32 = 0x4D_56_43_31; // "1CVM", little-endian on disk
/// Bumped whenever the wire layout of [`Module`] changes incompatibly.
pub const VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed image: {0}")]
    Decode(#[from] postcard::Error),
    #[error("not a cvm bytecode image (bad magic {0:#010x})")]
    BadMagic(u32),
    #[error("image version {found} unsupported by this build (expected {VERSION})", found = .0)]
    UnsupportedVersion(u32),
    #[error("image truncated: missing {0}-byte header")]
    Truncated(usize),
}

const HEADER_LEN: usize = 8;

/// Encodes `module` as a cvm bytecode image.
pub fn save_to_bytes(module: &Module) -> Result<Vec<u8>, ImageError> {
    let mut out = Vec::with_capacity(HEADER_LEN + module.text.len() * 8 + module.data.len());
    out.extend_from_slice(&MAGIC.to_le_bytes());
    out.extend_from_slice(&VERSION.to_le_bytes());
    let body = postcard::to_allocvec(module)?;
    out.extend_from_slice(&body);
    Ok(out)
}

/// Decodes a cvm bytecode image previously written by [`save_to_bytes`].
pub fn load_from_bytes(bytes: &[u8]) -> Result<Module, ImageError> {
    if bytes.len() < HEADER_LEN {
        return Err(ImageError::Truncated(HEADER_LEN));
    }
    let magic = u32::from_le_bytes(bytes[0..4].try_into().expect("4 bytes"));
    if magic != MAGIC {
        return Err(ImageError::BadMagic(magic));
    }
    let version = u32::from_le_bytes(bytes[4..8].try_into().expect("4 bytes"));
    if version != VERSION {
        return Err(ImageError::UnsupportedVersion(version));
    }
    let module = postcard::from_bytes(&bytes[HEADER_LEN..])?;
    Ok(module)
}

pub fn save(module: &Module, path: impl AsRef<Path>) -> Result<(), ImageError> {
    std::fs::write(path, save_to_bytes(module)?).map_err(ImageError::from)
}

pub fn load(path: impl AsRef<Path>) -> Result<Module, ImageError> {
    let bytes = std::fs::read(path)?;
    load_from_bytes(&bytes)
}

/// Builds the [`FfiTable`] a [`Module`] expects at runtime: one entry per
/// `module.ffi_imports`, in that exact order, so `Op::CallF`'s table index
/// (assigned at compile time) lines up with the live table's index.
///
/// `registry` is whatever the embedder has already registered by name
/// (`cvm_ffi::stdlib::register_defaults` plus any `Engine::register_function`
/// calls); a name not found there is registered unresolved (spec.md §6.2:
/// "left null and trap on first call").
pub fn link_ffi(module: &Module, registry: &FfiTable) -> FfiTable {
    let mut table = FfiTable::new();
    for import in &module.ffi_imports {
        let ptr: *const c_void = registry
            .index_of(&import.name)
            .and_then(|idx| registry.entry(idx))
            .filter(|e| e.is_resolved())
            .map(|e| e.ptr())
            .unwrap_or(std::ptr::null());
        let index = if ptr.is_null() {
            table.register_unresolved(import.name.clone(), import.fixed_args, import.returns_double, import.is_variadic)
        } else {
            table.register(import.name.clone(), ptr, import.fixed_args, import.returns_double, import.is_variadic)
        };
        debug_assert_eq!(index, import.index, "cvm-image::link_ffi must preserve compile-time FFI indices");
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use cvm_codegen::module::{Export, FfiImport, RelocKind};

    fn sample_module() -> Module {
        let mut m = Module::new();
        m.text.extend_from_slice(&[0xDEAD, 0xBEEF]);
        m.set_entry(1);
        m.data = vec![1, 2, 3, 4];
        m.exports.push(Export { name: "main".into(), kind: RelocKind::Code, at: 1 });
        m.ffi_imports.push(FfiImport { name: "sqrt".into(), index: 0, fixed_args: 1, returns_double: true, is_variadic: false });
        m
    }

    #[test]
    fn round_trips_through_bytes() {
        let m = sample_module();
        let bytes = save_to_bytes(&m).unwrap();
        let loaded = load_from_bytes(&bytes).unwrap();
        assert_eq!(loaded.text, m.text);
        assert_eq!(loaded.data, m.data);
        assert_eq!(loaded.ffi_imports.len(), 1);
        assert_eq!(loaded.exports.len(), 1);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = save_to_bytes(&sample_module()).unwrap();
        bytes[0] ^= 0xFF;
        assert!(matches!(load_from_bytes(&bytes), Err(ImageError::BadMagic(_))));
    }

    #[test]
    fn link_ffi_preserves_compile_time_indices() {
        let m = sample_module();
        let mut registry = FfiTable::new();
        cvm_ffi::stdlib::register_defaults(&mut registry);
        let table = link_ffi(&m, &registry);
        assert_eq!(table.len(), 1);
        assert!(table.entry(0).unwrap().is_resolved());
    }
}
