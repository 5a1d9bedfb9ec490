//! The foreign-function bridge (spec.md §4.6).
//!
//! Per the redesign note in spec.md §9 ("use libffi unconditionally in the
//! rewrite... the inline-assembly trampoline path is a fallback the rewrite
//! should not carry"), this crate implements only the libffi path. Call
//! interfaces are built with `libffi`'s `middle` API and cached on the
//! `FfiEntry` for non-variadic functions; variadic calls rebuild the `Cif`
//! every time from the argument count and double-mask observed at the call
//! site, since the actual argument shape isn't known until `callf` runs.

pub mod stdlib;

use std::ffi::c_void;

use indexmap::IndexMap;
use libffi::middle::{Arg, Cif, CodePtr, Type};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FfiError {
    #[error("FFI table has no entry at index {0}")]
    UnknownIndex(u32),
    #[error("FFI function \"{0}\" was not resolved at load time")]
    Unresolved(String),
    #[error("callf requested {requested} arguments but \"{name}\" takes at least {fixed}")]
    TooFewArguments { name: String, fixed: u16, requested: u8 },
}

/// One entry in the foreign-function table: spec.md §4.6's
/// `(name, function pointer, fixed-arg count, returns-double, is-variadic)`.
pub struct FfiEntry {
    pub name: String,
    ptr: *const c_void,
    pub fixed_args: u16,
    pub returns_double: bool,
    pub is_variadic: bool,
    cached_cif: Option<(Cif, usize)>,
}

impl FfiEntry {
    pub fn is_resolved(&self) -> bool {
        !self.ptr.is_null()
    }

    /// The raw host function pointer, for an embedder (`cvm-image::link_ffi`)
    /// copying an already-resolved entry into a freshly built table.
    pub fn ptr(&self) -> *const c_void {
        self.ptr
    }
}

/// The registry of host functions callable from compiled code, indexed by
/// the `callf` opcode's immediate (the GLOSSARY's "FFI table").
#[derive(Default)]
pub struct FfiTable {
    entries: Vec<FfiEntry>,
    by_name: IndexMap<String, u32>,
}

impl FfiTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a resolved host function, returning its table index.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        ptr: *const c_void,
        fixed_args: u16,
        returns_double: bool,
        is_variadic: bool,
    ) -> u32 {
        let name = name.into();
        let index = self.entries.len() as u32;
        self.by_name.insert(name.clone(), index);
        self.entries.push(FfiEntry {
            name,
            ptr,
            fixed_args,
            returns_double,
            is_variadic,
            cached_cif: None,
        });
        index
    }

    /// Registers an unresolved import (spec.md §6.2's "left null and trap
    /// on first call"), to be filled in later if the host ever registers a
    /// matching name.
    pub fn register_unresolved(
        &mut self,
        name: impl Into<String>,
        fixed_args: u16,
        returns_double: bool,
        is_variadic: bool,
    ) -> u32 {
        self.register(name, std::ptr::null(), fixed_args, returns_double, is_variadic)
    }

    pub fn index_of(&self, name: &str) -> Option<u32> {
        self.by_name.get(name).copied()
    }

    pub fn entry(&self, index: u32) -> Option<&FfiEntry> {
        self.entries.get(index as usize)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FfiEntry> {
        self.entries.iter()
    }

    /// Resolves a previously-unresolved import against a live pointer,
    /// e.g. once `cvm-image::load` has matched FFI imports against the
    /// registry populated by `register_*_functions`.
    pub fn resolve(&mut self, name: &str, ptr: *const c_void) -> bool {
        match self.by_name.get(name) {
            Some(&idx) => {
                self.entries[idx as usize].ptr = ptr;
                true
            }
            None => false,
        }
    }

    /// Dispatches `callf(index, nargs, double_mask)`: `args` holds `nargs`
    /// 64-bit words (integers as-is, doubles bit-reinterpreted), and
    /// `double_mask` bit `i` marks argument `i` as floating-point.
    pub fn call(&mut self, index: u32, args: &[u64], double_mask: u16) -> Result<u64, FfiError> {
        let entry = self
            .entries
            .get_mut(index as usize)
            .ok_or(FfiError::UnknownIndex(index))?;
        if entry.ptr.is_null() {
            return Err(FfiError::Unresolved(entry.name.clone()));
        }
        if (args.len() as u16) < entry.fixed_args && !entry.is_variadic {
            return Err(FfiError::TooFewArguments {
                name: entry.name.clone(),
                fixed: entry.fixed_args,
                requested: args.len() as u8,
            });
        }

        let arg_types: Vec<Type> = (0..args.len())
            .map(|i| if double_mask & (1 << i) != 0 { Type::f64() } else { Type::i64() })
            .collect();
        let ret_type = if entry.returns_double { Type::f64() } else { Type::i64() };

        let rebuild = entry.is_variadic
            || entry
                .cached_cif
                .as_ref()
                .map(|(_, n)| *n != args.len())
                .unwrap_or(true);
        if rebuild {
            tracing::trace!(name = %entry.name, nargs = args.len(), "building libffi Cif for callf");
            entry.cached_cif = Some((Cif::new(arg_types, ret_type), args.len()));
        }
        let (cif, _) = entry.cached_cif.as_ref().expect("just populated above");

        let storage: Vec<ArgValue> = args
            .iter()
            .enumerate()
            .map(|(i, &bits)| {
                if double_mask & (1 << i) != 0 {
                    ArgValue::F(f64::from_bits(bits))
                } else {
                    ArgValue::I(bits as i64)
                }
            })
            .collect();
        let call_args: Vec<Arg> = storage
            .iter()
            .map(|v| match v {
                ArgValue::I(i) => Arg::new(i),
                ArgValue::F(f) => Arg::new(f),
            })
            .collect();

        let code = CodePtr::from_ptr(entry.ptr);
        // SAFETY: the caller (the VM) guarantees `entry.ptr` has the
        // signature implied by `arg_types`/`ret_type`; that invariant is
        // established at registration time by the embedder.
        let result = unsafe {
            if entry.returns_double {
                let r: f64 = cif.call(code, &call_args);
                r.to_bits()
            } else {
                let r: i64 = cif.call(code, &call_args);
                r as u64
            }
        };
        Ok(result)
    }
}

enum ArgValue {
    I(i64),
    F(f64),
}

#[cfg(test)]
mod tests {
    use super::*;

    extern "C" fn add_two(a: i64, b: i64) -> i64 {
        a + b
    }

    extern "C" fn negate(a: f64) -> f64 {
        -a
    }

    #[test]
    fn calls_a_registered_integer_function() {
        let mut table = FfiTable::new();
        let idx = table.register("add_two", add_two as *const c_void, 2, false, false);
        let result = table.call(idx, &[2u64, 40u64], 0).unwrap();
        assert_eq!(result as i64, 42);
    }

    #[test]
    fn calls_a_registered_float_function() {
        let mut table = FfiTable::new();
        let idx = table.register("negate", negate as *const c_void, 1, true, false);
        let result = table.call(idx, &[(-1.5f64).to_bits()], 0b1).unwrap();
        assert_eq!(f64::from_bits(result), 1.5);
    }

    #[test]
    fn unresolved_import_traps() {
        let mut table = FfiTable::new();
        let idx = table.register_unresolved("missing", 1, false, false);
        let err = table.call(idx, &[1], 0).unwrap_err();
        assert!(matches!(err, FfiError::Unresolved(_)));
    }

    #[test]
    fn unknown_index_is_rejected() {
        let mut table = FfiTable::new();
        assert!(matches!(table.call(0, &[], 0), Err(FfiError::UnknownIndex(0))));
    }
}
