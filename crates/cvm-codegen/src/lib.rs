//! Lowers a parsed, type-checked translation unit (`cvm_parser::ParseOutput`)
//! into a [`module::Module`] of flat `cvm_isa` bytecode (spec.md §4).
//!
//! `generate` runs three passes: lay out the data segment and every
//! function's frame (needs only each `Obj`'s type), lower every function
//! body independently into its own op stream (targets left as local op
//! indices, per-function), then concatenate and re-encode everything once
//! every function's word-length is known, patching cross-function jump and
//! relocation targets as the final step.

pub mod abi;
pub mod data;
pub mod frame;
pub mod lower;
pub mod module;
pub mod patch;

use std::collections::HashMap;

use cvm_ast::obj::{ObjKind, RelocTarget};
use cvm_ast::ObjId;
use cvm_diagnostics::CompileResult;
use cvm_isa::{encode_one, Op};
use cvm_parser::ParseOutput;
use cvm_vm::{tag_addr, AddrRegion};

use module::{Export, FfiImport, Module, RelocKind, Relocation};
use patch::FixupTarget;

/// Counts the words `encode_one` would write for `op`, without caring about
/// the values of its patchable fields (every variant's word count depends
/// only on its shape, never its operands).
fn op_word_len(op: &Op) -> usize {
    let mut scratch = Vec::with_capacity(3);
    encode_one(op, &mut scratch);
    scratch.len()
}

/// Word index, within one op's own encoding, of the word `patch_op_target`
/// rewrites. Mirrors `encode_one`'s word layout for exactly the op shapes
/// `patch_op_target` accepts.
fn patchable_word_offset(op: &Op) -> u64 {
    match op {
        Op::Jmp { .. } | Op::Call { .. } => 1,
        Op::JmpIf { .. } | Op::LoadImm { .. } => 2,
        other => unreachable!("{other:?} is not a patchable op"),
    }
}

fn is_ffi_decl(kind: &ObjKind) -> bool {
    matches!(kind, ObjKind::Function { body: None, .. })
}

pub fn generate(parsed: &mut ParseOutput) -> CompileResult<Module> {
    let ParseOutput { ast, types, interner, globals, string_pool, .. } = parsed;

    let data_layout = data::layout_data(ast, types, interner, globals, string_pool);

    // FFI imports are function declarations with no body; every other
    // function is compiled. Index assignment order only has to be stable
    // within this module, not match any other module's.
    let mut ffi_index: HashMap<ObjId, u32> = HashMap::new();
    let mut ffi_imports = Vec::new();
    for &obj_id in globals.iter() {
        let obj = ast.obj(obj_id);
        if is_ffi_decl(&obj.kind) {
            let (params, is_variadic) = match &obj.kind {
                ObjKind::Function { params, is_variadic, .. } => (params.clone(), *is_variadic),
                _ => unreachable!(),
            };
            let ret_ty = match &types.get(obj.ty).kind {
                cvm_types::TypeKind::Func { ret, .. } => *ret,
                _ => obj.ty,
            };
            let index = ffi_imports.len() as u32;
            ffi_index.insert(obj_id, index);
            ffi_imports.push(FfiImport {
                name: interner.resolve(obj.name).to_string(),
                index,
                fixed_args: params.len() as u16,
                returns_double: types.get(ret_ty).is_float(),
                is_variadic,
            });
        }
    }

    // `string_offsets` is keyed by Symbol but DataLayout stores them
    // positionally (parallel to `string_pool`); build the map once here.
    let mut string_offsets: HashMap<cvm_support::intern::Symbol, u64> = HashMap::new();
    for (sym, &off) in string_pool.iter().zip(data_layout.string_offsets.iter()) {
        string_offsets.insert(*sym, off);
    }
    let ctx = lower::FuncCtx {
        types,
        interner,
        global_offsets: &data_layout.global_offsets,
        string_offsets: &string_offsets,
        ffi_index: &ffi_index,
    };

    struct Compiled {
        obj: ObjId,
        builder: patch::FuncBuilder,
        word_offsets: Vec<u64>, // per-op cumulative word offset within this function
        word_len: u64,
    }

    let mut compiled = Vec::new();
    for &obj_id in globals.iter() {
        let is_function_with_body = matches!(ast.obj(obj_id).kind, ObjKind::Function { body: Some(_), .. });
        if !is_function_with_body {
            continue;
        }
        let returns_aggregate = {
            let obj = ast.obj(obj_id);
            let ret_ty = match &types.get(obj.ty).kind {
                cvm_types::TypeKind::Func { ret, .. } => *ret,
                _ => obj.ty,
            };
            types.get(ret_ty).is_aggregate()
        };
        let layout = frame::layout_frame(ast, types, obj_id, returns_aggregate);
        let builder = lower::lower_function(ast, &layout, &ctx, obj_id)?;

        let mut word_offsets = Vec::with_capacity(builder.ops.len());
        let mut cursor = 0u64;
        for op in &builder.ops {
            word_offsets.push(cursor);
            cursor += op_word_len(op) as u64;
        }
        compiled.push(Compiled { obj: obj_id, builder, word_offsets, word_len: cursor });
    }

    // Word 0 of `text` is reserved for the entry offset (module::Module::new).
    let mut func_base: HashMap<ObjId, u64> = HashMap::new();
    let mut cursor = 1u64;
    for c in &compiled {
        func_base.insert(c.obj, cursor);
        cursor += c.word_len;
    }

    let mut deferred_code_relocs = Vec::new();
    for c in &mut compiled {
        let base = func_base[&c.obj];
        for &(op_idx, target) in &c.builder.fixups {
            let word_target = match target {
                FixupTarget::Local(local_idx) => Some(base + c.word_offsets[local_idx]),
                FixupTarget::FuncEntry(callee) => func_base.get(&callee).copied(),
                FixupTarget::Goto(_) => unreachable!("resolve_gotos already rewrote every Goto into a Local fixup"),
            };
            match word_target {
                Some(t) => patch::patch_op_target(&mut c.builder.ops[op_idx], t),
                None => {
                    // Target is an extern declaration with no definition in
                    // this translation unit; leave the placeholder op as-is
                    // and record where cvm::Engine::link needs to patch it
                    // once the callee's module is known.
                    let FixupTarget::FuncEntry(callee) = target else { unreachable!() };
                    let name = interner.resolve(ast.obj(callee).name).to_string();
                    let at_word = base + c.word_offsets[op_idx] + patchable_word_offset(&c.builder.ops[op_idx]);
                    deferred_code_relocs.push(Relocation { kind: RelocKind::Code, at: at_word, symbol: name, addend: 0 });
                }
            }
        }
    }

    let mut module = Module::new();
    let mut exports = Vec::new();
    let mut entry = None;
    for c in &compiled {
        let base = func_base[&c.obj];
        debug_assert_eq!(module.text.len() as u64, base);
        for op in &c.builder.ops {
            encode_one(op, &mut module.text);
        }
        let name = interner.resolve(ast.obj(c.obj).name).to_string();
        if name == "main" {
            entry = Some(base);
        }
        let is_static = ast.obj(c.obj).flags.is_static;
        if !is_static {
            exports.push(Export { name, kind: RelocKind::Code, at: base });
        }
    }
    if let Some(e) = entry {
        module.set_entry(e);
    }

    let mut data_bytes = data_layout.bytes;
    let mut relocations = Vec::new();
    for reloc in &data_layout.pending {
        let value = match reloc.target {
            RelocTarget::StringPoolOffset(idx) => {
                let off = data_layout.string_offsets[idx as usize];
                tag_addr(AddrRegion::Data, off) as i64 + reloc.addend
            }
            RelocTarget::Obj(target_obj) => {
                if let Some(&word) = func_base.get(&target_obj) {
                    word as i64 + reloc.addend
                } else if let Some(&off) = data_layout.global_offsets.get(&target_obj) {
                    tag_addr(AddrRegion::Data, off) as i64 + reloc.addend
                } else {
                    // Declared but not defined in this translation unit;
                    // leave an unresolved relocation for cvm::Engine::link.
                    let name = interner.resolve(ast.obj(target_obj).name).to_string();
                    relocations.push(Relocation { kind: RelocKind::Data, at: reloc.at, symbol: name, addend: reloc.addend });
                    continue;
                }
            }
        };
        data_bytes[reloc.at as usize..reloc.at as usize + 8].copy_from_slice(&(value as u64).to_le_bytes());
    }

    for &obj_id in globals.iter() {
        let obj = ast.obj(obj_id);
        if matches!(obj.kind, ObjKind::Global { .. }) && !obj.flags.is_static {
            if let Some(&off) = data_layout.global_offsets.get(&obj_id) {
                exports.push(Export { name: interner.resolve(obj.name).to_string(), kind: RelocKind::Data, at: off });
            }
        }
    }

    relocations.extend(deferred_code_relocs);

    module.data = data_bytes;
    module.exports = exports;
    module.ffi_imports = ffi_imports;
    module.relocations = relocations;

    Ok(module)
}
