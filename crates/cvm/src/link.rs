//! Multi-translation-unit linking: merges N [`Module`]s compiled
//! separately, patching each one's [`Relocation`]s against the others'
//! [`Export`] tables, the way `cvm-codegen`'s module doc comment
//! anticipates ("`cvm::Engine::link` walks every module's export table to
//! patch these against another unit's definition").

use std::collections::HashMap;

use cvm_codegen::module::{FfiImport, Module, RelocKind};
use cvm_diagnostics::{CompileResult, Diagnostic, Span};
use cvm_isa::{decode_one, encode_one, Op};

fn link_error(message: impl Into<String>) -> Diagnostic {
    Diagnostic::new(Span::new("<link>", 0, 0, ""), message)
}

/// Rewrites every `Op::CallF`'s table index in `text` (word 0 onward is
/// real code; word 0 itself is the entry placeholder and never decodes as
/// an op) according to `local_to_global`, in place.
fn remap_ffi_indices(text: &mut [u64], local_to_global: &[u32]) -> CompileResult<()> {
    let mut pos = 1usize;
    while pos < text.len() {
        let (op, len) = decode_one(&text[pos..]).map_err(|e| link_error(format!("malformed bytecode while linking: {e:?}")))?;
        if let Op::CallF { index, nargs, double_mask } = op {
            let new_index = *local_to_global
                .get(index as usize)
                .ok_or_else(|| link_error(format!("callf index {index} out of range for its module's FFI import table")))?;
            let mut buf = Vec::with_capacity(len);
            encode_one(&Op::CallF { index: new_index, nargs, double_mask }, &mut buf);
            text[pos..pos + len].copy_from_slice(&buf);
        }
        pos += len;
    }
    Ok(())
}

/// Merges `modules` into one self-contained [`Module`], resolving every
/// cross-unit `Relocation` and renumbering FFI import indices so they're
/// unique across the combined program. Returns an error (spec.md §7's
/// "undefined reference"-style compile failure) if any relocation's symbol
/// is never exported by any module, or if no module exports `main`.
pub fn link(modules: Vec<Module>) -> CompileResult<Module> {
    if modules.len() == 1 {
        let mut only = modules.into_iter().next().unwrap();
        if !only.relocations.is_empty() {
            let unresolved = &only.relocations[0];
            return Err(link_error(format!("undefined reference to \"{}\"", unresolved.symbol)));
        }
        if only.text[0] == 0 && !only.exports.iter().any(|e| e.name == "main" && e.at == 0) {
            return Err(link_error("no definition of \"main\" in program"));
        }
        let _ = &mut only;
        return Ok(only);
    }

    let mut merged_text: Vec<u64> = vec![0];
    let mut merged_data: Vec<u8> = Vec::new();
    let mut merged_ffi: Vec<FfiImport> = Vec::new();
    let mut ffi_by_name: HashMap<String, u32> = HashMap::new();

    let mut text_shifts = Vec::with_capacity(modules.len());
    let mut data_shifts = Vec::with_capacity(modules.len());
    let mut local_to_global_ffi: Vec<Vec<u32>> = Vec::with_capacity(modules.len());

    let mut bodies: Vec<Vec<u64>> = Vec::with_capacity(modules.len());

    for module in &modules {
        text_shifts.push(merged_text.len() as u64 - 1);
        data_shifts.push(merged_data.len() as u64);

        let mut local_map = Vec::with_capacity(module.ffi_imports.len());
        for import in &module.ffi_imports {
            let global_index = *ffi_by_name.entry(import.name.clone()).or_insert_with(|| {
                let idx = merged_ffi.len() as u32;
                merged_ffi.push(FfiImport { name: import.name.clone(), index: idx, ..import.clone() });
                idx
            });
            local_map.push(global_index);
        }
        local_to_global_ffi.push(local_map);

        let mut body = module.text.clone();
        remap_ffi_indices(&mut body, local_to_global_ffi.last().unwrap())?;
        merged_text.extend_from_slice(&body[1..]);
        merged_data.extend_from_slice(&module.data);
        bodies.push(body);
    }

    let mut export_table: HashMap<String, (RelocKind, u64)> = HashMap::new();
    for (i, module) in modules.iter().enumerate() {
        for export in &module.exports {
            let final_at = match export.kind {
                RelocKind::Code => export.at + text_shifts[i],
                RelocKind::Data => export.at + data_shifts[i],
            };
            export_table.insert(export.name.clone(), (export.kind, final_at));
        }
    }

    for (i, module) in modules.iter().enumerate() {
        for reloc in &module.relocations {
            let (kind, target_at) = export_table
                .get(&reloc.symbol)
                .copied()
                .ok_or_else(|| link_error(format!("undefined reference to \"{}\"", reloc.symbol)))?;
            if kind != reloc.kind {
                return Err(link_error(format!(
                    "\"{}\" used as {:?} but defined as {:?}",
                    reloc.symbol, reloc.kind, kind
                )));
            }
            let value = target_at as i64 + reloc.addend;
            match reloc.kind {
                RelocKind::Code => {
                    let final_at = (reloc.at + text_shifts[i]) as usize;
                    merged_text[final_at] = value as u64;
                }
                RelocKind::Data => {
                    let final_at = (reloc.at + data_shifts[i]) as usize;
                    merged_data[final_at..final_at + 8].copy_from_slice(&(value as u64).to_le_bytes());
                }
            }
        }
    }

    let entry = export_table
        .get("main")
        .filter(|(kind, _)| *kind == RelocKind::Code)
        .map(|(_, at)| *at)
        .ok_or_else(|| link_error("no definition of \"main\" in program"))?;
    merged_text[0] = entry;

    let mut merged = Module::new();
    merged.text = merged_text;
    merged.data = merged_data;
    merged.ffi_imports = merged_ffi;
    merged.exports = export_table
        .into_iter()
        .map(|(name, (kind, at))| cvm_codegen::module::Export { name, kind, at })
        .collect();
    merged.relocations = Vec::new();
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cvm_codegen::module::{Export, Relocation};
    use cvm_isa::{Op, XReg};

    fn module_with_main_calling_extern() -> Module {
        let mut m = Module::new();
        // word 1: Call placeholder (patched by the linker), word after: Leave.
        encode_one(&Op::Call { target: 0 }, &mut m.text);
        encode_one(&Op::Leave, &mut m.text);
        m.set_entry(1);
        m.exports.push(Export { name: "main".into(), kind: RelocKind::Code, at: 1 });
        m.relocations.push(Relocation { kind: RelocKind::Code, at: 2, symbol: "helper".into(), addend: 0 });
        m
    }

    fn module_defining_helper() -> Module {
        let mut m = Module::new();
        encode_one(&Op::Mov { dst: XReg::new(0).unwrap(), src: XReg::new(0).unwrap() }, &mut m.text);
        encode_one(&Op::Leave, &mut m.text);
        m.exports.push(Export { name: "helper".into(), kind: RelocKind::Code, at: 1 });
        m
    }

    #[test]
    fn links_two_modules_and_patches_the_call() {
        let merged = link(vec![module_with_main_calling_extern(), module_defining_helper()]).unwrap();
        assert!(merged.relocations.is_empty());
        assert!(merged.text[0] > 0);
    }

    #[test]
    fn undefined_symbol_is_a_link_error() {
        let only = module_with_main_calling_extern();
        let err = link(vec![only]);
        assert!(err.is_err());
    }
}
