//! Embedder-facing facade (spec.md §6.3): the one crate a driver like
//! `cvm-cli` links against to go from source text to a running program,
//! without touching `cvm-parser`/`cvm-codegen`/`cvm-vm` directly.

pub mod frontend;
pub mod link;

use std::ffi::c_void;
use std::path::Path;

use cvm_codegen::module::Module;
use cvm_diagnostics::CompileResult;
use cvm_ffi::FfiTable;
use cvm_isa::XReg;
use cvm_parser::{ParserConfig, VecTokenStream};
use cvm_isa::Width;
use cvm_vm::{DataSegment, DebugHost, NullHost, TextSegment, Vm, VmFault, VmFeatures};

pub use cvm_codegen::module::Module;
pub use cvm_diagnostics::{CompileResult as EngineResult, Diagnostic};
pub use cvm_vm::{HeapFeatures, VmFault as RuntimeFault, VmFeatures};
pub use frontend::{MacroEdit, PreprocessConfig};

/// Ahead-of-link configuration and FFI registry, standing in for what
/// `original_source/src/main.c`'s `JCC` struct bundles with the VM
/// instance before `main` ever parses an argument.
pub struct Engine {
    preprocess: PreprocessConfig,
    parser: ParserConfig,
    ffi_registry: FfiTable,
    load_stdlib: bool,
}

impl Engine {
    /// Mirrors spec.md §6.1's default: the math/stdlib subset
    /// (`cvm_ffi::stdlib::register_defaults`) is loaded unless the driver
    /// passes `-S` (`with_stdlib(false)`).
    pub fn new() -> Self {
        Engine {
            preprocess: PreprocessConfig::new(),
            parser: ParserConfig::default(),
            ffi_registry: FfiTable::new(),
            load_stdlib: true,
        }
    }

    pub fn with_stdlib(mut self, enabled: bool) -> Self {
        self.load_stdlib = enabled;
        self
    }

    pub fn skip_preprocessing(mut self, skip: bool) -> Self {
        self.preprocess.skip = skip;
        self
    }

    pub fn recover_diagnostics(mut self, recover: bool) -> Self {
        self.parser.recover = recover;
        self
    }

    /// `-I <path>`.
    pub fn add_include_path(&mut self, path: impl Into<String>) {
        self.preprocess.include_paths.push(path.into());
    }

    /// `-D <macro>[=def]`.
    pub fn define_macro(&mut self, definition: impl Into<String>) {
        self.preprocess.macros.push(MacroEdit::Define(definition.into()));
    }

    /// `-U <macro>`.
    pub fn undefine_macro(&mut self, name: impl Into<String>) {
        self.preprocess.macros.push(MacroEdit::Undefine(name.into()));
    }

    /// Registers a native function callable from compiled code by name,
    /// the embedder-side counterpart of an FFI declaration in source
    /// (spec.md §6.3). `fixed_args`/`returns_double`/`is_variadic` must
    /// match the C declaration the compiled program calls through.
    ///
    /// # Safety
    /// `ptr` must point to a function whose actual signature matches
    /// `fixed_args`/`returns_double`/`is_variadic`, or calling it traps
    /// undefined behavior rather than an `FfiError`.
    pub unsafe fn register_function(
        &mut self,
        name: impl Into<String>,
        ptr: *const c_void,
        fixed_args: u16,
        returns_double: bool,
        is_variadic: bool,
    ) {
        self.ffi_registry.register(name, ptr, fixed_args, returns_double, is_variadic);
    }

    fn registry_with_stdlib(&self) -> FfiTable {
        let mut table = FfiTable::new();
        if self.load_stdlib {
            cvm_ffi::stdlib::register_defaults(&mut table);
        }
        for entry in self.ffi_registry.iter() {
            if entry.is_resolved() {
                table.register(entry.name.clone(), entry.ptr(), entry.fixed_args, entry.returns_double, entry.is_variadic);
            }
        }
        table
    }

    /// Preprocesses and lexes a file without parsing it (spec.md §6.1's
    /// `-P`/`--print-tokens`).
    pub fn tokenize_file(&self, path: &Path) -> CompileResult<Vec<cvm_parser::Token>> {
        frontend::tokenize_file(path, &self.preprocess)
    }

    /// Preprocesses, lexes, parses, and compiles one translation unit.
    /// Call [`Engine::link`] on the results to produce a runnable program.
    pub fn compile_unit(&self, path: &Path) -> CompileResult<Module> {
        let tokens = frontend::tokenize_file(path, &self.preprocess)?;
        let mut stream = VecTokenStream::new(tokens);
        let mut parsed = cvm_parser::parse(&mut stream, self.parser)?;
        cvm_codegen::generate(&mut parsed)
    }

    /// Same as [`Engine::compile_unit`] but for in-memory source
    /// (spec.md §6.1's `-` stdin input).
    pub fn compile_source(&self, source: &str, virtual_name: &str) -> CompileResult<Module> {
        let tokens = frontend::tokenize_source(source, virtual_name, &self.preprocess)?;
        let mut stream = VecTokenStream::new(tokens);
        let mut parsed = cvm_parser::parse(&mut stream, self.parser)?;
        cvm_codegen::generate(&mut parsed)
    }

    /// Merges one or more compiled translation units into a single
    /// program, resolving cross-unit references.
    pub fn link(&self, units: Vec<Module>) -> CompileResult<Module> {
        link::link(units)
    }

    pub fn save(&self, module: &Module, path: impl AsRef<Path>) -> Result<(), cvm_image::ImageError> {
        cvm_image::save(module, path)
    }

    pub fn load(&self, path: impl AsRef<Path>) -> Result<Module, cvm_image::ImageError> {
        cvm_image::load(path)
    }

    /// Builds a runnable [`ProgramVm`] from a linked [`Module`], resolving
    /// its FFI imports against this engine's registry.
    pub fn instantiate(&self, module: Module, features: VmFeatures) -> ProgramVm {
        let ffi = cvm_image::link_ffi(&module, &self.registry_with_stdlib());
        let text = TextSegment { words: module.text };
        let data = DataSegment { bytes: module.data };
        ProgramVm { vm: Vm::new(text, data, ffi, features) }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

/// A linked program ready to run, wrapping [`cvm_vm::Vm`] with the
/// argv-staging and breakpoint-by-text-offset API spec.md §6.3 describes.
pub struct ProgramVm {
    vm: Vm,
}

impl ProgramVm {
    pub fn add_breakpoint(&mut self, text_offset: u64) {
        self.vm.debugger.add_breakpoint(text_offset);
    }

    pub fn remove_breakpoint(&mut self, text_offset: u64) {
        self.vm.debugger.remove_breakpoint(text_offset);
    }

    /// Stages `argv` as a NUL-terminated string table at the top of the
    /// data stack and runs the program to completion, returning its exit
    /// status (spec.md §6.1: `main`'s return value, or a negative code on
    /// a runtime trap, surfaced to the caller as [`VmFault`]).
    pub fn run(&mut self, args: &[&str]) -> Result<i32, VmFault> {
        self.run_with_host(args, &mut NullHost)
    }

    pub fn run_with_host(&mut self, args: &[&str], host: &mut dyn DebugHost) -> Result<i32, VmFault> {
        let argv = self.stage_argv(args);
        self.vm.run(args.len() as i64, argv, host)
    }

    /// Lays out `argv[0..argc]` as consecutive NUL-terminated strings
    /// followed by a `char*[]` pointer table, both on the stack below
    /// `sp`, then returns the tagged stack address of the pointer table.
    fn stage_argv(&mut self, args: &[&str]) -> u64 {
        let mut sp = self.vm.stack.top();
        let mut string_addrs = Vec::with_capacity(args.len());
        for arg in args.iter().rev() {
            let bytes = arg.as_bytes();
            let len = bytes.len() + 1;
            let padded = (len + 7) & !7;
            sp -= padded;
            for (i, &b) in bytes.iter().enumerate() {
                self.vm.stack.write(sp + i, Width::B1, b as u64);
            }
            self.vm.stack.write(sp + bytes.len(), Width::B1, 0);
            string_addrs.push(cvm_vm::tag_addr(cvm_vm::AddrRegion::Stack, sp as u64));
        }
        string_addrs.reverse();
        let table_bytes = string_addrs.len() * 8;
        sp -= table_bytes;
        for (i, addr) in string_addrs.iter().enumerate() {
            self.vm.stack.write(sp + i * 8, Width::B8, *addr);
        }
        self.vm.regs.sp = sp;
        cvm_vm::tag_addr(cvm_vm::AddrRegion::Stack, sp as u64)
    }

    pub fn cycle_count(&self) -> u64 {
        self.vm.cycle_count()
    }

    pub fn heap_leaks(&self) -> Vec<cvm_vm::LeakRecord> {
        self.vm.heap.leaks()
    }
}

/// Convenience re-export so a driver never needs the `x0`-is-zero-sink
/// register convention spelled out; `ProgramVm::run`'s argv staging is
/// the only place this crate needs to name a register explicitly.
const _: XReg = match XReg::new(0) {
    Some(r) => r,
    None => unreachable!(),
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_compiles_and_runs_a_trivial_program() {
        let engine = Engine::new().skip_preprocessing(true);
        let module = engine.compile_source("int main(void) { return 42; }", "<test>").unwrap();
        let linked = engine.link(vec![module]).unwrap();
        let mut program = engine.instantiate(linked, VmFeatures::default());
        let status = program.run(&["prog"]).unwrap();
        assert_eq!(status, 42);
    }
}
