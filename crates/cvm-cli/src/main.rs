//! The `cvm` command-line driver (spec.md §6.1): preprocess/parse/link/
//! compile one or more C translation units and either save the resulting
//! bytecode image or run it immediately.
//!
//! Mirrors `original_source/src/main.c`'s flow (`cc_preprocess` per file,
//! `cc_parse` per file, `cc_link_progs`, `cc_compile`, then either
//! `cc_save_bytecode` or `cc_run`) through `cvm::Engine`.

use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use cvm::{Engine, HeapFeatures, Module, VmFeatures};

/// JIT C compiler and VM.
#[derive(Parser, Debug)]
#[command(name = "cvm", version, about)]
struct Cli {
    /// Add <path> to include search paths.
    #[arg(short = 'I', value_name = "path")]
    include: Vec<String>,

    /// Define a macro ("NAME" or "NAME=value").
    #[arg(short = 'D', value_name = "macro")]
    define: Vec<String>,

    /// Undefine a macro.
    #[arg(short = 'U', value_name = "macro")]
    undef: Vec<String>,

    /// Dump bytecode to <file> instead of running it.
    #[arg(short = 'o', long = "out", value_name = "file")]
    out: Option<PathBuf>,

    /// Print preprocessed tokens to stdout instead of compiling.
    #[arg(short = 'P', long = "print-tokens")]
    print_tokens: bool,

    /// Disable the preprocessing step.
    #[arg(short = 'X', long = "no-preprocess")]
    no_preprocess: bool,

    /// Do not link the default standard library FFI registrations.
    #[arg(short = 'S', long = "no-stdlib")]
    no_stdlib: bool,

    /// Dump the AST (not yet implemented, matching the original's TODO).
    #[arg(short = 'a', long = "ast")]
    dump_ast: bool,

    /// Enable debug logging.
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Enable the interactive debugger.
    #[arg(short = 'g', long = "debug")]
    debug: bool,

    /// Runtime array bounds checking.
    #[arg(short = 'b', long = "bounds-checks")]
    bounds_checks: bool,
    /// Use-after-free detection.
    #[arg(short = 'f', long = "uaf-detection")]
    uaf_detection: bool,
    /// Runtime type checking on pointer dereferences.
    #[arg(short = 't', long = "type-checks")]
    type_checks: bool,
    /// Uninitialized variable detection. Accepted for command-line
    /// compatibility; no `VmFeatures` field currently backs it, so this is
    /// parsed but has no runtime effect.
    #[arg(short = 'z', long = "uninitialized-detection")]
    #[allow(dead_code)]
    uninitialized_detection: bool,
    /// Stack overflow protection.
    #[arg(short = 's', long = "stack-canaries")]
    stack_canaries: bool,
    /// Heap overflow protection.
    #[arg(short = 'k', long = "heap-canaries")]
    heap_canaries: bool,
    /// Full pointer tracking and validation.
    #[arg(short = 'p', long = "pointer-sanitizer")]
    pointer_sanitizer: bool,
    /// Track allocations and report leaks at exit.
    #[arg(short = 'l', long = "memory-leak-detection")]
    leak_detection: bool,
    /// Track stack variable lifetimes and accesses. Same caveat as `-z`:
    /// parsed, but there's no VM-level feature to wire it to yet.
    #[arg(short = 'i', long = "stack-instrumentation")]
    #[allow(dead_code)]
    stack_instrumentation: bool,

    /// Input files; "-" reads a single translation unit from stdin.
    #[arg(required = true)]
    inputs: Vec<String>,
}

impl Cli {
    fn vm_features(&self) -> VmFeatures {
        VmFeatures {
            heap: HeapFeatures {
                canaries: self.heap_canaries,
                uaf_tracking: self.uaf_detection,
                leak_tracking: self.leak_detection,
                pointer_checks: self.pointer_sanitizer,
                type_checks: self.type_checks,
                bounds_checks: self.bounds_checks,
            },
            stack_canary: self.stack_canaries,
            cfi_shadow_stack: self.pointer_sanitizer,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt().with_env_filter("debug").init();
    } else {
        tracing_subscriber::fmt().with_env_filter("warn").init();
    }

    match run(&cli) {
        Ok(code) => code_to_exit_code(code),
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(1)
        }
    }
}

fn code_to_exit_code(code: i32) -> ExitCode {
    // Negative codes (runtime traps, spec.md §7) don't fit in the u8 a
    // process can actually report; truncate the way a shell would see it
    // through a real exit() call.
    ExitCode::from((code as i64 & 0xFF) as u8)
}

fn run(cli: &Cli) -> anyhow::Result<i32> {
    let mut engine = Engine::new().with_stdlib(!cli.no_stdlib).skip_preprocessing(cli.no_preprocess);
    for path in &cli.include {
        engine.add_include_path(path.clone());
    }
    for def in &cli.define {
        engine.define_macro(def.clone());
    }
    for name in &cli.undef {
        engine.undefine_macro(name.clone());
    }

    if cli.print_tokens {
        for input in &cli.inputs {
            println!("=== Tokens for {input} ===");
            let tokens = if input == "-" {
                let mut source = String::new();
                std::io::stdin().read_to_string(&mut source)?;
                cvm::frontend::tokenize_source(&source, "<stdin>", &cvm::PreprocessConfig { skip: cli.no_preprocess, ..cvm::PreprocessConfig::new() })
                    .map_err(|d| anyhow::anyhow!("{}", d.render()))?
            } else {
                engine.tokenize_file(std::path::Path::new(input)).map_err(|d| anyhow::anyhow!("{}", d.render()))?
            };
            for tok in &tokens {
                println!("{:?} {:?}", tok.kind, tok.text);
            }
            println!();
        }
        return Ok(0);
    }

    if cli.dump_ast {
        eprintln!("warning: -a/--ast not yet implemented");
        return Ok(0);
    }

    let mut units = Vec::with_capacity(cli.inputs.len());
    for input in &cli.inputs {
        let unit = compile_one(&engine, input).map_err(|d| anyhow::anyhow!("{}", d.render()))?;
        units.push(unit);
    }
    let linked = engine.link(units).map_err(|d| anyhow::anyhow!("{}", d.render()))?;

    if let Some(out) = &cli.out {
        engine.save(&linked, out)?;
        println!("Bytecode saved to {}", out.display());
        return Ok(0);
    }

    let mut program = engine.instantiate(linked, cli.vm_features());
    let args: Vec<String> = std::env::args().collect();
    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();

    if cli.debug {
        let mut repl = cvm_vm::NullHost;
        match program.run_with_host(&arg_refs, &mut repl) {
            Ok(code) => Ok(code),
            Err(fault) => {
                eprintln!("{fault}");
                Ok(-1)
            }
        }
    } else {
        match program.run(&arg_refs) {
            Ok(code) => Ok(code),
            Err(fault) => {
                eprintln!("{fault}");
                Ok(-1)
            }
        }
    }
}

fn compile_one(engine: &Engine, input: &str) -> cvm_diagnostics::CompileResult<Module> {
    if input == "-" {
        let mut source = String::new();
        std::io::stdin()
            .read_to_string(&mut source)
            .map_err(|e| cvm_diagnostics::Diagnostic::new(cvm_diagnostics::Span::new("<stdin>", 0, 0, ""), format!("failed to read stdin: {e}")))?;
        engine.compile_source(&source, "<stdin>")
    } else {
        engine.compile_unit(std::path::Path::new(input))
    }
}
