//! The two collaborators `cvm-parser`'s own docs call out as external:
//! a preprocessor and a tokenizer. `preprocess` shells out to the host's
//! real C preprocessor; `lex` turns its output into `cvm_parser::Token`s.

pub mod lex;
pub mod preprocess;

use std::path::Path;

use cvm_diagnostics::CompileResult;
use cvm_parser::token::Token;

pub use preprocess::{MacroEdit, PreprocessConfig};

/// Runs the full preprocess-then-lex pipeline over a file on disk.
pub fn tokenize_file(path: &Path, config: &PreprocessConfig) -> CompileResult<Vec<Token>> {
    let text = preprocess::preprocess_file(path, config)?;
    lex::lex(&text, &path.to_string_lossy())
}

/// Runs the pipeline over in-memory source (spec.md §6.1's `-` stdin input).
pub fn tokenize_source(source: &str, virtual_name: &str, config: &PreprocessConfig) -> CompileResult<Vec<Token>> {
    let text = preprocess::preprocess_source(source, virtual_name, config)?;
    lex::lex(&text, virtual_name)
}
