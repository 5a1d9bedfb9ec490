/// Parser-wide options. Default behavior aborts on the first diagnostic;
/// `recover: true` instead accumulates diagnostics and resumes at the next
/// statement boundary (spec.md §4.2).
#[derive(Clone, Copy, Debug, Default)]
pub struct ParserConfig {
    pub recover: bool,
}
