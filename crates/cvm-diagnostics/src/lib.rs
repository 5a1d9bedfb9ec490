//! Compile-time diagnostics: source spans, the framed single-line renderer,
//! and the recovery-mode accumulator.
//!
//! The original implementation aborts compilation with a `setjmp`/`longjmp`
//! escape the moment an error is found. Per the redesign note in spec.md §9,
//! the rewrite uses `Result`/`?` for that escape instead: every frontend
//! function that can fail returns `Result<T, Diagnostic>`, and a single
//! `Err` unwinds straight back to the driver. Recovery mode (`-` is not a
//! flag for this; it's `ParserConfig::recover` in `cvm-parser`) instead
//! threads a [`DiagnosticSink`] through the parser so multiple diagnostics
//! can be collected before giving up.

use std::fmt;
use std::sync::Arc;

/// A location in a source file, resolved eagerly at token-creation time so
/// diagnostics never need to re-scan the source to find a line/column.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Span {
    pub file: Arc<str>,
    pub line: u32,
    pub column: u32,
    pub line_text: Arc<str>,
}

impl Span {
    pub fn new(file: impl Into<Arc<str>>, line: u32, column: u32, line_text: impl Into<Arc<str>>) -> Self {
        Span {
            file: file.into(),
            line,
            column,
            line_text: line_text.into(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub span: Span,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.span, self.message)
    }
}

impl std::error::Error for Diagnostic {}

impl Diagnostic {
    pub fn new(span: Span, message: impl Into<String>) -> Self {
        Diagnostic {
            span,
            message: message.into(),
        }
    }

    /// Renders the framed, multi-line block spec.md §7 describes: the
    /// one-line location + message, the offending source line, and a caret
    /// under the column.
    pub fn render(&self) -> String {
        let caret_pad = " ".repeat(self.span.column.saturating_sub(1) as usize);
        format!(
            "{}:{}:{}: error: {}\n {}\n {}^",
            self.span.file, self.span.line, self.span.column, self.message, self.span.line_text, caret_pad
        )
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

pub type CompileResult<T> = Result<T, Diagnostic>;

/// Where a frontend pass sends diagnostics it cannot immediately abort on.
///
/// `Abort` is the default: the first diagnostic handed to it is returned as
/// an `Err` by the caller on the next `?`. `Recover` instead stashes every
/// diagnostic it sees and lets the parser keep going, which is how
/// `ParserConfig::recover` is implemented.
#[derive(Debug, Default)]
pub enum DiagnosticSink {
    #[default]
    Abort,
    Recover(Vec<Diagnostic>),
}

impl DiagnosticSink {
    pub fn recovering() -> Self {
        DiagnosticSink::Recover(Vec::new())
    }

    /// Reports a diagnostic. In `Abort` mode this is equivalent to
    /// returning `Err` immediately. In `Recover` mode the diagnostic is
    /// stashed and the caller should substitute the `error` sentinel type
    /// and keep parsing.
    pub fn report(&mut self, diag: Diagnostic) -> CompileResult<()> {
        match self {
            DiagnosticSink::Abort => Err(diag),
            DiagnosticSink::Recover(diags) => {
                diags.push(diag);
                Ok(())
            }
        }
    }

    pub fn is_recovering(&self) -> bool {
        matches!(self, DiagnosticSink::Recover(_))
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            DiagnosticSink::Abort => &[],
            DiagnosticSink::Recover(diags) => diags,
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.diagnostics().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span() -> Span {
        Span::new("a.c", 3, 5, "  int x = y;")
    }

    #[test]
    fn render_includes_caret_at_column() {
        let diag = Diagnostic::new(span(), "use of undeclared identifier 'y'");
        let rendered = diag.render();
        assert!(rendered.contains("a.c:3:5"));
        assert!(rendered.contains("undeclared identifier 'y'"));
        let caret_line = rendered.lines().last().unwrap();
        assert_eq!(caret_line.len() - 1, 5); // one leading space + 4 pad chars before '^'
    }

    #[test]
    fn abort_sink_returns_first_error() {
        let mut sink = DiagnosticSink::Abort;
        let err = sink.report(Diagnostic::new(span(), "boom")).unwrap_err();
        assert_eq!(err.message, "boom");
    }

    #[test]
    fn recover_sink_accumulates() {
        let mut sink = DiagnosticSink::recovering();
        sink.report(Diagnostic::new(span(), "first")).unwrap();
        sink.report(Diagnostic::new(span(), "second")).unwrap();
        assert_eq!(sink.diagnostics().len(), 2);
        assert!(sink.has_errors());
    }
}
