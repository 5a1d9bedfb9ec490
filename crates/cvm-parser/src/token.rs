//! The token stream interface contract. The tokenizer/preprocessor
//! themselves are external collaborators (cc_preprocess in
//! `original_source/src/parse.c`); this crate only needs to consume
//! whatever implements [`TokenStream`].

use cvm_diagnostics::Span;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenKind {
    Ident,
    Punct,
    Keyword,
    Str,
    Num,
    Eof,
}

/// One token. Numeric literals carry both an integer and a float
/// interpretation; `is_float` says which one the source spelling actually
/// meant (`3` vs `3.0`), matching `original_source/src/jcc.h`'s `Token`
/// carrying both `val` and `fval` unconditionally.
#[derive(Clone, Debug)]
pub struct Token {
    pub kind: TokenKind,
    pub text: Box<str>,
    pub int_val: i64,
    pub float_val: f64,
    pub is_float: bool,
    pub is_unsigned: bool,
    pub is_long: bool,
    /// Unescaped contents, for `TokenKind::Str`.
    pub string_val: Box<str>,
    pub span: Span,
    pub at_bol: bool,
    pub has_space: bool,
}

impl Token {
    pub fn is_punct(&self, text: &str) -> bool {
        self.kind == TokenKind::Punct && &*self.text == text
    }

    pub fn is_keyword(&self, text: &str) -> bool {
        self.kind == TokenKind::Keyword && &*self.text == text
    }

    pub fn is_ident(&self) -> bool {
        self.kind == TokenKind::Ident
    }

    pub fn is_eof(&self) -> bool {
        self.kind == TokenKind::Eof
    }
}

/// A random-access cursor over a finished token sequence, the interface
/// contract standing in for `cc_preprocess`'s output linked list. `peek(0)`
/// is the token the parser is currently looking at.
pub trait TokenStream {
    fn peek(&self, lookahead: usize) -> &Token;

    /// Consumes and returns the current token, advancing the cursor.
    fn bump(&mut self) -> Token;
}

/// A `TokenStream` over an in-memory `Vec<Token>`, used by tests and by
/// embedders that already have a full token list (e.g. from a JSON AST
/// re-import).
pub struct VecTokenStream {
    tokens: Vec<Token>,
    pos: usize,
}

impl VecTokenStream {
    pub fn new(mut tokens: Vec<Token>) -> Self {
        if tokens.last().map(|t| t.kind) != Some(TokenKind::Eof) {
            let span = tokens
                .last()
                .map(|t| t.span.clone())
                .unwrap_or_else(|| Span::new("<input>", 0, 0, ""));
            tokens.push(Token {
                kind: TokenKind::Eof,
                text: "".into(),
                int_val: 0,
                float_val: 0.0,
                is_float: false,
                is_unsigned: false,
                is_long: false,
                string_val: "".into(),
                span,
                at_bol: true,
                has_space: false,
            });
        }
        VecTokenStream { tokens, pos: 0 }
    }
}

impl TokenStream for VecTokenStream {
    fn peek(&self, lookahead: usize) -> &Token {
        let idx = (self.pos + lookahead).min(self.tokens.len() - 1);
        &self.tokens[idx]
    }

    fn bump(&mut self) -> Token {
        let tok = self.tokens[self.pos.min(self.tokens.len() - 1)].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }
}

#[cfg(test)]
pub(crate) fn test_span() -> Span {
    Span::new("t.c", 1, 1, "")
}

#[cfg(test)]
pub(crate) fn ident(text: &str) -> Token {
    Token {
        kind: TokenKind::Ident,
        text: text.into(),
        int_val: 0,
        float_val: 0.0,
        is_float: false,
        is_unsigned: false,
        is_long: false,
        string_val: "".into(),
        span: test_span(),
        at_bol: false,
        has_space: true,
    }
}

#[cfg(test)]
pub(crate) fn punct(text: &str) -> Token {
    Token { kind: TokenKind::Punct, ..ident(text) }
}

#[cfg(test)]
pub(crate) fn keyword(text: &str) -> Token {
    Token { kind: TokenKind::Keyword, ..ident(text) }
}

#[cfg(test)]
pub(crate) fn num(v: i64) -> Token {
    Token { kind: TokenKind::Num, int_val: v, ..ident(&v.to_string()) }
}

#[cfg(test)]
pub(crate) fn num_suffixed(v: i64, is_long: bool, is_unsigned: bool) -> Token {
    Token { is_long, is_unsigned, ..num(v) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec_stream_appends_eof_and_saturates() {
        let mut ts = VecTokenStream::new(vec![ident("x")]);
        assert!(ts.peek(0).is_ident());
        assert!(ts.peek(5).is_eof());
        let first = ts.bump();
        assert_eq!(&*first.text, "x");
        assert!(ts.bump().is_eof());
        assert!(ts.bump().is_eof());
    }
}
