//! Tokenizer over already-preprocessed C source text (spec.md §6.3's
//! "preprocess a file to a token stream" contract, the lexer half).
//!
//! `cc_preprocess` in `original_source/src/main.c` shells out to the host's
//! real C preprocessor rather than reimplementing macro expansion; this
//! lexer is what turns that preprocessor's text output (or, with `-X`, raw
//! source) into the `cvm_parser::Token`s the recursive-descent parser
//! consumes. GNU line markers (`# 12 "foo.h" 1`) the system preprocessor
//! emits are recognized and adjust the reported file/line, matching what a
//! real driver built on top of `cpp -E` has to do.

use cvm_diagnostics::{CompileResult, Diagnostic, Span};
use cvm_parser::token::{Token, TokenKind};

const KEYWORDS: &[&str] = &[
    "void", "_Bool", "bool", "char", "short", "int", "long", "float", "double", "signed", "unsigned", "struct",
    "union", "enum", "typeof", "typeof_unqual", "_Atomic", "typedef", "static", "extern", "inline", "_Thread_local",
    "constexpr", "register", "auto", "const", "volatile", "restrict", "break", "case", "continue", "default", "do",
    "else", "for", "goto", "if", "return", "sizeof", "switch", "while", "_Generic", "_Alignas", "_Alignof",
    "__alignof__", "__attribute__",
];

/// Longest-match-first; 3-char entries must precede their 2-char and
/// 1-char prefixes, same for 2-char vs 1-char.
const PUNCTUATORS: &[&str] = &[
    "...", "<<=", ">>=", "->", "++", "--", "<<", ">>", "<=", ">=", "==", "!=", "&&", "||", "+=", "-=", "*=", "/=",
    "%=", "&=", "|=", "^=", "##", "+", "-", "*", "/", "%", "&", "|", "^", "~", "!", "<", ">", "=", "(", ")", "{",
    "}", "[", "]", ";", ":", ",", ".", "?", "#",
];

struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
    line: u32,
    column: u32,
    file: String,
    physical_line_start: usize,
    at_bol: bool,
    has_space: bool,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str, filename: &str) -> Self {
        Lexer {
            src: src.as_bytes(),
            pos: 0,
            line: 1,
            column: 1,
            file: filename.to_string(),
            physical_line_start: 0,
            at_bol: true,
            has_space: false,
        }
    }

    fn peek_byte(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, n: usize) -> Option<u8> {
        self.src.get(self.pos + n).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let b = self.peek_byte()?;
        self.pos += 1;
        if b == b'\n' {
            self.line += 1;
            self.column = 1;
            self.physical_line_start = self.pos;
            self.at_bol = true;
        } else {
            self.column += 1;
        }
        Some(b)
    }

    fn current_line_text(&self) -> String {
        let end = self.src[self.physical_line_start..]
            .iter()
            .position(|&b| b == b'\n')
            .map(|p| self.physical_line_start + p)
            .unwrap_or(self.src.len());
        String::from_utf8_lossy(&self.src[self.physical_line_start..end]).into_owned()
    }

    fn span(&self) -> Span {
        Span::new(self.file.clone(), self.line, self.column, self.current_line_text())
    }

    fn skip_whitespace_and_comments(&mut self) -> CompileResult<()> {
        loop {
            match self.peek_byte() {
                Some(b' ') | Some(b'\t') | Some(b'\r') | Some(b'\n') => {
                    self.advance();
                    self.has_space = true;
                }
                Some(b'/') if self.peek_at(1) == Some(b'/') => {
                    while !matches!(self.peek_byte(), None | Some(b'\n')) {
                        self.advance();
                    }
                    self.has_space = true;
                }
                Some(b'/') if self.peek_at(1) == Some(b'*') => {
                    let start_span = self.span();
                    self.advance();
                    self.advance();
                    loop {
                        match self.peek_byte() {
                            None => return Err(Diagnostic::new(start_span, "unterminated block comment")),
                            Some(b'*') if self.peek_at(1) == Some(b'/') => {
                                self.advance();
                                self.advance();
                                break;
                            }
                            _ => {
                                self.advance();
                            }
                        }
                    }
                    self.has_space = true;
                }
                // A GNU cpp line marker: `# <line> "<file>" [flags...]`, at
                // the start of a line. Adjusts reported location without
                // producing a token.
                Some(b'#') if self.at_bol && self.looks_like_line_marker() => {
                    self.consume_line_marker()?;
                }
                _ => return Ok(()),
            }
        }
    }

    fn looks_like_line_marker(&self) -> bool {
        let mut i = self.pos + 1;
        while matches!(self.src.get(i), Some(b' ') | Some(b'\t')) {
            i += 1;
        }
        matches!(self.src.get(i), Some(b'0'..=b'9'))
    }

    fn consume_line_marker(&mut self) -> CompileResult<()> {
        // Consume the whole line ourselves; `advance` keeps line/column
        // bookkeeping consistent for whatever follows.
        self.advance(); // '#'
        while matches!(self.peek_byte(), Some(b' ') | Some(b'\t')) {
            self.advance();
        }
        let num_start = self.pos;
        while matches!(self.peek_byte(), Some(b'0'..=b'9')) {
            self.advance();
        }
        let line_no: u32 = std::str::from_utf8(&self.src[num_start..self.pos])
            .unwrap_or("0")
            .parse()
            .unwrap_or(0);
        while matches!(self.peek_byte(), Some(b' ') | Some(b'\t')) {
            self.advance();
        }
        if self.peek_byte() == Some(b'"') {
            self.advance();
            let name_start = self.pos;
            while !matches!(self.peek_byte(), None | Some(b'"') | Some(b'\n')) {
                self.advance();
            }
            self.file = String::from_utf8_lossy(&self.src[name_start..self.pos]).into_owned();
            if self.peek_byte() == Some(b'"') {
                self.advance();
            }
        }
        while !matches!(self.peek_byte(), None | Some(b'\n')) {
            self.advance();
        }
        // The marker announces the line number of the *next* source line.
        self.line = line_no;
        self.has_space = true;
        Ok(())
    }

    fn lex_ident(&mut self) -> Token {
        let span = self.span();
        let start = self.pos;
        while matches!(self.peek_byte(), Some(b) if b.is_ascii_alphanumeric() || b == b'_') {
            self.advance();
        }
        let text = String::from_utf8_lossy(&self.src[start..self.pos]).into_owned();
        let kind = if KEYWORDS.contains(&text.as_str()) { TokenKind::Keyword } else { TokenKind::Ident };
        self.make_token(kind, text, span)
    }

    fn lex_number(&mut self) -> CompileResult<Token> {
        let span = self.span();
        let start = self.pos;
        let mut is_float = false;
        if self.peek_byte() == Some(b'0') && matches!(self.peek_at(1), Some(b'x') | Some(b'X')) {
            self.advance();
            self.advance();
            while matches!(self.peek_byte(), Some(b) if b.is_ascii_hexdigit()) {
                self.advance();
            }
        } else {
            while matches!(self.peek_byte(), Some(b'0'..=b'9')) {
                self.advance();
            }
            if self.peek_byte() == Some(b'.') {
                is_float = true;
                self.advance();
                while matches!(self.peek_byte(), Some(b'0'..=b'9')) {
                    self.advance();
                }
            }
            if matches!(self.peek_byte(), Some(b'e') | Some(b'E')) {
                is_float = true;
                self.advance();
                if matches!(self.peek_byte(), Some(b'+') | Some(b'-')) {
                    self.advance();
                }
                while matches!(self.peek_byte(), Some(b'0'..=b'9')) {
                    self.advance();
                }
            }
        }
        let digits_end = self.pos;
        let mut is_unsigned = false;
        let mut is_long = false;
        let mut is_float_suffix = false;
        loop {
            match self.peek_byte() {
                Some(b'u') | Some(b'U') => {
                    is_unsigned = true;
                    self.advance();
                }
                Some(b'l') | Some(b'L') => {
                    is_long = true;
                    self.advance();
                }
                Some(b'f') | Some(b'F') if is_float => {
                    is_float_suffix = true;
                    self.advance();
                }
                _ => break,
            }
        }
        let _ = is_float_suffix;
        let text = String::from_utf8_lossy(&self.src[start..self.pos]).into_owned();
        let lexeme = &text[..digits_end - start];
        let (int_val, float_val) = if is_float {
            let v: f64 = lexeme.parse().map_err(|_| Diagnostic::new(span.clone(), format!("invalid floating constant '{lexeme}'")))?;
            (v as i64, v)
        } else if let Some(hex) = lexeme.strip_prefix("0x").or_else(|| lexeme.strip_prefix("0X")) {
            let v = i64::from_str_radix(hex, 16).map_err(|_| Diagnostic::new(span.clone(), format!("invalid integer constant '{lexeme}'")))?;
            (v, v as f64)
        } else if lexeme.len() > 1 && lexeme.starts_with('0') {
            let v = i64::from_str_radix(&lexeme[1..], 8).map_err(|_| Diagnostic::new(span.clone(), format!("invalid octal constant '{lexeme}'")))?;
            (v, v as f64)
        } else {
            let v: i64 = lexeme.parse().map_err(|_| Diagnostic::new(span.clone(), format!("invalid integer constant '{lexeme}'")))?;
            (v, v as f64)
        };
        Ok(Token {
            kind: TokenKind::Num,
            text: text.into_boxed_str(),
            int_val,
            float_val,
            is_float,
            is_unsigned,
            is_long,
            string_val: "".into(),
            span,
            at_bol: self.consume_at_bol(),
            has_space: self.consume_has_space(),
        })
    }

    fn lex_char_literal(&mut self) -> CompileResult<Token> {
        let span = self.span();
        self.advance(); // opening '
        let value = self.read_escaped_byte('\'')?;
        if self.peek_byte() != Some(b'\'') {
            return Err(Diagnostic::new(span, "unterminated character literal"));
        }
        self.advance();
        Ok(Token {
            kind: TokenKind::Num,
            text: "'<char>'".into(),
            int_val: value as i64,
            float_val: value as f64,
            is_float: false,
            is_unsigned: false,
            is_long: false,
            string_val: "".into(),
            span,
            at_bol: self.consume_at_bol(),
            has_space: self.consume_has_space(),
        })
    }

    fn lex_string_literal(&mut self) -> CompileResult<Token> {
        let span = self.span();
        let start = self.pos;
        self.advance(); // opening quote
        let mut decoded = String::new();
        loop {
            match self.peek_byte() {
                None | Some(b'\n') => return Err(Diagnostic::new(span, "unterminated string literal")),
                Some(b'"') => {
                    self.advance();
                    break;
                }
                _ => decoded.push(self.read_escaped_byte('"')? as char),
            }
        }
        let text = String::from_utf8_lossy(&self.src[start..self.pos]).into_owned();
        Ok(Token {
            kind: TokenKind::Str,
            text: text.into_boxed_str(),
            int_val: 0,
            float_val: 0.0,
            is_float: false,
            is_unsigned: false,
            is_long: false,
            string_val: decoded.into_boxed_str(),
            span,
            at_bol: self.consume_at_bol(),
            has_space: self.consume_has_space(),
        })
    }

    /// Reads one (possibly escaped) byte of a char/string literal; `closer`
    /// is `'` or `"` only so callers can tell "it's the closing quote" from
    /// "it's an embedded one" (the other quote char needs no escape).
    fn read_escaped_byte(&mut self, closer: char) -> CompileResult<u8> {
        let span = self.span();
        match self.advance() {
            None => Err(Diagnostic::new(span, "unterminated literal")),
            Some(b'\\') => match self.advance() {
                Some(b'n') => Ok(b'\n'),
                Some(b't') => Ok(b'\t'),
                Some(b'r') => Ok(b'\r'),
                Some(b'0') => Ok(0),
                Some(b'\\') => Ok(b'\\'),
                Some(b'\'') => Ok(b'\''),
                Some(b'"') => Ok(b'"'),
                Some(b'a') => Ok(0x07),
                Some(b'b') => Ok(0x08),
                Some(b'f') => Ok(0x0C),
                Some(b'v') => Ok(0x0B),
                Some(other) => Ok(other),
                None => Err(Diagnostic::new(span, "unterminated escape sequence")),
            },
            Some(b) => {
                let _ = closer;
                Ok(b)
            }
        }
    }

    fn lex_punct(&mut self) -> CompileResult<Token> {
        let span = self.span();
        let rest = &self.src[self.pos..];
        for &p in PUNCTUATORS {
            if rest.starts_with(p.as_bytes()) {
                for _ in 0..p.len() {
                    self.advance();
                }
                return Ok(self.make_token(TokenKind::Punct, p.to_string(), span));
            }
        }
        Err(Diagnostic::new(span, format!("unrecognized character '{}'", self.peek_byte().unwrap_or(0) as char)))
    }

    fn make_token(&mut self, kind: TokenKind, text: String, span: Span) -> Token {
        Token {
            kind,
            text: text.into_boxed_str(),
            int_val: 0,
            float_val: 0.0,
            is_float: false,
            is_unsigned: false,
            is_long: false,
            string_val: "".into(),
            span,
            at_bol: self.consume_at_bol(),
            has_space: self.consume_has_space(),
        }
    }

    fn consume_at_bol(&mut self) -> bool {
        std::mem::replace(&mut self.at_bol, false)
    }

    fn consume_has_space(&mut self) -> bool {
        std::mem::replace(&mut self.has_space, false)
    }
}

/// Tokenizes `source`, whose physical filename (for diagnostics, before any
/// `# line "file"` marker overrides it) is `filename`.
pub fn lex(source: &str, filename: &str) -> CompileResult<Vec<Token>> {
    let mut lx = Lexer::new(source, filename);
    let mut tokens = Vec::new();
    loop {
        lx.skip_whitespace_and_comments()?;
        let Some(b) = lx.peek_byte() else {
            let span = lx.span();
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
                at_bol: lx.consume_at_bol(),
                has_space: lx.consume_has_space(),
            });
            break;
        };
        let tok = if b.is_ascii_alphabetic() || b == b'_' {
            lx.lex_ident()
        } else if b.is_ascii_digit() || (b == b'.' && matches!(lx.peek_at(1), Some(b'0'..=b'9'))) {
            lx.lex_number()?
        } else if b == b'\'' {
            lx.lex_char_literal()?
        } else if b == b'"' {
            lx.lex_string_literal()?
        } else {
            lx.lex_punct()?
        };
        tokens.push(tok);
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_a_simple_declaration() {
        let toks = lex("int main() { return 42; }", "t.c").unwrap();
        let kinds: Vec<_> = toks.iter().map(|t| (t.kind, t.text.to_string())).collect();
        assert_eq!(kinds[0], (TokenKind::Keyword, "int".to_string()));
        assert_eq!(kinds[1], (TokenKind::Ident, "main".to_string()));
        assert!(toks.iter().any(|t| t.kind == TokenKind::Num && t.int_val == 42));
        assert_eq!(toks.last().unwrap().kind, TokenKind::Eof);
    }

    #[test]
    fn decodes_string_escapes() {
        let toks = lex("\"a\\nb\"", "t.c").unwrap();
        assert_eq!(&*toks[0].string_val, "a\nb");
    }

    #[test]
    fn follows_gnu_line_markers() {
        let src = "int x;\n# 10 \"hdr.h\"\nint y;\n";
        let toks = lex(src, "t.c").unwrap();
        let y_tok = toks.iter().find(|t| &*t.text == "y").unwrap();
        assert_eq!(y_tok.span.file.as_ref(), "hdr.h");
        assert_eq!(y_tok.span.line, 10);
    }

    #[test]
    fn skips_comments() {
        let toks = lex("int /* c */ x; // trailing\n", "t.c").unwrap();
        assert_eq!(toks[0].text.as_ref(), "int");
        assert_eq!(toks[1].text.as_ref(), "x");
    }
}
