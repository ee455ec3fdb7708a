//! Scanner: source text to a token stream with precise spans.
//!
//! The scanner works on a canonicalized buffer (`\r\n` folded to `\n`,
//! backslash-newline splices removed, final newline guaranteed) and emits
//! one token per lexical element plus one `Newline` token per physical
//! line. The preprocessor consumes the newlines; [`strip_newlines`] removes
//! them before the stream reaches the parser.
//!
//! Every token records the buffer that owns it and its byte range, which
//! is enough to quote the offending line with a caret in diagnostics.

use crate::error::CompileError;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// A source buffer plus the path it was read from.
pub struct SourceFile {
    pub path: PathBuf,
    pub src: String,
}

/// Byte range into a [`SourceFile`].
#[derive(Clone)]
pub struct Span {
    pub file: Rc<SourceFile>,
    pub start: usize,
    pub end: usize,
}

impl Span {
    /// The source text covered by this span.
    pub fn text(&self) -> &str {
        &self.file.src[self.start..self.end]
    }

    /// 1-based line and column of the span start.
    pub fn line_col(&self) -> (usize, usize) {
        let upto = &self.file.src[..self.start];
        let line = upto.matches('\n').count() + 1;
        let col = self.start - upto.rfind('\n').map_or(0, |i| i + 1) + 1;
        (line, col)
    }

    /// The full source line containing the span start, without the newline.
    pub fn line_text(&self) -> &str {
        let src = &self.file.src;
        let begin = src[..self.start].rfind('\n').map_or(0, |i| i + 1);
        let end = src[self.start..]
            .find('\n')
            .map_or(src.len(), |i| self.start + i);
        &src[begin..end]
    }
}

impl fmt::Debug for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}..{}",
            self.file.path.display(),
            self.start,
            self.end
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// Integer or character literal.
    Num(i64),
    /// String literal, decoded bytes (no trailing NUL).
    Str(Vec<u8>),
    Ident(String),
    /// Macro parameter placeholder, only inside stored macro bodies.
    Param { index: usize, stringize: bool },

    // Keywords.
    Int,
    Char,
    Void,
    Struct,
    Typedef,
    Extern,
    If,
    Else,
    For,
    While,
    Do,
    Break,
    Return,
    Sizeof,
    Alignof,

    /// One of `+ - * / ; = ( ) , { } < > [ ] & . ! ? : | ^ % ~ #`.
    Punct(char),

    // Multi-character operators.
    Arrow,
    Inc,
    Dec,
    Shl,
    Shr,
    Le,
    Ge,
    EqEq,
    Ne,
    LogAnd,
    LogOr,
    MulEq,
    DivEq,
    ModEq,
    AddEq,
    SubEq,
    ShlEq,
    ShrEq,
    AndEq,
    XorEq,
    OrEq,

    Newline,
    Eof,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

/// Multi-character operators, longest prefixes first so that greedy
/// matching picks `<<=` over `<<` over `<`.
const SYMBOLS: &[(&str, TokenKind)] = &[
    ("<<=", TokenKind::ShlEq),
    (">>=", TokenKind::ShrEq),
    ("->", TokenKind::Arrow),
    ("++", TokenKind::Inc),
    ("--", TokenKind::Dec),
    ("<<", TokenKind::Shl),
    (">>", TokenKind::Shr),
    ("<=", TokenKind::Le),
    (">=", TokenKind::Ge),
    ("==", TokenKind::EqEq),
    ("!=", TokenKind::Ne),
    ("&&", TokenKind::LogAnd),
    ("||", TokenKind::LogOr),
    ("*=", TokenKind::MulEq),
    ("/=", TokenKind::DivEq),
    ("%=", TokenKind::ModEq),
    ("+=", TokenKind::AddEq),
    ("-=", TokenKind::SubEq),
    ("&=", TokenKind::AndEq),
    ("^=", TokenKind::XorEq),
    ("|=", TokenKind::OrEq),
];

const PUNCT: &str = "+-*/;=(),{}<>[]&.!?:|^%~#";

fn keyword(name: &str) -> Option<TokenKind> {
    let kind = match name {
        "int" => TokenKind::Int,
        "char" => TokenKind::Char,
        "void" => TokenKind::Void,
        "struct" => TokenKind::Struct,
        "typedef" => TokenKind::Typedef,
        "extern" => TokenKind::Extern,
        "if" => TokenKind::If,
        "else" => TokenKind::Else,
        "for" => TokenKind::For,
        "while" => TokenKind::While,
        "do" => TokenKind::Do,
        "break" => TokenKind::Break,
        "return" => TokenKind::Return,
        "sizeof" => TokenKind::Sizeof,
        "_Alignof" => TokenKind::Alignof,
        _ => return None,
    };
    Some(kind)
}

fn unescape(c: u8) -> u8 {
    match c {
        b'a' => 7,
        b'b' => 8,
        b'f' => 12,
        b'n' => b'\n',
        b'r' => b'\r',
        b't' => b'\t',
        b'v' => 11,
        b'e' | b'E' => 27,
        _ => c,
    }
}

/// Fold `\r\n` into `\n`, splice backslash-newline continuations and make
/// sure the buffer ends with a newline.
pub fn canonicalize(src: &str) -> String {
    let mut out = String::with_capacity(src.len());
    let mut chars = src.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\r' && chars.peek() == Some(&'\n') {
            chars.next();
            out.push('\n');
            continue;
        }
        if c == '\\' && chars.peek() == Some(&'\n') {
            chars.next();
            continue;
        }
        out.push(c);
    }
    if !out.ends_with('\n') {
        out.push('\n');
    }
    out
}

/// Read and canonicalize a source file.
pub fn read_source(path: &Path) -> Result<String, CompileError> {
    let raw = fs::read_to_string(path)
        .map_err(|e| CompileError::new(format!("cannot read {}: {}", path.display(), e)))?;
    Ok(canonicalize(&raw))
}

/// Wrap an in-memory buffer as a [`SourceFile`], canonicalizing it.
pub fn source_file(name: &str, src: &str) -> Rc<SourceFile> {
    Rc::new(SourceFile {
        path: PathBuf::from(name),
        src: canonicalize(src),
    })
}

/// Sentinel token marking the end of the top-level file.
pub fn eof_token(file: &Rc<SourceFile>) -> Token {
    let end = file.src.len();
    Token {
        kind: TokenKind::Eof,
        span: Span {
            file: Rc::clone(file),
            start: end,
            end,
        },
    }
}

/// Drop the per-line `Newline` tokens once preprocessing is done.
pub fn strip_newlines(tokens: Vec<Token>) -> Vec<Token> {
    tokens
        .into_iter()
        .filter(|t| t.kind != TokenKind::Newline)
        .collect()
}

/// Concatenate adjacent string literals into a single token.
pub fn join_string_literals(tokens: Vec<Token>) -> Vec<Token> {
    let mut out: Vec<Token> = Vec::new();
    for t in tokens {
        if let TokenKind::Str(bytes) = &t.kind {
            if let Some(Token {
                kind: TokenKind::Str(prev),
                ..
            }) = out.last_mut()
            {
                prev.extend_from_slice(bytes);
                continue;
            }
        }
        out.push(t);
    }
    out
}

struct Scanner<'a> {
    file: &'a Rc<SourceFile>,
    src: &'a [u8],
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn rest(&self) -> &[u8] {
        &self.src[self.pos..]
    }

    fn span(&self, start: usize, end: usize) -> Span {
        Span {
            file: Rc::clone(self.file),
            start,
            end,
        }
    }

    fn token(&self, kind: TokenKind, start: usize, end: usize) -> Token {
        Token {
            kind,
            span: self.span(start, end),
        }
    }

    fn err(&self, start: usize, msg: impl Into<String>) -> CompileError {
        CompileError::at(&self.span(start, start + 1), msg)
    }

    fn block_comment(&mut self) -> Result<(), CompileError> {
        let start = self.pos;
        self.pos += 2;
        while self.pos + 1 < self.src.len() {
            if self.src[self.pos] == b'*' && self.src[self.pos + 1] == b'/' {
                self.pos += 2;
                return Ok(());
            }
            self.pos += 1;
        }
        Err(self.err(start, "unclosed comment"))
    }

    fn char_literal(&mut self) -> Result<Token, CompileError> {
        let start = self.pos;
        self.pos += 1;
        let c = match self.src.get(self.pos) {
            None | Some(b'\n') => return Err(self.err(start, "unclosed character literal")),
            Some(b'\\') => {
                self.pos += 1;
                match self.src.get(self.pos) {
                    None | Some(b'\n') => {
                        return Err(self.err(start, "unclosed character literal"));
                    }
                    Some(&e) => {
                        self.pos += 1;
                        unescape(e)
                    }
                }
            }
            Some(&c) => {
                self.pos += 1;
                c
            }
        };
        if self.src.get(self.pos) != Some(&b'\'') {
            return Err(self.err(start, "unclosed character literal"));
        }
        self.pos += 1;
        Ok(self.token(TokenKind::Num(c as i64), start, self.pos))
    }

    fn string_literal(&mut self) -> Result<Token, CompileError> {
        let start = self.pos;
        self.pos += 1;
        let mut bytes = Vec::new();
        loop {
            match self.src.get(self.pos) {
                None | Some(b'\n') => return Err(self.err(start, "unclosed string literal")),
                Some(b'"') => {
                    self.pos += 1;
                    return Ok(self.token(TokenKind::Str(bytes), start, self.pos));
                }
                Some(b'\\') => {
                    self.pos += 1;
                    match self.src.get(self.pos) {
                        None | Some(b'\n') => {
                            return Err(self.err(start, "unclosed string literal"));
                        }
                        Some(&e) => {
                            bytes.push(unescape(e));
                            self.pos += 1;
                        }
                    }
                }
                Some(&c) => {
                    bytes.push(c);
                    self.pos += 1;
                }
            }
        }
    }

    fn symbol(&mut self) -> Option<Token> {
        for (sym, kind) in SYMBOLS {
            if self.rest().starts_with(sym.as_bytes()) {
                let start = self.pos;
                self.pos += sym.len();
                return Some(self.token(kind.clone(), start, self.pos));
            }
        }
        None
    }

    fn digits(&mut self, pred: fn(&u8) -> bool) -> String {
        let start = self.pos;
        while self.src.get(self.pos).is_some_and(pred) {
            self.pos += 1;
        }
        self.src[start..self.pos]
            .iter()
            .map(|&b| b as char)
            .collect()
    }

    fn number(&mut self) -> Result<Token, CompileError> {
        let start = self.pos;
        let val = if self.rest().starts_with(b"0x") || self.rest().starts_with(b"0X") {
            self.pos += 2;
            let digits = self.digits(u8::is_ascii_hexdigit);
            if digits.is_empty() {
                return Err(self.err(start, "bad hexadecimal number"));
            }
            i64::from_str_radix(&digits, 16)
                .map_err(|_| self.err(start, "number literal out of range"))?
        } else if self.src[self.pos] == b'0' {
            self.pos += 1;
            let digits = self.digits(|b| (b'0'..=b'7').contains(b));
            if digits.is_empty() {
                0
            } else {
                i64::from_str_radix(&digits, 8)
                    .map_err(|_| self.err(start, "number literal out of range"))?
            }
        } else {
            let digits = self.digits(u8::is_ascii_digit);
            digits
                .parse::<i64>()
                .map_err(|_| self.err(start, "number literal out of range"))?
        };
        Ok(self.token(TokenKind::Num(val), start, self.pos))
    }

    fn ident(&mut self) -> Token {
        let start = self.pos;
        while self
            .src
            .get(self.pos)
            .is_some_and(|&b| b == b'_' || b.is_ascii_alphanumeric())
        {
            self.pos += 1;
        }
        let name: String = self.src[start..self.pos]
            .iter()
            .map(|&b| b as char)
            .collect();
        let kind = keyword(&name).unwrap_or(TokenKind::Ident(name));
        self.token(kind, start, self.pos)
    }
}

/// Scan one canonicalized buffer into tokens. No `Eof` sentinel is
/// appended; the driver adds one for the top-level file only, so included
/// files splice cleanly.
pub fn scan(file: &Rc<SourceFile>) -> Result<Vec<Token>, CompileError> {
    let mut s = Scanner {
        file,
        src: file.src.as_bytes(),
        pos: 0,
    };
    let mut tokens = Vec::new();

    while s.pos < s.src.len() {
        let c = s.src[s.pos];

        if c == b'\n' {
            tokens.push(s.token(TokenKind::Newline, s.pos, s.pos + 1));
            s.pos += 1;
            continue;
        }
        if c.is_ascii_whitespace() {
            s.pos += 1;
            continue;
        }
        if s.rest().starts_with(b"//") {
            while s.pos < s.src.len() && s.src[s.pos] != b'\n' {
                s.pos += 1;
            }
            continue;
        }
        if s.rest().starts_with(b"/*") {
            s.block_comment()?;
            continue;
        }
        if c == b'\'' {
            tokens.push(s.char_literal()?);
            continue;
        }
        if c == b'"' {
            tokens.push(s.string_literal()?);
            continue;
        }
        if let Some(tok) = s.symbol() {
            tokens.push(tok);
            continue;
        }
        if PUNCT.contains(c as char) {
            tokens.push(s.token(TokenKind::Punct(c as char), s.pos, s.pos + 1));
            s.pos += 1;
            continue;
        }
        if c.is_ascii_digit() {
            tokens.push(s.number()?);
            continue;
        }
        if c == b'_' || c.is_ascii_alphabetic() {
            tokens.push(s.ident());
            continue;
        }
        return Err(s.err(s.pos, format!("cannot tokenize: {}", c as char)));
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        let file = source_file("test.c", src);
        let tokens = strip_newlines(scan(&file).unwrap());
        tokens.into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_scan_basic() {
        assert_eq!(
            kinds("int a = 42;"),
            vec![
                TokenKind::Int,
                TokenKind::Ident("a".to_string()),
                TokenKind::Punct('='),
                TokenKind::Num(42),
                TokenKind::Punct(';'),
            ]
        );
    }

    #[test]
    fn test_scan_operators_greedy() {
        assert_eq!(
            kinds("x <<= y >> 2 < 3"),
            vec![
                TokenKind::Ident("x".to_string()),
                TokenKind::ShlEq,
                TokenKind::Ident("y".to_string()),
                TokenKind::Shr,
                TokenKind::Num(2),
                TokenKind::Punct('<'),
                TokenKind::Num(3),
            ]
        );
        assert_eq!(
            kinds("a->b++"),
            vec![
                TokenKind::Ident("a".to_string()),
                TokenKind::Arrow,
                TokenKind::Ident("b".to_string()),
                TokenKind::Inc,
            ]
        );
    }

    #[test]
    fn test_scan_number_bases() {
        assert_eq!(
            kinds("10 0x1F 0X1f 017 0"),
            vec![
                TokenKind::Num(10),
                TokenKind::Num(31),
                TokenKind::Num(31),
                TokenKind::Num(15),
                TokenKind::Num(0),
            ]
        );
    }

    #[test]
    fn test_scan_bad_hex() {
        let file = source_file("test.c", "0x;");
        let err = scan(&file).unwrap_err();
        assert!(err.message().contains("bad hexadecimal number"));
    }

    #[test]
    fn test_scan_char_literals() {
        assert_eq!(
            kinds(r"'A' '\n' '\\' '\e'"),
            vec![
                TokenKind::Num(65),
                TokenKind::Num(10),
                TokenKind::Num(92),
                TokenKind::Num(27),
            ]
        );
    }

    #[test]
    fn test_scan_string_escapes() {
        assert_eq!(
            kinds(r#""a\tb\"c""#),
            vec![TokenKind::Str(b"a\tb\"c".to_vec())]
        );
    }

    #[test]
    fn test_scan_unclosed_string() {
        let file = source_file("test.c", "\"abc\nint x;");
        let err = scan(&file).unwrap_err();
        assert!(err.message().contains("unclosed string literal"));
    }

    #[test]
    fn test_scan_unclosed_comment() {
        let file = source_file("test.c", "/* no end");
        let err = scan(&file).unwrap_err();
        assert!(err.message().contains("unclosed comment"));
    }

    #[test]
    fn test_scan_comments_skipped() {
        assert_eq!(
            kinds("1 // line\n/* block\nstill */ 2"),
            vec![TokenKind::Num(1), TokenKind::Num(2)]
        );
    }

    #[test]
    fn test_keywords_and_idents() {
        assert_eq!(
            kinds("return returned _Alignof intx"),
            vec![
                TokenKind::Return,
                TokenKind::Ident("returned".to_string()),
                TokenKind::Alignof,
                TokenKind::Ident("intx".to_string()),
            ]
        );
    }

    #[test]
    fn test_join_string_literals() {
        assert_eq!(
            kinds("\"ab\" \"cd\" 1"),
            vec![
                TokenKind::Str(b"ab".to_vec()),
                TokenKind::Str(b"cd".to_vec()),
                TokenKind::Num(1),
            ]
        );
        let file = source_file("test.c", "\"ab\" \"cd\" 1");
        let tokens = join_string_literals(strip_newlines(scan(&file).unwrap()));
        let got: Vec<TokenKind> = tokens.into_iter().map(|t| t.kind).collect();
        assert_eq!(got, vec![TokenKind::Str(b"abcd".to_vec()), TokenKind::Num(1)]);
    }

    #[test]
    fn test_canonicalize() {
        assert_eq!(canonicalize("a\r\nb"), "a\nb\n");
        assert_eq!(canonicalize("ab\\\ncd"), "abcd\n");
        assert_eq!(canonicalize("x\n"), "x\n");
    }

    #[test]
    fn test_span_line_col() {
        let file = source_file("test.c", "int x;\n  foo\n");
        let tokens = strip_newlines(scan(&file).unwrap());
        let foo = &tokens[3];
        assert_eq!(foo.span.text(), "foo");
        assert_eq!(foo.span.line_col(), (2, 3));
        assert_eq!(foo.span.line_text(), "  foo");
    }

    #[test]
    fn test_unknown_character() {
        let file = source_file("test.c", "int @;");
        let err = scan(&file).unwrap_err();
        assert!(err.message().contains("cannot tokenize"));
    }
}
