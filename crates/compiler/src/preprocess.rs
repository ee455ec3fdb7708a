//! Token-level C preprocessor.
//!
//! Supports object-like and function-like `#define`, `#` stringizing of
//! macro parameters, `__LINE__`, and `#include "path"`. Macro bodies are
//! stored as token vectors with parameter identifiers rewritten to
//! placeholder tokens at definition time; expansion is a single-level
//! splice of the argument token sequences.
//!
//! `#include` scans the named file (resolved against the current working
//! directory, then the configured search directories) and recursively
//! preprocesses it, splicing the result at the point of inclusion. The
//! macro table is shared across includes. Diagnostics keep pointing into
//! the right buffer because every token's span owns its source file.

use crate::config::CompilerConfig;
use crate::error::CompileError;
use crate::scanner::{self, SourceFile, Token, TokenKind};
use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;

#[derive(Debug, Clone)]
enum MacroKind {
    Objlike,
    Funclike { nparams: usize },
}

#[derive(Debug, Clone)]
struct Macro {
    kind: MacroKind,
    body: Vec<Token>,
}

/// Cursor over an input token vector.
struct Stream {
    input: Vec<Token>,
    pos: usize,
}

impl Stream {
    fn new(input: Vec<Token>) -> Self {
        Stream { input, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.input.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.input.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn next_or(&mut self, msg: &str) -> Result<Token, CompileError> {
        self.next().ok_or_else(|| CompileError::new(msg.to_string()))
    }

    fn get_ident(&mut self, msg: &str) -> Result<(String, Token), CompileError> {
        let t = self.next_or(msg)?;
        match &t.kind {
            TokenKind::Ident(name) => {
                let name = name.clone();
                Ok((name, t))
            }
            _ => Err(CompileError::at(&t.span, msg)),
        }
    }

    fn consume_punct(&mut self, c: char) -> bool {
        if self.peek().is_some_and(|t| t.kind == TokenKind::Punct(c)) {
            self.pos += 1;
            return true;
        }
        false
    }

    fn expect_punct(&mut self, c: char, msg: &str) -> Result<(), CompileError> {
        let t = self.next_or(msg)?;
        if t.kind != TokenKind::Punct(c) {
            return Err(CompileError::at(&t.span, msg));
        }
        Ok(())
    }
}

pub struct Preprocessor {
    macros: HashMap<String, Macro>,
    include_dirs: Vec<PathBuf>,
}

impl Preprocessor {
    pub fn new(config: &CompilerConfig) -> Self {
        Preprocessor {
            macros: HashMap::new(),
            include_dirs: config.include_dirs.clone(),
        }
    }

    /// Expand macros and splice includes. Newline tokens pass through and
    /// are stripped later by the driver.
    pub fn preprocess(&mut self, tokens: Vec<Token>) -> Result<Vec<Token>, CompileError> {
        let mut st = Stream::new(tokens);
        let mut out = Vec::new();

        while let Some(t) = st.next() {
            if let TokenKind::Ident(name) = &t.kind {
                if self.macros.contains_key(name) {
                    let name = name.clone();
                    self.apply(&name, &t, &mut st, &mut out)?;
                    continue;
                }
            }

            if t.kind != TokenKind::Punct('#') {
                out.push(t);
                continue;
            }

            let (directive, dtok) = st.get_ident("identifier expected")?;
            match directive.as_str() {
                "define" => self.define(&mut st)?,
                "include" => self.include(&mut st, &mut out)?,
                _ => return Err(CompileError::at(&dtok.span, "unknown directive")),
            }
        }
        Ok(out)
    }

    fn define(&mut self, st: &mut Stream) -> Result<(), CompileError> {
        let (name, _) = st.get_ident("macro name expected")?;

        if st.consume_punct('(') {
            let mut params: Vec<String> = Vec::new();
            if !st.consume_punct(')') {
                loop {
                    let (p, _) = st.get_ident("parameter name expected")?;
                    params.push(p);
                    if st.consume_punct(')') {
                        break;
                    }
                    st.expect_punct(',', "comma expected")?;
                }
            }
            let body = mark_params(read_until_newline(st), &params);
            self.macros.insert(
                name,
                Macro {
                    kind: MacroKind::Funclike {
                        nparams: params.len(),
                    },
                    body,
                },
            );
        } else {
            let body = read_until_newline(st);
            self.macros.insert(
                name,
                Macro {
                    kind: MacroKind::Objlike,
                    body,
                },
            );
        }
        Ok(())
    }

    fn apply(
        &mut self,
        name: &str,
        start: &Token,
        st: &mut Stream,
        out: &mut Vec<Token>,
    ) -> Result<(), CompileError> {
        let Some(mac) = self.macros.get(name).cloned() else {
            return Ok(());
        };
        match mac.kind {
            MacroKind::Objlike => {
                for t in &mac.body {
                    out.push(expand_token(t, start));
                }
            }
            MacroKind::Funclike { nparams } => {
                let args = read_args(st, start)?;
                if args.len() != nparams {
                    return Err(CompileError::at(
                        &start.span,
                        format!(
                            "macro {} expects {} arguments, got {}",
                            name,
                            nparams,
                            args.len()
                        ),
                    ));
                }
                for t in &mac.body {
                    match &t.kind {
                        TokenKind::Param { index, stringize } => {
                            if *stringize {
                                out.push(stringize_tokens(&args[*index], start));
                            } else {
                                out.extend(args[*index].iter().cloned());
                            }
                        }
                        _ => out.push(expand_token(t, start)),
                    }
                }
            }
        }
        Ok(())
    }

    fn include(&mut self, st: &mut Stream, out: &mut Vec<Token>) -> Result<(), CompileError> {
        let t = st.next_or("string expected")?;
        let TokenKind::Str(bytes) = &t.kind else {
            return Err(CompileError::at(&t.span, "string expected"));
        };
        let rel = String::from_utf8_lossy(bytes).into_owned();
        let nl = st.next_or("newline expected")?;
        if nl.kind != TokenKind::Newline {
            return Err(CompileError::at(&nl.span, "newline expected"));
        }

        let path = self.resolve(&rel).ok_or_else(|| {
            CompileError::at(&t.span, format!("cannot find include file: {}", rel))
        })?;
        let src = scanner::read_source(&path)?;
        let file = Rc::new(SourceFile { path, src });
        let tokens = scanner::scan(&file)?;
        let tokens = self.preprocess(tokens)?;
        out.extend(tokens);
        Ok(())
    }

    fn resolve(&self, rel: &str) -> Option<PathBuf> {
        let direct = PathBuf::from(rel);
        if direct.exists() {
            return Some(direct);
        }
        for dir in &self.include_dirs {
            let p = dir.join(rel);
            if p.exists() {
                return Some(p);
            }
        }
        None
    }
}

fn read_until_newline(st: &mut Stream) -> Vec<Token> {
    let mut body = Vec::new();
    while let Some(t) = st.next() {
        if t.kind == TokenKind::Newline {
            break;
        }
        body.push(t);
    }
    body
}

/// Rewrite parameter identifiers in a macro body into placeholders, and
/// fold `#` before a placeholder into its stringize flag.
fn mark_params(body: Vec<Token>, params: &[String]) -> Vec<Token> {
    let index: HashMap<&str, usize> = params
        .iter()
        .enumerate()
        .map(|(i, p)| (p.as_str(), i))
        .collect();

    let replaced: Vec<Token> = body
        .into_iter()
        .map(|mut t| {
            if let TokenKind::Ident(name) = &t.kind {
                if let Some(&i) = index.get(name.as_str()) {
                    t.kind = TokenKind::Param {
                        index: i,
                        stringize: false,
                    };
                }
            }
            t
        })
        .collect();

    let mut out = Vec::with_capacity(replaced.len());
    let mut iter = replaced.into_iter().peekable();
    while let Some(t) = iter.next() {
        if t.kind == TokenKind::Punct('#') {
            if let Some(next) = iter.peek_mut() {
                if let TokenKind::Param { stringize, .. } = &mut next.kind {
                    *stringize = true;
                    continue;
                }
            }
        }
        out.push(t);
    }
    out
}

/// `__LINE__` in a macro body becomes the call-site line number.
fn expand_token(t: &Token, start: &Token) -> Token {
    if let TokenKind::Ident(name) = &t.kind {
        if name == "__LINE__" {
            let (line, _) = start.span.line_col();
            return Token {
                kind: TokenKind::Num(line as i64),
                span: start.span.clone(),
            };
        }
    }
    t.clone()
}

/// One argument of a function-like macro call: tokens up to an unnested
/// `,` or `)`. Commas inside nested parentheses do not split.
fn read_one_arg(st: &mut Stream, start: &Token) -> Result<Vec<Token>, CompileError> {
    let mut arg = Vec::new();
    let mut level = 0;
    while let Some(t) = st.peek() {
        if level == 0
            && (t.kind == TokenKind::Punct(')') || t.kind == TokenKind::Punct(','))
        {
            return Ok(arg);
        }
        let Some(t) = st.next() else { break };
        if t.kind == TokenKind::Punct('(') {
            level += 1;
        } else if t.kind == TokenKind::Punct(')') {
            level -= 1;
        }
        arg.push(t);
    }
    Err(CompileError::at(&start.span, "unclosed macro argument"))
}

fn read_args(st: &mut Stream, start: &Token) -> Result<Vec<Vec<Token>>, CompileError> {
    st.expect_punct('(', "macro arguments expected")?;
    let mut args = Vec::new();
    if st.consume_punct(')') {
        return Ok(args);
    }
    args.push(read_one_arg(st, start)?);
    while !st.consume_punct(')') {
        st.expect_punct(',', "comma expected")?;
        args.push(read_one_arg(st, start)?);
    }
    Ok(args)
}

/// A single string token whose text is the space-separated original
/// spelling of the argument tokens.
fn stringize_tokens(tokens: &[Token], start: &Token) -> Token {
    let text = tokens
        .iter()
        .map(|t| t.span.text())
        .collect::<Vec<_>>()
        .join(" ");
    Token {
        kind: TokenKind::Str(text.into_bytes()),
        span: start.span.clone(),
    }
}
