//! Compilation errors with source-anchored diagnostics.
//!
//! Every pipeline stage returns `Result<T, CompileError>`. An error that
//! carries a [`Span`] renders as
//!
//! ```text
//! error at <path>:<line>:<col>
//!
//! <source line>
//!      ^
//!
//! <message>
//! ```
//!
//! with 1-based line and column. Errors without a position (I/O failures,
//! register exhaustion) render as `error: <message>`.

use crate::scanner::Span;
use std::fmt;

#[derive(Debug)]
pub struct CompileError {
    msg: String,
    span: Option<Span>,
}

impl CompileError {
    /// Error with no source position.
    pub fn new(msg: impl Into<String>) -> Self {
        CompileError {
            msg: msg.into(),
            span: None,
        }
    }

    /// Error pointing at a span of the input.
    pub fn at(span: &Span, msg: impl Into<String>) -> Self {
        CompileError {
            msg: msg.into(),
            span: Some(span.clone()),
        }
    }

    /// The bare message, without the quoted source line.
    pub fn message(&self) -> &str {
        &self.msg
    }

    pub fn span(&self) -> Option<&Span> {
        self.span.as_ref()
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.span {
            Some(span) => {
                let (line, col) = span.line_col();
                writeln!(
                    f,
                    "error at {}:{}:{}",
                    span.file.path.display(),
                    line,
                    col
                )?;
                writeln!(f)?;
                writeln!(f, "{}", span.line_text())?;
                writeln!(f, "{}^", " ".repeat(col - 1))?;
                writeln!(f)?;
                write!(f, "{}", self.msg)
            }
            None => write!(f, "error: {}", self.msg),
        }
    }
}

impl std::error::Error for CompileError {}

// Lets emitters that build text with `write!` use `?` directly.
impl From<fmt::Error> for CompileError {
    fn from(e: fmt::Error) -> Self {
        CompileError::new(format!("formatting error: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::SourceFile;
    use std::path::PathBuf;
    use std::rc::Rc;

    #[test]
    fn test_plain_error_display() {
        let e = CompileError::new("register exhausted");
        assert_eq!(e.to_string(), "error: register exhausted");
    }

    #[test]
    fn test_caret_rendering() {
        let file = Rc::new(SourceFile {
            path: PathBuf::from("t.c"),
            src: "int main() {\n  return $;\n}\n".to_string(),
        });
        // Span of the '$' on line 2, column 10.
        let start = file.src.find('$').unwrap();
        let span = Span {
            file,
            start,
            end: start + 1,
        };
        let e = CompileError::at(&span, "cannot tokenize: $");
        let rendered = e.to_string();
        assert_eq!(
            rendered,
            "error at t.c:2:10\n\n  return $;\n         ^\n\ncannot tokenize: $"
        );
    }
}
