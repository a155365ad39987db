//! Error types for every stage of the pipeline: lexing/parsing (front end,
//! not part of the in-scope core), annotation (compile errors, accumulated),
//! and the interpreter's fatal errors. Ordinary command failure is not an
//! error type at all -- it is the `bool` returned by `run_cmd`/`eval_expr`.

use std::fmt;

/// A single accumulated compile-time diagnostic from the annotator.
///
/// Mirrors `limerr(msg0, msg1, line)` from the source: message text plus an
/// optional source line (`0` means "no line", matching the original's
/// sentinel).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
    pub message: String,
    pub line: u32,
}

impl CompileError {
    pub fn new(message: impl Into<String>, line: u32) -> Self {
        CompileError {
            message: message.into(),
            line,
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.line != 0 {
            write!(f, "{} near line {}", self.message, self.line)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

/// Errors from the minimal internal lexer/parser front end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    UnexpectedChar(char, u32),
    UnexpectedEof,
    UnexpectedToken(String, u32),
    ExpectedIdent(u32),
    InvalidIntLiteral(String, u32),
    UnterminatedString(u32),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::UnexpectedChar(c, line) => {
                write!(f, "unexpected character '{}' near line {}", c, line)
            }
            ParseError::UnexpectedEof => write!(f, "unexpected end of file"),
            ParseError::UnexpectedToken(tok, line) => {
                write!(f, "unexpected token '{}' near line {}", tok, line)
            }
            ParseError::ExpectedIdent(line) => {
                write!(f, "expected identifier near line {}", line)
            }
            ParseError::InvalidIntLiteral(s, line) => {
                write!(f, "invalid integer literal '{}' near line {}", s, line)
            }
            ParseError::UnterminatedString(line) => {
                write!(f, "unterminated string constant near line {}", line)
            }
        }
    }
}

impl std::error::Error for ParseError {}

/// Fatal runtime errors (source.c equivalent would just `abort()`). These
/// always terminate the process with exit status 2 (`spec.md` §7.3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    Abort {
        line: u32,
        chars_read: u32,
        chars_written: u32,
    },
    DivisionByZero {
        line: u32,
    },
    ModByZero {
        line: u32,
    },
    SentinelMismatch,
    Io(String),
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::Abort {
                line,
                chars_read,
                chars_written,
            } => write!(
                f,
                "aborted at line {}, read {} chars, wrote {} chars",
                line, chars_read, chars_written
            ),
            RuntimeError::DivisionByZero { line } => {
                write!(f, "division by zero near line {}", line)
            }
            RuntimeError::ModByZero { line } => write!(f, "mod by zero near line {}", line),
            RuntimeError::SentinelMismatch => {
                write!(f, "internal error: frame-pointer sentinel mismatch on restore")
            }
            RuntimeError::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for RuntimeError {}
