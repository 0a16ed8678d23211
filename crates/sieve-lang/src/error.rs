//! Error types for parsing and evaluation.

use crate::span::{offset_to_line_col, Span};
use thiserror::Error;

/// Error during lexing or parsing.
#[derive(Debug, Clone, PartialEq, Error)]
pub struct ParseError {
    /// The error message.
    pub message: String,
    /// Source span where the error occurred.
    pub span: Span,
    /// Optional hint for fixing the error.
    pub hint: Option<String>,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at offset {}", self.message, self.span.start)
    }
}

impl ParseError {
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
            hint: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Render the error with the offending source line and a caret.
    pub fn format_with_source(&self, source: &str) -> String {
        let (line, col) = offset_to_line_col(source, self.span.start);
        let mut out = format!("error: {}\n  --> line {}:{}\n", self.message, line, col);

        if let Some(source_line) = source.lines().nth(line - 1) {
            out.push_str(&format!("   |\n{:3}| {}\n   |", line, source_line));
            out.push_str(&" ".repeat(col));
            out.push('^');
            let remaining = source_line.len().saturating_sub(col - 1);
            let underline = self.span.len().min(remaining);
            if underline > 1 {
                out.push_str(&"~".repeat(underline - 1));
            }
            out.push('\n');
        }

        if let Some(hint) = &self.hint {
            out.push_str(&format!("   = hint: {}\n", hint));
        }
        out
    }
}

/// Error while evaluating an expression against bound variables.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    /// An identifier has no binding.
    #[error("'{0}' is not defined")]
    FieldNotFound(String),

    /// The top-level result was not a boolean.
    #[error("expression must evaluate to a boolean, got {0}")]
    BoolOnly(&'static str),

    /// Operand types do not fit the operator.
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("integer overflow")]
    Overflow,

    /// A positional parameter was referenced without a value.
    #[error("parameter ${0} is not bound")]
    UnboundParameter(usize),
}
