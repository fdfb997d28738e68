//! Error types shared by every layer of the engine.
//!
//! Two classes exist: structural errors, raised while the program text is
//! split, tokenized and compiled, and runtime errors, raised while records are
//! processed.  Both abort the run.

use thiserror::Error;

use crate::config::ConfigError;

/// Crate-level error returned by the public entry points.
#[derive(Debug, Error)]
pub enum SpecsError {
    /// The program could not be parsed.  `line` is set when the source came
    /// from a file.
    #[error("{}", located(.message, .line))]
    Parse { message: String, line: Option<usize> },

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn located(message: &str, line: &Option<usize>) -> String {
    match line {
        Some(l) => format!("line {l}: {message}"),
        None => message.to_owned(),
    }
}

impl SpecsError {
    pub fn parse(message: impl Into<String>) -> Self {
        SpecsError::Parse { message: message.into(), line: None }
    }

    pub fn parse_at(message: impl Into<String>, line: usize) -> Self {
        SpecsError::Parse { message: message.into(), line: Some(line) }
    }

    /// `true` for errors detected before any record was processed.
    pub fn is_structural(&self) -> bool {
        matches!(self, SpecsError::Parse { .. })
    }
}

/// Errors raised while a compiled program runs.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeError {
    #[error("Operand '{value}' of '{op}' is not numeric")]
    NotNumeric { op: String, value: String },

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Modulo by zero")]
    ModuloByZero,

    #[error("Integer overflow in '{0}'")]
    IntegerOverflow(String),

    #[error("Unrecognized function {0}")]
    UnknownFunction(String),

    #[error("{name}: expected {expected} argument(s), got {got}")]
    ArgumentCount { name: String, expected: String, got: usize },

    #[error("{name}: {message}")]
    InvalidArgument { name: String, message: String },

    #[error("Configuration literal '@{0}' is not defined")]
    UnknownConfig(String),

    #[error("Field Identifier {0} not defined yet.")]
    FieldNotDefined(char),

    #[error("Field Identifier {0} redefined.")]
    FieldRedefined(char),

    #[error("ALU assignment statements must begin with a counter. Got {0} instead.")]
    AssignmentTarget(String),

    #[error("Assertion failed: {0}")]
    AssertionFailed(String),

    #[error("{0}")]
    Abend(String),

    #[error("READ past the end of input stream {0}")]
    ReadPastEnd(usize),

    #[error("UNREAD called twice on input stream {0}")]
    DoubleUnread(usize),

    #[error("Input stream {0} ended before the other input streams")]
    StreamMismatch(usize),

    #[error("Input stream {0} is not defined")]
    UnknownInputStream(usize),

    #[error("Output stream {0} is not defined")]
    UnknownOutputStream(usize),

    #[error("{0}")]
    External(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl RuntimeError {
    pub fn invalid(name: &str, message: impl Into<String>) -> Self {
        RuntimeError::InvalidArgument { name: name.to_owned(), message: message.into() }
    }
}

impl From<std::io::Error> for RuntimeError {
    fn from(e: std::io::Error) -> Self {
        RuntimeError::Io(e.to_string())
    }
}

/// Convenience alias for runtime results.
pub type RtResult<T> = Result<T, RuntimeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_messages_match_diagnostics() {
        assert_eq!(
            RuntimeError::FieldNotDefined('a').to_string(),
            "Field Identifier a not defined yet."
        );
        assert_eq!(RuntimeError::FieldRedefined('b').to_string(), "Field Identifier b redefined.");
    }

    #[test]
    fn parse_error_carries_line() {
        let e = SpecsError::parse_at("Missing delimiter at end of input", 3);
        assert_eq!(e.to_string(), "line 3: Missing delimiter at end of input");
        assert!(e.is_structural());
        assert!(!SpecsError::from(RuntimeError::DivisionByZero).is_structural());
    }
}
