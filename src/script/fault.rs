//! Errors raised while lexing, parsing and running scripts.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use thiserror::Error;

/// File label used for frames of host-registered native functions.
pub const NATIVE_FILE: &str = "<native>";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (line {line}, column {column})")]
pub struct SyntaxError {
    pub message: String,
    pub line: usize,
    pub column: usize,
}

impl SyntaxError {
    pub fn new(message: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            message: message.into(),
            line,
            column,
        }
    }
}

/// One entry of the call chain at the point an error was raised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub file: String,
    pub line: usize,
    pub function: String,
    pub code_text: Option<String>,
}

/// Closed taxonomy of runtime failures.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ErrorKind {
    #[error("division by zero in `{operation}`")]
    DivisionByZero { operation: String },

    #[error("unsupported operand type(s) for {operation}: expected {expected}, found {found}")]
    TypeMismatch {
        operation: String,
        expected: String,
        found: String,
    },

    #[error("name `{name}` is not defined")]
    UndefinedName { name: String, available: Vec<String> },

    #[error("key {key:?} not found")]
    KeyNotFound { key: String, available: Vec<String> },

    #[error("index {index} out of range for length {length}")]
    IndexOutOfRange { index: i64, length: usize },

    #[error("{target} has no attribute `{attribute}`")]
    AttributeMissing {
        target: String,
        attribute: String,
        available: Vec<String>,
    },

    #[error("invalid {expected} input {preview:?} at position {position}: {reason}")]
    InvalidInput {
        expected: String,
        preview: String,
        position: usize,
        reason: String,
    },

    #[error("I/O error on {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("{operation} timed out after {timeout_ms} ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("network error during {request}: {reason}")]
    Network { request: String, reason: String },

    #[error("{function}() takes {expected} argument(s) but {given} were given")]
    ArityMismatch {
        function: String,
        expected: String,
        given: usize,
    },

    #[error("{function}() missing required argument `{parameter}`")]
    MissingArgument { function: String, parameter: String },

    #[error("{function}() got an unexpected argument `{argument}`")]
    UnexpectedArgument { function: String, argument: String },

    #[error("{function}() got multiple values for argument `{argument}`")]
    DuplicateArgument { function: String, argument: String },

    #[error("maximum recursion depth of {limit} exceeded")]
    RecursionLimit { limit: usize },

    #[error("step budget of {limit} exhausted")]
    StepLimit { limit: u64 },

    #[error("{message}")]
    Raised { message: String },

    #[error("{message}")]
    Other { message: String },
}

impl ErrorKind {
    pub fn other(message: impl Into<String>) -> Self {
        ErrorKind::Other {
            message: message.into(),
        }
    }

    pub fn type_mismatch(operation: impl Into<String>, expected: impl Into<String>, found: impl Into<String>) -> Self {
        ErrorKind::TypeMismatch {
            operation: operation.into(),
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Stable variant name, used as the `kind` of captured errors.
    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::DivisionByZero { .. } => "DivisionByZero",
            ErrorKind::TypeMismatch { .. } => "TypeMismatch",
            ErrorKind::UndefinedName { .. } => "UndefinedName",
            ErrorKind::KeyNotFound { .. } => "KeyNotFound",
            ErrorKind::IndexOutOfRange { .. } => "IndexOutOfRange",
            ErrorKind::AttributeMissing { .. } => "AttributeMissing",
            ErrorKind::InvalidInput { .. } => "InvalidInput",
            ErrorKind::Io { .. } => "Io",
            ErrorKind::Timeout { .. } => "Timeout",
            ErrorKind::Network { .. } => "Network",
            ErrorKind::ArityMismatch { .. } => "ArityMismatch",
            ErrorKind::MissingArgument { .. } => "MissingArgument",
            ErrorKind::UnexpectedArgument { .. } => "UnexpectedArgument",
            ErrorKind::DuplicateArgument { .. } => "DuplicateArgument",
            ErrorKind::RecursionLimit { .. } => "RecursionLimit",
            ErrorKind::StepLimit { .. } => "StepLimit",
            ErrorKind::Raised { .. } => "Raised",
            ErrorKind::Other { .. } => "Other",
        }
    }

    /// True for failures caused by how a function was called rather than by its body.
    pub fn is_binding_error(&self) -> bool {
        matches!(
            self,
            ErrorKind::ArityMismatch { .. }
                | ErrorKind::MissingArgument { .. }
                | ErrorKind::UnexpectedArgument { .. }
                | ErrorKind::DuplicateArgument { .. }
        )
    }

    /// Public fields of the error, stringified.
    pub fn attributes(&self) -> BTreeMap<String, String> {
        let mut attrs = BTreeMap::new();
        let mut put = |key: &str, value: String| {
            attrs.insert(key.to_string(), value);
        };

        match self {
            ErrorKind::DivisionByZero { operation } => put("operation", operation.clone()),
            ErrorKind::TypeMismatch {
                operation,
                expected,
                found,
            } => {
                put("operation", operation.clone());
                put("expected", expected.clone());
                put("found", found.clone());
            }
            ErrorKind::UndefinedName { name, available } => {
                put("name", name.clone());
                put("available", available.join(", "));
            }
            ErrorKind::KeyNotFound { key, available } => {
                put("key", key.clone());
                put("available", available.join(", "));
            }
            ErrorKind::IndexOutOfRange { index, length } => {
                put("index", index.to_string());
                put("length", length.to_string());
            }
            ErrorKind::AttributeMissing {
                target,
                attribute,
                available,
            } => {
                put("target", target.clone());
                put("attribute", attribute.clone());
                put("available", available.join(", "));
            }
            ErrorKind::InvalidInput {
                expected,
                preview,
                position,
                reason,
            } => {
                put("expected", expected.clone());
                put("preview", preview.clone());
                put("position", position.to_string());
                put("reason", reason.clone());
            }
            ErrorKind::Io { path, reason } => {
                put("path", path.clone());
                put("reason", reason.clone());
            }
            ErrorKind::Timeout {
                operation,
                timeout_ms,
            } => {
                put("operation", operation.clone());
                put("timeout_ms", timeout_ms.to_string());
            }
            ErrorKind::Network { request, reason } => {
                put("request", request.clone());
                put("reason", reason.clone());
            }
            ErrorKind::ArityMismatch {
                function,
                expected,
                given,
            } => {
                put("function", function.clone());
                put("expected", expected.clone());
                put("given", given.to_string());
            }
            ErrorKind::MissingArgument {
                function,
                parameter,
            } => {
                put("function", function.clone());
                put("parameter", parameter.clone());
            }
            ErrorKind::UnexpectedArgument { function, argument }
            | ErrorKind::DuplicateArgument { function, argument } => {
                put("function", function.clone());
                put("argument", argument.clone());
            }
            ErrorKind::RecursionLimit { limit } => put("limit", limit.to_string()),
            ErrorKind::StepLimit { limit } => put("limit", limit.to_string()),
            ErrorKind::Raised { message } | ErrorKind::Other { message } => {
                put("message", message.clone())
            }
        }

        attrs
    }
}

/// A runtime error together with the call chain (outermost first) at the raise point.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{}: {kind}", kind.name())]
pub struct ScriptError {
    pub kind: ErrorKind,
    pub trace: Vec<Frame>,
}

impl ScriptError {
    pub fn new(kind: ErrorKind, trace: Vec<Frame>) -> Self {
        Self { kind, trace }
    }

    pub fn deepest_frame(&self) -> Option<&Frame> {
        self.trace.last()
    }

    /// Deepest frame located in `file`, falling back to the deepest frame overall.
    pub fn frame_in(&self, file: &str) -> Option<&Frame> {
        self.trace
            .iter()
            .rev()
            .find(|frame| frame.file == file)
            .or_else(|| self.deepest_frame())
    }

    pub fn format_traceback(&self) -> String {
        let mut out = String::from("Traceback (most recent call last):\n");
        for frame in &self.trace {
            let _ = writeln!(
                out,
                "  File \"{}\", line {}, in {}",
                frame.file, frame.line, frame.function
            );
            if let Some(code) = &frame.code_text {
                let _ = writeln!(out, "    {}", code);
            }
        }
        let _ = write!(out, "{}: {}", self.kind.name(), self.kind);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(file: &str, line: usize, function: &str) -> Frame {
        Frame {
            file: file.to_string(),
            line,
            function: function.to_string(),
            code_text: None,
        }
    }

    #[test]
    fn test_frame_in_prefers_declaring_file() {
        let err = ScriptError::new(
            ErrorKind::DivisionByZero {
                operation: "/".into(),
            },
            vec![frame("a.mend", 3, "outer"), frame("a.mend", 9, "inner"), frame(NATIVE_FILE, 0, "len")],
        );

        assert_eq!(err.frame_in("a.mend").unwrap().function, "inner");
        assert_eq!(err.frame_in("b.mend").unwrap().function, "len");
    }

    #[test]
    fn test_traceback_lists_frames_and_kind() {
        let mut inner = frame("calc.mend", 4, "divide");
        inner.code_text = Some("return a / b;".into());
        let err = ScriptError::new(
            ErrorKind::DivisionByZero {
                operation: "/".into(),
            },
            vec![inner],
        );

        let text = err.format_traceback();
        assert!(text.contains("File \"calc.mend\", line 4, in divide"));
        assert!(text.contains("    return a / b;"));
        assert!(text.ends_with("DivisionByZero: division by zero in `/`"));
    }

    #[test]
    fn test_attributes_are_stringified() {
        let attrs = ErrorKind::IndexOutOfRange { index: -4, length: 3 }.attributes();
        assert_eq!(attrs.get("index").map(String::as_str), Some("-4"));
        assert_eq!(attrs.get("length").map(String::as_str), Some("3"));
    }
}
