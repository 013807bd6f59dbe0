use crate::script::ErrorKind;
use serde::{Deserialize, Serialize};

/// Extra, error-specific facts included in fix prompts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum ErrorDetail {
    InputPreview {
        expected: String,
        preview: String,
        position: usize,
    },
    Request {
        operation: String,
        timeout_ms: Option<u64>,
        reason: Option<String>,
    },
    Lookup {
        requested: String,
        alternatives: Vec<String>,
    },
    Arithmetic {
        operation: String,
    },
    Bounds {
        index: i64,
        length: usize,
    },
}

impl ErrorDetail {
    pub fn describe(&self) -> String {
        match self {
            ErrorDetail::InputPreview {
                expected,
                preview,
                position,
            } => {
                let marker = format!("{}^", " ".repeat(*position));
                format!(
                    "Input is not valid {} (error at position {}):\n  {}\n  {}",
                    expected, position, preview, marker
                )
            }
            ErrorDetail::Request {
                operation,
                timeout_ms,
                reason,
            } => {
                let mut text = format!("Request: {}", operation);
                if let Some(ms) = timeout_ms {
                    text.push_str(&format!(", timeout {} ms", ms));
                }
                if let Some(reason) = reason {
                    text.push_str(&format!(", reason: {}", reason));
                }
                text
            }
            ErrorDetail::Lookup {
                requested,
                alternatives,
            } => {
                if alternatives.is_empty() {
                    format!("Requested `{}`; nothing else is available", requested)
                } else {
                    format!("Requested `{}`; available: {}", requested, alternatives.join(", "))
                }
            }
            ErrorDetail::Arithmetic { operation } => format!("Arithmetic operation `{}` had a zero divisor", operation),
            ErrorDetail::Bounds { index, length } => {
                format!("Index {} used on a sequence of length {}", index, length)
            }
        }
    }
}

pub fn classify(kind: &ErrorKind) -> Vec<ErrorDetail> {
    match kind {
        ErrorKind::InvalidInput {
            expected,
            preview,
            position,
            ..
        } => vec![ErrorDetail::InputPreview {
            expected: expected.clone(),
            preview: preview.clone(),
            position: *position,
        }],
        ErrorKind::Timeout {
            operation,
            timeout_ms,
        } => vec![ErrorDetail::Request {
            operation: operation.clone(),
            timeout_ms: Some(*timeout_ms),
            reason: None,
        }],
        ErrorKind::Network { request, reason } => vec![ErrorDetail::Request {
            operation: request.clone(),
            timeout_ms: None,
            reason: Some(reason.clone()),
        }],
        ErrorKind::KeyNotFound { key, available } => vec![ErrorDetail::Lookup {
            requested: key.clone(),
            alternatives: available.clone(),
        }],
        ErrorKind::UndefinedName { name, available } => vec![ErrorDetail::Lookup {
            requested: name.clone(),
            alternatives: available.clone(),
        }],
        ErrorKind::AttributeMissing {
            attribute,
            available,
            ..
        } => vec![ErrorDetail::Lookup {
            requested: attribute.clone(),
            alternatives: available.clone(),
        }],
        ErrorKind::DivisionByZero { operation } => vec![ErrorDetail::Arithmetic {
            operation: operation.clone(),
        }],
        ErrorKind::IndexOutOfRange { index, length } => vec![ErrorDetail::Bounds {
            index: *index,
            length: *length,
        }],
        _ => Vec::new(),
    }
}

/// Short advisory text for the oracle, when the error kind suggests one.
pub fn hint(kind: &ErrorKind) -> Option<String> {
    let text = match kind {
        ErrorKind::DivisionByZero { .. } => {
            "Guard the divisor: check for zero before dividing and return a sensible fallback."
        }
        ErrorKind::TypeMismatch { .. } => {
            "Check operand types before the operation and convert with int(), float() or str() where needed."
        }
        ErrorKind::UndefinedName { .. } => "Define the name before use or correct its spelling.",
        ErrorKind::KeyNotFound { .. } => {
            "Check contains(map, key) before indexing, or fall back to a default value."
        }
        ErrorKind::IndexOutOfRange { .. } => "Check len() before indexing the sequence.",
        ErrorKind::AttributeMissing { .. } => {
            "Only maps have fields; check the value's type and that the field exists."
        }
        ErrorKind::InvalidInput { .. } => {
            "Validate or clean the input before converting it, and handle malformed values."
        }
        ErrorKind::Io { .. } => "Check that the path exists and is readable before using it.",
        ErrorKind::Timeout { .. } | ErrorKind::Network { .. } => {
            "Handle the failed request gracefully instead of assuming it succeeds."
        }
        ErrorKind::ArityMismatch { .. }
        | ErrorKind::MissingArgument { .. }
        | ErrorKind::UnexpectedArgument { .. }
        | ErrorKind::DuplicateArgument { .. } => {
            "Make the parameter list accept the arguments callers pass, for example with defaults."
        }
        ErrorKind::RecursionLimit { .. } => "Add or fix the recursion base case.",
        ErrorKind::StepLimit { .. } => "Make sure every loop terminates.",
        ErrorKind::Raised { .. } | ErrorKind::Other { .. } => return None,
    };
    Some(text.to_string())
}
