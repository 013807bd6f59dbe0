//! Acceptance checks for oracle replies.

use crate::script::{HEAL_ATTRIBUTE, parse_source};
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tracing::warn;

static FENCED_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[A-Za-z0-9_+-]*[ \t]*\r?\n(.*?)```").expect("valid fence regex"));

static DEFINITION_KEYWORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bfn\b").expect("valid keyword regex"));

/// A candidate that passed every check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedFix {
    pub code: String,
    pub function_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("the reply is empty")]
    Empty,

    #[error("the reply contains no function definition")]
    MissingDefinition,

    #[error("the code does not parse: {0}")]
    Syntax(String),

    #[error("expected a definition named `{expected}`, found `{found}`")]
    NameMismatch { expected: String, found: String },

    #[error("expected exactly one definition, found {0}")]
    MultipleDefinitions(usize),
}

#[derive(Debug, Clone, Default)]
pub struct FixValidator;

impl FixValidator {
    pub fn new() -> Self {
        Self
    }

    /// Check a raw oracle reply and normalise it into replacement source.
    ///
    /// `original_params` is only used to warn about signature drift.
    pub fn validate(
        &self,
        candidate: &str,
        expected_name: &str,
        original_params: &[String],
    ) -> Result<AcceptedFix, Rejection> {
        let code = strip_fences(candidate);
        if code.trim().is_empty() {
            return Err(Rejection::Empty);
        }
        if !DEFINITION_KEYWORD.is_match(&code) {
            return Err(Rejection::MissingDefinition);
        }

        let parsed = parse_source(&code).map_err(|e| Rejection::Syntax(e.to_string()))?;
        let def = match parsed.definitions.as_slice() {
            [] => return Err(Rejection::MissingDefinition),
            [def] => def,
            defs => return Err(Rejection::MultipleDefinitions(defs.len())),
        };
        if def.name != expected_name {
            return Err(Rejection::NameMismatch {
                expected: expected_name.to_string(),
                found: def.name.clone(),
            });
        }

        let params = def.param_names();
        if params.as_slice() != original_params {
            warn!(
                function = expected_name,
                original = ?original_params,
                proposed = ?params,
                "Fix changes the parameter list"
            );
        }

        let code = if def.is_marked() {
            code
        } else {
            insert_marker(&code)
        };

        Ok(AcceptedFix {
            code,
            function_name: expected_name.to_string(),
        })
    }
}

/// Remove markdown code fences. When the reply has prose around a fenced
/// block, the first block wins.
pub fn strip_fences(reply: &str) -> String {
    if let Some(block) = FENCED_BLOCK.captures(reply).and_then(|c| c.get(1)) {
        return block.as_str().trim_matches('\n').trim_end().to_string();
    }
    reply
        .lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
        .trim_matches('\n')
        .trim_end()
        .to_string()
}

/// Put `@heal` above the definition, indented like the first line.
fn insert_marker(code: &str) -> String {
    let first = code.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    let indent: String = first.chars().take_while(|c| c.is_whitespace()).collect();
    format!("{}@{}\n{}", indent, HEAL_ATTRIBUTE, code)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn validate(candidate: &str) -> Result<AcceptedFix, Rejection> {
        FixValidator::new().validate(candidate, "divide", &params(&["a", "b"]))
    }

    #[test]
    fn test_accepts_plain_definition_and_adds_marker() {
        let fix = validate("fn divide(a, b) {\n    if b == 0 { return 0; }\n    return a / b;\n}").unwrap();
        assert!(fix.code.starts_with("@heal\nfn divide(a, b) {"));
        assert_eq!(fix.function_name, "divide");
    }

    #[test]
    fn test_keeps_existing_marker() {
        let fix = validate("@heal\nfn divide(a, b) { return 0; }").unwrap();
        assert_eq!(fix.code, "@heal\nfn divide(a, b) { return 0; }");
    }

    #[test]
    fn test_marker_uses_first_line_indent() {
        let fix = validate("  fn divide(a, b) { return 0; }").unwrap();
        assert_eq!(fix.code, "  @heal\n  fn divide(a, b) { return 0; }");
    }

    #[test]
    fn test_first_fenced_block_wins() {
        let reply = "Here is the fix:\n```mend\nfn divide(a, b) { return 1; }\n```\nAlternatively:\n```\nfn divide(a, b) { return 2; }\n```";
        let fix = validate(reply).unwrap();
        assert_eq!(fix.code, "@heal\nfn divide(a, b) { return 1; }");
    }

    #[test]
    fn test_stray_fence_lines_are_dropped() {
        let fix = validate("```\nfn divide(a, b) { return 0; }").unwrap();
        assert_eq!(fix.code, "@heal\nfn divide(a, b) { return 0; }");
    }

    #[test]
    fn test_rejections() {
        assert_eq!(validate("   \n "), Err(Rejection::Empty));
        assert_eq!(validate("```\n```"), Err(Rejection::Empty));
        assert_eq!(validate("I could not fix this."), Err(Rejection::MissingDefinition));
        assert!(matches!(validate("fn divide(a, b) { return a / ; }"), Err(Rejection::Syntax(_))));
        assert_eq!(
            validate("fn div(a, b) { return 0; }"),
            Err(Rejection::NameMismatch {
                expected: "divide".into(),
                found: "div".into()
            })
        );
        assert_eq!(
            validate("fn divide(a, b) { return 0; }\nfn helper() { return 1; }"),
            Err(Rejection::MultipleDefinitions(2))
        );
    }

    #[test]
    fn test_parameter_drift_is_accepted() {
        assert!(validate("fn divide(a, b, fallback = 0) { return fallback; }").is_ok());
    }
}
