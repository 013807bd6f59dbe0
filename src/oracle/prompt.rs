use crate::capture::ExecutionContext;
use crate::config::PromptRole;
use std::fmt::Write as _;

/// Short description of the script language, so the oracle writes valid code.
pub const LANGUAGE_PRIMER: &str = r#"The code is written in mend, a small scripting language:
- A file holds top-level definitions: `fn name(a, b = default) { ... }`, optionally preceded by `@attribute` lines.
- Statements end with `;`: `let x = e;`, `x = e;`, `x[i] = e;`, `return e;`, `raise e;`, `break;`, `continue;`.
- Control flow: `if cond { } else if cond { } else { }`, `while cond { }`, `for item in list { }`.
- Values: nil, true/false, integers, floats, "strings", [lists], {"maps": 1}. `/` always yields a float.
- Operators: + - * / %, == != < <= > >=, and, or, not (or !). Maps support `m["key"]` and `m.key`.
- Built-ins: len, str, int, float, type_of, keys, contains, push, range, abs, min, max, join, split, print, parse_json, read_file.
- Comments start with `#`."#;

/// Prompt asking for a corrected definition.
///
/// `previous_rejection` carries why the last candidate was refused, so the
/// next attempt does not repeat the mistake.
pub fn build_fix_prompt(context: &ExecutionContext, previous_rejection: Option<&str>) -> String {
    let info = &context.function_info;
    let mut prompt = String::new();

    let _ = writeln!(prompt, "{}\n", LANGUAGE_PRIMER);
    let _ = writeln!(prompt, "Fix the following function that raised an error.\n");

    let _ = writeln!(prompt, "Original code:");
    match &info.source_text {
        Some(source) => {
            let _ = writeln!(prompt, "{}\n", source);
        }
        None => {
            let reason = info.source_error.as_deref().unwrap_or("unknown reason");
            let _ = writeln!(prompt, "(source unavailable: {})\n", reason);
        }
    }

    let _ = writeln!(prompt, "Error type: {}", context.error.kind);
    let _ = writeln!(prompt, "Error message: {}", context.error.message);
    if let (Some(line), Some(text)) = (context.error.originating_line, &context.error.source_line_text) {
        let _ = writeln!(prompt, "Failing line {}: {}", line, text);
    }
    let _ = writeln!(prompt, "\nStack trace:\n{}\n", context.error.raw_traceback);

    let _ = writeln!(prompt, "Function name: {}", info.name);
    if let Some(signature) = &info.signature {
        let _ = writeln!(prompt, "Function signature: {}", signature);
    }
    let _ = writeln!(prompt, "Module: {}", info.module);

    if !context.function_arguments.is_empty() {
        let _ = writeln!(prompt, "\nFunction was called with arguments:");
        for arg in &context.function_arguments {
            let _ = writeln!(prompt, "{}: {} (type: {})", arg.name, arg.value, arg.type_name);
        }
    }

    if !context.error.details.is_empty() {
        let _ = writeln!(prompt, "\nError details:");
        for detail in &context.error.details {
            let _ = writeln!(prompt, "{}", detail.describe());
        }
    }

    if let Some(hint) = &context.ai_hint {
        let _ = writeln!(prompt, "\nHint: {}", hint);
    }

    if let Some(reason) = previous_rejection {
        let _ = writeln!(prompt, "\nYour previous answer was rejected: {}", reason);
    }

    let _ = write!(
        prompt,
        "\nReturn only the fixed definition of `{}`, without explanations or markdown.\n\
         Keep the same function name and parameters, keep the @heal line, \
         and add error handling where needed.",
        info.name
    );
    prompt
}

/// Prompt for the analyzer or report roles, used when explaining a saved record.
pub fn build_analysis_prompt(context: &ExecutionContext, role: PromptRole) -> String {
    let mut prompt = String::new();
    let task = match role {
        PromptRole::Report => "Write a short incident report for the failure below: what happened, the likely cause and how it was or could be fixed.",
        PromptRole::Analyzer | PromptRole::CodeFixer => "Explain the root cause of the failure below.",
    };
    let _ = writeln!(prompt, "{}\n", task);
    let _ = writeln!(prompt, "Function: {}", context.function_info.qualified_name);
    let _ = writeln!(prompt, "Error: {}: {}", context.error.kind, context.error.message);
    let _ = writeln!(prompt, "\n{}", context.error.raw_traceback);
    if let Some(source) = &context.function_info.source_text {
        let _ = writeln!(prompt, "\nSource:\n{}", source);
    }
    if let Some(fixed) = &context.fixed_code {
        let _ = writeln!(prompt, "\nApplied fix:\n{}", fixed);
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{ArgumentRecord, Environment, ErrorDetail, ErrorInfo, FunctionInfo};
    use std::collections::BTreeMap;

    fn context() -> ExecutionContext {
        ExecutionContext {
            event_id: "heal_test".into(),
            timestamp: chrono::Local::now(),
            environment: Environment::current(),
            error: ErrorInfo {
                kind: "DivisionByZero".into(),
                message: "division by zero in `/`".into(),
                raw_traceback: "Traceback (most recent call last):\n  File \"calc.mend\", line 3, in divide".into(),
                originating_file: Some("calc.mend".into()),
                originating_line: Some(3),
                originating_function: Some("divide".into()),
                source_line_text: Some("return a / b;".into()),
                attributes: BTreeMap::new(),
                details: vec![ErrorDetail::Arithmetic {
                    operation: "/".into(),
                }],
                frames: Vec::new(),
            },
            function_info: FunctionInfo {
                name: "divide".into(),
                qualified_name: "calc::divide".into(),
                module: "calc".into(),
                file_path: None,
                start_line: Some(1),
                source_text: Some("@heal\nfn divide(a, b) {\n    return a / b;\n}".into()),
                signature: Some("fn divide(a, b)".into()),
                source_error: None,
            },
            function_arguments: vec![ArgumentRecord {
                name: "b".into(),
                value: "0".into(),
                type_name: "int".into(),
            }],
            ai_hint: Some("Guard the divisor.".into()),
            fixed_code: None,
            backup_path: None,
        }
    }

    #[test]
    fn test_fix_prompt_contents() {
        let prompt = build_fix_prompt(&context(), None);
        assert!(prompt.starts_with(LANGUAGE_PRIMER));
        assert!(prompt.contains("@heal\nfn divide(a, b) {\n    return a / b;\n}"));
        assert!(prompt.contains("Error type: DivisionByZero"));
        assert!(prompt.contains("Failing line 3: return a / b;"));
        assert!(prompt.contains("Function signature: fn divide(a, b)"));
        assert!(prompt.contains("b: 0 (type: int)"));
        assert!(prompt.contains("zero divisor"));
        assert!(prompt.contains("Hint: Guard the divisor."));
        assert!(!prompt.contains("previous answer"));
    }

    #[test]
    fn test_fix_prompt_mentions_rejection() {
        let prompt = build_fix_prompt(&context(), Some("does not parse"));
        assert!(prompt.contains("Your previous answer was rejected: does not parse"));
    }

    #[test]
    fn test_analysis_prompt_includes_fix() {
        let mut ctx = context();
        ctx.fixed_code = Some("fn divide(a, b) { return 0; }".into());
        let prompt = build_analysis_prompt(&ctx, PromptRole::Report);
        assert!(prompt.starts_with("Write a short incident report"));
        assert!(prompt.contains("Applied fix:\nfn divide(a, b) { return 0; }"));
    }
}
