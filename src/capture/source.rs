//! Locating a function definition inside source text.
//!
//! The structural path parses the file and uses the parser's exact span. When
//! the file does not parse (for example after a hand edit), a header regex plus
//! brace matching recovers the span of the requested definition.

use crate::script::parse_source;
use regex::Regex;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocateMethod {
    Structural,
    Heuristic,
}

/// Byte span of a definition, attribute lines through closing brace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefinitionSpan {
    pub start: usize,
    pub end: usize,
    pub start_line: usize,
    pub end_line: usize,
    pub signature: Option<String>,
    pub method: LocateMethod,
}

impl DefinitionSpan {
    pub fn text<'s>(&self, source: &'s str) -> &'s str {
        &source[self.start..self.end]
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LocateError {
    #[error("no definition named `{0}`")]
    NotFound(String),

    #[error("definition `{name}` could not be located ({reason})")]
    Unlocatable { name: String, reason: String },
}

pub fn locate_definition(source: &str, name: &str) -> Result<DefinitionSpan, LocateError> {
    match parse_source(source) {
        Ok(parsed) => parsed
            .definitions
            .iter()
            .find(|def| def.name == name)
            .map(|def| DefinitionSpan {
                start: def.span.start,
                end: def.span.end,
                start_line: def.start_line(),
                end_line: def.end_line,
                signature: Some(def.signature(source).to_string()),
                method: LocateMethod::Structural,
            })
            .ok_or_else(|| LocateError::NotFound(name.to_string())),
        Err(syntax) => heuristic_locate(source, name).ok_or_else(|| LocateError::Unlocatable {
            name: name.to_string(),
            reason: format!("file does not parse: {}", syntax),
        }),
    }
}

fn line_of(source: &str, offset: usize) -> usize {
    source[..offset].matches('\n').count() + 1
}

/// Find `fn name(` at the start of a line and match braces to its end,
/// skipping string literals and `#` comments.
pub fn heuristic_locate(source: &str, name: &str) -> Option<DefinitionSpan> {
    let header = Regex::new(&format!(r"(?m)^[ \t]*fn[ \t]+{}[ \t]*\(", regex::escape(name))).ok()?;
    let attribute = Regex::new(r"^[ \t]*@[A-Za-z_][A-Za-z0-9_]*[ \t]*$").ok()?;

    let found = header.find(source)?;
    let mut start = found.start();

    // Pull in attribute lines directly above the header.
    while start > 0 {
        let prev_end = start - 1;
        let prev_start = source[..prev_end].rfind('\n').map(|i| i + 1).unwrap_or(0);
        if attribute.is_match(&source[prev_start..prev_end]) {
            start = prev_start;
        } else {
            break;
        }
    }

    let fn_offset = found.start() + source[found.start()..].find("fn")?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    let mut in_comment = false;
    let mut body_open = None;
    let mut end = None;

    for (i, c) in source[found.end()..].char_indices() {
        let at = found.end() + i;
        if in_comment {
            in_comment = c != '\n';
            continue;
        }
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '#' => in_comment = true,
            '{' => {
                if depth == 0 && body_open.is_none() {
                    body_open = Some(at);
                }
                depth += 1;
            }
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 && body_open.is_some() {
                    end = Some(at + 1);
                    break;
                }
            }
            _ => {}
        }
    }

    let end = end?;
    let signature = body_open.map(|open| source[fn_offset..open].trim_end().to_string());

    Some(DefinitionSpan {
        start,
        end,
        start_line: line_of(source, start),
        end_line: line_of(source, end),
        signature,
        method: LocateMethod::Heuristic,
    })
}
