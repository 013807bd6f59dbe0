//! Built-in functions and the table hosts use to register their own natives.

use crate::script::fault::ErrorKind;
use crate::script::value::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

pub type NativeFn = Arc<dyn Fn(&[Value]) -> Result<Value, ErrorKind> + Send + Sync>;

const MAX_RANGE_LEN: i64 = 1_000_000;
const PREVIEW_CHARS: usize = 40;

/// Functions implemented in Rust and callable from scripts by name.
#[derive(Clone)]
pub struct Natives {
    functions: HashMap<String, NativeFn>,
}

impl Default for Natives {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl std::fmt::Debug for Natives {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Natives")
            .field("functions", &self.names())
            .finish()
    }
}

impl Natives {
    pub fn empty() -> Self {
        Self {
            functions: HashMap::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut natives = Self::empty();
        natives.register("len", len);
        natives.register("str", |args| {
            expect_arity("str", args, 1, 1)?;
            Ok(Value::Str(args[0].to_string()))
        });
        natives.register("int", to_int);
        natives.register("float", to_float);
        natives.register("type_of", |args| {
            expect_arity("type_of", args, 1, 1)?;
            Ok(Value::from(args[0].type_name()))
        });
        natives.register("keys", keys);
        natives.register("contains", contains);
        natives.register("push", |args| {
            expect_arity("push", args, 2, 2)?;
            match &args[0] {
                Value::List(items) => {
                    let mut items = items.clone();
                    items.push(args[1].clone());
                    Ok(Value::List(items))
                }
                other => Err(ErrorKind::type_mismatch("push()", "list", other.type_name())),
            }
        });
        natives.register("range", range);
        natives.register("abs", |args| {
            expect_arity("abs", args, 1, 1)?;
            match &args[0] {
                Value::Int(n) => n
                    .checked_abs()
                    .map(Value::Int)
                    .ok_or_else(|| ErrorKind::other("integer overflow in abs()")),
                Value::Float(n) => Ok(Value::Float(n.abs())),
                other => Err(ErrorKind::type_mismatch("abs()", "int or float", other.type_name())),
            }
        });
        natives.register("min", |args| extreme("min", args, |a, b| a < b));
        natives.register("max", |args| extreme("max", args, |a, b| a > b));
        natives.register("join", join);
        natives.register("split", split);
        natives.register("print", |args| {
            let parts: Vec<String> = args.iter().map(Value::to_string).collect();
            println!("{}", parts.join(" "));
            Ok(Value::Nil)
        });
        natives.register("parse_json", parse_json);
        natives.register("read_file", read_file);
        natives
    }

    pub fn register<F>(&mut self, name: impl Into<String>, function: F)
    where
        F: Fn(&[Value]) -> Result<Value, ErrorKind> + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Arc::new(function));
    }

    pub fn get(&self, name: &str) -> Option<&NativeFn> {
        self.functions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.functions.keys().cloned().collect();
        names.sort();
        names
    }
}

pub fn expect_arity(function: &str, args: &[Value], min: usize, max: usize) -> Result<(), ErrorKind> {
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            min.to_string()
        } else {
            format!("{} to {}", min, max)
        };
        return Err(ErrorKind::ArityMismatch {
            function: function.to_string(),
            expected,
            given: args.len(),
        });
    }
    Ok(())
}

fn preview(text: &str) -> String {
    text.chars().take(PREVIEW_CHARS).collect()
}

fn len(args: &[Value]) -> Result<Value, ErrorKind> {
    expect_arity("len", args, 1, 1)?;
    let n = match &args[0] {
        Value::Str(s) => s.chars().count(),
        Value::List(items) => items.len(),
        Value::Map(entries) => entries.len(),
        other => return Err(ErrorKind::type_mismatch("len()", "str, list or map", other.type_name())),
    };
    Ok(Value::Int(n as i64))
}

fn invalid_number(expected: &str, text: &str, reason: String) -> ErrorKind {
    let trimmed = text.trim();
    let lead = text.len() - text.trim_start().len();
    let position = trimmed
        .char_indices()
        .find(|(i, c)| !(c.is_ascii_digit() || (*i == 0 && (*c == '-' || *c == '+')) || *c == '.'))
        .map(|(i, _)| lead + i)
        .unwrap_or(lead);
    ErrorKind::InvalidInput {
        expected: expected.to_string(),
        preview: preview(text),
        position,
        reason,
    }
}

fn to_int(args: &[Value]) -> Result<Value, ErrorKind> {
    expect_arity("int", args, 1, 1)?;
    match &args[0] {
        Value::Int(n) => Ok(Value::Int(*n)),
        Value::Float(n) if n.is_finite() => Ok(Value::Int(n.trunc() as i64)),
        Value::Float(n) => Err(ErrorKind::other(format!("cannot convert {} to int", n))),
        Value::Bool(b) => Ok(Value::Int(*b as i64)),
        Value::Str(s) => s
            .trim()
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|e| invalid_number("int", s, e.to_string())),
        other => Err(ErrorKind::type_mismatch("int()", "int, float, bool or str", other.type_name())),
    }
}

fn to_float(args: &[Value]) -> Result<Value, ErrorKind> {
    expect_arity("float", args, 1, 1)?;
    match &args[0] {
        Value::Int(n) => Ok(Value::Float(*n as f64)),
        Value::Float(n) => Ok(Value::Float(*n)),
        Value::Str(s) => s
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|e| invalid_number("float", s, e.to_string())),
        other => Err(ErrorKind::type_mismatch("float()", "int, float or str", other.type_name())),
    }
}

fn keys(args: &[Value]) -> Result<Value, ErrorKind> {
    expect_arity("keys", args, 1, 1)?;
    match &args[0] {
        Value::Map(entries) => Ok(Value::List(entries.keys().map(|k| Value::from(k.as_str())).collect())),
        other => Err(ErrorKind::type_mismatch("keys()", "map", other.type_name())),
    }
}

fn contains(args: &[Value]) -> Result<Value, ErrorKind> {
    expect_arity("contains", args, 2, 2)?;
    let found = match (&args[0], &args[1]) {
        (Value::List(items), needle) => items.iter().any(|item| item.loosely_equals(needle)),
        (Value::Map(entries), Value::Str(key)) => entries.contains_key(key),
        (Value::Str(haystack), Value::Str(needle)) => haystack.contains(needle.as_str()),
        (container, needle) => {
            return Err(ErrorKind::type_mismatch(
                "contains()",
                "list, map with str key, or str with str",
                format!("{} and {}", container.type_name(), needle.type_name()),
            ));
        }
    };
    Ok(Value::Bool(found))
}

fn range(args: &[Value]) -> Result<Value, ErrorKind> {
    expect_arity("range", args, 1, 2)?;
    let bound = |v: &Value| match v {
        Value::Int(n) => Ok(*n),
        other => Err(ErrorKind::type_mismatch("range()", "int", other.type_name())),
    };
    let (start, end) = if args.len() == 1 {
        (0, bound(&args[0])?)
    } else {
        (bound(&args[0])?, bound(&args[1])?)
    };
    if end.saturating_sub(start) > MAX_RANGE_LEN {
        return Err(ErrorKind::other(format!(
            "range of {} elements exceeds the limit of {}",
            end.saturating_sub(start),
            MAX_RANGE_LEN
        )));
    }
    Ok(Value::List((start..end).map(Value::Int).collect()))
}

fn extreme(name: &str, args: &[Value], better: fn(f64, f64) -> bool) -> Result<Value, ErrorKind> {
    let candidates: Vec<Value> = match args {
        [Value::List(items)] => items.clone(),
        _ => args.to_vec(),
    };
    if candidates.is_empty() {
        return Err(ErrorKind::ArityMismatch {
            function: name.to_string(),
            expected: "at least 1".to_string(),
            given: 0,
        });
    }

    let mut best = &candidates[0];
    for candidate in &candidates {
        let (Some(a), Some(b)) = (candidate.as_f64(), best.as_f64()) else {
            let culprit = if candidate.as_f64().is_none() { candidate } else { best };
            return Err(ErrorKind::type_mismatch(format!("{}()", name), "int or float", culprit.type_name()));
        };
        if better(a, b) {
            best = candidate;
        }
    }
    Ok(best.clone())
}

fn join(args: &[Value]) -> Result<Value, ErrorKind> {
    expect_arity("join", args, 1, 2)?;
    let separator = match args.get(1) {
        None => String::new(),
        Some(Value::Str(s)) => s.clone(),
        Some(other) => return Err(ErrorKind::type_mismatch("join()", "str separator", other.type_name())),
    };
    match &args[0] {
        Value::List(items) => {
            let parts: Vec<String> = items.iter().map(Value::to_string).collect();
            Ok(Value::Str(parts.join(&separator)))
        }
        other => Err(ErrorKind::type_mismatch("join()", "list", other.type_name())),
    }
}

fn split(args: &[Value]) -> Result<Value, ErrorKind> {
    expect_arity("split", args, 1, 2)?;
    let Value::Str(text) = &args[0] else {
        return Err(ErrorKind::type_mismatch("split()", "str", args[0].type_name()));
    };
    let parts: Vec<Value> = match args.get(1) {
        None => text.split_whitespace().map(Value::from).collect(),
        Some(Value::Str(sep)) if sep.is_empty() => {
            return Err(ErrorKind::other("split() separator must not be empty"));
        }
        Some(Value::Str(sep)) => text.split(sep.as_str()).map(Value::from).collect(),
        Some(other) => return Err(ErrorKind::type_mismatch("split()", "str separator", other.type_name())),
    };
    Ok(Value::List(parts))
}

fn parse_json(args: &[Value]) -> Result<Value, ErrorKind> {
    expect_arity("parse_json", args, 1, 1)?;
    let Value::Str(text) = &args[0] else {
        return Err(ErrorKind::type_mismatch("parse_json()", "str", args[0].type_name()));
    };
    serde_json::from_str::<serde_json::Value>(text)
        .map(Value::from_json)
        .map_err(|e| {
            // serde_json reports 1-based line/column; convert to a char offset.
            let position = text
                .split('\n')
                .take(e.line().saturating_sub(1))
                .map(|line| line.chars().count() + 1)
                .sum::<usize>()
                + e.column().saturating_sub(1);
            ErrorKind::InvalidInput {
                expected: "json".to_string(),
                preview: preview(text),
                position,
                reason: e.to_string(),
            }
        })
}

fn read_file(args: &[Value]) -> Result<Value, ErrorKind> {
    expect_arity("read_file", args, 1, 1)?;
    let Value::Str(path) = &args[0] else {
        return Err(ErrorKind::type_mismatch("read_file()", "str", args[0].type_name()));
    };
    std::fs::read_to_string(path)
        .map(Value::Str)
        .map_err(|e| ErrorKind::Io {
            path: path.clone(),
            reason: e.to_string(),
        })
}

/// Build a map value from string keys, for hosts registering natives.
pub fn map_value<I, K>(entries: I) -> Value
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    Value::Map(
        entries
            .into_iter()
            .map(|(k, v)| (k.into(), v))
            .collect::<BTreeMap<_, _>>(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, args: &[Value]) -> Result<Value, ErrorKind> {
        let natives = Natives::with_builtins();
        let f = natives.get(name).unwrap();
        f(args)
    }

    #[test]
    fn test_int_reports_preview_and_position() {
        let err = call("int", &[Value::from("12x4")]).unwrap_err();
        match err {
            ErrorKind::InvalidInput {
                expected,
                preview,
                position,
                ..
            } => {
                assert_eq!(expected, "int");
                assert_eq!(preview, "12x4");
                assert_eq!(position, 2);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_parse_json_position() {
        let err = call("parse_json", &[Value::from("{\"a\": }")]).unwrap_err();
        match err {
            ErrorKind::InvalidInput { expected, position, .. } => {
                assert_eq!(expected, "json");
                assert_eq!(position, 6);
            }
            other => panic!("unexpected error: {:?}", other),
        }

        let ok = call("parse_json", &[Value::from("{\"a\": [1, 2.5]}")]).unwrap();
        assert_eq!(
            ok,
            map_value([("a", Value::List(vec![Value::Int(1), Value::Float(2.5)]))])
        );
    }

    #[test]
    fn test_read_file_missing_is_io_error() {
        let err = call("read_file", &[Value::from("/definitely/not/here.txt")]).unwrap_err();
        assert_eq!(err.name(), "Io");
    }

    #[test]
    fn test_collections() {
        assert_eq!(call("len", &[Value::from("héllo")]).unwrap(), Value::Int(5));
        assert_eq!(
            call("range", &[Value::Int(1), Value::Int(4)]).unwrap(),
            Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)])
        );
        assert_eq!(
            call("max", &[Value::Int(3), Value::Float(7.5), Value::Int(-1)]).unwrap(),
            Value::Float(7.5)
        );
        assert_eq!(
            call("split", &[Value::from("a,b"), Value::from(",")]).unwrap(),
            Value::List(vec![Value::from("a"), Value::from("b")])
        );
        assert_eq!(
            call("contains", &[Value::List(vec![Value::Int(2)]), Value::Float(2.0)]).unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn test_arity_is_checked() {
        let err = call("len", &[]).unwrap_err();
        assert!(matches!(err, ErrorKind::ArityMismatch { given: 0, .. }));
    }

    #[test]
    fn test_host_registration() {
        let mut natives = Natives::empty();
        natives.register("answer", |_| Ok(Value::Int(42)));
        assert!(natives.contains("answer"));
        assert!(!natives.contains("len"));
        assert_eq!(natives.names(), vec!["answer".to_string()]);
    }
}
