//! Tree-walking evaluator with an explicit call stack.
//!
//! Every error raised while running carries a snapshot of the frames that were
//! active at the raise point, outermost first.

use crate::script::ast::{Argument, BinaryOp, Expr, ExprKind, FunctionDef, Stmt, UnaryOp};
use crate::script::builtins::{NativeFn, Natives};
use crate::script::fault::{ErrorKind, Frame, NATIVE_FILE, ScriptError};
use crate::script::unit::CompiledUnit;
use crate::script::value::Value;
use std::collections::{BTreeMap, HashMap};

pub const MAX_CALL_DEPTH: usize = 200;
pub const DEFAULT_STEP_BUDGET: u64 = 5_000_000;

/// Arguments of a single call, as supplied by the caller.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs {
    pub positional: Vec<Value>,
    pub keyword: Vec<(String, Value)>,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn positional(values: impl IntoIterator<Item = Value>) -> Self {
        Self {
            positional: values.into_iter().collect(),
            keyword: Vec::new(),
        }
    }

    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(value.into());
        self
    }

    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.keyword.push((name.into(), value.into()));
        self
    }

    pub fn len(&self) -> usize {
        self.positional.len() + self.keyword.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

struct ActiveFrame {
    function: String,
    file: String,
    line: usize,
    scope: HashMap<String, Value>,
}

pub struct Interpreter<'u> {
    unit: &'u CompiledUnit,
    natives: &'u Natives,
    frames: Vec<ActiveFrame>,
    steps: u64,
    step_budget: u64,
    max_depth: usize,
}

impl<'u> Interpreter<'u> {
    pub fn new(unit: &'u CompiledUnit, natives: &'u Natives) -> Self {
        Self {
            unit,
            natives,
            frames: Vec::new(),
            steps: 0,
            step_budget: DEFAULT_STEP_BUDGET,
            max_depth: MAX_CALL_DEPTH,
        }
    }

    pub fn with_limits(mut self, max_depth: usize, step_budget: u64) -> Self {
        self.max_depth = max_depth;
        self.step_budget = step_budget;
        self
    }

    /// Call a top-level definition of the unit by name.
    pub fn call(&mut self, function: &str, args: CallArgs) -> Result<Value, ScriptError> {
        let Some(def) = self.unit.definition(function).cloned() else {
            return Err(self.fault(ErrorKind::UndefinedName {
                name: function.to_string(),
                available: self.unit.definition_names(),
            }));
        };
        self.invoke(&def, args)
    }

    /// Bind `args` to the parameters of `def` exactly as a call would,
    /// evaluating defaults, without running the body.
    pub fn bind(&mut self, def: &FunctionDef, args: CallArgs) -> Result<Vec<(String, Value)>, ScriptError> {
        self.push_frame(def)?;
        let bound = self.bind_into_frame(def, args);
        self.frames.pop();
        bound
    }

    fn push_frame(&mut self, def: &FunctionDef) -> Result<(), ScriptError> {
        if self.frames.len() >= self.max_depth {
            return Err(self.fault(ErrorKind::RecursionLimit {
                limit: self.max_depth,
            }));
        }
        self.frames.push(ActiveFrame {
            function: def.name.clone(),
            file: self.unit.file.clone(),
            line: def.header_line,
            scope: HashMap::new(),
        });
        Ok(())
    }

    fn invoke(&mut self, def: &FunctionDef, args: CallArgs) -> Result<Value, ScriptError> {
        self.push_frame(def)?;
        let result = self.run_body(def, args);
        self.frames.pop();
        result
    }

    fn run_body(&mut self, def: &FunctionDef, args: CallArgs) -> Result<Value, ScriptError> {
        self.bind_into_frame(def, args)?;
        match self.exec_block(&def.body)? {
            Flow::Return(value) => Ok(value),
            Flow::Normal => Ok(Value::Nil),
            Flow::Break | Flow::Continue => Err(self.fault(ErrorKind::other(
                "`break` or `continue` outside of a loop",
            ))),
        }
    }

    fn bind_into_frame(&mut self, def: &FunctionDef, args: CallArgs) -> Result<Vec<(String, Value)>, ScriptError> {
        let given = args.len();
        let CallArgs { positional, keyword } = args;

        if positional.len() > def.params.len() {
            return Err(self.fault(ErrorKind::ArityMismatch {
                function: def.name.clone(),
                expected: expected_arity(def),
                given,
            }));
        }

        let mut slots: Vec<Option<Value>> = vec![None; def.params.len()];
        for (slot, value) in slots.iter_mut().zip(positional) {
            *slot = Some(value);
        }

        for (name, value) in keyword {
            match def.params.iter().position(|p| p.name == name) {
                None => {
                    return Err(self.fault(ErrorKind::UnexpectedArgument {
                        function: def.name.clone(),
                        argument: name,
                    }));
                }
                Some(i) if slots[i].is_some() => {
                    return Err(self.fault(ErrorKind::DuplicateArgument {
                        function: def.name.clone(),
                        argument: name,
                    }));
                }
                Some(i) => slots[i] = Some(value),
            }
        }

        let mut bound = Vec::with_capacity(def.params.len());
        for (param, slot) in def.params.iter().zip(slots) {
            let value = match (slot, &param.default) {
                (Some(value), _) => value,
                (None, Some(default)) => self.eval(default)?,
                (None, None) => {
                    return Err(self.fault(ErrorKind::MissingArgument {
                        function: def.name.clone(),
                        parameter: param.name.clone(),
                    }));
                }
            };
            self.define(&param.name, value.clone());
            bound.push((param.name.clone(), value));
        }

        Ok(bound)
    }

    fn lookup(&self, name: &str) -> Option<&Value> {
        self.frames.last().and_then(|f| f.scope.get(name))
    }

    fn define(&mut self, name: &str, value: Value) {
        if let Some(frame) = self.frames.last_mut() {
            frame.scope.insert(name.to_string(), value);
        }
    }

    fn set_line(&mut self, line: usize) {
        if let Some(frame) = self.frames.last_mut() {
            frame.line = line;
        }
    }

    fn tick(&mut self, line: usize) -> Result<(), ScriptError> {
        self.set_line(line);
        self.steps += 1;
        if self.steps > self.step_budget {
            return Err(self.fault(ErrorKind::StepLimit {
                limit: self.step_budget,
            }));
        }
        Ok(())
    }

    fn fault(&self, kind: ErrorKind) -> ScriptError {
        let trace = self
            .frames
            .iter()
            .map(|f| Frame {
                file: f.file.clone(),
                line: f.line,
                function: f.function.clone(),
                code_text: if f.file == NATIVE_FILE {
                    None
                } else {
                    self.unit.line_text(f.line)
                },
            })
            .collect();
        ScriptError::new(kind, trace)
    }

    fn undefined(&self, name: &str) -> ScriptError {
        let mut available: Vec<String> = self
            .frames
            .last()
            .map(|f| f.scope.keys().cloned().collect())
            .unwrap_or_default();
        available.sort();
        self.fault(ErrorKind::UndefinedName {
            name: name.to_string(),
            available,
        })
    }

    fn exec_block(&mut self, stmts: &[Stmt]) -> Result<Flow, ScriptError> {
        for stmt in stmts {
            match self.exec(stmt)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, stmt: &Stmt) -> Result<Flow, ScriptError> {
        self.tick(stmt.line())?;

        match stmt {
            Stmt::Let { name, value, .. } => {
                let value = self.eval(value)?;
                self.define(name, value);
            }
            Stmt::Assign {
                target,
                index: None,
                value,
                ..
            } => {
                let value = self.eval(value)?;
                if self.lookup(target).is_none() {
                    return Err(self.undefined(target));
                }
                self.define(target, value);
            }
            Stmt::Assign {
                target,
                index: Some(index),
                value,
                ..
            } => {
                let key = self.eval(index)?;
                let value = self.eval(value)?;
                self.assign_index(target, key, value)?;
            }
            Stmt::Expr { expr, .. } => {
                self.eval(expr)?;
            }
            Stmt::If {
                branches,
                otherwise,
                ..
            } => {
                for (condition, body) in branches {
                    if self.eval(condition)?.is_truthy() {
                        return self.exec_block(body);
                    }
                }
                if let Some(body) = otherwise {
                    return self.exec_block(body);
                }
            }
            Stmt::While {
                condition,
                body,
                line,
            } => {
                while self.eval(condition)?.is_truthy() {
                    match self.exec_block(body)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                    self.tick(*line)?;
                }
            }
            Stmt::For {
                variable,
                iterable,
                body,
                ..
            } => {
                let items: Vec<Value> = match self.eval(iterable)? {
                    Value::List(items) => items,
                    Value::Str(s) => s.chars().map(|c| Value::Str(c.to_string())).collect(),
                    Value::Map(entries) => entries.into_keys().map(Value::Str).collect(),
                    other => {
                        return Err(self.fault(ErrorKind::type_mismatch(
                            "for loop",
                            "list, str or map",
                            other.type_name(),
                        )));
                    }
                };
                for item in items {
                    self.define(variable, item);
                    match self.exec_block(body)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
            }
            Stmt::Return { value, .. } => {
                let value = match value {
                    Some(expr) => self.eval(expr)?,
                    None => Value::Nil,
                };
                return Ok(Flow::Return(value));
            }
            Stmt::Raise { value, .. } => {
                let message = self.eval(value)?.to_string();
                return Err(self.fault(ErrorKind::Raised { message }));
            }
            Stmt::Break { .. } => return Ok(Flow::Break),
            Stmt::Continue { .. } => return Ok(Flow::Continue),
        }

        Ok(Flow::Normal)
    }

    fn assign_index(&mut self, target: &str, key: Value, value: Value) -> Result<(), ScriptError> {
        let Some(container) = self
            .frames
            .last_mut()
            .and_then(|f| f.scope.get_mut(target))
        else {
            return Err(self.undefined(target));
        };

        let outcome = match (container, key) {
            (Value::List(items), Value::Int(i)) => match normalize_index(i, items.len()) {
                Some(idx) => {
                    items[idx] = value;
                    Ok(())
                }
                None => Err(ErrorKind::IndexOutOfRange {
                    index: i,
                    length: items.len(),
                }),
            },
            (Value::Map(entries), Value::Str(key)) => {
                entries.insert(key, value);
                Ok(())
            }
            (container, key) => Err(ErrorKind::type_mismatch(
                "item assignment",
                "list[int] or map[str]",
                format!("{}[{}]", container.type_name(), key.type_name()),
            )),
        };

        outcome.map_err(|kind| self.fault(kind))
    }

    fn eval(&mut self, expr: &Expr) -> Result<Value, ScriptError> {
        match &expr.kind {
            ExprKind::Nil => Ok(Value::Nil),
            ExprKind::Bool(b) => Ok(Value::Bool(*b)),
            ExprKind::Int(n) => Ok(Value::Int(*n)),
            ExprKind::Float(n) => Ok(Value::Float(*n)),
            ExprKind::Str(s) => Ok(Value::Str(s.clone())),
            ExprKind::Ident(name) => self.lookup(name).cloned().ok_or_else(|| self.undefined(name)),
            ExprKind::List(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(item)?);
                }
                Ok(Value::List(values))
            }
            ExprKind::Map(entries) => {
                let mut map = BTreeMap::new();
                for (key, value) in entries {
                    let key = match self.eval(key)? {
                        Value::Str(s) => s,
                        other => {
                            return Err(self.fault(ErrorKind::type_mismatch(
                                "map key",
                                "str",
                                other.type_name(),
                            )));
                        }
                    };
                    let value = self.eval(value)?;
                    map.insert(key, value);
                }
                Ok(Value::Map(map))
            }
            ExprKind::Unary { op, operand } => {
                let value = self.eval(operand)?;
                unary(*op, value).map_err(|kind| self.fault(kind))
            }
            ExprKind::Binary {
                op: BinaryOp::And,
                lhs,
                rhs,
            } => {
                let lhs = self.eval(lhs)?;
                if lhs.is_truthy() { self.eval(rhs) } else { Ok(lhs) }
            }
            ExprKind::Binary {
                op: BinaryOp::Or,
                lhs,
                rhs,
            } => {
                let lhs = self.eval(lhs)?;
                if lhs.is_truthy() { Ok(lhs) } else { self.eval(rhs) }
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let lhs = self.eval(lhs)?;
                let rhs = self.eval(rhs)?;
                binary(*op, lhs, rhs).map_err(|kind| self.fault(kind))
            }
            ExprKind::Call { callee, args } => self.eval_call(callee, args, expr.line),
            ExprKind::Index { target, index } => {
                let target = self.eval(target)?;
                let index = self.eval(index)?;
                index_value(target, index).map_err(|kind| self.fault(kind))
            }
            ExprKind::Field { target, name } => {
                let target = self.eval(target)?;
                field(target, name).map_err(|kind| self.fault(kind))
            }
        }
    }

    fn eval_call(&mut self, callee: &str, args: &[Argument], line: usize) -> Result<Value, ScriptError> {
        let mut call_args = CallArgs::new();
        for arg in args {
            let value = self.eval(&arg.value)?;
            match &arg.name {
                Some(name) => call_args.keyword.push((name.clone(), value)),
                None => call_args.positional.push(value),
            }
        }
        self.set_line(line);

        if let Some(def) = self.unit.definition(callee).cloned() {
            return self.invoke(&def, call_args);
        }
        if let Some(native) = self.natives.get(callee).cloned() {
            return self.call_native(callee, &native, call_args);
        }

        let mut available = self.unit.definition_names();
        available.extend(self.natives.names());
        Err(self.fault(ErrorKind::UndefinedName {
            name: callee.to_string(),
            available,
        }))
    }

    fn call_native(&mut self, name: &str, native: &NativeFn, args: CallArgs) -> Result<Value, ScriptError> {
        if let Some((argument, _)) = args.keyword.first() {
            return Err(self.fault(ErrorKind::UnexpectedArgument {
                function: name.to_string(),
                argument: argument.clone(),
            }));
        }
        if self.frames.len() >= self.max_depth {
            return Err(self.fault(ErrorKind::RecursionLimit {
                limit: self.max_depth,
            }));
        }

        self.frames.push(ActiveFrame {
            function: name.to_string(),
            file: NATIVE_FILE.to_string(),
            line: 0,
            scope: HashMap::new(),
        });
        let result = native(&args.positional).map_err(|kind| self.fault(kind));
        self.frames.pop();
        result
    }
}

fn expected_arity(def: &FunctionDef) -> String {
    let required = def.params.iter().filter(|p| p.default.is_none()).count();
    let total = def.params.len();
    if required == total {
        total.to_string()
    } else {
        format!("{} to {}", required, total)
    }
}

fn normalize_index(index: i64, length: usize) -> Option<usize> {
    let resolved = if index < 0 { length as i64 + index } else { index };
    (resolved >= 0 && (resolved as usize) < length).then_some(resolved as usize)
}

fn operand_mismatch(op: BinaryOp, expected: &str, lhs: &Value, rhs: &Value) -> ErrorKind {
    ErrorKind::type_mismatch(
        format!("'{}'", op.symbol()),
        expected,
        format!("{} and {}", lhs.type_name(), rhs.type_name()),
    )
}

fn division_by_zero(op: BinaryOp) -> ErrorKind {
    ErrorKind::DivisionByZero {
        operation: op.symbol().to_string(),
    }
}

fn unary(op: UnaryOp, value: Value) -> Result<Value, ErrorKind> {
    match (op, value) {
        (UnaryOp::Not, value) => Ok(Value::Bool(!value.is_truthy())),
        (UnaryOp::Neg, Value::Int(n)) => n
            .checked_neg()
            .map(Value::Int)
            .ok_or_else(|| ErrorKind::other("integer overflow in unary '-'")),
        (UnaryOp::Neg, Value::Float(n)) => Ok(Value::Float(-n)),
        (UnaryOp::Neg, other) => Err(ErrorKind::type_mismatch(
            "unary '-'",
            "int or float",
            other.type_name(),
        )),
    }
}

fn int_arithmetic(op: BinaryOp, a: i64, b: i64) -> Result<Value, ErrorKind> {
    let result = match op {
        BinaryOp::Add => a.checked_add(b),
        BinaryOp::Sub => a.checked_sub(b),
        BinaryOp::Mul => a.checked_mul(b),
        BinaryOp::Div => {
            if b == 0 {
                return Err(division_by_zero(op));
            }
            return Ok(Value::Float(a as f64 / b as f64));
        }
        BinaryOp::Rem => {
            if b == 0 {
                return Err(division_by_zero(op));
            }
            // Result takes the sign of the divisor.
            a.checked_rem(b)
                .map(|r| if r != 0 && (r < 0) != (b < 0) { r + b } else { r })
        }
        _ => return Err(ErrorKind::other(format!("'{}' is not arithmetic", op.symbol()))),
    };
    result
        .map(Value::Int)
        .ok_or_else(|| ErrorKind::other(format!("integer overflow in '{}'", op.symbol())))
}

fn float_arithmetic(op: BinaryOp, a: f64, b: f64) -> Result<Value, ErrorKind> {
    let value = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => {
            if b == 0.0 {
                return Err(division_by_zero(op));
            }
            a / b
        }
        BinaryOp::Rem => {
            if b == 0.0 {
                return Err(division_by_zero(op));
            }
            let r = a % b;
            if r != 0.0 && (r < 0.0) != (b < 0.0) { r + b } else { r }
        }
        _ => return Err(ErrorKind::other(format!("'{}' is not arithmetic", op.symbol()))),
    };
    Ok(Value::Float(value))
}

fn compare(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value, ErrorKind> {
    let ordering = match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => a.partial_cmp(b),
        (Value::Str(a), Value::Str(b)) => a.partial_cmp(b),
        (l, r) => match (l.as_f64(), r.as_f64()) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => return Err(operand_mismatch(op, "two numbers or two strings", l, r)),
        },
    };
    let Some(ordering) = ordering else {
        return Ok(Value::Bool(false));
    };
    Ok(Value::Bool(match op {
        BinaryOp::Lt => ordering.is_lt(),
        BinaryOp::Le => ordering.is_le(),
        BinaryOp::Gt => ordering.is_gt(),
        _ => ordering.is_ge(),
    }))
}

fn binary(op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value, ErrorKind> {
    match op {
        BinaryOp::Eq => Ok(Value::Bool(lhs.loosely_equals(&rhs))),
        BinaryOp::NotEq => Ok(Value::Bool(!lhs.loosely_equals(&rhs))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => compare(op, &lhs, &rhs),
        BinaryOp::And => Ok(if lhs.is_truthy() { rhs } else { lhs }),
        BinaryOp::Or => Ok(if lhs.is_truthy() { lhs } else { rhs }),
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => match (lhs, rhs) {
            (Value::Int(a), Value::Int(b)) => int_arithmetic(op, a, b),
            (Value::Str(a), Value::Str(b)) if op == BinaryOp::Add => Ok(Value::Str(a + &b)),
            (Value::List(mut a), Value::List(b)) if op == BinaryOp::Add => {
                a.extend(b);
                Ok(Value::List(a))
            }
            (l, r) => match (l.as_f64(), r.as_f64()) {
                (Some(a), Some(b)) => float_arithmetic(op, a, b),
                _ => {
                    let expected = if op == BinaryOp::Add {
                        "two numbers, two strings or two lists"
                    } else {
                        "two numbers"
                    };
                    Err(operand_mismatch(op, expected, &l, &r))
                }
            },
        },
    }
}

fn index_value(target: Value, index: Value) -> Result<Value, ErrorKind> {
    match (target, index) {
        (Value::List(items), Value::Int(i)) => match normalize_index(i, items.len()) {
            Some(idx) => Ok(items[idx].clone()),
            None => Err(ErrorKind::IndexOutOfRange {
                index: i,
                length: items.len(),
            }),
        },
        (Value::Str(s), Value::Int(i)) => {
            let chars: Vec<char> = s.chars().collect();
            match normalize_index(i, chars.len()) {
                Some(idx) => Ok(Value::Str(chars[idx].to_string())),
                None => Err(ErrorKind::IndexOutOfRange {
                    index: i,
                    length: chars.len(),
                }),
            }
        }
        (Value::Map(entries), Value::Str(key)) => match entries.get(&key) {
            Some(value) => Ok(value.clone()),
            None => Err(ErrorKind::KeyNotFound {
                key,
                available: entries.keys().cloned().collect(),
            }),
        },
        (target, index) => Err(ErrorKind::type_mismatch(
            "indexing",
            "list[int], str[int] or map[str]",
            format!("{}[{}]", target.type_name(), index.type_name()),
        )),
    }
}

fn field(target: Value, name: &str) -> Result<Value, ErrorKind> {
    match target {
        Value::Map(entries) => match entries.get(name) {
            Some(value) => Ok(value.clone()),
            None => Err(ErrorKind::AttributeMissing {
                target: "map".to_string(),
                attribute: name.to_string(),
                available: entries.keys().cloned().collect(),
            }),
        },
        other => Err(ErrorKind::AttributeMissing {
            target: other.type_name().to_string(),
            attribute: name.to_string(),
            available: Vec::new(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(source: &str) -> CompiledUnit {
        CompiledUnit::compile("test", "test.mend", source).unwrap()
    }

    fn run(source: &str, function: &str, args: CallArgs) -> Result<Value, ScriptError> {
        let unit = unit(source);
        let natives = Natives::with_builtins();
        Interpreter::new(&unit, &natives).call(function, args)
    }

    #[test]
    fn test_loops_and_collections() {
        let source = r#"
fn total(items, skip = nil) {
    let sum = 0;
    for x in items {
        if x == skip { continue; }
        if x > 100 { break; }
        sum = sum + x;
    }
    return sum;
}
"#;
        let items = Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3), Value::Int(500), Value::Int(4)]);
        assert_eq!(run(source, "total", CallArgs::positional([items.clone()])).unwrap(), Value::Int(6));
        assert_eq!(
            run(source, "total", CallArgs::new().arg(items).kwarg("skip", 2)).unwrap(),
            Value::Int(4)
        );
    }

    #[test]
    fn test_division_semantics() {
        let source = "fn d(a, b) { return a / b; }\nfn m(a, b) { return a % b; }";
        assert_eq!(run(source, "d", CallArgs::new().arg(10).arg(4)).unwrap(), Value::Float(2.5));
        assert_eq!(run(source, "m", CallArgs::new().arg(-7).arg(3)).unwrap(), Value::Int(2));
        assert_eq!(run(source, "m", CallArgs::new().arg(7).arg(-3)).unwrap(), Value::Int(-2));
    }

    #[test]
    fn test_division_by_zero_carries_trace() {
        let source = "fn outer(x) {\n    return inner(x, 0);\n}\n\nfn inner(a, b) {\n    return a / b;\n}\n";
        let err = run(source, "outer", CallArgs::new().arg(10)).unwrap_err();

        assert_eq!(err.kind.name(), "DivisionByZero");
        assert_eq!(err.trace.len(), 2);
        assert_eq!(err.trace[0].function, "outer");
        assert_eq!(err.trace[0].line, 2);
        let deepest = err.deepest_frame().unwrap();
        assert_eq!(deepest.function, "inner");
        assert_eq!(deepest.file, "test.mend");
        assert_eq!(deepest.line, 6);
        assert_eq!(deepest.code_text.as_deref(), Some("return a / b;"));
    }

    #[test]
    fn test_native_frames_are_recorded() {
        let source = "fn parse(text) {\n    return int(text);\n}";
        let err = run(source, "parse", CallArgs::new().arg("4x")).unwrap_err();

        assert_eq!(err.kind.name(), "InvalidInput");
        assert_eq!(err.deepest_frame().unwrap().file, NATIVE_FILE);
        assert_eq!(err.deepest_frame().unwrap().function, "int");
        assert_eq!(err.frame_in("test.mend").unwrap().function, "parse");
        assert_eq!(err.frame_in("test.mend").unwrap().line, 2);
    }

    #[test]
    fn test_bind_applies_defaults_in_declaration_order() {
        let unit = unit("fn f(a, b = a * 2, c = \"x\") { return nil; }");
        let natives = Natives::with_builtins();
        let def = unit.definition("f").cloned().unwrap();

        let bound = Interpreter::new(&unit, &natives)
            .bind(&def, CallArgs::new().arg(3).kwarg("c", "y"))
            .unwrap();
        assert_eq!(
            bound,
            vec![
                ("a".to_string(), Value::Int(3)),
                ("b".to_string(), Value::Int(6)),
                ("c".to_string(), Value::from("y")),
            ]
        );
    }

    #[test]
    fn test_binding_errors() {
        let source = "fn f(a, b = 1) { return a; }";
        let missing = run(source, "f", CallArgs::new()).unwrap_err();
        assert!(matches!(missing.kind, ErrorKind::MissingArgument { ref parameter, .. } if parameter == "a"));

        let extra = run(source, "f", CallArgs::positional([Value::Int(1), Value::Int(2), Value::Int(3)])).unwrap_err();
        assert!(matches!(extra.kind, ErrorKind::ArityMismatch { given: 3, .. }));

        let unknown = run(source, "f", CallArgs::new().arg(1).kwarg("z", 1)).unwrap_err();
        assert!(matches!(unknown.kind, ErrorKind::UnexpectedArgument { .. }));

        let duplicate = run(source, "f", CallArgs::new().arg(1).kwarg("a", 1)).unwrap_err();
        assert!(matches!(duplicate.kind, ErrorKind::DuplicateArgument { .. }));

        assert!([&missing, &extra, &unknown, &duplicate].iter().all(|e| e.kind.is_binding_error()));
        let body = run("fn g(a) { return a / 0; }", "g", CallArgs::new().arg(1)).unwrap_err();
        assert!(!body.kind.is_binding_error());
    }

    #[test]
    fn test_lookup_errors_list_alternatives() {
        let source = "fn f(m) { return m[\"missing\"]; }\nfn g(m) { return m.nope; }\nfn h() { return ghost; }";
        let map = Value::Map(BTreeMap::from([("present".to_string(), Value::Int(1))]));

        let err = run(source, "f", CallArgs::positional([map.clone()])).unwrap_err();
        assert_eq!(
            err.kind,
            ErrorKind::KeyNotFound {
                key: "missing".into(),
                available: vec!["present".into()],
            }
        );

        let err = run(source, "g", CallArgs::positional([map])).unwrap_err();
        assert_eq!(err.kind.name(), "AttributeMissing");

        let err = run(source, "h", CallArgs::new()).unwrap_err();
        assert_eq!(err.kind.name(), "UndefinedName");
    }

    #[test]
    fn test_index_out_of_range() {
        let err = run("fn f(xs) { return xs[5]; }", "f", CallArgs::positional([Value::List(vec![Value::Int(1)])])).unwrap_err();
        assert_eq!(err.kind, ErrorKind::IndexOutOfRange { index: 5, length: 1 });
    }

    #[test]
    fn test_raise_and_type_mismatch() {
        let err = run("fn f(x) { raise \"bad value: \" + str(x); }", "f", CallArgs::new().arg(3)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Raised { message: "bad value: 3".into() });

        let err = run("fn f() { return 1 + \"a\"; }", "f", CallArgs::new()).unwrap_err();
        assert_eq!(err.kind.name(), "TypeMismatch");
    }

    #[test]
    fn test_recursion_limit() {
        let unit = unit("fn r(n) { return r(n + 1); }");
        let natives = Natives::with_builtins();
        let err = Interpreter::new(&unit, &natives)
            .with_limits(20, DEFAULT_STEP_BUDGET)
            .call("r", CallArgs::new().arg(0))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::RecursionLimit { limit: 20 });
        assert_eq!(err.trace.len(), 20);
    }

    #[test]
    fn test_step_budget() {
        let unit = unit("fn spin() { while true { } }");
        let natives = Natives::with_builtins();
        let err = Interpreter::new(&unit, &natives)
            .with_limits(MAX_CALL_DEPTH, 1_000)
            .call("spin", CallArgs::new())
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::StepLimit { limit: 1_000 });
    }

    #[test]
    fn test_item_assignment() {
        let source = "fn f() {\n    let xs = [1, 2, 3];\n    xs[-1] = 9;\n    let m = {};\n    m[\"k\"] = xs;\n    return m;\n}";
        let value = run(source, "f", CallArgs::new()).unwrap();
        assert_eq!(value.to_string(), "{\"k\": [1, 2, 9]}");
    }
}
