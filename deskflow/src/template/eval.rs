use super::parser::{BinaryOp, Expr};
use crate::errors::RenderError;
use crate::process;
use serde_json::{Map, Number, Value};
use std::cmp::Ordering;
use std::time::Duration;
use tracing::debug;

/// Longest list `range()` will build.
pub const MAX_RANGE: i64 = 100_000;

/// Variables and limits visible to an expression while it is evaluated.
pub struct Scope<'a> {
    pub vars: &'a Map<String, Value>,
    pub shell_timeout: Duration,
}

#[derive(Debug, Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n
                .as_i64()
                .map(Num::Int)
                .or_else(|| n.as_f64().map(Num::Float)),
            Value::Bool(b) => Some(Num::Int(i64::from(*b))),
            _ => None,
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }
}

fn float_value(f: f64) -> Result<Value, RenderError> {
    Number::from_f64(f)
        .map(Value::Number)
        .ok_or_else(|| RenderError::Evaluation(format!("result {f} is not a finite number")))
}

/// Python-style truthiness.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// How a value is written into rendered text.
pub fn to_display(value: &Value) -> String {
    match value {
        Value::Null => "none".to_string(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "none",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "int",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "mapping",
    }
}

pub fn evaluate(expr: &Expr, scope: &Scope<'_>) -> Result<Value, RenderError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::List(items) => items
            .iter()
            .map(|item| evaluate(item, scope))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Expr::Var(name) => scope
            .vars
            .get(name)
            .cloned()
            .ok_or_else(|| RenderError::Undefined(format!("'{name}' is undefined"))),
        Expr::Attr(target, attr) => {
            let base = evaluate(target, scope)?;
            lookup_attr(&base, attr)
        }
        Expr::Index(target, index) => {
            let base = evaluate(target, scope)?;
            let index = evaluate(index, scope)?;
            lookup_index(&base, &index)
        }
        Expr::Call { name, args, kwargs } => call_function(name, args, kwargs, scope),
        Expr::Filter { input, name, args } => apply_filter(input, name, args, scope),
        Expr::Test {
            input,
            name,
            negated,
        } => {
            let result = apply_test(input, name, scope)?;
            Ok(Value::Bool(result != *negated))
        }
        Expr::Not(inner) => Ok(Value::Bool(!is_truthy(&evaluate(inner, scope)?))),
        Expr::Neg(inner) => {
            let value = evaluate(inner, scope)?;
            match Num::from_value(&value) {
                Some(Num::Int(i)) => i
                    .checked_neg()
                    .map(Value::from)
                    .ok_or_else(|| RenderError::Evaluation("integer overflow".into())),
                Some(Num::Float(f)) => float_value(-f),
                None => Err(RenderError::Evaluation(format!(
                    "bad operand type for unary -: '{}'",
                    type_name(&value)
                ))),
            }
        }
        Expr::And(left, right) => {
            let left = evaluate(left, scope)?;
            if !is_truthy(&left) {
                return Ok(left);
            }
            evaluate(right, scope)
        }
        Expr::Or(left, right) => {
            let left = evaluate(left, scope)?;
            if is_truthy(&left) {
                return Ok(left);
            }
            evaluate(right, scope)
        }
        Expr::Binary(op, left, right) => {
            let left = evaluate(left, scope)?;
            let right = evaluate(right, scope)?;
            binary(*op, &left, &right)
        }
        Expr::Conditional {
            then,
            cond,
            otherwise,
        } => {
            if is_truthy(&evaluate(cond, scope)?) {
                evaluate(then, scope)
            } else if let Some(otherwise) = otherwise {
                evaluate(otherwise, scope)
            } else {
                Ok(Value::Null)
            }
        }
    }
}

fn lookup_attr(base: &Value, attr: &str) -> Result<Value, RenderError> {
    match base {
        Value::Object(map) => map.get(attr).cloned().ok_or_else(|| {
            RenderError::Undefined(format!("mapping has no attribute '{attr}'"))
        }),
        other => Err(RenderError::Undefined(format!(
            "'{}' value has no attribute '{attr}'",
            type_name(other)
        ))),
    }
}

fn lookup_index(base: &Value, index: &Value) -> Result<Value, RenderError> {
    match (base, index) {
        (Value::Array(items), Value::Number(n)) => {
            let i = n
                .as_i64()
                .ok_or_else(|| RenderError::Evaluation("list index must be an integer".into()))?;
            let len = items.len() as i64;
            let resolved = if i < 0 { len + i } else { i };
            if resolved < 0 || resolved >= len {
                return Err(RenderError::Undefined(format!("list index {i} out of range")));
            }
            Ok(items[resolved as usize].clone())
        }
        (Value::Object(map), Value::String(key)) => map
            .get(key)
            .cloned()
            .ok_or_else(|| RenderError::Undefined(format!("mapping has no key '{key}'"))),
        (Value::String(s), Value::Number(n)) => {
            let i = n
                .as_i64()
                .ok_or_else(|| RenderError::Evaluation("string index must be an integer".into()))?;
            let chars: Vec<char> = s.chars().collect();
            let len = chars.len() as i64;
            let resolved = if i < 0 { len + i } else { i };
            if resolved < 0 || resolved >= len {
                return Err(RenderError::Undefined(format!("string index {i} out of range")));
            }
            Ok(Value::String(chars[resolved as usize].to_string()))
        }
        (base, index) => Err(RenderError::Evaluation(format!(
            "cannot index '{}' with '{}'",
            type_name(base),
            type_name(index)
        ))),
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (Num::from_value(left), Num::from_value(right)) {
        (Some(Num::Int(a)), Some(Num::Int(b))) => a == b,
        (Some(a), Some(b)) if !left.is_boolean() || !right.is_boolean() => {
            a.as_f64() == b.as_f64()
        }
        _ => left == right,
    }
}

fn compare(symbol: &str, left: &Value, right: &Value) -> Result<Ordering, RenderError> {
    match (left, right) {
        (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
        _ => match (Num::from_value(left), Num::from_value(right)) {
            (Some(Num::Int(a)), Some(Num::Int(b))) => Ok(a.cmp(&b)),
            (Some(a), Some(b)) => a.as_f64().partial_cmp(&b.as_f64()).ok_or_else(|| {
                RenderError::Evaluation("cannot order NaN values".into())
            }),
            _ => Err(RenderError::Evaluation(format!(
                "'{symbol}' not supported between '{}' and '{}'",
                type_name(left),
                type_name(right)
            ))),
        },
    }
}

fn contains(container: &Value, item: &Value) -> Result<bool, RenderError> {
    match container {
        Value::Array(items) => Ok(items.iter().any(|v| values_equal(v, item))),
        Value::String(s) => match item {
            Value::String(needle) => Ok(s.contains(needle.as_str())),
            other => Err(RenderError::Evaluation(format!(
                "'in <string>' requires string as left operand, not '{}'",
                type_name(other)
            ))),
        },
        Value::Object(map) => Ok(map.contains_key(&to_display(item))),
        other => Err(RenderError::Evaluation(format!(
            "argument of type '{}' is not iterable",
            type_name(other)
        ))),
    }
}

/// Integer division rounding toward negative infinity. `None` on overflow.
fn floor_div(a: i64, b: i64) -> Option<i64> {
    let q = a.checked_div(b)?;
    let r = a.checked_rem(b)?;
    if r != 0 && ((r < 0) != (b < 0)) {
        q.checked_sub(1)
    } else {
        Some(q)
    }
}

/// Remainder carrying the sign of the divisor. `None` on overflow.
fn floor_mod(a: i64, b: i64) -> Option<i64> {
    let r = a.checked_rem(b)?;
    if r != 0 && ((r < 0) != (b < 0)) {
        r.checked_add(b)
    } else {
        Some(r)
    }
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, RenderError> {
    match op {
        BinaryOp::Eq => return Ok(Value::Bool(values_equal(left, right))),
        BinaryOp::Ne => return Ok(Value::Bool(!values_equal(left, right))),
        BinaryOp::Lt => return Ok(Value::Bool(compare("<", left, right)? == Ordering::Less)),
        BinaryOp::Le => return Ok(Value::Bool(compare("<=", left, right)? != Ordering::Greater)),
        BinaryOp::Gt => return Ok(Value::Bool(compare(">", left, right)? == Ordering::Greater)),
        BinaryOp::Ge => return Ok(Value::Bool(compare(">=", left, right)? != Ordering::Less)),
        BinaryOp::In => return Ok(Value::Bool(contains(right, left)?)),
        BinaryOp::NotIn => return Ok(Value::Bool(!contains(right, left)?)),
        BinaryOp::Concat => {
            return Ok(Value::String(format!(
                "{}{}",
                to_display(left),
                to_display(right)
            )))
        }
        _ => {}
    }

    if op == BinaryOp::Add {
        match (left, right) {
            (Value::String(a), Value::String(b)) => return Ok(Value::String(format!("{a}{b}"))),
            (Value::Array(a), Value::Array(b)) => {
                let mut joined = a.clone();
                joined.extend(b.iter().cloned());
                return Ok(Value::Array(joined));
            }
            _ => {}
        }
    }

    let (Some(a), Some(b)) = (Num::from_value(left), Num::from_value(right)) else {
        return Err(RenderError::Evaluation(format!(
            "unsupported operand types for {op:?}: '{}' and '{}'",
            type_name(left),
            type_name(right)
        )));
    };

    let overflow = || RenderError::Evaluation("integer overflow".into());
    let zero = || RenderError::Evaluation("division by zero".into());

    match (op, a, b) {
        (BinaryOp::Add, Num::Int(x), Num::Int(y)) => {
            x.checked_add(y).map(Value::from).ok_or_else(overflow)
        }
        (BinaryOp::Sub, Num::Int(x), Num::Int(y)) => {
            x.checked_sub(y).map(Value::from).ok_or_else(overflow)
        }
        (BinaryOp::Mul, Num::Int(x), Num::Int(y)) => {
            x.checked_mul(y).map(Value::from).ok_or_else(overflow)
        }
        (BinaryOp::FloorDiv, Num::Int(x), Num::Int(y)) => {
            if y == 0 {
                return Err(zero());
            }
            floor_div(x, y).map(Value::from).ok_or_else(overflow)
        }
        (BinaryOp::Mod, Num::Int(x), Num::Int(y)) => {
            if y == 0 {
                return Err(zero());
            }
            floor_mod(x, y).map(Value::from).ok_or_else(overflow)
        }
        (BinaryOp::Add, x, y) => float_value(x.as_f64() + y.as_f64()),
        (BinaryOp::Sub, x, y) => float_value(x.as_f64() - y.as_f64()),
        (BinaryOp::Mul, x, y) => float_value(x.as_f64() * y.as_f64()),
        (BinaryOp::Div, x, y) => {
            if y.as_f64() == 0.0 {
                return Err(zero());
            }
            float_value(x.as_f64() / y.as_f64())
        }
        (BinaryOp::FloorDiv, x, y) => {
            if y.as_f64() == 0.0 {
                return Err(zero());
            }
            float_value((x.as_f64() / y.as_f64()).floor())
        }
        (BinaryOp::Mod, x, y) => {
            let (x, y) = (x.as_f64(), y.as_f64());
            if y == 0.0 {
                return Err(zero());
            }
            float_value(((x % y) + y) % y)
        }
        _ => Err(RenderError::Evaluation(format!("unsupported operator {op:?}"))),
    }
}

/// Evaluates `input`, mapping an undefined reference to `None`.
fn evaluate_lenient(input: &Expr, scope: &Scope<'_>) -> Result<Option<Value>, RenderError> {
    match evaluate(input, scope) {
        Ok(value) => Ok(Some(value)),
        Err(RenderError::Undefined(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

fn apply_test(input: &Expr, name: &str, scope: &Scope<'_>) -> Result<bool, RenderError> {
    match name {
        "defined" => Ok(evaluate_lenient(input, scope)?.is_some()),
        "undefined" => Ok(evaluate_lenient(input, scope)?.is_none()),
        "none" => Ok(evaluate(input, scope)?.is_null()),
        "string" => Ok(evaluate(input, scope)?.is_string()),
        "number" => Ok(evaluate(input, scope)?.is_number()),
        other => Err(RenderError::Syntax(format!("unknown test '{other}'"))),
    }
}

fn expect_args(name: &str, args: &[Value], max: usize) -> Result<(), RenderError> {
    if args.len() > max {
        return Err(RenderError::Evaluation(format!(
            "'{name}' takes at most {max} argument(s), got {}",
            args.len()
        )));
    }
    Ok(())
}

fn parse_bool_word(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Some(true),
        "false" | "no" | "0" | "off" | "none" | "" => Some(false),
        _ => None,
    }
}

fn apply_filter(
    input: &Expr,
    name: &str,
    args: &[Expr],
    scope: &Scope<'_>,
) -> Result<Value, RenderError> {
    let args = args
        .iter()
        .map(|a| evaluate(a, scope))
        .collect::<Result<Vec<_>, _>>()?;

    if name == "default" || name == "d" {
        expect_args(name, &args, 1)?;
        let fallback = args.into_iter().next().unwrap_or(Value::String(String::new()));
        return Ok(match evaluate_lenient(input, scope)? {
            Some(Value::Null) | None => fallback,
            Some(value) => value,
        });
    }

    let value = evaluate(input, scope)?;
    match name {
        "upper" => Ok(Value::String(to_display(&value).to_uppercase())),
        "lower" => Ok(Value::String(to_display(&value).to_lowercase())),
        "strip" | "trim" => Ok(Value::String(to_display(&value).trim().to_string())),
        "title" => Ok(Value::String(title_case(&to_display(&value)))),
        "string" | "str" => Ok(Value::String(to_display(&value))),
        "int" => to_int(&value).map(Value::from),
        "float" => to_float(&value).and_then(float_value),
        "bool" => Ok(Value::Bool(match &value {
            Value::String(s) => parse_bool_word(s).unwrap_or(true),
            other => is_truthy(other),
        })),
        "length" | "count" => match &value {
            Value::String(s) => Ok(Value::from(s.chars().count())),
            Value::Array(items) => Ok(Value::from(items.len())),
            Value::Object(map) => Ok(Value::from(map.len())),
            other => Err(RenderError::Evaluation(format!(
                "object of type '{}' has no length",
                type_name(other)
            ))),
        },
        "join" => {
            expect_args(name, &args, 1)?;
            let separator = args.first().map(to_display).unwrap_or_default();
            match &value {
                Value::Array(items) => Ok(Value::String(
                    items.iter().map(to_display).collect::<Vec<_>>().join(&separator),
                )),
                other => Ok(Value::String(to_display(other))),
            }
        }
        other => Err(RenderError::Syntax(format!("no filter named '{other}'"))),
    }
}

fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut start_of_word = true;
    for ch in s.chars() {
        if ch.is_alphabetic() {
            if start_of_word {
                out.extend(ch.to_uppercase());
            } else {
                out.extend(ch.to_lowercase());
            }
            start_of_word = false;
        } else {
            out.push(ch);
            start_of_word = true;
        }
    }
    out
}

fn to_int(value: &Value) -> Result<i64, RenderError> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.trunc() as i64))
            .ok_or_else(|| RenderError::Evaluation(format!("cannot convert {n} to int"))),
        Value::Bool(b) => Ok(i64::from(*b)),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| RenderError::Evaluation(format!("invalid literal for int(): '{s}'"))),
        other => Err(RenderError::Evaluation(format!(
            "cannot convert '{}' to int",
            type_name(other)
        ))),
    }
}

fn to_float(value: &Value) -> Result<f64, RenderError> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| RenderError::Evaluation(format!("cannot convert {n} to float"))),
        Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => s.trim().parse::<f64>().map_err(|_| {
            RenderError::Evaluation(format!("could not convert string to float: '{s}'"))
        }),
        other => Err(RenderError::Evaluation(format!(
            "cannot convert '{}' to float",
            type_name(other)
        ))),
    }
}

fn call_function(
    name: &str,
    args: &[Expr],
    kwargs: &[(String, Expr)],
    scope: &Scope<'_>,
) -> Result<Value, RenderError> {
    let positional = args
        .iter()
        .map(|a| evaluate(a, scope))
        .collect::<Result<Vec<_>, _>>()?;
    let mut named = Map::new();
    for (key, expr) in kwargs {
        named.insert(key.clone(), evaluate(expr, scope)?);
    }
    let arg = |index: usize, key: &str| positional.get(index).or_else(|| named.get(key)).cloned();

    match name {
        "env" => {
            let var = arg(0, "name")
                .map(|v| to_display(&v))
                .ok_or_else(|| RenderError::Evaluation("env() requires a variable name".into()))?;
            let fallback = arg(1, "default").map(|v| to_display(&v)).unwrap_or_default();
            Ok(Value::String(std::env::var(&var).unwrap_or(fallback)))
        }
        "shell" => {
            let command = arg(0, "command")
                .map(|v| to_display(&v))
                .ok_or_else(|| RenderError::Evaluation("shell() requires a command".into()))?;
            let timeout = match arg(1, "timeout") {
                Some(v) => Duration::try_from_secs_f64(to_float(&v)?.max(0.0))
                    .unwrap_or(scope.shell_timeout),
                None => scope.shell_timeout,
            };
            Ok(Value::String(run_template_shell(&command, timeout)))
        }
        "range" => {
            let (start, end) = match (arg(0, "start"), arg(1, "end")) {
                (Some(end), None) => (0, to_int(&end)?),
                (Some(start), Some(end)) => (to_int(&start)?, to_int(&end)?),
                _ => return Err(RenderError::Evaluation("range() requires an argument".into())),
            };
            if i128::from(end) - i128::from(start) > i128::from(MAX_RANGE) {
                return Err(RenderError::Evaluation(format!(
                    "range() is limited to {MAX_RANGE} items"
                )));
            }
            Ok(Value::Array((start..end).map(Value::from).collect()))
        }
        other => Err(RenderError::Undefined(format!("'{other}' is undefined"))),
    }
}

/// Runs a command for the `shell()` template function. Failures and timeouts
/// produce empty output.
fn run_template_shell(command: &str, timeout: Duration) -> String {
    let options = process::CommandOptions {
        timeout: Some(timeout),
        check: false,
        ..Default::default()
    };
    match process::run_command("sh", &["-c", command], &options) {
        Ok(output) => output,
        Err(e) => {
            debug!("shell() in template failed for '{}': {}", command, e);
            String::new()
        }
    }
}
