//! Tree-walking evaluator over `serde_json::Value`.

use std::cmp::Ordering;

use ledgerclaw_core::EvaluationError;
use serde_json::{Map, Value};

use super::parser::{BinaryOp, Expr, UnaryOp};

/// Numeric view of a value. Integers stay integral until mixed with floats.
#[derive(Debug, Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn of(value: &Value) -> Option<Num> {
        let Value::Number(n) = value else {
            return None;
        };
        match n.as_i64() {
            Some(i) => Some(Num::Int(i)),
            None => n.as_f64().map(Num::Float),
        }
    }

    /// Numbers, plus strings that parse as numbers.
    fn coerce(value: &Value) -> Option<Num> {
        match value {
            Value::String(s) => {
                let s = s.trim();
                s.parse::<i64>()
                    .map(Num::Int)
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite()).map(Num::Float))
            }
            other => Num::of(other),
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }

    fn cmp(self, other: Num) -> Option<Ordering> {
        match (self, other) {
            (Num::Int(a), Num::Int(b)) => Some(a.cmp(&b)),
            (a, b) => a.as_f64().partial_cmp(&b.as_f64()),
        }
    }

    fn into_value(self) -> Result<Value, EvaluationError> {
        match self {
            Num::Int(i) => Ok(Value::from(i)),
            Num::Float(f) => serde_json::Number::from_f64(f)
                .map(Value::Number)
                .ok_or_else(|| EvaluationError::Type(format!("arithmetic produced {f}"))),
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Evaluate `expr` with the top-level names in `context`.
pub fn eval(expr: &Expr, context: &Map<String, Value>) -> Result<Value, EvaluationError> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Ident(name) => context
            .get(name)
            .cloned()
            .ok_or_else(|| EvaluationError::UndefinedReference(name.clone())),
        Expr::Array(items) => items
            .iter()
            .map(|item| eval(item, context))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Expr::Member(base, field) => match eval(base, context)? {
            Value::Object(mut map) => map
                .remove(field)
                .ok_or_else(|| EvaluationError::UndefinedReference(expr.path())),
            other => Err(EvaluationError::Type(format!(
                "cannot read field '{field}' of {}",
                type_name(&other)
            ))),
        },
        Expr::Index(base, index) => {
            let base = eval(base, context)?;
            let index = eval(index, context)?;
            index_value(base, &index, expr)
        }
        Expr::Unary(op, operand) => {
            let value = eval(operand, context)?;
            match (op, &value) {
                (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
                (UnaryOp::Neg, _) => match Num::of(&value) {
                    Some(Num::Int(i)) => i
                        .checked_neg()
                        .map(Value::from)
                        .ok_or_else(|| EvaluationError::Type("integer overflow".into())),
                    Some(Num::Float(f)) => Num::Float(-f).into_value(),
                    None => Err(EvaluationError::Type(format!(
                        "cannot negate {}",
                        type_name(&value)
                    ))),
                },
                (UnaryOp::Not, other) => Err(EvaluationError::Type(format!(
                    "'!' expects bool, got {}",
                    type_name(other)
                ))),
            }
        }
        Expr::Binary(BinaryOp::And, lhs, rhs) => {
            if !expect_bool(eval(lhs, context)?, "&&")? {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(expect_bool(eval(rhs, context)?, "&&")?))
        }
        Expr::Binary(BinaryOp::Or, lhs, rhs) => {
            if expect_bool(eval(lhs, context)?, "||")? {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(expect_bool(eval(rhs, context)?, "||")?))
        }
        Expr::Binary(op, lhs, rhs) => {
            let lhs = eval(lhs, context)?;
            let rhs = eval(rhs, context)?;
            binary(*op, &lhs, &rhs)
        }
        Expr::Call(name, args) => {
            let args = args
                .iter()
                .map(|a| eval(a, context))
                .collect::<Result<Vec<_>, _>>()?;
            call(name, &args)
        }
    }
}

fn expect_bool(value: Value, op: &str) -> Result<bool, EvaluationError> {
    match value {
        Value::Bool(b) => Ok(b),
        other => Err(EvaluationError::Type(format!(
            "'{op}' expects bool operands, got {}",
            type_name(&other)
        ))),
    }
}

fn index_value(base: Value, index: &Value, expr: &Expr) -> Result<Value, EvaluationError> {
    match (base, index) {
        (Value::Array(mut items), Value::Number(_)) => {
            let len = items.len() as i64;
            let i = index
                .as_i64()
                .ok_or_else(|| EvaluationError::Type("array index must be an integer".into()))?;
            let i = if i < 0 { len + i } else { i };
            if i < 0 || i >= len {
                return Err(EvaluationError::UndefinedReference(format!(
                    "{} index {} out of range",
                    expr.path(),
                    i
                )));
            }
            Ok(items.swap_remove(i as usize))
        }
        (Value::Object(mut map), Value::String(key)) => map
            .remove(key)
            .ok_or_else(|| EvaluationError::UndefinedReference(format!("{}[{key:?}]", expr.path()))),
        (Value::String(s), Value::Number(_)) => {
            let i = index
                .as_u64()
                .ok_or_else(|| EvaluationError::Type("string index must be a non-negative integer".into()))?;
            s.chars()
                .nth(i as usize)
                .map(|c| Value::String(c.to_string()))
                .ok_or_else(|| EvaluationError::UndefinedReference(format!("{} index {i} out of range", expr.path())))
        }
        (base, index) => Err(EvaluationError::Type(format!(
            "cannot index {} with {}",
            type_name(&base),
            type_name(index)
        ))),
    }
}

/// Equality with numeric normalisation: `1 == 1.0` and `"150" == 150`.
fn loose_eq(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Number(_), Value::Number(_))
        | (Value::Number(_), Value::String(_))
        | (Value::String(_), Value::Number(_)) => {
            match (Num::coerce(lhs), Num::coerce(rhs)) {
                (Some(a), Some(b)) => a.cmp(b) == Some(Ordering::Equal),
                _ => false,
            }
        }
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| loose_eq(x, y))
        }
        _ => lhs == rhs,
    }
}

fn compare(lhs: &Value, rhs: &Value, op: BinaryOp) -> Result<bool, EvaluationError> {
    let ordering = match (lhs, rhs) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => match (Num::coerce(lhs), Num::coerce(rhs)) {
            (Some(a), Some(b)) if lhs.is_number() || rhs.is_number() => a.cmp(b),
            _ => {
                return Err(EvaluationError::Type(format!(
                    "cannot compare {} {} {}",
                    type_name(lhs),
                    op.symbol(),
                    type_name(rhs)
                )));
            }
        },
    };
    let Some(ordering) = ordering else {
        return Ok(false);
    };
    Ok(match op {
        BinaryOp::Lt => ordering == Ordering::Less,
        BinaryOp::Le => ordering != Ordering::Greater,
        BinaryOp::Gt => ordering == Ordering::Greater,
        BinaryOp::Ge => ordering != Ordering::Less,
        _ => unreachable!("compare called with {op:?}"),
    })
}

fn arithmetic(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value, EvaluationError> {
    if let (BinaryOp::Add, Value::String(a), Value::String(b)) = (op, lhs, rhs) {
        return Ok(Value::String(format!("{a}{b}")));
    }
    let (Some(a), Some(b)) = (Num::of(lhs), Num::of(rhs)) else {
        return Err(EvaluationError::Type(format!(
            "cannot apply '{}' to {} and {}",
            op.symbol(),
            type_name(lhs),
            type_name(rhs)
        )));
    };
    let overflow = || EvaluationError::Type("integer overflow".into());

    let result = match (a, b) {
        (Num::Int(x), Num::Int(y)) => match op {
            BinaryOp::Add => Num::Int(x.checked_add(y).ok_or_else(overflow)?),
            BinaryOp::Sub => Num::Int(x.checked_sub(y).ok_or_else(overflow)?),
            BinaryOp::Mul => Num::Int(x.checked_mul(y).ok_or_else(overflow)?),
            BinaryOp::Div | BinaryOp::Rem if y == 0 => {
                return Err(EvaluationError::Type("division by zero".into()));
            }
            BinaryOp::Div if x % y == 0 => Num::Int(x / y),
            BinaryOp::Div => Num::Float(x as f64 / y as f64),
            BinaryOp::Rem => Num::Int(x % y),
            _ => unreachable!("arithmetic called with {op:?}"),
        },
        (a, b) => {
            let (x, y) = (a.as_f64(), b.as_f64());
            match op {
                BinaryOp::Add => Num::Float(x + y),
                BinaryOp::Sub => Num::Float(x - y),
                BinaryOp::Mul => Num::Float(x * y),
                BinaryOp::Div | BinaryOp::Rem if y == 0.0 => {
                    return Err(EvaluationError::Type("division by zero".into()));
                }
                BinaryOp::Div => Num::Float(x / y),
                BinaryOp::Rem => Num::Float(x % y),
                _ => unreachable!("arithmetic called with {op:?}"),
            }
        }
    };
    result.into_value()
}

fn string_args<'a>(name: &str, lhs: &'a Value, rhs: &'a Value) -> Result<(&'a str, &'a str), EvaluationError> {
    match (lhs, rhs) {
        (Value::String(a), Value::String(b)) => Ok((a, b)),
        _ => Err(EvaluationError::Type(format!(
            "{name} expects strings, got {} and {}",
            type_name(lhs),
            type_name(rhs)
        ))),
    }
}

fn contains(haystack: &Value, needle: &Value) -> Result<bool, EvaluationError> {
    match haystack {
        Value::Array(items) => Ok(items.iter().any(|item| loose_eq(item, needle))),
        Value::Object(map) => match needle {
            Value::String(key) => Ok(map.contains_key(key)),
            other => Err(EvaluationError::Type(format!(
                "object keys are strings, got {}",
                type_name(other)
            ))),
        },
        _ => {
            let (a, b) = string_args("contains", haystack, needle)?;
            Ok(a.contains(b))
        }
    }
}

fn binary(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value, EvaluationError> {
    let result = match op {
        BinaryOp::Eq => loose_eq(lhs, rhs),
        BinaryOp::Ne => !loose_eq(lhs, rhs),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => compare(lhs, rhs, op)?,
        BinaryOp::In => contains(rhs, lhs)?,
        BinaryOp::Contains => contains(lhs, rhs)?,
        BinaryOp::StartsWith => {
            let (a, b) = string_args("startsWith", lhs, rhs)?;
            a.starts_with(b)
        }
        BinaryOp::EndsWith => {
            let (a, b) = string_args("endsWith", lhs, rhs)?;
            a.ends_with(b)
        }
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
            return arithmetic(op, lhs, rhs);
        }
        BinaryOp::And | BinaryOp::Or => {
            let op_name = op.symbol();
            let a = expect_bool(lhs.clone(), op_name)?;
            let b = expect_bool(rhs.clone(), op_name)?;
            if op == BinaryOp::And { a && b } else { a || b }
        }
    };
    Ok(Value::Bool(result))
}

fn call(name: &str, args: &[Value]) -> Result<Value, EvaluationError> {
    let arity = |n: usize| {
        if args.len() == n {
            Ok(())
        } else {
            Err(EvaluationError::Type(format!(
                "{name}() takes {n} argument(s), got {}",
                args.len()
            )))
        }
    };

    match name {
        "contains" | "startsWith" | "endsWith" => {
            arity(2)?;
            let op = match name {
                "contains" => BinaryOp::Contains,
                "startsWith" => BinaryOp::StartsWith,
                _ => BinaryOp::EndsWith,
            };
            binary(op, &args[0], &args[1])
        }
        "len" => {
            arity(1)?;
            let len = match &args[0] {
                Value::String(s) => s.chars().count(),
                Value::Array(a) => a.len(),
                Value::Object(m) => m.len(),
                other => {
                    return Err(EvaluationError::Type(format!(
                        "len() of {}",
                        type_name(other)
                    )));
                }
            };
            Ok(Value::from(len as u64))
        }
        "lower" | "upper" => {
            arity(1)?;
            match &args[0] {
                Value::String(s) if name == "lower" => Ok(Value::String(s.to_lowercase())),
                Value::String(s) => Ok(Value::String(s.to_uppercase())),
                other => Err(EvaluationError::Type(format!(
                    "{name}() of {}",
                    type_name(other)
                ))),
            }
        }
        "abs" => {
            arity(1)?;
            match Num::of(&args[0]) {
                Some(Num::Int(i)) => i
                    .checked_abs()
                    .map(Value::from)
                    .ok_or_else(|| EvaluationError::Type("integer overflow".into())),
                Some(Num::Float(f)) => Num::Float(f.abs()).into_value(),
                None => Err(EvaluationError::Type(format!(
                    "abs() of {}",
                    type_name(&args[0])
                ))),
            }
        }
        other => Err(EvaluationError::UnknownFunction(other.to_string())),
    }
}
