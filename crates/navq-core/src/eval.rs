//! Scalar expression evaluation.
//!
//! One evaluator serves predicate filtering, projection, ordering keys, and
//! parameter-extractor lambdas. The environment supplies column, parameter,
//! and ambient context lookups; each call site implements [`EvalEnv`] over
//! its own row or context representation.

use std::cmp::Ordering;

use navq_ir::{BinaryOp, ScalarExpr, UnaryOp, Value};

use crate::error::Error;

/// Lookup surface for expression evaluation.
pub trait EvalEnv {
    /// Read a column of an expanded source. Absent sources (unmatched left
    /// joins) yield `Value::Null`.
    fn column(&self, source: &str, field: &str) -> Result<Value, Error>;

    /// Read a named parameter.
    fn parameter(&self, name: &str) -> Result<Value, Error>;

    /// Read an ambient execution-context value.
    fn context_value(&self, name: &str) -> Result<Value, Error>;
}

/// Evaluate an expression to a value.
pub fn evaluate(expr: &ScalarExpr, env: &dyn EvalEnv) -> Result<Value, Error> {
    match expr {
        ScalarExpr::Literal(value) => Ok(value.clone()),
        ScalarExpr::Parameter(name) => env.parameter(name),
        ScalarExpr::BoundColumn { source, field } => env.column(source, field),
        ScalarExpr::Column { path, field } => Err(Error::InvalidData(format!(
            "unexpanded column '{}.{}' reached evaluation",
            path.join("."),
            field
        ))),
        ScalarExpr::ContextValue(name) => env.context_value(name),
        ScalarExpr::Unary { op, operand } => apply_unary(*op, evaluate(operand, env)?),
        ScalarExpr::Binary { op, left, right } => match op {
            // Short-circuit logical operators.
            BinaryOp::And => {
                if !as_truthy(&evaluate(left, env)?) {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(as_truthy(&evaluate(right, env)?)))
            }
            BinaryOp::Or => {
                if as_truthy(&evaluate(left, env)?) {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(as_truthy(&evaluate(right, env)?)))
            }
            _ => apply_binary(*op, &evaluate(left, env)?, &evaluate(right, env)?),
        },
    }
}

/// Evaluate a predicate to a boolean.
pub fn evaluate_predicate(expr: &ScalarExpr, env: &dyn EvalEnv) -> Result<bool, Error> {
    Ok(as_truthy(&evaluate(expr, env)?))
}

/// Apply a unary operator.
pub fn apply_unary(op: UnaryOp, value: Value) -> Result<Value, Error> {
    match op {
        UnaryOp::Not => match value {
            Value::Null => Ok(Value::Null),
            Value::Bool(b) => Ok(Value::Bool(!b)),
            other => Err(Error::InvalidData(format!("cannot negate {other:?}"))),
        },
        UnaryOp::Neg => match value {
            Value::Null => Ok(Value::Null),
            Value::Int32(i) => Ok(Value::Int32(-i)),
            Value::Int64(i) => Ok(Value::Int64(-i)),
            Value::Float32(f) => Ok(Value::Float32(-f)),
            Value::Float64(f) => Ok(Value::Float64(-f)),
            other => Err(Error::InvalidData(format!("cannot negate {other:?}"))),
        },
        UnaryOp::IsNull => Ok(Value::Bool(value.is_null())),
        UnaryOp::IsNotNull => Ok(Value::Bool(!value.is_null())),
    }
}

/// Apply a non-logical binary operator.
pub fn apply_binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, Error> {
    let result = match op {
        BinaryOp::Eq => values_equal(left, right),
        BinaryOp::Ne => !values_equal(left, right),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            if left.is_null() || right.is_null() {
                false
            } else {
                let ord = compare_values(left, right);
                match op {
                    BinaryOp::Lt => ord.is_lt(),
                    BinaryOp::Le => ord.is_le(),
                    BinaryOp::Gt => ord.is_gt(),
                    BinaryOp::Ge => ord.is_ge(),
                    _ => unreachable!(),
                }
            }
        }
        BinaryOp::Like => match (left, right) {
            (Value::String(text), Value::String(pattern)) => like_match(text, pattern),
            _ => false,
        },
        BinaryOp::And | BinaryOp::Or => {
            return Err(Error::InvalidData(
                "logical operator outside predicate evaluation".to_string(),
            ))
        }
    };
    Ok(Value::Bool(result))
}

/// Value equality with numeric widening.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Int32(x), Value::Int64(y)) => i64::from(*x) == *y,
        (Value::Int64(x), Value::Int32(y)) => *x == i64::from(*y),
        (Value::Float32(x), Value::Float64(y)) => f64::from(*x) == *y,
        (Value::Float64(x), Value::Float32(y)) => *x == f64::from(*y),
        _ => a == b,
    }
}

/// Compare two values for sorting. Nulls sort first; incompatible types are
/// considered equal.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (Value::Int32(a), Value::Int32(b)) => a.cmp(b),
        (Value::Int64(a), Value::Int64(b)) => a.cmp(b),
        (Value::Int32(a), Value::Int64(b)) => i64::from(*a).cmp(b),
        (Value::Int64(a), Value::Int32(b)) => a.cmp(&i64::from(*b)),
        (Value::Float32(a), Value::Float32(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
        (Value::Float64(a), Value::Float64(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
        (Value::Float32(a), Value::Float64(b)) => {
            f64::from(*a).partial_cmp(b).unwrap_or(Ordering::Equal)
        }
        (Value::Float64(a), Value::Float32(b)) => {
            a.partial_cmp(&f64::from(*b)).unwrap_or(Ordering::Equal)
        }
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
        (Value::Uuid(a), Value::Uuid(b)) => a.cmp(b),
        (Value::Bytes(a), Value::Bytes(b)) => a.cmp(b),
        _ => Ordering::Equal,
    }
}

/// Match a string against a pattern with `%` wildcards.
pub fn like_match(text: &str, pattern: &str) -> bool {
    let parts: Vec<&str> = pattern.split('%').collect();
    if parts.len() == 1 {
        return text == pattern;
    }

    let mut pos = 0;
    let first = parts[0];
    if !text.starts_with(first) {
        return false;
    }
    pos += first.len();

    for part in &parts[1..parts.len() - 1] {
        if part.is_empty() {
            continue;
        }
        match text[pos..].find(part) {
            Some(offset) => pos += offset + part.len(),
            None => return false,
        }
    }

    let last = parts[parts.len() - 1];
    last.is_empty() || text[pos..].ends_with(last)
}

fn as_truthy(value: &Value) -> bool {
    matches!(value, Value::Bool(true))
}
