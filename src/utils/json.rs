use serde_json::{Map, Value};

use crate::errors::DbError;

/// Short type label used in validation messages.
#[must_use]
pub fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Borrow `v` as an object or fail with `err(type_name)`.
pub fn expect_object<'a>(
    v: &'a Value,
    err: impl FnOnce(&'static str) -> DbError,
) -> Result<&'a Map<String, Value>, DbError> {
    v.as_object().ok_or_else(|| err(type_name(v)))
}

/// Reads a non-negative integer, accepting numeric strings.
#[must_use]
pub fn as_u64(v: &Value) -> Option<u64> {
    match v {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse::<u64>().ok(),
        _ => None,
    }
}

/// Reads a finite float, accepting numeric strings.
#[must_use]
pub fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|f| f.is_finite())
}
