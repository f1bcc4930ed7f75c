//! Value escaping and type coercion for query text.
//!
//! Guidelines
//! - Strings are emitted as double-quoted literals with JSON escaping, which the query language accepts verbatim.
//! - Strings that look like plain decimal numbers are emitted as numbers.
//! - Arrays and objects are emitted as compact JSON.
//! - Attribute names that are not plain identifiers are backtick-quoted per path segment.

use serde_json::{Number, Value};

/// Renders a literal JSON value as query text.
#[must_use]
pub fn escape_literal(v: &Value) -> String {
    match v {
        Value::String(s) => match coerce_numeric(s) {
            Some(n) => n.to_string(),
            None => quote(s),
        },
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        Value::Array(_) | Value::Object(_) => v.to_string(),
    }
}

/// Double-quotes a string, escaping quotes, backslashes and control characters.
#[must_use]
pub fn quote(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

/// Returns the number a string spells, if it is a plain decimal without
/// leading zeros (`"12"`, `"-3.5"`, `"0.25"`); otherwise `None`.
#[must_use]
pub fn coerce_numeric(s: &str) -> Option<Number> {
    let digits = s.strip_prefix('-').unwrap_or(s);
    let (int_part, frac_part) = match digits.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (digits, None),
    };
    if int_part.is_empty() || !int_part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if int_part.len() > 1 && int_part.starts_with('0') {
        return None;
    }
    match frac_part {
        None => s.parse::<i64>().ok().map(Number::from),
        Some(f) if !f.is_empty() && f.bytes().all(|b| b.is_ascii_digit()) => {
            s.parse::<f64>().ok().and_then(Number::from_f64)
        }
        Some(_) => None,
    }
}

/// True if `name` can be written after a `.` without quoting.
#[must_use]
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Builds `var.a.b` for a dotted field path, backtick-quoting odd segments.
#[must_use]
pub fn attribute_path(var: &str, field: &str) -> String {
    let mut out = String::from(var);
    for seg in field.split('.') {
        out.push('.');
        if is_identifier(seg) {
            out.push_str(seg);
        } else {
            out.push('`');
            out.push_str(&seg.replace('`', "\\`"));
            out.push('`');
        }
    }
    out
}
