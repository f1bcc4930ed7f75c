use log::warn;
use serde_json::{Map, Number, Value};

use super::types::Assignments;
use crate::errors::DbError;
use crate::types::Operand;
use crate::utils::escape::{attribute_path, quote};
use crate::utils::json::type_name;

/// Variable naming the stored document inside update expressions.
pub const OLD_VAR: &str = "OLD";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    /// Field assignments; operators become `OLD`-relative raw expressions.
    Value,
    /// Rendered per-field expression text for a literal object.
    SetExpression,
    /// Insert branch of an upsert: operators resolve to plain values.
    Insert,
}

/// One parsed field mutation.
#[derive(Debug, Clone, PartialEq)]
enum Mutation {
    Set(Value),
    Inc(Number),
    Push { value: Value, unique: bool },
    Unshift { value: Value, unique: bool },
    Pop,
    Shift,
    Pull(Vec<Value>),
}

impl Mutation {
    fn expression(&self, field: &str) -> String {
        let old = attribute_path(OLD_VAR, field);
        match self {
            Self::Set(v) => v.to_string(),
            Self::Inc(n) => {
                let text = n.to_string();
                match text.strip_prefix('-') {
                    Some(abs) => format!("{old}-{abs}"),
                    None => format!("{old}+{text}"),
                }
            }
            Self::Push { value, unique } => format!("PUSH({old}, {value}, {unique})"),
            Self::Unshift { value, unique } => format!("UNSHIFT({old}, {value}, {unique})"),
            Self::Pop => format!("POP({old})"),
            Self::Shift => format!("SHIFT({old})"),
            Self::Pull(values) => format!("REMOVE_VALUES({old}, {})", Value::Array(values.clone())),
        }
    }

    fn insert_value(&self) -> Value {
        match self {
            Self::Set(v) => v.clone(),
            Self::Inc(n) => Value::Number(n.clone()),
            Self::Push { value, .. } | Self::Unshift { value, .. } => Value::Array(vec![value.clone()]),
            Self::Pop | Self::Shift | Self::Pull(_) => Value::Array(Vec::new()),
        }
    }
}

/// Output of [`normalize`]. Which half is populated depends on the mode.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedUpdate {
    pub final_values: Assignments,
    pub rendered: Vec<(String, String)>,
}

impl NormalizedUpdate {
    /// `{ "field": expr, ... }` built from the rendered expressions.
    #[must_use]
    pub fn render_object(&self) -> String {
        if self.rendered.is_empty() {
            return "{}".to_string();
        }
        let body = self
            .rendered
            .iter()
            .map(|(k, expr)| format!("{}: {expr}", quote(k)))
            .collect::<Vec<_>>()
            .join(", ");
        format!("{{ {body} }}")
    }
}

/// Rewrites a values map containing mutation operators.
///
/// # Errors
/// Returns `InvalidUpdate` when the input or an operator operand is not an
/// object, when `$inc` is given a non-number, or when `$pull` is given a
/// non-array.
pub fn normalize(values: &Value, mode: UpdateMode) -> Result<NormalizedUpdate, DbError> {
    let obj = values.as_object().ok_or_else(|| {
        DbError::InvalidUpdate(format!("values must be an object, got {}", type_name(values)))
    })?;
    let mut fields: Vec<(String, Mutation)> = Vec::new();
    collect(obj, &mut fields)?;

    let mut out = NormalizedUpdate::default();
    for (field, m) in fields {
        match mode {
            UpdateMode::Value => {
                let operand = match &m {
                    Mutation::Set(v) => Operand::Literal(v.clone()),
                    other => Operand::Raw(other.expression(&field)),
                };
                out.final_values.set(field, operand);
            }
            UpdateMode::SetExpression => {
                if let Mutation::Set(v) = &m {
                    out.final_values.set(field.clone(), Operand::Literal(v.clone()));
                }
                out.rendered.push((field.clone(), m.expression(&field)));
            }
            UpdateMode::Insert => out.final_values.set(field, Operand::Literal(m.insert_value())),
        }
    }
    Ok(out)
}

fn collect(obj: &Map<String, Value>, fields: &mut Vec<(String, Mutation)>) -> Result<(), DbError> {
    for (key, value) in obj {
        match key.as_str() {
            "$and" | "and" => {
                let parts = value.as_array().ok_or_else(|| {
                    DbError::InvalidUpdate(format!("{key} expects an array of objects, got {}", type_name(value)))
                })?;
                for part in parts {
                    let part_obj = part.as_object().ok_or_else(|| {
                        DbError::InvalidUpdate(format!("{key} members must be objects, got {}", type_name(part)))
                    })?;
                    collect(part_obj, fields)?;
                }
            }
            "$inc" | "$push" | "$pushset" | "$unshift" | "$unshiftset" | "$pop" | "$shift" | "$pull" => {
                let operands = value.as_object().ok_or_else(|| {
                    DbError::InvalidUpdate(format!("{key} expects an object of field operands, got {}", type_name(value)))
                })?;
                for (field, operand) in operands {
                    put(fields, field.clone(), mutation(key, field, operand)?);
                }
            }
            other => {
                if other.starts_with('$') {
                    warn!("unknown update operator `{other}` stored as a literal field");
                }
                put(fields, key.clone(), Mutation::Set(value.clone()));
            }
        }
    }
    Ok(())
}

fn mutation(op: &str, field: &str, operand: &Value) -> Result<Mutation, DbError> {
    Ok(match op {
        "$inc" => match operand {
            Value::Number(n) => Mutation::Inc(n.clone()),
            other => {
                return Err(DbError::InvalidUpdate(format!(
                    "$inc on `{field}` requires a number, got {}",
                    type_name(other)
                )));
            }
        },
        "$push" => Mutation::Push { value: operand.clone(), unique: false },
        "$pushset" => Mutation::Push { value: operand.clone(), unique: true },
        "$unshift" => Mutation::Unshift { value: operand.clone(), unique: false },
        "$unshiftset" => Mutation::Unshift { value: operand.clone(), unique: true },
        "$pop" => Mutation::Pop,
        "$shift" => Mutation::Shift,
        _ => match operand {
            Value::Array(values) => Mutation::Pull(values.clone()),
            other => {
                return Err(DbError::InvalidUpdate(format!(
                    "$pull on `{field}` requires an array, got {}",
                    type_name(other)
                )));
            }
        },
    })
}

// Later entries win; the field keeps its first position.
fn put(fields: &mut Vec<(String, Mutation)>, field: String, m: Mutation) {
    match fields.iter_mut().find(|(f, _)| *f == field) {
        Some(slot) => slot.1 = m,
        None => fields.push((field, m)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use serde_json::json;

    #[test]
    fn value_mode_makes_self_referential_expressions() {
        let n = normalize(&json!({"name": "x", "$inc": {"count": 2, "debt": -3}}), UpdateMode::Value).unwrap();
        assert_eq!(n.final_values.get("name"), Some(&Operand::literal("x")));
        assert_eq!(n.final_values.get("count"), Some(&Operand::raw("OLD.count+2")));
        assert_eq!(n.final_values.get("debt"), Some(&Operand::raw("OLD.debt-3")));
        assert!(n.rendered.is_empty());
    }

    #[test]
    fn set_expression_mode_renders_array_calls() {
        let n = normalize(
            &json!({
                "$push": {"tags": "a"},
                "$pushset": {"uniq": "b"},
                "$unshift": {"q": 1},
                "$unshiftset": {"qs": 2},
                "$pop": {"stack": true},
                "$shift": {"queue": true},
                "$pull": {"tags2": ["x", "y"]}
            }),
            UpdateMode::SetExpression,
        )
        .unwrap();
        let text: Vec<&str> = n.rendered.iter().map(|(_, e)| e.as_str()).collect();
        assert_eq!(
            text,
            vec![
                r#"PUSH(OLD.tags, "a", false)"#,
                r#"PUSH(OLD.uniq, "b", true)"#,
                "UNSHIFT(OLD.q, 1, false)",
                "UNSHIFT(OLD.qs, 2, true)",
                "POP(OLD.stack)",
                "SHIFT(OLD.queue)",
                r#"REMOVE_VALUES(OLD.tags2, ["x","y"])"#,
            ]
        );
        assert!(n.final_values.is_empty());
    }

    #[test]
    fn render_object_mixes_literals_and_expressions() {
        let n = normalize(&json!({"name": "5", "$inc": {"n": 1}}), UpdateMode::SetExpression).unwrap();
        assert_eq!(n.render_object(), r#"{ "name": "5", "n": OLD.n+1 }"#);
        assert_eq!(n.final_values.get("name"), Some(&Operand::literal("5")));
    }

    #[test]
    fn insert_mode_resolves_plain_values() {
        let n = normalize(
            &json!({"$inc": {"n": 4}, "$push": {"t": "a"}, "$pull": {"u": [1]}}),
            UpdateMode::Insert,
        )
        .unwrap();
        let plain = n.final_values.to_plain().unwrap();
        assert_eq!(Value::Object(plain), json!({"n": 4, "t": ["a"], "u": []}));
    }

    #[test]
    fn and_merges_later_wins() {
        let n = normalize(&json!({"$and": [{"a": 1, "b": 1}, {"a": 2}]}), UpdateMode::Value).unwrap();
        assert_eq!(Value::Object(n.final_values.to_plain().unwrap()), json!({"a": 2, "b": 1}));
    }

    #[test]
    fn validation_errors() {
        let e = normalize(&json!({"$inc": {"n": "1"}}), UpdateMode::Value).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::InvalidUpdate);
        assert!(normalize(&json!({"$pull": {"t": "a"}}), UpdateMode::Value).is_err());
        assert!(normalize(&json!({"$inc": 5}), UpdateMode::Value).is_err());
        assert!(normalize(&json!({"$and": {"a": 1}}), UpdateMode::Value).is_err());
        assert!(normalize(&json!([1]), UpdateMode::Value).is_err());
    }

    #[test]
    fn unknown_operators_pass_through() {
        let n = normalize(&json!({"$rename": {"a": "b"}}), UpdateMode::Value).unwrap();
        assert_eq!(n.final_values.get("$rename"), Some(&Operand::literal(json!({"a": "b"}))));
    }

    #[test]
    fn plain_maps_are_fixed_points() {
        let input = json!({"a": 1, "b": "two", "c": [3]});
        let once = normalize(&input, UpdateMode::Value).unwrap();
        let twice = normalize(&Value::Object(once.final_values.to_plain().unwrap()), UpdateMode::Value).unwrap();
        assert_eq!(once, twice);
    }
}
