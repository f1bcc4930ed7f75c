use log::debug;
use serde_json::{Map, Value};

use super::filter::Predicate;
use super::types::{Criteria, Order, SortSpec};
use crate::errors::DbError;
use crate::utils::json::{as_u64, type_name};

const KNOWN_KEYS: [&str; 7] = ["where", "select", "sort", "limit", "skip", "whereVertex", "whereEdge"];

impl Criteria {
    /// Parses criteria JSON. `null` and `{}` are empty criteria; any other
    /// object must carry a `where` key, even an empty one.
    ///
    /// # Errors
    /// Returns `InvalidCriteria` for non-object input, a missing `where`,
    /// or malformed `select`/`sort`/`limit`/`skip`; predicate errors propagate.
    pub fn from_json(v: &Value) -> Result<Self, DbError> {
        let obj = match v {
            Value::Null => return Ok(Self::default()),
            Value::Object(obj) => obj,
            other => {
                return Err(DbError::InvalidCriteria(format!(
                    "criteria must be an object, got {}",
                    type_name(other)
                )));
            }
        };
        if obj.is_empty() {
            return Ok(Self::default());
        }
        if !obj.contains_key("where") {
            return Err(DbError::InvalidCriteria(
                "criteria with top-level keys must include a `where` key".into(),
            ));
        }
        for key in obj.keys().filter(|k| !KNOWN_KEYS.contains(&k.as_str())) {
            debug!("ignoring criteria key `{key}`");
        }

        let filter = match obj.get("where") {
            None | Some(Value::Null) => Predicate::True,
            Some(w) => Predicate::from_json(w)?,
        };
        Ok(Self {
            filter,
            select: parse_select(obj.get("select"))?,
            sort: parse_sort(obj.get("sort"))?,
            limit: parse_count(obj, "limit")?,
            skip: parse_count(obj, "skip")?,
            where_vertex: obj.get("whereVertex").filter(|v| !v.is_null()).cloned(),
            where_edge: obj.get("whereEdge").filter(|v| !v.is_null()).cloned(),
        })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.filter == Predicate::True
            && self.select.is_empty()
            && self.sort.is_empty()
            && self.limit.is_none()
            && self.skip.is_none()
            && self.where_vertex.is_none()
            && self.where_edge.is_none()
    }
}

fn parse_select(v: Option<&Value>) -> Result<Vec<String>, DbError> {
    let Some(v) = v.filter(|v| !v.is_null()) else {
        return Ok(Vec::new());
    };
    let arr = v.as_array().ok_or_else(|| {
        DbError::InvalidCriteria(format!("`select` must be an array, got {}", type_name(v)))
    })?;
    arr.iter()
        .map(|f| {
            f.as_str().map(str::to_string).ok_or_else(|| {
                DbError::InvalidCriteria(format!("`select` entries must be strings, got {}", type_name(f)))
            })
        })
        .collect()
}

fn parse_sort(v: Option<&Value>) -> Result<Vec<SortSpec>, DbError> {
    match v {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Object(obj)) => sort_pairs(obj),
        Some(Value::Array(items)) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                let obj = item.as_object().ok_or_else(|| {
                    DbError::InvalidCriteria(format!(
                        "`sort` entries must be {{field: direction}} objects, got {}",
                        type_name(item)
                    ))
                })?;
                out.extend(sort_pairs(obj)?);
            }
            Ok(out)
        }
        Some(other) => Err(DbError::InvalidCriteria(format!(
            "`sort` must be an array or object, got {}",
            type_name(other)
        ))),
    }
}

fn sort_pairs(obj: &Map<String, Value>) -> Result<Vec<SortSpec>, DbError> {
    obj.iter()
        .map(|(field, dir)| {
            let order = Order::parse(dir).ok_or_else(|| {
                DbError::InvalidCriteria(format!("invalid sort direction for `{field}`: {dir}"))
            })?;
            Ok(SortSpec { field: field.clone(), order })
        })
        .collect()
}

fn parse_count(obj: &Map<String, Value>, key: &str) -> Result<Option<u64>, DbError> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => as_u64(v).map(Some).ok_or_else(|| {
            DbError::InvalidCriteria(format!("`{key}` must be a non-negative integer, got {v}"))
        }),
    }
}

/// # Errors
/// Returns an error if the JSON string is not valid criteria.
pub fn parse_criteria_json(json: &str) -> Result<Criteria, DbError> {
    let v: Value = serde_json::from_str(json)?;
    Criteria::from_json(&v)
}
