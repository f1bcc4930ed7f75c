use serde_json::{Map, Value};

use crate::errors::DbError;
use crate::types::{Operand, RAW_SIGIL};
use crate::utils::escape::attribute_path;
use crate::utils::json::type_name;

/// Loop variable bound to the current document in generated statements.
pub const DEFAULT_RECORD_VAR: &str = "record";

/// Left-hand side of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldRef {
    /// Attribute path on the loop variable (`record.<path>`).
    Attr(String),
    /// Expression copied verbatim.
    Expr(String),
}

impl FieldRef {
    /// Classifies a predicate key. Keys that wrap the record variable in a
    /// call, such as `LENGTH(record.tags)`, and keys carrying the raw sigil
    /// are kept verbatim (sigil stripped).
    #[must_use]
    pub fn parse(key: &str) -> Self {
        if let Some(expr) = key.strip_prefix(RAW_SIGIL) {
            Self::Expr(expr.to_string())
        } else if wraps_record(key) {
            Self::Expr(key.to_string())
        } else {
            Self::Attr(key.to_string())
        }
    }

    fn render(&self, var: &str) -> String {
        match self {
            Self::Attr(path) => attribute_path(var, path),
            Self::Expr(e) => e.clone(),
        }
    }
}

// True when some `(` is followed by the record variable as a whole word.
fn wraps_record(key: &str) -> bool {
    key.match_indices('(').any(|(i, _)| {
        key[i + 1..]
            .trim_start()
            .strip_prefix(DEFAULT_RECORD_VAR)
            .is_some_and(|rest| rest.chars().next().is_some_and(|c| !(c.is_ascii_alphanumeric() || c == '_')))
    })
}

#[derive(Debug, Clone, PartialEq)]
pub enum Comparison {
    Eq(Operand),
    Ne(Operand),
    Gt(Operand),
    Gte(Operand),
    Lt(Operand),
    Lte(Operand),
    Like(Operand),
    NotLike(Operand),
    In(Vec<Operand>),
    Nin(Vec<Operand>),
    AllIn(Vec<Operand>),
    AnyIn(Vec<Operand>),
    Has(Operand),
    NotHas(Operand),
    Between(Operand, Operand),
}

/// One node of a parsed `where` tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    True,
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Cmp { field: FieldRef, cmp: Comparison },
}

impl Predicate {
    pub fn eq(field: &str, value: Operand) -> Self {
        Self::Cmp { field: FieldRef::Attr(field.to_string()), cmp: Comparison::Eq(value) }
    }

    /// Parses a JSON predicate object.
    ///
    /// # Errors
    /// Returns a validation error for non-object nodes, malformed combinators
    /// and malformed operator operands.
    pub fn from_json(v: &Value) -> Result<Self, DbError> {
        let obj = v.as_object().ok_or_else(|| {
            DbError::InvalidCriteria(format!("predicate must be an object, got {}", type_name(v)))
        })?;
        Self::from_map(obj)
    }

    fn from_map(obj: &Map<String, Value>) -> Result<Self, DbError> {
        let mut parts = Vec::with_capacity(obj.len());
        for (key, value) in obj {
            match key.as_str() {
                "$and" | "and" => {
                    let members = combinator_members(key, value)?;
                    parts.push(Self::all(members));
                }
                "$or" | "or" => {
                    let members = combinator_members(key, value)?;
                    if members.len() < 2 {
                        return Err(DbError::operator(key, "requires an array of at least two predicates"));
                    }
                    parts.push(Self::Or(members));
                }
                _ => {
                    let field = FieldRef::parse(key);
                    for cmp in parse_comparisons(value)? {
                        parts.push(Self::Cmp { field: field.clone(), cmp });
                    }
                }
            }
        }
        Ok(Self::all(parts))
    }

    fn all(mut parts: Vec<Self>) -> Self {
        parts.retain(|p| *p != Self::True);
        match parts.len() {
            0 => Self::True,
            1 => parts.remove(0),
            _ => Self::And(parts),
        }
    }

    /// Top-level equality leaves with literal or raw operands, in key order.
    #[must_use]
    pub fn equalities(&self) -> Vec<(&str, &Operand)> {
        match self {
            Self::Cmp { field: FieldRef::Attr(f), cmp: Comparison::Eq(v) } => vec![(f.as_str(), v)],
            Self::And(parts) => parts.iter().flat_map(Self::equalities).collect(),
            _ => Vec::new(),
        }
    }
}

fn combinator_members(op: &str, value: &Value) -> Result<Vec<Predicate>, DbError> {
    let arr = value
        .as_array()
        .ok_or_else(|| DbError::operator(op, format!("expects an array, got {}", type_name(value))))?;
    arr.iter().map(Predicate::from_json).collect()
}

fn parse_comparisons(value: &Value) -> Result<Vec<Comparison>, DbError> {
    let ops = match value.as_object() {
        Some(obj) if obj.keys().any(|k| k.starts_with('$')) => obj,
        _ => return Ok(vec![Comparison::Eq(Operand::from_json(value))]),
    };
    ops.iter().map(|(op, operand)| parse_operator(op, operand)).collect()
}

fn parse_operator(op: &str, operand: &Value) -> Result<Comparison, DbError> {
    let single = || Operand::from_json(operand);
    Ok(match op {
        "$gt" => Comparison::Gt(single()),
        "$gte" => Comparison::Gte(single()),
        "$lt" => Comparison::Lt(single()),
        "$lte" => Comparison::Lte(single()),
        "$ne" => Comparison::Ne(single()),
        "$like" => Comparison::Like(pattern(op, operand)?),
        "$notlike" => Comparison::NotLike(pattern(op, operand)?),
        "$in" => Comparison::In(list(op, operand)?),
        "$nin" => Comparison::Nin(list(op, operand)?),
        "$allin" => Comparison::AllIn(list(op, operand)?),
        "$anyin" => Comparison::AnyIn(list(op, operand)?),
        "$has" => Comparison::Has(single()),
        "$nothas" => Comparison::NotHas(single()),
        "$between" => match operand.as_array().map(Vec::as_slice) {
            Some([lo, hi]) => Comparison::Between(Operand::from_json(lo), Operand::from_json(hi)),
            _ => return Err(DbError::operator(op, "requires an array of exactly two values")),
        },
        other => return Err(DbError::operator(other, "unknown filter operator")),
    })
}

fn pattern(op: &str, operand: &Value) -> Result<Operand, DbError> {
    if operand.is_string() {
        Ok(Operand::from_json(operand))
    } else {
        Err(DbError::operator(op, format!("expects a string pattern, got {}", type_name(operand))))
    }
}

fn list(op: &str, operand: &Value) -> Result<Vec<Operand>, DbError> {
    match operand.as_array() {
        Some(arr) if !arr.is_empty() => Ok(arr.iter().map(Operand::from_json).collect()),
        Some(_) => Err(DbError::operator(op, "requires a non-empty array")),
        None => Err(DbError::operator(op, format!("expects an array, got {}", type_name(operand)))),
    }
}

/// Renders parsed predicates as boolean expression text.
#[derive(Debug, Clone)]
pub struct FilterBuilder {
    var: String,
}

impl Default for FilterBuilder {
    fn default() -> Self {
        Self { var: DEFAULT_RECORD_VAR.to_string() }
    }
}

impl FilterBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_var(var: &str) -> Self {
        Self { var: var.to_string() }
    }

    #[must_use]
    pub fn var(&self) -> &str {
        &self.var
    }

    /// Parses and renders a JSON predicate. An empty predicate renders as an
    /// empty string (no filter).
    ///
    /// # Errors
    /// Propagates parse errors from [`Predicate::from_json`].
    pub fn render_json(&self, v: &Value) -> Result<String, DbError> {
        let pred = Predicate::from_json(v)?;
        Ok(match pred {
            Predicate::True => String::new(),
            p => self.render(&p),
        })
    }

    #[must_use]
    pub fn render(&self, pred: &Predicate) -> String {
        match pred {
            Predicate::True => "true".to_string(),
            Predicate::And(parts) => self.join(parts, " AND "),
            Predicate::Or(parts) => self.join(parts, " OR "),
            Predicate::Cmp { field, cmp } => self.render_cmp(&field.render(&self.var), cmp),
        }
    }

    fn join(&self, parts: &[Predicate], sep: &str) -> String {
        parts.iter().map(|p| format!("({})", self.render(p))).collect::<Vec<_>>().join(sep)
    }

    fn render_cmp(&self, lhs: &str, cmp: &Comparison) -> String {
        match cmp {
            Comparison::Eq(v) => format!("{lhs} == {}", v.render()),
            Comparison::Ne(v) => format!("{lhs} != {}", v.render()),
            Comparison::Gt(v) => format!("{lhs} > {}", v.render()),
            Comparison::Gte(v) => format!("{lhs} >= {}", v.render()),
            Comparison::Lt(v) => format!("{lhs} < {}", v.render()),
            Comparison::Lte(v) => format!("{lhs} <= {}", v.render()),
            Comparison::Like(p) => format!("LOWER({lhs}) LIKE LOWER({})", p.render()),
            Comparison::NotLike(p) => format!("LOWER({lhs}) NOT LIKE LOWER({})", p.render()),
            Comparison::In(vs) => match vs.as_slice() {
                [only] => format!("{lhs} == {}", only.render()),
                _ => format!("{lhs} IN {}", render_list(vs)),
            },
            Comparison::Nin(vs) => match vs.as_slice() {
                [only] => format!("{lhs} != {}", only.render()),
                _ => format!("{lhs} NOT IN {}", render_list(vs)),
            },
            Comparison::AllIn(vs) => format!("{} ALL IN {lhs}", render_list(vs)),
            Comparison::AnyIn(vs) => format!("{} ANY IN {lhs}", render_list(vs)),
            Comparison::Has(v) => format!("{} IN {lhs}", v.render()),
            Comparison::NotHas(v) => format!("{} NOT IN {lhs}", v.render()),
            Comparison::Between(lo, hi) => {
                format!("{lhs} BETWEEN {} AND {}", lo.render(), hi.render())
            }
        }
    }
}

fn render_list(vs: &[Operand]) -> String {
    format!("[{}]", vs.iter().map(Operand::render).collect::<Vec<_>>().join(", "))
}

/// Parses and renders a predicate against the default `record` variable.
///
/// # Errors
/// Returns a validation error for malformed predicates.
pub fn render_filter(v: &Value) -> Result<String, DbError> {
    FilterBuilder::new().render_json(v)
}
