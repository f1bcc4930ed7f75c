use log::warn;
use serde_json::{Map, Value};

use super::filter::{DEFAULT_RECORD_VAR, FieldRef, FilterBuilder, Predicate};
use super::types::Order;
use crate::errors::DbError;
use crate::types::RAW_SIGIL;
use crate::utils::escape::{attribute_path, is_identifier, quote};
use crate::utils::json::{expect_object, type_name};

const STAGE_KEYS: [&str; 5] = ["$filter", "$collect", "$aggregate", "$sort", "$return"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFn {
    Sum,
    Avg,
    Min,
    Max,
    Floor,
}

impl AggregateFn {
    fn parse(op: &str) -> Option<Self> {
        match op {
            "$sum" => Some(Self::Sum),
            "$avg" => Some(Self::Avg),
            "$min" => Some(Self::Min),
            "$max" => Some(Self::Max),
            "$floor" => Some(Self::Floor),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sum => "SUM",
            Self::Avg => "AVERAGE",
            Self::Min => "MIN",
            Self::Max => "MAX",
            Self::Floor => "FLOOR",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    pub alias: String,
    pub func: AggregateFn,
    pub operand: FieldRef,
}

/// A parsed aggregation pipeline. Stages always render in the order
/// filter, collect, aggregate, sort, return.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pipeline {
    pub filter: Option<Predicate>,
    pub groups: Vec<(String, FieldRef)>,
    pub into: Option<String>,
    pub aggregates: Vec<Aggregate>,
    pub sort: Vec<(FieldRef, Order)>,
    pub projection: Option<Value>,
}

impl Pipeline {
    /// # Errors
    /// Returns `InvalidPipeline` when the input or any stage value is not an
    /// object, or when a stage entry is malformed. Filter errors propagate.
    pub fn from_json(pipeline: &Value) -> Result<Self, DbError> {
        let obj = pipeline.as_object().ok_or_else(|| {
            DbError::InvalidPipeline(format!("pipeline must be an object, got {}", type_name(pipeline)))
        })?;
        for key in obj.keys().filter(|k| !STAGE_KEYS.contains(&k.as_str())) {
            warn!("ignoring unrecognised pipeline key `{key}`");
        }
        let mut p = Self::default();
        if let Some(v) = obj.get("$filter") {
            stage_object("$filter", v)?;
            p.filter = Some(Predicate::from_json(v)?);
        }
        if let Some(v) = obj.get("$collect") {
            for (alias, source) in stage_object("$collect", v)? {
                let source = source.as_str().ok_or_else(|| {
                    DbError::InvalidPipeline(format!("$collect source for `{alias}` must be a string"))
                })?;
                if alias == "$into" {
                    if !is_identifier(source) {
                        return Err(DbError::InvalidPipeline(format!("invalid $into variable `{source}`")));
                    }
                    p.into = Some(source.to_string());
                } else {
                    p.groups.push((result_alias("$collect", alias)?, FieldRef::parse(source)));
                }
            }
        }
        if let Some(v) = obj.get("$aggregate") {
            for (alias, call) in stage_object("$aggregate", v)? {
                p.aggregates.push(parse_aggregate(alias, call)?);
            }
        }
        if let Some(v) = obj.get("$sort") {
            for (field, dir) in stage_object("$sort", v)? {
                let order = match dir.as_str() {
                    Some("ASC") => Order::Asc,
                    Some("DESC") => Order::Desc,
                    _ => {
                        return Err(DbError::InvalidPipeline(format!(
                            "$sort direction for `{field}` must be \"ASC\" or \"DESC\", got {dir}"
                        )));
                    }
                };
                p.sort.push((FieldRef::parse(field), order));
            }
        }
        if let Some(v) = obj.get("$return") {
            stage_object("$return", v)?;
            p.projection = Some(v.clone());
        }
        Ok(p)
    }

    fn grouped(&self) -> bool {
        !self.groups.is_empty() || !self.aggregates.is_empty()
    }

    /// Renders the full multi-stage query, one stage per line.
    #[must_use]
    pub fn render(&self, pk: &str, collection: &str) -> String {
        self.stages(pk, collection).join("\n")
    }

    /// Rendered stages in execution order, starting with the `FOR` line.
    #[must_use]
    pub fn stages(&self, pk: &str, collection: &str) -> Vec<String> {
        let var = DEFAULT_RECORD_VAR;
        let mut out = vec![format!("FOR {var} IN {}", collection_ref(collection))];

        if let Some(filter) = self.filter.as_ref().filter(|f| **f != Predicate::True) {
            out.push(format!("FILTER {}", FilterBuilder::new().render(filter)));
        }

        let into = self.into.as_ref().map(|g| format!(" INTO {g}")).unwrap_or_default();
        if !self.groups.is_empty() {
            let groups = self
                .groups
                .iter()
                .map(|(alias, src)| format!("{alias} = {}", field_text(src, var)))
                .collect::<Vec<_>>()
                .join(", ");
            let tail = if self.aggregates.is_empty() { into.as_str() } else { "" };
            out.push(format!("COLLECT {groups}{tail}"));
        }
        if !self.aggregates.is_empty() {
            let prefix = if self.groups.is_empty() { "COLLECT " } else { "" };
            let aggs = self
                .aggregates
                .iter()
                .map(|a| format!("{} = {}({})", a.alias, a.func.as_str(), field_text(&a.operand, var)))
                .collect::<Vec<_>>()
                .join(", ");
            out.push(format!("{prefix}AGGREGATE {aggs}{into}"));
        }

        if !self.sort.is_empty() {
            let keys = self
                .sort
                .iter()
                .map(|(f, o)| {
                    let text = match f {
                        FieldRef::Attr(name) if self.grouped() => name.clone(),
                        other => field_text(other, var),
                    };
                    format!("{text} {}", o.as_str())
                })
                .collect::<Vec<_>>()
                .join(", ");
            out.push(format!("SORT {keys}"));
        }

        out.push(format!("RETURN {}", self.return_expr(pk, var)));
        out
    }

    fn return_expr(&self, pk: &str, var: &str) -> String {
        if let Some(shape) = &self.projection {
            return projection(shape);
        }
        if self.grouped() {
            let names = self
                .groups
                .iter()
                .map(|(alias, _)| alias.as_str())
                .chain(self.aggregates.iter().map(|a| a.alias.as_str()))
                .chain(self.into.as_deref());
            let body = names.map(|n| format!("{}: {n}", quote(n))).collect::<Vec<_>>().join(", ");
            return format!("{{ {body} }}");
        }
        format!("MERGE({var}, {{ {}: {var}._key }})", quote(pk))
    }
}

fn stage_object<'a>(stage: &str, v: &'a Value) -> Result<&'a Map<String, Value>, DbError> {
    expect_object(v, |t| DbError::InvalidPipeline(format!("{stage} must be an object, got {t}")))
}

fn parse_aggregate(alias: &str, call: &Value) -> Result<Aggregate, DbError> {
    let obj = call.as_object().ok_or_else(|| {
        DbError::InvalidPipeline(format!("$aggregate entry `{alias}` must be an object"))
    })?;
    let mut entries = obj.iter();
    let (Some((op, operand)), None) = (entries.next(), entries.next()) else {
        return Err(DbError::InvalidPipeline(format!(
            "$aggregate entry `{alias}` must name exactly one function"
        )));
    };
    let func = AggregateFn::parse(op).ok_or_else(|| {
        DbError::InvalidPipeline(format!("unknown aggregate function `{op}` for `{alias}`"))
    })?;
    let operand = operand.as_str().ok_or_else(|| {
        DbError::InvalidPipeline(format!("{op} operand for `{alias}` must be a string"))
    })?;
    Ok(Aggregate { alias: result_alias("$aggregate", alias)?, func, operand: FieldRef::parse(operand) })
}

// Aliases become query variables, so they must be bare identifiers.
fn result_alias(stage: &str, alias: &str) -> Result<String, DbError> {
    if is_identifier(alias) {
        Ok(alias.to_string())
    } else {
        Err(DbError::InvalidPipeline(format!("invalid {stage} alias `{alias}`")))
    }
}

fn field_text(f: &FieldRef, var: &str) -> String {
    match f {
        FieldRef::Attr(path) => attribute_path(var, path),
        FieldRef::Expr(e) => e.clone(),
    }
}

fn collection_ref(name: &str) -> String {
    if is_identifier(name) { name.to_string() } else { format!("`{name}`") }
}

// Sigil strings are references, other strings literal text.
fn projection(v: &Value) -> String {
    match v {
        Value::String(s) => match s.strip_prefix(RAW_SIGIL) {
            Some(reference) => reference.to_string(),
            None => quote(s),
        },
        Value::Array(items) => {
            format!("[{}]", items.iter().map(projection).collect::<Vec<_>>().join(", "))
        }
        Value::Object(obj) => {
            if let (1, Some(Value::Array(parts))) = (obj.len(), obj.get("$concat")) {
                let args = parts.iter().map(projection).collect::<Vec<_>>().join(", ");
                return format!("CONCAT({args})");
            }
            let body = obj
                .iter()
                .map(|(k, v)| format!("{}: {}", quote(k), projection(v)))
                .collect::<Vec<_>>()
                .join(", ");
            format!("{{ {body} }}")
        }
        other => other.to_string(),
    }
}

/// Parses and renders a pipeline against `collection`.
///
/// # Errors
/// See [`Pipeline::from_json`].
pub fn render_pipeline(pipeline: &Value, pk: &str, collection: &str) -> Result<String, DbError> {
    Ok(Pipeline::from_json(pipeline)?.render(pk, collection))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use serde_json::json;

    #[test]
    fn stage_order_ignores_key_order() {
        let text = render_pipeline(
            &json!({"$sort": {"age": "DESC"}, "$filter": {"active": true}}),
            "id",
            "users",
        )
        .unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "FOR record IN users",
                "FILTER record.active == true",
                "SORT record.age DESC",
                r#"RETURN MERGE(record, { "id": record._key })"#,
            ]
        );
    }

    #[test]
    fn collect_aggregate_return() {
        let text = render_pipeline(
            &json!({
                "$return": {"city": "$city", "label": {"$concat": ["$city", ": ", "$total"]}},
                "$aggregate": {"total": {"$sum": "amount"}, "top": {"$max": "$record.amount"}},
                "$collect": {"city": "address.city", "$into": "grp"},
                "$sort": {"total": "DESC"}
            }),
            "id",
            "orders",
        )
        .unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[1], "COLLECT city = record.address.city");
        assert_eq!(lines[2], "AGGREGATE total = SUM(record.amount), top = MAX(record.amount) INTO grp");
        assert_eq!(lines[3], "SORT total DESC");
        assert_eq!(lines[4], r#"RETURN { "city": city, "label": CONCAT(city, ": ", total) }"#);
    }

    #[test]
    fn aggregate_without_collect_and_default_return() {
        let text = render_pipeline(&json!({"$aggregate": {"avg": {"$avg": "score"}}}), "id", "games").unwrap();
        assert!(text.contains("COLLECT AGGREGATE avg = AVERAGE(record.score)"));
        assert!(text.ends_with(r#"RETURN { "avg": avg }"#));
    }

    #[test]
    fn collect_with_into_only() {
        let text = render_pipeline(&json!({"$collect": {"k": "kind", "$into": "g"}}), "id", "x").unwrap();
        assert!(text.contains("COLLECT k = record.kind INTO g"));
        assert!(text.ends_with(r#"RETURN { "k": k, "g": g }"#));
    }

    #[test]
    fn malformed_stages_fail_whole_pipeline() {
        for bad in [
            json!({"$filter": [1]}),
            json!({"$collect": "city"}),
            json!({"$aggregate": {"t": {"$median": "x"}}}),
            json!({"$aggregate": {"t": {"$sum": "x", "$max": "y"}}}),
            json!({"$sort": {"a": "asc"}}),
            json!({"$return": "x"}),
            json!("pipeline"),
        ] {
            let e = render_pipeline(&bad, "id", "c").unwrap_err();
            assert!(e.is_validation(), "{bad} -> {e}");
        }
        let e = render_pipeline(&json!({"$sort": {"a": "UP"}}), "id", "c").unwrap_err();
        assert_eq!(e.kind(), ErrorKind::InvalidPipeline);
    }

    #[test]
    fn aliases_must_be_identifiers() {
        for bad in [
            json!({"$collect": {"x = 1 RETURN 1 //": "city"}}),
            json!({"$aggregate": {"t) RETURN 1 //": {"$sum": "x"}}}),
            json!({"$aggregate": {"": {"$sum": "x"}}}),
            json!({"$collect": {"1st": "city"}}),
        ] {
            let e = render_pipeline(&bad, "id", "c").unwrap_err();
            assert_eq!(e.kind(), ErrorKind::InvalidPipeline, "{bad}");
        }
        assert!(render_pipeline(&json!({"$collect": {"by_city": "city"}}), "id", "c").is_ok());
    }
}
