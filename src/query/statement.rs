use chrono::{SecondsFormat, Utc};
use log::debug;
use serde_json::{Map, Value, json};

use super::aggregate::render_pipeline;
use super::filter::{DEFAULT_RECORD_VAR, FilterBuilder, Predicate};
use super::geo::{parse_distance_criteria, parse_edge_collections};
use super::types::{
    CompileRequest, CompiledQuery, Criteria, Method, PrimaryWhere, SortSpec, Statement, Values,
    ValuesToSet,
};
use super::update::{UpdateMode, normalize};
use crate::errors::DbError;
use crate::types::{ID_SEPARATOR, Operand};
use crate::utils::escape::{attribute_path, quote};
use crate::utils::json::type_name;

/// Loop variables used for graph traversals.
pub const VERTEX_VAR: &str = "v";
pub const EDGE_VAR: &str = "e";

/// Attribute stamped on documents created through the upsert insert path.
pub const CREATED_AT: &str = "createdAt";

/// Compiles one operation into a [`CompiledQuery`].
///
/// # Errors
/// Every precondition violation is returned as a validation error; nothing
/// is partially compiled.
pub fn compile(req: &CompileRequest) -> Result<CompiledQuery, DbError> {
    let result = compile_inner(req);
    if let Err(e) = &result {
        debug!("compile {:?} on {:?} failed: {e}", req.method, req.model);
    }
    result
}

fn compile_inner(req: &CompileRequest) -> Result<CompiledQuery, DbError> {
    let model = required_str(req.model.as_deref(), "model")?;
    let method = req.method.ok_or(DbError::MissingField("method"))?;
    let pk = required_str(req.pk_column_name.as_deref(), "pkColumnName")?;

    if method == Method::Aggregate {
        let pipeline = req.aggregate_criteria.as_ref().ok_or(DbError::MissingField("aggregateCriteria"))?;
        return Ok(CompiledQuery::Aggregate { statement: render_pipeline(pipeline, pk, model)? });
    }

    let criteria = Criteria::from_json(req.criteria.as_ref().unwrap_or(&Value::Null))?;
    let filter = FilterBuilder::new();
    let where_clause = match &criteria.filter {
        Predicate::True => String::new(),
        p => filter.render(p),
    };
    let where_vertex_clause = graph_clause(criteria.where_vertex.as_ref(), pk, VERTEX_VAR)?;
    let where_edge_clause = graph_clause(criteria.where_edge.as_ref(), pk, EDGE_VAR)?;
    let sort_clause_array = sort_clauses(&criteria.sort);

    let edge_collections = req.edge_collections.as_ref().map(parse_edge_collections).transpose()?;
    let distance = req.distance_criteria.as_ref().map(parse_distance_criteria).transpose()?;
    match method {
        Method::FindOutbound | Method::GetOutboundVertices if edge_collections.is_none() => {
            return Err(DbError::MissingField("edgeCollections"));
        }
        Method::FindNear if distance.is_none() => return Err(DbError::MissingField("distanceCriteria")),
        Method::Sum | Method::Avg if req.numeric_attr_name.as_deref().is_none_or(str::is_empty) => {
            return Err(DbError::MissingField("numericAttrName"));
        }
        _ => {}
    }

    let mut stmt = Statement {
        table_name: model.to_string(),
        model: model.to_string(),
        method,
        select_clause: select_clause(&criteria.select, pk),
        select: criteria.select.clone(),
        where_clause,
        primary_where: primary_where(&criteria.filter, model, pk),
        where_vertex_clause,
        where_edge_clause,
        sort_clause: sort_clause_array.join(", "),
        sort_clause_array,
        limit: criteria.limit,
        skip: criteria.skip,
        numeric_attr_name: req.numeric_attr_name.clone(),
        edge_collections,
        geo_attr_name: distance.as_ref().map(|g| g.attr_name.clone()),
        geo_radius: distance.as_ref().map(|g| g.radius),
        distance_criteria: distance,
        values: None,
        values_to_set: None,
        criteria: None,
        insert_values: None,
    };

    if method.is_update() {
        let values = req.values.as_ref().ok_or(DbError::MissingField("values"))?;
        let search = search_document(&criteria.filter);
        let mut insert = search.clone();
        for (field, v) in normalize(values, UpdateMode::Insert)?.final_values.iter() {
            if let Some(lit) = v.as_literal() {
                insert.insert(field.clone(), lit.clone());
            }
        }
        if !insert.contains_key(CREATED_AT) {
            insert.insert(CREATED_AT.to_string(), json!(now_ts()));
        }
        stmt.values = Some(Values::Assignments(normalize(values, UpdateMode::Value)?.final_values));
        stmt.values_to_set =
            Some(ValuesToSet::Expression(normalize(values, UpdateMode::SetExpression)?.render_object()));
        stmt.criteria = Some(search);
        stmt.insert_values = Some(insert);
    } else if method.is_insert() {
        let values = req.values.as_ref().ok_or(DbError::MissingField("values"))?;
        check_insert_payload(method, values)?;
        stmt.values = Some(Values::Documents(values.clone()));
        stmt.values_to_set = Some(ValuesToSet::Documents(values.clone()));
    }
    Ok(CompiledQuery::Statement(Box::new(stmt)))
}

fn required_str<'a>(v: Option<&'a str>, name: &'static str) -> Result<&'a str, DbError> {
    v.filter(|s| !s.trim().is_empty()).ok_or(DbError::MissingField(name))
}

/// `_id` shortcut when the top level of `where` pins the primary key.
fn primary_where(filter: &Predicate, model: &str, pk: &str) -> Option<PrimaryWhere> {
    let (_, operand) = filter.equalities().into_iter().find(|(f, _)| *f == pk)?;
    let key = match operand.as_literal()? {
        Value::String(s) if !s.is_empty() => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    Some(PrimaryWhere { id: format!("{model}{ID_SEPARATOR}{key}") })
}

fn graph_clause(v: Option<&Value>, pk: &str, var: &str) -> Result<String, DbError> {
    let builder = FilterBuilder::with_var(var);
    match v {
        None => Ok(String::new()),
        Some(Value::String(key)) => {
            Ok(builder.render(&Predicate::eq(pk, Operand::literal(key.clone()))))
        }
        Some(other) => builder.render_json(other),
    }
}

fn sort_clauses(sort: &[SortSpec]) -> Vec<String> {
    sort.iter()
        .map(|s| format!("{} {}", attribute_path(DEFAULT_RECORD_VAR, &s.field), s.order.as_str()))
        .collect()
}

fn select_clause(select: &[String], pk: &str) -> String {
    if select.is_empty() {
        return DEFAULT_RECORD_VAR.to_string();
    }
    let mut fields = vec![quote(pk)];
    fields.extend(select.iter().filter(|f| f.as_str() != pk).map(|f| quote(f)));
    format!("KEEP({DEFAULT_RECORD_VAR}, {})", fields.join(", "))
}

/// Literal top-level equalities of `where`, used as the upsert search document.
fn search_document(filter: &Predicate) -> Map<String, Value> {
    filter
        .equalities()
        .into_iter()
        .filter_map(|(f, v)| v.as_literal().map(|lit| (f.to_string(), lit.clone())))
        .collect()
}

fn check_insert_payload(method: Method, values: &Value) -> Result<(), DbError> {
    match (method, values) {
        (Method::CreateEach, Value::Array(items)) => match items.iter().find(|i| !i.is_object()) {
            Some(bad) => Err(DbError::InvalidUpdate(format!(
                "createEach entries must be objects, got {}",
                type_name(bad)
            ))),
            None => Ok(()),
        },
        (Method::CreateEach, other) => Err(DbError::InvalidUpdate(format!(
            "createEach expects an array of objects, got {}",
            type_name(other)
        ))),
        (_, Value::Object(_)) => Ok(()),
        (m, other) => Err(DbError::InvalidUpdate(format!(
            "{} expects an object, got {}",
            m.as_str(),
            type_name(other)
        ))),
    }
}

fn now_ts() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    fn stmt(req: CompileRequest) -> Statement {
        compile(&req).unwrap().into_statement().unwrap()
    }

    #[test]
    fn destroy_by_primary_key() {
        let s = stmt(
            CompileRequest::new("user", Method::Destroy, "id").criteria(json!({"where": {"id": "u1"}})),
        );
        assert_eq!(s.primary_where, Some(PrimaryWhere { id: "user/u1".into() }));
        assert_eq!(s.where_clause, r#"record.id == "u1""#);
        assert_eq!(s.table_name, "user");
        assert!(s.values.is_none());
    }

    #[test]
    fn required_fields() {
        let mut req = CompileRequest::new("user", Method::Find, "id");
        req.model = None;
        assert!(matches!(compile(&req), Err(DbError::MissingField("model"))));
        let mut req = CompileRequest::new("user", Method::Find, "id");
        req.method = None;
        assert!(matches!(compile(&req), Err(DbError::MissingField("method"))));
        let mut req = CompileRequest::new("user", Method::Find, " ");
        req.pk_column_name = Some(String::new());
        assert!(matches!(compile(&req), Err(DbError::MissingField("pkColumnName"))));
    }

    #[test]
    fn no_primary_where_for_operator_pk() {
        let s = stmt(
            CompileRequest::new("user", Method::Find, "id")
                .criteria(json!({"where": {"id": {"$in": ["a", "b"]}}})),
        );
        assert!(s.primary_where.is_none());
        assert_eq!(s.where_clause, r#"record.id IN ["a", "b"]"#);
    }

    #[test]
    fn sort_select_and_limit() {
        let s = stmt(CompileRequest::new("user", Method::Find, "id").criteria(json!({
            "where": {},
            "select": ["name"],
            "sort": [{"name": "ASC"}, {"age": "DESC"}],
            "limit": 10,
            "skip": 5
        })));
        assert_eq!(s.sort_clause, "record.name ASC, record.age DESC");
        assert_eq!(s.sort_clause_array.len(), 2);
        assert_eq!(s.select_clause, r#"KEEP(record, "id", "name")"#);
        assert_eq!(s.limit_clause(), "LIMIT 5, 10");
        assert_eq!(s.where_clause, "");
    }

    #[test]
    fn graph_shorthand_uses_primary_key() {
        let s = stmt(
            CompileRequest::new("person", Method::FindOutbound, "id")
                .criteria(json!({"where": {}, "whereVertex": "p1", "whereEdge": {"weight": {"$gt": 2}}}))
                .edge_collections(json!(["knows", "likes"])),
        );
        assert_eq!(s.where_vertex_clause, r#"v.id == "p1""#);
        assert_eq!(s.where_edge_clause, "e.weight > 2");
        assert_eq!(s.edge_collections.as_deref(), Some("knows, likes"));
    }

    #[test]
    fn method_specific_requirements() {
        let e = compile(&CompileRequest::new("p", Method::FindOutbound, "id")).unwrap_err();
        assert!(matches!(e, DbError::MissingField("edgeCollections")));
        let e = compile(&CompileRequest::new("p", Method::FindNear, "id")).unwrap_err();
        assert!(matches!(e, DbError::MissingField("distanceCriteria")));
        let e = compile(&CompileRequest::new("p", Method::Sum, "id")).unwrap_err();
        assert!(matches!(e, DbError::MissingField("numericAttrName")));
        let e = compile(&CompileRequest::new("p", Method::Update, "id")).unwrap_err();
        assert!(matches!(e, DbError::MissingField("values")));
        let e = compile(&CompileRequest::new("p", Method::Aggregate, "id")).unwrap_err();
        assert!(matches!(e, DbError::MissingField("aggregateCriteria")));
    }

    #[test]
    fn find_near_populates_geo_fields() {
        let s = stmt(
            CompileRequest::new("place", Method::FindNear, "id")
                .distance_criteria(json!({"loc": [1.0, 2.0], "radius": -10})),
        );
        assert_eq!(s.geo_attr_name.as_deref(), Some("loc"));
        assert_eq!(s.geo_radius, Some(10.0));
        assert_eq!(s.distance_criteria.map(|g| g.coordinates), Some("1, 2".to_string()));
    }

    #[test]
    fn create_keeps_raw_values() {
        let payload = json!({"name": "x", "$inc": {"n": 1}});
        let s = stmt(CompileRequest::new("user", Method::Create, "id").values(payload.clone()));
        assert_eq!(s.values_to_set, Some(ValuesToSet::Documents(payload)));
        let e = compile(&CompileRequest::new("user", Method::CreateEach, "id").values(json!({"a": 1})))
            .unwrap_err();
        assert_eq!(e.kind(), ErrorKind::InvalidUpdate);
        let s = stmt(CompileRequest::new("user", Method::CreateEach, "id").values(json!([{"a": 1}, {"a": 2}])));
        assert!(matches!(s.values, Some(Values::Documents(Value::Array(ref a))) if a.len() == 2));
    }

    #[test]
    fn update_builds_three_value_sets() {
        let s = stmt(
            CompileRequest::new("user", Method::Upsert, "id")
                .criteria(json!({"where": {"id": "5", "age": {"$gt": 1}}}))
                .values(json!({"name": "x", "$inc": {"visits": 1}})),
        );
        let search = s.criteria.unwrap();
        assert_eq!(Value::Object(search), json!({"id": "5"}));
        let insert = s.insert_values.unwrap();
        assert_eq!(insert.get("id"), Some(&json!("5")));
        assert_eq!(insert.get("name"), Some(&json!("x")));
        assert_eq!(insert.get("visits"), Some(&json!(1)));
        assert!(insert.get(CREATED_AT).and_then(Value::as_str).is_some());
        let Some(Values::Assignments(a)) = s.values else { panic!("expected assignments") };
        assert_eq!(a.get("visits"), Some(&Operand::raw("OLD.visits+1")));
        assert!(a.get("id").is_none());
        assert_eq!(
            s.values_to_set,
            Some(ValuesToSet::Expression(r#"{ "name": "x", "visits": OLD.visits+1 }"#.into()))
        );
    }

    #[test]
    fn aggregate_short_circuits() {
        let q = compile(
            &CompileRequest::new("orders", Method::Aggregate, "id")
                .aggregate_criteria(json!({"$filter": {"paid": true}}))
                .criteria(json!("ignored")),
        )
        .unwrap();
        assert!(q.statement().is_none());
        assert!(q.aggregate_statement().unwrap().starts_with("FOR record IN orders\nFILTER record.paid == true"));
    }
}
