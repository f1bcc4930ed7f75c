use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

use super::filter::Predicate;
use crate::types::Operand;

/// Upper bound used for `LIMIT offset, count` when only a skip is given.
pub(crate) const MAX_SAFE_LIMIT: u64 = 9_007_199_254_740_991;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Order {
    Asc,
    Desc,
}

impl Order {
    /// Accepts `ASC`/`DESC` in any case, and `1`/`-1`.
    #[must_use]
    pub fn parse(v: &Value) -> Option<Self> {
        match v {
            Value::String(s) if s.eq_ignore_ascii_case("asc") => Some(Self::Asc),
            Value::String(s) if s.eq_ignore_ascii_case("desc") => Some(Self::Desc),
            Value::Number(n) => match n.as_i64() {
                Some(1) => Some(Self::Asc),
                Some(-1) => Some(Self::Desc),
                _ => None,
            },
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: String,
    pub order: Order,
}

/// Parsed criteria. `where_vertex`/`where_edge` stay as JSON because their
/// string shorthand needs the primary-key column, known only at compile time.
#[derive(Debug, Clone)]
pub struct Criteria {
    pub filter: Predicate,
    pub select: Vec<String>,
    pub sort: Vec<SortSpec>,
    pub limit: Option<u64>,
    pub skip: Option<u64>,
    pub where_vertex: Option<Value>,
    pub where_edge: Option<Value>,
}

impl Default for Criteria {
    fn default() -> Self {
        Self {
            filter: Predicate::True,
            select: Vec::new(),
            sort: Vec::new(),
            limit: None,
            skip: None,
            where_vertex: None,
            where_edge: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Method {
    Create,
    CreateEach,
    Update,
    Upsert,
    Replace,
    Destroy,
    Find,
    FindAny,
    FindOutbound,
    FindNear,
    FindWithCount,
    Count,
    Sum,
    Avg,
    Aggregate,
    CreateEdge,
    GetOutboundVertices,
}

impl Method {
    pub const ALL: [Self; 17] = [
        Self::Create,
        Self::CreateEach,
        Self::Update,
        Self::Upsert,
        Self::Replace,
        Self::Destroy,
        Self::Find,
        Self::FindAny,
        Self::FindOutbound,
        Self::FindNear,
        Self::FindWithCount,
        Self::Count,
        Self::Sum,
        Self::Avg,
        Self::Aggregate,
        Self::CreateEdge,
        Self::GetOutboundVertices,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::CreateEach => "createEach",
            Self::Update => "update",
            Self::Upsert => "upsert",
            Self::Replace => "replace",
            Self::Destroy => "destroy",
            Self::Find => "find",
            Self::FindAny => "findAny",
            Self::FindOutbound => "findOutbound",
            Self::FindNear => "findNear",
            Self::FindWithCount => "findWithCount",
            Self::Count => "count",
            Self::Sum => "sum",
            Self::Avg => "avg",
            Self::Aggregate => "aggregate",
            Self::CreateEdge => "createEdge",
            Self::GetOutboundVertices => "getOutboundVertices",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.as_str() == s)
    }

    #[must_use]
    pub fn is_update(self) -> bool {
        matches!(self, Self::Update | Self::Upsert)
    }

    /// Methods whose payload is stored as given.
    #[must_use]
    pub fn is_insert(self) -> bool {
        matches!(self, Self::Create | Self::CreateEach | Self::Replace | Self::CreateEdge)
    }
}

/// Input to [`compile`](super::compile).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileRequest {
    pub model: Option<String>,
    pub method: Option<Method>,
    pub criteria: Option<Value>,
    pub values: Option<Value>,
    pub pk_column_name: Option<String>,
    pub edge_collections: Option<Value>,
    pub distance_criteria: Option<Value>,
    pub aggregate_criteria: Option<Value>,
    pub numeric_attr_name: Option<String>,
}

impl CompileRequest {
    pub fn new(model: impl Into<String>, method: Method, pk_column_name: impl Into<String>) -> Self {
        Self {
            model: Some(model.into()),
            method: Some(method),
            pk_column_name: Some(pk_column_name.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn criteria(mut self, criteria: Value) -> Self {
        self.criteria = Some(criteria);
        self
    }

    #[must_use]
    pub fn values(mut self, values: Value) -> Self {
        self.values = Some(values);
        self
    }

    #[must_use]
    pub fn edge_collections(mut self, edges: Value) -> Self {
        self.edge_collections = Some(edges);
        self
    }

    #[must_use]
    pub fn distance_criteria(mut self, distance: Value) -> Self {
        self.distance_criteria = Some(distance);
        self
    }

    #[must_use]
    pub fn aggregate_criteria(mut self, pipeline: Value) -> Self {
        self.aggregate_criteria = Some(pipeline);
        self
    }

    #[must_use]
    pub fn numeric_attr_name(mut self, attr: impl Into<String>) -> Self {
        self.numeric_attr_name = Some(attr.into());
        self
    }
}

/// Ordered field assignments produced by the update normaliser.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Assignments(pub Vec<(String, Operand)>);

impl Assignments {
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Operand> {
        self.0.iter().find(|(f, _)| f == field).map(|(_, v)| v)
    }

    /// Sets `field`, replacing an earlier assignment in place.
    pub fn set(&mut self, field: String, value: Operand) {
        match self.0.iter_mut().find(|(f, _)| *f == field) {
            Some(slot) => slot.1 = value,
            None => self.0.push((field, value)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, Operand)> {
        self.0.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The assignments as a JSON object, or `None` if any value is a raw expression.
    #[must_use]
    pub fn to_plain(&self) -> Option<Map<String, Value>> {
        self.0.iter().map(|(k, v)| v.as_literal().map(|l| (k.clone(), l.clone()))).collect()
    }
}

impl Serialize for Assignments {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Values {
    /// Payload passed through untouched (create, createEach, replace, createEdge).
    Documents(Value),
    /// Normalised update assignments.
    Assignments(Assignments),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ValuesToSet {
    Documents(Value),
    /// Rendered object text with `OLD`-relative expressions.
    Expression(String),
}

/// Constant-time document lookup derived from a primary-key equality.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrimaryWhere {
    #[serde(rename = "_id")]
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoCriteria {
    pub attr_name: String,
    pub radius: f64,
    pub latitude: f64,
    pub longitude: f64,
    /// `"<lat>, <lon>"`
    pub coordinates: String,
}

/// Fully-resolved output of the compiler for one operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statement {
    #[serde(rename = "tableName")]
    pub table_name: String,
    pub model: String,
    pub method: Method,
    pub select: Vec<String>,
    #[serde(rename = "selectClause")]
    pub select_clause: String,
    #[serde(rename = "whereClause")]
    pub where_clause: String,
    #[serde(rename = "primarywhere")]
    pub primary_where: Option<PrimaryWhere>,
    #[serde(rename = "whereVertexClause")]
    pub where_vertex_clause: String,
    #[serde(rename = "whereEdgeClause")]
    pub where_edge_clause: String,
    #[serde(rename = "sortClause")]
    pub sort_clause: String,
    #[serde(rename = "sortClauseArray")]
    pub sort_clause_array: Vec<String>,
    pub limit: Option<u64>,
    pub skip: Option<u64>,
    #[serde(rename = "numericAttrName")]
    pub numeric_attr_name: Option<String>,
    #[serde(rename = "edgeCollections")]
    pub edge_collections: Option<String>,
    #[serde(rename = "geoAttrName")]
    pub geo_attr_name: Option<String>,
    #[serde(rename = "geoRadius")]
    pub geo_radius: Option<f64>,
    #[serde(rename = "distanceCriteria")]
    pub distance_criteria: Option<GeoCriteria>,
    pub values: Option<Values>,
    #[serde(rename = "valuesToSet", skip_serializing_if = "Option::is_none")]
    pub values_to_set: Option<ValuesToSet>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub criteria: Option<Map<String, Value>>,
    #[serde(rename = "insertvalues", skip_serializing_if = "Option::is_none")]
    pub insert_values: Option<Map<String, Value>>,
}

impl Statement {
    /// `LIMIT` clause for the pagination fields, empty when neither is set.
    #[must_use]
    pub fn limit_clause(&self) -> String {
        match (self.skip.filter(|s| *s > 0), self.limit) {
            (None, None) => String::new(),
            (None, Some(limit)) => format!("LIMIT {limit}"),
            (Some(skip), limit) => format!("LIMIT {skip}, {}", limit.unwrap_or(MAX_SAFE_LIMIT)),
        }
    }
}

/// Result of compiling a request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CompiledQuery {
    Statement(Box<Statement>),
    Aggregate {
        #[serde(rename = "aggregatestatement")]
        statement: String,
    },
}

impl CompiledQuery {
    #[must_use]
    pub fn statement(&self) -> Option<&Statement> {
        match self {
            Self::Statement(s) => Some(s),
            Self::Aggregate { .. } => None,
        }
    }

    #[must_use]
    pub fn aggregate_statement(&self) -> Option<&str> {
        match self {
            Self::Aggregate { statement } => Some(statement),
            Self::Statement(_) => None,
        }
    }

    /// Unwraps the statement variant.
    ///
    /// # Errors
    /// Returns `InvalidCriteria` for an aggregate result.
    pub fn into_statement(self) -> Result<Statement, crate::errors::DbError> {
        match self {
            Self::Statement(s) => Ok(*s),
            Self::Aggregate { .. } => Err(crate::errors::DbError::InvalidCriteria(
                "aggregate requests compile to a pipeline, not a statement".into(),
            )),
        }
    }
}
