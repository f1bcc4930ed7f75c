//! Criteria-to-query compiler: predicate, pipeline and update rendering.

// Submodules for separation of concerns
mod aggregate;
mod filter;
mod geo;
mod parse;
mod statement;
mod types;
mod update;

// Public API re-exports
pub use aggregate::{Aggregate, AggregateFn, Pipeline, render_pipeline};
pub use filter::{Comparison, DEFAULT_RECORD_VAR, FieldRef, FilterBuilder, Predicate, render_filter};
pub use geo::{parse_distance_criteria, parse_edge_collections};
pub use parse::parse_criteria_json;
pub use statement::{CREATED_AT, EDGE_VAR, VERTEX_VAR, compile};
pub use types::{
    Assignments, CompileRequest, CompiledQuery, Criteria, GeoCriteria, Method, Order, PrimaryWhere,
    SortSpec, Statement, Values, ValuesToSet,
};
pub use update::{NormalizedUpdate, OLD_VAR, UpdateMode, normalize};

/// # Errors
/// Returns an error if the JSON string is not a valid compile request or the
/// request fails to compile.
pub fn compile_json(json: &str) -> Result<CompiledQuery, crate::errors::DbError> {
    let req: CompileRequest = serde_json::from_str(json)?;
    compile(&req)
}
