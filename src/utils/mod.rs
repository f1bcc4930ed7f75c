//! Utility modules: value escaping and JSON helpers shared by the query builders.
pub mod escape;
pub mod json;
