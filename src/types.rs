use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::utils::escape;

pub type CollectionName = String;
pub type DocumentId = String;

/// A document is any JSON value. Top-level is expected to be an object.
pub type Document = Value;

/// Marker that turns a JSON string into a raw reference at the parse boundary.
pub const RAW_SIGIL: char = '$';

/// Separator between the collection and key halves of a document `_id`.
pub const ID_SEPARATOR: char = '/';

/// A value appearing on the right-hand side of a rendered expression.
///
/// `Literal` is always escaped before it reaches query text. `Raw` is copied
/// verbatim and must only ever be built from trusted input.
///
/// In JSON a raw operand is written as a sigil-prefixed string, which is also
/// how [`Operand::from_json`] reads it back.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Literal(Value),
    Raw(String),
}

impl Operand {
    pub fn literal(v: impl Into<Value>) -> Self {
        Self::Literal(v.into())
    }

    pub fn raw(expr: impl Into<String>) -> Self {
        Self::Raw(expr.into())
    }

    /// Interprets a JSON value from criteria input. Strings starting with
    /// [`RAW_SIGIL`] become raw references with the sigil stripped.
    #[must_use]
    pub fn from_json(v: &Value) -> Self {
        match v {
            Value::String(s) => match s.strip_prefix(RAW_SIGIL) {
                Some(expr) => Self::Raw(expr.to_string()),
                None => Self::Literal(v.clone()),
            },
            other => Self::Literal(other.clone()),
        }
    }

    /// Query-text form of this operand.
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            Self::Literal(v) => escape::escape_literal(v),
            Self::Raw(expr) => expr.clone(),
        }
    }

    #[must_use]
    pub fn as_literal(&self) -> Option<&Value> {
        match self {
            Self::Literal(v) => Some(v),
            Self::Raw(_) => None,
        }
    }

    #[must_use]
    pub fn is_raw(&self) -> bool {
        matches!(self, Self::Raw(_))
    }
}

impl Serialize for Operand {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Literal(v) => v.serialize(serializer),
            Self::Raw(expr) => serializer.serialize_str(&format!("{RAW_SIGIL}{expr}")),
        }
    }
}

impl<'de> Deserialize<'de> for Operand {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Self::from_json(&Value::deserialize(deserializer)?))
    }
}

/// Splits a document `_id` (`collection/key`) into its halves.
#[must_use]
pub fn split_document_id(id: &str) -> Option<(&str, &str)> {
    let (col, key) = id.split_once(ID_SEPARATOR)?;
    if col.is_empty() || key.is_empty() {
        return None;
    }
    Some((col, key))
}
