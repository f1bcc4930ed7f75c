use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::errors::DbError;
use crate::types::split_document_id;

/// Transaction id carried by operations that ran outside a transaction.
pub const STANDALONE_TID: &str = "0";

pub const TRANSACTION_START: u32 = 2200;
pub const TRANSACTION_COMMIT: u32 = 2201;
pub const TRANSACTION_ABORT: u32 = 2202;
pub const DOCUMENT_UPSERT: u32 = 2300;
pub const DOCUMENT_REMOVE: u32 = 2302;

/// Log position. Ticks arrive as decimal strings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Tick(pub u64);

impl Tick {
    /// # Errors
    /// Returns `Transport` if `s` is not a decimal tick.
    pub fn parse(s: &str) -> Result<Self, DbError> {
        s.trim()
            .parse::<u64>()
            .map(Self)
            .map_err(|_| DbError::Transport(format!("invalid tick `{s}`")))
    }
}

impl fmt::Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    TransactionStart,
    TransactionCommit,
    TransactionAbort,
    DocumentUpsert,
    DocumentRemove,
    Other(u32),
}

impl From<u32> for EntryKind {
    fn from(code: u32) -> Self {
        match code {
            TRANSACTION_START => Self::TransactionStart,
            TRANSACTION_COMMIT => Self::TransactionCommit,
            TRANSACTION_ABORT => Self::TransactionAbort,
            DOCUMENT_UPSERT => Self::DocumentUpsert,
            DOCUMENT_REMOVE => Self::DocumentRemove,
            other => Self::Other(other),
        }
    }
}

/// Kind of change delivered to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ChangeKind {
    CreateOrUpdate,
    Delete,
}

impl ChangeKind {
    #[must_use]
    pub fn event_name(self) -> &'static str {
        match self {
            Self::CreateOrUpdate => "onCreateOrUpdate",
            Self::Delete => "onDelete",
        }
    }
}

/// One committed change for a collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeEvent {
    pub collection: String,
    pub document: Value,
    pub kind: ChangeKind,
    pub tick: Option<Tick>,
}

impl ChangeEvent {
    #[must_use]
    pub fn event_name(&self) -> &'static str {
        self.kind.event_name()
    }
}

/// One line of the write-ahead log tail.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LogEntry {
    #[serde(default, deserialize_with = "de_opt_tick")]
    pub tick: Option<Tick>,
    #[serde(rename = "type")]
    pub code: u32,
    #[serde(default = "standalone_tid", deserialize_with = "de_tid")]
    pub tid: String,
    #[serde(default)]
    pub data: Value,
}

fn standalone_tid() -> String {
    STANDALONE_TID.to_string()
}

fn de_tid<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        _ => standalone_tid(),
    })
}

fn de_opt_tick<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Tick>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::String(s) => s.parse::<u64>().ok().map(Tick),
        Value::Number(n) => n.as_u64().map(Tick),
        _ => None,
    })
}

impl LogEntry {
    #[must_use]
    pub fn kind(&self) -> EntryKind {
        EntryKind::from(self.code)
    }

    #[must_use]
    pub fn is_standalone(&self) -> bool {
        self.tid == STANDALONE_TID
    }

    /// Converts a document entry into an event. Entries without a usable
    /// `_id`, and non-document entries, yield `None`.
    #[must_use]
    pub fn into_event(self) -> Option<ChangeEvent> {
        let kind = match self.kind() {
            EntryKind::DocumentUpsert => ChangeKind::CreateOrUpdate,
            EntryKind::DocumentRemove => ChangeKind::Delete,
            _ => return None,
        };
        let collection = {
            let id = self.data.get("_id")?.as_str()?;
            split_document_id(id)?.0.to_string()
        };
        Some(ChangeEvent { collection, document: self.data, kind, tick: self.tick })
    }
}

/// Parses a newline-delimited batch. Blank lines are skipped; any malformed
/// line fails the whole batch.
///
/// # Errors
/// Returns `Json` for the first line that is not a log entry.
pub fn parse_batch(body: &str) -> Result<Vec<LogEntry>, DbError> {
    body.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|l| serde_json::from_str::<LogEntry>(l).map_err(DbError::from))
        .collect()
}
