//! Change-stream listener over the server's write-ahead log.

pub mod bus;
pub mod cursor;
pub mod entry;
pub mod listener;
pub mod source;

pub use bus::EventBus;
pub use cursor::{ApplyStats, ReplicationCursor, TransactionBuffers};
pub use entry::{ChangeEvent, ChangeKind, EntryKind, LogEntry, Tick, parse_batch};
pub use listener::{ListenerConfig, ListenerHandle, ReplicationListener};
pub use source::{HttpLogSource, LogSource, TailResponse};
