use std::collections::HashMap;

use log::{debug, trace, warn};

use super::entry::{ChangeEvent, EntryKind, LogEntry, Tick};

/// Open transactions, keyed by transaction id. Each buffer is append-only and
/// is removed by the call that commits or aborts it.
#[derive(Debug, Default)]
pub struct TransactionBuffers {
    open: HashMap<String, Vec<LogEntry>>,
}

impl TransactionBuffers {
    /// Opens an empty buffer for `tid`. Reopening an id discards whatever it
    /// held.
    pub fn begin(&mut self, tid: &str) {
        if self.open.insert(tid.to_string(), Vec::new()).is_some() {
            warn!("transaction {tid} started twice; previous buffer discarded");
        }
    }

    /// Buffers `entry` under its transaction. A transaction whose start
    /// record was never seen (the tail began mid-transaction) is opened here.
    pub fn append(&mut self, entry: LogEntry) {
        if !self.open.contains_key(&entry.tid) {
            debug!("transaction {} opened without a start record", entry.tid);
        }
        self.open.entry(entry.tid.clone()).or_default().push(entry);
    }

    /// Removes and returns the buffer for `tid` in arrival order.
    #[must_use]
    pub fn commit(&mut self, tid: &str) -> Option<Vec<LogEntry>> {
        self.open.remove(tid)
    }

    /// Removes the buffer for `tid`, returning how many entries were dropped.
    #[must_use]
    pub fn abort(&mut self, tid: &str) -> Option<usize> {
        self.open.remove(tid).map(|b| b.len())
    }

    #[must_use]
    pub fn is_open(&self, tid: &str) -> bool {
        self.open.contains_key(tid)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.open.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }
}

/// Counts from applying one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyStats {
    pub emitted: u64,
    pub dropped: u64,
    pub committed: u64,
    pub aborted: u64,
}

/// Log position plus in-flight transactions for one listener.
#[derive(Debug, Default)]
pub struct ReplicationCursor {
    tick: Tick,
    buffers: TransactionBuffers,
}

impl ReplicationCursor {
    #[must_use]
    pub fn new(tick: Tick) -> Self {
        Self { tick, buffers: TransactionBuffers::default() }
    }

    #[must_use]
    pub fn tick(&self) -> Tick {
        self.tick
    }

    #[must_use]
    pub fn buffers(&self) -> &TransactionBuffers {
        &self.buffers
    }

    /// Moves the position forward. Older ticks are ignored.
    pub fn advance(&mut self, to: Tick) {
        if to > self.tick {
            trace!("cursor {} -> {}", self.tick, to);
            self.tick = to;
        }
    }

    /// Applies a fully parsed batch in order and then advances to
    /// `last_included`. Events are handed to `emit` as soon as they are
    /// committed.
    pub fn apply<F>(&mut self, last_included: Tick, entries: Vec<LogEntry>, mut emit: F) -> ApplyStats
    where
        F: FnMut(ChangeEvent),
    {
        let mut stats = ApplyStats::default();
        for entry in entries {
            match entry.kind() {
                EntryKind::TransactionStart => self.buffers.begin(&entry.tid),
                EntryKind::TransactionCommit => match self.buffers.commit(&entry.tid) {
                    Some(buffered) => {
                        debug!("transaction {} committed with {} entries", entry.tid, buffered.len());
                        stats.committed += 1;
                        for e in buffered {
                            dispatch(e, &mut emit, &mut stats);
                        }
                    }
                    None => warn!("commit for unknown transaction {} ignored", entry.tid),
                },
                EntryKind::TransactionAbort => match self.buffers.abort(&entry.tid) {
                    Some(n) => {
                        debug!("transaction {} aborted, {n} entries discarded", entry.tid);
                        stats.aborted += 1;
                    }
                    None => warn!("abort for unknown transaction {} ignored", entry.tid),
                },
                EntryKind::DocumentUpsert | EntryKind::DocumentRemove => {
                    if entry.is_standalone() {
                        dispatch(entry, &mut emit, &mut stats);
                    } else {
                        self.buffers.append(entry);
                    }
                }
                EntryKind::Other(_) => {}
            }
        }
        self.advance(last_included);
        stats
    }
}

fn dispatch<F: FnMut(ChangeEvent)>(entry: LogEntry, emit: &mut F, stats: &mut ApplyStats) {
    match entry.into_event() {
        Some(ev) => {
            stats.emitted += 1;
            emit(ev);
        }
        None => stats.dropped += 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replication::entry::parse_batch;

    fn run(cursor: &mut ReplicationCursor, to: u64, body: &str) -> (Vec<ChangeEvent>, ApplyStats) {
        let mut out = Vec::new();
        let stats = cursor.apply(Tick(to), parse_batch(body).unwrap(), |e| out.push(e));
        (out, stats)
    }

    #[test]
    fn commit_replays_in_order() {
        let mut c = ReplicationCursor::new(Tick(1));
        let (ev, _) = run(
            &mut c,
            5,
            r#"{"type":2200,"tid":"9"}
{"type":2300,"tid":"9","data":{"_id":"a/1"}}
{"type":2302,"tid":"9","data":{"_id":"b/2"}}"#,
        );
        assert!(ev.is_empty());
        assert!(c.buffers().is_open("9"));
        assert_eq!(c.tick(), Tick(5));

        let (ev, stats) = run(&mut c, 6, r#"{"type":2201,"tid":"9"}"#);
        assert_eq!(ev.iter().map(|e| e.collection.as_str()).collect::<Vec<_>>(), ["a", "b"]);
        assert_eq!(ev[1].event_name(), "onDelete");
        assert_eq!(stats.committed, 1);
        assert!(c.buffers().is_empty());
    }

    #[test]
    fn abort_discards() {
        let mut c = ReplicationCursor::default();
        let (ev, stats) = run(
            &mut c,
            3,
            r#"{"type":2200,"tid":"1"}
{"type":2300,"tid":"1","data":{"_id":"a/1"}}
{"type":2202,"tid":"1"}"#,
        );
        assert!(ev.is_empty());
        assert_eq!(stats.aborted, 1);
        assert!(c.buffers().is_empty());
    }

    #[test]
    fn standalone_bypasses_open_transaction() {
        let mut c = ReplicationCursor::default();
        let (ev, _) = run(
            &mut c,
            2,
            r#"{"type":2200,"tid":"1"}
{"type":2302,"tid":"0","data":{"_id":"a/7"}}"#,
        );
        assert_eq!(ev.len(), 1);
        assert_eq!(ev[0].event_name(), "onDelete");
    }

    #[test]
    fn unknown_transaction_ids() {
        let mut c = ReplicationCursor::default();
        let (ev, stats) = run(
            &mut c,
            2,
            r#"{"type":2300,"tid":"44","data":{"_id":"a/1"}}
{"type":2201,"tid":"44"}
{"type":2202,"tid":"45"}
{"type":2201,"tid":"46"}"#,
        );
        assert_eq!(ev.len(), 1);
        assert_eq!(ev[0].collection, "a");
        assert_eq!(stats, ApplyStats { emitted: 1, dropped: 0, committed: 1, aborted: 0 });
        assert!(c.buffers().is_empty());
    }

    #[test]
    fn tail_joined_mid_transaction_then_aborted() {
        let mut c = ReplicationCursor::new(Tick(1));
        let (ev, _) = run(&mut c, 3, r#"{"type":2300,"tid":"7","data":{"_id":"users/a"}}"#);
        assert!(ev.is_empty());
        assert!(c.buffers().is_open("7"));

        let (ev, stats) = run(
            &mut c,
            4,
            r#"{"type":2302,"tid":"7","data":{"_id":"users/b"}}
{"type":2202,"tid":"7"}"#,
        );
        assert!(ev.is_empty());
        assert_eq!(stats.aborted, 1);
        assert!(c.buffers().is_empty());
        assert_eq!(c.tick(), Tick(4));
    }

    #[test]
    fn dropped_entries_are_counted_and_cursor_never_rewinds() {
        let mut c = ReplicationCursor::new(Tick(10));
        let (ev, stats) = run(&mut c, 4, r#"{"type":2300,"tid":"0","data":{"name":"x"}}"#);
        assert!(ev.is_empty());
        assert_eq!(stats.dropped, 1);
        assert_eq!(c.tick(), Tick(10));
    }
}
