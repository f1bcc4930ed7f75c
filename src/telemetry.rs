use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for one replication listener.
#[derive(Debug, Default)]
pub struct ListenerMetrics {
    pub polls_total: AtomicU64,
    pub idle_polls_total: AtomicU64,
    pub failed_polls_total: AtomicU64,
    pub batches_applied_total: AtomicU64,
    pub events_emitted_total: AtomicU64,
    pub events_dropped_total: AtomicU64,
    pub transactions_committed_total: AtomicU64,
    pub transactions_aborted_total: AtomicU64,
    pub subscriber_panics_total: AtomicU64,
}

/// Point-in-time copy of [`ListenerMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub polls_total: u64,
    pub idle_polls_total: u64,
    pub failed_polls_total: u64,
    pub batches_applied_total: u64,
    pub events_emitted_total: u64,
    pub events_dropped_total: u64,
    pub transactions_committed_total: u64,
    pub transactions_aborted_total: u64,
    pub subscriber_panics_total: u64,
}

impl ListenerMetrics {
    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        if n > 0 {
            counter.fetch_add(n, Ordering::Relaxed);
        }
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            polls_total: self.polls_total.load(Ordering::Relaxed),
            idle_polls_total: self.idle_polls_total.load(Ordering::Relaxed),
            failed_polls_total: self.failed_polls_total.load(Ordering::Relaxed),
            batches_applied_total: self.batches_applied_total.load(Ordering::Relaxed),
            events_emitted_total: self.events_emitted_total.load(Ordering::Relaxed),
            events_dropped_total: self.events_dropped_total.load(Ordering::Relaxed),
            transactions_committed_total: self.transactions_committed_total.load(Ordering::Relaxed),
            transactions_aborted_total: self.transactions_aborted_total.load(Ordering::Relaxed),
            subscriber_panics_total: self.subscriber_panics_total.load(Ordering::Relaxed),
        }
    }

    /// OpenMetrics/Prometheus exposition format (no types/HELP for brevity)
    #[must_use]
    pub fn metrics_text(&self) -> String {
        let m = self.snapshot();
        format!(
            "aqlbridge_replication_polls_total {}\n\
             aqlbridge_replication_idle_polls_total {}\n\
             aqlbridge_replication_failed_polls_total {}\n\
             aqlbridge_replication_batches_applied_total {}\n\
             aqlbridge_replication_events_emitted_total {}\n\
             aqlbridge_replication_events_dropped_total {}\n\
             aqlbridge_replication_transactions_committed_total {}\n\
             aqlbridge_replication_transactions_aborted_total {}\n\
             aqlbridge_replication_subscriber_panics_total {}\n",
            m.polls_total,
            m.idle_polls_total,
            m.failed_polls_total,
            m.batches_applied_total,
            m.events_emitted_total,
            m.events_dropped_total,
            m.transactions_committed_total,
            m.transactions_aborted_total,
            m.subscriber_panics_total,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_and_text() {
        let m = ListenerMetrics::default();
        ListenerMetrics::incr(&m.polls_total);
        ListenerMetrics::add(&m.events_emitted_total, 3);
        let s = m.snapshot();
        assert_eq!(s.polls_total, 1);
        assert_eq!(s.events_emitted_total, 3);
        assert!(m.metrics_text().contains("aqlbridge_replication_events_emitted_total 3\n"));
    }
}
