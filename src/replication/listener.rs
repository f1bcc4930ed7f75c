use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use super::bus::EventBus;
use super::cursor::ReplicationCursor;
use super::entry::{Tick, parse_batch};
use super::source::{LogSource, TailResponse};
use crate::config::ReplicationConfig;
use crate::errors::DbError;
use crate::telemetry::ListenerMetrics;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerConfig {
    /// Wait between idle or failed polls.
    pub poll_interval: Duration,
    /// Upper bound on each request to the log source.
    pub request_timeout: Duration,
    pub chunk_size: Option<u64>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self::from(&ReplicationConfig::default())
    }
}

impl From<&ReplicationConfig> for ListenerConfig {
    fn from(c: &ReplicationConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(c.poll_interval_ms),
            request_timeout: Duration::from_millis(c.request_timeout_ms),
            chunk_size: c.chunk_size,
        }
    }
}

#[derive(Debug, Default)]
struct Control {
    running: AtomicBool,
    wake: Notify,
}

/// Polls a [`LogSource`] and publishes committed changes to an [`EventBus`].
pub struct ReplicationListener {
    source: Arc<dyn LogSource>,
    bus: EventBus,
    config: ListenerConfig,
    metrics: Arc<ListenerMetrics>,
}

impl ReplicationListener {
    pub fn new(source: impl LogSource + 'static, bus: EventBus, config: ListenerConfig) -> Self {
        Self { source: Arc::new(source), bus, config, metrics: Arc::new(ListenerMetrics::default()) }
    }

    #[must_use]
    pub fn metrics(&self) -> Arc<ListenerMetrics> {
        self.metrics.clone()
    }

    /// Spawns the poll loop on the current tokio runtime.
    #[must_use]
    pub fn start(self) -> ListenerHandle {
        let control = Arc::new(Control { running: AtomicBool::new(true), wake: Notify::new() });
        let metrics = self.metrics.clone();
        let task = tokio::spawn(self.run(control.clone()));
        ListenerHandle { control, metrics, task }
    }

    async fn run(self, control: Arc<Control>) -> Result<Tick, DbError> {
        let start = match self.timed(self.source.logger_state()).await {
            Ok(tick) => tick,
            Err(e) => {
                let err = DbError::ReplicationStartup(e.to_string());
                error!("{err}");
                control.running.store(false, Ordering::SeqCst);
                self.bus.publish_error(&err);
                return Err(err);
            }
        };
        info!("replication listener started at tick {start}");
        let mut cursor = ReplicationCursor::new(start);

        while control.running.load(Ordering::SeqCst) {
            ListenerMetrics::incr(&self.metrics.polls_total);
            let polled = self.timed(self.source.tail(cursor.tick(), self.config.chunk_size)).await;
            if !control.running.load(Ordering::SeqCst) {
                break;
            }
            let applied = match polled {
                Ok(TailResponse::Idle) => {
                    ListenerMetrics::incr(&self.metrics.idle_polls_total);
                    false
                }
                Ok(TailResponse::Batch { last_included, .. }) if last_included <= cursor.tick() => {
                    ListenerMetrics::incr(&self.metrics.idle_polls_total);
                    warn!("skipping stale batch ending at {last_included}, cursor is at {}", cursor.tick());
                    false
                }
                Ok(TailResponse::Batch { last_included, body }) => match self.apply(&mut cursor, last_included, &body) {
                    Ok(()) => true,
                    Err(e) => {
                        ListenerMetrics::incr(&self.metrics.failed_polls_total);
                        warn!("discarding batch ending at {last_included}, retrying from {}: {e}", cursor.tick());
                        false
                    }
                },
                Err(e) => {
                    ListenerMetrics::incr(&self.metrics.failed_polls_total);
                    warn!("poll from {} failed: {e}", cursor.tick());
                    false
                }
            };
            if !applied {
                tokio::select! {
                    () = tokio::time::sleep(self.config.poll_interval) => {}
                    () = control.wake.notified() => {}
                }
            }
        }
        info!("replication listener stopped at tick {}", cursor.tick());
        Ok(cursor.tick())
    }

    fn apply(&self, cursor: &mut ReplicationCursor, last_included: Tick, body: &str) -> Result<(), DbError> {
        let entries = parse_batch(body)?;
        let mut panics = 0;
        let stats = cursor.apply(last_included, entries, |ev| panics += self.bus.publish(&ev));
        debug!(
            "applied batch to {}: {} emitted, {} dropped",
            cursor.tick(),
            stats.emitted,
            stats.dropped
        );
        let m = &self.metrics;
        ListenerMetrics::incr(&m.batches_applied_total);
        ListenerMetrics::add(&m.events_emitted_total, stats.emitted);
        ListenerMetrics::add(&m.events_dropped_total, stats.dropped);
        ListenerMetrics::add(&m.transactions_committed_total, stats.committed);
        ListenerMetrics::add(&m.transactions_aborted_total, stats.aborted);
        ListenerMetrics::add(&m.subscriber_panics_total, panics);
        Ok(())
    }

    async fn timed<T>(&self, fut: impl Future<Output = Result<T, DbError>>) -> Result<T, DbError> {
        tokio::time::timeout(self.config.request_timeout, fut)
            .await
            .map_err(|_| DbError::Transport(format!("request timed out after {:?}", self.config.request_timeout)))?
    }
}

/// Running listener. Dropping the handle does not stop the loop.
#[derive(Debug)]
pub struct ListenerHandle {
    control: Arc<Control>,
    metrics: Arc<ListenerMetrics>,
    task: JoinHandle<Result<Tick, DbError>>,
}

impl ListenerHandle {
    /// Prevents the next poll. A request already in flight completes and its
    /// result is discarded.
    pub fn stop(&self) {
        self.control.running.store(false, Ordering::SeqCst);
        self.control.wake.notify_one();
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.control.running.load(Ordering::SeqCst) && !self.task.is_finished()
    }

    #[must_use]
    pub fn metrics(&self) -> &ListenerMetrics {
        &self.metrics
    }

    /// Waits for the loop to end and returns the last applied tick.
    ///
    /// # Errors
    /// Returns `ReplicationStartup` if the initial log position could not be
    /// read.
    pub async fn join(self) -> Result<Tick, DbError> {
        self.task.await.map_err(|e| DbError::Transport(format!("listener task failed: {e}")))?
    }
}
