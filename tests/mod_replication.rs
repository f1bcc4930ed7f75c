use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use aqlbridge::errors::{DbError, ErrorKind};
use aqlbridge::replication::{
    ChangeEvent, EventBus, ListenerConfig, ListenerHandle, LogSource, ReplicationListener, TailResponse, Tick,
};
use async_trait::async_trait;
use parking_lot::Mutex;

struct Shared {
    served: AtomicUsize,
    requested: Mutex<Vec<Tick>>,
}

struct ScriptedSource {
    start: Result<u64, String>,
    script: Mutex<VecDeque<Result<TailResponse, DbError>>>,
    shared: Arc<Shared>,
}

#[async_trait]
impl LogSource for ScriptedSource {
    async fn logger_state(&self) -> Result<Tick, DbError> {
        self.start.clone().map(Tick).map_err(DbError::Transport)
    }

    async fn tail(&self, from: Tick, _chunk: Option<u64>) -> Result<TailResponse, DbError> {
        self.shared.requested.lock().push(from);
        let next = self.script.lock().pop_front().unwrap_or(Ok(TailResponse::Idle));
        self.shared.served.fetch_add(1, Ordering::SeqCst);
        next
    }
}

fn batch(last: u64, lines: &[&str]) -> Result<TailResponse, DbError> {
    Ok(TailResponse::Batch { last_included: Tick(last), body: lines.join("\n") })
}

fn fast() -> ListenerConfig {
    ListenerConfig { poll_interval: Duration::from_millis(5), request_timeout: Duration::from_secs(2), chunk_size: None }
}

struct Run {
    handle: ListenerHandle,
    shared: Arc<Shared>,
    events: Arc<Mutex<Vec<(ChangeEvent, usize)>>>,
}

fn start(start: Result<u64, String>, script: Vec<Result<TailResponse, DbError>>, bus: EventBus) -> Run {
    let shared = Arc::new(Shared { served: AtomicUsize::new(0), requested: Mutex::new(Vec::new()) });
    let events = Arc::new(Mutex::new(Vec::new()));
    let (ev, sh) = (events.clone(), shared.clone());
    bus.on_any(move |e| ev.lock().push((e.clone(), sh.served.load(Ordering::SeqCst))));
    let source = ScriptedSource { start, script: Mutex::new(script.into()), shared: shared.clone() };
    let handle = ReplicationListener::new(source, bus, fast()).start();
    Run { handle, shared, events }
}

impl Run {
    /// Waits until every scripted response plus one idle poll has been served.
    async fn drain(&self, scripted: usize) {
        for _ in 0..400 {
            if self.shared.served.load(Ordering::SeqCst) > scripted {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("listener did not drain its script");
    }
}

const TX_START: &str = r#"{"tick":"2","type":2200,"tid":"1"}"#;
const INSERT_A: &str = r#"{"tick":"3","type":2300,"tid":"1","data":{"_id":"users/a","_key":"a","name":"A"}}"#;
const COMMIT: &str = r#"{"tick":"4","type":2201,"tid":"1"}"#;
const ABORT: &str = r#"{"tick":"4","type":2202,"tid":"1"}"#;

#[tokio::test]
async fn committed_insert_is_emitted_once_after_commit() {
    let run = start(Ok(1), vec![batch(3, &[TX_START, INSERT_A]), batch(4, &[COMMIT])], EventBus::new());
    run.drain(2).await;
    let snapshot = run.handle.metrics().snapshot();
    run.handle.stop();
    let tick = run.handle.join().await.unwrap();

    let events = run.events.lock();
    assert_eq!(events.len(), 1);
    let (ev, served_when_seen) = &events[0];
    assert_eq!(ev.collection, "users");
    assert_eq!(ev.event_name(), "onCreateOrUpdate");
    assert_eq!(ev.document["name"], "A");
    assert_eq!(*served_when_seen, 2, "event must follow the commit batch");
    assert_eq!(tick, Tick(4));
    assert_eq!(snapshot.transactions_committed_total, 1);
    assert_eq!(snapshot.batches_applied_total, 2);
}

#[tokio::test]
async fn aborted_insert_is_never_emitted() {
    let run = start(Ok(1), vec![batch(4, &[TX_START, INSERT_A, ABORT])], EventBus::new());
    run.drain(1).await;
    let snapshot = run.handle.metrics().snapshot();
    run.handle.stop();
    run.handle.join().await.unwrap();
    assert!(run.events.lock().is_empty());
    assert_eq!(snapshot.transactions_aborted_total, 1);
}

#[tokio::test]
async fn standalone_delete_is_not_buffered() {
    let delete = r#"{"tick":"3","type":2302,"tid":"0","data":{"_id":"orders/9","_key":"9"}}"#;
    let run = start(Ok(1), vec![batch(3, &[TX_START, delete])], EventBus::new());
    run.drain(1).await;
    run.handle.stop();
    run.handle.join().await.unwrap();
    let events = run.events.lock();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].0.collection, "orders");
    assert_eq!(events[0].0.event_name(), "onDelete");
}

#[tokio::test]
async fn failed_polls_retry_from_the_same_tick() {
    let good = r#"{"type":2300,"tid":"0","data":{"_id":"users/b"}}"#;
    let run = start(
        Ok(1),
        vec![
            Err(DbError::Transport("connection reset".into())),
            batch(5, &["{not json"]),
            batch(5, &[good]),
        ],
        EventBus::new(),
    );
    run.drain(3).await;
    let snapshot = run.handle.metrics().snapshot();
    run.handle.stop();
    assert_eq!(run.handle.join().await.unwrap(), Tick(5));

    let requested = run.shared.requested.lock().clone();
    assert_eq!(&requested[..4], &[Tick(1), Tick(1), Tick(1), Tick(5)]);
    assert_eq!(snapshot.failed_polls_total, 2);
    assert_eq!(run.events.lock().len(), 1);
}

#[tokio::test]
async fn startup_failure_is_reported_once_and_stops() {
    let bus = EventBus::new();
    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = errors.clone();
    bus.on_error(move |e| sink.lock().push(e.kind()));
    let run = start(Err("503 Service Unavailable".into()), vec![], bus);
    let err = run.handle.join().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ReplicationStartup);
    assert_eq!(*errors.lock(), vec![ErrorKind::ReplicationStartup]);
    assert_eq!(run.shared.served.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn panicking_subscriber_does_not_stop_the_loop() {
    let bus = EventBus::new();
    bus.on("users", |_| panic!("subscriber bug"));
    let first = r#"{"type":2300,"tid":"0","data":{"_id":"users/1"}}"#;
    let second = r#"{"type":2300,"tid":"0","data":{"_id":"users/2"}}"#;
    let run = start(Ok(1), vec![batch(2, &[first]), batch(3, &[second])], bus);
    run.drain(2).await;
    let snapshot = run.handle.metrics().snapshot();
    run.handle.stop();
    run.handle.join().await.unwrap();
    assert_eq!(run.events.lock().len(), 2);
    assert_eq!(snapshot.subscriber_panics_total, 2);
}

#[tokio::test]
async fn stop_interrupts_the_backoff() {
    let shared = Arc::new(Shared { served: AtomicUsize::new(0), requested: Mutex::new(Vec::new()) });
    let source = ScriptedSource { start: Ok(1), script: Mutex::new(VecDeque::new()), shared: shared.clone() };
    let config = ListenerConfig { poll_interval: Duration::from_secs(60), ..fast() };
    let handle = ReplicationListener::new(source, EventBus::new(), config).start();
    while shared.served.load(Ordering::SeqCst) == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    handle.stop();
    let joined = tokio::time::timeout(Duration::from_secs(2), handle.join()).await;
    assert_eq!(joined.expect("stop should wake the backoff").unwrap(), Tick(1));
}

#[tokio::test]
async fn channel_subscribers_receive_committed_changes() {
    let bus = EventBus::new();
    let mut rx = bus.subscribe_channel("users");
    let run = start(Ok(1), vec![batch(4, &[TX_START, INSERT_A, COMMIT])], bus);
    let ev = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
    assert_eq!(ev.document["_key"], "a");
    run.handle.stop();
    run.handle.join().await.unwrap();
}

/// Answers every tail request after `delay` with one standalone insert.
struct DelayedSource {
    delay: Duration,
    calls: Arc<AtomicUsize>,
    requested: Arc<Mutex<Vec<Tick>>>,
}

#[async_trait]
impl LogSource for DelayedSource {
    async fn logger_state(&self) -> Result<Tick, DbError> {
        Ok(Tick(1))
    }

    async fn tail(&self, from: Tick, _chunk: Option<u64>) -> Result<TailResponse, DbError> {
        self.requested.lock().push(from);
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        batch(9, &[r#"{"type":2300,"tid":"0","data":{"_id":"users/late"}}"#])
    }
}

type Delayed = (ListenerHandle, Arc<AtomicUsize>, Arc<Mutex<Vec<Tick>>>, Arc<Mutex<Vec<ChangeEvent>>>);

fn delayed(delay: Duration, config: ListenerConfig) -> Delayed {
    let calls = Arc::new(AtomicUsize::new(0));
    let requested = Arc::new(Mutex::new(Vec::new()));
    let events = Arc::new(Mutex::new(Vec::new()));
    let bus = EventBus::new();
    let sink = events.clone();
    bus.on_any(move |e| sink.lock().push(e.clone()));
    let source = DelayedSource { delay, calls: calls.clone(), requested: requested.clone() };
    let handle = ReplicationListener::new(source, bus, config).start();
    (handle, calls, requested, events)
}

#[tokio::test]
async fn fetch_in_flight_at_stop_is_discarded() {
    let (handle, calls, _, events) = delayed(Duration::from_millis(200), fast());
    while calls.load(Ordering::SeqCst) == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    handle.stop();
    let tick = tokio::time::timeout(Duration::from_secs(2), handle.join()).await.unwrap().unwrap();
    assert_eq!(tick, Tick(1));
    assert!(events.lock().is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn hung_requests_time_out_and_polling_continues() {
    let config = ListenerConfig { request_timeout: Duration::from_millis(30), ..fast() };
    let (handle, _, requested, events) = delayed(Duration::from_secs(10), config);
    for _ in 0..400 {
        if handle.metrics().snapshot().failed_polls_total >= 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let snapshot = handle.metrics().snapshot();
    handle.stop();
    let tick = tokio::time::timeout(Duration::from_secs(2), handle.join()).await.unwrap().unwrap();

    assert!(snapshot.failed_polls_total >= 3);
    assert_eq!(tick, Tick(1));
    assert!(events.lock().is_empty());
    assert!(requested.lock().iter().all(|t| *t == Tick(1)));
}

#[tokio::test]
async fn stale_batches_are_not_replayed() {
    let a = r#"{"type":2300,"tid":"0","data":{"_id":"users/a"}}"#;
    let b = r#"{"type":2300,"tid":"0","data":{"_id":"users/b"}}"#;
    let c = r#"{"type":2300,"tid":"0","data":{"_id":"users/c"}}"#;
    let run = start(Ok(1), vec![batch(5, &[a]), batch(5, &[b]), batch(3, &[c])], EventBus::new());
    run.drain(3).await;
    let snapshot = run.handle.metrics().snapshot();
    run.handle.stop();
    assert_eq!(run.handle.join().await.unwrap(), Tick(5));

    let events = run.events.lock();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].0.document["_id"], "users/a");
    assert_eq!(snapshot.batches_applied_total, 1);
}
