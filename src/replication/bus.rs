use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use log::{error, warn};
use parking_lot::RwLock;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use super::entry::ChangeEvent;
use crate::errors::DbError;

pub type ChangeHandler = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;
pub type ErrorHandler = Arc<dyn Fn(&DbError) + Send + Sync>;

#[derive(Default)]
struct Subscribers {
    by_collection: HashMap<String, Vec<ChangeHandler>>,
    any: Vec<ChangeHandler>,
    errors: Vec<ErrorHandler>,
    channels: HashMap<String, Vec<UnboundedSender<ChangeEvent>>>,
}

/// Fan-out of change events to subscribers. Cloning shares the subscriber
/// set.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<RwLock<Subscribers>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = self.inner.read();
        f.debug_struct("EventBus")
            .field("collections", &s.by_collection.len())
            .field("any", &s.any.len())
            .field("errors", &s.errors.len())
            .field("channels", &s.channels.len())
            .finish()
    }
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls `f` for every change in `collection`.
    pub fn on<F>(&self, collection: &str, f: F)
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.inner.write().by_collection.entry(collection.to_string()).or_default().push(Arc::new(f));
    }

    /// Calls `f` for every change in any collection.
    pub fn on_any<F>(&self, f: F)
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.inner.write().any.push(Arc::new(f));
    }

    /// Calls `f` when the listener fails to start.
    pub fn on_error<F>(&self, f: F)
    where
        F: Fn(&DbError) + Send + Sync + 'static,
    {
        self.inner.write().errors.push(Arc::new(f));
    }

    /// Receiver for changes in `collection`. Dropping it unsubscribes.
    #[must_use]
    pub fn subscribe_channel(&self, collection: &str) -> UnboundedReceiver<ChangeEvent> {
        let (tx, rx) = unbounded_channel();
        self.inner.write().channels.entry(collection.to_string()).or_default().push(tx);
        rx
    }

    /// Delivers `event` to every matching subscriber and returns how many
    /// handlers panicked.
    pub fn publish(&self, event: &ChangeEvent) -> u64 {
        let handlers: Vec<ChangeHandler> = {
            let s = self.inner.read();
            s.by_collection
                .get(&event.collection)
                .into_iter()
                .flatten()
                .chain(s.any.iter())
                .cloned()
                .collect()
        };
        let mut panics = 0;
        for h in handlers {
            if catch_unwind(AssertUnwindSafe(|| h(event))).is_err() {
                warn!("subscriber panicked on {} for {}", event.event_name(), event.collection);
                panics += 1;
            }
        }
        let mut s = self.inner.write();
        if let Some(senders) = s.channels.get_mut(&event.collection) {
            senders.retain(|tx| tx.send(event.clone()).is_ok());
            if senders.is_empty() {
                s.channels.remove(&event.collection);
            }
        }
        panics
    }

    /// Reports a fatal listener error to error subscribers.
    pub fn publish_error(&self, err: &DbError) {
        let handlers: Vec<ErrorHandler> = self.inner.read().errors.clone();
        if handlers.is_empty() {
            error!("unhandled replication error: {err}");
        }
        for h in handlers {
            if catch_unwind(AssertUnwindSafe(|| h(err))).is_err() {
                warn!("error subscriber panicked");
            }
        }
    }

    #[must_use]
    pub fn has_channel(&self, collection: &str) -> bool {
        self.inner.read().channels.contains_key(collection)
    }
}
