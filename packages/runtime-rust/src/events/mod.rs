//! Event fan-out.
//!
//! Events of a successful dispatch are appended to the event store first
//! and only then queued for republication, so every published event can
//! be replayed from the store. Republication goes through the gateway's
//! [`Dispatcher::publish`], which reaches local subscribers and every
//! registered [`EventPublisher`].

pub mod worker;

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use courier_core::EventMessage;
use tracing::{debug, error, warn};

use crate::execution::ParentLink;
use crate::gateway::Dispatcher;
use crate::stores::{EventEntry, EventStore};

pub use worker::{BackgroundRunnable, BackgroundWorker};

/// External event sink, called once per published event after local
/// subscribers ran.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    fn name(&self) -> &str;

    /// # Errors
    ///
    /// Failures are logged by the caller and not retried.
    async fn publish(&self, events: &[EventMessage]) -> anyhow::Result<()>;
}

/// Events queued for republication under the dispatch that produced them.
#[derive(Debug)]
pub struct PublishTask {
    pub events: Vec<EventMessage>,
    pub parent: ParentLink,
}

struct Republisher {
    dispatcher: Option<Weak<dyn Dispatcher>>,
}

impl Republisher {
    async fn publish(&self, task: PublishTask) {
        let Some(dispatcher) = self.dispatcher.as_ref().and_then(Weak::upgrade) else {
            debug!(count = task.events.len(), "no dispatcher bound; events stored only");
            return;
        };
        for event in task.events {
            let name = event.name().to_string();
            let results = dispatcher.publish(event, Some(task.parent.clone())).await;
            let failed = results.iter().filter(|r| !r.is_successful()).count();
            if failed > 0 {
                warn!(
                    correlation_id = %task.parent.request.correlation_id(),
                    event = %name,
                    failed,
                    "event subscribers failed"
                );
            }
        }
    }
}

struct PublishRunnable {
    republisher: Arc<Republisher>,
}

#[async_trait]
impl BackgroundRunnable for PublishRunnable {
    type Task = PublishTask;

    async fn run(&mut self, task: PublishTask) {
        self.republisher.publish(task).await;
    }

    async fn shutdown(&mut self) {
        debug!("event publish queue drained");
    }
}

/// Persists events and republishes them in the background.
pub struct EventFanout {
    store: Arc<EventStore>,
    republisher: Arc<Republisher>,
    worker: BackgroundWorker<PublishTask>,
}

impl EventFanout {
    /// Starts the publish worker; must be called within a tokio runtime.
    pub fn new(
        store: Arc<EventStore>,
        dispatcher: Option<Weak<dyn Dispatcher>>,
        queue_capacity: usize,
    ) -> Self {
        let republisher = Arc::new(Republisher { dispatcher });
        let worker = BackgroundWorker::start(
            PublishRunnable {
                republisher: Arc::clone(&republisher),
            },
            queue_capacity,
        );
        Self {
            store,
            republisher,
            worker,
        }
    }

    /// Appends each event to the store, then queues the stored ones for
    /// publication. An event whose append fails is not published.
    pub async fn dispatch(&self, parent: ParentLink, events: Vec<EventMessage>) {
        let mut stored = Vec::with_capacity(events.len());
        for event in events {
            match self.store.append(EventEntry::new(&event, &parent.request)).await {
                Ok(()) => stored.push(event),
                Err(err) => error!(
                    correlation_id = %parent.request.correlation_id(),
                    event = event.name(),
                    error = %err,
                    "event store append failed; event dropped"
                ),
            }
        }
        if stored.is_empty() {
            return;
        }

        let task = PublishTask {
            events: stored,
            parent,
        };
        if let Err(task) = self.worker.try_submit(task) {
            debug!(count = task.events.len(), "publish queue unavailable; publishing inline");
            self.republisher.publish(task).await;
        }
    }

    /// Waits for every queued publication; later events publish inline.
    pub async fn stop(&self) {
        self.worker.stop().await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
