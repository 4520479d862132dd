//! Runtime assembly and lifecycle.

use std::sync::Arc;

use courier_core::{
    ClockSource, EventMessage, Incoming, Message, MessageBody, MessageResult, SystemClock,
};
use tracing::{info, warn};

use crate::catalog::{CatalogError, EndpointCatalog, Registration};
use crate::config::RuntimeConfig;
use crate::events::EventPublisher;
use crate::gateway::{Dispatch, Dispatcher, GatewayParts, MessageGateway};
use crate::remote::RemoteRouter;
use crate::shutdown::{HealthState, ShutdownController};
use crate::stores::{
    EventEntry, EventStore, MemoryLog, RequestEntry, RequestLog, ResponseEntry, ResponseLog,
};

// ---------------------------------------------------------------------------
// RuntimeBuilder
// ---------------------------------------------------------------------------

/// Collects registrations and collaborators for a [`Runtime`].
///
/// Stores default to in-memory logs and the clock to the system clock.
#[derive(Default)]
pub struct RuntimeBuilder {
    config: RuntimeConfig,
    registrations: Vec<Registration>,
    clock: Option<Arc<dyn ClockSource>>,
    request_log: Option<Arc<RequestLog>>,
    response_log: Option<Arc<ResponseLog>>,
    event_store: Option<Arc<EventStore>>,
    remotes: Vec<Arc<dyn RemoteRouter>>,
    publishers: Vec<Arc<dyn EventPublisher>>,
}

impl RuntimeBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn register(mut self, registration: impl Into<Registration>) -> Self {
        self.registrations.push(registration.into());
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn ClockSource>) -> Self {
        self.clock = Some(clock);
        self
    }

    #[must_use]
    pub fn request_log(mut self, log: Arc<RequestLog>) -> Self {
        self.request_log = Some(log);
        self
    }

    #[must_use]
    pub fn response_log(mut self, log: Arc<ResponseLog>) -> Self {
        self.response_log = Some(log);
        self
    }

    #[must_use]
    pub fn event_store(mut self, store: Arc<EventStore>) -> Self {
        self.event_store = Some(store);
        self
    }

    #[must_use]
    pub fn remote(mut self, router: impl RemoteRouter + 'static) -> Self {
        self.remotes.push(Arc::new(router));
        self
    }

    #[must_use]
    pub fn publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publishers.push(publisher);
        self
    }

    /// Loads the catalog and starts the runtime. Must be called within a
    /// tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] when the registrations do not form a valid
    /// catalog.
    pub fn build(self) -> Result<Runtime, CatalogError> {
        let catalog = Arc::new(EndpointCatalog::load(self.registrations)?);
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let shutdown = Arc::new(ShutdownController::new());

        let gateway = MessageGateway::new(GatewayParts {
            config: self.config.clone(),
            catalog,
            clock: Arc::clone(&clock),
            request_log: self
                .request_log
                .unwrap_or_else(|| Arc::new(MemoryLog::<RequestEntry>::new())),
            response_log: self
                .response_log
                .unwrap_or_else(|| Arc::new(MemoryLog::<ResponseEntry>::new())),
            event_store: self
                .event_store
                .unwrap_or_else(|| Arc::new(MemoryLog::<EventEntry>::new())),
            remotes: self.remotes,
            publishers: self.publishers,
            shutdown: Arc::clone(&shutdown),
        });

        shutdown.set_ready();
        info!(
            node_id = %self.config.node_id,
            endpoints = gateway.catalog().len(),
            subscriptions = gateway.catalog().subscriptions().len(),
            "runtime ready"
        );

        Ok(Runtime {
            gateway,
            shutdown,
            clock,
            config: self.config,
        })
    }
}

// ---------------------------------------------------------------------------
// Runtime
// ---------------------------------------------------------------------------

/// An assembled message runtime.
pub struct Runtime {
    gateway: Arc<MessageGateway>,
    shutdown: Arc<ShutdownController>,
    clock: Arc<dyn ClockSource>,
    config: RuntimeConfig,
}

impl Runtime {
    #[must_use]
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    #[must_use]
    pub fn catalog(&self) -> &Arc<EndpointCatalog> {
        self.gateway.catalog()
    }

    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    #[must_use]
    pub fn dispatcher(&self) -> Arc<dyn Dispatcher> {
        Arc::clone(&self.gateway) as Arc<dyn Dispatcher>
    }

    #[must_use]
    pub fn health_state(&self) -> HealthState {
        self.shutdown.health_state()
    }

    /// Sends `message` to `path` as a root dispatch.
    pub async fn send(&self, path: &str, message: impl Into<Incoming>) -> MessageResult {
        self.gateway.send(Dispatch::to(path).message(message)).await
    }

    /// Sends a typed message to the endpoint its type resolves to.
    pub async fn send_message<T: Message>(&self, message: T) -> MessageResult {
        self.gateway
            .send(Dispatch::message_only(Incoming::typed(message)))
            .await
    }

    pub async fn dispatch(&self, dispatch: Dispatch) -> MessageResult {
        self.gateway.send(dispatch).await
    }

    pub async fn publish(&self, event: EventMessage) -> Vec<MessageResult> {
        self.gateway.publish(event, None).await
    }

    pub async fn publish_event<E: Message>(&self, event: E) -> Vec<MessageResult> {
        self.publish(EventMessage::new(event, self.clock.now())).await
    }

    /// Publishes `body` on `channel`.
    pub async fn publish_on(&self, channel: &str, body: impl Into<MessageBody>) -> Vec<MessageResult> {
        self.publish(EventMessage::on_channel(channel, body.into(), self.clock.now()))
            .await
    }

    /// Stops accepting root dispatches, waits up to the configured drain
    /// timeout for in-flight ones, then drains the event publish queue.
    ///
    /// Returns `false` when in-flight dispatches outlived the drain timeout.
    pub async fn shutdown(&self) -> bool {
        self.shutdown.trigger_shutdown();
        let drained = self.shutdown.wait_for_drain(self.config.drain_timeout).await;
        if !drained {
            warn!(
                in_flight = self.shutdown.in_flight_count(),
                "drain timeout expired with dispatches in flight"
            );
        }
        self.gateway.drain_events().await;
        info!(drained, "runtime stopped");
        drained
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
