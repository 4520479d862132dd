//! Message gateway: the `send`/`publish` entry point.
//!
//! Resolves local endpoints through the catalog and hands them to the
//! execution router; paths with no local endpoint go to the first remote
//! router that claims them, and anything left is reported as not found.
//! Every inbound request is written to the request log before routing.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use courier_core::{
    ClockSource, DispatchError, EventMessage, Incoming, MessageResult, Origin, Request,
};
use futures_util::future::join_all;
use tracing::{debug, info, warn};

use crate::catalog::{EndpointCatalog, EndpointDescriptor};
use crate::config::RuntimeConfig;
use crate::events::{EventFanout, EventPublisher};
use crate::execution::{CompletionPipeline, ExecutionRouter, ParentLink};
use crate::remote::RemoteRouter;
use crate::resolver::{CoercionFailure, RequestResolver};
use crate::shutdown::{InFlightGuard, ShutdownController};
use crate::stores::{EventStore, RequestEntry, RequestLog, ResponseLog};

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// A send, described before it is routed.
#[derive(Debug, Clone, Default)]
pub struct Dispatch {
    path: Option<String>,
    message: Incoming,
    parent: Option<ParentLink>,
    origin: Origin,
    timeout: Option<Duration>,
}

impl Dispatch {
    /// Targets `path`, with an empty message until [`message`](Self::message).
    pub fn to(path: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Targets whatever endpoint the message's type resolves to.
    pub fn message_only(message: impl Into<Incoming>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn message(mut self, message: impl Into<Incoming>) -> Self {
        self.message = message.into();
        self
    }

    /// Makes this a nested dispatch. The parent's identity replaces the origin.
    #[must_use]
    pub fn with_parent(mut self, parent: ParentLink) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Caller identity for a root dispatch.
    #[must_use]
    pub fn with_origin(mut self, origin: Origin) -> Self {
        self.origin = origin;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    #[must_use]
    pub fn parent(&self) -> Option<&ParentLink> {
        self.parent.as_ref()
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Sends and publishes messages. Implemented by [`MessageGateway`]; handlers
/// reach it through their execution context.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Routes one message. Failures are reported in the result, never raised.
    async fn send(&self, dispatch: Dispatch) -> MessageResult;

    /// Delivers `event` to every local subscriber, then to every external
    /// publisher. Returns one result per subscriber.
    async fn publish(&self, event: EventMessage, parent: Option<ParentLink>) -> Vec<MessageResult>;
}

// ---------------------------------------------------------------------------
// MessageGateway
// ---------------------------------------------------------------------------

/// Collaborators a [`MessageGateway`] is assembled from.
pub struct GatewayParts {
    pub config: RuntimeConfig,
    pub catalog: Arc<EndpointCatalog>,
    pub clock: Arc<dyn ClockSource>,
    pub request_log: Arc<RequestLog>,
    pub response_log: Arc<ResponseLog>,
    pub event_store: Arc<EventStore>,
    pub remotes: Vec<Arc<dyn RemoteRouter>>,
    pub publishers: Vec<Arc<dyn EventPublisher>>,
    pub shutdown: Arc<ShutdownController>,
}

pub struct MessageGateway {
    catalog: Arc<EndpointCatalog>,
    resolver: RequestResolver,
    router: ExecutionRouter,
    fanout: Arc<EventFanout>,
    remotes: Vec<Arc<dyn RemoteRouter>>,
    publishers: Vec<Arc<dyn EventPublisher>>,
    request_log: Arc<RequestLog>,
    shutdown: Arc<ShutdownController>,
    clock: Arc<dyn ClockSource>,
    max_dispatch_depth: usize,
}

impl MessageGateway {
    /// Assembles the gateway. Starts the event publish worker, so this must
    /// be called within a tokio runtime.
    #[must_use]
    pub fn new(parts: GatewayParts) -> Arc<Self> {
        let GatewayParts {
            config,
            catalog,
            clock,
            request_log,
            response_log,
            event_store,
            remotes,
            publishers,
            shutdown,
        } = parts;

        Arc::new_cyclic(|gateway: &Weak<Self>| {
            let dispatcher: Weak<dyn Dispatcher> = gateway.clone();
            let fanout = Arc::new(EventFanout::new(
                event_store,
                Some(dispatcher.clone()),
                config.event_queue_capacity,
            ));
            let completion = CompletionPipeline::new(
                Arc::clone(&fanout),
                response_log,
                config.system_path_prefix.clone(),
            );
            let router = ExecutionRouter::new(&config, completion, Arc::clone(&clock), Some(dispatcher));
            Self {
                resolver: RequestResolver::new(Arc::clone(&clock), config.source_address.clone()),
                catalog,
                router,
                fanout,
                remotes,
                publishers,
                request_log,
                shutdown,
                clock,
                max_dispatch_depth: config.max_dispatch_depth,
            }
        })
    }

    #[must_use]
    pub fn catalog(&self) -> &Arc<EndpointCatalog> {
        &self.catalog
    }

    /// Waits for queued event publications to finish. Events raised
    /// afterwards are published inline.
    pub async fn drain_events(&self) {
        self.fanout.stop().await;
    }

    /// Admission for root dispatches; nested ones ride on their root's guard.
    fn admit(&self, parent: Option<&ParentLink>) -> Result<Option<InFlightGuard>, DispatchError> {
        match parent {
            None if !self.shutdown.is_accepting() => Err(DispatchError::ShuttingDown),
            None => Ok(Some(self.shutdown.in_flight_guard())),
            Some(link) if link.child_depth() > self.max_dispatch_depth => {
                Err(DispatchError::DepthExceeded {
                    max: self.max_dispatch_depth,
                })
            }
            Some(_) => Ok(None),
        }
    }

    fn failure(&self, request: &Request, error: DispatchError) -> MessageResult {
        MessageResult::failure(
            request.correlation_id(),
            request.message().id(),
            self.clock.now(),
            error,
        )
    }

    async fn log_request(&self, request: &Request) {
        info!(
            correlation_id = %request.correlation_id(),
            path = request.path(),
            channel = request.channel(),
            message = request.message().name(),
            depth = request.depth(),
            "request received"
        );
        if let Err(err) = self.request_log.append(RequestEntry::from_request(request)).await {
            warn!(correlation_id = %request.correlation_id(), error = %err, "request log append failed");
        }
    }

    async fn route_local(
        &self,
        resolved: Result<Request, CoercionFailure>,
        endpoint: Arc<EndpointDescriptor>,
        parent: Option<ParentLink>,
        timeout: Option<Duration>,
    ) -> MessageResult {
        match resolved {
            Ok(request) => {
                self.log_request(&request).await;
                self.router.route(request, endpoint, parent, timeout).await
            }
            Err(CoercionFailure { request, error }) => {
                self.log_request(&request).await;
                self.router.route_failed(request, endpoint, parent, error).await
            }
        }
    }

    async fn route_remote(&self, request: Request, timeout: Option<Duration>) -> MessageResult {
        if let Some(remote) = self.remotes.iter().find(|r| r.can_route(&request)) {
            debug!(
                correlation_id = %request.correlation_id(),
                router = remote.name(),
                path = request.path(),
                "routing remotely"
            );
            return match remote.route(&request, timeout).await {
                Ok(result) => result,
                Err(err) => {
                    warn!(
                        correlation_id = %request.correlation_id(),
                        router = remote.name(),
                        error = %err,
                        "remote routing failed"
                    );
                    self.failure(
                        &request,
                        DispatchError::RemoteFailure {
                            router: remote.name().to_string(),
                            message: format!("{err:#}"),
                        },
                    )
                }
            };
        }

        let target = request
            .path()
            .map_or_else(|| request.message().name().to_string(), str::to_string);
        warn!(correlation_id = %request.correlation_id(), %target, "no endpoint found");
        self.failure(&request, DispatchError::EndpointNotFound { target })
    }

    async fn publish_external(&self, event: &EventMessage) {
        if self.publishers.is_empty() {
            return;
        }
        let events = std::slice::from_ref(event);
        let outcomes = join_all(
            self.publishers
                .iter()
                .map(|publisher| async move { (publisher.name(), publisher.publish(events).await) }),
        )
        .await;
        for (publisher, outcome) in outcomes {
            if let Err(err) = outcome {
                warn!(publisher, event = event.name(), error = %err, "external publish failed");
            }
        }
    }
}

#[async_trait]
impl Dispatcher for MessageGateway {
    async fn send(&self, dispatch: Dispatch) -> MessageResult {
        let Dispatch {
            path,
            message,
            parent,
            origin,
            timeout,
        } = dispatch;
        let path = path.as_deref().map(str::trim).filter(|p| !p.is_empty());
        let parent_request = parent.as_ref().map(|p| Arc::clone(&p.request));

        let _guard = match self.admit(parent.as_ref()) {
            Ok(guard) => guard,
            Err(error) => {
                let request = self
                    .resolver
                    .resolve_path(path, message, parent_request.as_ref(), &origin);
                warn!(correlation_id = %request.correlation_id(), path, error = %error, "dispatch refused");
                return self.failure(&request, error);
            }
        };

        if let Some(endpoint) = self.catalog.find(path, message.body()) {
            let resolved = self
                .resolver
                .resolve(message, &endpoint, parent_request.as_ref(), &origin);
            return self.route_local(resolved, endpoint, parent, timeout).await;
        }

        let request = self
            .resolver
            .resolve_path(path, message, parent_request.as_ref(), &origin);
        self.log_request(&request).await;
        self.route_remote(request, timeout).await
    }

    async fn publish(&self, event: EventMessage, parent: Option<ParentLink>) -> Vec<MessageResult> {
        let parent_request = parent.as_ref().map(|p| Arc::clone(&p.request));
        let _guard = match self.admit(parent.as_ref()) {
            Ok(guard) => guard,
            Err(error) => {
                warn!(event = event.name(), error = %error, "publish refused");
                return match parent_request {
                    Some(request) => vec![self.failure(&request, error)],
                    None => Vec::new(),
                };
            }
        };

        let subscribers = self.catalog.subscribers(&event);
        debug!(event = event.name(), channel = event.channel(), subscribers = subscribers.len(), "publishing");

        let mut results = Vec::with_capacity(subscribers.len());
        for endpoint in subscribers {
            let resolved = self
                .resolver
                .resolve_event(&event, &endpoint, parent_request.as_ref());
            results.push(self.route_local(resolved, endpoint, parent.clone(), None).await);
        }

        self.publish_external(&event).await;
        results
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
