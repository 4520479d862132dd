//! Request context builder.
//!
//! Turns an incoming payload plus a target into an immutable [`Request`].
//! Identity (correlation id, session, source address, principal) is
//! inherited from the parent request when there is one, otherwise taken
//! from the caller's [`Origin`] or generated.

use std::sync::Arc;

use courier_core::{
    ClockSource, DispatchError, EventMessage, Incoming, MessageBody, MessageEnvelope, Origin,
    Principal, Request, RequestParts,
};
use uuid::Uuid;

use crate::catalog::EndpointDescriptor;

/// Coercion into the endpoint's request type failed. The request is still
/// built, with the body as received, so the failure can be routed and
/// reported like any other dispatch.
#[derive(Debug)]
pub struct CoercionFailure {
    pub request: Request,
    pub error: DispatchError,
}

struct Identity {
    correlation_id: Uuid,
    source_address: String,
    session_id: String,
    principal: Principal,
}

/// Builds [`Request`]s.
#[derive(Clone)]
pub struct RequestResolver {
    clock: Arc<dyn ClockSource>,
    default_source_address: String,
}

impl RequestResolver {
    pub fn new(clock: Arc<dyn ClockSource>, default_source_address: impl Into<String>) -> Self {
        Self {
            clock,
            default_source_address: default_source_address.into(),
        }
    }

    /// Resolves a request for `endpoint`.
    ///
    /// A prepared envelope is used unchanged; a bare body is coerced into
    /// the endpoint's request type and wrapped in a fresh envelope.
    ///
    /// # Errors
    ///
    /// Returns [`CoercionFailure`] when the body does not fit the request type.
    pub fn resolve(
        &self,
        incoming: Incoming,
        endpoint: &EndpointDescriptor,
        parent: Option<&Arc<Request>>,
        origin: &Origin,
    ) -> Result<Request, CoercionFailure> {
        let path = endpoint.path().map(str::to_string);
        match incoming {
            Incoming::Envelope(envelope) => Ok(self.build(parent, origin, path, envelope, None)),
            Incoming::Body(body) => match body.coerce_to(endpoint.request_type()) {
                Ok(typed) => {
                    let envelope = MessageEnvelope::new(MessageBody::Typed(typed), self.clock.now());
                    Ok(self.build(parent, origin, path, envelope, None))
                }
                Err(error) => {
                    let envelope = MessageEnvelope::new(body, self.clock.now());
                    Err(CoercionFailure {
                        request: self.build(parent, origin, path, envelope, None),
                        error,
                    })
                }
            },
        }
    }

    /// Resolves a request that has no local endpoint (remote routing or a
    /// not-found report). The body is kept as received.
    #[must_use]
    pub fn resolve_path(
        &self,
        path: Option<&str>,
        incoming: Incoming,
        parent: Option<&Arc<Request>>,
        origin: &Origin,
    ) -> Request {
        let envelope = match incoming {
            Incoming::Envelope(envelope) => envelope,
            Incoming::Body(body) => MessageEnvelope::new(body, self.clock.now()),
        };
        self.build(parent, origin, path.map(str::to_string), envelope, None)
    }

    /// Resolves the request delivering `event` to a subscriber.
    ///
    /// # Errors
    ///
    /// Returns [`CoercionFailure`] when the event body does not fit the
    /// subscriber's request type.
    pub fn resolve_event(
        &self,
        event: &EventMessage,
        endpoint: &EndpointDescriptor,
        parent: Option<&Arc<Request>>,
    ) -> Result<Request, CoercionFailure> {
        let origin = Origin::default();
        let channel = event.channel().map(str::to_string);
        let path = endpoint.path().map(str::to_string);
        let body = event.envelope().body();
        match body.coerce_to(endpoint.request_type()) {
            Ok(typed) => {
                let envelope = MessageEnvelope::new(MessageBody::Typed(typed), self.clock.now());
                Ok(self.build(parent, &origin, path, envelope, channel))
            }
            Err(error) => Err(CoercionFailure {
                request: self.build(parent, &origin, path, event.envelope().clone(), channel),
                error,
            }),
        }
    }

    fn identity(&self, parent: Option<&Arc<Request>>, origin: &Origin) -> Identity {
        match parent {
            Some(parent) => Identity {
                correlation_id: parent.correlation_id(),
                source_address: parent.source_address().to_string(),
                session_id: parent.session_id().to_string(),
                principal: parent.principal().clone(),
            },
            None => Identity {
                correlation_id: origin.correlation_id.unwrap_or_else(Uuid::new_v4),
                source_address: origin
                    .source_address
                    .clone()
                    .unwrap_or_else(|| self.default_source_address.clone()),
                session_id: origin
                    .session_id
                    .clone()
                    .unwrap_or_else(|| Uuid::new_v4().to_string()),
                principal: origin.principal.clone().unwrap_or_else(Principal::anonymous),
            },
        }
    }

    fn build(
        &self,
        parent: Option<&Arc<Request>>,
        origin: &Origin,
        path: Option<String>,
        message: MessageEnvelope,
        channel: Option<String>,
    ) -> Request {
        let identity = self.identity(parent, origin);
        Request::from_parts(RequestParts {
            correlation_id: identity.correlation_id,
            source_address: identity.source_address,
            session_id: identity.session_id,
            principal: identity.principal,
            parent: parent.cloned(),
            path,
            message,
            channel,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
