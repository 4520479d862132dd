//! Explicit endpoint registration.
//!
//! Handlers are registered with the [`Endpoint`] builder, which captures
//! the request/response types, routes, security flags, rules, and channel
//! subscriptions into a type-erased [`Registration`] consumed by
//! [`EndpointCatalog::load`](super::EndpointCatalog::load).

use std::any::TypeId;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use courier_core::{
    short_type_name, DispatchError, Message, MessageType, TypedBody, ValidationError, ValidationKind,
};
use serde::{Deserialize, Serialize};

use crate::execution::ExecutionContext;

// ---------------------------------------------------------------------------
// MessageHandler trait
// ---------------------------------------------------------------------------

/// A handler for one request type.
///
/// The registered instance is cloned for every dispatch, so per-call state
/// never leaks between requests; share long-lived collaborators through
/// `Arc` fields.
#[async_trait]
pub trait MessageHandler: Clone + Send + Sync + 'static {
    type Request: Message;
    /// Use `()` for handlers that never reply.
    type Response: Message;

    /// Handles one request.
    ///
    /// # Errors
    ///
    /// Any error is captured into the execution context. Returning a
    /// [`DispatchError`] (for example `DispatchError::Validation`) keeps its
    /// meaning after normalization; other errors are reported as unhandled.
    async fn receive(
        &self,
        ctx: &ExecutionContext,
        request: Self::Request,
    ) -> anyhow::Result<Option<Self::Response>>;
}

/// Object-safe form of [`MessageHandler`] stored in descriptors.
#[async_trait]
pub trait ErasedHandler: Send + Sync {
    /// Invokes a fresh clone of the handler.
    ///
    /// # Errors
    ///
    /// Handler failures are wrapped in [`DispatchError::Invocation`].
    async fn invoke(
        &self,
        ctx: Arc<ExecutionContext>,
        body: TypedBody,
    ) -> Result<Option<TypedBody>, DispatchError>;
}

struct HandlerAdapter<H>(H);

#[async_trait]
impl<H: MessageHandler> ErasedHandler for HandlerAdapter<H> {
    async fn invoke(
        &self,
        ctx: Arc<ExecutionContext>,
        body: TypedBody,
    ) -> Result<Option<TypedBody>, DispatchError> {
        let request = body
            .to_message::<H::Request>()
            .map_err(|source| DispatchError::Deserialization {
                type_name: H::Request::message_name(),
                source,
            })?;
        let handler = self.0.clone();
        match handler.receive(&ctx, request).await {
            Ok(response) => Ok(response.map(TypedBody::new)),
            Err(err) => {
                let cause = match err.downcast::<DispatchError>() {
                    Ok(known) => known,
                    Err(other) => DispatchError::Handler(other),
                };
                Err(DispatchError::Invocation(Box::new(cause)))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// Validation stage a rule belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleTier {
    Input,
    Security,
    Business,
}

impl RuleTier {
    #[must_use]
    pub fn kind(self) -> ValidationKind {
        match self {
            Self::Input => ValidationKind::Input,
            Self::Security => ValidationKind::Security,
            Self::Business => ValidationKind::Business,
        }
    }
}

/// A validation rule over messages of type `M`.
///
/// Rules receive the live execution context and a copy of the message
/// coerced to `M`. An empty vector means the rule passed.
#[async_trait]
pub trait Rule<M: Message>: Send + Sync + 'static {
    async fn check(&self, ctx: &ExecutionContext, message: &M) -> Vec<ValidationError>;
}

/// Object-safe form of [`Rule`].
#[async_trait]
pub trait ErasedRule: Send + Sync {
    async fn check(&self, ctx: &ExecutionContext, body: &TypedBody) -> Vec<ValidationError>;
}

struct RuleAdapter<M, R> {
    rule: R,
    _message: PhantomData<fn() -> M>,
}

#[async_trait]
impl<M: Message, R: Rule<M>> ErasedRule for RuleAdapter<M, R> {
    async fn check(&self, ctx: &ExecutionContext, body: &TypedBody) -> Vec<ValidationError> {
        match body.to_message::<M>() {
            Ok(message) => self.rule.check(ctx, &message).await,
            Err(err) => vec![ValidationError::new(format!(
                "message could not be read as {}: {err}",
                M::message_name()
            ))],
        }
    }
}

/// Name and tier of a registered rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RuleDescriptor {
    pub name: &'static str,
    pub tier: RuleTier,
}

/// A rule bound to an endpoint.
#[derive(Clone)]
pub struct BoundRule {
    descriptor: RuleDescriptor,
    rule: Arc<dyn ErasedRule>,
}

impl BoundRule {
    fn new<M: Message, R: Rule<M>>(tier: RuleTier, rule: R) -> Self {
        Self {
            descriptor: RuleDescriptor {
                name: short_type_name::<R>(),
                tier,
            },
            rule: Arc::new(RuleAdapter {
                rule,
                _message: PhantomData,
            }),
        }
    }

    #[must_use]
    pub fn descriptor(&self) -> RuleDescriptor {
        self.descriptor
    }

    #[must_use]
    pub fn tier(&self) -> RuleTier {
        self.descriptor.tier
    }

    pub async fn check(&self, ctx: &ExecutionContext, body: &TypedBody) -> Vec<ValidationError> {
        self.rule.check(ctx, body).await
    }
}

impl fmt::Debug for BoundRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.descriptor.fmt(f)
    }
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    #[default]
    Post,
    Put,
    Patch,
    Delete,
}

/// A path an endpoint answers on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub path: String,
    pub method: HttpMethod,
    pub version: u32,
}

impl Route {
    /// `POST {path}`, version 1.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            method: HttpMethod::default(),
            version: 1,
        }
    }

    #[must_use]
    pub fn method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
    }

    #[must_use]
    pub fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }
}

// ---------------------------------------------------------------------------
// Endpoint builder
// ---------------------------------------------------------------------------

/// Builder for one handler's registration.
///
/// ```ignore
/// let registration = Endpoint::handler(CreateOrderHandler::default())
///     .route(Route::new("orders/create").version(2))
///     .secure()
///     .input_rule(SkuIsKnown)
///     .build();
/// ```
pub struct Endpoint<H: MessageHandler> {
    handler: H,
    routes: Vec<Route>,
    secure: bool,
    public: bool,
    tags: Vec<String>,
    timeout: Option<Duration>,
    rules: Vec<BoundRule>,
    subscriptions: Vec<String>,
}

impl<H: MessageHandler> Endpoint<H> {
    pub fn handler(handler: H) -> Self {
        Self {
            handler,
            routes: Vec::new(),
            secure: false,
            public: false,
            tags: Vec::new(),
            timeout: None,
            rules: Vec::new(),
            subscriptions: Vec::new(),
        }
    }

    /// Adds a route. Without routes the handler is reachable by message
    /// type and subscriptions only.
    #[must_use]
    pub fn route(mut self, route: Route) -> Self {
        self.routes.push(route);
        self
    }

    /// Shorthand for `route(Route::new(path))`.
    #[must_use]
    pub fn at(self, path: impl Into<String>) -> Self {
        self.route(Route::new(path))
    }

    /// Requires an authenticated principal.
    #[must_use]
    pub fn secure(mut self) -> Self {
        self.secure = true;
        self
    }

    /// Marks the endpoint as exposed to outside transports.
    #[must_use]
    pub fn public(mut self) -> Self {
        self.public = true;
        self
    }

    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn input_rule<R: Rule<H::Request>>(self, rule: R) -> Self {
        self.rule::<H::Request, R>(RuleTier::Input, rule)
    }

    #[must_use]
    pub fn security_rule<R: Rule<H::Request>>(self, rule: R) -> Self {
        self.rule::<H::Request, R>(RuleTier::Security, rule)
    }

    #[must_use]
    pub fn business_rule<R: Rule<H::Request>>(self, rule: R) -> Self {
        self.rule::<H::Request, R>(RuleTier::Business, rule)
    }

    /// Adds a rule over any message type the request can be coerced into.
    #[must_use]
    pub fn rule<M: Message, R: Rule<M>>(mut self, tier: RuleTier, rule: R) -> Self {
        self.rules.push(BoundRule::new::<M, R>(tier, rule));
        self
    }

    /// Subscribes the handler to events published on `channel` (or named
    /// `channel`).
    #[must_use]
    pub fn subscribe(mut self, channel: impl Into<String>) -> Self {
        self.subscriptions.push(channel.into());
        self
    }

    #[must_use]
    pub fn build(self) -> Registration {
        let response_type = MessageType::of::<H::Response>();
        Registration {
            handler_name: short_type_name::<H>(),
            handler: Arc::new(HandlerAdapter(self.handler)),
            request_type: MessageType::of::<H::Request>(),
            response_type: (response_type.type_id() != TypeId::of::<()>()).then_some(response_type),
            routes: self.routes,
            secure: self.secure,
            public: self.public,
            tags: self.tags,
            timeout: self.timeout,
            rules: self.rules,
            subscriptions: self.subscriptions,
        }
    }
}

impl<H: MessageHandler> From<Endpoint<H>> for Registration {
    fn from(endpoint: Endpoint<H>) -> Self {
        endpoint.build()
    }
}

/// Type-erased output of [`Endpoint::build`].
pub struct Registration {
    pub(crate) handler_name: &'static str,
    pub(crate) handler: Arc<dyn ErasedHandler>,
    pub(crate) request_type: MessageType,
    pub(crate) response_type: Option<MessageType>,
    pub(crate) routes: Vec<Route>,
    pub(crate) secure: bool,
    pub(crate) public: bool,
    pub(crate) tags: Vec<String>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) rules: Vec<BoundRule>,
    pub(crate) subscriptions: Vec<String>,
}

impl Registration {
    #[must_use]
    pub fn handler_name(&self) -> &'static str {
        self.handler_name
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("handler", &self.handler_name)
            .field("request_type", &self.request_type)
            .field("routes", &self.routes)
            .field("subscriptions", &self.subscriptions)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use courier_core::MessageKind;
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Reserve {
        seat: String,
    }

    impl Message for Reserve {}

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Reserved {
        seat: String,
    }

    impl Message for Reserved {
        fn kind() -> MessageKind {
            MessageKind::Event
        }
    }

    #[derive(Clone)]
    struct ReserveHandler;

    #[async_trait]
    impl MessageHandler for ReserveHandler {
        type Request = Reserve;
        type Response = Reserved;

        async fn receive(&self, _ctx: &ExecutionContext, request: Reserve) -> anyhow::Result<Option<Reserved>> {
            Ok(Some(Reserved { seat: request.seat }))
        }
    }

    #[derive(Clone)]
    struct ReleaseHandler;

    #[async_trait]
    impl MessageHandler for ReleaseHandler {
        type Request = Reserve;
        type Response = ();

        async fn receive(&self, _ctx: &ExecutionContext, _request: Reserve) -> anyhow::Result<Option<()>> {
            Ok(None)
        }
    }

    struct SeatExists;

    #[async_trait]
    impl Rule<Reserve> for SeatExists {
        async fn check(&self, _ctx: &ExecutionContext, _message: &Reserve) -> Vec<ValidationError> {
            Vec::new()
        }
    }

    struct NotBlocked;

    #[async_trait]
    impl Rule<Reserve> for NotBlocked {
        async fn check(&self, _ctx: &ExecutionContext, _message: &Reserve) -> Vec<ValidationError> {
            Vec::new()
        }
    }

    #[test]
    fn unit_response_has_no_response_type() {
        let registration = Endpoint::handler(ReleaseHandler).build();
        assert!(registration.response_type.is_none());
        assert_eq!(registration.handler_name(), "ReleaseHandler");
    }

    #[test]
    fn response_and_request_types_are_recorded() {
        let registration = Endpoint::handler(ReserveHandler).build();
        assert_eq!(registration.request_type.name(), "Reserve");
        assert_eq!(registration.response_type.map(|t| t.name()), Some("Reserved"));
    }

    #[test]
    fn rules_keep_tier_and_registration_order() {
        let registration = Endpoint::handler(ReserveHandler)
            .business_rule(NotBlocked)
            .input_rule(SeatExists)
            .security_rule(NotBlocked)
            .business_rule(SeatExists)
            .build();

        let rules: Vec<_> = registration.rules.iter().map(BoundRule::descriptor).collect();
        assert_eq!(
            rules,
            vec![
                RuleDescriptor { name: "NotBlocked", tier: RuleTier::Business },
                RuleDescriptor { name: "SeatExists", tier: RuleTier::Input },
                RuleDescriptor { name: "NotBlocked", tier: RuleTier::Security },
                RuleDescriptor { name: "SeatExists", tier: RuleTier::Business },
            ]
        );
        assert_eq!(RuleTier::Security.kind(), ValidationKind::Security);
    }

    #[test]
    fn routes_default_to_post_version_one() {
        let registration = Endpoint::handler(ReserveHandler)
            .at("seats/reserve")
            .route(Route::new("seats/reserve").method(HttpMethod::Put).version(2))
            .secure()
            .tag("seats")
            .subscribe("seats")
            .build();

        assert_eq!(registration.routes[0], Route::new("seats/reserve"));
        assert_eq!(registration.routes[0].method, HttpMethod::Post);
        assert_eq!(registration.routes[0].version, 1);
        assert_eq!(registration.routes[1].method, HttpMethod::Put);
        assert!(registration.secure);
        assert!(!registration.public);
        assert_eq!(registration.tags, vec!["seats".to_string()]);
        assert_eq!(registration.subscriptions, vec!["seats".to_string()]);
    }
}
