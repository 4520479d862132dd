//! Endpoint catalog: lookup of endpoint descriptors by path, message type,
//! and subscription channel.
//!
//! Built once at startup from explicit [`Registration`]s and read-only
//! afterwards. For every logical path the highest version owns the plain
//! path; older versions are reachable as `v{N}/{path}`.

pub mod registration;

use std::any::TypeId;
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use courier_core::{EventMessage, MessageBody, MessageType};
use regex::Regex;
use tracing::debug;

pub use registration::{
    BoundRule, Endpoint, ErasedHandler, ErasedRule, HttpMethod, MessageHandler, Registration,
    Route, Rule, RuleDescriptor, RuleTier,
};

// ---------------------------------------------------------------------------
// CatalogError
// ---------------------------------------------------------------------------

/// Invalid registrations. Fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("handler {handler} registers an empty path")]
    EmptyPath { handler: &'static str },

    #[error("path {path} registers version {version} more than once")]
    DuplicateVersion { path: String, version: u32 },

    #[error("path {path} is claimed by more than one endpoint")]
    PathCollision { path: String },
}

// ---------------------------------------------------------------------------
// EndpointDescriptor
// ---------------------------------------------------------------------------

/// One invokable unit: a handler reachable on a path (or by message type
/// only, when `path` is `None`).
#[derive(Clone)]
pub struct EndpointDescriptor {
    handler_name: &'static str,
    handler: Arc<dyn ErasedHandler>,
    request_type: MessageType,
    response_type: Option<MessageType>,
    path: Option<String>,
    logical_path: Option<String>,
    http_method: HttpMethod,
    version: u32,
    is_versioned: bool,
    secure: bool,
    public: bool,
    tags: Vec<String>,
    timeout: Option<Duration>,
    rules: Vec<BoundRule>,
}

impl EndpointDescriptor {
    fn from_registration(registration: &Registration, route: Option<&Route>) -> Self {
        let version = route.map_or_else(
            || registration.routes.iter().map(|r| r.version).max().unwrap_or(1),
            |r| r.version,
        );
        let path = route.map(|r| normalize_path(&r.path));
        Self {
            handler_name: registration.handler_name,
            handler: Arc::clone(&registration.handler),
            request_type: registration.request_type,
            response_type: registration.response_type,
            logical_path: path.clone(),
            path,
            http_method: route.map(|r| r.method).unwrap_or_default(),
            version,
            is_versioned: false,
            secure: registration.secure,
            public: registration.public,
            tags: registration.tags.clone(),
            timeout: registration.timeout,
            rules: registration.rules.clone(),
        }
    }

    #[must_use]
    pub fn handler_name(&self) -> &'static str {
        self.handler_name
    }

    pub(crate) fn handler(&self) -> &Arc<dyn ErasedHandler> {
        &self.handler
    }

    #[must_use]
    pub fn request_type(&self) -> &MessageType {
        &self.request_type
    }

    #[must_use]
    pub fn response_type(&self) -> Option<&MessageType> {
        self.response_type.as_ref()
    }

    /// Resolved path: plain for the current version, `v{N}/...` otherwise.
    #[must_use]
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Path as registered, without any version prefix.
    #[must_use]
    pub fn logical_path(&self) -> Option<&str> {
        self.logical_path.as_deref()
    }

    #[must_use]
    pub fn http_method(&self) -> HttpMethod {
        self.http_method
    }

    #[must_use]
    pub fn version(&self) -> u32 {
        self.version
    }

    #[must_use]
    pub fn is_versioned(&self) -> bool {
        self.is_versioned
    }

    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.secure
    }

    #[must_use]
    pub fn is_public(&self) -> bool {
        self.public
    }

    #[must_use]
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    #[must_use]
    pub fn rules(&self) -> &[BoundRule] {
        &self.rules
    }

    /// Label used in logs and metrics.
    #[must_use]
    pub fn label(&self) -> &str {
        self.path.as_deref().unwrap_or(self.request_type.name())
    }
}

impl fmt::Debug for EndpointDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointDescriptor")
            .field("handler", &self.handler_name)
            .field("path", &self.path)
            .field("version", &self.version)
            .field("is_versioned", &self.is_versioned)
            .field("request_type", &self.request_type)
            .field("secure", &self.secure)
            .finish_non_exhaustive()
    }
}

/// A channel (or event name) bound to an endpoint.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub channel: String,
    pub endpoint: Arc<EndpointDescriptor>,
}

// ---------------------------------------------------------------------------
// EndpointCatalog
// ---------------------------------------------------------------------------

/// Trims surrounding whitespace and slashes.
fn normalize_path(path: &str) -> String {
    path.trim().trim_matches('/').trim().to_string()
}

/// `v{N}/{path}`. Checked by the versioning tests.
static VERSIONED_ALIAS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^v(\d+)/(.+)$").expect("invalid version alias regex"));

/// Read-only endpoint lookup table.
#[derive(Debug, Default)]
pub struct EndpointCatalog {
    descriptors: Vec<Arc<EndpointDescriptor>>,
    by_path: HashMap<String, Arc<EndpointDescriptor>>,
    by_type: HashMap<TypeId, Vec<Arc<EndpointDescriptor>>>,
    subscriptions: Vec<Subscription>,
}

impl EndpointCatalog {
    /// Builds the catalog.
    ///
    /// Every registration yields one descriptor per route plus a path-less
    /// descriptor keyed by its request type. Subscriptions bind to the
    /// path-less descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] for empty paths, a version registered twice
    /// on one path, or two endpoints resolving to the same path.
    pub fn load<I>(registrations: I) -> Result<Self, CatalogError>
    where
        I: IntoIterator<Item = Registration>,
    {
        let mut implicit = Vec::new();
        let mut routed: BTreeMap<String, Vec<EndpointDescriptor>> = BTreeMap::new();
        let mut route_order = Vec::new();
        let mut subscriptions = Vec::new();

        for registration in registrations {
            let message_only = Arc::new(EndpointDescriptor::from_registration(&registration, None));
            for channel in &registration.subscriptions {
                subscriptions.push(Subscription {
                    channel: channel.trim().to_string(),
                    endpoint: Arc::clone(&message_only),
                });
            }
            implicit.push(message_only);

            for route in &registration.routes {
                let descriptor = EndpointDescriptor::from_registration(&registration, Some(route));
                let Some(path) = descriptor.logical_path.clone().filter(|p| !p.is_empty()) else {
                    return Err(CatalogError::EmptyPath {
                        handler: registration.handler_name,
                    });
                };
                if !routed.contains_key(&path) {
                    route_order.push(path.clone());
                }
                routed.entry(path).or_default().push(descriptor);
            }
        }

        let mut catalog = Self {
            subscriptions,
            ..Self::default()
        };

        for path in route_order {
            let Some(mut group) = routed.remove(&path) else {
                continue;
            };
            group.sort_by_key(|d| d.version);
            if let Some(pair) = group.windows(2).find(|w| w[0].version == w[1].version) {
                return Err(CatalogError::DuplicateVersion {
                    path,
                    version: pair[0].version,
                });
            }
            let current = group.last().map_or(0, |d| d.version);
            for mut descriptor in group {
                if descriptor.version != current {
                    descriptor.path = Some(format!("v{}/{path}", descriptor.version));
                    descriptor.is_versioned = true;
                }
                catalog.insert_routed(Arc::new(descriptor))?;
            }
        }

        let routed_descriptors = std::mem::take(&mut catalog.descriptors);
        for descriptor in implicit.into_iter().chain(routed_descriptors) {
            catalog
                .by_type
                .entry(descriptor.request_type.type_id())
                .or_default()
                .push(Arc::clone(&descriptor));
            catalog.descriptors.push(descriptor);
        }
        // Type inference takes the first entry: path-less before routed,
        // newest version first, registration order among equals.
        for bucket in catalog.by_type.values_mut() {
            bucket.sort_by_key(|d| (d.path.is_some(), Reverse(d.version)));
        }

        debug!(
            endpoints = catalog.descriptors.len(),
            paths = catalog.by_path.len(),
            subscriptions = catalog.subscriptions.len(),
            "endpoint catalog loaded"
        );
        Ok(catalog)
    }

    fn insert_routed(&mut self, descriptor: Arc<EndpointDescriptor>) -> Result<(), CatalogError> {
        if let Some(path) = descriptor.path.clone() {
            if self.by_path.contains_key(&path) {
                return Err(CatalogError::PathCollision { path });
            }
            self.by_path.insert(path, Arc::clone(&descriptor));
        }
        self.descriptors.push(descriptor);
        Ok(())
    }

    /// Exact match on the trimmed path. `v{N}/{path}` also resolves the
    /// current descriptor of `path` when its version is `N`.
    #[must_use]
    pub fn find_path(&self, path: &str) -> Option<Arc<EndpointDescriptor>> {
        let path = normalize_path(path);
        if let Some(descriptor) = self.by_path.get(&path) {
            return Some(Arc::clone(descriptor));
        }
        let captures = VERSIONED_ALIAS.captures(&path)?;
        let version: u32 = captures.get(1)?.as_str().parse().ok()?;
        self.by_path
            .get(captures.get(2)?.as_str())
            .filter(|d| !d.is_versioned && d.version == version)
            .cloned()
    }

    /// Descriptors whose request type is `message_type`. Events with no
    /// direct handler fall back to the subscribers of their channel or name.
    #[must_use]
    pub fn find_type(&self, message_type: &MessageType) -> Vec<Arc<EndpointDescriptor>> {
        let direct = self
            .by_type
            .get(&message_type.type_id())
            .cloned()
            .unwrap_or_default();
        if !direct.is_empty() || !message_type.is_event() {
            return direct;
        }
        self.subscribers_of(message_type.channel(), message_type.name())
    }

    /// Resolves the endpoint for a send: by path, then by the body's type,
    /// then by the type's declared default path.
    #[must_use]
    pub fn find(&self, path: Option<&str>, body: &MessageBody) -> Option<Arc<EndpointDescriptor>> {
        if let Some(found) = path.and_then(|p| self.find_path(p)) {
            return Some(found);
        }
        let message_type = body.message_type()?;
        if let Some(found) = self.find_type(message_type).into_iter().next() {
            return Some(found);
        }
        message_type.default_path().and_then(|p| self.find_path(p))
    }

    /// Endpoints subscribed to the event's channel or name, each once.
    #[must_use]
    pub fn subscribers(&self, event: &EventMessage) -> Vec<Arc<EndpointDescriptor>> {
        self.subscribers_of(event.channel(), event.name())
    }

    fn subscribers_of(&self, channel: Option<&str>, name: &str) -> Vec<Arc<EndpointDescriptor>> {
        let mut found: Vec<Arc<EndpointDescriptor>> = Vec::new();
        for subscription in &self.subscriptions {
            let matches = Some(subscription.channel.as_str()) == channel || subscription.channel == name;
            if matches && !found.iter().any(|d| Arc::ptr_eq(d, &subscription.endpoint)) {
                found.push(Arc::clone(&subscription.endpoint));
            }
        }
        found
    }

    /// All descriptors, path-less ones first.
    pub fn descriptors(&self) -> impl Iterator<Item = &Arc<EndpointDescriptor>> {
        self.descriptors.iter()
    }

    #[must_use]
    pub fn subscriptions(&self) -> &[Subscription] {
        &self.subscriptions
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use courier_core::{Message, MessageKind};
    use proptest::prelude::*;
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::execution::ExecutionContext;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct GetQuote {
        sku: String,
    }

    impl Message for GetQuote {
        fn default_path() -> Option<&'static str> {
            Some("quotes/get")
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct StockChanged {
        sku: String,
    }

    impl Message for StockChanged {
        fn kind() -> MessageKind {
            MessageKind::Event
        }

        fn channel() -> Option<&'static str> {
            Some("stock")
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Unrouted;

    impl Message for Unrouted {}

    #[derive(Clone)]
    struct QuoteHandler;

    #[async_trait]
    impl MessageHandler for QuoteHandler {
        type Request = GetQuote;
        type Response = ();

        async fn receive(&self, _ctx: &ExecutionContext, _request: GetQuote) -> anyhow::Result<Option<()>> {
            Ok(None)
        }
    }

    #[derive(Clone)]
    struct StockHandler;

    #[async_trait]
    impl MessageHandler for StockHandler {
        type Request = StockChanged;
        type Response = ();

        async fn receive(&self, _ctx: &ExecutionContext, _request: StockChanged) -> anyhow::Result<Option<()>> {
            Ok(None)
        }
    }

    #[derive(Clone)]
    struct RepriceHandler;

    #[async_trait]
    impl MessageHandler for RepriceHandler {
        type Request = GetQuote;
        type Response = ();

        async fn receive(&self, _ctx: &ExecutionContext, _request: GetQuote) -> anyhow::Result<Option<()>> {
            Ok(None)
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct PriceChanged {
        sku: String,
    }

    impl Message for PriceChanged {
        fn kind() -> MessageKind {
            MessageKind::Event
        }

        fn channel() -> Option<&'static str> {
            Some("prices")
        }
    }

    #[derive(Clone)]
    struct PriceAudit;

    #[async_trait]
    impl MessageHandler for PriceAudit {
        type Request = serde_json::Value;
        type Response = ();

        async fn receive(&self, _ctx: &ExecutionContext, _event: serde_json::Value) -> anyhow::Result<Option<()>> {
            Ok(None)
        }
    }

    fn quote(version: u32) -> Registration {
        Endpoint::handler(QuoteHandler)
            .route(Route::new("quotes/get").version(version))
            .build()
    }

    #[test]
    fn highest_version_owns_plain_path() {
        let catalog = EndpointCatalog::load([quote(1), quote(3), quote(2)]).unwrap();

        let current = catalog.find_path("quotes/get").unwrap();
        assert_eq!(current.version(), 3);
        assert!(!current.is_versioned());

        let older = catalog.find_path("v1/quotes/get").unwrap();
        assert_eq!(older.version(), 1);
        assert!(older.is_versioned());
        assert_eq!(older.logical_path(), Some("quotes/get"));

        // The current version also answers on its own alias.
        assert_eq!(catalog.find_path("v3/quotes/get").unwrap().version(), 3);
        assert!(catalog.find_path("v9/quotes/get").is_none());
    }

    #[test]
    fn paths_are_trimmed() {
        let registration = Endpoint::handler(QuoteHandler).at("  /quotes/get/ ").build();
        let catalog = EndpointCatalog::load([registration]).unwrap();
        assert!(catalog.find_path("/quotes/get").is_some());
        assert!(catalog.find_path("quotes/get ").is_some());
    }

    #[test]
    fn each_registration_adds_a_message_only_descriptor() {
        let catalog = EndpointCatalog::load([quote(1)]).unwrap();
        assert_eq!(catalog.len(), 2);
        let by_type = catalog.find_type(&MessageType::of::<GetQuote>());
        assert_eq!(by_type.len(), 2);
        assert!(by_type[0].path().is_none());
    }

    #[test]
    fn find_falls_back_to_type_then_default_path() {
        let catalog = EndpointCatalog::load([quote(1)]).unwrap();
        let typed = MessageBody::typed(GetQuote { sku: "A".into() });
        assert!(catalog.find(None, &typed).is_some());
        assert!(catalog.find(Some("missing"), &typed).is_some());
        assert!(catalog.find(Some("missing"), &MessageBody::Empty).is_none());
        assert!(catalog.find(None, &MessageBody::typed(Unrouted)).is_none());
    }

    #[test]
    fn type_inference_prefers_the_current_version() {
        let v1 = Endpoint::handler(QuoteHandler).route(Route::new("quotes/get").version(1));
        let v2 = Endpoint::handler(RepriceHandler).route(Route::new("quotes/get").version(2));
        let catalog = EndpointCatalog::load([v1.build(), v2.build()]).unwrap();

        let typed = MessageBody::typed(GetQuote { sku: "A".into() });
        let inferred = catalog.find(None, &typed).unwrap();
        assert_eq!(inferred.handler_name(), "RepriceHandler");
        assert_eq!(inferred.version(), 2);
        assert_eq!(
            catalog.find_path("quotes/get").unwrap().handler_name(),
            inferred.handler_name()
        );
    }

    #[test]
    fn events_without_direct_handler_resolve_to_subscribers() {
        let audit = Endpoint::handler(PriceAudit).subscribe("prices").build();
        let catalog = EndpointCatalog::load([audit]).unwrap();

        let found = catalog.find_type(&MessageType::of::<PriceChanged>());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].handler_name(), "PriceAudit");

        let typed = MessageBody::typed(PriceChanged { sku: "A".into() });
        assert_eq!(catalog.find(None, &typed).unwrap().handler_name(), "PriceAudit");

        // Requests never fall back to subscriptions.
        assert!(catalog.find_type(&MessageType::of::<Unrouted>()).is_empty());
    }

    #[test]
    fn duplicate_versions_fail_the_build() {
        let err = EndpointCatalog::load([quote(2), quote(2)]).unwrap_err();
        assert!(matches!(err, CatalogError::DuplicateVersion { version: 2, .. }));
    }

    #[test]
    fn empty_paths_fail_the_build() {
        let registration = Endpoint::handler(QuoteHandler).at(" / ").build();
        let err = EndpointCatalog::load([registration]).unwrap_err();
        assert!(matches!(err, CatalogError::EmptyPath { handler: "QuoteHandler" }));
    }

    #[test]
    fn alias_colliding_with_literal_path_fails_the_build() {
        let literal = Endpoint::handler(QuoteHandler).at("v1/quotes/get").build();
        let err = EndpointCatalog::load([literal, quote(1), quote(2)]).unwrap_err();
        assert!(matches!(err, CatalogError::PathCollision { .. }));
    }

    #[test]
    fn subscribers_match_channel_or_name() {
        let by_channel = Endpoint::handler(StockHandler).subscribe("stock").build();
        let by_name = Endpoint::handler(StockHandler).subscribe("StockChanged").build();
        let catalog = EndpointCatalog::load([by_channel, by_name]).unwrap();

        let event = EventMessage::new(StockChanged { sku: "A".into() }, 0);
        assert_eq!(catalog.subscribers(&event).len(), 2);

        let other = EventMessage::on_channel("prices", MessageBody::Empty, 0);
        assert!(catalog.subscribers(&other).is_empty());
    }

    proptest! {
        #[test]
        fn only_the_maximum_version_keeps_the_plain_path(
            versions in prop::collection::btree_set(1u32..50, 1..8),
            path in "[a-z]{1,8}(/[a-z]{1,8}){0,2}",
        ) {
            let registrations = versions
                .iter()
                .map(|v| Endpoint::handler(QuoteHandler).route(Route::new(path.clone()).version(*v)).build());
            let catalog = EndpointCatalog::load(registrations).unwrap();
            let max = *versions.iter().max().unwrap();

            let routed: Vec<_> = catalog.descriptors().filter(|d| d.path().is_some()).collect();
            prop_assert_eq!(routed.len(), versions.len());
            for descriptor in routed {
                if descriptor.version() == max {
                    prop_assert_eq!(descriptor.path(), Some(path.as_str()));
                    prop_assert!(!descriptor.is_versioned());
                } else {
                    let alias = format!("v{}/{}", descriptor.version(), path);
                    prop_assert_eq!(descriptor.path(), Some(alias.as_str()));
                    prop_assert!(descriptor.is_versioned());
                }
            }
        }
    }
}
