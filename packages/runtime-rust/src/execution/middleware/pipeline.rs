//! Pipeline composition: wraps the handler service in every middleware layer.

use tower::ServiceBuilder;

use super::load_shed::{LoadShedLayer, LoadShedService};
use super::metrics::{MetricsLayer, MetricsService};
use super::timeout::{TimeoutLayer, TimeoutService};
use crate::config::RuntimeConfig;
use crate::execution::router::HandlerService;

/// The full invocation stack. Cheap to clone; clones share the load-shed
/// permits.
pub type InvocationPipeline = LoadShedService<TimeoutService<MetricsService<HandlerService>>>;

/// Build the invocation pipeline around [`HandlerService`].
///
/// Layer order (outermost to innermost):
/// 1. `LoadShedLayer` -- reject when overloaded (fail fast before doing any work)
/// 2. `TimeoutLayer` -- enforce per-invocation timeouts and cancellation
/// 3. `MetricsLayer` -- record timing and outcome (closest to the handler)
#[must_use]
pub fn build_invocation_pipeline(config: &RuntimeConfig) -> InvocationPipeline {
    ServiceBuilder::new()
        .layer(LoadShedLayer::new(config.max_concurrent_invocations))
        .layer(TimeoutLayer)
        .layer(MetricsLayer)
        .service(HandlerService)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
