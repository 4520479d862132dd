//! Tower middleware layers for the handler invocation pipeline.
//!
//! - [`load_shed`]: Semaphore-based concurrency limiting
//! - [`timeout`]: Per-invocation timeout and cancellation
//! - [`metrics`]: Invocation timing and outcome counters
//! - [`pipeline`]: Composes all layers around the handler service

pub mod load_shed;
pub mod metrics;
pub mod pipeline;
pub mod timeout;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use courier_core::{DispatchError, TypedBody};

use crate::execution::ExecutionContext;

pub use load_shed::LoadShedLayer;
pub use metrics::MetricsLayer;
pub use pipeline::{build_invocation_pipeline, InvocationPipeline};
pub use timeout::TimeoutLayer;

/// One handler call travelling through the pipeline.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub ctx: Arc<ExecutionContext>,
    /// Request body, already coerced into the endpoint's request type.
    pub body: TypedBody,
    /// Enforced by [`TimeoutLayer`]; `None` runs unbounded.
    pub timeout: Option<Duration>,
}

/// Future returned by every pipeline service.
pub type InvocationFuture =
    Pin<Box<dyn Future<Output = Result<Option<TypedBody>, DispatchError>> + Send>>;

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;
    use std::task::{Context, Poll};
    use std::time::Duration;

    use async_trait::async_trait;
    use courier_core::{DispatchError, Incoming, Message, Origin, SystemClock, TypedBody};
    use serde::{Deserialize, Serialize};
    use tower::Service;

    use super::{Invocation, InvocationFuture};
    use crate::catalog::{Endpoint, EndpointCatalog, MessageHandler};
    use crate::execution::ExecutionContext;
    use crate::resolver::RequestResolver;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub(crate) struct Noop;

    impl Message for Noop {}

    #[derive(Clone)]
    struct NoopHandler;

    #[async_trait]
    impl MessageHandler for NoopHandler {
        type Request = Noop;
        type Response = Noop;

        async fn receive(&self, _ctx: &ExecutionContext, request: Noop) -> anyhow::Result<Option<Noop>> {
            Ok(Some(request))
        }
    }

    pub(crate) fn invocation(timeout: Option<Duration>) -> Invocation {
        let catalog = EndpointCatalog::load([Endpoint::handler(NoopHandler).at("noop").build()]).unwrap();
        let endpoint = catalog.find_path("noop").unwrap();
        let request = RequestResolver::new(Arc::new(SystemClock), "127.0.0.1")
            .resolve(Incoming::default(), &endpoint, None, &Origin::default())
            .unwrap();
        Invocation {
            ctx: Arc::new(ExecutionContext::detached(request, endpoint)),
            body: TypedBody::new(Noop),
            timeout,
        }
    }

    /// Answers `Noop` after `delay_ms`.
    pub(crate) struct SlowService {
        pub(crate) delay_ms: u64,
    }

    impl Service<Invocation> for SlowService {
        type Response = Option<TypedBody>;
        type Error = DispatchError;
        type Future = InvocationFuture;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _invocation: Invocation) -> Self::Future {
            let delay = self.delay_ms;
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                Ok(Some(TypedBody::new(Noop)))
            })
        }
    }
}
