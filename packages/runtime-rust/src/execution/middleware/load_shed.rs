//! Load-shedding middleware for handler invocations.
//!
//! Rejects invocations with `DispatchError::Overloaded` when the number of
//! concurrent handler calls reaches `max_concurrent_invocations`.

use std::sync::Arc;
use std::task::{Context, Poll};

use courier_core::{DispatchError, TypedBody};
use tokio::sync::Semaphore;
use tower::{Layer, Service};

use super::{Invocation, InvocationFuture};

// ---------------------------------------------------------------------------
// LoadShedLayer
// ---------------------------------------------------------------------------

/// Tower layer that limits concurrent invocations via a semaphore.
///
/// When all permits are taken, incoming invocations are rejected immediately
/// rather than queued. Clones of the layer share the same permits.
#[derive(Debug, Clone)]
pub struct LoadShedLayer {
    semaphore: Arc<Semaphore>,
}

impl LoadShedLayer {
    #[must_use]
    pub fn new(max_concurrent: u32) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent as usize)),
        }
    }
}

impl<S> Layer<S> for LoadShedLayer {
    type Service = LoadShedService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        LoadShedService {
            inner,
            semaphore: Arc::clone(&self.semaphore),
        }
    }
}

// ---------------------------------------------------------------------------
// LoadShedService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LoadShedService<S> {
    inner: S,
    semaphore: Arc<Semaphore>,
}

impl<S> Service<Invocation> for LoadShedService<S>
where
    S: Service<Invocation, Response = Option<TypedBody>, Error = DispatchError> + Send,
    S::Future: Send + 'static,
{
    type Response = Option<TypedBody>;
    type Error = DispatchError;
    type Future = InvocationFuture;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, invocation: Invocation) -> Self::Future {
        let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() else {
            tracing::warn!(
                endpoint = invocation.ctx.endpoint().label(),
                "invocation rejected: overloaded"
            );
            return Box::pin(async { Err(DispatchError::Overloaded) });
        };

        let fut = self.inner.call(invocation);
        Box::pin(async move {
            // Held until the handler finishes.
            let result = fut.await;
            drop(permit);
            result
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tower::ServiceExt;

    use super::*;
    use crate::execution::middleware::testing::{invocation, SlowService};

    #[tokio::test]
    async fn allows_invocations_under_limit() {
        let svc = LoadShedLayer::new(10).layer(SlowService { delay_ms: 1 });
        let resp = svc.oneshot(invocation(None)).await.unwrap();
        assert!(resp.is_some());
    }

    #[tokio::test]
    async fn rejects_when_overloaded() {
        let mut svc = LoadShedLayer::new(1).layer(SlowService { delay_ms: 500 });

        let _ = ServiceExt::ready(&mut svc).await.unwrap();
        let _in_flight = tokio::spawn({
            let fut = svc.call(invocation(None));
            async move { fut.await }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;

        let err = svc.call(invocation(None)).await.unwrap_err();
        assert!(matches!(err, DispatchError::Overloaded));
    }

    #[tokio::test]
    async fn permit_is_released_after_completion() {
        let layer = LoadShedLayer::new(1);
        let first = layer.layer(SlowService { delay_ms: 1 });
        assert!(first.oneshot(invocation(None)).await.is_ok());

        let second = layer.layer(SlowService { delay_ms: 1 });
        assert!(second.oneshot(invocation(None)).await.is_ok());
    }
}
