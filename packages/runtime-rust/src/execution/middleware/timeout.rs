//! Timeout middleware for handler invocations.
//!
//! Bounds each invocation by its own `timeout` and stops waiting as soon as
//! the dispatch is cancelled. An expired invocation cancels its context so
//! nested dispatches it issued stop too.

use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use courier_core::{DispatchError, TypedBody};
use tower::{Layer, Service};

use super::{Invocation, InvocationFuture};

// ---------------------------------------------------------------------------
// TimeoutLayer
// ---------------------------------------------------------------------------

/// Tower layer that wraps services with per-invocation timeout enforcement.
///
/// The timeout is read from each invocation, so endpoints and individual
/// sends can carry different limits.
#[derive(Debug, Clone)]
pub struct TimeoutLayer;

impl<S> Layer<S> for TimeoutLayer {
    type Service = TimeoutService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TimeoutService { inner }
    }
}

// ---------------------------------------------------------------------------
// TimeoutService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TimeoutService<S> {
    inner: S,
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl<S> Service<Invocation> for TimeoutService<S>
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
        let limit = invocation.timeout;
        let ctx = Arc::clone(&invocation.ctx);
        let fut = self.inner.call(invocation);
        Box::pin(async move {
            let token = ctx.cancellation_token().clone();
            let guarded = async {
                tokio::select! {
                    result = fut => result,
                    () = token.cancelled() => Err(DispatchError::Cancelled),
                }
            };
            let Some(limit) = limit else {
                return guarded.await;
            };
            if let Ok(result) = tokio::time::timeout(limit, guarded).await {
                result
            } else {
                ctx.cancel();
                Err(DispatchError::Timeout {
                    timeout_ms: millis(limit),
                })
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use tower::ServiceExt;

    use super::*;
    use crate::execution::middleware::testing::{invocation, SlowService};

    #[tokio::test]
    async fn completes_within_timeout() {
        let svc = TimeoutLayer.layer(SlowService { delay_ms: 10 });
        let resp = svc
            .oneshot(invocation(Some(Duration::from_millis(1000))))
            .await
            .unwrap();
        assert!(resp.is_some());
    }

    #[tokio::test]
    async fn exceeds_timeout_returns_error_and_cancels() {
        let svc = TimeoutLayer.layer(SlowService { delay_ms: 200 });
        let inv = invocation(Some(Duration::from_millis(50)));
        let ctx = Arc::clone(&inv.ctx);
        let err = svc.oneshot(inv).await.unwrap_err();
        assert!(matches!(err, DispatchError::Timeout { timeout_ms: 50 }));
        assert!(ctx.is_cancelled());
    }

    #[tokio::test]
    async fn no_timeout_runs_unbounded() {
        let svc = TimeoutLayer.layer(SlowService { delay_ms: 30 });
        assert!(svc.oneshot(invocation(None)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn cancellation_interrupts_invocation() {
        let svc = TimeoutLayer.layer(SlowService { delay_ms: 5_000 });
        let inv = invocation(None);
        let ctx = Arc::clone(&inv.ctx);
        let call = tokio::spawn(svc.oneshot(inv));

        tokio::time::sleep(Duration::from_millis(10)).await;
        ctx.cancel();

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, DispatchError::Cancelled));
    }
}
