//! Metrics middleware for handler invocations.
//!
//! Wraps each call in a tracing span and records
//! `courier_invocations_total` and `courier_invocation_duration_ms`
//! through the `metrics` facade.

use std::task::{Context, Poll};
use std::time::Instant;

use courier_core::{DispatchError, TypedBody};
use tower::{Layer, Service};
use tracing::{info_span, Instrument};

use super::{Invocation, InvocationFuture};

// ---------------------------------------------------------------------------
// MetricsLayer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MetricsLayer;

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService { inner }
    }
}

// ---------------------------------------------------------------------------
// MetricsService
// ---------------------------------------------------------------------------

/// Service wrapper that records invocation duration and outcome.
#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
}

fn outcome(result: &Result<Option<TypedBody>, DispatchError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(DispatchError::Timeout { .. }) => "timeout",
        Err(DispatchError::Cancelled) => "cancelled",
        Err(DispatchError::Overloaded) => "overloaded",
        Err(_) => "error",
    }
}

impl<S> Service<Invocation> for MetricsService<S>
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
        let endpoint = invocation.ctx.endpoint().label().to_string();
        let correlation_id = invocation.ctx.request().correlation_id();

        let span = info_span!(
            "invocation",
            endpoint = %endpoint,
            correlation_id = %correlation_id,
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        let fut = self.inner.call(invocation);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;
                let elapsed = start.elapsed();
                let outcome = outcome(&result);

                #[allow(clippy::cast_possible_truncation)]
                let duration_ms = elapsed.as_millis() as u64;
                tracing::Span::current().record("duration_ms", duration_ms);
                tracing::Span::current().record("outcome", outcome);

                metrics::counter!(
                    "courier_invocations_total",
                    "endpoint" => endpoint.clone(),
                    "outcome" => outcome
                )
                .increment(1);
                metrics::histogram!("courier_invocation_duration_ms", "endpoint" => endpoint)
                    .record(elapsed.as_secs_f64() * 1000.0);

                tracing::debug!(duration_ms, outcome, "invocation complete");

                result
            }
            .instrument(span),
        )
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
    async fn metrics_layer_passes_through_response() {
        let svc = MetricsLayer.layer(SlowService { delay_ms: 0 });
        let resp = svc.oneshot(invocation(None)).await.unwrap();
        assert_eq!(resp.unwrap().message_type().name(), "Noop");
    }

    #[test]
    fn outcomes_are_labelled() {
        assert_eq!(outcome(&Ok(None)), "ok");
        assert_eq!(outcome(&Err(DispatchError::Timeout { timeout_ms: 1 })), "timeout");
        assert_eq!(outcome(&Err(DispatchError::Unbound)), "error");
    }
}
