//! Execution router: validates, invokes, and completes one dispatch.

use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use courier_core::{ClockSource, DispatchError, MessageResult, Request, TypedBody};
use tower::{Service, ServiceExt};
use tracing::debug;

use super::completion::CompletionPipeline;
use super::middleware::{build_invocation_pipeline, Invocation, InvocationFuture, InvocationPipeline};
use super::{ExecutionContext, ParentLink};
use crate::catalog::EndpointDescriptor;
use crate::config::RuntimeConfig;
use crate::gateway::Dispatcher;
use crate::validation::ValidationPipeline;

// ---------------------------------------------------------------------------
// HandlerService
// ---------------------------------------------------------------------------

/// Innermost service of the pipeline: calls the endpoint's handler.
#[derive(Debug, Clone, Copy, Default)]
pub struct HandlerService;

impl Service<Invocation> for HandlerService {
    type Response = Option<TypedBody>;
    type Error = DispatchError;
    type Future = InvocationFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, invocation: Invocation) -> Self::Future {
        let Invocation { ctx, body, .. } = invocation;
        let handler = Arc::clone(ctx.endpoint().handler());
        Box::pin(async move { handler.invoke(ctx, body).await })
    }
}

// ---------------------------------------------------------------------------
// ExecutionRouter
// ---------------------------------------------------------------------------

/// Runs a resolved request against its endpoint.
///
/// Handler failures never escape [`route`](Self::route): they are captured
/// on the context, normalized by the completion pipeline, and reported in
/// the returned [`MessageResult`].
pub struct ExecutionRouter {
    pipeline: InvocationPipeline,
    validation: ValidationPipeline,
    completion: CompletionPipeline,
    clock: Arc<dyn ClockSource>,
    dispatcher: Option<Weak<dyn Dispatcher>>,
    default_timeout: Option<Duration>,
}

impl ExecutionRouter {
    pub fn new(
        config: &RuntimeConfig,
        completion: CompletionPipeline,
        clock: Arc<dyn ClockSource>,
        dispatcher: Option<Weak<dyn Dispatcher>>,
    ) -> Self {
        Self {
            pipeline: build_invocation_pipeline(config),
            validation: ValidationPipeline,
            completion,
            clock,
            dispatcher,
            default_timeout: config.default_timeout,
        }
    }

    /// Routes `request` to `endpoint`.
    ///
    /// The effective timeout is `timeout`, else the endpoint's, else the
    /// configured default.
    pub async fn route(
        &self,
        request: Request,
        endpoint: Arc<EndpointDescriptor>,
        parent: Option<ParentLink>,
        timeout: Option<Duration>,
    ) -> MessageResult {
        let ctx = Arc::new(self.context(request, endpoint, parent));
        self.execute(&ctx, timeout).await;
        self.completion.run(&ctx).await;
        ctx.to_result()
    }

    /// Reports a request that failed before it could be executed, running
    /// the completion pipeline so the failure is normalized and logged.
    pub async fn route_failed(
        &self,
        request: Request,
        endpoint: Arc<EndpointDescriptor>,
        parent: Option<ParentLink>,
        error: DispatchError,
    ) -> MessageResult {
        let ctx = self.context(request, endpoint, parent);
        ctx.set_exception(error);
        self.completion.run(&ctx).await;
        ctx.to_result()
    }

    fn context(
        &self,
        request: Request,
        endpoint: Arc<EndpointDescriptor>,
        parent: Option<ParentLink>,
    ) -> ExecutionContext {
        let dispatcher = self.dispatcher.as_ref().and_then(Weak::upgrade);
        ExecutionContext::new(request, endpoint, parent, Arc::clone(&self.clock), dispatcher)
    }

    async fn execute(&self, ctx: &Arc<ExecutionContext>, timeout: Option<Duration>) {
        let endpoint = Arc::clone(ctx.endpoint());
        let body = match ctx.request().message().body().coerce_to(endpoint.request_type()) {
            Ok(body) => body,
            Err(err) => {
                ctx.set_exception(err);
                return;
            }
        };

        let errors = self.validation.validate(ctx, &body).await;
        if !errors.is_empty() {
            ctx.add_validation_errors(errors);
            return;
        }

        if ctx.is_cancelled() {
            debug!(endpoint = endpoint.label(), "dispatch cancelled before invocation");
            return;
        }

        let invocation = Invocation {
            ctx: Arc::clone(ctx),
            body,
            timeout: timeout.or(endpoint.timeout()).or(self.default_timeout),
        };
        match self.pipeline.clone().oneshot(invocation).await {
            Ok(Some(response)) => {
                ctx.set_response(response);
            }
            Ok(None) => {}
            Err(err) => ctx.set_exception(err),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
