//! Post-execution pipeline.
//!
//! Runs after every dispatch, pass or fail, in the fixed order of
//! [`Stage::ORDER`].

use std::sync::Arc;

use courier_core::{DispatchError, EventMessage, ValidationError};
use tracing::{error, trace};

use crate::events::EventFanout;
use crate::execution::ExecutionContext;
use crate::stores::{ResponseEntry, ResponseLog};

/// One step of the post-execution pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Unwraps wrapped exceptions; validation failures become validation errors.
    HandleException,
    /// Stamps the completion time.
    Complete,
    /// Persists and republishes events of a successful dispatch.
    PublishEvents,
    /// Writes the response log entry.
    LogCompletion,
}

impl Stage {
    pub const ORDER: [Stage; 4] = [
        Stage::HandleException,
        Stage::Complete,
        Stage::PublishEvents,
        Stage::LogCompletion,
    ];
}

// ---------------------------------------------------------------------------
// Exception normalization
// ---------------------------------------------------------------------------

/// Result of normalizing a captured exception.
#[derive(Debug)]
pub enum Normalized {
    Validation(Vec<ValidationError>),
    Exception(DispatchError),
}

/// Maximum number of wrapper levels removed while looking for the cause.
const MAX_UNWRAP: usize = 2;

/// Unwraps invocation wrappers and single-error aggregates (at most two
/// levels) and turns a validation failure found underneath into
/// validation errors. Aggregates of several errors are kept as they are.
#[must_use]
pub fn normalize(error: DispatchError) -> Normalized {
    let mut current = error;
    for _ in 0..MAX_UNWRAP {
        current = match current {
            DispatchError::Invocation(inner) => *inner,
            DispatchError::Aggregate(mut inner) if inner.len() == 1 => match inner.pop() {
                Some(only) => only,
                None => DispatchError::Aggregate(inner),
            },
            DispatchError::Handler(opaque) => match opaque.downcast::<DispatchError>() {
                Ok(known) => known,
                Err(opaque) => {
                    current = DispatchError::Handler(opaque);
                    break;
                }
            },
            other => {
                current = other;
                break;
            }
        };
    }
    match current {
        DispatchError::Validation(errors) => Normalized::Validation(errors),
        other => Normalized::Exception(other),
    }
}

// ---------------------------------------------------------------------------
// CompletionPipeline
// ---------------------------------------------------------------------------

/// Runs [`Stage::ORDER`] for a dispatch.
pub struct CompletionPipeline {
    fanout: Arc<EventFanout>,
    response_log: Arc<ResponseLog>,
    system_path_prefix: String,
}

impl CompletionPipeline {
    pub fn new(
        fanout: Arc<EventFanout>,
        response_log: Arc<ResponseLog>,
        system_path_prefix: impl Into<String>,
    ) -> Self {
        Self {
            fanout,
            response_log,
            system_path_prefix: system_path_prefix.into(),
        }
    }

    pub async fn run(&self, ctx: &ExecutionContext) {
        for stage in Stage::ORDER {
            trace!(?stage, endpoint = ctx.endpoint().label(), "completion stage");
            match stage {
                Stage::HandleException => handle_exception(ctx),
                Stage::Complete => {
                    ctx.complete();
                }
                Stage::PublishEvents => self.publish_events(ctx).await,
                Stage::LogCompletion => self.log_completion(ctx).await,
            }
        }
    }

    async fn publish_events(&self, ctx: &ExecutionContext) {
        if !ctx.is_successful() {
            return;
        }
        let events = collect_events(ctx);
        if !events.is_empty() {
            self.fanout.dispatch(ctx.link(), events).await;
        }
    }

    async fn log_completion(&self, ctx: &ExecutionContext) {
        let result = ctx.to_result();
        let path = ctx.request().path();
        if result.is_successful()
            && path.is_some_and(|p| p.starts_with(self.system_path_prefix.as_str()))
        {
            return;
        }

        if result.is_successful() {
            trace!(
                correlation_id = %result.correlation_id(),
                endpoint = ctx.endpoint().label(),
                elapsed_ms = result.elapsed_ms(),
                "dispatch completed"
            );
        } else if let Some(exception) = ctx.exception() {
            error!(
                correlation_id = %result.correlation_id(),
                endpoint = ctx.endpoint().label(),
                error = %exception,
                detail = ?exception,
                "dispatch failed"
            );
        } else {
            error!(
                correlation_id = %result.correlation_id(),
                endpoint = ctx.endpoint().label(),
                validation_errors = ?result.validation_errors(),
                "dispatch rejected by validation"
            );
        }

        if let Err(err) = self
            .response_log
            .append(ResponseEntry::from_result(path, &result))
            .await
        {
            error!(correlation_id = %result.correlation_id(), error = %err, "response log append failed");
        }
    }
}

fn handle_exception(ctx: &ExecutionContext) {
    let Some(shared) = ctx.take_exception() else {
        return;
    };
    match Arc::try_unwrap(shared) {
        Ok(error) => match normalize(error) {
            Normalized::Validation(errors) => ctx.add_validation_errors(errors),
            Normalized::Exception(error) => ctx.set_exception(error),
        },
        // Still referenced elsewhere; keep it as captured.
        Err(shared) => ctx.restore_exception(shared),
    }
}

/// Response (when it is an event) plus raised events, each envelope once.
fn collect_events(ctx: &ExecutionContext) -> Vec<EventMessage> {
    let mut events = Vec::new();
    if let Some(response) = ctx.response().filter(|r| r.message_type().is_event()) {
        events.push(EventMessage::from_body(response, ctx.now()));
    }
    for event in ctx.raised_events() {
        if !events.iter().any(|e| e.id() == event.id()) {
            events.push(event);
        }
    }
    events
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
