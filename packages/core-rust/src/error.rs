//! Dispatch failure taxonomy and its serializable projection.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::validation::ValidationError;

/// Everything that can go wrong while dispatching a message.
///
/// Nothing above the execution router returns this to a caller directly:
/// failures are captured into the execution context and reported through
/// `MessageResult`.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// No local endpoint or remote router matched.
    #[error("endpoint not found: {target}")]
    EndpointNotFound { target: String },

    /// A nested dispatch issued by a handler failed.
    #[error("dependency {target} failed")]
    DependencyFailed {
        target: String,
        validation_errors: Vec<ValidationError>,
        exception: Option<RaisedException>,
    },

    /// Validation failures raised from inside a handler.
    #[error("validation failed with {} error(s)", .0.len())]
    Validation(Vec<ValidationError>),

    /// The message body did not fit the endpoint's request type.
    #[error("failed to deserialize message into {type_name}")]
    Deserialization {
        type_name: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// Several independent failures.
    #[error("{} errors occurred", .0.len())]
    Aggregate(Vec<DispatchError>),

    /// A failure surfaced through the invocation boundary.
    #[error("handler invocation failed")]
    Invocation(#[source] Box<DispatchError>),

    #[error("invocation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("too many concurrent invocations")]
    Overloaded,

    #[error("nested dispatch exceeded maximum depth {max}")]
    DepthExceeded { max: usize },

    #[error("dispatch was cancelled")]
    Cancelled,

    #[error("runtime is shutting down")]
    ShuttingDown,

    #[error("remote router {router} failed: {message}")]
    RemoteFailure { router: String, message: String },

    /// A context helper needed a dispatcher but none was bound.
    #[error("execution context is not bound to a dispatcher")]
    Unbound,

    /// Opaque handler failure.
    #[error(transparent)]
    Handler(#[from] anyhow::Error),
}

impl DispatchError {
    #[must_use]
    pub fn kind(&self) -> ExceptionKind {
        match self {
            Self::EndpointNotFound { .. } => ExceptionKind::EndpointNotFound,
            Self::DependencyFailed { .. } => ExceptionKind::DependencyFailed,
            Self::Validation(_) => ExceptionKind::Validation,
            Self::Deserialization { .. } => ExceptionKind::Deserialization,
            Self::Aggregate(_) => ExceptionKind::Aggregate,
            Self::Invocation(_) => ExceptionKind::Invocation,
            Self::Timeout { .. } => ExceptionKind::Timeout,
            Self::Overloaded => ExceptionKind::Overloaded,
            Self::DepthExceeded { .. } => ExceptionKind::DepthExceeded,
            Self::Cancelled => ExceptionKind::Cancelled,
            Self::ShuttingDown => ExceptionKind::ShuttingDown,
            Self::RemoteFailure { .. } => ExceptionKind::RemoteFailure,
            Self::Unbound => ExceptionKind::Unbound,
            Self::Handler(_) => ExceptionKind::Unhandled,
        }
    }
}

/// Serializable classification of a [`DispatchError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExceptionKind {
    EndpointNotFound,
    DependencyFailed,
    Validation,
    Deserialization,
    Aggregate,
    Invocation,
    Timeout,
    Overloaded,
    DepthExceeded,
    Cancelled,
    ShuttingDown,
    RemoteFailure,
    Unbound,
    Unhandled,
}

impl ExceptionKind {
    /// Kinds whose detail stays on the server side of the trust boundary.
    #[must_use]
    pub fn is_opaque(self) -> bool {
        matches!(
            self,
            Self::Deserialization | Self::Aggregate | Self::Invocation | Self::Unhandled
        )
    }
}

/// The exception as reported to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RaisedException {
    pub kind: ExceptionKind,
    pub message: String,
}

impl RaisedException {
    /// Projects `error` for the caller. Opaque kinds get a generic message
    /// referencing the correlation id instead of their detail.
    #[must_use]
    pub fn from_error(error: &DispatchError, correlation_id: Uuid) -> Self {
        let kind = error.kind();
        let message = if kind.is_opaque() {
            format!(
                "An unexpected error occurred. Quote correlation id {correlation_id} when reporting it."
            )
        } else {
            error.to_string()
        };
        Self { kind, message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opaque_errors_do_not_leak_detail() {
        let id = Uuid::new_v4();
        let err = DispatchError::Handler(anyhow::anyhow!("password=hunter2"));
        let raised = RaisedException::from_error(&err, id);
        assert_eq!(raised.kind, ExceptionKind::Unhandled);
        assert!(!raised.message.contains("hunter2"));
        assert!(raised.message.contains(&id.to_string()));
    }

    #[test]
    fn known_errors_keep_their_message() {
        let err = DispatchError::EndpointNotFound {
            target: "orders/missing".into(),
        };
        let raised = RaisedException::from_error(&err, Uuid::nil());
        assert_eq!(raised.kind, ExceptionKind::EndpointNotFound);
        assert_eq!(raised.message, "endpoint not found: orders/missing");
    }

    #[test]
    fn handler_errors_downcast_back() {
        let wrapped: anyhow::Error = DispatchError::Cancelled.into();
        assert!(matches!(
            wrapped.downcast_ref::<DispatchError>(),
            Some(DispatchError::Cancelled)
        ));
    }
}
