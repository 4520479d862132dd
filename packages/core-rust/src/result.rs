//! Outward-facing dispatch outcome.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{DispatchError, RaisedException};
use crate::message::{Message, TypedBody};
use crate::validation::ValidationError;

/// Field values for [`MessageResult::from_parts`].
#[derive(Debug, Clone, Default)]
pub struct ResultParts {
    pub correlation_id: Uuid,
    pub request_id: Uuid,
    pub started: u64,
    pub completed: u64,
    pub is_cancelled: bool,
    pub response: Option<TypedBody>,
    pub validation_errors: Vec<ValidationError>,
    pub error: Option<Arc<DispatchError>>,
}

/// Immutable snapshot of a completed dispatch.
///
/// In-process callers keep the typed response and the original error;
/// only the JSON projection crosses a serialization boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageResult {
    correlation_id: Uuid,
    request_id: Uuid,
    started: u64,
    completed: u64,
    elapsed_ms: u64,
    is_cancelled: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    raised_exception: Option<RaisedException>,
    #[serde(default)]
    response: Option<Value>,
    #[serde(default)]
    validation_errors: Vec<ValidationError>,
    is_successful: bool,
    #[serde(skip)]
    typed_response: Option<TypedBody>,
    #[serde(skip)]
    error: Option<Arc<DispatchError>>,
}

impl MessageResult {
    #[must_use]
    pub fn from_parts(parts: ResultParts) -> Self {
        let is_successful = parts.validation_errors.is_empty() && parts.error.is_none();
        let raised_exception = parts
            .error
            .as_deref()
            .map(|err| RaisedException::from_error(err, parts.correlation_id));
        let response = parts
            .response
            .as_ref()
            .and_then(|body| body.to_json().ok())
            .filter(|json| !json.is_null());
        Self {
            correlation_id: parts.correlation_id,
            request_id: parts.request_id,
            started: parts.started,
            completed: parts.completed,
            elapsed_ms: parts.completed.saturating_sub(parts.started),
            is_cancelled: parts.is_cancelled,
            raised_exception,
            response,
            validation_errors: parts.validation_errors,
            is_successful,
            typed_response: parts.response,
            error: parts.error,
        }
    }

    /// A result for a dispatch that failed before any handler ran.
    #[must_use]
    pub fn failure(correlation_id: Uuid, request_id: Uuid, at: u64, error: DispatchError) -> Self {
        Self::from_parts(ResultParts {
            correlation_id,
            request_id,
            started: at,
            completed: at,
            error: Some(Arc::new(error)),
            ..ResultParts::default()
        })
    }

    #[must_use]
    pub fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    #[must_use]
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    #[must_use]
    pub fn started(&self) -> u64 {
        self.started
    }

    #[must_use]
    pub fn completed(&self) -> u64 {
        self.completed
    }

    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_ms
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.is_cancelled
    }

    #[must_use]
    pub fn raised_exception(&self) -> Option<&RaisedException> {
        self.raised_exception.as_ref()
    }

    /// JSON form of the response.
    #[must_use]
    pub fn response(&self) -> Option<&Value> {
        self.response.as_ref()
    }

    /// Typed response, present for in-process dispatches.
    #[must_use]
    pub fn typed_response(&self) -> Option<&TypedBody> {
        self.typed_response.as_ref()
    }

    #[must_use]
    pub fn validation_errors(&self) -> &[ValidationError] {
        &self.validation_errors
    }

    #[must_use]
    pub fn is_successful(&self) -> bool {
        self.is_successful
    }

    /// Original error, present for in-process dispatches.
    #[must_use]
    pub fn error(&self) -> Option<&DispatchError> {
        self.error.as_deref()
    }

    /// Casts the response to `T`: a direct downcast for in-process typed
    /// responses, JSON deserialization otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Deserialization`] when the response does not
    /// fit `T`.
    pub fn into_typed<T: Message>(self) -> Result<TypedResult<T>, DispatchError> {
        let fail = |source: serde_json::Error| DispatchError::Deserialization {
            type_name: T::message_name(),
            source,
        };
        let response = match (&self.typed_response, &self.response) {
            (Some(body), _) => Some(body.to_message::<T>().map_err(fail)?),
            (None, Some(json)) => Some(serde_json::from_value(json.clone()).map_err(fail)?),
            (None, None) => None,
        };
        Ok(TypedResult {
            result: self,
            response,
        })
    }
}

/// A [`MessageResult`] whose response has been cast to `T`.
#[derive(Debug, Clone)]
pub struct TypedResult<T> {
    result: MessageResult,
    response: Option<T>,
}

impl<T> TypedResult<T> {
    #[must_use]
    pub fn response(&self) -> Option<&T> {
        self.response.as_ref()
    }

    #[must_use]
    pub fn into_response(self) -> Option<T> {
        self.response
    }

    #[must_use]
    pub fn result(&self) -> &MessageResult {
        &self.result
    }
}

impl<T> std::ops::Deref for TypedResult<T> {
    type Target = MessageResult;

    fn deref(&self) -> &Self::Target {
        &self.result
    }
}
