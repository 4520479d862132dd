//! Mapping of dispatch outcomes onto HTTP status codes, for hosts that
//! expose the gateway over HTTP.

use courier_core::{ExceptionKind, MessageResult, ValidationKind};
use http::StatusCode;

/// Status code for `result`.
///
/// Validation failures map by the kind of the first error (input 400,
/// security 401, anything else 409), a missing endpoint to 404, other
/// exceptions to 500. Success is 200 with a response body, 204 without.
#[must_use]
pub fn status_code(result: &MessageResult) -> StatusCode {
    if let Some(error) = result.validation_errors().first() {
        return match error.kind {
            ValidationKind::Input => StatusCode::BAD_REQUEST,
            ValidationKind::Security => StatusCode::UNAUTHORIZED,
            ValidationKind::Business | ValidationKind::None => StatusCode::CONFLICT,
        };
    }
    if let Some(exception) = result.raised_exception() {
        return match exception.kind {
            ExceptionKind::EndpointNotFound => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
    }
    if result.response().is_some() {
        StatusCode::OK
    } else {
        StatusCode::NO_CONTENT
    }
}
