//! Property constraint evaluation for the input tier.

use courier_core::{MessageType, ValidationError};
use serde_json::Value;
use tracing::trace;

/// Deepest dotted property path that is evaluated. Deeper constraints are
/// skipped, which also bounds self-referencing message types.
pub const MAX_PROPERTY_DEPTH: usize = 3;

/// Evaluates every constraint declared by `message_type` against `json`
/// and returns all failures, untagged.
#[must_use]
pub fn check_constraints(message_type: &MessageType, json: &Value) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    for constraint in message_type.constraints() {
        if constraint.depth() > MAX_PROPERTY_DEPTH {
            trace!(path = constraint.path(), "constraint deeper than {MAX_PROPERTY_DEPTH} skipped");
            continue;
        }
        let value = lookup(json, constraint.path());
        if let Err(message) = constraint.constraint().check(value) {
            errors.push(ValidationError::for_field(constraint.path(), message));
        }
    }
    errors
}

/// Follows a dotted path through nested objects. A null or missing
/// intermediate property yields `None`.
fn lookup<'a>(json: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(json, |current, segment| current.get(segment))
}
