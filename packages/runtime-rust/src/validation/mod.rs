//! Validation pipeline: input, security, and business tiers.
//!
//! Tiers run in that order and the first tier that reports anything ends
//! validation. The input tier reports every failed property constraint;
//! input rules only run once all constraints pass, and their failures are
//! accumulated. The security and business tiers stop at the first failing
//! rule. A secure endpoint called by an
//! unauthenticated principal fails with a single `Unauthorized` error
//! before any tier runs.

pub mod input;

use courier_core::{TypedBody, ValidationError, ValidationKind};
use tracing::debug;

use crate::catalog::RuleTier;
use crate::execution::ExecutionContext;

/// Runs the rule tiers for one dispatch.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidationPipeline;

impl ValidationPipeline {
    /// Validates `body` (already coerced into the endpoint's request type)
    /// and returns the failures of the first failing tier, tagged with
    /// that tier's kind.
    pub async fn validate(&self, ctx: &ExecutionContext, body: &TypedBody) -> Vec<ValidationError> {
        let endpoint = ctx.endpoint();

        if endpoint.is_secure() && !ctx.request().principal().is_authenticated() {
            debug!(endpoint = endpoint.label(), "unauthenticated call to secure endpoint");
            return vec![ValidationError::unauthorized()];
        }

        let constraint_errors = match body.to_json() {
            Ok(json) => input::check_constraints(body.message_type(), &json),
            Err(err) => vec![ValidationError::new(format!("message could not be inspected: {err}"))],
        };
        if !constraint_errors.is_empty() {
            return tag(constraint_errors, ValidationKind::Input);
        }

        let mut errors = Vec::new();
        for rule in endpoint.rules().iter().filter(|r| r.tier() == RuleTier::Input) {
            errors.extend(rule.check(ctx, body).await);
        }
        if !errors.is_empty() {
            return tag(errors, ValidationKind::Input);
        }

        for tier in [RuleTier::Security, RuleTier::Business] {
            for rule in endpoint.rules().iter().filter(|r| r.tier() == tier) {
                let errors = rule.check(ctx, body).await;
                if !errors.is_empty() {
                    debug!(
                        endpoint = endpoint.label(),
                        rule = rule.descriptor().name,
                        ?tier,
                        "rule failed"
                    );
                    return tag(errors, tier.kind());
                }
            }
        }

        Vec::new()
    }
}

fn tag(errors: Vec<ValidationError>, kind: ValidationKind) -> Vec<ValidationError> {
    errors.into_iter().map(|e| e.with_kind(kind)).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
