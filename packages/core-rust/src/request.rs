//! Inbound request model: caller identity, origin, and the parent call tree.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::envelope::MessageEnvelope;

// ---------------------------------------------------------------------------
// Principal
// ---------------------------------------------------------------------------

/// Identity of the caller.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub id: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub authenticated: bool,
}

impl Principal {
    /// Unauthenticated caller with no roles.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Authenticated caller.
    pub fn user(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            roles: Vec::new(),
            authenticated: true,
        }
    }

    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

// ---------------------------------------------------------------------------
// Origin
// ---------------------------------------------------------------------------

/// Caller-supplied identity for a root request.
///
/// Inbound transports fill whatever they know; missing values are
/// generated or defaulted when the request is resolved. Ignored for nested
/// requests, which always inherit from their parent.
#[derive(Debug, Clone, Default)]
pub struct Origin {
    pub correlation_id: Option<Uuid>,
    pub session_id: Option<String>,
    pub source_address: Option<String>,
    pub principal: Option<Principal>,
}

impl Origin {
    #[must_use]
    pub fn with_correlation_id(mut self, id: Uuid) -> Self {
        self.correlation_id = Some(id);
        self
    }

    #[must_use]
    pub fn with_session_id(mut self, id: impl Into<String>) -> Self {
        self.session_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_source_address(mut self, address: impl Into<String>) -> Self {
        self.source_address = Some(address.into());
        self
    }

    #[must_use]
    pub fn with_principal(mut self, principal: Principal) -> Self {
        self.principal = Some(principal);
        self
    }
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// Field values for [`Request::from_parts`].
#[derive(Debug, Clone)]
pub struct RequestParts {
    pub correlation_id: Uuid,
    pub source_address: String,
    pub session_id: String,
    pub principal: Principal,
    pub parent: Option<Arc<Request>>,
    pub path: Option<String>,
    pub message: MessageEnvelope,
    pub channel: Option<String>,
}

/// One inbound call. Immutable once built.
#[derive(Debug, Clone)]
pub struct Request {
    correlation_id: Uuid,
    source_address: String,
    session_id: String,
    principal: Principal,
    parent: Option<Arc<Request>>,
    path: Option<String>,
    message: MessageEnvelope,
    channel: Option<String>,
}

impl Request {
    #[must_use]
    pub fn from_parts(parts: RequestParts) -> Self {
        Self {
            correlation_id: parts.correlation_id,
            source_address: parts.source_address,
            session_id: parts.session_id,
            principal: parts.principal,
            parent: parts.parent,
            path: parts.path,
            message: parts.message,
            channel: parts.channel,
        }
    }

    #[must_use]
    pub fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    #[must_use]
    pub fn source_address(&self) -> &str {
        &self.source_address
    }

    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    #[must_use]
    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    #[must_use]
    pub fn parent(&self) -> Option<&Arc<Request>> {
        self.parent.as_ref()
    }

    #[must_use]
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    #[must_use]
    pub fn message(&self) -> &MessageEnvelope {
        &self.message
    }

    #[must_use]
    pub fn channel(&self) -> Option<&str> {
        self.channel.as_deref()
    }

    /// Number of ancestors; 0 for a root request.
    #[must_use]
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut current = self.parent.as_deref();
        while let Some(parent) = current {
            depth += 1;
            current = parent.parent.as_deref();
        }
        depth
    }

    /// Root of the call tree.
    #[must_use]
    pub fn root(&self) -> &Request {
        let mut current = self;
        while let Some(parent) = current.parent.as_deref() {
            current = parent;
        }
        current
    }
}
