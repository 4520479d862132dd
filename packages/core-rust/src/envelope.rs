//! Transport envelopes for commands and events.

use serde::Serialize;
use uuid::Uuid;

use crate::body::MessageBody;
use crate::message::{Message, MessageType, TypedBody};

// ---------------------------------------------------------------------------
// MessageEnvelope
// ---------------------------------------------------------------------------

/// Wrapper around a payload with a unique id, name, and timestamp.
///
/// Envelopes compare equal when their ids match, whatever the body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEnvelope {
    id: Uuid,
    name: String,
    body: MessageBody,
    #[serde(skip)]
    message_type: Option<MessageType>,
    timestamp: u64,
}

impl MessageEnvelope {
    /// Wraps `body` in a fresh envelope stamped at `timestamp` (epoch millis).
    #[must_use]
    pub fn new(body: MessageBody, timestamp: u64) -> Self {
        let message_type = body.message_type().copied();
        let name = message_type.map_or_else(
            || match &body {
                MessageBody::Empty => "empty".to_string(),
                _ => "object".to_string(),
            },
            |ty| ty.name().to_string(),
        );
        Self {
            id: Uuid::new_v4(),
            name,
            body,
            message_type,
            timestamp,
        }
    }

    /// Wraps a typed message.
    #[must_use]
    pub fn typed<T: Message>(message: T, timestamp: u64) -> Self {
        Self::new(MessageBody::typed(message), timestamp)
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn body(&self) -> &MessageBody {
        &self.body
    }

    #[must_use]
    pub fn message_type(&self) -> Option<&MessageType> {
        self.message_type.as_ref()
    }

    #[must_use]
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Typed payload, when the body has been coerced or was sent typed.
    #[must_use]
    pub fn typed_body(&self) -> Option<&TypedBody> {
        match &self.body {
            MessageBody::Typed(body) => Some(body),
            _ => None,
        }
    }
}

impl PartialEq for MessageEnvelope {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for MessageEnvelope {}

// ---------------------------------------------------------------------------
// EventMessage
// ---------------------------------------------------------------------------

/// An event envelope plus the channel it is published on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMessage {
    envelope: MessageEnvelope,
    #[serde(skip_serializing_if = "Option::is_none")]
    channel: Option<String>,
}

impl EventMessage {
    /// Wraps a typed event, publishing on its declared channel.
    #[must_use]
    pub fn new<E: Message>(event: E, timestamp: u64) -> Self {
        Self::from_body(TypedBody::new(event), timestamp)
    }

    /// Wraps an already-erased event body.
    #[must_use]
    pub fn from_body(body: TypedBody, timestamp: u64) -> Self {
        let channel = body.message_type().channel().map(str::to_string);
        Self {
            envelope: MessageEnvelope::new(MessageBody::Typed(body), timestamp),
            channel,
        }
    }

    /// Publishes `body` on an explicit channel.
    #[must_use]
    pub fn on_channel(channel: impl Into<String>, body: MessageBody, timestamp: u64) -> Self {
        Self {
            envelope: MessageEnvelope::new(body, timestamp),
            channel: Some(channel.into()),
        }
    }

    #[must_use]
    pub fn envelope(&self) -> &MessageEnvelope {
        &self.envelope
    }

    #[must_use]
    pub fn channel(&self) -> Option<&str> {
        self.channel.as_deref()
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.envelope.name()
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.envelope.id()
    }
}

// ---------------------------------------------------------------------------
// Incoming
// ---------------------------------------------------------------------------

/// What a caller hands to `send`: either a prepared envelope, used
/// unchanged, or a bare body that gets a fresh envelope after coercion.
#[derive(Debug, Clone)]
pub enum Incoming {
    Envelope(MessageEnvelope),
    Body(MessageBody),
}

impl Incoming {
    /// Wraps a typed message.
    #[must_use]
    pub fn typed<T: Message>(message: T) -> Self {
        Self::Body(MessageBody::typed(message))
    }

    /// The body, whichever form it arrived in.
    #[must_use]
    pub fn body(&self) -> &MessageBody {
        match self {
            Self::Envelope(envelope) => envelope.body(),
            Self::Body(body) => body,
        }
    }
}

impl Default for Incoming {
    fn default() -> Self {
        Self::Body(MessageBody::Empty)
    }
}

impl From<MessageEnvelope> for Incoming {
    fn from(envelope: MessageEnvelope) -> Self {
        Self::Envelope(envelope)
    }
}

impl From<MessageBody> for Incoming {
    fn from(body: MessageBody) -> Self {
        Self::Body(body)
    }
}

impl From<TypedBody> for Incoming {
    fn from(body: TypedBody) -> Self {
        Self::Body(MessageBody::Typed(body))
    }
}

impl From<serde_json::Value> for Incoming {
    fn from(value: serde_json::Value) -> Self {
        Self::Body(MessageBody::Json(value))
    }
}

impl From<&str> for Incoming {
    fn from(text: &str) -> Self {
        Self::Body(MessageBody::from(text))
    }
}

impl From<String> for Incoming {
    fn from(text: String) -> Self {
        Self::Body(MessageBody::Raw(text))
    }
}

impl From<Option<String>> for Incoming {
    fn from(text: Option<String>) -> Self {
        Self::Body(MessageBody::from(text))
    }
}
