//! Persistence collaborators: request log, response log, event store.
//!
//! The runtime only appends and reads back; storage engines live behind
//! [`AppendLog`]. [`MemoryLog`] is the in-process reference store, one
//! reader-writer lock per store.

use async_trait::async_trait;
use courier_core::{EventMessage, MessageResult, RaisedException, Request, ValidationError};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// AppendLog trait
// ---------------------------------------------------------------------------

/// Append-only log of entries of type `T`.
#[async_trait]
pub trait AppendLog<T>: Send + Sync {
    /// Appends one entry.
    ///
    /// # Errors
    ///
    /// Returns an error when the backing store rejects the write.
    async fn append(&self, entry: T) -> anyhow::Result<()>;

    /// Returns all entries in append order.
    ///
    /// # Errors
    ///
    /// Returns an error when the backing store cannot be read.
    async fn entries(&self) -> anyhow::Result<Vec<T>>;
}

/// In-memory [`AppendLog`].
#[derive(Debug)]
pub struct MemoryLog<T> {
    entries: RwLock<Vec<T>>,
}

impl<T> MemoryLog<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

impl<T> Default for MemoryLog<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Clone + Send + Sync + 'static> AppendLog<T> for MemoryLog<T> {
    async fn append(&self, entry: T) -> anyhow::Result<()> {
        self.entries.write().push(entry);
        Ok(())
    }

    async fn entries(&self) -> anyhow::Result<Vec<T>> {
        let entries = self.entries.read().clone();
        Ok(entries)
    }
}

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

/// One inbound request, as written by the gateway before routing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEntry {
    pub correlation_id: Uuid,
    /// Id of the request's message envelope.
    pub request_id: Uuid,
    pub parent_request_id: Option<Uuid>,
    pub path: Option<String>,
    pub channel: Option<String>,
    pub message_name: String,
    pub session_id: String,
    pub source_address: String,
    pub principal_id: Option<String>,
    pub timestamp: u64,
    pub body: Value,
}

impl RequestEntry {
    #[must_use]
    pub fn from_request(request: &Request) -> Self {
        let message = request.message();
        Self {
            correlation_id: request.correlation_id(),
            request_id: message.id(),
            parent_request_id: request.parent().map(|p| p.message().id()),
            path: request.path().map(str::to_string),
            channel: request.channel().map(str::to_string),
            message_name: message.name().to_string(),
            session_id: request.session_id().to_string(),
            source_address: request.source_address().to_string(),
            principal_id: request.principal().id.clone(),
            timestamp: message.timestamp(),
            body: message.body().to_json().unwrap_or(Value::Null),
        }
    }
}

/// Outcome of one dispatch, written by the completion stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEntry {
    pub correlation_id: Uuid,
    pub request_id: Uuid,
    pub path: Option<String>,
    pub started: u64,
    pub completed: u64,
    pub elapsed_ms: u64,
    pub is_successful: bool,
    pub validation_errors: Vec<ValidationError>,
    pub exception: Option<RaisedException>,
    pub response: Option<Value>,
}

impl ResponseEntry {
    #[must_use]
    pub fn from_result(path: Option<&str>, result: &MessageResult) -> Self {
        Self {
            correlation_id: result.correlation_id(),
            request_id: result.request_id(),
            path: path.map(str::to_string),
            started: result.started(),
            completed: result.completed(),
            elapsed_ms: result.elapsed_ms(),
            is_successful: result.is_successful(),
            validation_errors: result.validation_errors().to_vec(),
            exception: result.raised_exception().cloned(),
            response: result.response().cloned(),
        }
    }
}

/// A persisted event. `request_id` is the id of the message whose dispatch
/// raised it, so the store can be replayed per originating request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEntry {
    pub event_id: Uuid,
    pub request_id: Uuid,
    pub correlation_id: Uuid,
    pub name: String,
    pub channel: Option<String>,
    pub timestamp: u64,
    pub body: Value,
}

impl EventEntry {
    #[must_use]
    pub fn new(event: &EventMessage, request: &Request) -> Self {
        let envelope = event.envelope();
        Self {
            event_id: envelope.id(),
            request_id: request.message().id(),
            correlation_id: request.correlation_id(),
            name: envelope.name().to_string(),
            channel: event.channel().map(str::to_string),
            timestamp: envelope.timestamp(),
            body: envelope.body().to_json().unwrap_or(Value::Null),
        }
    }
}

pub type RequestLog = dyn AppendLog<RequestEntry>;
pub type ResponseLog = dyn AppendLog<ResponseEntry>;
pub type EventStore = dyn AppendLog<EventEntry>;
