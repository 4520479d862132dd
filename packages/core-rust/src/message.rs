//! Message trait and the erased type descriptor used by the catalog.
//!
//! Rust has no runtime reflection, so every payload type that crosses the
//! dispatch pipeline implements [`Message`]. [`MessageType::of`] captures
//! the metadata the runtime needs (name, kind, channel, default path,
//! property constraints) together with monomorphised encode/decode
//! function pointers, which lets the runtime coerce JSON into the exact
//! request type of an endpoint without knowing it statically.

use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::validation::FieldConstraint;

// ---------------------------------------------------------------------------
// MessageKind
// ---------------------------------------------------------------------------

/// Broad classification of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Asks an endpoint to change state.
    Command,
    /// Asks an endpoint for data without side effects.
    Query,
    /// Announces something that already happened. Events are persisted and
    /// republished after a successful dispatch.
    Event,
}

// ---------------------------------------------------------------------------
// Message trait
// ---------------------------------------------------------------------------

/// A payload type that can be dispatched, validated, and published.
///
/// All metadata hooks have defaults, so a plain command only needs
/// `impl Message for CreateOrder {}`.
pub trait Message: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Logical message name. Defaults to the unqualified type name.
    fn message_name() -> &'static str {
        short_type_name::<Self>()
    }

    /// Message classification.
    fn kind() -> MessageKind {
        MessageKind::Command
    }

    /// Channel an event is published on. Subscribers bound to this channel
    /// (or to the message name) receive it.
    fn channel() -> Option<&'static str> {
        None
    }

    /// Path used when a message is sent without one and no endpoint is
    /// registered for its type.
    fn default_path() -> Option<&'static str> {
        None
    }

    /// Declarative per-property constraints evaluated by the input tier.
    fn constraints() -> Vec<FieldConstraint> {
        Vec::new()
    }
}

/// Untyped JSON payloads. Endpoints whose request type is `Value` accept
/// anything.
impl Message for Value {
    fn message_name() -> &'static str {
        "object"
    }
}

/// Empty response type for handlers that never reply.
impl Message for () {
    fn message_name() -> &'static str {
        "unit"
    }
}

/// Returns the last path segment of `std::any::type_name`, keeping generic
/// arguments intact (`orders::CreateOrder` -> `CreateOrder`).
#[must_use]
pub fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let head = full.split('<').next().unwrap_or(full);
    match head.rfind("::") {
        Some(idx) => &full[idx + 2..],
        None => full,
    }
}

// ---------------------------------------------------------------------------
// MessageType
// ---------------------------------------------------------------------------

type EncodeFn = fn(&(dyn Any + Send + Sync + 'static)) -> serde_json::Result<Value>;
type DecodeFn = fn(Value) -> serde_json::Result<TypedBody>;

/// Erased descriptor of a [`Message`] type.
///
/// Two descriptors are equal when they describe the same Rust type.
#[derive(Clone, Copy)]
pub struct MessageType {
    name: &'static str,
    type_id: TypeId,
    kind: MessageKind,
    channel: Option<&'static str>,
    default_path: Option<&'static str>,
    encode: EncodeFn,
    decode: DecodeFn,
    constraints: fn() -> Vec<FieldConstraint>,
}

impl MessageType {
    /// Captures the descriptor for `T`.
    #[must_use]
    pub fn of<T: Message>() -> Self {
        Self {
            name: T::message_name(),
            type_id: TypeId::of::<T>(),
            kind: T::kind(),
            channel: T::channel(),
            default_path: T::default_path(),
            encode: encode_erased::<T>,
            decode: decode_erased::<T>,
            constraints: T::constraints,
        }
    }

    /// Descriptor of the untyped JSON request type.
    #[must_use]
    pub fn object() -> Self {
        Self::of::<Value>()
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    #[must_use]
    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    #[must_use]
    pub fn is_event(&self) -> bool {
        self.kind == MessageKind::Event
    }

    /// `true` for the untyped JSON request type, which skips coercion.
    #[must_use]
    pub fn is_object(&self) -> bool {
        self.type_id == TypeId::of::<Value>()
    }

    #[must_use]
    pub fn channel(&self) -> Option<&'static str> {
        self.channel
    }

    #[must_use]
    pub fn default_path(&self) -> Option<&'static str> {
        self.default_path
    }

    /// Property constraints declared on the type.
    #[must_use]
    pub fn constraints(&self) -> Vec<FieldConstraint> {
        (self.constraints)()
    }

    /// Deserializes `value` into this type.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error when `value` does not match the type.
    pub fn decode(&self, value: Value) -> serde_json::Result<TypedBody> {
        (self.decode)(value)
    }
}

impl PartialEq for MessageType {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for MessageType {}

impl Hash for MessageType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
    }
}

impl fmt::Debug for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageType")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

fn encode_erased<T: Message>(value: &(dyn Any + Send + Sync + 'static)) -> serde_json::Result<Value> {
    match value.downcast_ref::<T>() {
        Some(typed) => serde_json::to_value(typed),
        None => Err(<serde_json::Error as serde::ser::Error>::custom(format!(
            "payload is not a {}",
            T::message_name()
        ))),
    }
}

fn decode_erased<T: Message>(value: Value) -> serde_json::Result<TypedBody> {
    serde_json::from_value::<T>(value).map(TypedBody::new)
}

// ---------------------------------------------------------------------------
// TypedBody
// ---------------------------------------------------------------------------

/// A strongly typed payload with its type descriptor.
///
/// Cloning is cheap: the value is shared behind an `Arc`.
#[derive(Clone)]
pub struct TypedBody {
    message_type: MessageType,
    value: Arc<dyn Any + Send + Sync>,
}

impl TypedBody {
    /// Wraps a typed message.
    #[must_use]
    pub fn new<T: Message>(value: T) -> Self {
        Self {
            message_type: MessageType::of::<T>(),
            value: Arc::new(value),
        }
    }

    #[must_use]
    pub fn message_type(&self) -> &MessageType {
        &self.message_type
    }

    /// Borrows the payload as `T` when it is exactly that type.
    #[must_use]
    pub fn downcast_ref<T: Message>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// Returns the payload as `T`, casting when the type matches and
    /// round-tripping through JSON otherwise.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error when the payload cannot be converted.
    pub fn to_message<T: Message>(&self) -> serde_json::Result<T> {
        match self.downcast_ref::<T>() {
            Some(typed) => Ok(typed.clone()),
            None => serde_json::from_value(self.to_json()?),
        }
    }

    /// Serializes the payload to JSON.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error raised by the payload's `Serialize` impl.
    pub fn to_json(&self) -> serde_json::Result<Value> {
        (self.message_type.encode)(self.value.as_ref())
    }
}

impl fmt::Debug for TypedBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TypedBody")
            .field(&self.message_type.name)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
