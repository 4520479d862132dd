//! Message body variants and the coercion into an endpoint's request type.

use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::error::DispatchError;
use crate::message::{Message, MessageType, TypedBody};

/// Payload carried by a [`MessageEnvelope`](crate::MessageEnvelope).
///
/// Inbound transports hand over raw JSON text (`Raw`) or nothing at all
/// (`Empty`); in-process callers hand over typed messages (`Typed`) or
/// already-parsed JSON (`Json`). [`MessageBody::coerce_to`] turns any of
/// these into the exact request type of the target endpoint.
#[derive(Debug, Clone, Default)]
pub enum MessageBody {
    Typed(TypedBody),
    Json(Value),
    Raw(String),
    #[default]
    Empty,
}

impl MessageBody {
    /// Wraps a typed message.
    #[must_use]
    pub fn typed<T: Message>(message: T) -> Self {
        Self::Typed(TypedBody::new(message))
    }

    /// Type of the payload when it is already typed.
    #[must_use]
    pub fn message_type(&self) -> Option<&MessageType> {
        match self {
            Self::Typed(body) => Some(body.message_type()),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Coerces the body into `target`.
    ///
    /// - a typed body of the same type is reused without a round-trip;
    /// - raw text is parsed as JSON into the target (empty text reads as
    ///   `{}` so defaults apply); an untyped target keeps unparseable text
    ///   as a JSON string;
    /// - anything else is converted through its JSON form.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Deserialization`] when the payload does not
    /// fit the target type.
    pub fn coerce_to(&self, target: &MessageType) -> Result<TypedBody, DispatchError> {
        let fail = |source: serde_json::Error| DispatchError::Deserialization {
            type_name: target.name(),
            source,
        };

        match self {
            Self::Typed(body) if body.message_type() == target => Ok(body.clone()),
            Self::Typed(body) => {
                let json = body.to_json().map_err(fail)?;
                target.decode(json).map_err(fail)
            }
            Self::Json(value) => target.decode(value.clone()).map_err(fail),
            Self::Raw(text) if target.is_object() => {
                let value = if text.trim().is_empty() {
                    Value::Null
                } else {
                    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.clone()))
                };
                Ok(TypedBody::new(value))
            }
            Self::Raw(text) => {
                let text = if text.trim().is_empty() { "{}" } else { text.as_str() };
                let value: Value = serde_json::from_str(text).map_err(fail)?;
                target.decode(value).map_err(fail)
            }
            Self::Empty if target.is_object() => Ok(TypedBody::new(Value::Null)),
            Self::Empty => target
                .decode(Value::Object(serde_json::Map::new()))
                .map_err(fail),
        }
    }

    /// JSON projection of the body, as stored in request logs and sent to
    /// remote routers.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error when a typed payload fails to
    /// serialize.
    pub fn to_json(&self) -> serde_json::Result<Value> {
        match self {
            Self::Typed(body) => body.to_json(),
            Self::Json(value) => Ok(value.clone()),
            Self::Raw(text) => Ok(serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.clone()))),
            Self::Empty => Ok(Value::Null),
        }
    }
}

impl From<TypedBody> for MessageBody {
    fn from(body: TypedBody) -> Self {
        Self::Typed(body)
    }
}

impl From<Value> for MessageBody {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

impl From<String> for MessageBody {
    fn from(text: String) -> Self {
        Self::Raw(text)
    }
}

impl From<&str> for MessageBody {
    fn from(text: &str) -> Self {
        Self::Raw(text.to_string())
    }
}

impl From<Option<String>> for MessageBody {
    fn from(text: Option<String>) -> Self {
        text.map_or(Self::Empty, Self::Raw)
    }
}

impl Serialize for MessageBody {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Typed(_) | Self::Raw(_) => self
                .to_json()
                .map_err(serde::ser::Error::custom)?
                .serialize(serializer),
            Self::Json(value) => value.serialize(serializer),
            Self::Empty => serializer.serialize_none(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::json;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
    struct CreateOrder {
        #[serde(default)]
        sku: String,
        #[serde(default)]
        qty: i64,
    }

    impl Message for CreateOrder {}

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct LegacyCreateOrder {
        sku: String,
        qty: i64,
    }

    impl Message for LegacyCreateOrder {}

    fn target() -> MessageType {
        MessageType::of::<CreateOrder>()
    }

    #[test]
    fn same_type_is_reused() {
        let body = MessageBody::typed(CreateOrder {
            sku: "ABC".into(),
            qty: 2,
        });
        let coerced = body.coerce_to(&target()).unwrap();
        assert_eq!(coerced.downcast_ref::<CreateOrder>().unwrap().qty, 2);
    }

    #[test]
    fn other_types_round_trip_through_json() {
        let body = MessageBody::typed(LegacyCreateOrder {
            sku: "XYZ".into(),
            qty: 5,
        });
        let coerced = body.coerce_to(&target()).unwrap();
        assert_eq!(
            coerced.downcast_ref::<CreateOrder>(),
            Some(&CreateOrder {
                sku: "XYZ".into(),
                qty: 5
            })
        );
    }

    #[test]
    fn raw_json_is_parsed_into_target() {
        let body = MessageBody::from(r#"{ "sku": "ABC", "qty": 2 }"#);
        let coerced = body.coerce_to(&target()).unwrap();
        assert_eq!(coerced.downcast_ref::<CreateOrder>().unwrap().sku, "ABC");
    }

    #[test]
    fn empty_raw_text_fills_defaults() {
        let coerced = MessageBody::from("  ").coerce_to(&target()).unwrap();
        assert_eq!(coerced.downcast_ref::<CreateOrder>(), Some(&CreateOrder::default()));
        let coerced = MessageBody::Empty.coerce_to(&target()).unwrap();
        assert_eq!(coerced.downcast_ref::<CreateOrder>(), Some(&CreateOrder::default()));
    }

    #[test]
    fn malformed_json_is_a_deserialization_error() {
        let err = MessageBody::from("{ not json").coerce_to(&target()).unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Deserialization {
                type_name: "CreateOrder",
                ..
            }
        ));
    }

    #[test]
    fn object_target_keeps_unparseable_text_as_string() {
        let object = MessageType::object();
        let coerced = MessageBody::from("hello").coerce_to(&object).unwrap();
        assert_eq!(coerced.downcast_ref::<Value>(), Some(&json!("hello")));
        let coerced = MessageBody::from("[1,2]").coerce_to(&object).unwrap();
        assert_eq!(coerced.downcast_ref::<Value>(), Some(&json!([1, 2])));
    }

    #[test]
    fn serializes_as_plain_json() {
        let body = MessageBody::typed(CreateOrder {
            sku: "A".into(),
            qty: 1,
        });
        assert_eq!(serde_json::to_value(&body).unwrap(), json!({ "sku": "A", "qty": 1 }));
        assert_eq!(serde_json::to_value(MessageBody::Empty).unwrap(), Value::Null);
    }
}
