//! Validation errors and declarative property constraints.
//!
//! Message types declare [`FieldConstraint`]s through
//! [`Message::constraints`](crate::Message::constraints). A constraint
//! addresses a property by dotted path (`customer.address.city`) and is
//! checked against the JSON form of the message by the runtime's input tier.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::Message;

// ---------------------------------------------------------------------------
// ValidationKind / ValidationError
// ---------------------------------------------------------------------------

/// Tier that produced a validation error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ValidationKind {
    /// Not yet attributed to a tier.
    #[default]
    None,
    /// Property constraints and input rules.
    Input,
    /// Authentication and security rules.
    Security,
    /// Business rules.
    Business,
}

/// A recoverable, expected validation failure reported to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationError {
    pub kind: ValidationKind,
    /// Dotted property path the error refers to, if any.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub field: Option<String>,
    pub message: String,
}

impl ValidationError {
    /// Creates an error not bound to a property.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            kind: ValidationKind::None,
            field: None,
            message: message.into(),
        }
    }

    /// Creates an error for the property at `field`.
    pub fn for_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: ValidationKind::None,
            field: Some(field.into()),
            message: message.into(),
        }
    }

    /// The single error returned when a secure endpoint is called anonymously.
    #[must_use]
    pub fn unauthorized() -> Self {
        Self {
            kind: ValidationKind::Security,
            field: None,
            message: "Unauthorized".to_string(),
        }
    }

    /// Re-tags the error with the tier that produced it.
    #[must_use]
    pub fn with_kind(mut self, kind: ValidationKind) -> Self {
        self.kind = kind;
        self
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field {
            Some(field) => write!(f, "{field}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

// ---------------------------------------------------------------------------
// Constraint
// ---------------------------------------------------------------------------

/// Absolute URL: `scheme://host...`. Checked by the constraint tests.
static URL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*://[^\s/?#]+[^\s]*$").expect("invalid url regex")
});

/// A single property predicate.
///
/// Apart from `NotNull`/`NotNullOrWhitespace`, constraints accept a null or
/// absent value; presence is a separate constraint.
#[derive(Debug, Clone)]
pub enum Constraint {
    /// Value must be present and not null.
    NotNull,
    /// Value must be a string with at least one non-whitespace character.
    NotNullOrWhitespace,
    /// Strings and arrays must not be empty.
    NotEmpty,
    /// Number must be strictly greater than the bound.
    GreaterThan(f64),
    /// Number must be greater than or equal to the bound.
    AtLeast(f64),
    /// Number must be strictly less than the bound.
    LessThan(f64),
    /// Strings (chars) and arrays (items) must not exceed the length.
    MaxLength(usize),
    /// String must be an absolute URL (`scheme://host...`).
    WellFormedUrl,
    /// String must match the pattern.
    Matches(Regex),
}

impl Constraint {
    /// Checks `value` (`None` when the property is absent).
    ///
    /// # Errors
    ///
    /// Returns a human-readable description of the violation.
    pub fn check(&self, value: Option<&Value>) -> Result<(), String> {
        let value = match value {
            None | Some(Value::Null) => {
                return match self {
                    Self::NotNull => Err("is required".to_string()),
                    Self::NotNullOrWhitespace => Err("must not be empty".to_string()),
                    _ => Ok(()),
                };
            }
            Some(value) => value,
        };

        match self {
            Self::NotNull => Ok(()),
            Self::NotNullOrWhitespace => match value {
                Value::String(s) if !s.trim().is_empty() => Ok(()),
                _ => Err("must not be empty".to_string()),
            },
            Self::NotEmpty => match value {
                Value::String(s) if s.is_empty() => Err("must not be empty".to_string()),
                Value::Array(items) if items.is_empty() => Err("must not be empty".to_string()),
                _ => Ok(()),
            },
            Self::GreaterThan(bound) => {
                compare(value, |n| n > *bound, || format!("must be greater than {bound}"))
            }
            Self::AtLeast(bound) => {
                compare(value, |n| n >= *bound, || format!("must be at least {bound}"))
            }
            Self::LessThan(bound) => {
                compare(value, |n| n < *bound, || format!("must be less than {bound}"))
            }
            Self::MaxLength(max) => {
                let len = match value {
                    Value::String(s) => s.chars().count(),
                    Value::Array(items) => items.len(),
                    _ => return Ok(()),
                };
                if len > *max {
                    Err(format!("must not exceed {max} characters"))
                } else {
                    Ok(())
                }
            }
            Self::WellFormedUrl => match value {
                Value::String(s) if URL_PATTERN.is_match(s) => Ok(()),
                _ => Err("must be a well-formed absolute URL".to_string()),
            },
            Self::Matches(pattern) => match value {
                Value::String(s) if pattern.is_match(s) => Ok(()),
                _ => Err(format!("must match {}", pattern.as_str())),
            },
        }
    }
}

fn compare(
    value: &Value,
    predicate: impl Fn(f64) -> bool,
    message: impl Fn() -> String,
) -> Result<(), String> {
    match value.as_f64() {
        Some(n) if predicate(n) => Ok(()),
        Some(_) => Err(message()),
        None => Err("must be a number".to_string()),
    }
}

// ---------------------------------------------------------------------------
// FieldConstraint
// ---------------------------------------------------------------------------

/// A constraint bound to a dotted property path.
#[derive(Debug, Clone)]
pub struct FieldConstraint {
    path: String,
    constraint: Constraint,
}

impl FieldConstraint {
    pub fn new(path: impl Into<String>, constraint: Constraint) -> Self {
        Self {
            path: path.into(),
            constraint,
        }
    }

    /// Constraints declared by `T`, re-rooted under the property `prefix`.
    #[must_use]
    pub fn nested<T: Message>(prefix: &str) -> Vec<Self> {
        T::constraints()
            .into_iter()
            .map(|c| Self {
                path: format!("{prefix}.{}", c.path),
                constraint: c.constraint,
            })
            .collect()
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Number of dotted segments in the path.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.path.split('.').count()
    }

    #[must_use]
    pub fn constraint(&self) -> &Constraint {
        &self.constraint
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn not_null_rejects_missing_and_null() {
        assert!(Constraint::NotNull.check(None).is_err());
        assert!(Constraint::NotNull.check(Some(&Value::Null)).is_err());
        assert!(Constraint::NotNull.check(Some(&json!(0))).is_ok());
    }

    #[test]
    fn whitespace_strings_fail_not_null_or_whitespace() {
        let c = Constraint::NotNullOrWhitespace;
        assert!(c.check(Some(&json!("   "))).is_err());
        assert!(c.check(Some(&json!("abc"))).is_ok());
        assert!(c.check(Some(&json!(12))).is_err());
    }

    #[test]
    fn numeric_bounds() {
        let gt = Constraint::GreaterThan(0.0);
        assert!(gt.check(Some(&json!(2))).is_ok());
        assert_eq!(gt.check(Some(&json!(-1))), Err("must be greater than 0".to_string()));
        assert!(gt.check(Some(&json!("2"))).is_err());
        // Absent values are a NotNull concern.
        assert!(gt.check(None).is_ok());
        assert!(Constraint::AtLeast(1.0).check(Some(&json!(1))).is_ok());
        assert!(Constraint::LessThan(10.0).check(Some(&json!(10))).is_err());
    }

    #[test]
    fn url_validation() {
        let c = Constraint::WellFormedUrl;
        assert!(c.check(Some(&json!("https://example.com/a?b=c"))).is_ok());
        assert!(c.check(Some(&json!("example.com"))).is_err());
        assert!(c.check(Some(&json!("http:// bad"))).is_err());
    }

    #[test]
    fn length_and_pattern() {
        assert!(Constraint::MaxLength(3).check(Some(&json!("abcd"))).is_err());
        assert!(Constraint::MaxLength(3).check(Some(&json!([1, 2]))).is_ok());
        assert!(Constraint::NotEmpty.check(Some(&json!([]))).is_err());
        let sku = Constraint::Matches(Regex::new("^[A-Z]{3}$").unwrap());
        assert!(sku.check(Some(&json!("ABC"))).is_ok());
        assert!(sku.check(Some(&json!("abc"))).is_err());
    }

    #[test]
    fn field_constraint_depth_counts_segments() {
        assert_eq!(FieldConstraint::new("qty", Constraint::NotNull).depth(), 1);
        assert_eq!(FieldConstraint::new("a.b.c.d", Constraint::NotNull).depth(), 4);
    }

    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    struct Address {
        city: String,
    }

    impl Message for Address {
        fn constraints() -> Vec<FieldConstraint> {
            vec![FieldConstraint::new("city", Constraint::NotNullOrWhitespace)]
        }
    }

    #[test]
    fn nested_constraints_are_prefixed() {
        let nested = FieldConstraint::nested::<Address>("shipping");
        assert_eq!(nested.len(), 1);
        assert_eq!(nested[0].path(), "shipping.city");
        assert_eq!(nested[0].depth(), 2);
    }

    proptest::proptest! {
        #[test]
        fn numeric_bounds_agree_with_comparison(n in -1.0e6f64..1.0e6, bound in -1.0e6f64..1.0e6) {
            let value = json!(n);
            proptest::prop_assert_eq!(Constraint::GreaterThan(bound).check(Some(&value)).is_ok(), n > bound);
            proptest::prop_assert_eq!(Constraint::AtLeast(bound).check(Some(&value)).is_ok(), n >= bound);
            proptest::prop_assert_eq!(Constraint::LessThan(bound).check(Some(&value)).is_ok(), n < bound);
        }

        #[test]
        fn max_length_counts_chars(s in "\\PC{0,40}", max in 0usize..40) {
            let fits = s.chars().count() <= max;
            proptest::prop_assert_eq!(Constraint::MaxLength(max).check(Some(&json!(s))).is_ok(), fits);
        }
    }

    #[test]
    fn unauthorized_is_security_tagged() {
        let err = ValidationError::unauthorized();
        assert_eq!(err.kind, ValidationKind::Security);
        assert_eq!(err.to_string(), "Unauthorized");
    }
}
