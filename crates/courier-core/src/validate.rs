//! Payload validation capability.
//!
//! Any payload read through a protocol entry point must implement
//! [`Validate`]; it is invoked once, right after the payload is decoded, and a
//! failure is surfaced as [`PipelineError::Validation`](crate::PipelineError)
//! without a second pipeline pass. Payloads with nothing to check can be
//! wrapped in [`Unvalidated`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A semantic validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("validation failed: {message}")]
pub struct ValidationError {
    message: String,
    field: Option<String>,
}

impl ValidationError {
    /// Creates a validation error with a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            field: None,
        }
    }

    /// Creates a validation error pointing at a specific field.
    #[must_use]
    pub fn for_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Returns the error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the offending field, if known.
    #[must_use]
    pub fn field(&self) -> Option<&str> {
        self.field.as_deref()
    }
}

/// Validation hook invoked after a payload is decoded.
///
/// # Example
///
/// ```
/// use courier_core::{Validate, ValidationError};
///
/// struct CreateUser {
///     name: String,
/// }
///
/// impl Validate for CreateUser {
///     fn validate(&self) -> Result<(), ValidationError> {
///         if self.name.is_empty() {
///             return Err(ValidationError::for_field("name", "must not be empty"));
///         }
///         Ok(())
///     }
/// }
///
/// assert!(CreateUser { name: String::new() }.validate().is_err());
/// ```
pub trait Validate {
    /// Checks the decoded payload.
    fn validate(&self) -> Result<(), ValidationError>;
}

impl Validate for serde_json::Value {
    fn validate(&self) -> Result<(), ValidationError> {
        Ok(())
    }
}

impl Validate for () {
    fn validate(&self) -> Result<(), ValidationError> {
        Ok(())
    }
}

impl<T: Validate> Validate for Option<T> {
    fn validate(&self) -> Result<(), ValidationError> {
        self.as_ref().map_or(Ok(()), Validate::validate)
    }
}

impl<T: Validate> Validate for Vec<T> {
    fn validate(&self) -> Result<(), ValidationError> {
        self.iter().try_for_each(Validate::validate)
    }
}

/// Wrapper for payloads that are always valid.
///
/// Serializes and deserializes exactly like the wrapped value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Unvalidated<T>(pub T);

impl<T> Unvalidated<T> {
    /// Returns the wrapped value.
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> Validate for Unvalidated<T> {
    fn validate(&self) -> Result<(), ValidationError> {
        Ok(())
    }
}

impl<T> std::ops::Deref for Unvalidated<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Positive(i64);

    impl Validate for Positive {
        fn validate(&self) -> Result<(), ValidationError> {
            if self.0 > 0 {
                Ok(())
            } else {
                Err(ValidationError::for_field("value", "must be positive"))
            }
        }
    }

    #[test]
    fn test_option_and_vec_delegate() {
        assert!(None::<Positive>.validate().is_ok());
        assert!(Some(Positive(-1)).validate().is_err());
        assert!(vec![Positive(1), Positive(2)].validate().is_ok());

        let err = vec![Positive(1), Positive(0)].validate().unwrap_err();
        assert_eq!(err.field(), Some("value"));
        assert_eq!(err.message(), "must be positive");
    }

    #[test]
    fn test_unvalidated_is_transparent() {
        let wrapped: Unvalidated<Vec<u32>> = serde_json::from_str("[1,2,3]").unwrap();
        assert!(wrapped.validate().is_ok());
        assert_eq!(wrapped.len(), 3);
        assert_eq!(serde_json::to_string(&wrapped).unwrap(), "[1,2,3]");
        assert_eq!(wrapped.into_inner(), vec![1, 2, 3]);
    }
}
