//! Error types for record and event parsing.

use thiserror::Error;

/// Result type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors raised while interpreting remote rows and change payloads.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// The collection name is not one of the synchronized collections.
    #[error("unknown collection: {0}")]
    UnknownCollection(String),

    /// The payload is not a JSON object.
    #[error("payload is not an object")]
    NotAnObject,

    /// The payload has no primary key.
    #[error("payload has no `{field}` key")]
    MissingKey {
        /// Name of the key field.
        field: &'static str,
    },

    /// The primary key is neither a string nor an integer.
    #[error("invalid primary key: {0}")]
    InvalidKey(String),

    /// A field has an unexpected shape.
    #[error("invalid field `{field}`: {reason}")]
    InvalidField {
        /// Field name.
        field: String,
        /// What was wrong with it.
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ModelError::UnknownCollection("carts".into());
        assert_eq!(err.to_string(), "unknown collection: carts");

        let err = ModelError::MissingKey { field: "id" };
        assert!(err.to_string().contains("`id`"));

        let err = ModelError::InvalidField {
            field: "order_items".into(),
            reason: "expected an array".into(),
        };
        assert!(err.to_string().contains("order_items"));
        assert!(err.to_string().contains("expected an array"));
    }
}
