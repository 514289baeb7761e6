//! Domain error types
//!
//! Errors raised while building domain values or validating configuration,
//! before any I/O against a store or a remote system takes place.

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A listed entry carried an empty or otherwise unusable path
    #[error("Invalid entry path: {0}")]
    InvalidPath(String),

    /// A cursor key could not be built
    #[error("Invalid cursor key: {0}")]
    InvalidKey(String),

    /// A glob or regex name filter failed to compile
    #[error("Invalid name filter '{pattern}': {reason}")]
    InvalidPattern {
        /// The offending pattern as configured
        pattern: String,
        /// Why the pattern was rejected
        reason: String,
    },

    /// The configuration file failed validation
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A cursor store was asked for an operation its backend cannot perform
    #[error("Operation '{operation}' is not supported by the {backend} cursor store")]
    Unsupported {
        /// Backend name, e.g. "hazelcast"
        backend: String,
        /// The operation that was attempted
        operation: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DomainError::InvalidPath(String::new());
        assert_eq!(err.to_string(), "Invalid entry path: ");

        let err = DomainError::InvalidPattern {
            pattern: "[".to_string(),
            reason: "unclosed".to_string(),
        };
        assert_eq!(err.to_string(), "Invalid name filter '[': unclosed");

        let err = DomainError::Unsupported {
            backend: "hazelcast".to_string(),
            operation: "replace".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Operation 'replace' is not supported by the hazelcast cursor store"
        );
    }

    #[test]
    fn test_error_equality() {
        let err1 = DomainError::InvalidKey("a".to_string());
        let err2 = DomainError::InvalidKey("a".to_string());
        let err3 = DomainError::InvalidKey("b".to_string());

        assert_eq!(err1, err2);
        assert_ne!(err1, err3);
    }
}
