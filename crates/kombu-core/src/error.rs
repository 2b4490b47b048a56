//! Error types for Kombu
//!
//! TigerStyle: Explicit error types with context, using thiserror.

use thiserror::Error;

/// Result type alias for Kombu operations
pub type Result<T> = std::result::Result<T, Error>;

/// Kombu error types
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Registry Errors
    // =========================================================================
    #[error("No entry with key '{key}' in registry")]
    NotFound { key: String },

    #[error("Found entry '{key}' of type {actual}, expected type was {requested}")]
    TypeMismatch {
        key: String,
        requested: String,
        actual: String,
    },

    #[error("Could not acquire lock for '{key}': {reason}")]
    LockUnavailable { key: String, reason: String },

    // =========================================================================
    // Codec Errors
    // =========================================================================
    #[error("Value of type {type_tag} is not serializable: {reason}")]
    NotSerializable { type_tag: String, reason: String },

    #[error("Corrupt payload under '{key}': {reason}")]
    CorruptPayload { key: String, reason: String },

    // =========================================================================
    // Validation Errors
    // =========================================================================
    #[error("Invalid key: '{key}', reason: {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("Invalid type tag: '{tag}', reason: {reason}")]
    InvalidTypeTag { tag: String, reason: String },

    #[error("Invalid type relation: {subtype} <: {supertype}, reason: {reason}")]
    InvalidTypeRelation {
        subtype: String,
        supertype: String,
        reason: String,
    },

    #[error("Value too large: {size} bytes exceeds limit of {limit} bytes")]
    ValueTooLarge { size: usize, limit: usize },

    // =========================================================================
    // Storage Errors
    // =========================================================================
    #[error("Storage read failed: {key}, reason: {reason}")]
    StorageReadFailed { key: String, reason: String },

    #[error("Storage write failed: {key}, reason: {reason}")]
    StorageWriteFailed { key: String, reason: String },

    #[error("Session failed: {reason}")]
    SessionFailed { reason: String },

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Invalid configuration: {field}, reason: {reason}")]
    InvalidConfiguration { field: String, reason: String },

    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {reason}")]
    Internal { reason: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create a not found error
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Create a type mismatch error
    pub fn type_mismatch(
        key: impl Into<String>,
        requested: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::TypeMismatch {
            key: key.into(),
            requested: requested.into(),
            actual: actual.into(),
        }
    }

    /// Create a lock unavailable error
    pub fn lock_unavailable(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::LockUnavailable {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Create a corrupt payload error
    pub fn corrupt_payload(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CorruptPayload {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid key error
    pub fn invalid_key(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Create a storage read failed error
    pub fn storage_read_failed(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StorageReadFailed {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Create a storage write failed error
    pub fn storage_write_failed(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StorageWriteFailed {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Create a session failed error
    pub fn session_failed(reason: impl Into<String>) -> Self {
        Self::SessionFailed {
            reason: reason.into(),
        }
    }

    /// Create an internal error
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }

    /// Check if this error is retriable
    ///
    /// Nothing in Kombu retries on its own; callers decide.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::LockUnavailable { .. }
                | Self::StorageReadFailed { .. }
                | Self::StorageWriteFailed { .. }
                | Self::SessionFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::not_found("nonExisting");
        assert!(err.to_string().contains("nonExisting"));

        let err = Error::type_mismatch("k", "i64", "string");
        let msg = err.to_string();
        assert!(msg.contains("i64"));
        assert!(msg.contains("string"));
    }

    #[test]
    fn test_error_is_retriable() {
        assert!(Error::lock_unavailable("k", "held").is_retriable());
        assert!(Error::storage_read_failed("k", "timeout").is_retriable());
        assert!(!Error::not_found("k").is_retriable());
        assert!(!Error::type_mismatch("k", "a", "b").is_retriable());
    }
}
