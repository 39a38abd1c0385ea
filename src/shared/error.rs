//! Shared Error Types
//!
//! This module defines the error type used across the sync engine. Remote
//! document stores, local storage, the sync queue and the conflict resolver
//! all report failures through [`SyncError`].
//!
//! # Error Categories
//!
//! - `NetworkError` - Transport failures and unexpected remote responses
//! - `PermissionError` - The remote store rejected the caller's credentials
//! - `NotFoundError` - A document does not exist
//! - `StorageError` - Durable local storage failures
//! - `SerializationError` - JSON serialization/deserialization failures
//! - `ValidationError` - Malformed mutations rejected before they are queued
//! - `ManualResolutionRequired` - A conflict needs a user decision
//!
//! # Usage
//!
//! ```rust
//! use piggybank_sync::shared::error::SyncError;
//!
//! let error = SyncError::validation("quantity", "quantity cannot be negative");
//! assert!(!error.is_retryable());
//! ```
//!
//! # Thread Safety
//!
//! All error types are `Send + Sync + Clone` so they can be stored in shared
//! state and broadcast to several listeners.
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors raised by the sync engine and its collaborators
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SyncError {
    /// The remote store could not be reached or answered unexpectedly
    #[error("Network error: {message}")]
    NetworkError {
        /// Human-readable error message
        message: String,
    },

    /// The remote store refused the request
    #[error("Permission denied: {message}")]
    PermissionError {
        /// Human-readable error message
        message: String,
    },

    /// The addressed document does not exist
    #[error("Document '{document_id}' not found in '{collection}'")]
    NotFoundError {
        /// Collection that was searched
        collection: String,
        /// Missing document id
        document_id: String,
    },

    /// Durable local storage failed
    #[error("Storage error: {message}")]
    StorageError {
        /// Human-readable error message
        message: String,
    },

    /// JSON serialization or deserialization error
    #[error("Serialization error: {message}")]
    SerializationError {
        /// Human-readable error message
        message: String,
    },

    /// Data validation error
    #[error("Validation error in field '{field}': {message}")]
    ValidationError {
        /// The field that failed validation
        field: String,
        /// Human-readable error message
        message: String,
    },

    /// The manual strategy was selected, so the caller must pick a version
    #[error("Conflict in '{collection}' requires manual resolution")]
    ManualResolutionRequired {
        /// Collection with diverging versions
        collection: String,
    },

    /// A mutator was invoked without a signed-in user
    #[error("No authenticated user")]
    NotAuthenticated,

    /// The action is blocked by a rate limiter
    #[error("Too many attempts, retry in {retry_after_secs}s")]
    RateLimited {
        /// Seconds until the block expires
        retry_after_secs: u64,
    },
}

impl SyncError {
    /// Create a new network error
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError {
            message: message.into(),
        }
    }

    /// Create a new permission error
    pub fn permission(message: impl Into<String>) -> Self {
        Self::PermissionError {
            message: message.into(),
        }
    }

    /// Create a new not-found error
    pub fn not_found(collection: impl Into<String>, document_id: impl Into<String>) -> Self {
        Self::NotFoundError {
            collection: collection.into(),
            document_id: document_id.into(),
        }
    }

    /// Create a new storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::StorageError {
            message: message.into(),
        }
    }

    /// Create a new serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ValidationError {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new manual-resolution signal
    pub fn manual_resolution(collection: impl Into<String>) -> Self {
        Self::ManualResolutionRequired {
            collection: collection.into(),
        }
    }

    /// Whether a write that failed with this error should be queued for retry
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NetworkError { .. } | Self::StorageError { .. })
    }

    /// Whether this error proves the remote store is reachable
    pub fn is_permission(&self) -> bool {
        matches!(self, Self::PermissionError { .. })
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(format!("JSON error: {}", err))
    }
}

impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        Self::storage(format!("SQLite error: {}", err))
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::network(format!("request timed out: {}", err));
        }
        match err.status().map(|status| status.as_u16()) {
            Some(401) | Some(403) => Self::permission(err.to_string()),
            _ => Self::network(err.to_string()),
        }
    }
}
