//! Storage error types
//!
//! These are infrastructure failures. Business-rule failures (a grant that is
//! missing, expired or consumed) are reported as `Ok(None)` or as typed
//! validation results by the layers above, never as a [`StoreError`].

use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Failures raised by grant, session and replay-cache backends
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The caller cancelled the operation
    #[error("Storage operation cancelled")]
    Cancelled,

    /// A bulk operation was attempted with a filter that selects nothing specific
    #[error("Invalid grant filter: {reason}")]
    InvalidFilter {
        /// Why the filter was rejected
        reason: String,
    },

    /// A payload could not be serialized or deserialized
    #[error("Grant payload serialization failed: {reason}")]
    Serialization {
        /// Underlying serializer message
        reason: String,
    },

    /// The backing store failed
    #[error("Storage backend failure: {reason}")]
    Backend {
        /// Backend-specific failure description
        reason: String,
    },
}

impl StoreError {
    /// Get error category for metrics and logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::Cancelled => "cancelled",
            Self::InvalidFilter { .. } => "invalid_filter",
            Self::Serialization { .. } => "serialization",
            Self::Backend { .. } => "backend",
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization {
            reason: error.to_string(),
        }
    }
}

/// Return [`StoreError::Cancelled`] if the token has been cancelled
///
/// # Errors
/// Returns `StoreError::Cancelled` when `cancel` is cancelled.
pub fn ensure_active(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(StoreError::Cancelled);
    }
    Ok(())
}
