//! DPoP validation error types
//!
//! Every variant except [`DpopError::Storage`] and [`DpopError::Crypto`] is a
//! rule violation reported inside a validation result. The detailed message is
//! for logs; clients only ever see `invalid_dpop_proof`.

use grantline_store::StoreError;
use thiserror::Error;

/// Outward OAuth error code for every DPoP failure
pub const INVALID_DPOP_PROOF: &str = "invalid_dpop_proof";

/// DPoP validation failures
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DpopError {
    /// No proof was supplied
    #[error("Missing DPoP proof value")]
    MissingProof,

    /// The proof is not a well-formed compact JWT
    #[error("Malformed DPoP token: {reason}")]
    Malformed {
        /// What could not be parsed
        reason: String,
    },

    /// Disallowed `typ`, algorithm or key material
    #[error("{reason}")]
    PolicyViolation {
        /// Which policy rejected the proof
        reason: String,
    },

    /// The embedded key did not verify the signature
    #[error("Invalid signature on DPoP token.")]
    InvalidSignature,

    /// A required claim is missing or does not match the request
    #[error("{reason}")]
    FieldMismatch {
        /// Which claim failed
        reason: String,
    },

    /// `iat` outside the accepted window
    #[error("{reason}")]
    Expired {
        /// Freshness failure description
        reason: String,
    },

    /// The `jti` was already seen
    #[error("Detected DPoP proof token replay.")]
    Replayed,

    /// Nonce freshness failed; a new server nonce accompanies this error
    #[error("{reason}")]
    NonceMissingOrInvalid {
        /// Nonce failure description
        reason: String,
    },

    /// The replay cache backend failed
    #[error("DPoP replay cache failure: {0}")]
    Storage(#[from] StoreError),

    /// Server-side cryptographic primitive failed (nonce sealing)
    #[error("DPoP cryptographic failure: {reason}")]
    Crypto {
        /// Failure description
        reason: String,
    },
}

impl DpopError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed { reason: reason.into() }
    }

    pub(crate) fn policy(reason: impl Into<String>) -> Self {
        Self::PolicyViolation { reason: reason.into() }
    }

    pub(crate) fn field(reason: impl Into<String>) -> Self {
        Self::FieldMismatch { reason: reason.into() }
    }

    /// Whether this is a server-side failure rather than a bad proof
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Crypto { .. })
    }

    /// Whether the caller must send a fresh `DPoP-Nonce`
    pub fn requires_nonce(&self) -> bool {
        matches!(self, Self::NonceMissingOrInvalid { .. })
    }

    /// Outward OAuth error code
    pub fn error_code(&self) -> &'static str {
        INVALID_DPOP_PROOF
    }

    /// Get error category for metrics and logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::MissingProof | Self::Malformed { .. } => "malformed_input",
            Self::PolicyViolation { .. } | Self::InvalidSignature => "policy_violation",
            Self::FieldMismatch { .. } => "field_mismatch",
            Self::Expired { .. } => "expired",
            Self::Replayed => "replayed",
            Self::NonceMissingOrInvalid { .. } => "nonce",
            Self::Storage(_) | Self::Crypto { .. } => "infrastructure",
        }
    }
}
