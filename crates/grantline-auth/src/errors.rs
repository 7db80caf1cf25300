//! Error types for grant validation and token services
//!
//! Two families:
//!
//! - [`GrantFailure`] - a business-rule rejection. Always reported inside a
//!   result and mapped to an outward [`OAuthErrorCode`].
//! - [`AuthError`] - the storage backend, the replay cache or a collaborator
//!   failed. Returned as `Err` and never converted into `invalid_grant`.

use std::fmt;
use std::path::PathBuf;

use grantline_dpop::DpopError;
use grantline_store::StoreError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Outward OAuth 2.0 token endpoint error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OAuthErrorCode {
    InvalidRequest,
    InvalidClient,
    InvalidGrant,
    UnauthorizedClient,
    UnsupportedGrantType,
    UnsupportedTokenType,
    InvalidScope,
    InvalidTarget,
    InvalidDpopProof,
    AuthorizationPending,
    SlowDown,
    AccessDenied,
    ExpiredToken,
}

impl OAuthErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::InvalidClient => "invalid_client",
            Self::InvalidGrant => "invalid_grant",
            Self::UnauthorizedClient => "unauthorized_client",
            Self::UnsupportedGrantType => "unsupported_grant_type",
            Self::UnsupportedTokenType => "unsupported_token_type",
            Self::InvalidScope => "invalid_scope",
            Self::InvalidTarget => "invalid_target",
            Self::InvalidDpopProof => "invalid_dpop_proof",
            Self::AuthorizationPending => "authorization_pending",
            Self::SlowDown => "slow_down",
            Self::AccessDenied => "access_denied",
            Self::ExpiredToken => "expired_token",
        }
    }
}

impl fmt::Display for OAuthErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A rejected token or grant request
///
/// The `Display` text is the internal reason and belongs in logs only. Use
/// [`GrantFailure::error_description`] for anything sent to the client.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GrantFailure {
    /// Required parameter missing or unusable
    #[error("Malformed request: {reason}")]
    MalformedInput { reason: String },

    /// Client is disabled
    #[error("Client is disabled")]
    ClientDisabled,

    /// Grant type not allowed for this client
    #[error("Grant type not allowed for client: {grant_type}")]
    UnauthorizedGrantType { grant_type: String },

    /// No validator registered for the grant type
    #[error("Unsupported grant type: {grant_type}")]
    UnsupportedGrantType { grant_type: String },

    #[error("Unsupported token type hint: {hint}")]
    UnsupportedTokenType { hint: String },

    #[error("Grant not found")]
    GrantNotFound,

    #[error("Grant expired or consumed")]
    GrantExpiredOrConsumed,

    #[error("Grant was issued to a different client")]
    ClientMismatch,

    #[error("Subject is not active")]
    SubjectInactive,

    /// The user session backing the grant is gone or expired
    #[error("User session is no longer valid")]
    SessionInactive,

    /// A consumed one-time refresh token was presented again
    #[error("Refresh token reuse detected")]
    ReuseDetected,

    /// Grant-specific rule (redirect URI, PKCE, DPoP binding, ...)
    #[error("Policy violation: {reason}")]
    PolicyViolation { reason: String },

    #[error("Invalid scope: {reason}")]
    InvalidScope { reason: String },

    #[error("Resource indicator not allowed: {resource}")]
    InvalidTarget { resource: String },

    /// DPoP proof rejected or missing
    #[error("Invalid DPoP proof: {reason}")]
    InvalidDpopProof {
        reason: String,
        /// Fresh nonce for the `DPoP-Nonce` response header
        server_nonce: Option<String>,
    },

    #[error("Authorization pending")]
    AuthorizationPending,

    #[error("Polling too fast")]
    SlowDown,

    #[error("User denied the request")]
    AccessDenied,

    #[error("Device or backchannel request expired")]
    ExpiredToken,

    /// Rejection raised by an extension grant validator
    #[error("{code}: {}", .description.as_deref().unwrap_or("extension grant rejected"))]
    Extension {
        code: OAuthErrorCode,
        description: Option<String>,
    },
}

impl GrantFailure {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedInput { reason: reason.into() }
    }

    pub(crate) fn policy(reason: impl Into<String>) -> Self {
        Self::PolicyViolation { reason: reason.into() }
    }

    pub(crate) fn scope(reason: impl Into<String>) -> Self {
        Self::InvalidScope { reason: reason.into() }
    }

    pub(crate) fn dpop(reason: impl Into<String>) -> Self {
        Self::InvalidDpopProof {
            reason: reason.into(),
            server_nonce: None,
        }
    }

    /// Outward OAuth error code
    pub fn error_code(&self) -> OAuthErrorCode {
        match self {
            Self::MalformedInput { .. } => OAuthErrorCode::InvalidRequest,
            Self::ClientDisabled => OAuthErrorCode::InvalidClient,
            Self::UnauthorizedGrantType { .. } => OAuthErrorCode::UnauthorizedClient,
            Self::UnsupportedGrantType { .. } => OAuthErrorCode::UnsupportedGrantType,
            Self::UnsupportedTokenType { .. } => OAuthErrorCode::UnsupportedTokenType,
            Self::GrantNotFound
            | Self::GrantExpiredOrConsumed
            | Self::ClientMismatch
            | Self::SubjectInactive
            | Self::SessionInactive
            | Self::ReuseDetected
            | Self::PolicyViolation { .. } => OAuthErrorCode::InvalidGrant,
            Self::InvalidScope { .. } => OAuthErrorCode::InvalidScope,
            Self::InvalidTarget { .. } => OAuthErrorCode::InvalidTarget,
            Self::InvalidDpopProof { .. } => OAuthErrorCode::InvalidDpopProof,
            Self::AuthorizationPending => OAuthErrorCode::AuthorizationPending,
            Self::SlowDown => OAuthErrorCode::SlowDown,
            Self::AccessDenied => OAuthErrorCode::AccessDenied,
            Self::ExpiredToken => OAuthErrorCode::ExpiredToken,
            Self::Extension { code, .. } => *code,
        }
    }

    /// Description safe to return to the client
    ///
    /// `invalid_grant` and `invalid_dpop_proof` never carry one, so callers
    /// cannot tell which check failed.
    pub fn error_description(&self) -> Option<String> {
        match self {
            Self::MalformedInput { reason } => Some(reason.clone()),
            Self::InvalidScope { reason } => Some(reason.clone()),
            Self::UnsupportedGrantType { .. }
            | Self::UnauthorizedGrantType { .. }
            | Self::UnsupportedTokenType { .. }
            | Self::InvalidTarget { .. } => Some(self.to_string()),
            Self::Extension { description, .. } => description.clone(),
            _ => None,
        }
    }

    /// Nonce to surface in `DPoP-Nonce`, if any
    pub fn server_nonce(&self) -> Option<&str> {
        match self {
            Self::InvalidDpopProof { server_nonce, .. } => server_nonce.as_deref(),
            _ => None,
        }
    }

    /// Get error category for metrics and logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::MalformedInput { .. } => "malformed_input",
            Self::ClientDisabled | Self::UnauthorizedGrantType { .. } => "client",
            Self::UnsupportedGrantType { .. } | Self::UnsupportedTokenType { .. } => "unsupported",
            Self::GrantNotFound => "grant_not_found",
            Self::GrantExpiredOrConsumed => "grant_expired_or_consumed",
            Self::ClientMismatch => "client_mismatch",
            Self::SubjectInactive | Self::SessionInactive => "subject_inactive",
            Self::ReuseDetected => "reuse_detected",
            Self::PolicyViolation { .. } | Self::InvalidDpopProof { .. } => "policy_violation",
            Self::InvalidScope { .. } | Self::InvalidTarget { .. } => "scope",
            Self::AuthorizationPending | Self::SlowDown | Self::AccessDenied | Self::ExpiredToken => {
                "polling"
            }
            Self::Extension { .. } => "extension",
        }
    }
}

/// Infrastructure failure surfaced by the token services
#[derive(Debug, Error)]
pub enum AuthError {
    /// Persisted grant, session or replay backend failed
    #[error("Storage failure: {0}")]
    Store(#[from] StoreError),

    /// DPoP infrastructure (replay cache, nonce sealing) failed
    #[error("DPoP infrastructure failure: {0}")]
    Dpop(DpopError),

    /// A collaborator (profile service, notifier, ...) failed
    #[error("{service} failed: {reason}")]
    Collaborator { service: &'static str, reason: String },
}

impl AuthError {
    pub fn collaborator(service: &'static str, reason: impl Into<String>) -> Self {
        Self::Collaborator {
            service,
            reason: reason.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Store(StoreError::Cancelled))
            || matches!(self, Self::Dpop(DpopError::Storage(StoreError::Cancelled)))
    }
}

impl From<DpopError> for AuthError {
    fn from(error: DpopError) -> Self {
        match error {
            DpopError::Storage(store) => Self::Store(store),
            other => Self::Dpop(other),
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    /// Unsupported file format
    #[error("Unsupported configuration file format. Use .toml, .yaml, .yml, or .json")]
    UnsupportedFormat,

    /// Configuration parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] config::ConfigError),

    /// Values parsed but violate a constraint
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
