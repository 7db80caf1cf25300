//! # Grantline Auth - Grant Validation and Token Lifecycle
//!
//! The token endpoint logic of an OAuth 2.0 / OpenID Connect authorization
//! server, built on [`grantline_store`] for persistence and [`grantline_dpop`]
//! for proof-of-possession.
//!
//! ## Design Principles
//!
//! - **Single-use means single-use**: authorization codes, device codes and
//!   one-time refresh tokens are consumed through atomic store operations
//! - **Rejections are values**: business-rule failures come back in results
//!   and map to OAuth error codes; `Err` always means infrastructure failed
//! - **Opaque `invalid_grant`**: clients never learn which check failed
//!
//! ## Architecture
//!
//! - [`validation`] - [`GrantRequestValidator`] and the per-grant validators
//! - [`refresh`] - [`RefreshTokenService`]: validation, issuance, rotation and
//!   reuse detection
//! - [`session`] - [`SessionCoordinationService`]: grant lifetimes tied to
//!   server-side user sessions
//! - [`revocation`] - RFC 7009 [`TokenRevocationService`]
//! - [`cleanup`] - [`TokenCleanupService`] for expired grants and sessions
//! - [`audit`] - security events on the `audit::grants` tracing target
//! - [`services`] - collaborator traits the hosting server implements
//! - [`config`] - [`ServerOptions`] from code, files or environment
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use grantline_auth::validation::{ClientCredentialsValidator, GrantRequestValidator, TokenRequest};
//! use grantline_auth::{Client, grant_types};
//! use grantline_store::CancellationToken;
//!
//! # tokio_test::block_on(async {
//! let validator = GrantRequestValidator::builder()
//!     .grant(Arc::new(ClientCredentialsValidator))
//!     .build();
//!
//! let client = Client::new("reporting")
//!     .with_grant_types([grant_types::CLIENT_CREDENTIALS])
//!     .with_scopes(["metrics.read"]);
//!
//! let result = validator
//!     .validate(
//!         &TokenRequest::new(grant_types::CLIENT_CREDENTIALS, client),
//!         &CancellationToken::new(),
//!     )
//!     .await
//!     .unwrap();
//!
//! assert!(!result.is_error());
//! assert_eq!(result.validated_request.unwrap().scopes, vec!["metrics.read"]);
//! # });
//! ```
//!
//! ## Standards Compliance
//!
//! - **RFC 6749** - OAuth 2.0 Authorization Framework
//! - **RFC 7009** - Token Revocation
//! - **RFC 7636** - Proof Key for Code Exchange (PKCE)
//! - **RFC 8628** - Device Authorization Grant
//! - **RFC 8707** - Resource Indicators
//! - **RFC 9449** - Demonstrating Proof-of-Possession (DPoP)
//! - **OpenID Connect CIBA** - Client-Initiated Backchannel Authentication

pub mod audit;
pub mod cleanup;
pub mod client;
pub mod config;
pub mod errors;
pub mod refresh;
pub mod revocation;
pub mod services;
pub mod session;
pub mod validation;

pub use audit::{AuditLogger, AuditRecord, MemoryEventSink, SecurityEvent, SecurityEventSink};
pub use cleanup::{CleanupReport, TokenCleanupService};
pub use client::{Client, OFFLINE_ACCESS_SCOPE, TokenExpiration, TokenUsage, grant_types};
pub use config::{RefreshTokenReusePolicy, ServerOptions};
pub use errors::{AuthError, ConfigError, GrantFailure, OAuthErrorCode};
pub use refresh::{
    RefreshTokenCreationRequest, RefreshTokenService, RefreshTokenUpdateRequest, TokenValidationResult,
};
pub use revocation::{RevocationOutcome, TokenRevocationRequest, TokenRevocationService};
pub use services::{
    AlwaysActiveProfileService, BackChannelLogoutNotifier, ClientStore, InMemoryClientStore, ProfileCaller,
    ProfileService, ResourceOwnerPasswordValidator,
};
pub use session::SessionCoordinationService;
pub use validation::{GrantRequestValidator, GrantValidationResult, TokenRequest, ValidatedTokenRequest};

/// Result type for the token services
pub type Result<T> = std::result::Result<T, AuthError>;
