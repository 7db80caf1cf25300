//! RFC 7009 token revocation
//!
//! Revoking a refresh token also removes the reference access tokens of the
//! same subject, client and session. Revoking a token that belongs to another
//! client is refused silently: the endpoint answers the same way whether or
//! not anything was removed.

use grantline_store::{ReferenceTokenStore, RefreshTokenStore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::Result;
use crate::audit::{AuditLogger, SecurityEvent};
use crate::client::Client;
use crate::errors::GrantFailure;

/// `token_type_hint` values
pub mod token_type_hints {
    pub const ACCESS_TOKEN: &str = "access_token";
    pub const REFRESH_TOKEN: &str = "refresh_token";
}

/// Revocation request from an authenticated client
#[derive(Debug, Clone)]
pub struct TokenRevocationRequest {
    pub token: String,
    pub token_type_hint: Option<String>,
    pub client: Client,
}

impl TokenRevocationRequest {
    pub fn new(token: impl Into<String>, client: Client) -> Self {
        Self {
            token: token.into(),
            token_type_hint: None,
            client,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.token_type_hint = Some(hint.into());
        self
    }
}

/// What happened to the presented token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevocationOutcome {
    Revoked,
    /// Token exists but belongs to another client
    Denied,
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenKind {
    Refresh,
    Reference,
}

/// Removes refresh and reference tokens on client request
#[derive(Debug, Clone)]
pub struct TokenRevocationService {
    refresh_tokens: RefreshTokenStore,
    reference_tokens: ReferenceTokenStore,
    audit: AuditLogger,
}

impl TokenRevocationService {
    pub fn new(refresh_tokens: RefreshTokenStore, reference_tokens: ReferenceTokenStore) -> Self {
        Self {
            refresh_tokens,
            reference_tokens,
            audit: AuditLogger::default(),
        }
    }

    pub fn with_audit(mut self, audit: AuditLogger) -> Self {
        self.audit = audit;
        self
    }

    /// Revoke the presented token
    ///
    /// The hint only decides lookup order; both token kinds are tried.
    /// The outer `Result` carries infrastructure failures, the inner one
    /// request errors (`invalid_request`, `unsupported_token_type`).
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn revoke(
        &self,
        request: &TokenRevocationRequest,
        cancel: &CancellationToken,
    ) -> Result<std::result::Result<RevocationOutcome, GrantFailure>> {
        if request.token.is_empty() {
            return Ok(Err(GrantFailure::malformed("token is missing")));
        }

        let order = match request.token_type_hint.as_deref() {
            None | Some("") | Some(token_type_hints::ACCESS_TOKEN) => [TokenKind::Reference, TokenKind::Refresh],
            Some(token_type_hints::REFRESH_TOKEN) => [TokenKind::Refresh, TokenKind::Reference],
            Some(other) => {
                warn!(client_id = %request.client.client_id, hint = other, "Unsupported token type hint");
                return Ok(Err(GrantFailure::UnsupportedTokenType { hint: other.to_string() }));
            }
        };

        for kind in order {
            let outcome = match kind {
                TokenKind::Refresh => self.revoke_refresh_token(request, cancel).await?,
                TokenKind::Reference => self.revoke_reference_token(request, cancel).await?,
            };
            if outcome != RevocationOutcome::NotFound {
                return Ok(Ok(outcome));
            }
        }

        debug!(client_id = %request.client.client_id, "Revoked token not found");
        Ok(Ok(RevocationOutcome::NotFound))
    }

    async fn revoke_refresh_token(
        &self,
        request: &TokenRevocationRequest,
        cancel: &CancellationToken,
    ) -> Result<RevocationOutcome> {
        let Some(token) = self.refresh_tokens.get_refresh_token(&request.token, cancel).await? else {
            return Ok(RevocationOutcome::NotFound);
        };
        let client_id = &request.client.client_id;
        if &token.client_id != client_id {
            warn!(
                client_id = %client_id,
                token_client_id = %token.client_id,
                "Client denied revoking a refresh token it does not own"
            );
            return Ok(RevocationOutcome::Denied);
        }

        self.refresh_tokens.remove_refresh_token(&request.token, cancel).await?;
        if let Some(subject_id) = token.subject_id() {
            let removed = self
                .reference_tokens
                .remove_reference_tokens(subject_id, client_id, token.session_id.as_deref(), cancel)
                .await?;
            debug!(client_id = %client_id, removed, "Removed reference tokens with revoked refresh token");
        }

        self.audit.log(SecurityEvent::TokenRevoked {
            token_type: token_type_hints::REFRESH_TOKEN.to_string(),
            client_id: client_id.clone(),
            subject_id: token.subject_id().map(str::to_string),
        });
        Ok(RevocationOutcome::Revoked)
    }

    async fn revoke_reference_token(
        &self,
        request: &TokenRevocationRequest,
        cancel: &CancellationToken,
    ) -> Result<RevocationOutcome> {
        let Some(token) = self.reference_tokens.get_reference_token(&request.token, cancel).await? else {
            return Ok(RevocationOutcome::NotFound);
        };
        let client_id = &request.client.client_id;
        if &token.client_id != client_id {
            warn!(
                client_id = %client_id,
                token_client_id = %token.client_id,
                "Client denied revoking an access token it does not own"
            );
            return Ok(RevocationOutcome::Denied);
        }

        self.reference_tokens.remove_reference_token(&request.token, cancel).await?;
        self.audit.log(SecurityEvent::TokenRevoked {
            token_type: token_type_hints::ACCESS_TOKEN.to_string(),
            client_id: client_id.clone(),
            subject_id: token.subject_id().map(str::to_string),
        });
        Ok(RevocationOutcome::Revoked)
    }
}
