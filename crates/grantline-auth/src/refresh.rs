//! Refresh token validation, issuance and rotation
//!
//! One-time refresh tokens are rotated on every use. The previous handle is
//! kept, marked consumed, so a second presentation is recognised as reuse
//! and handled per [`RefreshTokenReusePolicy`]. Consumption is a single
//! store operation, so of two concurrent refreshes only one rotates.

use std::sync::Arc;

use grantline_store::{Clock, Principal, ProofType, RefreshToken, RefreshTokenStore, Token};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::Result;
use crate::audit::{AuditLogger, RevocationReason, SecurityEvent};
use crate::client::{Client, TokenExpiration, TokenUsage};
use crate::config::{PersistentGrantOptions, RefreshTokenReusePolicy, ServerOptions};
use crate::errors::GrantFailure;
use crate::services::{ProfileCaller, ProfileService};
use crate::session::SessionCoordinationService;

/// Outcome of validating a presented refresh token
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenValidationResult {
    Valid(Box<RefreshToken>),
    Invalid(GrantFailure),
}

impl TokenValidationResult {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Invalid(_))
    }
}

/// Inputs for issuing a new refresh token
#[derive(Debug, Clone)]
pub struct RefreshTokenCreationRequest {
    pub subject: Principal,
    pub client: Client,
    /// Access token issued alongside
    pub access_token: Token,
    /// Resource indicator the access token was minted for
    pub requested_resource: Option<String>,
    pub authorized_scopes: Vec<String>,
    /// `None` leaves the token unrestricted
    pub authorized_resource_indicators: Option<Vec<String>>,
    pub proof_type: ProofType,
    pub description: Option<String>,
}

/// Inputs for refreshing an existing token
#[derive(Debug, Clone)]
pub struct RefreshTokenUpdateRequest {
    /// Handle the client presented
    pub handle: String,
    /// Token as returned by validation
    pub refresh_token: RefreshToken,
    pub client: Client,
    /// Freshly minted access token
    pub access_token: Option<Token>,
    pub requested_resource: Option<String>,
    /// Write the token back even if nothing else changed
    pub must_update: bool,
}

/// Validates, issues and rotates refresh tokens
#[derive(Debug, Clone)]
pub struct RefreshTokenService {
    store: RefreshTokenStore,
    profile: Arc<dyn ProfileService>,
    sessions: Option<Arc<SessionCoordinationService>>,
    options: PersistentGrantOptions,
    reuse_policy: RefreshTokenReusePolicy,
    audit: AuditLogger,
    clock: Arc<dyn Clock>,
}

impl RefreshTokenService {
    pub fn new(store: RefreshTokenStore, profile: Arc<dyn ProfileService>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            profile,
            sessions: None,
            options: PersistentGrantOptions::default(),
            reuse_policy: RefreshTokenReusePolicy::default(),
            audit: AuditLogger::default(),
            clock,
        }
    }

    /// Apply the grant and refresh token sections of `options`
    pub fn with_options(mut self, options: &ServerOptions) -> Self {
        self.options = options.persistent_grants.clone();
        self.reuse_policy = options.refresh_tokens.reuse_policy;
        self
    }

    pub fn with_reuse_policy(mut self, policy: RefreshTokenReusePolicy) -> Self {
        self.reuse_policy = policy;
        self
    }

    pub fn with_session_coordination(mut self, sessions: Arc<SessionCoordinationService>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    pub fn with_audit(mut self, audit: AuditLogger) -> Self {
        self.audit = audit;
        self
    }

    pub fn store(&self) -> &RefreshTokenStore {
        &self.store
    }

    /// Validate a presented refresh token for `client`
    ///
    /// Not-found and client-mismatch failures produce the same outward
    /// response.
    ///
    /// # Errors
    /// Propagates storage and collaborator failures.
    pub async fn validate_refresh_token(
        &self,
        handle: &str,
        client: &Client,
        cancel: &CancellationToken,
    ) -> Result<TokenValidationResult> {
        let Some(token) = self.store.get_refresh_token(handle, cancel).await? else {
            warn!(client_id = %client.client_id, "Refresh token not found");
            return Ok(TokenValidationResult::Invalid(GrantFailure::GrantNotFound));
        };

        if token.client_id != client.client_id {
            warn!(
                client_id = %client.client_id,
                token_client_id = %token.client_id,
                "Refresh token presented by another client"
            );
            return Ok(TokenValidationResult::Invalid(GrantFailure::ClientMismatch));
        }

        if !client.allow_offline_access {
            warn!(client_id = %client.client_id, "Client is no longer allowed offline access");
            return Ok(TokenValidationResult::Invalid(GrantFailure::policy(
                "client is not allowed offline access",
            )));
        }

        let now = self.clock.now();
        if token.is_expired(now) {
            debug!(client_id = %client.client_id, "Refresh token expired");
            self.store.remove_refresh_token(handle, cancel).await?;
            return Ok(TokenValidationResult::Invalid(GrantFailure::GrantExpiredOrConsumed));
        }

        if token.consumed_time.is_some() {
            return self.handle_reuse(&token, cancel).await;
        }

        if !self
            .profile
            .is_active(&token.subject, client, ProfileCaller::RefreshTokenValidation, cancel)
            .await?
        {
            warn!(subject_id = ?token.subject_id(), "Refresh token subject is not active");
            return Ok(TokenValidationResult::Invalid(GrantFailure::SubjectInactive));
        }

        if client.require_dpop && token.proof_type != ProofType::DPoP {
            warn!(client_id = %client.client_id, "Client requires DPoP but refresh token is not DPoP-bound");
            return Ok(TokenValidationResult::Invalid(GrantFailure::policy(
                "refresh token is not DPoP-bound",
            )));
        }

        if let Some(sessions) = &self.sessions
            && let Some(subject_id) = token.subject_id()
            && !sessions
                .validate_session(subject_id, token.session_id.as_deref(), client, cancel)
                .await?
        {
            return Ok(TokenValidationResult::Invalid(GrantFailure::SessionInactive));
        }

        Ok(TokenValidationResult::Valid(Box::new(token)))
    }

    async fn handle_reuse(
        &self,
        token: &RefreshToken,
        cancel: &CancellationToken,
    ) -> Result<TokenValidationResult> {
        self.report_reuse(token, cancel).await?;
        Ok(TokenValidationResult::Invalid(GrantFailure::ReuseDetected))
    }

    async fn report_reuse(&self, token: &RefreshToken, cancel: &CancellationToken) -> Result<()> {
        self.audit.log(SecurityEvent::RefreshTokenReuseDetected {
            subject_id: token.subject_id().map(str::to_string),
            client_id: token.client_id.clone(),
            session_id: token.session_id.clone(),
            policy: self.reuse_policy,
        });

        if self.reuse_policy == RefreshTokenReusePolicy::RevokeFamily
            && let Some(subject_id) = token.subject_id()
        {
            let count = self
                .store
                .remove_refresh_tokens(subject_id, &token.client_id, token.session_id.as_deref(), cancel)
                .await?;
            self.audit.log(SecurityEvent::GrantRevoked {
                grant_types: vec![grantline_store::GrantType::RefreshToken.to_string()],
                subject_id: subject_id.to_string(),
                client_id: token.client_id.clone(),
                session_id: token.session_id.clone(),
                count,
                reason: RevocationReason::RefreshTokenReuse,
            });
        }
        Ok(())
    }

    /// Issue a refresh token and return its handle
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn create_refresh_token(
        &self,
        request: &RefreshTokenCreationRequest,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let client = &request.client;
        let lifetime = initial_lifetime(client);

        let mut token = RefreshToken::new(
            request.subject.clone(),
            client.client_id.clone(),
            self.clock.now(),
            lifetime,
        );
        token.authorized_scopes = request.authorized_scopes.clone();
        token.authorized_resource_indicators = request.authorized_resource_indicators.clone();
        token.proof_type = request.proof_type;
        token.description = request.description.clone();
        token.set_access_token(request.access_token.clone(), request.requested_resource.as_deref());

        let handle = self.store.store_refresh_token(&token, cancel).await?;
        debug!(
            client_id = %client.client_id,
            lifetime,
            expiration = ?client.refresh_token_expiration,
            "Refresh token issued"
        );
        Ok(handle)
    }

    /// Record a refresh and return the handle the client must use next
    ///
    /// A one-time token is consumed atomically before its successor is
    /// written. When a concurrent refresh consumed it first, no successor is
    /// issued and the presentation is treated as reuse.
    ///
    /// # Errors
    /// Propagates storage and session store failures.
    pub async fn update_refresh_token(
        &self,
        request: RefreshTokenUpdateRequest,
        cancel: &CancellationToken,
    ) -> Result<std::result::Result<String, GrantFailure>> {
        let RefreshTokenUpdateRequest {
            handle,
            refresh_token: mut token,
            client,
            access_token,
            requested_resource,
            must_update,
        } = request;
        let now = self.clock.now();
        let resource = requested_resource.as_deref();

        let mut needs_create = false;
        let mut needs_update = must_update;

        if let Some(access_token) = access_token
            && (client.update_access_token_claims_on_refresh || token.get_access_token(resource).is_none())
        {
            token.set_access_token(access_token, resource);
            needs_update = true;
        }

        if client.refresh_token_usage == TokenUsage::OneTimeOnly {
            let won = if self.options.delete_one_time_only_refresh_tokens_on_use {
                self.store.take_refresh_token(&handle, cancel).await?.is_some()
            } else {
                self.store.consume_refresh_token(&handle, cancel).await?
            };
            if !won {
                warn!(client_id = %client.client_id, "Refresh token consumed by a concurrent refresh");
                self.report_reuse(&token, cancel).await?;
                return Ok(Err(GrantFailure::ReuseDetected));
            }
            needs_create = true;
        }

        if client.refresh_token_expiration == TokenExpiration::Sliding {
            let elapsed = u64::try_from((now - token.creation_time).num_seconds()).unwrap_or(0);
            token.lifetime = sliding_lifetime(&client, elapsed);
            needs_update = true;
        }

        let next = if needs_create {
            token.consumed_time = None;
            let next = self.store.store_refresh_token(&token, cancel).await?;
            debug!(client_id = %client.client_id, "Refresh token rotated");
            next
        } else {
            if needs_update {
                self.store.update_refresh_token(&handle, &token, cancel).await?;
                debug!(client_id = %client.client_id, "Refresh token updated in place");
            }
            handle
        };

        if let Some(sessions) = &self.sessions {
            sessions.process_refresh_token_update(&token, &client, cancel).await?;
        }
        Ok(Ok(next))
    }
}

fn initial_lifetime(client: &Client) -> u64 {
    match client.refresh_token_expiration {
        TokenExpiration::Absolute => client.absolute_refresh_token_lifetime,
        TokenExpiration::Sliding => cap_to_absolute(client, client.sliding_refresh_token_lifetime),
    }
}

/// Lifetime from creation after a sliding renewal `elapsed` seconds in
fn sliding_lifetime(client: &Client, elapsed: u64) -> u64 {
    cap_to_absolute(client, elapsed.saturating_add(client.sliding_refresh_token_lifetime))
}

fn cap_to_absolute(client: &Client, lifetime: u64) -> u64 {
    let absolute = client.absolute_refresh_token_lifetime;
    if absolute > 0 && lifetime > absolute {
        absolute
    } else {
        lifetime
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sliding_client(sliding: u64, absolute: u64) -> Client {
        Client {
            refresh_token_expiration: TokenExpiration::Sliding,
            sliding_refresh_token_lifetime: sliding,
            absolute_refresh_token_lifetime: absolute,
            ..Client::new("web")
        }
    }

    #[test]
    fn test_initial_lifetime() {
        let absolute = Client {
            absolute_refresh_token_lifetime: 1000,
            ..Client::new("web")
        };
        assert_eq!(initial_lifetime(&absolute), 1000);
        assert_eq!(initial_lifetime(&sliding_client(100, 1000)), 100);
        assert_eq!(initial_lifetime(&sliding_client(5000, 1000)), 1000);
        assert_eq!(initial_lifetime(&sliding_client(5000, 0)), 5000);
    }

    #[test]
    fn test_sliding_renewal_is_capped() {
        let client = sliding_client(100, 1000);
        assert_eq!(sliding_lifetime(&client, 50), 150);
        assert_eq!(sliding_lifetime(&client, 950), 1000);
    }
}
