//! Session-coordinated grant lifetimes
//!
//! With server-side sessions enabled, a client can opt into tying its refresh
//! and reference tokens to the user session they were issued in:
//!
//! - ending the session (logout or expiration) removes those tokens
//! - refreshing a token renews the session and extends it to cover the new
//!   refresh token
//! - a refresh token whose session is gone is no longer accepted
//!
//! Consents survive session end.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::DateTime;
use grantline_store::{
    Clock, GrantType, PersistedGrantFilter, PersistedGrantStore, RefreshToken, ServerSideSession,
    ServerSideSessionStore, SessionFilter,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::Result;
use crate::audit::{AuditLogger, RevocationReason, SecurityEvent};
use crate::client::Client;
use crate::config::ServerSideSessionOptions;
use crate::services::{
    BackChannelLogoutNotifier, BackChannelLogoutRequest, ClientStore, LogoutReason,
    NoopBackChannelLogoutNotifier,
};

/// Grant types removed when a coordinated session ends
const SESSION_BOUND_GRANTS: [GrantType; 2] = [GrantType::RefreshToken, GrantType::ReferenceToken];

/// Coordinates client grant lifetimes with server-side user sessions
#[derive(Debug, Clone)]
pub struct SessionCoordinationService {
    options: ServerSideSessionOptions,
    grants: Arc<dyn PersistedGrantStore>,
    sessions: Arc<dyn ServerSideSessionStore>,
    clients: Arc<dyn ClientStore>,
    notifier: Arc<dyn BackChannelLogoutNotifier>,
    audit: AuditLogger,
    clock: Arc<dyn Clock>,
}

impl SessionCoordinationService {
    pub fn new(
        options: ServerSideSessionOptions,
        grants: Arc<dyn PersistedGrantStore>,
        sessions: Arc<dyn ServerSideSessionStore>,
        clients: Arc<dyn ClientStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            options,
            grants,
            sessions,
            clients,
            notifier: Arc::new(NoopBackChannelLogoutNotifier),
            audit: AuditLogger::default(),
            clock,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn BackChannelLogoutNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_audit(mut self, audit: AuditLogger) -> Self {
        self.audit = audit;
        self
    }

    pub fn options(&self) -> &ServerSideSessionOptions {
        &self.options
    }

    /// Whether the client's tokens follow the user session
    pub fn coordinates(&self, client: &Client) -> bool {
        client
            .coordinate_lifetime_with_user_session
            .unwrap_or(self.options.coordinate_client_lifetimes_with_user_session)
    }

    /// Handle a user logging out of `session`
    ///
    /// # Errors
    /// Propagates storage, client store and notifier failures.
    pub async fn process_logout(&self, session: &ServerSideSession, cancel: &CancellationToken) -> Result<()> {
        self.end_session(session, LogoutReason::UserLogout, cancel).await
    }

    /// Handle `session` reaching its expiration
    ///
    /// # Errors
    /// Propagates storage, client store and notifier failures.
    pub async fn process_expiration(
        &self,
        session: &ServerSideSession,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.end_session(session, LogoutReason::SessionExpiration, cancel).await
    }

    async fn end_session(
        &self,
        session: &ServerSideSession,
        reason: LogoutReason,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let revocation = match reason {
            LogoutReason::UserLogout => RevocationReason::Logout,
            LogoutReason::SessionExpiration => RevocationReason::SessionExpired,
        };

        let mut coordinated = Vec::new();
        let mut logout_uris = HashMap::new();

        for client_id in &session.client_ids {
            let Some(client) = self.clients.find_client(client_id, cancel).await? else {
                debug!(client_id = %client_id, "Session client no longer exists");
                continue;
            };

            if self.coordinates(&client) {
                let filter = PersistedGrantFilter::new()
                    .subject(&session.subject_id)
                    .session(&session.session_id)
                    .client(client_id)
                    .of_types(SESSION_BOUND_GRANTS);
                let count = self.grants.remove_all(&filter, cancel).await?;
                if count > 0 {
                    self.audit.log(SecurityEvent::GrantRevoked {
                        grant_types: SESSION_BOUND_GRANTS.iter().map(|t| t.to_string()).collect(),
                        subject_id: session.subject_id.clone(),
                        client_id: client_id.clone(),
                        session_id: Some(session.session_id.clone()),
                        count,
                        reason: revocation,
                    });
                }
                coordinated.push(client_id.clone());
            }

            if client.has_back_channel_logout()
                && let Some(uri) = &client.back_channel_logout_uri
            {
                logout_uris.insert(client_id.clone(), uri.clone());
            }
        }

        self.audit.log(SecurityEvent::SessionRevoked {
            subject_id: session.subject_id.clone(),
            session_id: session.session_id.clone(),
            client_ids: coordinated,
            reason: revocation,
        });

        let notify = match reason {
            LogoutReason::UserLogout => true,
            LogoutReason::SessionExpiration => self.options.expired_session_sends_back_channel_logout,
        };
        if notify && !logout_uris.is_empty() {
            let request = BackChannelLogoutRequest {
                subject_id: session.subject_id.clone(),
                session_id: session.session_id.clone(),
                clients: logout_uris,
                reason,
            };
            self.notifier.send_logout_notifications(&request, cancel).await?;
        }
        Ok(())
    }

    /// Whether tokens bound to `session_id` may still be used by `client`
    ///
    /// Always `true` when coordination does not apply: sessions disabled, the
    /// client not coordinating, or no session id on the grant.
    ///
    /// # Errors
    /// Propagates session store failures.
    pub async fn validate_session(
        &self,
        subject_id: &str,
        session_id: Option<&str>,
        client: &Client,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        if !self.options.enabled || !self.coordinates(client) {
            return Ok(true);
        }
        let Some(session_id) = session_id else {
            return Ok(true);
        };

        let now = self.clock.now();
        let filter = SessionFilter::for_subject(subject_id).session(session_id);
        let sessions = self.sessions.get_sessions(&filter, cancel).await?;
        let valid = sessions.iter().any(|session| !session.is_expired(now));
        if !valid {
            info!(
                subject_id = %subject_id,
                session_id = %session_id,
                client_id = %client.client_id,
                "User session is gone or expired"
            );
        }
        Ok(valid)
    }

    /// Renew the session behind a refreshed token
    ///
    /// The session's expiration is pushed out to cover the refresh token; a
    /// refresh token that never expires clears it.
    ///
    /// # Errors
    /// Propagates session store failures.
    pub async fn process_refresh_token_update(
        &self,
        refresh_token: &RefreshToken,
        client: &Client,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if !self.options.enabled || !self.coordinates(client) {
            return Ok(());
        }
        let (Some(subject_id), Some(session_id)) =
            (refresh_token.subject_id(), refresh_token.session_id.as_deref())
        else {
            return Ok(());
        };

        let now = self.clock.now();
        let filter = SessionFilter::for_subject(subject_id).session(session_id);
        let token_expiration = refresh_token.expiration();

        for mut session in self.sessions.get_sessions(&filter, cancel).await? {
            session.renewed = now;
            session.expires = match (session.expires, token_expiration) {
                (Some(current), Some(required)) => Some(DateTime::max(current, required)),
                _ => None,
            };
            debug!(
                session_id = %session.session_id,
                expires = ?session.expires,
                "Extending user session for refreshed token"
            );
            self.sessions.update_session(session, cancel).await?;
        }
        Ok(())
    }

    /// Drain expired sessions, ending each one
    ///
    /// Returns the number of sessions processed.
    ///
    /// # Errors
    /// Propagates storage failures; sessions already drained stay removed.
    pub async fn remove_expired_sessions(&self, cancel: &CancellationToken) -> Result<usize> {
        let batch = self.options.removal_batch_size.max(1);
        let mut total = 0;
        loop {
            let now = self.clock.now();
            let expired = self
                .sessions
                .get_and_remove_expired_sessions(now, batch, cancel)
                .await?;
            let count = expired.len();
            for session in &expired {
                if let Err(e) = self.process_expiration(session, cancel).await {
                    if e.is_cancelled() {
                        return Err(e);
                    }
                    warn!(
                        session_id = %session.session_id,
                        error = %e,
                        "Failed to process expired session"
                    );
                }
            }
            total += count;
            if count < batch {
                break;
            }
        }
        if total > 0 {
            info!(count = total, "Removed expired user sessions");
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::InMemoryClientStore;
    use grantline_store::{InMemoryPersistedGrantStore, InMemoryServerSideSessionStore, ManualClock};

    fn service(enabled: bool) -> (SessionCoordinationService, Arc<InMemoryServerSideSessionStore>, ManualClock) {
        let clock = ManualClock::at_current_second();
        let sessions = Arc::new(InMemoryServerSideSessionStore::new());
        let client = Client::new("web");
        let options = ServerSideSessionOptions {
            enabled,
            coordinate_client_lifetimes_with_user_session: true,
            ..Default::default()
        };
        let service = SessionCoordinationService::new(
            options,
            Arc::new(InMemoryPersistedGrantStore::new()),
            sessions.clone(),
            Arc::new(InMemoryClientStore::new([client])),
            Arc::new(clock.clone()),
        );
        (service, sessions, clock)
    }

    #[tokio::test]
    async fn test_validation_skipped_when_disabled() {
        let (service, _, _) = service(false);
        let cancel = CancellationToken::new();
        let valid = service
            .validate_session("alice", Some("missing"), &Client::new("web"), &cancel)
            .await
            .unwrap();
        assert!(valid);
    }

    #[tokio::test]
    async fn test_client_override_opts_out() {
        let (service, _, _) = service(true);
        let cancel = CancellationToken::new();
        let mut client = Client::new("web");
        client.coordinate_lifetime_with_user_session = Some(false);
        assert!(!service.coordinates(&client));
        assert!(
            service
                .validate_session("alice", Some("missing"), &client, &cancel)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_expired_session_fails_validation() {
        let (service, sessions, clock) = service(true);
        let cancel = CancellationToken::new();
        let session = ServerSideSession::new("k1", "alice", "s1", clock.now())
            .with_expiration(clock.now() + chrono::Duration::seconds(60));
        sessions.create_session(session, &cancel).await.unwrap();
        let client = Client::new("web");

        assert!(service.validate_session("alice", Some("s1"), &client, &cancel).await.unwrap());
        clock.advance_secs(61);
        assert!(!service.validate_session("alice", Some("s1"), &client, &cancel).await.unwrap());
    }

    #[tokio::test]
    async fn test_refresh_extends_session_to_token_expiration() {
        let (service, sessions, clock) = service(true);
        let cancel = CancellationToken::new();
        let created = clock.now();
        let session = ServerSideSession::new("k1", "alice", "s1", created)
            .with_expiration(created + chrono::Duration::seconds(60));
        sessions.create_session(session, &cancel).await.unwrap();

        clock.advance_secs(30);
        let token = RefreshToken::new(
            grantline_store::Principal::new("alice", Some("s1")),
            "web",
            clock.now(),
            3600,
        );
        service
            .process_refresh_token_update(&token, &Client::new("web"), &cancel)
            .await
            .unwrap();

        let updated = sessions.get_session("k1", &cancel).await.unwrap().unwrap();
        assert_eq!(updated.renewed, clock.now());
        assert_eq!(updated.expires, token.expiration());
    }
}
