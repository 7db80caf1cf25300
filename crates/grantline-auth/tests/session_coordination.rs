//! Server-side session coordination
//!
//! Tests cover:
//! - Logout revoking refresh and reference tokens of the session only
//! - Back-channel logout fan-out on logout and (optionally) expiration
//! - Refresh tokens failing once their session is gone
//! - Refresh extending the session
//! - Expired session draining through the cleanup service

mod common;

use std::sync::Arc;

use chrono::Duration;
use common::{TokenCore, alice};
use grantline_auth::audit::RevocationReason;
use grantline_auth::services::LogoutReason;
use grantline_auth::{
    GrantFailure, RefreshTokenUpdateRequest, SecurityEvent, ServerOptions, TokenCleanupService, TokenRequest,
    TokenUsage, grant_types,
};
use grantline_store::{Clock, Consent, Principal, ServerSideSessionStore, SessionFilter};
use pretty_assertions::assert_eq;

const LOGOUT_URI: &str = "https://app.example.com/backchannel-logout";

#[tokio::test]
async fn test_logout_revokes_session_tokens_and_keeps_consent() {
    // GIVEN: alice signed in to "web" in two sessions, with consent on file
    let core = TokenCore::with_sessions();
    let client = core.web_client();
    let session = core.start_session("alice", "sid-1", &["web"]).await;
    core.start_session("alice", "sid-2", &["web"]).await;

    let refresh = core.issue_refresh_token(&client, alice()).await;
    let reference = core.issue_reference_token(&client, &alice()).await;
    let other_session = core
        .issue_refresh_token(&client, Principal::new("alice", Some("sid-2")))
        .await;
    let consent = Consent {
        subject_id: "alice".to_string(),
        client_id: "web".to_string(),
        scopes: vec!["api".to_string()],
        creation_time: core.clock.now(),
        expiration: None,
    };
    core.consents.store_user_consent(&consent, &core.cancel).await.unwrap();

    // WHEN: the first session logs out
    core.coordination.process_logout(&session, &core.cancel).await.unwrap();

    // THEN: that session's tokens are gone
    let cancel = &core.cancel;
    assert!(core.refresh_tokens.get_refresh_token(&refresh, cancel).await.unwrap().is_none());
    assert!(core.reference_tokens.get_reference_token(&reference, cancel).await.unwrap().is_none());

    // AND: the other session and the consent survive
    assert!(core.refresh_tokens.get_refresh_token(&other_session, cancel).await.unwrap().is_some());
    assert_eq!(
        core.consents.get_user_consent("alice", "web", cancel).await.unwrap(),
        Some(consent)
    );

    let events = core.events.events();
    assert!(events.iter().any(|e| matches!(
        e,
        SecurityEvent::GrantRevoked { count: 2, reason: RevocationReason::Logout, .. }
    )));
    assert!(events.iter().any(|e| matches!(
        e,
        SecurityEvent::SessionRevoked { session_id, client_ids, .. }
            if session_id == "sid-1" && client_ids == &vec!["web".to_string()]
    )));
}

#[tokio::test]
async fn test_logout_skips_clients_that_opt_out() {
    let core = TokenCore::with_sessions();
    let mut client = core.web_client();
    client.coordinate_lifetime_with_user_session = Some(false);
    core.clients.insert(client.clone());
    let session = core.start_session("alice", "sid-1", &["web"]).await;
    let refresh = core.issue_refresh_token(&client, alice()).await;

    core.coordination.process_logout(&session, &core.cancel).await.unwrap();

    assert!(
        core.refresh_tokens
            .get_refresh_token(&refresh, &core.cancel)
            .await
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
async fn test_logout_notifies_back_channel_clients() {
    // GIVEN: a client with a back-channel logout endpoint and one without
    let core = TokenCore::with_sessions();
    let mut client = core.web_client();
    client.back_channel_logout_uri = Some(LOGOUT_URI.to_string());
    core.clients.insert(client);
    core.clients.insert(grantline_auth::Client::new("cli"));
    let session = core.start_session("alice", "sid-1", &["web", "cli", "deleted"]).await;

    // WHEN
    core.coordination.process_logout(&session, &core.cancel).await.unwrap();

    // THEN: one notification listing only the endpoint-bearing client
    let requests = core.notifier.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].reason, LogoutReason::UserLogout);
    assert_eq!(requests[0].session_id, "sid-1");
    assert_eq!(requests[0].clients.len(), 1);
    assert_eq!(requests[0].clients.get("web").map(String::as_str), Some(LOGOUT_URI));
}

#[tokio::test]
async fn test_expiration_notifies_only_when_configured() {
    for (send, expected) in [(false, 0), (true, 1)] {
        let mut options = ServerOptions::default();
        options.server_side_sessions.enabled = true;
        options.server_side_sessions.coordinate_client_lifetimes_with_user_session = true;
        options.server_side_sessions.expired_session_sends_back_channel_logout = send;
        let core = TokenCore::with_options(options);
        let mut client = core.web_client();
        client.back_channel_logout_uri = Some(LOGOUT_URI.to_string());
        core.clients.insert(client);
        let session = core.start_session("alice", "sid-1", &["web"]).await;

        core.coordination.process_expiration(&session, &core.cancel).await.unwrap();

        assert_eq!(core.notifier.requests().len(), expected, "send = {send}");
    }
}

#[tokio::test]
async fn test_refresh_fails_once_session_is_gone() {
    // GIVEN: a coordinated refresh token and its live session
    let core = TokenCore::with_sessions();
    let client = core.web_client();
    let session = core.start_session("alice", "sid-1", &["web"]).await;
    let handle = core.issue_refresh_token(&client, alice()).await;
    let request = TokenRequest::new(grant_types::REFRESH_TOKEN, client).with_refresh_token(&handle);
    assert!(!core.validate(request.clone()).await.is_error());

    // WHEN: the session record disappears without logout processing
    core.sessions.delete_session(&session.key, &core.cancel).await.unwrap();

    // THEN: the token no longer validates
    let result = core.validate(request).await;
    assert_eq!(result.failure, Some(GrantFailure::SessionInactive));
}

#[tokio::test]
async fn test_session_check_is_skipped_when_disabled() {
    let core = TokenCore::new();
    let client = core.web_client();
    let handle = core.issue_refresh_token(&client, alice()).await;

    let result = core
        .validate(TokenRequest::new(grant_types::REFRESH_TOKEN, client).with_refresh_token(&handle))
        .await;
    assert!(!result.is_error());
}

#[tokio::test]
async fn test_refresh_extends_session_to_cover_token() {
    // GIVEN: a session expiring in an hour and a 30-day refresh token
    let core = TokenCore::with_sessions();
    let mut client = core.web_client();
    client.refresh_token_usage = TokenUsage::ReUse;
    core.start_session("alice", "sid-1", &["web"]).await;
    let handle = core.issue_refresh_token(&client, alice()).await;
    core.clock.advance_secs(600);

    // WHEN: the token is refreshed
    let token = core
        .refresh_tokens
        .get_refresh_token(&handle, &core.cancel)
        .await
        .unwrap()
        .unwrap();
    core.refresh
        .update_refresh_token(
            RefreshTokenUpdateRequest {
                handle: handle.clone(),
                refresh_token: token.clone(),
                client: client.clone(),
                access_token: None,
                requested_resource: None,
                must_update: false,
            },
            &core.cancel,
        )
        .await
        .unwrap()
        .unwrap();

    // THEN: the session now lives as long as the token and was renewed now
    let sessions = core
        .sessions
        .get_sessions(&SessionFilter::for_subject("alice").session("sid-1"), &core.cancel)
        .await
        .unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].expires, token.expiration());
    assert_eq!(sessions[0].renewed, core.clock.now());
}

#[tokio::test]
async fn test_cleanup_drains_expired_sessions_and_their_tokens() {
    // GIVEN: one session that has expired and one that has not
    let core = TokenCore::with_sessions();
    let client = core.web_client();
    core.start_session("alice", "sid-1", &["web"]).await;
    let mut long_lived = core.start_session("alice", "sid-2", &["web"]).await;
    long_lived.expires = Some(core.clock.now() + Duration::days(1));
    core.sessions.update_session(long_lived, &core.cancel).await.unwrap();

    let expiring = core.issue_refresh_token(&client, alice()).await;
    let surviving = core
        .issue_refresh_token(&client, Principal::new("alice", Some("sid-2")))
        .await;
    core.clock.advance(Duration::hours(2));

    // WHEN: a cleanup pass runs
    let cleanup = TokenCleanupService::new(
        core.grants.clone(),
        core.options.persistent_grants.clone(),
        Arc::new(core.clock.clone()),
    )
    .with_session_coordination(core.coordination.clone());
    let report = cleanup.run_once(&core.cancel).await.unwrap();

    // THEN: only the expired session and its grants are gone
    assert_eq!(report.sessions_removed, 1);
    assert_eq!(core.sessions.len(), 1);
    let cancel = &core.cancel;
    assert!(core.refresh_tokens.get_refresh_token(&expiring, cancel).await.unwrap().is_none());
    assert!(core.refresh_tokens.get_refresh_token(&surviving, cancel).await.unwrap().is_some());
    assert!(core.events.events().iter().any(|e| matches!(
        e,
        SecurityEvent::SessionRevoked { reason: RevocationReason::SessionExpired, .. }
    )));
}
