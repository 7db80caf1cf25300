//! RFC 7009 revocation
//!
//! Tests cover hint-driven lookup order, cascading refresh token revocation,
//! foreign tokens, and request errors.

mod common;

use common::{TokenCore, alice};
use grantline_auth::revocation::token_type_hints;
use grantline_auth::{
    Client, GrantFailure, OAuthErrorCode, RevocationOutcome, SecurityEvent, TokenRevocationRequest,
    TokenRevocationService,
};
use pretty_assertions::assert_eq;

fn service(core: &TokenCore) -> TokenRevocationService {
    TokenRevocationService::new(core.refresh_tokens.clone(), core.reference_tokens.clone())
        .with_audit(core.audit.clone())
}

#[tokio::test]
async fn test_refresh_token_revocation_cascades_to_reference_tokens() {
    // GIVEN: a refresh token and a reference token from the same session
    let core = TokenCore::new();
    let client = core.web_client();
    let refresh = core.issue_refresh_token(&client, alice()).await;
    let reference = core.issue_reference_token(&client, &alice()).await;

    // WHEN: the refresh token is revoked
    let outcome = service(&core)
        .revoke(
            &TokenRevocationRequest::new(&refresh, client).with_hint(token_type_hints::REFRESH_TOKEN),
            &core.cancel,
        )
        .await
        .unwrap();

    // THEN: both are gone
    assert_eq!(outcome, Ok(RevocationOutcome::Revoked));
    let cancel = &core.cancel;
    assert!(core.refresh_tokens.get_refresh_token(&refresh, cancel).await.unwrap().is_none());
    assert!(core.reference_tokens.get_reference_token(&reference, cancel).await.unwrap().is_none());
    assert!(core.events.events().iter().any(|e| matches!(
        e,
        SecurityEvent::TokenRevoked { token_type, .. } if token_type == "refresh_token"
    )));
}

#[tokio::test]
async fn test_hint_only_orders_lookup() {
    // A refresh token revoked with an access token hint is still found
    let core = TokenCore::new();
    let client = core.web_client();
    let refresh = core.issue_refresh_token(&client, alice()).await;
    let reference = core.issue_reference_token(&client, &alice()).await;

    let outcome = service(&core)
        .revoke(
            &TokenRevocationRequest::new(&refresh, client.clone()).with_hint(token_type_hints::ACCESS_TOKEN),
            &core.cancel,
        )
        .await
        .unwrap();
    assert_eq!(outcome, Ok(RevocationOutcome::Revoked));

    let reference_outcome = service(&core)
        .revoke(&TokenRevocationRequest::new(&reference, client), &core.cancel)
        .await
        .unwrap();
    // Already removed by the cascade
    assert_eq!(reference_outcome, Ok(RevocationOutcome::NotFound));
}

#[tokio::test]
async fn test_reference_token_revocation_leaves_refresh_token() {
    let core = TokenCore::new();
    let client = core.web_client();
    let refresh = core.issue_refresh_token(&client, alice()).await;
    let reference = core.issue_reference_token(&client, &alice()).await;

    let outcome = service(&core)
        .revoke(&TokenRevocationRequest::new(&reference, client), &core.cancel)
        .await
        .unwrap();

    assert_eq!(outcome, Ok(RevocationOutcome::Revoked));
    let cancel = &core.cancel;
    assert!(core.refresh_tokens.get_refresh_token(&refresh, cancel).await.unwrap().is_some());
}

#[tokio::test]
async fn test_foreign_token_is_left_alone() {
    let core = TokenCore::new();
    let client = core.web_client();
    let refresh = core.issue_refresh_token(&client, alice()).await;

    let outcome = service(&core)
        .revoke(&TokenRevocationRequest::new(&refresh, Client::new("mobile")), &core.cancel)
        .await
        .unwrap();

    assert_eq!(outcome, Ok(RevocationOutcome::Denied));
    let cancel = &core.cancel;
    assert!(core.refresh_tokens.get_refresh_token(&refresh, cancel).await.unwrap().is_some());
    assert!(core.events.events().is_empty());
}

#[tokio::test]
async fn test_request_errors() {
    let core = TokenCore::new();
    let client = core.web_client();
    let service = service(&core);

    let empty = service
        .revoke(&TokenRevocationRequest::new("", client.clone()), &core.cancel)
        .await
        .unwrap();
    assert_eq!(empty.map_err(|f| f.error_code()), Err(OAuthErrorCode::InvalidRequest));

    let unsupported = service
        .revoke(
            &TokenRevocationRequest::new("abc", client.clone()).with_hint("id_token"),
            &core.cancel,
        )
        .await
        .unwrap();
    assert_eq!(
        unsupported,
        Err(GrantFailure::UnsupportedTokenType {
            hint: "id_token".to_string()
        })
    );

    let unknown = service
        .revoke(&TokenRevocationRequest::new("does-not-exist", client), &core.cancel)
        .await
        .unwrap();
    assert_eq!(unknown, Ok(RevocationOutcome::NotFound));
}
