//! Password, client credentials and extension grants
//!
//! Extension grants are registered at runtime on an existing dispatcher and
//! go through the same pre-checks as the built-in ones.

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use common::TokenCore;
use grantline_auth::validation::{ExtensionGrantAdapter, ExtensionGrantResult, ExtensionGrantValidator};
use grantline_auth::{Client, GrantFailure, OAuthErrorCode, ProfileService, TokenRequest, grant_types};
use grantline_store::{CancellationToken, Principal};
use pretty_assertions::assert_eq;
use serde_json::json;

const TOKEN_EXCHANGE: &str = "urn:ietf:params:oauth:grant-type:token-exchange";

/// Accepts `subject_token=trusted:<subject>`
#[derive(Debug)]
struct TrustedTokenExchange;

#[async_trait]
impl ExtensionGrantValidator for TrustedTokenExchange {
    fn grant_type(&self) -> &str {
        TOKEN_EXCHANGE
    }

    async fn validate(
        &self,
        request: &TokenRequest,
        _cancel: &CancellationToken,
    ) -> grantline_auth::Result<ExtensionGrantResult> {
        let Some(token) = request.parameters.get("subject_token") else {
            return Ok(ExtensionGrantResult::Failure {
                code: OAuthErrorCode::InvalidRequest,
                description: Some("subject_token is missing".to_string()),
            });
        };
        let Some(subject) = token.strip_prefix("trusted:") else {
            return Ok(ExtensionGrantResult::invalid_grant("untrusted subject token"));
        };
        let mut result = ExtensionGrantResult::success(Some(Principal::new(subject, Some("sid-x"))));
        if let ExtensionGrantResult::Success { custom, .. } = &mut result {
            custom.insert("act".to_string(), json!({ "sub": request.client.client_id }));
        }
        Ok(result)
    }
}

fn exchange_client(core: &TokenCore) -> Client {
    let mut client = core.web_client();
    client.allowed_grant_types.push(TOKEN_EXCHANGE.to_string());
    client
}

fn register_exchange(core: &TokenCore) {
    let profile: Arc<dyn ProfileService> = core.profile.clone();
    core.validator
        .register(Arc::new(ExtensionGrantAdapter::new(Arc::new(TrustedTokenExchange), profile)));
}

#[tokio::test]
async fn test_extension_grant_registered_at_runtime() {
    // GIVEN: a dispatcher that does not know token exchange yet
    let core = TokenCore::new();
    let client = exchange_client(&core);
    let request = TokenRequest::new(TOKEN_EXCHANGE, client).with_parameter("subject_token", "trusted:bob");
    assert_eq!(core.validate(request.clone()).await.error(), Some(OAuthErrorCode::UnsupportedGrantType));

    // WHEN: the extension is registered
    register_exchange(&core);
    assert!(core.validator.supports(TOKEN_EXCHANGE));

    // THEN: the same request succeeds with the extension's subject and claims
    let validated = core.validate(request).await.validated_request.expect("exchange accepted");
    assert_eq!(validated.subject_id(), Some("bob"));
    assert_eq!(validated.session_id.as_deref(), Some("sid-x"));
    assert_eq!(validated.custom.get("act"), Some(&json!({ "sub": "web" })));
}

#[tokio::test]
async fn test_extension_failures_keep_their_code() {
    let core = TokenCore::new();
    register_exchange(&core);
    let client = exchange_client(&core);

    let missing = core.validate(TokenRequest::new(TOKEN_EXCHANGE, client.clone())).await;
    assert_eq!(missing.error(), Some(OAuthErrorCode::InvalidRequest));
    assert_eq!(missing.error_description().as_deref(), Some("subject_token is missing"));

    let untrusted = core
        .validate(TokenRequest::new(TOKEN_EXCHANGE, client).with_parameter("subject_token", "forged:bob"))
        .await;
    assert_eq!(untrusted.error(), Some(OAuthErrorCode::InvalidGrant));
}

#[tokio::test]
async fn test_extension_subject_must_be_active() {
    let core = TokenCore::new();
    register_exchange(&core);
    core.profile.deactivate("bob");

    let result = core
        .validate(TokenRequest::new(TOKEN_EXCHANGE, exchange_client(&core)).with_parameter("subject_token", "trusted:bob"))
        .await;
    assert_eq!(result.failure, Some(GrantFailure::SubjectInactive));
}

#[tokio::test]
async fn test_extension_grant_must_be_allowed_for_client() {
    let core = TokenCore::new();
    register_exchange(&core);

    let result = core
        .validate(TokenRequest::new(TOKEN_EXCHANGE, core.web_client()).with_parameter("subject_token", "trusted:bob"))
        .await;
    assert_eq!(result.error(), Some(OAuthErrorCode::UnauthorizedClient));
}

#[tokio::test]
async fn test_password_grant() {
    let core = TokenCore::new();
    let client = core.web_client();

    let ok = core
        .validate(
            TokenRequest::new(grant_types::PASSWORD, client.clone())
                .with_credentials("alice", "wonderland")
                .with_scopes(["api"]),
        )
        .await;
    let validated = ok.validated_request.expect("credentials accepted");
    assert_eq!(validated.subject_id(), Some("alice"));
    assert_eq!(validated.scopes, vec!["api"]);

    let wrong = core
        .validate(TokenRequest::new(grant_types::PASSWORD, client.clone()).with_credentials("alice", "guess"))
        .await;
    assert_eq!(wrong.error(), Some(OAuthErrorCode::InvalidGrant));
    assert_eq!(wrong.error_description(), None);

    let scope = core
        .validate(
            TokenRequest::new(grant_types::PASSWORD, client)
                .with_credentials("alice", "wonderland")
                .with_scopes(["admin"]),
        )
        .await;
    assert_eq!(scope.error(), Some(OAuthErrorCode::InvalidScope));
}

#[tokio::test]
async fn test_client_credentials_never_get_offline_access() {
    let core = TokenCore::new();
    let result = core
        .validate(TokenRequest::new(grant_types::CLIENT_CREDENTIALS, core.web_client()).with_scopes(["offline_access"]))
        .await;
    assert_eq!(result.error(), Some(OAuthErrorCode::InvalidScope));
}

#[tokio::test]
async fn test_disabled_client_is_refused_first() {
    let core = TokenCore::new();
    let mut client = core.web_client();
    client.enabled = false;

    let result = core.validate(TokenRequest::new("no-such-grant", client)).await;
    assert_eq!(result.error(), Some(OAuthErrorCode::InvalidClient));
}

#[tokio::test]
async fn test_supported_grant_types_are_listed() {
    let core = TokenCore::new();
    let listed = core.validator.grant_types();
    for grant_type in [
        grant_types::AUTHORIZATION_CODE,
        grant_types::CIBA,
        grant_types::CLIENT_CREDENTIALS,
        grant_types::DEVICE_FLOW,
        grant_types::PASSWORD,
        grant_types::REFRESH_TOKEN,
    ] {
        assert!(listed.iter().any(|g| g == grant_type), "{grant_type} missing");
    }
    let mut sorted = listed.clone();
    sorted.sort();
    assert_eq!(listed, sorted);
}
