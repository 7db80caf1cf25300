//! DPoP proofs on token requests
//!
//! The dispatcher validates the proof before the grant validator runs and
//! binds issued tokens to the proof key.

mod common;

use std::sync::Arc;

use common::{TOKEN_URL, TokenCore};
use grantline_auth::validation::ClientCredentialsValidator;
use grantline_auth::{GrantRequestValidator, OAuthErrorCode, SecurityEvent, TokenRequest, grant_types};
use grantline_dpop::DpopValidationMode;
use grantline_dpop::test_utils::{ProofBuilder, TestDpopKey};
use grantline_store::{Clock, ProofType};
use pretty_assertions::assert_eq;

fn client_credentials(core: &TokenCore) -> TokenRequest {
    TokenRequest::new(grant_types::CLIENT_CREDENTIALS, core.web_client())
}

#[tokio::test]
async fn test_proof_binds_client_credentials_token() {
    let core = TokenCore::new();
    let key = TestDpopKey::es256();
    let proof = ProofBuilder::new(&key, "POST", TOKEN_URL, core.clock.now().timestamp()).build();

    let result = core
        .validate(client_credentials(&core).with_dpop_proof(proof, TOKEN_URL))
        .await;

    let validated = result.validated_request.expect("proof accepted");
    assert_eq!(validated.proof_type, ProofType::DPoP);
    assert_eq!(validated.dpop_key_thumbprint, Some(key.thumbprint()));
    assert_eq!(validated.scopes, vec!["openid", "profile", "api"]);
}

#[tokio::test]
async fn test_nonce_mode_hands_out_nonce_then_accepts_it() {
    // GIVEN: nonce-mode DPoP
    let core = TokenCore::with_dpop_nonces();
    let key = TestDpopKey::es384();
    let now = core.clock.now().timestamp();

    // WHEN: the first proof carries no nonce
    let first = ProofBuilder::new(&key, "POST", TOKEN_URL, now).build();
    let result = core
        .validate(client_credentials(&core).with_dpop_proof(first, TOKEN_URL))
        .await;

    // THEN: rejected with a nonce to retry with
    assert_eq!(result.error(), Some(OAuthErrorCode::InvalidDpopProof));
    let nonce = result.dpop_nonce().expect("server nonce").to_string();

    // WHEN: the client retries with the nonce
    let retry = ProofBuilder::new(&key, "POST", TOKEN_URL, now).nonce(&nonce).build();
    let result = core
        .validate(client_credentials(&core).with_dpop_proof(retry, TOKEN_URL))
        .await;

    // THEN
    assert!(!result.is_error(), "unexpected failure: {:?}", result.failure);
}

#[tokio::test]
async fn test_client_mode_overrides_server_default() {
    let core = TokenCore::new();
    let mut client = core.web_client();
    client.dpop_validation_mode = Some(DpopValidationMode::Nonce);
    let key = TestDpopKey::es256();
    let proof = ProofBuilder::new(&key, "POST", TOKEN_URL, core.clock.now().timestamp()).build();

    let result = core
        .validate(TokenRequest::new(grant_types::CLIENT_CREDENTIALS, client).with_dpop_proof(proof, TOKEN_URL))
        .await;

    assert!(result.dpop_nonce().is_some());
}

#[tokio::test]
async fn test_replayed_proof_is_rejected_and_audited() {
    let core = TokenCore::new();
    let key = TestDpopKey::es256();
    let proof = ProofBuilder::new(&key, "POST", TOKEN_URL, core.clock.now().timestamp())
        .jti("replayed")
        .build();

    let first = core
        .validate(client_credentials(&core).with_dpop_proof(proof.clone(), TOKEN_URL))
        .await;
    assert!(!first.is_error());

    let second = core
        .validate(client_credentials(&core).with_dpop_proof(proof, TOKEN_URL))
        .await;
    assert_eq!(second.error(), Some(OAuthErrorCode::InvalidDpopProof));
    assert_eq!(second.error_description(), None);
    assert!(core.events.events().iter().any(|e| matches!(
        e,
        SecurityEvent::DpopProofRejected { client_id, .. } if client_id == "web"
    )));
}

#[tokio::test]
async fn test_proof_for_another_endpoint_is_rejected() {
    let core = TokenCore::new();
    let key = TestDpopKey::es256();
    let proof = ProofBuilder::new(
        &key,
        "POST",
        "https://identity.example.com/connect/revocation",
        core.clock.now().timestamp(),
    )
    .build();

    let result = core
        .validate(client_credentials(&core).with_dpop_proof(proof, TOKEN_URL))
        .await;
    assert_eq!(result.error(), Some(OAuthErrorCode::InvalidDpopProof));
}

#[tokio::test]
async fn test_required_dpop_without_proof() {
    let core = TokenCore::new();
    let mut client = core.web_client();
    client.require_dpop = true;

    let result = core
        .validate(TokenRequest::new(grant_types::CLIENT_CREDENTIALS, client))
        .await;
    assert_eq!(result.error(), Some(OAuthErrorCode::InvalidRequest));
}

#[tokio::test]
async fn test_proof_without_dpop_support_is_rejected() {
    let core = TokenCore::new();
    let validator = GrantRequestValidator::builder()
        .grant(Arc::new(ClientCredentialsValidator))
        .build();
    let key = TestDpopKey::es256();
    let proof = ProofBuilder::new(&key, "POST", TOKEN_URL, core.clock.now().timestamp()).build();

    let result = validator
        .validate(&client_credentials(&core).with_dpop_proof(proof, TOKEN_URL), &core.cancel)
        .await
        .unwrap();
    assert_eq!(result.error(), Some(OAuthErrorCode::InvalidDpopProof));
}

#[tokio::test]
async fn test_proof_method_must_match_request_method() {
    // GIVEN: a proof signed for GET
    let core = TokenCore::new();
    let key = TestDpopKey::es256();
    let now = core.clock.now().timestamp();

    // WHEN: the request was a POST
    let proof = ProofBuilder::new(&key, "GET", TOKEN_URL, now).build();
    let mismatch = core
        .validate(client_credentials(&core).with_dpop_proof(proof, TOKEN_URL))
        .await;

    // THEN
    assert_eq!(mismatch.error(), Some(OAuthErrorCode::InvalidDpopProof));

    // WHEN: the request really was a GET
    let proof = ProofBuilder::new(&key, "GET", TOKEN_URL, now).build();
    let matched = core
        .validate(
            client_credentials(&core)
                .with_http_method("GET")
                .with_dpop_proof(proof, TOKEN_URL),
        )
        .await;

    // THEN
    assert!(!matched.is_error(), "unexpected failure: {:?}", matched.failure);
}
