//! Token request validation
//!
//! [`GrantRequestValidator`] is the entry point. It runs the checks common to
//! every grant type, validates an attached DPoP proof, and dispatches to the
//! [`GrantValidator`] registered for the request's `grant_type`.
//!
//! ## Results
//!
//! Business-rule rejections come back as a [`GrantValidationResult`] carrying
//! a [`GrantFailure`]. `Err` is reserved for infrastructure failures (storage,
//! replay cache, collaborators) and must never be reported to the client as
//! `invalid_grant`.
//!
//! ## Built-in grant types
//!
//! | `grant_type` | Validator |
//! |---|---|
//! | `authorization_code` | [`AuthorizationCodeValidator`] |
//! | `refresh_token` | [`RefreshTokenGrantValidator`] |
//! | `client_credentials` | [`ClientCredentialsValidator`] |
//! | `password` | [`PasswordGrantValidator`] |
//! | `urn:ietf:params:oauth:grant-type:device_code` | [`DeviceCodeValidator`] |
//! | `urn:openid:params:grant-type:ciba` | [`BackchannelAuthenticationValidator`] |
//!
//! Anything else is registered through [`ExtensionGrantValidator`].

mod authorization_code;
mod backchannel;
mod client_credentials;
mod device_code;
mod extension;
mod password;
pub mod pkce;
mod refresh_token;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use grantline_dpop::{DpopProofValidationContext, DpopProofValidator};
use chrono::{DateTime, Utc};
use grantline_store::{
    AuthorizationCode, BackchannelAuthenticationRequest, DeviceCode, Principal, ProofType, RefreshToken,
    StoreError, Token, claim_types,
};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::audit::{AuditLogger, SecurityEvent};
use crate::client::Client;
use crate::errors::{AuthError, GrantFailure, OAuthErrorCode};
use crate::services::{ProfileCaller, ProfileService};

pub use authorization_code::AuthorizationCodeValidator;
pub use backchannel::BackchannelAuthenticationValidator;
pub use client_credentials::ClientCredentialsValidator;
pub use device_code::DeviceCodeValidator;
pub use extension::{ExtensionGrantAdapter, ExtensionGrantResult, ExtensionGrantValidator};
pub use password::PasswordGrantValidator;
pub use refresh_token::RefreshTokenGrantValidator;

/// Replay-cache purpose for device flow poll throttling
pub const DEVICE_POLL_PURPOSE: &str = "device_flow_poll";

/// Replay-cache purpose for CIBA poll throttling
pub const BACKCHANNEL_POLL_PURPOSE: &str = "backchannel_poll";

/// A parsed token request from an authenticated client
#[derive(Debug, Clone, Default)]
pub struct TokenRequest {
    pub grant_type: String,
    pub client: Client,
    /// Requested scopes; empty when the request had no `scope`
    pub scopes: Vec<String>,
    /// RFC 8707 resource indicator
    pub resource: Option<String>,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub code_verifier: Option<String>,
    pub refresh_token: Option<String>,
    pub device_code: Option<String>,
    pub auth_req_id: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Raw `DPoP` header value
    pub dpop_proof: Option<String>,
    /// Token endpoint URL the request was sent to, used for `htu`
    pub request_url: String,
    /// HTTP method of the request, used for `htm`
    pub http_method: String,
    /// Parameters not modelled above, for extension grants
    pub parameters: HashMap<String, String>,
}

impl TokenRequest {
    pub fn new(grant_type: impl Into<String>, client: Client) -> Self {
        Self {
            grant_type: grant_type.into(),
            client,
            http_method: "POST".to_string(),
            ..Self::default()
        }
    }

    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn with_code(mut self, code: impl Into<String>, redirect_uri: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self.redirect_uri = Some(redirect_uri.into());
        self
    }

    pub fn with_code_verifier(mut self, verifier: impl Into<String>) -> Self {
        self.code_verifier = Some(verifier.into());
        self
    }

    pub fn with_refresh_token(mut self, handle: impl Into<String>) -> Self {
        self.refresh_token = Some(handle.into());
        self
    }

    pub fn with_device_code(mut self, handle: impl Into<String>) -> Self {
        self.device_code = Some(handle.into());
        self
    }

    pub fn with_auth_req_id(mut self, id: impl Into<String>) -> Self {
        self.auth_req_id = Some(id.into());
        self
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Attach a DPoP proof sent to `request_url`
    pub fn with_dpop_proof(mut self, proof: impl Into<String>, request_url: impl Into<String>) -> Self {
        self.dpop_proof = Some(proof.into());
        self.request_url = request_url.into();
        self
    }

    pub fn with_http_method(mut self, method: impl Into<String>) -> Self {
        self.http_method = method.into();
        self
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }
}

/// Everything token issuance needs from a successful validation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidatedTokenRequest {
    pub grant_type: String,
    pub client_id: String,
    /// Absent for client-only grants
    pub subject: Option<Principal>,
    pub session_id: Option<String>,
    /// Scopes the issued tokens carry
    pub scopes: Vec<String>,
    pub resource: Option<String>,
    pub authorization_code: Option<AuthorizationCode>,
    pub refresh_token: Option<RefreshToken>,
    pub refresh_token_handle: Option<String>,
    pub device_code: Option<DeviceCode>,
    pub backchannel_request: Option<BackchannelAuthenticationRequest>,
    pub proof_type: ProofType,
    /// Thumbprint of the validated DPoP key
    pub dpop_key_thumbprint: Option<String>,
    /// `cnf` value for issued tokens
    pub confirmation: Option<String>,
    /// Seconds the issued access token lives, from the client
    pub access_token_lifetime: u64,
    /// Claims added by extension grants
    pub custom: Map<String, Value>,
}

impl ValidatedTokenRequest {
    fn from_request(request: &TokenRequest) -> Self {
        Self {
            grant_type: request.grant_type.clone(),
            client_id: request.client.client_id.clone(),
            scopes: request.scopes.clone(),
            resource: request.resource.clone(),
            access_token_lifetime: request.client.access_token_lifetime,
            ..Self::default()
        }
    }

    pub fn subject_id(&self) -> Option<&str> {
        self.subject.as_ref().and_then(Principal::subject_id)
    }

    /// Describe the access token this request earns, bound to the proof key
    /// when one was presented
    pub fn access_token(&self, issuer: impl Into<String>, now: DateTime<Utc>) -> Token {
        let mut token = Token::access_token(issuer, self.client_id.clone(), now, self.access_token_lifetime);
        if let Some(subject_id) = self.subject_id() {
            token = token.with_claim(claim_types::SUBJECT, subject_id);
        }
        if let Some(session_id) = &self.session_id {
            token = token.with_claim(claim_types::SESSION_ID, session_id.clone());
        }
        for scope in &self.scopes {
            token = token.with_claim(claim_types::SCOPE, scope.clone());
        }
        token.confirmation = self.confirmation.clone();
        token
    }
}

/// Uniform outcome of token request validation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GrantValidationResult {
    pub failure: Option<GrantFailure>,
    pub validated_request: Option<ValidatedTokenRequest>,
}

impl GrantValidationResult {
    pub fn success(validated: ValidatedTokenRequest) -> Self {
        Self {
            failure: None,
            validated_request: Some(validated),
        }
    }

    pub fn failed(failure: GrantFailure) -> Self {
        Self {
            failure: Some(failure),
            validated_request: None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.failure.is_some()
    }

    pub fn error(&self) -> Option<OAuthErrorCode> {
        self.failure.as_ref().map(GrantFailure::error_code)
    }

    pub fn error_description(&self) -> Option<String> {
        self.failure.as_ref().and_then(GrantFailure::error_description)
    }

    /// Value for the `DPoP-Nonce` response header
    pub fn dpop_nonce(&self) -> Option<&str> {
        self.failure.as_ref().and_then(GrantFailure::server_nonce)
    }
}

/// Failure inside a [`GrantValidator`]
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error(transparent)]
    Rejected(#[from] GrantFailure),

    #[error(transparent)]
    Infrastructure(#[from] AuthError),
}

impl From<StoreError> for ValidationError {
    fn from(error: StoreError) -> Self {
        Self::Infrastructure(AuthError::Store(error))
    }
}

/// Validation strategy for one grant type
#[async_trait]
pub trait GrantValidator: Send + Sync + fmt::Debug {
    /// The `grant_type` value this validator handles
    fn grant_type(&self) -> &str;

    /// Validate `request`, filling in `validated`
    ///
    /// `validated` arrives with the client, requested scopes and any DPoP
    /// binding already set.
    ///
    /// # Errors
    /// `Rejected` for business-rule failures, `Infrastructure` otherwise.
    async fn validate(
        &self,
        request: &TokenRequest,
        validated: &mut ValidatedTokenRequest,
        cancel: &CancellationToken,
    ) -> Result<(), ValidationError>;
}

/// Dispatches token requests to the validator for their grant type
#[derive(Debug)]
pub struct GrantRequestValidator {
    validators: DashMap<String, Arc<dyn GrantValidator>>,
    dpop: Option<Arc<DpopProofValidator>>,
    audit: AuditLogger,
}

impl GrantRequestValidator {
    pub fn builder() -> GrantRequestValidatorBuilder {
        GrantRequestValidatorBuilder::default()
    }

    /// Register or replace the validator for its grant type
    pub fn register(&self, validator: Arc<dyn GrantValidator>) {
        debug!(grant_type = validator.grant_type(), "Registering grant validator");
        self.validators.insert(validator.grant_type().to_string(), validator);
    }

    pub fn supports(&self, grant_type: &str) -> bool {
        self.validators.contains_key(grant_type)
    }

    /// Registered grant types, sorted
    pub fn grant_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.validators.iter().map(|e| e.key().clone()).collect();
        types.sort();
        types
    }

    /// Validate a token request
    ///
    /// # Errors
    /// Returns `AuthError` for infrastructure failures only.
    pub async fn validate(
        &self,
        request: &TokenRequest,
        cancel: &CancellationToken,
    ) -> Result<GrantValidationResult, AuthError> {
        let client = &request.client;
        let grant_type = request.grant_type.as_str();

        if !client.enabled {
            return Ok(self.reject(request, GrantFailure::ClientDisabled));
        }
        if grant_type.is_empty() {
            return Ok(self.reject(request, GrantFailure::malformed("grant_type is missing")));
        }
        let Some(validator) = self.validators.get(grant_type).map(|e| Arc::clone(e.value())) else {
            return Ok(self.reject(
                request,
                GrantFailure::UnsupportedGrantType {
                    grant_type: grant_type.to_string(),
                },
            ));
        };
        if !client.allows_grant_type(grant_type) {
            return Ok(self.reject(
                request,
                GrantFailure::UnauthorizedGrantType {
                    grant_type: grant_type.to_string(),
                },
            ));
        }

        let mut validated = ValidatedTokenRequest::from_request(request);

        match request.dpop_proof.as_deref() {
            Some(proof) => {
                if let Err(failure) = self.validate_dpop(request, proof, &mut validated, cancel).await? {
                    return Ok(self.reject(request, failure));
                }
            }
            None if client.require_dpop => {
                return Ok(self.reject(request, GrantFailure::malformed("DPoP proof is required")));
            }
            None => {}
        }

        match validator.validate(request, &mut validated, cancel).await {
            Ok(()) => {
                debug!(
                    grant_type,
                    client_id = %client.client_id,
                    subject_id = validated.subject_id().unwrap_or("-"),
                    "Token request validated"
                );
                Ok(GrantValidationResult::success(validated))
            }
            Err(ValidationError::Rejected(failure)) => Ok(self.reject(request, failure)),
            Err(ValidationError::Infrastructure(e)) => {
                error!(
                    grant_type,
                    client_id = %client.client_id,
                    error = %e,
                    "Token request validation failed"
                );
                Err(e)
            }
        }
    }

    async fn validate_dpop(
        &self,
        request: &TokenRequest,
        proof: &str,
        validated: &mut ValidatedTokenRequest,
        cancel: &CancellationToken,
    ) -> Result<Result<(), GrantFailure>, AuthError> {
        let client = &request.client;
        let Some(dpop) = &self.dpop else {
            return Ok(Err(GrantFailure::dpop("DPoP is not enabled")));
        };

        let mut context = DpopProofValidationContext::new(proof, &request.http_method, &request.request_url)
            .with_client_id(&client.client_id);
        if let Some(mode) = client.dpop_validation_mode {
            context = context.with_validation_mode(mode);
        }

        let result = dpop.validate(&context, cancel).await?;
        if let Some(error) = result.error {
            self.audit.log(SecurityEvent::DpopProofRejected {
                client_id: client.client_id.clone(),
                category: error.category().to_string(),
                reason: error.to_string(),
            });
            return Ok(Err(GrantFailure::InvalidDpopProof {
                reason: error.to_string(),
                server_nonce: result.server_issued_nonce,
            }));
        }

        validated.proof_type = ProofType::DPoP;
        validated.dpop_key_thumbprint = result.jkt;
        validated.confirmation = result.confirmation;
        Ok(Ok(()))
    }

    fn reject(&self, request: &TokenRequest, failure: GrantFailure) -> GrantValidationResult {
        warn!(
            grant_type = %request.grant_type,
            client_id = %request.client.client_id,
            error = %failure.error_code(),
            category = failure.category(),
            reason = %failure,
            "Token request rejected"
        );
        GrantValidationResult::failed(failure)
    }
}

/// Builder for [`GrantRequestValidator`]
#[derive(Debug, Default)]
pub struct GrantRequestValidatorBuilder {
    validators: Vec<Arc<dyn GrantValidator>>,
    dpop: Option<Arc<DpopProofValidator>>,
    audit: Option<AuditLogger>,
}

impl GrantRequestValidatorBuilder {
    /// Validate DPoP proofs attached to token requests
    pub fn dpop(mut self, validator: Arc<DpopProofValidator>) -> Self {
        self.dpop = Some(validator);
        self
    }

    pub fn audit(mut self, audit: AuditLogger) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn grant(mut self, validator: Arc<dyn GrantValidator>) -> Self {
        self.validators.push(validator);
        self
    }

    /// Register an extension grant; issued subjects are checked with `profile`
    pub fn extension(
        self,
        validator: Arc<dyn ExtensionGrantValidator>,
        profile: Arc<dyn ProfileService>,
    ) -> Self {
        self.grant(Arc::new(ExtensionGrantAdapter::new(validator, profile)))
    }

    pub fn build(self) -> GrantRequestValidator {
        let dispatcher = GrantRequestValidator {
            validators: DashMap::new(),
            dpop: self.dpop,
            audit: self.audit.unwrap_or_default(),
        };
        for validator in self.validators {
            dispatcher.register(validator);
        }
        dispatcher
    }
}

/// Whether every requested scope was authorized
pub(crate) fn is_scope_subset(requested: &[String], authorized: &[String]) -> bool {
    requested.iter().all(|scope| authorized.contains(scope))
}

/// Active-subject check shared by the user-bound grants
pub(crate) async fn ensure_active(
    profile: &dyn ProfileService,
    subject: &Principal,
    client: &Client,
    caller: ProfileCaller,
    cancel: &CancellationToken,
) -> Result<(), ValidationError> {
    if profile.is_active(subject, client, caller, cancel).await? {
        Ok(())
    } else {
        warn!(subject_id = ?subject.subject_id(), ?caller, "Subject is not active");
        Err(GrantFailure::SubjectInactive.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Fixed(&'static str);

    #[async_trait]
    impl GrantValidator for Fixed {
        fn grant_type(&self) -> &str {
            self.0
        }

        async fn validate(
            &self,
            _request: &TokenRequest,
            validated: &mut ValidatedTokenRequest,
            _cancel: &CancellationToken,
        ) -> Result<(), ValidationError> {
            validated.subject = Some(Principal::new("alice", None));
            Ok(())
        }
    }

    fn dispatcher() -> GrantRequestValidator {
        GrantRequestValidator::builder().grant(Arc::new(Fixed("custom"))).build()
    }

    #[tokio::test]
    async fn test_precheck_order() {
        let dispatcher = dispatcher();
        let cancel = CancellationToken::new();

        let mut disabled = Client::new("web").with_grant_types(["custom"]);
        disabled.enabled = false;
        let result = dispatcher
            .validate(&TokenRequest::new("custom", disabled), &cancel)
            .await
            .unwrap();
        assert_eq!(result.error(), Some(OAuthErrorCode::InvalidClient));

        let client = Client::new("web").with_grant_types(["custom"]);
        let result = dispatcher.validate(&TokenRequest::new("", client.clone()), &cancel).await.unwrap();
        assert_eq!(result.error(), Some(OAuthErrorCode::InvalidRequest));

        let result = dispatcher
            .validate(&TokenRequest::new("magic", client.clone()), &cancel)
            .await
            .unwrap();
        assert_eq!(result.error(), Some(OAuthErrorCode::UnsupportedGrantType));

        let result = dispatcher
            .validate(&TokenRequest::new("custom", Client::new("other")), &cancel)
            .await
            .unwrap();
        assert_eq!(result.error(), Some(OAuthErrorCode::UnauthorizedClient));

        let result = dispatcher.validate(&TokenRequest::new("custom", client), &cancel).await.unwrap();
        assert!(!result.is_error());
        assert_eq!(
            result.validated_request.unwrap().subject_id(),
            Some("alice")
        );
    }

    #[tokio::test]
    async fn test_required_dpop_without_proof() {
        let dispatcher = dispatcher();
        let mut client = Client::new("web").with_grant_types(["custom"]);
        client.require_dpop = true;

        let result = dispatcher
            .validate(&TokenRequest::new("custom", client), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.error(), Some(OAuthErrorCode::InvalidRequest));
    }

    #[tokio::test]
    async fn test_access_token_uses_client_lifetime() {
        let mut client = Client::new("web").with_grant_types(["custom"]);
        client.access_token_lifetime = 900;
        let result = dispatcher()
            .validate(&TokenRequest::new("custom", client).with_scopes(["api"]), &CancellationToken::new())
            .await
            .unwrap();
        let validated = result.validated_request.expect("validated");

        let now = Utc::now();
        let token = validated.access_token("https://issuer", now);

        assert_eq!(token.lifetime, 900);
        assert_eq!(token.creation_time, now);
        assert_eq!(token.client_id, "web");
        assert_eq!(token.subject_id(), Some("alice"));
        assert_eq!(token.scopes(), vec!["api"]);
        assert_eq!(token.confirmation, None);
    }

    #[tokio::test]
    async fn test_runtime_registration() {
        let dispatcher = GrantRequestValidator::builder().build();
        assert!(!dispatcher.supports("custom"));
        dispatcher.register(Arc::new(Fixed("custom")));
        assert_eq!(dispatcher.grant_types(), vec!["custom".to_string()]);
    }
}
