//! Per-request validation input and output

use serde_json::{Map, Value};

use crate::errors::{DpopError, INVALID_DPOP_PROOF};
use crate::options::DpopValidationMode;

/// Input to [`crate::DpopProofValidator::validate`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DpopProofValidationContext {
    /// Compact JWT from the `DPoP` request header
    pub proof_token: String,
    /// Access token presented alongside the proof (resource requests)
    pub access_token: Option<String>,
    /// Claims of that access token, used for the `cnf.jkt` binding check
    pub access_token_claims: Option<Map<String, Value>>,
    /// HTTP method of the request
    pub method: String,
    /// Full request URL as received
    pub url: String,
    /// Client-specific freshness mode
    pub validation_mode: Option<DpopValidationMode>,
    /// Client the proof was presented by, for logging
    pub client_id: Option<String>,
}

impl DpopProofValidationContext {
    /// Context for a token-endpoint style request
    pub fn new(proof_token: impl Into<String>, method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            proof_token: proof_token.into(),
            method: method.into(),
            url: url.into(),
            ..Self::default()
        }
    }

    /// Bind the proof to an access token
    pub fn with_access_token(mut self, token: impl Into<String>, claims: Option<Map<String, Value>>) -> Self {
        self.access_token = Some(token.into());
        self.access_token_claims = claims;
        self
    }

    /// Override the freshness mode
    pub fn with_validation_mode(mut self, mode: DpopValidationMode) -> Self {
        self.validation_mode = Some(mode);
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }
}

/// Outcome of proof validation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DpopProofValidationResult {
    /// Rule violation, if any
    pub error: Option<DpopError>,
    /// Embedded public JWK as JSON
    pub json_web_key: Option<String>,
    /// RFC 7638 thumbprint of the key
    pub jkt: Option<String>,
    /// `cnf` claim value to place in issued tokens
    pub confirmation: Option<String>,
    pub token_id: Option<String>,
    /// `iat` in epoch seconds
    pub issued_at: Option<i64>,
    /// Nonce the client sent
    pub nonce: Option<String>,
    /// Fresh nonce to return in `DPoP-Nonce`
    pub server_issued_nonce: Option<String>,
    /// Verified payload claims
    pub payload: Option<Map<String, Value>>,
}

impl DpopProofValidationResult {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// `invalid_dpop_proof` on failure
    pub fn error_code(&self) -> Option<&'static str> {
        self.error.as_ref().map(|_| INVALID_DPOP_PROOF)
    }

    /// Detailed failure reason, for logs only
    pub fn error_description(&self) -> Option<String> {
        self.error.as_ref().map(ToString::to_string)
    }

    pub(crate) fn fail(&mut self, error: DpopError) {
        self.error = Some(error);
    }
}
