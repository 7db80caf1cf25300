//! The five proof validation phases
//!
//! Each phase is a [`ProofValidationStep`] working on a shared
//! [`ProofValidationState`]. Steps run in [`ValidationPhase`] order and the
//! first failure ends the pipeline.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, Utc};
use grantline_store::ReplayCache;
use jsonwebtoken::jwk::Jwk;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::context::{DpopProofValidationContext, DpopProofValidationResult};
use crate::errors::DpopError;
use crate::nonce::NonceSealer;
use crate::options::{DpopOptions, DpopValidationMode};
use crate::thumbprint::{
    PRIVATE_JWK_MEMBERS, access_token_hash, compute_jwk_thumbprint, confirmation_for, constant_time_eq,
};
use crate::{DPOP_JWT_TYPE, REPLAY_PURPOSE, Result};

/// Asymmetric algorithms accepted for proofs
pub const SUPPORTED_ALGORITHMS: [&str; 9] = [
    "RS256", "RS384", "RS512", "PS256", "PS384", "PS512", "ES256", "ES384", "ES512",
];

/// Validation phases, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ValidationPhase {
    Header,
    Signature,
    Payload,
    Freshness,
    Replay,
}

impl ValidationPhase {
    pub const ALL: [ValidationPhase; 5] = [
        Self::Header,
        Self::Signature,
        Self::Payload,
        Self::Freshness,
        Self::Replay,
    ];
}

/// Mutable state shared by the steps of one validation
pub struct ProofValidationState {
    pub context: DpopProofValidationContext,
    pub options: DpopOptions,
    /// Freshness mode after client override
    pub mode: DpopValidationMode,
    pub now: DateTime<Utc>,
    /// Header `alg`, set by the header phase
    pub algorithm: Option<String>,
    /// Embedded key, set by the header phase
    pub verification_key: Option<DecodingKey>,
    pub result: DpopProofValidationResult,
}

impl fmt::Debug for ProofValidationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProofValidationState")
            .field("mode", &self.mode)
            .field("now", &self.now)
            .field("algorithm", &self.algorithm)
            .field("result", &self.result)
            .finish_non_exhaustive()
    }
}

impl ProofValidationState {
    fn payload(&self) -> Result<&Map<String, Value>> {
        self.result
            .payload
            .as_ref()
            .ok_or_else(|| DpopError::malformed("payload not verified"))
    }
}

/// One phase of proof validation
#[async_trait]
pub trait ProofValidationStep: Send + Sync + fmt::Debug {
    /// Phase this step implements
    fn phase(&self) -> ValidationPhase;

    /// Run the check, recording findings on `state.result`
    ///
    /// # Errors
    /// Returns the rule violation, or an infrastructure error.
    async fn run(&self, state: &mut ProofValidationState, cancel: &CancellationToken) -> Result<()>;
}

/// Strip query and fragment from a request URL without any other normalization
///
/// # Errors
/// Returns `DpopError::FieldMismatch` when the request URL is not absolute
/// http(s).
pub fn request_htu(url: &str) -> Result<&str> {
    let parsed = url::Url::parse(url).map_err(|_| DpopError::field("Invalid request URL."))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(DpopError::field("Invalid request URL."));
    }
    let end = url.find(['?', '#']).unwrap_or(url.len());
    Ok(&url[..end])
}

fn decode_segment(segment: &str, what: &str) -> Result<Map<String, Value>> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| DpopError::malformed(format!("{what} is not base64url")))?;
    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(map)) => Ok(map),
        _ => Err(DpopError::malformed(format!("{what} is not a JSON object"))),
    }
}

fn jwt_algorithm(alg: &str) -> Option<Algorithm> {
    Some(match alg {
        "RS256" => Algorithm::RS256,
        "RS384" => Algorithm::RS384,
        "RS512" => Algorithm::RS512,
        "PS256" => Algorithm::PS256,
        "PS384" => Algorithm::PS384,
        "PS512" => Algorithm::PS512,
        "ES256" => Algorithm::ES256,
        "ES384" => Algorithm::ES384,
        _ => return None,
    })
}

/// `typ`, `alg` and `jwk` checks; records thumbprint and confirmation
#[derive(Debug, Default)]
pub struct HeaderStep;

#[async_trait]
impl ProofValidationStep for HeaderStep {
    fn phase(&self) -> ValidationPhase {
        ValidationPhase::Header
    }

    async fn run(&self, state: &mut ProofValidationState, _cancel: &CancellationToken) -> Result<()> {
        let segments: Vec<&str> = state.context.proof_token.split('.').collect();
        let [header_segment, _, _] = segments.as_slice() else {
            return Err(DpopError::malformed("expected three dot-separated segments"));
        };
        let header = decode_segment(header_segment, "header")?;

        if header.get("typ").and_then(Value::as_str) != Some(DPOP_JWT_TYPE) {
            return Err(DpopError::policy("Invalid 'typ' value."));
        }

        let alg = header.get("alg").and_then(Value::as_str).unwrap_or_default();
        if !SUPPORTED_ALGORITHMS.contains(&alg) {
            return Err(DpopError::policy("Invalid 'alg' value."));
        }

        let Some(Value::Object(jwk)) = header.get("jwk") else {
            return Err(DpopError::policy("Invalid 'jwk' value."));
        };
        if let Some(member) = PRIVATE_JWK_MEMBERS.iter().find(|m| jwk.contains_key(**m)) {
            debug!(member, "DPoP jwk carries private key material");
            return Err(DpopError::policy("'jwk' value contains a private key."));
        }

        let thumbprint = compute_jwk_thumbprint(jwk)?;
        let parsed: Jwk = serde_json::from_value(Value::Object(jwk.clone()))
            .map_err(|_| DpopError::policy("Invalid 'jwk' value."))?;
        let key = DecodingKey::from_jwk(&parsed).map_err(|_| DpopError::policy("Invalid 'jwk' value."))?;

        state.algorithm = Some(alg.to_string());
        state.verification_key = Some(key);
        state.result.json_web_key = Some(Value::Object(jwk.clone()).to_string());
        state.result.confirmation = Some(confirmation_for(&thumbprint));
        state.result.jkt = Some(thumbprint);
        Ok(())
    }
}

/// Signature verification with the embedded key
#[derive(Debug, Default)]
pub struct SignatureStep;

#[async_trait]
impl ProofValidationStep for SignatureStep {
    fn phase(&self) -> ValidationPhase {
        ValidationPhase::Signature
    }

    async fn run(&self, state: &mut ProofValidationState, _cancel: &CancellationToken) -> Result<()> {
        let (Some(alg), Some(key)) = (state.algorithm.as_deref(), state.verification_key.as_ref()) else {
            return Err(DpopError::InvalidSignature);
        };
        // ES512 passes the allowlist but has no verifier in the JWT backend.
        let Some(algorithm) = jwt_algorithm(alg) else {
            debug!(alg, "No verifier for DPoP algorithm");
            return Err(DpopError::InvalidSignature);
        };

        let mut validation = Validation::new(algorithm);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims = HashSet::new();

        let data = jsonwebtoken::decode::<Map<String, Value>>(&state.context.proof_token, key, &validation)
            .map_err(|e| {
                debug!(error = %e, "DPoP signature verification failed");
                DpopError::InvalidSignature
            })?;
        state.result.payload = Some(data.claims);
        Ok(())
    }
}

/// `jti`, `htm`, `htu`, `iat`, `ath` and `cnf` checks
#[derive(Debug, Default)]
pub struct PayloadStep;

#[async_trait]
impl ProofValidationStep for PayloadStep {
    fn phase(&self) -> ValidationPhase {
        ValidationPhase::Payload
    }

    async fn run(&self, state: &mut ProofValidationState, _cancel: &CancellationToken) -> Result<()> {
        let payload = state.payload()?;

        let jti = payload
            .get("jti")
            .and_then(Value::as_str)
            .filter(|jti| !jti.is_empty())
            .ok_or_else(|| DpopError::field("Invalid 'jti' value."))?
            .to_string();

        if payload.get("htm").and_then(Value::as_str) != Some(state.context.method.as_str()) {
            return Err(DpopError::field("Invalid 'htm' value."));
        }

        let expected_htu = request_htu(&state.context.url)?;
        if payload.get("htu").and_then(Value::as_str) != Some(expected_htu) {
            return Err(DpopError::field("Invalid 'htu' value."));
        }

        let iat = payload
            .get("iat")
            .and_then(Value::as_i64)
            .ok_or_else(|| DpopError::field("Invalid 'iat' value."))?;

        let nonce = match payload.get("nonce") {
            None | Some(Value::Null) => None,
            Some(Value::String(nonce)) => Some(nonce.clone()),
            Some(_) => return Err(DpopError::field("Invalid 'nonce' value.")),
        };

        if let Some(access_token) = state.context.access_token.as_deref() {
            let expected = access_token_hash(access_token);
            let ath = payload.get("ath").and_then(Value::as_str).unwrap_or_default();
            if !constant_time_eq(ath, &expected) {
                return Err(DpopError::field("Invalid 'ath' value."));
            }
        }

        if let Some(claims) = state.context.access_token_claims.as_ref()
            && let Some(bound) = claims
                .get("cnf")
                .and_then(|cnf| cnf.get("jkt"))
                .and_then(Value::as_str)
        {
            let jkt = state.result.jkt.as_deref().unwrap_or_default();
            if !constant_time_eq(bound, jkt) {
                return Err(DpopError::field("Invalid 'cnf' value."));
            }
        }

        state.result.token_id = Some(jti);
        state.result.issued_at = Some(iat);
        state.result.nonce = nonce;
        Ok(())
    }
}

fn is_expired(now: DateTime<Utc>, issued_at: i64, lifetime: Duration, skew: Duration) -> bool {
    let Some(issued) = DateTime::<Utc>::from_timestamp(issued_at, 0) else {
        return true;
    };
    if issued > now + skew {
        return true;
    }
    issued + lifetime < now - skew
}

/// `iat` and/or server nonce freshness
#[derive(Debug)]
pub struct FreshnessStep {
    sealer: Arc<dyn NonceSealer>,
}

impl FreshnessStep {
    pub fn new(sealer: Arc<dyn NonceSealer>) -> Self {
        Self { sealer }
    }

    fn nonce_failure(&self, state: &mut ProofValidationState, reason: &str) -> Result<()> {
        state.result.server_issued_nonce = Some(self.sealer.seal(state.now)?);
        Err(DpopError::NonceMissingOrInvalid {
            reason: reason.to_string(),
        })
    }
}

#[async_trait]
impl ProofValidationStep for FreshnessStep {
    fn phase(&self) -> ValidationPhase {
        ValidationPhase::Freshness
    }

    async fn run(&self, state: &mut ProofValidationState, _cancel: &CancellationToken) -> Result<()> {
        let lifetime = state.options.proof_token_lifetime();

        if state.mode.checks_iat() {
            let iat = state
                .result
                .issued_at
                .ok_or_else(|| DpopError::field("Invalid 'iat' value."))?;
            if is_expired(state.now, iat, lifetime, state.options.client_clock_skew()) {
                return Err(DpopError::Expired {
                    reason: "Invalid 'iat' value.".to_string(),
                });
            }
        }

        if state.mode.checks_nonce() {
            let Some(nonce) = state.result.nonce.clone() else {
                return self.nonce_failure(state, "Missing 'nonce' value.");
            };
            let Some(issued_at) = self.sealer.unseal(&nonce) else {
                return self.nonce_failure(state, "Invalid 'nonce' value.");
            };
            if is_expired(state.now, issued_at, lifetime, state.options.server_clock_skew()) {
                return self.nonce_failure(state, "Invalid 'nonce' value.");
            }
        }
        Ok(())
    }
}

/// `jti` replay detection; records the `jti` only when every other check passed
#[derive(Debug)]
pub struct ReplayStep {
    cache: Arc<dyn ReplayCache>,
}

impl ReplayStep {
    pub fn new(cache: Arc<dyn ReplayCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl ProofValidationStep for ReplayStep {
    fn phase(&self) -> ValidationPhase {
        ValidationPhase::Replay
    }

    async fn run(&self, state: &mut ProofValidationState, cancel: &CancellationToken) -> Result<()> {
        let jti = state
            .result
            .token_id
            .clone()
            .ok_or_else(|| DpopError::field("Invalid 'jti' value."))?;
        let expiration = state.now + state.options.replay_retention(state.mode);

        let inserted = self
            .cache
            .add_if_absent(REPLAY_PURPOSE, &jti, expiration, cancel)
            .await?;
        if !inserted {
            return Err(DpopError::Replayed);
        }
        trace!(%expiration, "DPoP jti recorded");
        Ok(())
    }
}
