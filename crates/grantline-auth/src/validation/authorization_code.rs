use std::sync::Arc;

use async_trait::async_trait;
use grantline_store::{AuthorizationCode, AuthorizationCodeStore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::pkce::{self, CodeChallengeMethod};
use super::{GrantValidator, TokenRequest, ValidatedTokenRequest, ValidationError, ensure_active};
use crate::client::{Client, grant_types};
use crate::errors::GrantFailure;
use crate::services::{ProfileCaller, ProfileService};

/// `authorization_code` grant
///
/// The code is consumed before any other check, so a code presented with a
/// wrong verifier or redirect URI cannot be retried.
#[derive(Debug, Clone)]
pub struct AuthorizationCodeValidator {
    codes: AuthorizationCodeStore,
    profile: Arc<dyn ProfileService>,
}

impl AuthorizationCodeValidator {
    pub fn new(codes: AuthorizationCodeStore, profile: Arc<dyn ProfileService>) -> Self {
        Self { codes, profile }
    }
}

#[async_trait]
impl GrantValidator for AuthorizationCodeValidator {
    fn grant_type(&self) -> &str {
        grant_types::AUTHORIZATION_CODE
    }

    async fn validate(
        &self,
        request: &TokenRequest,
        validated: &mut ValidatedTokenRequest,
        cancel: &CancellationToken,
    ) -> Result<(), ValidationError> {
        let client = &request.client;
        let handle = request
            .code
            .as_deref()
            .filter(|code| !code.is_empty())
            .ok_or_else(|| GrantFailure::malformed("code is missing"))?;

        let Some(code) = self.codes.take_authorization_code(handle, cancel).await? else {
            warn!(client_id = %client.client_id, "Authorization code not found or expired");
            return Err(GrantFailure::GrantNotFound.into());
        };

        if code.client_id != client.client_id {
            warn!(
                client_id = %client.client_id,
                code_client_id = %code.client_id,
                "Authorization code issued to another client"
            );
            return Err(GrantFailure::ClientMismatch.into());
        }

        match request.redirect_uri.as_deref() {
            None | Some("") => return Err(GrantFailure::malformed("redirect_uri is missing").into()),
            Some(uri) if uri != code.redirect_uri => {
                warn!(client_id = %client.client_id, "redirect_uri does not match authorization request");
                return Err(GrantFailure::policy("redirect_uri mismatch").into());
            }
            Some(_) => {}
        }

        check_pkce(&code, client, request.code_verifier.as_deref())?;

        if let Some(bound) = code.dpop_key_thumbprint.as_deref() {
            match validated.dpop_key_thumbprint.as_deref() {
                None => {
                    return Err(GrantFailure::dpop("authorization code is bound to a DPoP key").into());
                }
                Some(presented) if presented != bound => {
                    return Err(GrantFailure::dpop("DPoP key does not match authorization request").into());
                }
                Some(_) => {}
            }
        }

        ensure_active(
            self.profile.as_ref(),
            &code.subject,
            client,
            ProfileCaller::AuthorizationCodeValidation,
            cancel,
        )
        .await?;

        debug!(client_id = %client.client_id, "Authorization code redeemed");
        validated.subject = Some(code.subject.clone());
        validated.session_id = code.session_id.clone();
        validated.scopes = code.requested_scopes.clone();
        validated.authorization_code = Some(code);
        Ok(())
    }
}

fn check_pkce(code: &AuthorizationCode, client: &Client, verifier: Option<&str>) -> Result<(), GrantFailure> {
    let verifier = verifier.filter(|v| !v.is_empty());

    if !code.has_code_challenge() {
        if client.require_pkce {
            warn!(client_id = %client.client_id, "Client requires PKCE but code has no challenge");
            return Err(GrantFailure::policy("code challenge required"));
        }
        if verifier.is_some() {
            return Err(GrantFailure::policy("code_verifier without code challenge"));
        }
        return Ok(());
    }

    let Some(verifier) = verifier else {
        return Err(GrantFailure::policy("code_verifier is missing"));
    };
    if !pkce::is_valid_verifier(verifier) {
        return Err(GrantFailure::policy("code_verifier is malformed"));
    }

    let method = match code.code_challenge_method.as_deref() {
        None | Some("") => CodeChallengeMethod::Plain,
        Some(method) => method.parse().map_err(GrantFailure::policy)?,
    };
    if method == CodeChallengeMethod::Plain && !client.allow_plain_text_pkce {
        return Err(GrantFailure::policy("plain code challenge not allowed"));
    }

    let challenge = code.code_challenge.as_deref().unwrap_or_default();
    if !pkce::verify(verifier, challenge, method) {
        warn!(client_id = %client.client_id, method = method.as_str(), "PKCE verification failed");
        return Err(GrantFailure::policy("code_verifier does not match"));
    }
    Ok(())
}
