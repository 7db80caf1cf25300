use std::sync::Arc;

use async_trait::async_trait;
use grantline_store::{ProofType, RefreshToken};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::{GrantValidator, TokenRequest, ValidatedTokenRequest, ValidationError, is_scope_subset};
use crate::client::grant_types;
use crate::errors::GrantFailure;
use crate::refresh::{RefreshTokenService, TokenValidationResult};

/// `refresh_token` grant
#[derive(Debug, Clone)]
pub struct RefreshTokenGrantValidator {
    service: Arc<RefreshTokenService>,
}

impl RefreshTokenGrantValidator {
    pub fn new(service: Arc<RefreshTokenService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl GrantValidator for RefreshTokenGrantValidator {
    fn grant_type(&self) -> &str {
        grant_types::REFRESH_TOKEN
    }

    async fn validate(
        &self,
        request: &TokenRequest,
        validated: &mut ValidatedTokenRequest,
        cancel: &CancellationToken,
    ) -> Result<(), ValidationError> {
        let client = &request.client;
        let handle = request
            .refresh_token
            .as_deref()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| GrantFailure::malformed("refresh_token is missing"))?;

        let token = match self.service.validate_refresh_token(handle, client, cancel).await? {
            TokenValidationResult::Valid(token) => *token,
            TokenValidationResult::Invalid(failure) => return Err(failure.into()),
        };

        if request.scopes.is_empty() {
            validated.scopes = token.authorized_scopes.clone();
        } else if !is_scope_subset(&request.scopes, &token.authorized_scopes) {
            return Err(GrantFailure::scope("requested scope exceeds the original grant").into());
        }

        if !token.is_resource_allowed(request.resource.as_deref()) {
            return Err(GrantFailure::InvalidTarget {
                resource: request.resource.clone().unwrap_or_default(),
            }
            .into());
        }

        if token.proof_type == ProofType::DPoP {
            let bound = bound_thumbprint(&token);
            match (validated.dpop_key_thumbprint.as_deref(), bound.as_deref()) {
                (None, _) => return Err(GrantFailure::dpop("refresh token is DPoP-bound").into()),
                (Some(_), None) => {
                    warn!(client_id = %client.client_id, "DPoP-bound refresh token carries no key binding");
                    return Err(GrantFailure::dpop("refresh token has no bound key").into());
                }
                (Some(presented), Some(bound)) if presented != bound => {
                    warn!(client_id = %client.client_id, "DPoP key does not match refresh token binding");
                    return Err(GrantFailure::dpop("DPoP key does not match refresh token").into());
                }
                (Some(_), Some(_)) => {}
            }
        }

        validated.subject = Some(token.subject.clone());
        validated.session_id = token.session_id.clone();
        validated.refresh_token_handle = Some(handle.to_string());
        validated.refresh_token = Some(token);
        Ok(())
    }
}

/// `jkt` from the confirmation of any access token issued with the refresh token
fn bound_thumbprint(token: &RefreshToken) -> Option<String> {
    token.access_tokens.values().find_map(|access_token| {
        let confirmation: Value = serde_json::from_str(access_token.confirmation.as_deref()?).ok()?;
        confirmation.get("jkt")?.as_str().map(str::to_string)
    })
}
