use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{GrantValidator, TokenRequest, ValidatedTokenRequest, ValidationError};
use crate::client::{OFFLINE_ACCESS_SCOPE, grant_types};
use crate::errors::GrantFailure;

/// `client_credentials` grant; tokens carry no subject
#[derive(Debug, Default, Clone, Copy)]
pub struct ClientCredentialsValidator;

#[async_trait]
impl GrantValidator for ClientCredentialsValidator {
    fn grant_type(&self) -> &str {
        grant_types::CLIENT_CREDENTIALS
    }

    async fn validate(
        &self,
        request: &TokenRequest,
        validated: &mut ValidatedTokenRequest,
        _cancel: &CancellationToken,
    ) -> Result<(), ValidationError> {
        let client = &request.client;

        if request.scopes.iter().any(|s| s == OFFLINE_ACCESS_SCOPE) {
            return Err(GrantFailure::scope("offline_access is not allowed for client credentials").into());
        }

        let scopes = if request.scopes.is_empty() {
            client
                .allowed_scopes
                .iter()
                .filter(|s| *s != OFFLINE_ACCESS_SCOPE)
                .cloned()
                .collect()
        } else if client.allows_scopes(&request.scopes) {
            request.scopes.clone()
        } else {
            return Err(GrantFailure::scope("requested scope is not allowed for this client").into());
        };

        if scopes.is_empty() {
            return Err(GrantFailure::scope("no scopes available for this client").into());
        }

        validated.subject = None;
        validated.scopes = scopes;
        Ok(())
    }
}
