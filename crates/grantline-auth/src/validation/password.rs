use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{GrantValidator, TokenRequest, ValidatedTokenRequest, ValidationError, ensure_active};
use crate::client::grant_types;
use crate::errors::GrantFailure;
use crate::services::{ProfileCaller, ProfileService, ResourceOwnerPasswordValidator};

/// Resource owner password credentials grant
#[derive(Debug, Clone)]
pub struct PasswordGrantValidator {
    credentials: Arc<dyn ResourceOwnerPasswordValidator>,
    profile: Arc<dyn ProfileService>,
}

impl PasswordGrantValidator {
    pub fn new(credentials: Arc<dyn ResourceOwnerPasswordValidator>, profile: Arc<dyn ProfileService>) -> Self {
        Self { credentials, profile }
    }
}

#[async_trait]
impl GrantValidator for PasswordGrantValidator {
    fn grant_type(&self) -> &str {
        grant_types::PASSWORD
    }

    async fn validate(
        &self,
        request: &TokenRequest,
        validated: &mut ValidatedTokenRequest,
        cancel: &CancellationToken,
    ) -> Result<(), ValidationError> {
        let client = &request.client;
        let (Some(username), Some(password)) = (
            request.username.as_deref().filter(|u| !u.is_empty()),
            request.password.as_deref(),
        ) else {
            return Err(GrantFailure::policy("username or password missing").into());
        };

        if !client.allows_scopes(&request.scopes) {
            return Err(GrantFailure::scope("requested scope is not allowed for this client").into());
        }

        let Some(subject) = self.credentials.validate(username, password, client, cancel).await? else {
            warn!(client_id = %client.client_id, "Resource owner credentials rejected");
            return Err(GrantFailure::policy("invalid resource owner credentials").into());
        };

        ensure_active(
            self.profile.as_ref(),
            &subject,
            client,
            ProfileCaller::ResourceOwnerValidation,
            cancel,
        )
        .await?;

        debug!(client_id = %client.client_id, "Resource owner authenticated");
        validated.session_id = subject.session_id().map(str::to_string);
        validated.subject = Some(subject);
        validated.scopes = request.scopes.clone();
        Ok(())
    }
}
