use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use grantline_store::Principal;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use super::{GrantValidator, TokenRequest, ValidatedTokenRequest, ValidationError, ensure_active};
use crate::errors::{GrantFailure, OAuthErrorCode};
use crate::services::{ProfileCaller, ProfileService};

/// Outcome reported by an [`ExtensionGrantValidator`]
#[derive(Debug, Clone, PartialEq)]
pub enum ExtensionGrantResult {
    Success {
        /// `None` issues a client-only token
        subject: Option<Principal>,
        /// Extra claims for the issued tokens
        custom: Map<String, Value>,
    },
    Failure {
        code: OAuthErrorCode,
        description: Option<String>,
    },
}

impl ExtensionGrantResult {
    pub fn success(subject: Option<Principal>) -> Self {
        Self::Success {
            subject,
            custom: Map::new(),
        }
    }

    pub fn invalid_grant(description: impl Into<String>) -> Self {
        Self::Failure {
            code: OAuthErrorCode::InvalidGrant,
            description: Some(description.into()),
        }
    }
}

/// Validator for a custom `grant_type`
#[async_trait]
pub trait ExtensionGrantValidator: Send + Sync + fmt::Debug {
    fn grant_type(&self) -> &str;

    /// # Errors
    /// Return `AuthError` for infrastructure failures only.
    async fn validate(
        &self,
        request: &TokenRequest,
        cancel: &CancellationToken,
    ) -> crate::Result<ExtensionGrantResult>;
}

/// Runs an [`ExtensionGrantValidator`] as a [`GrantValidator`]
///
/// Subjects returned by the extension must still be active.
#[derive(Debug, Clone)]
pub struct ExtensionGrantAdapter {
    inner: Arc<dyn ExtensionGrantValidator>,
    profile: Arc<dyn ProfileService>,
}

impl ExtensionGrantAdapter {
    pub fn new(inner: Arc<dyn ExtensionGrantValidator>, profile: Arc<dyn ProfileService>) -> Self {
        Self { inner, profile }
    }
}

#[async_trait]
impl GrantValidator for ExtensionGrantAdapter {
    fn grant_type(&self) -> &str {
        self.inner.grant_type()
    }

    async fn validate(
        &self,
        request: &TokenRequest,
        validated: &mut ValidatedTokenRequest,
        cancel: &CancellationToken,
    ) -> Result<(), ValidationError> {
        match self.inner.validate(request, cancel).await? {
            ExtensionGrantResult::Failure { code, description } => {
                Err(GrantFailure::Extension { code, description }.into())
            }
            ExtensionGrantResult::Success { subject, custom } => {
                if let Some(subject) = &subject {
                    ensure_active(
                        self.profile.as_ref(),
                        subject,
                        &request.client,
                        ProfileCaller::ExtensionGrantValidation,
                        cancel,
                    )
                    .await?;
                }
                validated.session_id = subject.as_ref().and_then(Principal::session_id).map(str::to_string);
                validated.subject = subject;
                validated.custom = custom;
                Ok(())
            }
        }
    }
}
