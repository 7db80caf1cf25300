//! Collaborator traits implemented by the hosting server
//!
//! Each trait has a minimal in-crate implementation so the token services can
//! run without a user store or an HTTP client.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use dashmap::DashMap;
use grantline_store::Principal;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::Result;
use crate::client::Client;

/// Which flow is asking whether a subject is active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileCaller {
    AuthorizationCodeValidation,
    RefreshTokenValidation,
    ResourceOwnerValidation,
    DeviceCodeValidation,
    BackchannelAuthenticationRequestIdValidation,
    ExtensionGrantValidation,
}

/// Decides whether a subject may still receive tokens
#[async_trait]
pub trait ProfileService: Send + Sync + fmt::Debug {
    /// # Errors
    /// Returns `AuthError::Collaborator` when the user store is unavailable.
    async fn is_active(
        &self,
        subject: &Principal,
        client: &Client,
        caller: ProfileCaller,
        cancel: &CancellationToken,
    ) -> Result<bool>;
}

/// Treats every subject as active
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysActiveProfileService;

#[async_trait]
impl ProfileService for AlwaysActiveProfileService {
    async fn is_active(
        &self,
        _subject: &Principal,
        _client: &Client,
        _caller: ProfileCaller,
        _cancel: &CancellationToken,
    ) -> Result<bool> {
        Ok(true)
    }
}

/// Verifies resource owner credentials for the `password` grant
#[async_trait]
pub trait ResourceOwnerPasswordValidator: Send + Sync + fmt::Debug {
    /// Authenticated principal, or `None` for bad credentials
    ///
    /// # Errors
    /// Returns `AuthError::Collaborator` when the user store is unavailable.
    async fn validate(
        &self,
        username: &str,
        password: &str,
        client: &Client,
        cancel: &CancellationToken,
    ) -> Result<Option<Principal>>;
}

/// Rejects every credential pair
#[derive(Debug, Default, Clone, Copy)]
pub struct RejectingPasswordValidator;

#[async_trait]
impl ResourceOwnerPasswordValidator for RejectingPasswordValidator {
    async fn validate(
        &self,
        _username: &str,
        _password: &str,
        _client: &Client,
        _cancel: &CancellationToken,
    ) -> Result<Option<Principal>> {
        Ok(None)
    }
}

/// Why back-channel logout notifications are sent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogoutReason {
    UserLogout,
    SessionExpiration,
}

/// Back-channel logout fan-out for one ended session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackChannelLogoutRequest {
    pub subject_id: String,
    pub session_id: String,
    /// Client id to back-channel logout URI
    pub clients: HashMap<String, String>,
    pub reason: LogoutReason,
}

/// Delivers OpenID back-channel logout notifications
#[async_trait]
pub trait BackChannelLogoutNotifier: Send + Sync + fmt::Debug {
    /// # Errors
    /// Returns `AuthError::Collaborator` when delivery cannot be scheduled.
    async fn send_logout_notifications(
        &self,
        request: &BackChannelLogoutRequest,
        cancel: &CancellationToken,
    ) -> Result<()>;
}

/// Drops notifications after logging them
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBackChannelLogoutNotifier;

#[async_trait]
impl BackChannelLogoutNotifier for NoopBackChannelLogoutNotifier {
    async fn send_logout_notifications(
        &self,
        request: &BackChannelLogoutRequest,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        debug!(
            session_id = %request.session_id,
            clients = request.clients.len(),
            reason = ?request.reason,
            "Back-channel logout notifications dropped"
        );
        Ok(())
    }
}

/// Client configuration lookup
#[async_trait]
pub trait ClientStore: Send + Sync + fmt::Debug {
    /// # Errors
    /// Returns `AuthError::Collaborator` when the client store is unavailable.
    async fn find_client(&self, client_id: &str, cancel: &CancellationToken) -> Result<Option<Client>>;
}

/// Client store backed by a concurrent map
#[derive(Debug, Default)]
pub struct InMemoryClientStore {
    clients: DashMap<String, Client>,
}

impl InMemoryClientStore {
    pub fn new<I: IntoIterator<Item = Client>>(clients: I) -> Self {
        let store = Self::default();
        for client in clients {
            store.insert(client);
        }
        store
    }

    pub fn insert(&self, client: Client) {
        self.clients.insert(client.client_id.clone(), client);
    }
}

#[async_trait]
impl ClientStore for InMemoryClientStore {
    async fn find_client(&self, client_id: &str, _cancel: &CancellationToken) -> Result<Option<Client>> {
        Ok(self.clients.get(client_id).map(|c| c.value().clone()))
    }
}
