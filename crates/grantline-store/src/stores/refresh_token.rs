use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::DefaultGrantStore;
use crate::clock::Clock;
use crate::error::Result;
use crate::handle::HandleGenerator;
use crate::models::RefreshToken;
use crate::persisted::PersistedGrantStore;

/// Refresh token storage
#[derive(Debug, Clone)]
pub struct RefreshTokenStore {
    inner: DefaultGrantStore<RefreshToken>,
}

impl RefreshTokenStore {
    pub fn new(store: Arc<dyn PersistedGrantStore>, clock: Arc<dyn Clock>) -> Self {
        Self::from_grant_store(DefaultGrantStore::new(store, clock))
    }

    pub fn from_grant_store(inner: DefaultGrantStore<RefreshToken>) -> Self {
        Self { inner }
    }

    /// Use a different handle entropy
    pub fn with_handle_generator(self, handles: HandleGenerator) -> Self {
        Self::from_grant_store(self.inner.with_handle_generator(handles))
    }

    /// Store a new refresh token and return its handle
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn store_refresh_token(
        &self,
        token: &RefreshToken,
        cancel: &CancellationToken,
    ) -> Result<String> {
        self.inner.create_item(token, cancel).await
    }

    /// Replace the token stored under `handle`
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn update_refresh_token(
        &self,
        handle: &str,
        token: &RefreshToken,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.inner.store_item(handle, token, cancel).await
    }

    /// Load a refresh token, including consumed ones
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn get_refresh_token(
        &self,
        handle: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<RefreshToken>> {
        self.inner.get_item(handle, cancel).await
    }

    /// Mark a refresh token consumed; `true` only for the first caller
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn consume_refresh_token(&self, handle: &str, cancel: &CancellationToken) -> Result<bool> {
        self.inner.consume_item(handle, cancel).await
    }

    /// Load and remove a refresh token in one step
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn take_refresh_token(
        &self,
        handle: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<RefreshToken>> {
        self.inner.take_item(handle, cancel).await
    }

    /// Remove a refresh token
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn remove_refresh_token(&self, handle: &str, cancel: &CancellationToken) -> Result<()> {
        self.inner.remove_item(handle, cancel).await
    }

    /// Remove every refresh token for a subject and client, optionally
    /// narrowed to a session
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn remove_refresh_tokens(
        &self,
        subject_id: &str,
        client_id: &str,
        session_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        self.inner
            .remove_all_items(subject_id, client_id, session_id, cancel)
            .await
    }
}
