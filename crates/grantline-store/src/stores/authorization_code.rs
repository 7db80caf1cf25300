use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::DefaultGrantStore;
use crate::clock::Clock;
use crate::error::Result;
use crate::models::AuthorizationCode;
use crate::persisted::PersistedGrantStore;

/// Single-use authorization code storage
///
/// A read does not consume the code; the token endpoint redeems through
/// [`AuthorizationCodeStore::take_authorization_code`].
#[derive(Debug, Clone)]
pub struct AuthorizationCodeStore {
    inner: DefaultGrantStore<AuthorizationCode>,
}

impl AuthorizationCodeStore {
    pub fn new(store: Arc<dyn PersistedGrantStore>, clock: Arc<dyn Clock>) -> Self {
        Self::from_grant_store(DefaultGrantStore::new(store, clock))
    }

    pub fn from_grant_store(inner: DefaultGrantStore<AuthorizationCode>) -> Self {
        Self { inner }
    }

    /// Store a code and return its handle
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn store_authorization_code(
        &self,
        code: &AuthorizationCode,
        cancel: &CancellationToken,
    ) -> Result<String> {
        self.inner.create_item(code, cancel).await
    }

    /// Read a code without consuming it
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn get_authorization_code(
        &self,
        handle: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<AuthorizationCode>> {
        self.inner.get_item(handle, cancel).await
    }

    /// Read and remove a code in one step
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn take_authorization_code(
        &self,
        handle: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<AuthorizationCode>> {
        self.inner.take_item(handle, cancel).await
    }

    /// Remove a code
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn remove_authorization_code(
        &self,
        handle: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.inner.remove_item(handle, cancel).await
    }
}
