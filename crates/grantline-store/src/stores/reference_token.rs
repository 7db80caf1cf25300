use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::DefaultGrantStore;
use crate::clock::Clock;
use crate::error::Result;
use crate::models::Token;
use crate::persisted::PersistedGrantStore;

/// Opaque access token storage
#[derive(Debug, Clone)]
pub struct ReferenceTokenStore {
    inner: DefaultGrantStore<Token>,
}

impl ReferenceTokenStore {
    pub fn new(store: Arc<dyn PersistedGrantStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: DefaultGrantStore::new(store, clock),
        }
    }

    /// Store a token and return its handle
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn store_reference_token(&self, token: &Token, cancel: &CancellationToken) -> Result<String> {
        self.inner.create_item(token, cancel).await
    }

    /// Load a token
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn get_reference_token(
        &self,
        handle: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<Token>> {
        self.inner.get_item(handle, cancel).await
    }

    /// Remove a token
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn remove_reference_token(&self, handle: &str, cancel: &CancellationToken) -> Result<()> {
        self.inner.remove_item(handle, cancel).await
    }

    /// Remove every reference token for a subject and client
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn remove_reference_tokens(
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
