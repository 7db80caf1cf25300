use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::DefaultGrantStore;
use crate::clock::Clock;
use crate::error::Result;
use crate::models::DeviceCode;
use crate::persisted::PersistedGrantStore;

/// Device authorization storage
///
/// The polling device addresses a record by its device code handle. The
/// user addresses it by the user code typed on the secondary device; a
/// second record under a key derived from the user code carries the
/// primary record's `internal_id`.
#[derive(Debug, Clone)]
pub struct DeviceCodeStore {
    inner: DefaultGrantStore<DeviceCode>,
}

impl DeviceCodeStore {
    pub fn new(store: Arc<dyn PersistedGrantStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: DefaultGrantStore::new(store, clock),
        }
    }

    fn user_code_key(&self, user_code: &str) -> String {
        self.inner.key_for(&format!("user_code:{user_code}"))
    }

    /// Store a device authorization and return the device code handle
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn store_device_code(&self, code: &DeviceCode, cancel: &CancellationToken) -> Result<String> {
        let mut code = code.clone();
        let handle = self.inner.create_item(&code, cancel).await?;
        code.internal_id = self.inner.key_for(&handle);
        self.inner
            .store_item_by_key(code.internal_id.clone(), &code, cancel)
            .await?;
        self.inner
            .store_item_by_key(self.user_code_key(&code.user_code), &code, cancel)
            .await?;
        Ok(handle)
    }

    /// Replace the authorization stored under `handle`
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn update_device_code(
        &self,
        handle: &str,
        code: &DeviceCode,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.inner.store_item(handle, code, cancel).await
    }

    /// Load a live authorization by the code the user entered
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn find_by_user_code(
        &self,
        user_code: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<DeviceCode>> {
        let Some(index) = self
            .inner
            .get_item_by_key(&self.user_code_key(user_code), cancel)
            .await?
        else {
            return Ok(None);
        };
        self.inner.get_item_by_key(&index.internal_id, cancel).await
    }

    /// Record the user's decision against the code they entered
    ///
    /// Returns `false` when no live authorization carries `user_code`.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn update_by_user_code(
        &self,
        user_code: &str,
        code: &DeviceCode,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let Some(current) = self.find_by_user_code(user_code, cancel).await? else {
            debug!("No live device authorization for user code");
            return Ok(false);
        };
        let mut code = code.clone();
        code.internal_id = current.internal_id.clone();
        self.inner
            .store_item_by_key(current.internal_id, &code, cancel)
            .await?;
        Ok(true)
    }

    /// Load a device authorization
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn get_device_code(
        &self,
        handle: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<DeviceCode>> {
        self.inner.get_item(handle, cancel).await
    }

    /// Load a device authorization even if it has expired
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn find_device_code(
        &self,
        handle: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<DeviceCode>> {
        self.inner.peek_item(handle, cancel).await
    }

    /// Load and remove a device authorization in one step
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn take_device_code(
        &self,
        handle: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<DeviceCode>> {
        let code = self.inner.take_item(handle, cancel).await?;
        if let Some(code) = &code {
            self.remove_user_code_index(&code.user_code, cancel).await?;
        }
        Ok(code)
    }

    /// Remove a device authorization
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn remove_device_code(&self, handle: &str, cancel: &CancellationToken) -> Result<()> {
        if let Some(code) = self.inner.peek_item(handle, cancel).await? {
            self.remove_user_code_index(&code.user_code, cancel).await?;
        }
        self.inner.remove_item(handle, cancel).await
    }

    async fn remove_user_code_index(&self, user_code: &str, cancel: &CancellationToken) -> Result<()> {
        self.inner
            .persisted_store()
            .remove(&self.user_code_key(user_code), cancel)
            .await
    }
}
