use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::DefaultGrantStore;
use crate::clock::Clock;
use crate::error::Result;
use crate::grant::PersistedGrantFilter;
use crate::models::BackchannelAuthenticationRequest;
use crate::persisted::PersistedGrantStore;

/// CIBA request storage
///
/// Clients address a request by its `auth_req_id` handle; the interaction
/// layer addresses it by `internal_id` (the storage key), which it discovers
/// through [`Self::get_logins_for_user`].
#[derive(Debug, Clone)]
pub struct BackchannelAuthenticationRequestStore {
    inner: DefaultGrantStore<BackchannelAuthenticationRequest>,
}

impl BackchannelAuthenticationRequestStore {
    pub fn new(store: Arc<dyn PersistedGrantStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: DefaultGrantStore::new(store, clock),
        }
    }

    /// Store a request and return its `auth_req_id`
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn create_request(
        &self,
        request: &BackchannelAuthenticationRequest,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let mut request = request.clone();
        let handle = self.inner.create_item(&request, cancel).await?;
        request.internal_id = self.inner.key_for(&handle);
        self.inner
            .store_item_by_key(request.internal_id.clone(), &request, cancel)
            .await?;
        Ok(handle)
    }

    /// Load a request by `auth_req_id`
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn get_by_auth_request_id(
        &self,
        auth_req_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<BackchannelAuthenticationRequest>> {
        self.inner.get_item(auth_req_id, cancel).await
    }

    /// Load a request by `auth_req_id` even if it has expired
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn find_by_auth_request_id(
        &self,
        auth_req_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<BackchannelAuthenticationRequest>> {
        self.inner.peek_item(auth_req_id, cancel).await
    }

    /// Load a request by internal id
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn get_by_internal_id(
        &self,
        internal_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<BackchannelAuthenticationRequest>> {
        self.inner.get_item_by_key(internal_id, cancel).await
    }

    /// Pending requests targeting a user, optionally for one client
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn get_logins_for_user(
        &self,
        subject_id: &str,
        client_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Vec<BackchannelAuthenticationRequest>> {
        let mut filter = PersistedGrantFilter::new().subject(subject_id);
        if let Some(client_id) = client_id {
            filter = filter.client(client_id);
        }
        Ok(self
            .inner
            .find(filter, cancel)
            .await?
            .into_iter()
            .map(|(_, request)| request)
            .filter(|request| !request.is_complete)
            .collect())
    }

    /// Replace a request by internal id (user completion)
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn update_by_internal_id(
        &self,
        internal_id: &str,
        request: &BackchannelAuthenticationRequest,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.inner
            .store_item_by_key(internal_id.to_string(), request, cancel)
            .await
    }

    /// Load and remove a request by `auth_req_id`
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn take_by_auth_request_id(
        &self,
        auth_req_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<BackchannelAuthenticationRequest>> {
        self.inner.take_item(auth_req_id, cancel).await
    }

    /// Remove a request by `auth_req_id`
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn remove_by_auth_request_id(
        &self,
        auth_req_id: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.inner.remove_item(auth_req_id, cancel).await
    }
}
