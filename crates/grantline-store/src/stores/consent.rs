use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::DefaultGrantStore;
use crate::clock::Clock;
use crate::error::Result;
use crate::models::Consent;
use crate::persisted::PersistedGrantStore;

/// Remembered user consent, keyed by subject and client
#[derive(Debug, Clone)]
pub struct UserConsentStore {
    inner: DefaultGrantStore<Consent>,
}

fn consent_handle(subject_id: &str, client_id: &str) -> String {
    format!("{}|{}", client_id, subject_id)
}

impl UserConsentStore {
    pub fn new(store: Arc<dyn PersistedGrantStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: DefaultGrantStore::new(store, clock),
        }
    }

    /// Store or replace consent
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn store_user_consent(&self, consent: &Consent, cancel: &CancellationToken) -> Result<()> {
        let handle = consent_handle(&consent.subject_id, &consent.client_id);
        self.inner.store_item(&handle, consent, cancel).await
    }

    /// Load consent
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn get_user_consent(
        &self,
        subject_id: &str,
        client_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<Consent>> {
        self.inner
            .get_item(&consent_handle(subject_id, client_id), cancel)
            .await
    }

    /// Remove consent
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn remove_user_consent(
        &self,
        subject_id: &str,
        client_id: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.inner
            .remove_item(&consent_handle(subject_id, client_id), cancel)
            .await
    }
}
