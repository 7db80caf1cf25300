//! In-memory persisted grant store

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Result, ensure_active};
use crate::grant::{PersistedGrant, PersistedGrantFilter};
use crate::persisted::PersistedGrantStore;

/// [`PersistedGrantStore`] backed by a [`DashMap`]
///
/// `take` is atomic per key: of any number of concurrent callers exactly one
/// receives the grant.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPersistedGrantStore {
    grants: Arc<DashMap<String, PersistedGrant>>,
}

impl InMemoryPersistedGrantStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored grants
    pub fn len(&self) -> usize {
        self.grants.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }
}

#[async_trait]
impl PersistedGrantStore for InMemoryPersistedGrantStore {
    async fn store(&self, grant: PersistedGrant, cancel: &CancellationToken) -> Result<()> {
        ensure_active(cancel)?;
        self.grants.insert(grant.key.clone(), grant);
        Ok(())
    }

    async fn get(&self, key: &str, cancel: &CancellationToken) -> Result<Option<PersistedGrant>> {
        ensure_active(cancel)?;
        Ok(self.grants.get(key).map(|entry| entry.value().clone()))
    }

    async fn get_all(
        &self,
        filter: &PersistedGrantFilter,
        cancel: &CancellationToken,
    ) -> Result<Vec<PersistedGrant>> {
        ensure_active(cancel)?;
        filter.validate()?;
        Ok(self
            .grants
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn remove(&self, key: &str, cancel: &CancellationToken) -> Result<()> {
        ensure_active(cancel)?;
        self.grants.remove(key);
        Ok(())
    }

    async fn remove_all(
        &self,
        filter: &PersistedGrantFilter,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        ensure_active(cancel)?;
        filter.validate()?;
        let keys: Vec<String> = self
            .grants
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.key().clone())
            .collect();
        let removed = keys
            .iter()
            .filter(|key| self.grants.remove_if(*key, |_, grant| filter.matches(grant)).is_some())
            .count();
        debug!(removed, "Removed grants by filter");
        Ok(removed)
    }

    async fn take(&self, key: &str, cancel: &CancellationToken) -> Result<Option<PersistedGrant>> {
        ensure_active(cancel)?;
        Ok(self.grants.remove(key).map(|(_, grant)| grant))
    }

    async fn consume(
        &self,
        key: &str,
        consumed_time: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        ensure_active(cancel)?;
        let Some(mut grant) = self.grants.get_mut(key) else {
            return Ok(false);
        };
        if grant.consumed_time.is_some() {
            return Ok(false);
        }
        grant.consumed_time = Some(consumed_time);
        Ok(true)
    }

    async fn remove_expired(
        &self,
        now: DateTime<Utc>,
        batch: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<PersistedGrant>> {
        ensure_active(cancel)?;
        let keys: Vec<String> = self
            .grants
            .iter()
            .filter(|entry| entry.value().is_expired(now))
            .take(batch)
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = Vec::with_capacity(keys.len());
        for key in keys {
            ensure_active(cancel)?;
            if let Some((_, grant)) = self.grants.remove_if(&key, |_, grant| grant.is_expired(now)) {
                removed.push(grant);
            }
        }
        Ok(removed)
    }
}
