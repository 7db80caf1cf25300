//! Generic persisted-grant storage contract

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::grant::{PersistedGrant, PersistedGrantFilter};

/// Keyed, filterable, expiring grant storage
///
/// Reads here are raw: expired or consumed grants are returned as stored.
/// Validating reads live in the typed stores.
#[async_trait]
pub trait PersistedGrantStore: Send + Sync + fmt::Debug {
    /// Insert or replace a grant by key
    async fn store(&self, grant: PersistedGrant, cancel: &CancellationToken) -> Result<()>;

    /// Fetch a grant by key
    async fn get(&self, key: &str, cancel: &CancellationToken) -> Result<Option<PersistedGrant>>;

    /// Fetch every grant matching `filter`
    ///
    /// # Errors
    /// Returns `StoreError::InvalidFilter` when the filter has no criterion.
    async fn get_all(
        &self,
        filter: &PersistedGrantFilter,
        cancel: &CancellationToken,
    ) -> Result<Vec<PersistedGrant>>;

    /// Remove a grant by key; removing a missing key is a no-op
    async fn remove(&self, key: &str, cancel: &CancellationToken) -> Result<()>;

    /// Remove every grant matching `filter`; returns how many were removed
    ///
    /// # Errors
    /// Returns `StoreError::InvalidFilter` when the filter has no criterion.
    async fn remove_all(
        &self,
        filter: &PersistedGrantFilter,
        cancel: &CancellationToken,
    ) -> Result<usize>;

    /// Fetch and remove a grant in one step
    ///
    /// The default is get-then-remove: two concurrent callers may both
    /// receive the grant. Backends must override this with an atomic
    /// check-and-consume for single-use grants to be safe.
    async fn take(&self, key: &str, cancel: &CancellationToken) -> Result<Option<PersistedGrant>> {
        let grant = self.get(key, cancel).await?;
        if grant.is_some() {
            self.remove(key, cancel).await?;
        }
        Ok(grant)
    }

    /// Mark a grant consumed at `consumed_time` unless it already is
    ///
    /// Returns `true` only for the caller that set the consumed time; a
    /// missing or already consumed grant yields `false`. The default is
    /// read-then-write with the same race as the default `take`.
    async fn consume(
        &self,
        key: &str,
        consumed_time: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let Some(mut grant) = self.get(key, cancel).await? else {
            return Ok(false);
        };
        if grant.consumed_time.is_some() {
            return Ok(false);
        }
        grant.consumed_time = Some(consumed_time);
        self.store(grant, cancel).await?;
        Ok(true)
    }

    /// Remove up to `batch` grants whose expiration is at or before `now`
    ///
    /// Returns the removed grants so callers can audit them.
    async fn remove_expired(
        &self,
        now: DateTime<Utc>,
        batch: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<PersistedGrant>>;
}
