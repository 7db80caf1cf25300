//! Purpose-partitioned replay cache
//!
//! A replay cache remembers handles (DPoP `jti` values, device-flow poll
//! markers) until an absolute expiration. Purpose strings partition the
//! keyspace so unrelated consumers sharing one backend never collide, and
//! handles are hashed before they reach the backend.

use std::fmt;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::clock::{Clock, SystemClock};
use crate::error::{Result, ensure_active};

/// Build the backend key for a purpose and handle
///
/// The handle is hashed so raw proof identifiers never sit in the cache.
pub fn replay_key(purpose: &str, handle: &str) -> String {
    let digest = Sha256::digest(handle.as_bytes());
    format!("{}:{}", purpose, URL_SAFE_NO_PAD.encode(digest))
}

/// "Seen handle" cache with absolute expiration
#[async_trait]
pub trait ReplayCache: Send + Sync + fmt::Debug {
    /// Remember `handle` under `purpose` until `expiration`
    async fn add(
        &self,
        purpose: &str,
        handle: &str,
        expiration: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Whether `handle` is currently remembered under `purpose`
    async fn exists(&self, purpose: &str, handle: &str, cancel: &CancellationToken)
    -> Result<bool>;

    /// Insert `handle` unless already present; returns `true` when inserted
    ///
    /// The default implementation is exists-then-add and two concurrent
    /// callers can both observe `true`. Backends with an atomic
    /// insert-if-absent primitive should override it.
    async fn add_if_absent(
        &self,
        purpose: &str,
        handle: &str,
        expiration: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        if self.exists(purpose, handle, cancel).await? {
            return Ok(false);
        }
        self.add(purpose, handle, expiration, cancel).await?;
        Ok(true)
    }

    /// Drop entries expired at `now`; returns how many were removed
    ///
    /// Backends whose keys expire natively keep the default no-op.
    async fn remove_expired(&self, _now: DateTime<Utc>, _cancel: &CancellationToken) -> Result<usize> {
        Ok(0)
    }
}

/// In-process replay cache backed by [`DashMap`]
///
/// Expired entries are treated as absent. They are pruned when their key is
/// looked up again or by [`ReplayCache::remove_expired`]; since most handles
/// are never seen twice, a periodic sweep is what bounds the cache.
#[derive(Debug, Clone)]
pub struct InMemoryReplayCache {
    entries: Arc<DashMap<String, DateTime<Utc>>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryReplayCache {
    /// Create a cache using the system clock
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a cache using the given clock for expiry decisions
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            clock,
        }
    }

    /// Number of stored entries, including not-yet-pruned expired ones
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for InMemoryReplayCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReplayCache for InMemoryReplayCache {
    async fn add(
        &self,
        purpose: &str,
        handle: &str,
        expiration: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        ensure_active(cancel)?;
        self.entries.insert(replay_key(purpose, handle), expiration);
        trace!(purpose, %expiration, "Replay handle recorded");
        Ok(())
    }

    async fn exists(
        &self,
        purpose: &str,
        handle: &str,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        ensure_active(cancel)?;
        let key = replay_key(purpose, handle);
        let now = self.clock.now();
        let live = match self.entries.get(&key) {
            Some(expiration) => *expiration > now,
            None => return Ok(false),
        };
        if !live {
            self.entries.remove_if(&key, |_, expiration| *expiration <= now);
        }
        Ok(live)
    }

    async fn add_if_absent(
        &self,
        purpose: &str,
        handle: &str,
        expiration: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        ensure_active(cancel)?;
        let now = self.clock.now();
        match self.entries.entry(replay_key(purpose, handle)) {
            Entry::Occupied(mut occupied) => {
                if *occupied.get() > now {
                    return Ok(false);
                }
                occupied.insert(expiration);
                Ok(true)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(expiration);
                Ok(true)
            }
        }
    }

    async fn remove_expired(&self, now: DateTime<Utc>, cancel: &CancellationToken) -> Result<usize> {
        ensure_active(cancel)?;
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| *entry.value() <= now)
            .map(|entry| entry.key().clone())
            .collect();
        let removed = expired
            .iter()
            .filter(|key| self.entries.remove_if(*key, |_, expiration| *expiration <= now).is_some())
            .count();
        trace!(removed, "Expired replay handles removed");
        Ok(removed)
    }
}
