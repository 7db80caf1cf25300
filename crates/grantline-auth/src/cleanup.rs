//! Periodic removal of expired grants, sessions and replay handles

use std::sync::Arc;
use std::time::Duration;

use grantline_store::{Clock, PersistedGrantStore, ReplayCache};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::Result;
use crate::config::PersistentGrantOptions;
use crate::session::SessionCoordinationService;

/// Totals from one cleanup pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub grants_removed: usize,
    pub sessions_removed: usize,
    pub replay_entries_removed: usize,
}

/// Removes expired grants in batches, ends expired sessions and sweeps the
/// replay cache
#[derive(Debug, Clone)]
pub struct TokenCleanupService {
    grants: Arc<dyn PersistedGrantStore>,
    sessions: Option<Arc<SessionCoordinationService>>,
    replay: Option<Arc<dyn ReplayCache>>,
    options: PersistentGrantOptions,
    clock: Arc<dyn Clock>,
}

impl TokenCleanupService {
    pub fn new(
        grants: Arc<dyn PersistedGrantStore>,
        options: PersistentGrantOptions,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            grants,
            sessions: None,
            replay: None,
            options,
            clock,
        }
    }

    /// Also drain expired server-side sessions on each pass
    pub fn with_session_coordination(mut self, sessions: Arc<SessionCoordinationService>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    /// Also sweep expired DPoP `jti` and polling handles on each pass
    pub fn with_replay_cache(mut self, replay: Arc<dyn ReplayCache>) -> Self {
        self.replay = Some(replay);
        self
    }

    /// Remove every grant expired at the current time
    ///
    /// # Errors
    /// Propagates storage failures; batches already removed stay removed.
    pub async fn remove_expired_grants(&self, cancel: &CancellationToken) -> Result<usize> {
        let batch = self.options.cleanup_batch_size.max(1);
        let mut total = 0;
        loop {
            let removed = self
                .grants
                .remove_expired(self.clock.now(), batch, cancel)
                .await?;
            for grant in &removed {
                debug!(
                    grant_type = %grant.grant_type,
                    client_id = %grant.client_id,
                    expiration = ?grant.expiration,
                    "Removed expired grant"
                );
            }
            total += removed.len();
            if removed.len() < batch {
                break;
            }
        }
        Ok(total)
    }

    /// One full pass over grants and, if configured, sessions and the
    /// replay cache
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn run_once(&self, cancel: &CancellationToken) -> Result<CleanupReport> {
        let grants_removed = self.remove_expired_grants(cancel).await?;
        let sessions_removed = match &self.sessions {
            Some(sessions) if sessions.options().enabled => sessions.remove_expired_sessions(cancel).await?,
            _ => 0,
        };
        let replay_entries_removed = match &self.replay {
            Some(replay) => replay.remove_expired(self.clock.now(), cancel).await?,
            None => 0,
        };
        let report = CleanupReport {
            grants_removed,
            sessions_removed,
            replay_entries_removed,
        };
        if grants_removed > 0 || sessions_removed > 0 || replay_entries_removed > 0 {
            info!(
                grants_removed,
                sessions_removed,
                replay_entries_removed,
                "Token cleanup pass finished"
            );
        }
        Ok(report)
    }

    /// Run a pass every `cleanup_interval_secs` until `cancel` fires
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let period = Duration::from_secs(self.options.cleanup_interval_secs.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        debug!("Token cleanup stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        match self.run_once(&cancel).await {
                            Ok(_) => {}
                            Err(e) if e.is_cancelled() => break,
                            Err(e) => error!(error = %e, "Token cleanup pass failed"),
                        }
                    }
                }
            }
        })
    }
}
