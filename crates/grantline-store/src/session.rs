//! Server-side session records

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Result, StoreError, ensure_active};

/// A user's authentication session, held server-side
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSideSession {
    /// Storage key
    pub key: String,
    /// Authentication scheme that issued the session
    pub scheme: String,
    pub subject_id: String,
    pub session_id: String,
    pub display_name: Option<String>,
    pub created: DateTime<Utc>,
    pub renewed: DateTime<Utc>,
    /// `None` lasts until logout
    pub expires: Option<DateTime<Utc>>,
    /// Clients the user signed in to during this session
    #[serde(default)]
    pub client_ids: Vec<String>,
    /// Serialized authentication ticket
    pub ticket: String,
}

impl ServerSideSession {
    /// Session created at `created` with no expiration, clients or ticket
    pub fn new(
        key: impl Into<String>,
        subject_id: impl Into<String>,
        session_id: impl Into<String>,
        created: DateTime<Utc>,
    ) -> Self {
        Self {
            key: key.into(),
            scheme: "cookie".to_string(),
            subject_id: subject_id.into(),
            session_id: session_id.into(),
            display_name: None,
            created,
            renewed: created,
            expires: None,
            client_ids: Vec::new(),
            ticket: String::new(),
        }
    }

    pub fn with_expiration(mut self, expires: DateTime<Utc>) -> Self {
        self.expires = Some(expires);
        self
    }

    /// Record a client sign-in
    pub fn with_client(mut self, client_id: impl Into<String>) -> Self {
        let client_id = client_id.into();
        if !self.client_ids.contains(&client_id) {
            self.client_ids.push(client_id);
        }
        self
    }

    /// Whether the session has expired at `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires.is_some_and(|expires| expires <= now)
    }
}

/// Criteria selecting sessions; at least one is required
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionFilter {
    pub subject_id: Option<String>,
    pub session_id: Option<String>,
}

impl SessionFilter {
    /// Sessions of a subject
    pub fn for_subject(subject_id: impl Into<String>) -> Self {
        Self {
            subject_id: Some(subject_id.into()),
            session_id: None,
        }
    }

    /// Narrow to a session id
    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Reject empty filters
    ///
    /// # Errors
    /// Returns [`StoreError::InvalidFilter`] when nothing is specified.
    pub fn validate(&self) -> Result<()> {
        if self.subject_id.is_none() && self.session_id.is_none() {
            return Err(StoreError::InvalidFilter {
                reason: "subject_id or session_id is required".to_string(),
            });
        }
        Ok(())
    }

    /// Whether `session` satisfies every specified criterion
    pub fn matches(&self, session: &ServerSideSession) -> bool {
        self.subject_id
            .as_deref()
            .is_none_or(|subject_id| session.subject_id == subject_id)
            && self
                .session_id
                .as_deref()
                .is_none_or(|session_id| session.session_id == session_id)
    }
}

/// Storage for server-side sessions
#[async_trait]
pub trait ServerSideSessionStore: Send + Sync + fmt::Debug {
    async fn create_session(&self, session: ServerSideSession, cancel: &CancellationToken) -> Result<()>;

    async fn get_session(&self, key: &str, cancel: &CancellationToken) -> Result<Option<ServerSideSession>>;

    async fn update_session(&self, session: ServerSideSession, cancel: &CancellationToken) -> Result<()>;

    async fn delete_session(&self, key: &str, cancel: &CancellationToken) -> Result<()>;

    /// # Errors
    /// Returns `StoreError::InvalidFilter` for an empty filter.
    async fn get_sessions(
        &self,
        filter: &SessionFilter,
        cancel: &CancellationToken,
    ) -> Result<Vec<ServerSideSession>>;

    /// # Errors
    /// Returns `StoreError::InvalidFilter` for an empty filter.
    async fn delete_sessions(&self, filter: &SessionFilter, cancel: &CancellationToken) -> Result<usize>;

    /// Remove and return up to `batch` sessions expired at `now`
    async fn get_and_remove_expired_sessions(
        &self,
        now: DateTime<Utc>,
        batch: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<ServerSideSession>>;
}

/// [`ServerSideSessionStore`] backed by a [`DashMap`]
#[derive(Debug, Clone, Default)]
pub struct InMemoryServerSideSessionStore {
    sessions: Arc<DashMap<String, ServerSideSession>>,
}

impl InMemoryServerSideSessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl ServerSideSessionStore for InMemoryServerSideSessionStore {
    async fn create_session(&self, session: ServerSideSession, cancel: &CancellationToken) -> Result<()> {
        ensure_active(cancel)?;
        self.sessions.insert(session.key.clone(), session);
        Ok(())
    }

    async fn get_session(&self, key: &str, cancel: &CancellationToken) -> Result<Option<ServerSideSession>> {
        ensure_active(cancel)?;
        Ok(self.sessions.get(key).map(|entry| entry.value().clone()))
    }

    async fn update_session(&self, session: ServerSideSession, cancel: &CancellationToken) -> Result<()> {
        ensure_active(cancel)?;
        self.sessions.insert(session.key.clone(), session);
        Ok(())
    }

    async fn delete_session(&self, key: &str, cancel: &CancellationToken) -> Result<()> {
        ensure_active(cancel)?;
        self.sessions.remove(key);
        Ok(())
    }

    async fn get_sessions(
        &self,
        filter: &SessionFilter,
        cancel: &CancellationToken,
    ) -> Result<Vec<ServerSideSession>> {
        ensure_active(cancel)?;
        filter.validate()?;
        Ok(self
            .sessions
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn delete_sessions(&self, filter: &SessionFilter, cancel: &CancellationToken) -> Result<usize> {
        ensure_active(cancel)?;
        filter.validate()?;
        let before = self.sessions.len();
        self.sessions.retain(|_, session| !filter.matches(session));
        Ok(before.saturating_sub(self.sessions.len()))
    }

    async fn get_and_remove_expired_sessions(
        &self,
        now: DateTime<Utc>,
        batch: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<ServerSideSession>> {
        ensure_active(cancel)?;
        let keys: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().is_expired(now))
            .take(batch)
            .map(|entry| entry.key().clone())
            .collect();

        let removed: Vec<ServerSideSession> = keys
            .iter()
            .filter_map(|key| {
                self.sessions
                    .remove_if(key, |_, session| session.is_expired(now))
                    .map(|(_, session)| session)
            })
            .collect();
        debug!(count = removed.len(), "Removed expired server-side sessions");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn session(key: &str, subject: &str, sid: &str, expires: Option<DateTime<Utc>>) -> ServerSideSession {
        let now = Utc::now();
        ServerSideSession {
            key: key.to_string(),
            scheme: "cookie".to_string(),
            subject_id: subject.to_string(),
            session_id: sid.to_string(),
            display_name: None,
            created: now,
            renewed: now,
            expires,
            client_ids: Vec::new(),
            ticket: String::new(),
        }
    }

    #[tokio::test]
    async fn test_filtered_lookup_and_delete() {
        let store = InMemoryServerSideSessionStore::new();
        let cancel = CancellationToken::new();
        store.create_session(session("k1", "alice", "s1", None), &cancel).await.unwrap();
        store.create_session(session("k2", "alice", "s2", None), &cancel).await.unwrap();
        store.create_session(session("k3", "bob", "s3", None), &cancel).await.unwrap();

        let alice = store
            .get_sessions(&SessionFilter::for_subject("alice"), &cancel)
            .await
            .unwrap();
        assert_eq!(alice.len(), 2);

        let removed = store
            .delete_sessions(&SessionFilter::for_subject("alice").session("s1"), &cancel)
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.len(), 2);

        assert!(store.get_sessions(&SessionFilter::default(), &cancel).await.is_err());
    }

    #[tokio::test]
    async fn test_expired_sessions_are_drained_in_batches() {
        let store = InMemoryServerSideSessionStore::new();
        let cancel = CancellationToken::new();
        let now = Utc::now();
        for i in 0..3 {
            store
                .create_session(
                    session(&format!("k{i}"), "alice", &format!("s{i}"), Some(now - Duration::seconds(1))),
                    &cancel,
                )
                .await
                .unwrap();
        }
        store
            .create_session(session("live", "alice", "live", Some(now + Duration::hours(1))), &cancel)
            .await
            .unwrap();

        let first = store.get_and_remove_expired_sessions(now, 2, &cancel).await.unwrap();
        let second = store.get_and_remove_expired_sessions(now, 2, &cancel).await.unwrap();

        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 1);
        assert_eq!(store.len(), 1);
    }
}
