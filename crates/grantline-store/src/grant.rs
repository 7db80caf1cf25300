//! Persisted grant record and filter

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Discriminator for persisted grants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    /// One-shot authorization code
    AuthorizationCode,
    /// Refresh token
    RefreshToken,
    /// Opaque access-token handle
    ReferenceToken,
    /// Device authorization code
    DeviceCode,
    /// CIBA request
    BackchannelAuthenticationRequest,
    /// Remembered user consent
    UserConsent,
}

impl GrantType {
    /// All grant types, in declaration order
    pub const ALL: [GrantType; 6] = [
        Self::AuthorizationCode,
        Self::RefreshToken,
        Self::ReferenceToken,
        Self::DeviceCode,
        Self::BackchannelAuthenticationRequest,
        Self::UserConsent,
    ];

    /// Stable wire name of the grant type
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthorizationCode => "authorization_code",
            Self::RefreshToken => "refresh_token",
            Self::ReferenceToken => "reference_token",
            Self::DeviceCode => "device_code",
            Self::BackchannelAuthenticationRequest => "backchannel_authentication_request",
            Self::UserConsent => "user_consent",
        }
    }
}

impl fmt::Display for GrantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GrantType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| StoreError::Serialization {
                reason: format!("unknown grant type '{}'", s),
            })
    }
}

/// A server-stored, keyed, expiring authorization artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedGrant {
    /// Storage key (derived from the external handle)
    pub key: String,
    /// Discriminator
    pub grant_type: GrantType,
    /// Subject the grant was issued for (absent for client-only grants)
    pub subject_id: Option<String>,
    /// Session the grant is tied to
    pub session_id: Option<String>,
    /// Client the grant was issued to
    pub client_id: String,
    /// Free-form description supplied by the client
    pub description: Option<String>,
    /// When the grant was created
    pub creation_time: DateTime<Utc>,
    /// Absolute expiration; `None` never expires
    pub expiration: Option<DateTime<Utc>>,
    /// When the grant was consumed; never cleared once set
    pub consumed_time: Option<DateTime<Utc>>,
    /// Serialized type-specific payload
    pub data: String,
}

impl PersistedGrant {
    /// Whether the grant has expired at `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration.is_some_and(|expiration| expiration <= now)
    }

    /// Whether the grant has been consumed
    pub fn is_consumed(&self) -> bool {
        self.consumed_time.is_some()
    }

    /// Record consumption; an earlier consumption time is kept
    pub fn mark_consumed(&mut self, at: DateTime<Utc>) {
        if self.consumed_time.is_none() {
            self.consumed_time = Some(at);
        }
    }
}

/// AND-combined criteria selecting persisted grants
///
/// Empty lists count as "not specified". Bulk operations require at least one
/// specified criterion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedGrantFilter {
    /// Subject to match
    pub subject_id: Option<String>,
    /// Session to match
    pub session_id: Option<String>,
    /// Single client to match
    pub client_id: Option<String>,
    /// Any of these clients
    pub client_ids: Vec<String>,
    /// Single grant type to match
    pub grant_type: Option<GrantType>,
    /// Any of these grant types
    pub grant_types: Vec<GrantType>,
}

impl PersistedGrantFilter {
    /// Empty filter (invalid until a criterion is added)
    pub fn new() -> Self {
        Self::default()
    }

    /// Match a subject
    pub fn subject(mut self, subject_id: impl Into<String>) -> Self {
        self.subject_id = Some(subject_id.into());
        self
    }

    /// Match a session
    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Match a single client
    pub fn client(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Match any of the given clients
    pub fn clients<I, S>(mut self, client_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.client_ids = client_ids.into_iter().map(Into::into).collect();
        self
    }

    /// Match a single grant type
    pub fn of_type(mut self, grant_type: GrantType) -> Self {
        self.grant_type = Some(grant_type);
        self
    }

    /// Match any of the given grant types
    pub fn of_types(mut self, grant_types: impl IntoIterator<Item = GrantType>) -> Self {
        self.grant_types = grant_types.into_iter().collect();
        self
    }

    /// Whether no criterion is specified
    pub fn is_empty(&self) -> bool {
        self.subject_id.is_none()
            && self.session_id.is_none()
            && self.client_id.is_none()
            && self.client_ids.is_empty()
            && self.grant_type.is_none()
            && self.grant_types.is_empty()
    }

    /// Reject filters with no criterion
    ///
    /// # Errors
    /// Returns [`StoreError::InvalidFilter`] when nothing is specified.
    pub fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(StoreError::InvalidFilter {
                reason: "at least one of subject_id, session_id, client_id(s) or grant type(s) is required"
                    .to_string(),
            });
        }
        Ok(())
    }

    /// Whether `grant` satisfies every specified criterion
    pub fn matches(&self, grant: &PersistedGrant) -> bool {
        if let Some(subject_id) = &self.subject_id
            && grant.subject_id.as_deref() != Some(subject_id.as_str())
        {
            return false;
        }
        if let Some(session_id) = &self.session_id
            && grant.session_id.as_deref() != Some(session_id.as_str())
        {
            return false;
        }
        if let Some(client_id) = &self.client_id
            && &grant.client_id != client_id
        {
            return false;
        }
        if !self.client_ids.is_empty() && !self.client_ids.contains(&grant.client_id) {
            return false;
        }
        if let Some(grant_type) = self.grant_type
            && grant.grant_type != grant_type
        {
            return false;
        }
        if !self.grant_types.is_empty() {
            let types: HashSet<GrantType> = self.grant_types.iter().copied().collect();
            if !types.contains(&grant.grant_type) {
                return false;
            }
        }
        true
    }
}
