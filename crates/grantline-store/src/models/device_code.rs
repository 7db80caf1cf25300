use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Principal, expiration_from_lifetime};

/// Device authorization request state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCode {
    pub creation_time: DateTime<Utc>,
    /// Lifetime in seconds
    pub lifetime: u64,
    pub client_id: String,
    /// Storage key of the record, set by the store
    #[serde(default)]
    pub internal_id: String,
    /// Code shown to the user on the secondary device
    pub user_code: String,
    pub description: Option<String>,
    pub is_open_id: bool,
    /// Set once the user has acted on the request
    pub is_authorized: bool,
    #[serde(default)]
    pub requested_scopes: Vec<String>,
    #[serde(default)]
    pub authorized_scopes: Vec<String>,
    /// Approving user; absent while pending or when denied
    pub subject: Option<Principal>,
    pub session_id: Option<String>,
}

impl DeviceCode {
    /// Pending device code
    pub fn pending(
        client_id: impl Into<String>,
        user_code: impl Into<String>,
        requested_scopes: Vec<String>,
        creation_time: DateTime<Utc>,
        lifetime: u64,
    ) -> Self {
        Self {
            creation_time,
            lifetime,
            client_id: client_id.into(),
            internal_id: String::new(),
            user_code: user_code.into(),
            description: None,
            is_open_id: requested_scopes.iter().any(|s| s == "openid"),
            is_authorized: false,
            requested_scopes,
            authorized_scopes: Vec::new(),
            subject: None,
            session_id: None,
        }
    }

    /// Record the user's approval
    pub fn approve(&mut self, subject: Principal, authorized_scopes: Vec<String>) {
        self.session_id = subject.session_id().map(str::to_string);
        self.subject = Some(subject);
        self.authorized_scopes = authorized_scopes;
        self.is_authorized = true;
    }

    /// Record the user's denial
    pub fn deny(&mut self) {
        self.subject = None;
        self.authorized_scopes.clear();
        self.is_authorized = true;
    }

    /// Absolute expiration
    pub fn expiration(&self) -> Option<DateTime<Utc>> {
        expiration_from_lifetime(self.creation_time, self.lifetime)
    }
}
