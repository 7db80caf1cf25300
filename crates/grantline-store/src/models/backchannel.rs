use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Principal, expiration_from_lifetime};

/// Client-initiated backchannel authentication (CIBA) request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackchannelAuthenticationRequest {
    /// Storage key, assigned when the request is stored
    #[serde(default)]
    pub internal_id: String,
    pub creation_time: DateTime<Utc>,
    /// Lifetime in seconds
    pub lifetime: u64,
    pub client_id: String,
    /// User the request targets
    pub subject: Principal,
    #[serde(default)]
    pub requested_scopes: Vec<String>,
    #[serde(default)]
    pub requested_resource_indicators: Vec<String>,
    pub binding_message: Option<String>,
    /// Scopes the user approved; `None` until completed
    pub authorized_scopes: Option<Vec<String>>,
    pub is_complete: bool,
    pub session_id: Option<String>,
    pub description: Option<String>,
}

impl BackchannelAuthenticationRequest {
    /// Pending request for a user
    pub fn pending(
        client_id: impl Into<String>,
        subject: Principal,
        requested_scopes: Vec<String>,
        creation_time: DateTime<Utc>,
        lifetime: u64,
    ) -> Self {
        Self {
            internal_id: String::new(),
            creation_time,
            lifetime,
            client_id: client_id.into(),
            subject,
            requested_scopes,
            requested_resource_indicators: Vec::new(),
            binding_message: None,
            authorized_scopes: None,
            is_complete: false,
            session_id: None,
            description: None,
        }
    }

    /// Complete the request with the user's decision
    ///
    /// An empty scope list records a denial.
    pub fn complete(&mut self, authorized_scopes: Vec<String>, session_id: Option<String>) {
        self.authorized_scopes = Some(authorized_scopes);
        self.session_id = session_id;
        self.is_complete = true;
    }

    /// Whether the user approved at least one scope
    pub fn is_approved(&self) -> bool {
        self.is_complete
            && self
                .authorized_scopes
                .as_ref()
                .is_some_and(|scopes| !scopes.is_empty())
    }

    /// Absolute expiration
    pub fn expiration(&self) -> Option<DateTime<Utc>> {
        expiration_from_lifetime(self.creation_time, self.lifetime)
    }
}
