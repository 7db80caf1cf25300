use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Principal, expiration_from_lifetime};

/// Authorization code issued by the authorize endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationCode {
    pub creation_time: DateTime<Utc>,
    /// Lifetime in seconds
    pub lifetime: u64,
    pub client_id: String,
    pub subject: Principal,
    pub is_open_id: bool,
    pub requested_scopes: Vec<String>,
    #[serde(default)]
    pub requested_resource_indicators: Vec<String>,
    pub redirect_uri: String,
    pub nonce: Option<String>,
    pub state_hash: Option<String>,
    #[serde(default)]
    pub was_consent_shown: bool,
    pub session_id: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    /// Thumbprint of the DPoP key presented at the authorize endpoint
    pub dpop_key_thumbprint: Option<String>,
    pub description: Option<String>,
}

impl AuthorizationCode {
    /// Minimal code for a subject; optional parts default to empty
    pub fn new(
        client_id: impl Into<String>,
        subject: Principal,
        redirect_uri: impl Into<String>,
        creation_time: DateTime<Utc>,
        lifetime: u64,
    ) -> Self {
        let session_id = subject.session_id().map(str::to_string);
        Self {
            creation_time,
            lifetime,
            client_id: client_id.into(),
            subject,
            is_open_id: false,
            requested_scopes: Vec::new(),
            requested_resource_indicators: Vec::new(),
            redirect_uri: redirect_uri.into(),
            nonce: None,
            state_hash: None,
            was_consent_shown: false,
            session_id,
            code_challenge: None,
            code_challenge_method: None,
            dpop_key_thumbprint: None,
            description: None,
        }
    }

    /// Whether the code carries a PKCE challenge
    pub fn has_code_challenge(&self) -> bool {
        self.code_challenge.as_deref().is_some_and(|c| !c.is_empty())
    }

    /// Absolute expiration
    pub fn expiration(&self) -> Option<DateTime<Utc>> {
        expiration_from_lifetime(self.creation_time, self.lifetime)
    }
}
