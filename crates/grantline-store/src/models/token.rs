use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Claim, claim_types, expiration_from_lifetime};

/// How an access token is represented to the client
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessTokenType {
    /// Self-contained signed JWT
    #[default]
    Jwt,
    /// Opaque handle backed by the reference token store
    Reference,
}

/// Description of a minted access token
///
/// Also the payload of the reference token store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub token_type: String,
    pub creation_time: DateTime<Utc>,
    /// Lifetime in seconds
    pub lifetime: u64,
    pub issuer: String,
    #[serde(default)]
    pub audiences: Vec<String>,
    pub client_id: String,
    #[serde(default)]
    pub claims: Vec<Claim>,
    /// Serialized `cnf` claim value
    pub confirmation: Option<String>,
    #[serde(default)]
    pub access_token_type: AccessTokenType,
    #[serde(default)]
    pub allowed_signing_algorithms: Vec<String>,
    pub description: Option<String>,
    #[serde(default = "default_version")]
    pub version: u32,
}

fn default_version() -> u32 {
    1
}

impl Token {
    /// Access token description
    pub fn access_token(
        issuer: impl Into<String>,
        client_id: impl Into<String>,
        creation_time: DateTime<Utc>,
        lifetime: u64,
    ) -> Self {
        Self {
            token_type: "access_token".to_string(),
            creation_time,
            lifetime,
            issuer: issuer.into(),
            audiences: Vec::new(),
            client_id: client_id.into(),
            claims: Vec::new(),
            confirmation: None,
            access_token_type: AccessTokenType::Jwt,
            allowed_signing_algorithms: Vec::new(),
            description: None,
            version: default_version(),
        }
    }

    /// Add a claim
    pub fn with_claim(mut self, claim_type: impl Into<String>, value: impl Into<String>) -> Self {
        self.claims.push(Claim::new(claim_type, value));
        self
    }

    fn find_first(&self, claim_type: &str) -> Option<&str> {
        self.claims
            .iter()
            .find(|claim| claim.claim_type == claim_type)
            .map(|claim| claim.value.as_str())
    }

    /// Subject identifier, if the token was issued for a user
    pub fn subject_id(&self) -> Option<&str> {
        self.find_first(claim_types::SUBJECT)
    }

    /// Session identifier
    pub fn session_id(&self) -> Option<&str> {
        self.find_first(claim_types::SESSION_ID)
    }

    /// Granted scopes
    pub fn scopes(&self) -> Vec<&str> {
        self.claims
            .iter()
            .filter(|claim| claim.claim_type == claim_types::SCOPE)
            .map(|claim| claim.value.as_str())
            .collect()
    }

    /// Absolute expiration
    pub fn expiration(&self) -> Option<DateTime<Utc>> {
        expiration_from_lifetime(self.creation_time, self.lifetime)
    }
}
