use serde::{Deserialize, Serialize};

/// Well-known claim types
pub mod claim_types {
    /// Subject identifier
    pub const SUBJECT: &str = "sub";
    /// Session identifier
    pub const SESSION_ID: &str = "sid";
    /// Authentication time
    pub const AUTH_TIME: &str = "auth_time";
    /// Identity provider
    pub const IDENTITY_PROVIDER: &str = "idp";
    /// Granted scope
    pub const SCOPE: &str = "scope";
    /// Client identifier
    pub const CLIENT_ID: &str = "client_id";
    /// Confirmation (proof-of-possession binding)
    pub const CONFIRMATION: &str = "cnf";
    /// Display name
    pub const NAME: &str = "name";
}

/// A single claim
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    /// Claim type (`sub`, `scope`, ...)
    #[serde(rename = "type")]
    pub claim_type: String,
    /// Claim value
    pub value: String,
}

impl Claim {
    /// Create a claim
    pub fn new(claim_type: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            claim_type: claim_type.into(),
            value: value.into(),
        }
    }
}

/// Authenticated user, as a bag of claims
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Claims describing the user
    pub claims: Vec<Claim>,
}

impl Principal {
    /// Principal with a `sub` and optional `sid`
    pub fn new(subject_id: impl Into<String>, session_id: Option<&str>) -> Self {
        let mut claims = vec![Claim::new(claim_types::SUBJECT, subject_id)];
        if let Some(sid) = session_id {
            claims.push(Claim::new(claim_types::SESSION_ID, sid));
        }
        Self { claims }
    }

    /// Add a claim
    pub fn with_claim(mut self, claim_type: impl Into<String>, value: impl Into<String>) -> Self {
        self.claims.push(Claim::new(claim_type, value));
        self
    }

    /// First value of the given claim type
    pub fn find_first(&self, claim_type: &str) -> Option<&str> {
        self.claims
            .iter()
            .find(|claim| claim.claim_type == claim_type)
            .map(|claim| claim.value.as_str())
    }

    /// Subject identifier (`sub`)
    pub fn subject_id(&self) -> Option<&str> {
        self.find_first(claim_types::SUBJECT)
    }

    /// Session identifier (`sid`)
    pub fn session_id(&self) -> Option<&str> {
        self.find_first(claim_types::SESSION_ID)
    }
}
