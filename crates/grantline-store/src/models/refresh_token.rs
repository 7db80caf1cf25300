use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Principal, Token, expiration_from_lifetime};

/// Proof-of-possession mechanism a refresh token was bound with
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProofType {
    /// Bearer token
    #[default]
    None,
    /// Mutual-TLS client certificate
    ClientCertificate,
    /// DPoP key
    #[serde(rename = "DPoP")]
    DPoP,
}

/// Refresh token grant payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshToken {
    pub creation_time: DateTime<Utc>,
    /// Lifetime in seconds
    pub lifetime: u64,
    pub consumed_time: Option<DateTime<Utc>>,
    /// Access tokens keyed by resource indicator; `""` is the default entry
    #[serde(default)]
    pub access_tokens: HashMap<String, Token>,
    pub subject: Principal,
    pub client_id: String,
    pub session_id: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub authorized_scopes: Vec<String>,
    /// Allowed resource indicators; `None` is unrestricted
    pub authorized_resource_indicators: Option<Vec<String>>,
    #[serde(default)]
    pub proof_type: ProofType,
    #[serde(default = "default_version")]
    pub version: u32,
}

fn default_version() -> u32 {
    5
}

impl RefreshToken {
    /// New refresh token for a subject and client
    pub fn new(
        subject: Principal,
        client_id: impl Into<String>,
        creation_time: DateTime<Utc>,
        lifetime: u64,
    ) -> Self {
        let session_id = subject.session_id().map(str::to_string);
        Self {
            creation_time,
            lifetime,
            consumed_time: None,
            access_tokens: HashMap::new(),
            subject,
            client_id: client_id.into(),
            session_id,
            description: None,
            authorized_scopes: Vec::new(),
            authorized_resource_indicators: None,
            proof_type: ProofType::None,
            version: default_version(),
        }
    }

    /// Subject identifier
    pub fn subject_id(&self) -> Option<&str> {
        self.subject.subject_id()
    }

    /// Access token minted for `resource` (`None` selects the default entry)
    pub fn get_access_token(&self, resource: Option<&str>) -> Option<&Token> {
        self.access_tokens.get(resource.unwrap_or_default())
    }

    /// Store the access token minted for `resource`
    pub fn set_access_token(&mut self, token: Token, resource: Option<&str>) {
        self.access_tokens
            .insert(resource.unwrap_or_default().to_string(), token);
    }

    /// Whether a token may be minted for `resource`
    ///
    /// The default (`None`) resource is always allowed.
    pub fn is_resource_allowed(&self, resource: Option<&str>) -> bool {
        match (resource, &self.authorized_resource_indicators) {
            (None, _) | (Some(""), _) | (_, None) => true,
            (Some(resource), Some(allowed)) => allowed.iter().any(|r| r == resource),
        }
    }

    /// Absolute expiration
    pub fn expiration(&self) -> Option<DateTime<Utc>> {
        expiration_from_lifetime(self.creation_time, self.lifetime)
    }

    /// Whether the token has expired at `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration().is_some_and(|expiration| expiration <= now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token() -> RefreshToken {
        RefreshToken::new(Principal::new("alice", Some("s1")), "web", Utc::now(), 3600)
    }

    #[test]
    fn test_access_tokens_keyed_by_resource() {
        let mut rt = token();
        let api = Token::access_token("iss", "web", Utc::now(), 60).with_claim("aud", "api");
        let default = Token::access_token("iss", "web", Utc::now(), 60);

        rt.set_access_token(default.clone(), None);
        rt.set_access_token(api.clone(), Some("urn:api"));

        assert_eq!(rt.get_access_token(None), Some(&default));
        assert_eq!(rt.get_access_token(Some("")), Some(&default));
        assert_eq!(rt.get_access_token(Some("urn:api")), Some(&api));
        assert_eq!(rt.get_access_token(Some("urn:other")), None);
    }

    #[test]
    fn test_resource_allowlist() {
        let mut rt = token();
        assert!(rt.is_resource_allowed(Some("urn:anything")));

        rt.authorized_resource_indicators = Some(vec!["urn:api".to_string()]);
        assert!(rt.is_resource_allowed(Some("urn:api")));
        assert!(rt.is_resource_allowed(None));
        assert!(!rt.is_resource_allowed(Some("urn:other")));
    }

    #[test]
    fn test_proof_type_wire_names() {
        assert_eq!(serde_json::to_string(&ProofType::DPoP).unwrap(), "\"DPoP\"");
        assert_eq!(
            serde_json::to_string(&ProofType::ClientCertificate).unwrap(),
            "\"ClientCertificate\""
        );
    }
}
