use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Scopes a user has agreed to share with a client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Consent {
    pub subject_id: String,
    pub client_id: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    pub creation_time: DateTime<Utc>,
    pub expiration: Option<DateTime<Utc>>,
}
