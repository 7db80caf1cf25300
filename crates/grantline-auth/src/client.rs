//! Client configuration consulted by the grant validators
//!
//! Clients are authenticated before they reach this crate; [`Client`] only
//! carries the settings that influence grant validation and token lifetimes.

use serde::{Deserialize, Serialize};

use grantline_dpop::DpopValidationMode;

/// Refresh token handle reuse
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenUsage {
    /// Same handle on every refresh
    ReUse,
    /// New handle on every refresh; the old one is consumed
    #[default]
    OneTimeOnly,
}

/// Refresh token lifetime policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenExpiration {
    /// Fixed lifetime from first issuance
    #[default]
    Absolute,
    /// Renewed on every use, capped by the absolute lifetime
    Sliding,
}

/// Well-known grant type identifiers
pub mod grant_types {
    pub const AUTHORIZATION_CODE: &str = "authorization_code";
    pub const CLIENT_CREDENTIALS: &str = "client_credentials";
    pub const REFRESH_TOKEN: &str = "refresh_token";
    pub const PASSWORD: &str = "password";
    pub const DEVICE_FLOW: &str = "urn:ietf:params:oauth:grant-type:device_code";
    pub const CIBA: &str = "urn:openid:params:grant-type:ciba";
}

/// Scope that requests a refresh token
pub const OFFLINE_ACCESS_SCOPE: &str = "offline_access";

/// Token-endpoint relevant client settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Client {
    pub client_id: String,
    pub enabled: bool,
    pub allowed_grant_types: Vec<String>,
    pub allowed_scopes: Vec<String>,
    pub allow_offline_access: bool,

    pub require_pkce: bool,
    pub allow_plain_text_pkce: bool,

    pub require_dpop: bool,
    /// Overrides the server-wide DPoP freshness mode
    pub dpop_validation_mode: Option<DpopValidationMode>,

    pub refresh_token_usage: TokenUsage,
    pub refresh_token_expiration: TokenExpiration,
    pub absolute_refresh_token_lifetime: u64,
    pub sliding_refresh_token_lifetime: u64,
    pub update_access_token_claims_on_refresh: bool,

    pub authorization_code_lifetime: u64,
    pub access_token_lifetime: u64,
    /// Seconds between device / CIBA token polls
    pub polling_interval: Option<u64>,

    /// Overrides the server-wide session coordination setting
    pub coordinate_lifetime_with_user_session: Option<bool>,
    pub back_channel_logout_uri: Option<String>,
}

impl Default for Client {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            enabled: true,
            allowed_grant_types: Vec::new(),
            allowed_scopes: Vec::new(),
            allow_offline_access: false,
            require_pkce: true,
            allow_plain_text_pkce: false,
            require_dpop: false,
            dpop_validation_mode: None,
            refresh_token_usage: TokenUsage::OneTimeOnly,
            refresh_token_expiration: TokenExpiration::Absolute,
            absolute_refresh_token_lifetime: 2_592_000,
            sliding_refresh_token_lifetime: 1_296_000,
            update_access_token_claims_on_refresh: false,
            authorization_code_lifetime: 300,
            access_token_lifetime: 3600,
            polling_interval: None,
            coordinate_lifetime_with_user_session: None,
            back_channel_logout_uri: None,
        }
    }
}

impl Client {
    /// Client with `client_id` and otherwise default settings
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            ..Self::default()
        }
    }

    pub fn with_grant_types<I, S>(mut self, grant_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_grant_types = grant_types.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    pub fn allows_grant_type(&self, grant_type: &str) -> bool {
        self.allowed_grant_types.iter().any(|g| g == grant_type)
    }

    /// Whether every scope in `requested` is allowed
    ///
    /// `offline_access` additionally needs `allow_offline_access`.
    pub fn allows_scopes<S: AsRef<str>>(&self, requested: &[S]) -> bool {
        requested.iter().all(|scope| {
            let scope = scope.as_ref();
            if scope == OFFLINE_ACCESS_SCOPE {
                return self.allow_offline_access;
            }
            self.allowed_scopes.iter().any(|allowed| allowed == scope)
        })
    }

    pub fn has_back_channel_logout(&self) -> bool {
        self.back_channel_logout_uri
            .as_deref()
            .is_some_and(|uri| !uri.is_empty())
    }
}
