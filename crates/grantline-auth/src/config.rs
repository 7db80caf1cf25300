//! Server-wide options
//!
//! All options are immutable after construction. They can be built in code
//! (every struct implements `Default`) or loaded from a TOML, YAML or JSON
//! file with `GRANTLINE__` environment overrides:
//!
//! ```toml
//! [dpop]
//! validation_mode = "nonce"
//! server_clock_skew_secs = 120
//!
//! [refresh_tokens]
//! reuse_policy = "revoke_family"
//! ```
//!
//! `GRANTLINE__SERVER_SIDE_SESSIONS__ENABLED=true` overrides
//! `server_side_sessions.enabled`.

use std::path::Path;

use grantline_dpop::DpopOptions;
use grantline_store::DEFAULT_HANDLE_ENTROPY_BYTES;
use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "GRANTLINE";

/// Top-level options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerOptions {
    pub dpop: DpopOptions,
    pub persistent_grants: PersistentGrantOptions,
    pub server_side_sessions: ServerSideSessionOptions,
    pub refresh_tokens: RefreshTokenOptions,
    pub device_flow: DeviceFlowOptions,
    pub audit: AuditOptions,
}

/// Persisted grant handling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistentGrantOptions {
    /// Delete one-time refresh tokens on use instead of marking them consumed.
    /// Reuse can then no longer be told apart from an unknown handle.
    pub delete_one_time_only_refresh_tokens_on_use: bool,
    /// Random bytes per generated handle (minimum 16)
    pub handle_entropy_bytes: usize,
    /// Seconds between expired-grant cleanup runs
    pub cleanup_interval_secs: u64,
    /// Grants removed per cleanup batch
    pub cleanup_batch_size: usize,
}

impl Default for PersistentGrantOptions {
    fn default() -> Self {
        Self {
            delete_one_time_only_refresh_tokens_on_use: false,
            handle_entropy_bytes: DEFAULT_HANDLE_ENTROPY_BYTES,
            cleanup_interval_secs: 3600,
            cleanup_batch_size: 100,
        }
    }
}

/// Server-side session coordination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSideSessionOptions {
    pub enabled: bool,
    /// Default for clients that do not set `coordinate_lifetime_with_user_session`
    pub coordinate_client_lifetimes_with_user_session: bool,
    pub expired_session_sends_back_channel_logout: bool,
    /// Sessions drained per expiration batch
    pub removal_batch_size: usize,
}

impl Default for ServerSideSessionOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            coordinate_client_lifetimes_with_user_session: false,
            expired_session_sends_back_channel_logout: false,
            removal_batch_size: 100,
        }
    }
}

/// Response to a consumed one-time refresh token being presented again
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshTokenReusePolicy {
    /// Reject the request only
    #[default]
    RejectOnly,
    /// Reject and remove every refresh token of the subject, client and session
    RevokeFamily,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshTokenOptions {
    pub reuse_policy: RefreshTokenReusePolicy,
}

/// Device authorization and CIBA polling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceFlowOptions {
    /// Minimum seconds between polls when the client sets none
    pub interval_secs: u64,
}

impl Default for DeviceFlowOptions {
    fn default() -> Self {
        Self { interval_secs: 5 }
    }
}

/// Security audit output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditOptions {
    pub service_name: String,
    /// Hash subject, session and client identifiers in audit records
    pub hash_identifiers: bool,
}

impl Default for AuditOptions {
    fn default() -> Self {
        Self {
            service_name: "grantline".to_string(),
            hash_identifiers: false,
        }
    }
}

impl ServerOptions {
    /// Load options from a file (TOML, YAML, or JSON)
    ///
    /// The format follows the extension. Environment variables with the
    /// `GRANTLINE__` prefix override file settings, `__` separating nested
    /// keys.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file doesn't exist
    /// - The file format is unsupported
    /// - The file contains invalid configuration
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_file_with_prefix(path, ENV_PREFIX)
    }

    /// Load options from a file with a custom environment prefix
    ///
    /// # Errors
    /// See [`ServerOptions::from_file`].
    pub fn from_file_with_prefix(path: impl AsRef<Path>, env_prefix: &str) -> Result<Self, ConfigError> {
        use config::{Config, Environment, File, FileFormat};

        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let format = match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => FileFormat::Toml,
            Some("yaml" | "yml") => FileFormat::Yaml,
            Some("json") => FileFormat::Json,
            _ => return Err(ConfigError::UnsupportedFormat),
        };

        let config = Config::builder()
            .add_source(File::new(path.to_str().ok_or(ConfigError::UnsupportedFormat)?, format))
            .add_source(
                Environment::with_prefix(env_prefix)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let options: Self = config.try_deserialize()?;
        options.validate()?;
        Ok(options)
    }

    /// Check cross-field constraints
    ///
    /// # Errors
    /// Returns `ConfigError::Invalid` naming the offending setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.persistent_grants.handle_entropy_bytes < 16 {
            return Err(ConfigError::Invalid(
                "persistent_grants.handle_entropy_bytes must be at least 16".to_string(),
            ));
        }
        if self.persistent_grants.cleanup_batch_size == 0 {
            return Err(ConfigError::Invalid(
                "persistent_grants.cleanup_batch_size must be positive".to_string(),
            ));
        }
        if self.server_side_sessions.removal_batch_size == 0 {
            return Err(ConfigError::Invalid(
                "server_side_sessions.removal_batch_size must be positive".to_string(),
            ));
        }
        if self.dpop.proof_token_lifetime_secs == 0 {
            return Err(ConfigError::Invalid(
                "dpop.proof_token_lifetime_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grantline_dpop::DpopValidationMode;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let options = ServerOptions::default();
        assert_eq!(options.dpop.proof_token_lifetime_secs, 1);
        assert_eq!(options.dpop.server_clock_skew_secs, 300);
        assert_eq!(options.refresh_tokens.reuse_policy, RefreshTokenReusePolicy::RejectOnly);
        assert_eq!(options.persistent_grants.handle_entropy_bytes, 32);
        assert!(!options.server_side_sessions.enabled);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_load_toml() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[dpop]
validation_mode = "both"
client_clock_skew_secs = 5

[refresh_tokens]
reuse_policy = "revoke_family"
"#
        )
        .unwrap();

        let options = ServerOptions::from_file_with_prefix(file.path(), "GRANTLINE_TEST_TOML").unwrap();
        assert_eq!(options.dpop.validation_mode, DpopValidationMode::Both);
        assert_eq!(options.dpop.client_clock_skew_secs, 5);
        assert_eq!(options.dpop.server_clock_skew_secs, 300);
        assert_eq!(options.refresh_tokens.reuse_policy, RefreshTokenReusePolicy::RevokeFamily);
    }

    #[test]
    fn test_load_json() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"device_flow": {{"interval_secs": 9}}}}"#).unwrap();

        let options = ServerOptions::from_file_with_prefix(file.path(), "GRANTLINE_TEST_JSON").unwrap();
        assert_eq!(options.device_flow.interval_secs, 9);
    }

    #[test]
    fn test_missing_and_unsupported_files() {
        assert!(matches!(
            ServerOptions::from_file("/nonexistent/grantline.toml"),
            Err(ConfigError::FileNotFound(_))
        ));

        let file = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
        assert!(matches!(
            ServerOptions::from_file(file.path()),
            Err(ConfigError::UnsupportedFormat)
        ));
    }

    #[test]
    fn test_constraints_are_checked_after_load() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "persistent_grants:\n  handle_entropy_bytes: 8").unwrap();

        assert!(matches!(
            ServerOptions::from_file_with_prefix(file.path(), "GRANTLINE_TEST_YAML"),
            Err(ConfigError::Invalid(_))
        ));
    }
}
