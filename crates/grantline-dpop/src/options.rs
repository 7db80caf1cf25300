//! DPoP validation options

use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Which freshness checks apply to a proof
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DpopValidationMode {
    /// Client-supplied `iat` within the client skew window
    #[default]
    Iat,
    /// Server-issued nonce within the server skew window
    Nonce,
    /// Both checks
    Both,
}

impl DpopValidationMode {
    /// Whether the `iat` check runs
    pub fn checks_iat(self) -> bool {
        matches!(self, Self::Iat | Self::Both)
    }

    /// Whether the nonce check runs
    pub fn checks_nonce(self) -> bool {
        matches!(self, Self::Nonce | Self::Both)
    }
}

/// Immutable DPoP validation configuration
///
/// Durations are whole seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DpopOptions {
    /// Freshness mode used when the client does not override it
    pub validation_mode: DpopValidationMode,
    /// How long a proof is valid after its `iat` (default 1)
    pub proof_token_lifetime_secs: u64,
    /// Skew tolerated on client-supplied `iat` (default 0)
    pub client_clock_skew_secs: u64,
    /// Skew tolerated on server-issued nonces (default 300)
    pub server_clock_skew_secs: u64,
}

impl Default for DpopOptions {
    fn default() -> Self {
        Self {
            validation_mode: DpopValidationMode::Iat,
            proof_token_lifetime_secs: 1,
            client_clock_skew_secs: 0,
            server_clock_skew_secs: 300,
        }
    }
}

fn secs(value: u64) -> Duration {
    Duration::seconds(i64::try_from(value).unwrap_or(i64::MAX / 1_000))
}

impl DpopOptions {
    pub fn proof_token_lifetime(&self) -> Duration {
        secs(self.proof_token_lifetime_secs)
    }

    pub fn client_clock_skew(&self) -> Duration {
        secs(self.client_clock_skew_secs)
    }

    pub fn server_clock_skew(&self) -> Duration {
        secs(self.server_clock_skew_secs)
    }

    /// Skew that governs replay-cache retention for `mode`
    pub fn replay_skew(&self, mode: DpopValidationMode) -> Duration {
        match mode {
            DpopValidationMode::Iat => self.client_clock_skew(),
            DpopValidationMode::Nonce => self.server_clock_skew(),
            DpopValidationMode::Both => self.client_clock_skew().max(self.server_clock_skew()),
        }
    }

    /// How long a `jti` is remembered: lifetime plus twice the skew
    pub fn replay_retention(&self, mode: DpopValidationMode) -> Duration {
        self.proof_token_lifetime() + self.replay_skew(mode) * 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = DpopOptions::default();
        assert_eq!(options.validation_mode, DpopValidationMode::Iat);
        assert_eq!(options.proof_token_lifetime(), Duration::seconds(1));
        assert_eq!(options.client_clock_skew(), Duration::zero());
        assert_eq!(options.server_clock_skew(), Duration::minutes(5));
    }

    #[test]
    fn test_replay_retention_per_mode() {
        let options = DpopOptions {
            client_clock_skew_secs: 10,
            ..DpopOptions::default()
        };
        assert_eq!(
            options.replay_retention(DpopValidationMode::Iat),
            Duration::seconds(21)
        );
        assert_eq!(
            options.replay_retention(DpopValidationMode::Nonce),
            Duration::seconds(601)
        );
        assert_eq!(
            options.replay_retention(DpopValidationMode::Both),
            Duration::seconds(601)
        );
    }

    #[test]
    fn test_mode_deserializes_snake_case() {
        let mode: DpopValidationMode = serde_json::from_str("\"both\"").unwrap();
        assert!(mode.checks_iat() && mode.checks_nonce());
    }
}
