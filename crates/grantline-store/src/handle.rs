//! External handle generation and storage key derivation
//!
//! The handle is the value handed to clients; the storage key is a one-way
//! derivation of it so a leaked store dump does not yield usable tokens.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use ring::rand::{SecureRandom, SystemRandom};
use sha2::{Digest, Sha256};

use crate::DEFAULT_HANDLE_ENTROPY_BYTES;
use crate::error::{Result, StoreError};
use crate::grant::GrantType;

/// Generates random, collision-resistant grant handles
#[derive(Debug, Clone)]
pub struct HandleGenerator {
    rng: SystemRandom,
    entropy_bytes: usize,
}

impl HandleGenerator {
    /// Generator producing handles with `entropy_bytes` random bytes
    ///
    /// Values below 16 are raised to 16.
    pub fn new(entropy_bytes: usize) -> Self {
        Self {
            rng: SystemRandom::new(),
            entropy_bytes: entropy_bytes.max(16),
        }
    }

    /// Bytes of entropy per handle
    pub fn entropy_bytes(&self) -> usize {
        self.entropy_bytes
    }

    /// Produce a new uppercase hex handle
    ///
    /// # Errors
    /// Returns `StoreError::Backend` if the system RNG fails.
    pub fn generate(&self) -> Result<String> {
        let mut bytes = vec![0u8; self.entropy_bytes];
        self.rng.fill(&mut bytes).map_err(|_| StoreError::Backend {
            reason: "system random number generator failed".to_string(),
        })?;
        Ok(hex::encode_upper(bytes))
    }
}

impl Default for HandleGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_HANDLE_ENTROPY_BYTES)
    }
}

/// Derive the storage key for a handle of the given grant type
pub fn derive_key(handle: &str, grant_type: GrantType) -> String {
    let mut hasher = Sha256::new();
    hasher.update(handle.as_bytes());
    hasher.update(b":");
    hasher.update(grant_type.as_str().as_bytes());
    STANDARD.encode(hasher.finalize())
}
