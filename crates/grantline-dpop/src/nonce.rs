//! Server nonce sealing
//!
//! A server nonce is the issue time sealed under an AEAD key: clients cannot
//! forge or extend one, and the server needs no storage to check it.

use std::fmt;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use ring::aead::{AES_256_GCM, Aad, LessSafeKey, NONCE_LEN, Nonce, UnboundKey};
use ring::rand::{SecureRandom, SystemRandom};

use crate::Result;
use crate::errors::DpopError;

const NONCE_AAD: &[u8] = b"grantline-dpop-nonce";

/// Authenticated seal/unseal of nonce issue times
pub trait NonceSealer: Send + Sync + fmt::Debug {
    /// Seal an issue time into an opaque nonce
    ///
    /// # Errors
    /// Returns `DpopError::Crypto` if the primitive fails.
    fn seal(&self, issued_at: DateTime<Utc>) -> Result<String>;

    /// Recover the issue time (epoch seconds); `None` for tampered or foreign nonces
    fn unseal(&self, nonce: &str) -> Option<i64>;
}

/// AES-256-GCM nonce sealer
pub struct AesGcmNonceSealer {
    key: LessSafeKey,
    rng: SystemRandom,
}

impl fmt::Debug for AesGcmNonceSealer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AesGcmNonceSealer").finish_non_exhaustive()
    }
}

impl AesGcmNonceSealer {
    /// Sealer with a fixed 32-byte key (shared across server instances)
    ///
    /// # Errors
    /// Returns `DpopError::Crypto` if the key is not 32 bytes.
    pub fn from_key(key: &[u8]) -> Result<Self> {
        let unbound = UnboundKey::new(&AES_256_GCM, key).map_err(|_| DpopError::Crypto {
            reason: "nonce sealing key must be 32 bytes".to_string(),
        })?;
        Ok(Self {
            key: LessSafeKey::new(unbound),
            rng: SystemRandom::new(),
        })
    }

    /// Sealer with a random per-process key
    ///
    /// # Errors
    /// Returns `DpopError::Crypto` if the system RNG fails.
    pub fn generate() -> Result<Self> {
        let rng = SystemRandom::new();
        let mut key = [0u8; 32];
        rng.fill(&mut key).map_err(|_| DpopError::Crypto {
            reason: "system random number generator failed".to_string(),
        })?;
        Self::from_key(&key)
    }
}

impl NonceSealer for AesGcmNonceSealer {
    fn seal(&self, issued_at: DateTime<Utc>) -> Result<String> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng.fill(&mut nonce_bytes).map_err(|_| DpopError::Crypto {
            reason: "system random number generator failed".to_string(),
        })?;

        let mut in_out = issued_at.timestamp().to_be_bytes().to_vec();
        self.key
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::from(NONCE_AAD),
                &mut in_out,
            )
            .map_err(|_| DpopError::Crypto {
                reason: "nonce sealing failed".to_string(),
            })?;

        let mut sealed = nonce_bytes.to_vec();
        sealed.extend_from_slice(&in_out);
        Ok(URL_SAFE_NO_PAD.encode(sealed))
    }

    fn unseal(&self, nonce: &str) -> Option<i64> {
        let raw = URL_SAFE_NO_PAD.decode(nonce).ok()?;
        if raw.len() <= NONCE_LEN {
            return None;
        }
        let (nonce_bytes, ciphertext) = raw.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes).ok()?;
        let mut in_out = ciphertext.to_vec();
        let plaintext = self
            .key
            .open_in_place(nonce, Aad::from(NONCE_AAD), &mut in_out)
            .ok()?;
        let bytes: [u8; 8] = plaintext.try_into().ok()?;
        Some(i64::from_be_bytes(bytes))
    }
}
