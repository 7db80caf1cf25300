//! # Grantline DPoP - RFC 9449 Proof Validation
//!
//! Validates DPoP (Demonstrating Proof-of-Possession) proofs presented at the
//! token endpoint and on resource requests, and binds them to the RFC 7638
//! thumbprint of the embedded public key.
//!
//! ## Pipeline
//!
//! Validation runs five ordered phases, each a swappable
//! [`ProofValidationStep`]:
//!
//! 1. **Header** - `typ`, asymmetric `alg` allowlist, public-only `jwk`
//! 2. **Signature** - verified with the embedded key
//! 3. **Payload** - `jti`, `htm`, `htu`, `iat`, optional `ath` / `cnf.jkt`
//! 4. **Freshness** - `iat` window and/or sealed server nonce
//! 5. **Replay** - `jti` recorded in the [`grantline_store::ReplayCache`]
//!
//! The first failing phase ends validation. The replay phase runs last so a
//! proof that fails any other check never occupies a `jti` slot.
//!
//! ## `htu` matching
//!
//! The `htu` claim must equal the request URL with query and fragment
//! removed, byte for byte. Host case, explicit default ports and trailing
//! slashes are not normalized.
//!
//! ## Feature Flags
//!
//! - `test-utils` - proof minting helpers backed by `ring` ECDSA keys

pub mod context;
pub mod errors;
pub mod nonce;
pub mod options;
pub mod steps;
pub mod thumbprint;
pub mod validator;

#[cfg(feature = "test-utils")]
pub mod test_utils;

pub use context::{DpopProofValidationContext, DpopProofValidationResult};
pub use errors::{DpopError, INVALID_DPOP_PROOF};
pub use nonce::{AesGcmNonceSealer, NonceSealer};
pub use options::{DpopOptions, DpopValidationMode};
pub use steps::{ProofValidationState, ProofValidationStep, SUPPORTED_ALGORITHMS, ValidationPhase};
pub use thumbprint::{access_token_hash, compute_jwk_thumbprint};
pub use validator::{DpopProofValidator, DpopProofValidatorBuilder};

/// DPoP result type
pub type Result<T> = std::result::Result<T, DpopError>;

/// DPoP JWT header type as defined in RFC 9449
pub const DPOP_JWT_TYPE: &str = "dpop+jwt";

/// Replay-cache purpose for proof `jti` values
pub const REPLAY_PURPOSE: &str = "dpop-proof-jti";

/// HTTP header carrying a server-issued nonce
pub const DPOP_NONCE_HEADER: &str = "DPoP-Nonce";
