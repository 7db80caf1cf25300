//! RFC 7638 JWK thumbprints and access-token hashes

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};

use crate::Result;
use crate::errors::DpopError;

/// JWK members that only appear in private or symmetric keys
pub const PRIVATE_JWK_MEMBERS: [&str; 8] = ["d", "p", "q", "dp", "dq", "qi", "oth", "k"];

fn required<'a>(jwk: &'a Map<String, Value>, member: &str) -> Result<&'a str> {
    jwk.get(member)
        .and_then(Value::as_str)
        .ok_or_else(|| DpopError::policy(format!("Invalid 'jwk' value: missing '{member}'.")))
}

/// Base64url SHA-256 thumbprint over the required public members
///
/// # Errors
/// Returns `DpopError::PolicyViolation` for unsupported key types or missing
/// members.
pub fn compute_jwk_thumbprint(jwk: &Map<String, Value>) -> Result<String> {
    // Members inserted in lexicographic order so the encoding is canonical
    // with or without serde_json's preserve_order.
    let canonical = match required(jwk, "kty")? {
        "EC" => json!({
            "crv": required(jwk, "crv")?,
            "kty": "EC",
            "x": required(jwk, "x")?,
            "y": required(jwk, "y")?,
        }),
        "RSA" => json!({
            "e": required(jwk, "e")?,
            "kty": "RSA",
            "n": required(jwk, "n")?,
        }),
        other => {
            return Err(DpopError::policy(format!(
                "Invalid 'jwk' value: unsupported key type '{other}'."
            )));
        }
    };
    let encoded = serde_json::to_string(&canonical).map_err(|e| DpopError::Crypto {
        reason: format!("thumbprint encoding failed: {e}"),
    })?;
    Ok(URL_SAFE_NO_PAD.encode(Sha256::digest(encoded.as_bytes())))
}

/// `cnf` claim value binding a token to `jkt`
pub fn confirmation_for(jkt: &str) -> String {
    json!({ "jkt": jkt }).to_string()
}

/// Expected `ath` claim for an access token
pub fn access_token_hash(access_token: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(access_token.as_bytes()))
}

/// Constant-time string comparison
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    use subtle::ConstantTimeEq;
    a.as_bytes().ct_eq(b.as_bytes()).into()
}
