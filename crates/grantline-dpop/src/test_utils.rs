//! Proof minting helpers for tests
//!
//! Keys come from `ring` ECDSA generation and proofs are signed through
//! `jsonwebtoken::crypto::sign`. The builder can also produce deliberately
//! broken proofs (wrong `typ`, symmetric or `none` algorithms, private key
//! members in the header) so each rejection path can be exercised.
//!
//! Not for production use.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, EncodingKey};
use ring::rand::SystemRandom;
use ring::signature::{
    ECDSA_P256_SHA256_FIXED_SIGNING, ECDSA_P384_SHA384_FIXED_SIGNING, EcdsaKeyPair, EcdsaSigningAlgorithm,
    KeyPair,
};
use serde_json::{Map, Value, json};
use uuid::Uuid;

use crate::thumbprint::{access_token_hash, compute_jwk_thumbprint};

/// An ECDSA key pair usable for signing test proofs
#[derive(Debug, Clone)]
pub struct TestDpopKey {
    pkcs8: Vec<u8>,
    algorithm: Algorithm,
    jwk: Map<String, Value>,
}

impl TestDpopKey {
    /// Fresh P-256 key (ES256)
    pub fn es256() -> Self {
        Self::generate(&ECDSA_P256_SHA256_FIXED_SIGNING, Algorithm::ES256, "P-256", 32)
    }

    /// Fresh P-384 key (ES384)
    pub fn es384() -> Self {
        Self::generate(&ECDSA_P384_SHA384_FIXED_SIGNING, Algorithm::ES384, "P-384", 48)
    }

    /// # Panics
    /// Panics if the system RNG or key parsing fails.
    fn generate(
        signing: &'static EcdsaSigningAlgorithm,
        algorithm: Algorithm,
        crv: &str,
        coordinate_len: usize,
    ) -> Self {
        let rng = SystemRandom::new();
        let pkcs8 = EcdsaKeyPair::generate_pkcs8(signing, &rng).expect("generate test key");
        let pair = EcdsaKeyPair::from_pkcs8(signing, pkcs8.as_ref(), &rng).expect("parse test key");

        // Uncompressed point: 0x04 || x || y
        let point = pair.public_key().as_ref();
        let x = &point[1..=coordinate_len];
        let y = &point[1 + coordinate_len..];

        let jwk = match json!({
            "kty": "EC",
            "crv": crv,
            "x": URL_SAFE_NO_PAD.encode(x),
            "y": URL_SAFE_NO_PAD.encode(y),
        }) {
            Value::Object(map) => map,
            _ => Map::new(),
        };

        Self {
            pkcs8: pkcs8.as_ref().to_vec(),
            algorithm,
            jwk,
        }
    }

    /// Public JWK
    pub fn public_jwk(&self) -> &Map<String, Value> {
        &self.jwk
    }

    /// RFC 7638 thumbprint of the public key
    ///
    /// # Panics
    /// Never for keys produced by this type.
    pub fn thumbprint(&self) -> String {
        compute_jwk_thumbprint(&self.jwk).expect("thumbprint of generated key")
    }

    /// JWS `alg` name of the key
    pub fn alg(&self) -> &'static str {
        match self.algorithm {
            Algorithm::ES384 => "ES384",
            _ => "ES256",
        }
    }

    fn encoding_key(&self) -> EncodingKey {
        EncodingKey::from_ec_der(&self.pkcs8)
    }
}

#[derive(Debug, Clone)]
enum Signer {
    Key,
    Secret(Vec<u8>),
    Unsigned,
}

/// Builder for signed DPoP proofs
#[derive(Debug, Clone)]
pub struct ProofBuilder {
    key: TestDpopKey,
    header: Map<String, Value>,
    claims: Map<String, Value>,
    signer: Signer,
}

impl ProofBuilder {
    /// Well-formed proof for `method` and `htu` issued at `iat`
    pub fn new(key: &TestDpopKey, method: &str, htu: &str, iat: i64) -> Self {
        let mut header = Map::new();
        header.insert("typ".to_string(), json!("dpop+jwt"));
        header.insert("alg".to_string(), json!(key.alg()));
        header.insert("jwk".to_string(), Value::Object(key.public_jwk().clone()));

        let mut claims = Map::new();
        claims.insert("jti".to_string(), json!(Uuid::new_v4().to_string()));
        claims.insert("htm".to_string(), json!(method));
        claims.insert("htu".to_string(), json!(htu));
        claims.insert("iat".to_string(), json!(iat));

        Self {
            key: key.clone(),
            header,
            claims,
            signer: Signer::Key,
        }
    }

    pub fn jti(self, jti: &str) -> Self {
        self.claim("jti", json!(jti))
    }

    pub fn nonce(self, nonce: &str) -> Self {
        self.claim("nonce", json!(nonce))
    }

    /// Bind to an access token via `ath`
    pub fn access_token(self, token: &str) -> Self {
        self.claim("ath", json!(access_token_hash(token)))
    }

    /// Set any payload claim
    pub fn claim(mut self, name: &str, value: Value) -> Self {
        self.claims.insert(name.to_string(), value);
        self
    }

    pub fn without_claim(mut self, name: &str) -> Self {
        self.claims.remove(name);
        self
    }

    /// Set any header parameter
    pub fn header(mut self, name: &str, value: Value) -> Self {
        self.header.insert(name.to_string(), value);
        self
    }

    /// Add a member to the embedded `jwk`
    pub fn jwk_member(mut self, name: &str, value: Value) -> Self {
        if let Some(Value::Object(jwk)) = self.header.get_mut("jwk") {
            jwk.insert(name.to_string(), value);
        }
        self
    }

    /// Sign with HMAC under `alg` (HS256/384/512)
    pub fn hmac(mut self, alg: &str, secret: &[u8]) -> Self {
        self.signer = Signer::Secret(secret.to_vec());
        self.header("alg", json!(alg))
    }

    /// `alg: none` with an empty signature
    pub fn unsigned(mut self) -> Self {
        self.signer = Signer::Unsigned;
        self.header("alg", json!("none"))
    }

    /// Compact JWS
    ///
    /// # Panics
    /// Panics if signing fails.
    pub fn build(&self) -> String {
        let header = URL_SAFE_NO_PAD.encode(Value::Object(self.header.clone()).to_string());
        let payload = URL_SAFE_NO_PAD.encode(Value::Object(self.claims.clone()).to_string());
        let message = format!("{header}.{payload}");

        let signature = match &self.signer {
            Signer::Key => jsonwebtoken::crypto::sign(
                message.as_bytes(),
                &self.key.encoding_key(),
                self.key.algorithm,
            )
            .expect("sign proof"),
            Signer::Secret(secret) => {
                let algorithm = match self.header.get("alg").and_then(Value::as_str) {
                    Some("HS384") => Algorithm::HS384,
                    Some("HS512") => Algorithm::HS512,
                    _ => Algorithm::HS256,
                };
                jsonwebtoken::crypto::sign(message.as_bytes(), &EncodingKey::from_secret(secret), algorithm)
                    .expect("sign proof")
            }
            Signer::Unsigned => String::new(),
        };
        format!("{message}.{signature}")
    }
}
