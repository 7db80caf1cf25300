//! PKCE (RFC 7636) verifier checks

use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

pub const MIN_VERIFIER_LENGTH: usize = 43;
pub const MAX_VERIFIER_LENGTH: usize = 128;

/// Code challenge transformation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeChallengeMethod {
    Plain,
    S256,
}

impl CodeChallengeMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::S256 => "S256",
        }
    }
}

impl FromStr for CodeChallengeMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plain" => Ok(Self::Plain),
            "S256" => Ok(Self::S256),
            other => Err(format!("unsupported code_challenge_method: {other}")),
        }
    }
}

/// Length 43-128 over the unreserved characters `[A-Za-z0-9-._~]`
pub fn is_valid_verifier(verifier: &str) -> bool {
    (MIN_VERIFIER_LENGTH..=MAX_VERIFIER_LENGTH).contains(&verifier.len())
        && verifier
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~'))
}

/// `BASE64URL(SHA256(verifier))`
pub fn s256_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Whether `verifier` matches `challenge` under `method`
pub fn verify(verifier: &str, challenge: &str, method: CodeChallengeMethod) -> bool {
    let transformed = match method {
        CodeChallengeMethod::Plain => verifier.to_string(),
        CodeChallengeMethod::S256 => s256_challenge(verifier),
    };
    transformed.as_bytes().ct_eq(challenge.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 7636 Appendix B
    const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
    const CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

    #[test]
    fn test_s256_vector() {
        assert_eq!(s256_challenge(VERIFIER), CHALLENGE);
        assert!(verify(VERIFIER, CHALLENGE, CodeChallengeMethod::S256));
        assert!(!verify(VERIFIER, "wrong", CodeChallengeMethod::S256));
    }

    #[test]
    fn test_plain() {
        assert!(verify(VERIFIER, VERIFIER, CodeChallengeMethod::Plain));
        assert!(!verify(VERIFIER, CHALLENGE, CodeChallengeMethod::Plain));
    }

    #[test]
    fn test_verifier_shape() {
        assert!(is_valid_verifier(VERIFIER));
        assert!(!is_valid_verifier(&"a".repeat(42)));
        assert!(is_valid_verifier(&"a".repeat(128)));
        assert!(!is_valid_verifier(&"a".repeat(129)));
        assert!(!is_valid_verifier(&format!("{}+", "a".repeat(43))));
    }

    #[test]
    fn test_method_parsing() {
        assert_eq!("S256".parse(), Ok(CodeChallengeMethod::S256));
        assert_eq!("plain".parse(), Ok(CodeChallengeMethod::Plain));
        assert!("s256".parse::<CodeChallengeMethod>().is_err());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn s256_accepts_own_challenge_only(verifier in "[A-Za-z0-9._~-]{43,128}", other in "[A-Za-z0-9._~-]{43,128}") {
                prop_assert!(is_valid_verifier(&verifier));
                let challenge = s256_challenge(&verifier);
                prop_assert!(verify(&verifier, &challenge, CodeChallengeMethod::S256));
                prop_assume!(other != verifier);
                prop_assert!(!verify(&other, &challenge, CodeChallengeMethod::S256));
            }
        }
    }
}
