//! Typed grant payloads

mod authorization_code;
mod backchannel;
mod consent;
mod device_code;
mod principal;
mod refresh_token;
mod token;

pub use authorization_code::AuthorizationCode;
pub use backchannel::BackchannelAuthenticationRequest;
pub use consent::Consent;
pub use device_code::DeviceCode;
pub use principal::{Claim, Principal, claim_types};
pub use refresh_token::{ProofType, RefreshToken};
pub use token::{AccessTokenType, Token};

use chrono::{DateTime, Duration, Utc};

/// Expiration for a `creation + lifetime` pair; a zero lifetime never expires
pub fn expiration_from_lifetime(creation_time: DateTime<Utc>, lifetime_secs: u64) -> Option<DateTime<Utc>> {
    if lifetime_secs == 0 {
        return None;
    }
    let secs = i64::try_from(lifetime_secs).unwrap_or(i64::MAX);
    Duration::try_seconds(secs).and_then(|lifetime| creation_time.checked_add_signed(lifetime))
}
