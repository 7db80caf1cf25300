//! Shared fixtures for DPoP validation tests

#![allow(dead_code)]

use std::sync::Arc;

use grantline_dpop::{AesGcmNonceSealer, DpopOptions, DpopProofValidator, NonceSealer};
use grantline_store::{Clock, InMemoryReplayCache, ManualClock};

pub const TOKEN_URL: &str = "https://identity.example.com/connect/token";

/// Validator wired to a manual clock and in-memory replay cache
pub struct Harness {
    pub clock: ManualClock,
    pub cache: Arc<InMemoryReplayCache>,
    pub sealer: Arc<AesGcmNonceSealer>,
    pub validator: DpopProofValidator,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_options(DpopOptions::default())
    }

    pub fn with_options(options: DpopOptions) -> Self {
        let clock = ManualClock::at_current_second();
        let clock_arc: Arc<dyn Clock> = Arc::new(clock.clone());
        let cache = Arc::new(InMemoryReplayCache::with_clock(clock_arc.clone()));
        let sealer = Arc::new(AesGcmNonceSealer::generate().expect("nonce sealer"));
        let validator = DpopProofValidator::builder(cache.clone(), sealer.clone())
            .options(options)
            .clock(clock_arc)
            .build();
        Self {
            clock,
            cache,
            sealer,
            validator,
        }
    }

    pub fn now(&self) -> i64 {
        self.clock.now().timestamp()
    }

    pub fn nonce_issued_now(&self) -> String {
        self.sealer.seal(self.clock.now()).expect("seal")
    }
}
