//! DPoP proof validator

use std::sync::Arc;

use grantline_store::{Clock, ReplayCache, SystemClock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::Result;
use crate::context::{DpopProofValidationContext, DpopProofValidationResult};
use crate::errors::DpopError;
use crate::nonce::NonceSealer;
use crate::options::DpopOptions;
use crate::steps::{
    FreshnessStep, HeaderStep, PayloadStep, ProofValidationState, ProofValidationStep, ReplayStep,
    SignatureStep, ValidationPhase,
};

/// Validates DPoP proofs through the ordered phase pipeline
#[derive(Debug, Clone)]
pub struct DpopProofValidator {
    options: DpopOptions,
    steps: Vec<Arc<dyn ProofValidationStep>>,
    sealer: Arc<dyn NonceSealer>,
    clock: Arc<dyn Clock>,
}

impl DpopProofValidator {
    /// Validator with the default steps
    pub fn new(options: DpopOptions, replay_cache: Arc<dyn ReplayCache>, sealer: Arc<dyn NonceSealer>) -> Self {
        Self::builder(replay_cache, sealer).options(options).build()
    }

    pub fn builder(
        replay_cache: Arc<dyn ReplayCache>,
        sealer: Arc<dyn NonceSealer>,
    ) -> DpopProofValidatorBuilder {
        DpopProofValidatorBuilder::new(replay_cache, sealer)
    }

    pub fn options(&self) -> &DpopOptions {
        &self.options
    }

    /// Seal a fresh server nonce for a `DPoP-Nonce` header
    ///
    /// # Errors
    /// Returns `DpopError::Crypto` if sealing fails.
    pub fn create_server_nonce(&self) -> Result<String> {
        self.sealer.seal(self.clock.now())
    }

    /// Validate a proof
    ///
    /// Rule violations are reported in the returned result. `Err` is
    /// reserved for infrastructure failures (replay cache, sealing).
    ///
    /// # Errors
    /// Returns `DpopError::Storage` or `DpopError::Crypto`.
    pub async fn validate(
        &self,
        context: &DpopProofValidationContext,
        cancel: &CancellationToken,
    ) -> Result<DpopProofValidationResult> {
        let mut result = DpopProofValidationResult::default();
        if context.proof_token.trim().is_empty() {
            result.fail(DpopError::MissingProof);
            return Ok(result);
        }

        let mut state = ProofValidationState {
            context: context.clone(),
            options: self.options.clone(),
            mode: context.validation_mode.unwrap_or(self.options.validation_mode),
            now: self.clock.now(),
            algorithm: None,
            verification_key: None,
            result,
        };

        for step in &self.steps {
            match step.run(&mut state, cancel).await {
                Ok(()) => {}
                Err(e) if e.is_infrastructure() => {
                    error!(
                        phase = ?step.phase(),
                        error = %e,
                        category = e.category(),
                        "DPoP validation aborted by infrastructure failure"
                    );
                    return Err(e);
                }
                Err(e) => {
                    warn!(
                        phase = ?step.phase(),
                        reason = %e,
                        category = e.category(),
                        client_id = context.client_id.as_deref().unwrap_or("-"),
                        "DPoP proof rejected"
                    );
                    state.result.fail(e);
                    return Ok(state.result);
                }
            }
        }

        debug!(jkt = state.result.jkt.as_deref().unwrap_or("-"), "DPoP proof accepted");
        Ok(state.result)
    }
}

/// Builder for [`DpopProofValidator`]
#[derive(Debug)]
pub struct DpopProofValidatorBuilder {
    options: DpopOptions,
    replay_cache: Arc<dyn ReplayCache>,
    sealer: Arc<dyn NonceSealer>,
    clock: Arc<dyn Clock>,
    overrides: Vec<Arc<dyn ProofValidationStep>>,
}

impl DpopProofValidatorBuilder {
    pub fn new(replay_cache: Arc<dyn ReplayCache>, sealer: Arc<dyn NonceSealer>) -> Self {
        Self {
            options: DpopOptions::default(),
            replay_cache,
            sealer,
            clock: Arc::new(SystemClock),
            overrides: Vec::new(),
        }
    }

    pub fn options(mut self, options: DpopOptions) -> Self {
        self.options = options;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the default step for the step's phase
    pub fn step(mut self, step: Arc<dyn ProofValidationStep>) -> Self {
        self.overrides.retain(|existing| existing.phase() != step.phase());
        self.overrides.push(step);
        self
    }

    pub fn build(self) -> DpopProofValidator {
        let steps = ValidationPhase::ALL
            .into_iter()
            .map(|phase| {
                if let Some(step) = self.overrides.iter().find(|s| s.phase() == phase) {
                    return Arc::clone(step);
                }
                let step: Arc<dyn ProofValidationStep> = match phase {
                    ValidationPhase::Header => Arc::new(HeaderStep),
                    ValidationPhase::Signature => Arc::new(SignatureStep),
                    ValidationPhase::Payload => Arc::new(PayloadStep),
                    ValidationPhase::Freshness => Arc::new(FreshnessStep::new(Arc::clone(&self.sealer))),
                    ValidationPhase::Replay => Arc::new(ReplayStep::new(Arc::clone(&self.replay_cache))),
                };
                step
            })
            .collect();

        DpopProofValidator {
            options: self.options,
            steps,
            sealer: self.sealer,
            clock: self.clock,
        }
    }
}
