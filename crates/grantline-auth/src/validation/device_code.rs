use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use grantline_store::{Clock, DeviceCodeStore, ReplayCache};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{DEVICE_POLL_PURPOSE, GrantValidator, TokenRequest, ValidatedTokenRequest, ValidationError, ensure_active};
use crate::client::grant_types;
use crate::config::DeviceFlowOptions;
use crate::errors::GrantFailure;
use crate::services::{ProfileCaller, ProfileService};

/// RFC 8628 device authorization grant
///
/// Polls are throttled per device code through the replay cache: a poll
/// within the interval of the previous one gets `slow_down`.
#[derive(Debug, Clone)]
pub struct DeviceCodeValidator {
    codes: DeviceCodeStore,
    throttle: Arc<dyn ReplayCache>,
    profile: Arc<dyn ProfileService>,
    options: DeviceFlowOptions,
    clock: Arc<dyn Clock>,
}

impl DeviceCodeValidator {
    pub fn new(
        codes: DeviceCodeStore,
        throttle: Arc<dyn ReplayCache>,
        profile: Arc<dyn ProfileService>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            codes,
            throttle,
            profile,
            options: DeviceFlowOptions::default(),
            clock,
        }
    }

    pub fn with_options(mut self, options: DeviceFlowOptions) -> Self {
        self.options = options;
        self
    }
}

#[async_trait]
impl GrantValidator for DeviceCodeValidator {
    fn grant_type(&self) -> &str {
        grant_types::DEVICE_FLOW
    }

    async fn validate(
        &self,
        request: &TokenRequest,
        validated: &mut ValidatedTokenRequest,
        cancel: &CancellationToken,
    ) -> Result<(), ValidationError> {
        let client = &request.client;
        let handle = request
            .device_code
            .as_deref()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| GrantFailure::malformed("device_code is missing"))?;

        let Some(code) = self.codes.find_device_code(handle, cancel).await? else {
            warn!(client_id = %client.client_id, "Device code not found");
            return Err(GrantFailure::GrantNotFound.into());
        };

        if code.client_id != client.client_id {
            warn!(
                client_id = %client.client_id,
                code_client_id = %code.client_id,
                "Device code issued to another client"
            );
            return Err(GrantFailure::ClientMismatch.into());
        }

        let now = self.clock.now();
        if code.expiration().is_some_and(|expiration| expiration <= now) {
            info!(client_id = %client.client_id, "Device code expired");
            self.codes.remove_device_code(handle, cancel).await?;
            return Err(GrantFailure::ExpiredToken.into());
        }

        let interval = client.polling_interval.unwrap_or(self.options.interval_secs);
        if interval > 0 {
            let until = now + Duration::seconds(i64::try_from(interval).unwrap_or(i64::MAX / 1_000));
            if !self
                .throttle
                .add_if_absent(DEVICE_POLL_PURPOSE, handle, until, cancel)
                .await?
            {
                debug!(client_id = %client.client_id, interval, "Device code polled too fast");
                return Err(GrantFailure::SlowDown.into());
            }
        }

        if !code.is_authorized {
            return Err(GrantFailure::AuthorizationPending.into());
        }

        let Some(subject) = code.subject.as_ref() else {
            info!(client_id = %client.client_id, "User denied device authorization");
            return Err(GrantFailure::AccessDenied.into());
        };

        ensure_active(
            self.profile.as_ref(),
            subject,
            client,
            ProfileCaller::DeviceCodeValidation,
            cancel,
        )
        .await?;

        let Some(code) = self.codes.take_device_code(handle, cancel).await? else {
            warn!(client_id = %client.client_id, "Device code redeemed concurrently");
            return Err(GrantFailure::GrantNotFound.into());
        };

        debug!(client_id = %client.client_id, "Device code redeemed");
        validated.subject = code.subject.clone();
        validated.session_id = code.session_id.clone();
        validated.scopes = code.authorized_scopes.clone();
        validated.device_code = Some(code);
        Ok(())
    }
}
