use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use grantline_store::{BackchannelAuthenticationRequestStore, Clock, ReplayCache};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    BACKCHANNEL_POLL_PURPOSE, GrantValidator, TokenRequest, ValidatedTokenRequest, ValidationError, ensure_active,
};
use crate::client::grant_types;
use crate::config::DeviceFlowOptions;
use crate::errors::GrantFailure;
use crate::services::{ProfileCaller, ProfileService};

/// OpenID CIBA poll-mode grant, keyed by `auth_req_id`
#[derive(Debug, Clone)]
pub struct BackchannelAuthenticationValidator {
    requests: BackchannelAuthenticationRequestStore,
    throttle: Arc<dyn ReplayCache>,
    profile: Arc<dyn ProfileService>,
    options: DeviceFlowOptions,
    clock: Arc<dyn Clock>,
}

impl BackchannelAuthenticationValidator {
    pub fn new(
        requests: BackchannelAuthenticationRequestStore,
        throttle: Arc<dyn ReplayCache>,
        profile: Arc<dyn ProfileService>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            requests,
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
impl GrantValidator for BackchannelAuthenticationValidator {
    fn grant_type(&self) -> &str {
        grant_types::CIBA
    }

    async fn validate(
        &self,
        request: &TokenRequest,
        validated: &mut ValidatedTokenRequest,
        cancel: &CancellationToken,
    ) -> Result<(), ValidationError> {
        let client = &request.client;
        let auth_req_id = request
            .auth_req_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| GrantFailure::malformed("auth_req_id is missing"))?;

        let Some(login) = self.requests.find_by_auth_request_id(auth_req_id, cancel).await? else {
            warn!(client_id = %client.client_id, "Backchannel authentication request not found");
            return Err(GrantFailure::GrantNotFound.into());
        };

        if login.client_id != client.client_id {
            warn!(
                client_id = %client.client_id,
                request_client_id = %login.client_id,
                "Backchannel request issued to another client"
            );
            return Err(GrantFailure::ClientMismatch.into());
        }

        let now = self.clock.now();
        if login.expiration().is_some_and(|expiration| expiration <= now) {
            info!(client_id = %client.client_id, "Backchannel authentication request expired");
            self.requests.remove_by_auth_request_id(auth_req_id, cancel).await?;
            return Err(GrantFailure::ExpiredToken.into());
        }

        let interval = client.polling_interval.unwrap_or(self.options.interval_secs);
        if interval > 0 {
            let until = now + Duration::seconds(i64::try_from(interval).unwrap_or(i64::MAX / 1_000));
            if !self
                .throttle
                .add_if_absent(BACKCHANNEL_POLL_PURPOSE, auth_req_id, until, cancel)
                .await?
            {
                debug!(client_id = %client.client_id, interval, "Backchannel request polled too fast");
                return Err(GrantFailure::SlowDown.into());
            }
        }

        if !login.is_complete {
            return Err(GrantFailure::AuthorizationPending.into());
        }
        if !login.is_approved() {
            info!(client_id = %client.client_id, "User denied backchannel authentication");
            return Err(GrantFailure::AccessDenied.into());
        }

        ensure_active(
            self.profile.as_ref(),
            &login.subject,
            client,
            ProfileCaller::BackchannelAuthenticationRequestIdValidation,
            cancel,
        )
        .await?;

        let Some(login) = self.requests.take_by_auth_request_id(auth_req_id, cancel).await? else {
            warn!(client_id = %client.client_id, "Backchannel request redeemed concurrently");
            return Err(GrantFailure::GrantNotFound.into());
        };

        validated.subject = Some(login.subject.clone());
        validated.session_id = login.session_id.clone();
        validated.scopes = login.authorized_scopes.clone().unwrap_or_default();
        validated.backchannel_request = Some(login);
        Ok(())
    }
}
