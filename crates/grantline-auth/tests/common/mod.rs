//! Shared fixtures for token core integration tests
//!
//! [`TokenCore`] wires every service against in-memory stores and a manual
//! clock so tests can drive full grant lifecycles deterministically.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use grantline_auth::services::{BackChannelLogoutRequest, NoopBackChannelLogoutNotifier};
use grantline_auth::validation::{
    AuthorizationCodeValidator, BackchannelAuthenticationValidator, ClientCredentialsValidator,
    DeviceCodeValidator, PasswordGrantValidator, RefreshTokenGrantValidator, pkce,
};
use grantline_auth::{
    AuditLogger, BackChannelLogoutNotifier, Client, GrantRequestValidator, GrantValidationResult,
    InMemoryClientStore, MemoryEventSink, ProfileCaller, ProfileService, RefreshTokenCreationRequest,
    RefreshTokenService, ResourceOwnerPasswordValidator, ServerOptions, SessionCoordinationService,
    TokenRequest, grant_types,
};
use grantline_dpop::{AesGcmNonceSealer, DpopOptions, DpopProofValidator};
use grantline_store::{
    AuthorizationCode, AuthorizationCodeStore, BackchannelAuthenticationRequestStore, CancellationToken,
    Clock, DeviceCodeStore, InMemoryPersistedGrantStore, InMemoryReplayCache, InMemoryServerSideSessionStore,
    ManualClock, Principal, ProofType, ReferenceTokenStore, RefreshTokenStore, ServerSideSession,
    ServerSideSessionStore, Token, UserConsentStore,
};
use parking_lot::Mutex;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Route service logs to the test writer; `RUST_LOG=audit::grants=info` shows audit records
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_test_writer())
        .try_init();
}

pub const ISSUER: &str = "https://identity.example.com";
pub const TOKEN_URL: &str = "https://identity.example.com/connect/token";
pub const REDIRECT_URI: &str = "https://app.example.com/callback";
pub const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";

/// Profile service with a switchable set of disabled subjects
#[derive(Debug, Default)]
pub struct ToggleProfileService {
    inactive: Mutex<HashSet<String>>,
}

impl ToggleProfileService {
    pub fn deactivate(&self, subject_id: &str) {
        self.inactive.lock().insert(subject_id.to_string());
    }
}

#[async_trait]
impl ProfileService for ToggleProfileService {
    async fn is_active(
        &self,
        subject: &Principal,
        _client: &Client,
        _caller: ProfileCaller,
        _cancel: &CancellationToken,
    ) -> grantline_auth::Result<bool> {
        let subject_id = subject.subject_id().unwrap_or_default();
        Ok(!self.inactive.lock().contains(subject_id))
    }
}

/// Accepts `alice` / `wonderland`
#[derive(Debug, Default)]
pub struct StaticPasswordValidator;

#[async_trait]
impl ResourceOwnerPasswordValidator for StaticPasswordValidator {
    async fn validate(
        &self,
        username: &str,
        password: &str,
        _client: &Client,
        _cancel: &CancellationToken,
    ) -> grantline_auth::Result<Option<Principal>> {
        Ok((username == "alice" && password == "wonderland").then(|| Principal::new("alice", Some("sid-pw"))))
    }
}

/// Notifier that keeps every request
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    requests: Mutex<Vec<BackChannelLogoutRequest>>,
}

impl RecordingNotifier {
    pub fn requests(&self) -> Vec<BackChannelLogoutRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl BackChannelLogoutNotifier for RecordingNotifier {
    async fn send_logout_notifications(
        &self,
        request: &BackChannelLogoutRequest,
        cancel: &CancellationToken,
    ) -> grantline_auth::Result<()> {
        NoopBackChannelLogoutNotifier
            .send_logout_notifications(request, cancel)
            .await?;
        self.requests.lock().push(request.clone());
        Ok(())
    }
}

/// Every token core service over shared in-memory state
pub struct TokenCore {
    pub clock: ManualClock,
    pub grants: Arc<InMemoryPersistedGrantStore>,
    pub replay: Arc<InMemoryReplayCache>,
    pub sessions: Arc<InMemoryServerSideSessionStore>,
    pub clients: Arc<InMemoryClientStore>,
    pub codes: AuthorizationCodeStore,
    pub refresh_tokens: RefreshTokenStore,
    pub reference_tokens: ReferenceTokenStore,
    pub device_codes: DeviceCodeStore,
    pub backchannel: BackchannelAuthenticationRequestStore,
    pub consents: UserConsentStore,
    pub profile: Arc<ToggleProfileService>,
    pub events: Arc<MemoryEventSink>,
    pub audit: AuditLogger,
    pub notifier: Arc<RecordingNotifier>,
    pub coordination: Arc<SessionCoordinationService>,
    pub refresh: Arc<RefreshTokenService>,
    pub dpop: Arc<DpopProofValidator>,
    pub validator: GrantRequestValidator,
    pub options: ServerOptions,
    pub cancel: CancellationToken,
}

impl TokenCore {
    pub fn new() -> Self {
        Self::with_options(ServerOptions::default())
    }

    /// Server-side sessions on, every client coordinated
    pub fn with_sessions() -> Self {
        let mut options = ServerOptions::default();
        options.server_side_sessions.enabled = true;
        options.server_side_sessions.coordinate_client_lifetimes_with_user_session = true;
        Self::with_options(options)
    }

    pub fn with_options(options: ServerOptions) -> Self {
        init_tracing();
        let clock = ManualClock::at_current_second();
        let clock_arc: Arc<dyn Clock> = Arc::new(clock.clone());
        let grants = Arc::new(InMemoryPersistedGrantStore::new());
        let replay = Arc::new(InMemoryReplayCache::with_clock(clock_arc.clone()));
        let sessions = Arc::new(InMemoryServerSideSessionStore::new());
        let clients = Arc::new(InMemoryClientStore::default());
        let profile = Arc::new(ToggleProfileService::default());
        let events = Arc::new(MemoryEventSink::default());
        let audit = AuditLogger::from_options(&options.audit).with_sink(events.clone());
        let notifier = Arc::new(RecordingNotifier::default());

        let codes = AuthorizationCodeStore::new(grants.clone(), clock_arc.clone());
        let refresh_tokens = RefreshTokenStore::new(grants.clone(), clock_arc.clone());
        let reference_tokens = ReferenceTokenStore::new(grants.clone(), clock_arc.clone());
        let device_codes = DeviceCodeStore::new(grants.clone(), clock_arc.clone());
        let backchannel = BackchannelAuthenticationRequestStore::new(grants.clone(), clock_arc.clone());
        let consents = UserConsentStore::new(grants.clone(), clock_arc.clone());

        let coordination = Arc::new(
            SessionCoordinationService::new(
                options.server_side_sessions.clone(),
                grants.clone(),
                sessions.clone(),
                clients.clone(),
                clock_arc.clone(),
            )
            .with_notifier(notifier.clone())
            .with_audit(audit.clone()),
        );

        let refresh = Arc::new(
            RefreshTokenService::new(refresh_tokens.clone(), profile.clone(), clock_arc.clone())
                .with_options(&options)
                .with_session_coordination(coordination.clone())
                .with_audit(audit.clone()),
        );

        let sealer = Arc::new(AesGcmNonceSealer::generate().expect("nonce sealer"));
        let dpop = Arc::new(
            DpopProofValidator::builder(replay.clone(), sealer)
                .options(options.dpop.clone())
                .clock(clock_arc.clone())
                .build(),
        );

        let validator = GrantRequestValidator::builder()
            .dpop(dpop.clone())
            .audit(audit.clone())
            .grant(Arc::new(AuthorizationCodeValidator::new(codes.clone(), profile.clone())))
            .grant(Arc::new(RefreshTokenGrantValidator::new(refresh.clone())))
            .grant(Arc::new(ClientCredentialsValidator))
            .grant(Arc::new(PasswordGrantValidator::new(
                Arc::new(StaticPasswordValidator),
                profile.clone(),
            )))
            .grant(Arc::new(
                DeviceCodeValidator::new(device_codes.clone(), replay.clone(), profile.clone(), clock_arc.clone())
                    .with_options(options.device_flow.clone()),
            ))
            .grant(Arc::new(
                BackchannelAuthenticationValidator::new(
                    backchannel.clone(),
                    replay.clone(),
                    profile.clone(),
                    clock_arc,
                )
                .with_options(options.device_flow.clone()),
            ))
            .build();

        Self {
            clock,
            grants,
            replay,
            sessions,
            clients,
            codes,
            refresh_tokens,
            reference_tokens,
            device_codes,
            backchannel,
            consents,
            profile,
            events,
            audit,
            notifier,
            coordination,
            refresh,
            dpop,
            validator,
            options,
            cancel: CancellationToken::new(),
        }
    }

    /// Nonce-mode DPoP for every client
    pub fn with_dpop_nonces() -> Self {
        let mut options = ServerOptions::default();
        options.dpop = DpopOptions {
            validation_mode: grantline_dpop::DpopValidationMode::Nonce,
            ..DpopOptions::default()
        };
        Self::with_options(options)
    }

    /// Confidential web client allowed every built-in grant, registered in the client store
    pub fn web_client(&self) -> Client {
        let mut client = Client::new("web")
            .with_grant_types([
                grant_types::AUTHORIZATION_CODE,
                grant_types::REFRESH_TOKEN,
                grant_types::CLIENT_CREDENTIALS,
                grant_types::PASSWORD,
                grant_types::DEVICE_FLOW,
                grant_types::CIBA,
            ])
            .with_scopes(["openid", "profile", "api"]);
        client.allow_offline_access = true;
        client.polling_interval = Some(5);
        self.clients.insert(client.clone());
        client
    }

    /// Store an authorization code with an S256 challenge for [`VERIFIER`]
    pub async fn issue_code(&self, client: &Client, subject: Principal) -> String {
        let mut code = AuthorizationCode::new(
            client.client_id.clone(),
            subject,
            REDIRECT_URI,
            self.clock.now(),
            client.authorization_code_lifetime,
        );
        code.requested_scopes = vec!["openid".to_string(), "api".to_string(), "offline_access".to_string()];
        code.code_challenge = Some(pkce::s256_challenge(VERIFIER));
        code.code_challenge_method = Some("S256".to_string());
        self.codes
            .store_authorization_code(&code, &self.cancel)
            .await
            .expect("store code")
    }

    /// Access token description for `subject`
    pub fn access_token(&self, client: &Client, subject: &Principal) -> Token {
        let mut token = Token::access_token(ISSUER, client.client_id.clone(), self.clock.now(), client.access_token_lifetime)
            .with_claim("sub", subject.subject_id().unwrap_or_default())
            .with_claim("scope", "api");
        if let Some(sid) = subject.session_id() {
            token = token.with_claim("sid", sid);
        }
        token
    }

    /// Issue a refresh token authorized for `openid api offline_access`
    pub async fn issue_refresh_token(&self, client: &Client, subject: Principal) -> String {
        self.issue_refresh_token_with(client, subject, ProofType::None, None).await
    }

    pub async fn issue_refresh_token_with(
        &self,
        client: &Client,
        subject: Principal,
        proof_type: ProofType,
        confirmation: Option<String>,
    ) -> String {
        let mut access_token = self.access_token(client, &subject);
        access_token.confirmation = confirmation;
        self.refresh
            .create_refresh_token(
                &RefreshTokenCreationRequest {
                    subject,
                    client: client.clone(),
                    access_token,
                    requested_resource: None,
                    authorized_scopes: vec![
                        "openid".to_string(),
                        "api".to_string(),
                        "offline_access".to_string(),
                    ],
                    authorized_resource_indicators: None,
                    proof_type,
                    description: None,
                },
                &self.cancel,
            )
            .await
            .expect("create refresh token")
    }

    /// Store a reference token for `subject`
    pub async fn issue_reference_token(&self, client: &Client, subject: &Principal) -> String {
        let mut token = self.access_token(client, subject);
        token.access_token_type = grantline_store::AccessTokenType::Reference;
        self.reference_tokens
            .store_reference_token(&token, &self.cancel)
            .await
            .expect("store reference token")
    }

    /// Create a live server-side session with `clients` signed in
    pub async fn start_session(&self, subject_id: &str, session_id: &str, clients: &[&str]) -> ServerSideSession {
        let mut session = ServerSideSession::new(
            format!("key-{session_id}"),
            subject_id,
            session_id,
            self.clock.now(),
        )
        .with_expiration(self.clock.now() + Duration::hours(1));
        for client_id in clients {
            session = session.with_client(*client_id);
        }
        self.sessions
            .create_session(session.clone(), &self.cancel)
            .await
            .expect("create session");
        session
    }

    pub async fn validate(&self, request: TokenRequest) -> GrantValidationResult {
        self.validator
            .validate(&request, &self.cancel)
            .await
            .expect("validation should not hit infrastructure errors")
    }
}

pub fn alice() -> Principal {
    Principal::new("alice", Some("sid-1"))
}
