//! Typed grant stores
//!
//! Each typed store wraps [`DefaultGrantStore`], which owns handle generation,
//! key derivation and payload serialization over a [`PersistedGrantStore`].

mod authorization_code;
mod backchannel;
mod consent;
mod device_code;
mod reference_token;
mod refresh_token;

pub use authorization_code::AuthorizationCodeStore;
pub use backchannel::BackchannelAuthenticationRequestStore;
pub use consent::UserConsentStore;
pub use device_code::DeviceCodeStore;
pub use reference_token::ReferenceTokenStore;
pub use refresh_token::RefreshTokenStore;

use std::marker::PhantomData;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Serialize, de::DeserializeOwned};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::Result;
use crate::grant::{GrantType, PersistedGrant, PersistedGrantFilter};
use crate::handle::{HandleGenerator, derive_key};
use crate::models::{
    AuthorizationCode, BackchannelAuthenticationRequest, Consent, DeviceCode, RefreshToken, Token,
};
use crate::persisted::PersistedGrantStore;
use crate::serializer::PersistentGrantSerializer;

/// A payload that can be persisted as a grant
pub trait GrantPayload: Serialize + DeserializeOwned + Send + Sync {
    /// Discriminator written to the grant record
    const GRANT_TYPE: GrantType;

    fn client_id(&self) -> &str;
    fn subject_id(&self) -> Option<&str>;
    fn session_id(&self) -> Option<&str>;
    fn description(&self) -> Option<&str>;
    fn creation_time(&self) -> DateTime<Utc>;
    fn expiration(&self) -> Option<DateTime<Utc>>;

    fn consumed_time(&self) -> Option<DateTime<Utc>> {
        None
    }

    /// Copy the record's consumed time onto the payload
    fn apply_consumed_time(&mut self, _consumed_time: Option<DateTime<Utc>>) {}
}

/// Shared machinery for typed grant stores
#[derive(Debug)]
pub struct DefaultGrantStore<T> {
    store: Arc<dyn PersistedGrantStore>,
    handles: HandleGenerator,
    serializer: PersistentGrantSerializer,
    clock: Arc<dyn Clock>,
    _payload: PhantomData<fn() -> T>,
}

impl<T> Clone for DefaultGrantStore<T> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            handles: self.handles.clone(),
            serializer: self.serializer,
            clock: Arc::clone(&self.clock),
            _payload: PhantomData,
        }
    }
}

impl<T: GrantPayload> DefaultGrantStore<T> {
    /// Typed view over `store`
    pub fn new(store: Arc<dyn PersistedGrantStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            handles: HandleGenerator::default(),
            serializer: PersistentGrantSerializer,
            clock,
            _payload: PhantomData,
        }
    }

    /// Replace the handle generator
    pub fn with_handle_generator(mut self, handles: HandleGenerator) -> Self {
        self.handles = handles;
        self
    }

    /// Storage key for a handle of this store's type
    pub fn key_for(&self, handle: &str) -> String {
        derive_key(handle, T::GRANT_TYPE)
    }

    /// Underlying generic store
    pub fn persisted_store(&self) -> &Arc<dyn PersistedGrantStore> {
        &self.store
    }

    fn to_grant(&self, key: String, item: &T) -> Result<PersistedGrant> {
        Ok(PersistedGrant {
            key,
            grant_type: T::GRANT_TYPE,
            subject_id: item.subject_id().map(str::to_string),
            session_id: item.session_id().map(str::to_string),
            client_id: item.client_id().to_string(),
            description: item.description().map(str::to_string),
            creation_time: item.creation_time(),
            expiration: item.expiration(),
            consumed_time: item.consumed_time(),
            data: self.serializer.serialize(item)?,
        })
    }

    fn from_grant(&self, grant: &PersistedGrant) -> Result<T> {
        let mut item: T = self.serializer.deserialize(&grant.data)?;
        item.apply_consumed_time(grant.consumed_time);
        Ok(item)
    }

    /// Store `item` under a fresh handle and return the handle
    ///
    /// # Errors
    /// Propagates RNG, serialization and backend failures.
    pub async fn create_item(&self, item: &T, cancel: &CancellationToken) -> Result<String> {
        let handle = self.handles.generate()?;
        self.store_item(&handle, item, cancel).await?;
        Ok(handle)
    }

    /// Store `item` under an existing handle, replacing any previous value
    ///
    /// # Errors
    /// Propagates serialization and backend failures.
    pub async fn store_item(&self, handle: &str, item: &T, cancel: &CancellationToken) -> Result<()> {
        self.store_item_by_key(self.key_for(handle), item, cancel).await
    }

    /// Store `item` under a storage key
    ///
    /// # Errors
    /// Propagates serialization and backend failures.
    pub async fn store_item_by_key(
        &self,
        key: String,
        item: &T,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let grant = self.to_grant(key, item)?;
        self.store.store(grant, cancel).await
    }

    /// Load the item for `handle`
    ///
    /// Missing, type-mismatched and expired grants yield `None`; expired ones
    /// are removed. Consumed grants are returned with their consumed time set
    /// so callers can detect reuse.
    ///
    /// # Errors
    /// Propagates serialization and backend failures.
    pub async fn get_item(&self, handle: &str, cancel: &CancellationToken) -> Result<Option<T>> {
        self.get_item_by_key(&self.key_for(handle), cancel).await
    }

    /// Load the item stored under a storage key; see [`Self::get_item`]
    ///
    /// # Errors
    /// Propagates serialization and backend failures.
    pub async fn get_item_by_key(&self, key: &str, cancel: &CancellationToken) -> Result<Option<T>> {
        let Some(grant) = self.store.get(key, cancel).await? else {
            return Ok(None);
        };
        self.accept(grant, cancel).await
    }

    /// Load the item for `handle` without the expiration check
    ///
    /// For flows that must tell an expired grant apart from an unknown one.
    ///
    /// # Errors
    /// Propagates serialization and backend failures.
    pub async fn peek_item(&self, handle: &str, cancel: &CancellationToken) -> Result<Option<T>> {
        match self.store.get(&self.key_for(handle), cancel).await? {
            Some(grant) if grant.grant_type == T::GRANT_TYPE => self.from_grant(&grant).map(Some),
            _ => Ok(None),
        }
    }

    /// Load and remove the item for `handle` in one step
    ///
    /// # Errors
    /// Propagates serialization and backend failures.
    pub async fn take_item(&self, handle: &str, cancel: &CancellationToken) -> Result<Option<T>> {
        let Some(grant) = self.store.take(&self.key_for(handle), cancel).await? else {
            return Ok(None);
        };
        if grant.grant_type != T::GRANT_TYPE {
            // Not ours; put it back untouched.
            warn!(grant_type = %grant.grant_type, expected = %T::GRANT_TYPE, "Grant type mismatch on take");
            self.store.store(grant, cancel).await?;
            return Ok(None);
        }
        if grant.is_expired(self.clock.now()) {
            debug!(grant_type = %T::GRANT_TYPE, "Taken grant was expired");
            return Ok(None);
        }
        self.from_grant(&grant).map(Some)
    }

    /// Mark the item for `handle` consumed now
    ///
    /// Returns `true` for the single caller that consumed it.
    ///
    /// # Errors
    /// Propagates backend failures.
    pub async fn consume_item(&self, handle: &str, cancel: &CancellationToken) -> Result<bool> {
        self.store
            .consume(&self.key_for(handle), self.clock.now(), cancel)
            .await
    }

    async fn accept(&self, grant: PersistedGrant, cancel: &CancellationToken) -> Result<Option<T>> {
        if grant.grant_type != T::GRANT_TYPE {
            warn!(grant_type = %grant.grant_type, expected = %T::GRANT_TYPE, "Grant type mismatch");
            return Ok(None);
        }
        if grant.is_expired(self.clock.now()) {
            debug!(grant_type = %T::GRANT_TYPE, "Removing expired grant on read");
            self.store.remove(&grant.key, cancel).await?;
            return Ok(None);
        }
        self.from_grant(&grant).map(Some)
    }

    /// Remove the item for `handle`
    ///
    /// # Errors
    /// Propagates backend failures.
    pub async fn remove_item(&self, handle: &str, cancel: &CancellationToken) -> Result<()> {
        self.store.remove(&self.key_for(handle), cancel).await
    }

    /// Remove every item of this type for a subject and client, optionally
    /// narrowed to a session
    ///
    /// # Errors
    /// Propagates backend failures.
    pub async fn remove_all_items(
        &self,
        subject_id: &str,
        client_id: &str,
        session_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let mut filter = PersistedGrantFilter::new()
            .subject(subject_id)
            .client(client_id)
            .of_type(T::GRANT_TYPE);
        if let Some(session_id) = session_id {
            filter = filter.session(session_id);
        }
        self.store.remove_all(&filter, cancel).await
    }

    /// Raw grants of this type matching `filter`
    ///
    /// # Errors
    /// Propagates filter validation and backend failures.
    pub async fn find(
        &self,
        filter: PersistedGrantFilter,
        cancel: &CancellationToken,
    ) -> Result<Vec<(PersistedGrant, T)>> {
        let grants = self
            .store
            .get_all(&filter.of_type(T::GRANT_TYPE), cancel)
            .await?;
        let now = self.clock.now();
        grants
            .into_iter()
            .filter(|grant| !grant.is_expired(now))
            .map(|grant| {
                let item = self.from_grant(&grant)?;
                Ok((grant, item))
            })
            .collect()
    }
}

impl GrantPayload for AuthorizationCode {
    const GRANT_TYPE: GrantType = GrantType::AuthorizationCode;

    fn client_id(&self) -> &str {
        &self.client_id
    }
    fn subject_id(&self) -> Option<&str> {
        self.subject.subject_id()
    }
    fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }
    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }
    fn creation_time(&self) -> DateTime<Utc> {
        self.creation_time
    }
    fn expiration(&self) -> Option<DateTime<Utc>> {
        AuthorizationCode::expiration(self)
    }
}

impl GrantPayload for RefreshToken {
    const GRANT_TYPE: GrantType = GrantType::RefreshToken;

    fn client_id(&self) -> &str {
        &self.client_id
    }
    fn subject_id(&self) -> Option<&str> {
        self.subject.subject_id()
    }
    fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }
    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }
    fn creation_time(&self) -> DateTime<Utc> {
        self.creation_time
    }
    fn expiration(&self) -> Option<DateTime<Utc>> {
        RefreshToken::expiration(self)
    }
    fn consumed_time(&self) -> Option<DateTime<Utc>> {
        self.consumed_time
    }
    fn apply_consumed_time(&mut self, consumed_time: Option<DateTime<Utc>>) {
        if self.consumed_time.is_none() {
            self.consumed_time = consumed_time;
        }
    }
}

impl GrantPayload for Token {
    const GRANT_TYPE: GrantType = GrantType::ReferenceToken;

    fn client_id(&self) -> &str {
        &self.client_id
    }
    fn subject_id(&self) -> Option<&str> {
        Token::subject_id(self)
    }
    fn session_id(&self) -> Option<&str> {
        Token::session_id(self)
    }
    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }
    fn creation_time(&self) -> DateTime<Utc> {
        self.creation_time
    }
    fn expiration(&self) -> Option<DateTime<Utc>> {
        Token::expiration(self)
    }
}

impl GrantPayload for DeviceCode {
    const GRANT_TYPE: GrantType = GrantType::DeviceCode;

    fn client_id(&self) -> &str {
        &self.client_id
    }
    fn subject_id(&self) -> Option<&str> {
        self.subject.as_ref().and_then(|s| s.subject_id())
    }
    fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }
    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }
    fn creation_time(&self) -> DateTime<Utc> {
        self.creation_time
    }
    fn expiration(&self) -> Option<DateTime<Utc>> {
        DeviceCode::expiration(self)
    }
}

impl GrantPayload for BackchannelAuthenticationRequest {
    const GRANT_TYPE: GrantType = GrantType::BackchannelAuthenticationRequest;

    fn client_id(&self) -> &str {
        &self.client_id
    }
    fn subject_id(&self) -> Option<&str> {
        self.subject.subject_id()
    }
    fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }
    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }
    fn creation_time(&self) -> DateTime<Utc> {
        self.creation_time
    }
    fn expiration(&self) -> Option<DateTime<Utc>> {
        BackchannelAuthenticationRequest::expiration(self)
    }
}

impl GrantPayload for Consent {
    const GRANT_TYPE: GrantType = GrantType::UserConsent;

    fn client_id(&self) -> &str {
        &self.client_id
    }
    fn subject_id(&self) -> Option<&str> {
        Some(&self.subject_id)
    }
    fn session_id(&self) -> Option<&str> {
        None
    }
    fn description(&self) -> Option<&str> {
        None
    }
    fn creation_time(&self) -> DateTime<Utc> {
        self.creation_time
    }
    fn expiration(&self) -> Option<DateTime<Utc>> {
        self.expiration
    }
}
