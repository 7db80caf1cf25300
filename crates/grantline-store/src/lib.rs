//! # Grantline Store - Persisted Grants, Replay Cache and Sessions
//!
//! Storage layer for the Grantline token core. Everything that must outlive a
//! single request lives behind the traits in this crate:
//!
//! - [`PersistedGrantStore`] - generic keyed, filterable, expiring grant storage
//! - [`stores`] - typed grant stores (authorization codes, refresh tokens,
//!   reference tokens, device codes, backchannel authentication requests,
//!   user consent) layered over the generic store
//! - [`ReplayCache`] - purpose-partitioned "seen handle" cache
//! - [`ServerSideSessionStore`] - server-side session records
//! - [`Clock`] - injectable UTC time source
//!
//! ## Single-use semantics
//!
//! Authorization codes, device codes and one-time refresh tokens rely on the
//! backend offering an atomic check-and-consume ([`PersistedGrantStore::take`])
//! and the replay cache offering insert-if-absent
//! ([`ReplayCache::add_if_absent`]). The default trait implementations are
//! read-then-write and admit a double-redemption race; backends plugged in for
//! production must override them. The in-memory backends shipped here are
//! atomic per key.
//!
//! ## Cancellation
//!
//! Every storage operation receives a [`CancellationToken`]. Backends must stop
//! work and return [`StoreError::Cancelled`] once the token is cancelled.

pub mod clock;
pub mod error;
pub mod grant;
pub mod handle;
pub mod memory;
pub mod models;
pub mod persisted;
pub mod replay;
pub mod serializer;
pub mod session;
pub mod stores;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Result, StoreError, ensure_active};
pub use grant::{GrantType, PersistedGrant, PersistedGrantFilter};
pub use handle::{HandleGenerator, derive_key};
pub use memory::InMemoryPersistedGrantStore;
pub use models::*;
pub use persisted::PersistedGrantStore;
pub use replay::{InMemoryReplayCache, ReplayCache, replay_key};
pub use serializer::PersistentGrantSerializer;
pub use session::{
    InMemoryServerSideSessionStore, ServerSideSession, ServerSideSessionStore, SessionFilter,
};
pub use stores::{
    AuthorizationCodeStore, BackchannelAuthenticationRequestStore, DefaultGrantStore,
    DeviceCodeStore, GrantPayload, ReferenceTokenStore, RefreshTokenStore, UserConsentStore,
};

pub use tokio_util::sync::CancellationToken;

/// Default number of random bytes in a generated grant handle
pub const DEFAULT_HANDLE_ENTROPY_BYTES: usize = 32;
