//! Security audit events for grant handling
//!
//! Every event is written through `tracing` on the `audit::grants` target and
//! forwarded to any registered [`SecurityEventSink`], so alerting pipelines
//! can consume the same records that land in the logs.
//!
//! ## Event Types
//!
//! - [`SecurityEvent::RefreshTokenReuseDetected`] - a consumed one-time refresh
//!   token was presented again (logged at `error`)
//! - [`SecurityEvent::GrantRevoked`] - grants removed by logout, expiration or
//!   reuse handling
//! - [`SecurityEvent::SessionRevoked`] - a user session ended and its clients
//!   were processed
//! - [`SecurityEvent::DpopProofRejected`] - a token request carried a bad proof
//! - [`SecurityEvent::TokenRevoked`] - explicit RFC 7009 revocation
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use grantline_auth::audit::{AuditLogger, MemoryEventSink, SecurityEvent};
//!
//! let sink = Arc::new(MemoryEventSink::default());
//! let logger = AuditLogger::new("token-service").with_sink(sink.clone());
//!
//! logger.log(SecurityEvent::TokenRevoked {
//!     token_type: "refresh_token".to_string(),
//!     client_id: "web".to_string(),
//!     subject_id: Some("alice".to_string()),
//! });
//!
//! assert_eq!(sink.records().len(), 1);
//! ```

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::{AuditOptions, RefreshTokenReusePolicy};

/// Why grants or a session were ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevocationReason {
    Logout,
    SessionExpired,
    RefreshTokenReuse,
    ClientRequest,
}

impl fmt::Display for RevocationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Logout => "logout",
            Self::SessionExpired => "session_expired",
            Self::RefreshTokenReuse => "refresh_token_reuse",
            Self::ClientRequest => "client_request",
        })
    }
}

/// Security-relevant grant events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SecurityEvent {
    /// A consumed one-time refresh token was presented again
    RefreshTokenReuseDetected {
        subject_id: Option<String>,
        client_id: String,
        session_id: Option<String>,
        /// Policy applied in response
        policy: RefreshTokenReusePolicy,
    },

    /// Grants removed in bulk
    GrantRevoked {
        /// Grant type discriminator(s) affected
        grant_types: Vec<String>,
        subject_id: String,
        client_id: String,
        session_id: Option<String>,
        /// Number of grants removed
        count: usize,
        reason: RevocationReason,
    },

    /// A user session ended
    SessionRevoked {
        subject_id: String,
        session_id: String,
        /// Clients whose grants were coordinated
        client_ids: Vec<String>,
        reason: RevocationReason,
    },

    /// A DPoP proof on a token request was rejected
    DpopProofRejected {
        client_id: String,
        /// Rejection category from the validator
        category: String,
        reason: String,
    },

    /// A token was revoked on request of its client
    TokenRevoked {
        token_type: String,
        client_id: String,
        subject_id: Option<String>,
    },
}

impl SecurityEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::RefreshTokenReuseDetected { .. } => "refresh_token_reuse_detected",
            Self::GrantRevoked { .. } => "grant_revoked",
            Self::SessionRevoked { .. } => "session_revoked",
            Self::DpopProofRejected { .. } => "dpop_proof_rejected",
            Self::TokenRevoked { .. } => "token_revoked",
        }
    }
}

/// Audit record wrapping an event with metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Unique audit record ID
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Service that generated the event
    pub service: String,
    pub event: SecurityEvent,
}

/// Receives audit records for out-of-band processing
pub trait SecurityEventSink: Send + Sync + fmt::Debug {
    fn record(&self, record: &AuditRecord);
}

/// Sink that keeps records in memory
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryEventSink {
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().clone()
    }

    /// Recorded events, oldest first
    pub fn events(&self) -> Vec<SecurityEvent> {
        self.records.lock().iter().map(|r| r.event.clone()).collect()
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

impl SecurityEventSink for MemoryEventSink {
    fn record(&self, record: &AuditRecord) {
        self.records.lock().push(record.clone());
    }
}

/// Audit logger for grant security events
#[derive(Debug, Clone)]
pub struct AuditLogger {
    service_name: String,
    hash_identifiers: bool,
    sinks: Vec<Arc<dyn SecurityEventSink>>,
}

impl AuditLogger {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            hash_identifiers: false,
            sinks: Vec::new(),
        }
    }

    pub fn from_options(options: &AuditOptions) -> Self {
        Self::new(options.service_name.clone()).with_identifier_hashing(options.hash_identifiers)
    }

    /// Hash subject, session and client identifiers
    pub fn with_identifier_hashing(mut self, hash: bool) -> Self {
        self.hash_identifiers = hash;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn SecurityEventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn log(&self, event: SecurityEvent) {
        let record = AuditRecord {
            id: Uuid::now_v7(),
            timestamp: Utc::now(),
            service: self.service_name.clone(),
            event: self.maybe_redact(event),
        };

        match &record.event {
            SecurityEvent::RefreshTokenReuseDetected {
                subject_id,
                client_id,
                session_id,
                policy,
            } => {
                error!(
                    target: "audit::grants",
                    audit_id = %record.id,
                    event_type = record.event.event_type(),
                    subject_id = ?subject_id,
                    client_id = %client_id,
                    session_id = ?session_id,
                    policy = ?policy,
                    service = %self.service_name,
                    "Refresh token reuse detected"
                );
            }
            SecurityEvent::GrantRevoked {
                grant_types,
                subject_id,
                client_id,
                session_id,
                count,
                reason,
            } => {
                info!(
                    target: "audit::grants",
                    audit_id = %record.id,
                    event_type = record.event.event_type(),
                    grant_types = ?grant_types,
                    subject_id = %subject_id,
                    client_id = %client_id,
                    session_id = ?session_id,
                    count,
                    reason = %reason,
                    service = %self.service_name,
                    "Grants revoked"
                );
            }
            SecurityEvent::SessionRevoked {
                subject_id,
                session_id,
                client_ids,
                reason,
            } => {
                info!(
                    target: "audit::grants",
                    audit_id = %record.id,
                    event_type = record.event.event_type(),
                    subject_id = %subject_id,
                    session_id = %session_id,
                    clients = client_ids.len(),
                    reason = %reason,
                    service = %self.service_name,
                    "Session revoked"
                );
            }
            SecurityEvent::DpopProofRejected {
                client_id,
                category,
                reason,
            } => {
                warn!(
                    target: "audit::grants",
                    audit_id = %record.id,
                    event_type = record.event.event_type(),
                    client_id = %client_id,
                    category = %category,
                    reason = %reason,
                    service = %self.service_name,
                    "DPoP proof rejected"
                );
            }
            SecurityEvent::TokenRevoked {
                token_type,
                client_id,
                subject_id,
            } => {
                info!(
                    target: "audit::grants",
                    audit_id = %record.id,
                    event_type = record.event.event_type(),
                    token_type = %token_type,
                    client_id = %client_id,
                    subject_id = ?subject_id,
                    service = %self.service_name,
                    "Token revoked"
                );
            }
        }

        for sink in &self.sinks {
            sink.record(&record);
        }
    }

    fn maybe_hash(&self, value: &str) -> String {
        if self.hash_identifiers {
            let hash = blake3::hash(value.as_bytes());
            format!("blake3:{}", &hash.to_hex()[..16])
        } else {
            value.to_string()
        }
    }

    fn maybe_hash_opt(&self, value: Option<String>) -> Option<String> {
        value.map(|v| self.maybe_hash(&v))
    }

    fn maybe_redact(&self, event: SecurityEvent) -> SecurityEvent {
        if !self.hash_identifiers {
            return event;
        }
        match event {
            SecurityEvent::RefreshTokenReuseDetected {
                subject_id,
                client_id,
                session_id,
                policy,
            } => SecurityEvent::RefreshTokenReuseDetected {
                subject_id: self.maybe_hash_opt(subject_id),
                client_id,
                session_id: self.maybe_hash_opt(session_id),
                policy,
            },
            SecurityEvent::GrantRevoked {
                grant_types,
                subject_id,
                client_id,
                session_id,
                count,
                reason,
            } => SecurityEvent::GrantRevoked {
                grant_types,
                subject_id: self.maybe_hash(&subject_id),
                client_id,
                session_id: self.maybe_hash_opt(session_id),
                count,
                reason,
            },
            SecurityEvent::SessionRevoked {
                subject_id,
                session_id,
                client_ids,
                reason,
            } => SecurityEvent::SessionRevoked {
                subject_id: self.maybe_hash(&subject_id),
                session_id: self.maybe_hash(&session_id),
                client_ids,
                reason,
            },
            SecurityEvent::TokenRevoked {
                token_type,
                client_id,
                subject_id,
            } => SecurityEvent::TokenRevoked {
                token_type,
                client_id,
                subject_id: self.maybe_hash_opt(subject_id),
            },
            other => other,
        }
    }
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::from_options(&AuditOptions::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reuse_event() -> SecurityEvent {
        SecurityEvent::RefreshTokenReuseDetected {
            subject_id: Some("alice".to_string()),
            client_id: "web".to_string(),
            session_id: Some("s1".to_string()),
            policy: RefreshTokenReusePolicy::RejectOnly,
        }
    }

    #[test]
    fn test_sinks_receive_records() {
        let sink = Arc::new(MemoryEventSink::default());
        let logger = AuditLogger::new("test").with_sink(sink.clone());

        logger.log(reuse_event());

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].service, "test");
        assert_eq!(records[0].event, reuse_event());
    }

    #[test]
    fn test_identifier_hashing() {
        let sink = Arc::new(MemoryEventSink::default());
        let logger = AuditLogger::new("test")
            .with_identifier_hashing(true)
            .with_sink(sink.clone());

        logger.log(reuse_event());

        let SecurityEvent::RefreshTokenReuseDetected {
            subject_id, client_id, ..
        } = &sink.events()[0]
        else {
            panic!("unexpected event");
        };
        let hashed = subject_id.as_deref().unwrap();
        assert!(hashed.starts_with("blake3:"));
        assert_eq!(hashed.len(), 23);
        assert_eq!(client_id, "web");
    }

    #[test]
    fn test_event_serialization() {
        let json = serde_json::to_string(&reuse_event()).unwrap();
        assert!(json.contains("\"type\":\"refresh_token_reuse_detected\""));
        assert!(json.contains("\"policy\":\"reject_only\""));
    }
}
