//! Structured audit logging for token events
//!
//! Every record is emitted through `tracing` under the `audit::token` target,
//! so hosts route it with their subscriber like any other log line.
//!
//! ## Event Types
//!
//! - [`TokenEvent::TokenAccepted`] - a token passed validation
//! - [`TokenEvent::TokenRejected`] - a token failed validation
//! - [`TokenEvent::KeySetFetched`] - a key set was fetched from a trusted locator
//! - [`TokenEvent::TrustViolation`] - a `jku` locator failed the trust check
//! - [`TokenEvent::TokenExchanged`] - the token endpoint issued a token
//! - [`TokenEvent::ExchangeFailed`] - a token exchange failed
//!
//! ## Usage
//!
//! ```rust
//! use tokentrust::audit::{AuditLogger, TokenEvent};
//! use tokentrust::jwt::KeyProvenance;
//!
//! let logger = AuditLogger::privacy_focused("orders-service");
//! let record = logger.log(TokenEvent::TokenAccepted {
//!     subject: Some("user-42".to_string()),
//!     client_id: Some("sb-orders".to_string()),
//!     provenance: KeyProvenance::Fetched,
//! });
//! assert_eq!(record.service, "orders-service");
//! ```
//!
//! Subjects and client ids are identifying; the privacy-focused logger
//! replaces them with truncated BLAKE3 digests. Tokens, secrets and
//! passwords are never part of an event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{Error, ErrorKind};
use crate::jwt::{KeyProvenance, Token};

/// Audit logger for token events
#[derive(Debug, Clone)]
pub struct AuditLogger {
    service_name: String,
    hash_identifiers: bool,
}

impl AuditLogger {
    /// Logger that records identifiers as-is
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            hash_identifiers: false,
        }
    }

    /// Logger that hashes subjects and client ids
    pub fn privacy_focused(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            hash_identifiers: true,
        }
    }

    /// Builder method to configure identifier hashing
    pub fn with_identifier_hashing(mut self, hash: bool) -> Self {
        self.hash_identifiers = hash;
        self
    }

    /// Emit an event and return the record that was logged
    pub fn log(&self, event: TokenEvent) -> AuditRecord {
        let record = AuditRecord {
            id: Uuid::now_v7(),
            timestamp: Utc::now(),
            service: self.service_name.clone(),
            event: self.redact(event),
        };

        match &record.event {
            TokenEvent::TokenAccepted {
                subject,
                client_id,
                provenance,
            } => {
                info!(
                    target: "audit::token",
                    audit_id = %record.id,
                    event_type = "token_accepted",
                    subject = ?subject,
                    client_id = ?client_id,
                    provenance = %provenance,
                    service = %self.service_name,
                    "Token accepted"
                );
            }
            TokenEvent::TokenRejected { client_id, reason } => {
                warn!(
                    target: "audit::token",
                    audit_id = %record.id,
                    event_type = "token_rejected",
                    client_id = ?client_id,
                    reason = %reason,
                    service = %self.service_name,
                    "Token rejected"
                );
            }
            TokenEvent::KeySetFetched { locator, key_count } => {
                info!(
                    target: "audit::token",
                    audit_id = %record.id,
                    event_type = "key_set_fetched",
                    jku = %locator,
                    key_count = key_count,
                    service = %self.service_name,
                    "Key set fetched"
                );
            }
            TokenEvent::TrustViolation { locator, reason } => {
                warn!(
                    target: "audit::token",
                    audit_id = %record.id,
                    event_type = "trust_violation",
                    jku = %locator,
                    reason = %reason,
                    service = %self.service_name,
                    "Untrusted key-set locator rejected"
                );
            }
            TokenEvent::TokenExchanged {
                grant_type,
                endpoint,
                client_id,
                correlation_id,
                expires_in,
            } => {
                info!(
                    target: "audit::token",
                    audit_id = %record.id,
                    event_type = "token_exchanged",
                    grant_type = %grant_type,
                    endpoint = %endpoint,
                    client_id = ?client_id,
                    correlation_id = %correlation_id,
                    expires_in_secs = expires_in,
                    service = %self.service_name,
                    "Token exchanged"
                );
            }
            TokenEvent::ExchangeFailed {
                grant_type,
                endpoint,
                status,
                correlation_id,
            } => {
                warn!(
                    target: "audit::token",
                    audit_id = %record.id,
                    event_type = "exchange_failed",
                    grant_type = %grant_type,
                    endpoint = %endpoint,
                    status = ?status,
                    correlation_id = %correlation_id,
                    service = %self.service_name,
                    "Token exchange failed"
                );
            }
        }

        record
    }

    /// Record an accepted token
    pub fn token_accepted(&self, token: &Token, provenance: KeyProvenance) -> AuditRecord {
        self.log(TokenEvent::TokenAccepted {
            subject: token.subject().map(str::to_string),
            client_id: token.client_id().map(str::to_string),
            provenance,
        })
    }

    /// Record a rejected token; trust violations get their own event
    pub fn token_rejected(&self, token: Option<&Token>, error: &Error) -> AuditRecord {
        if error.is_trust_violation()
            && let Some(locator) = token.and_then(|t| t.header().key_set_url.as_deref())
        {
            return self.log(TokenEvent::TrustViolation {
                locator: locator.to_string(),
                reason: error.kind(),
            });
        }

        self.log(TokenEvent::TokenRejected {
            client_id: token.and_then(Token::client_id).map(str::to_string),
            reason: error.kind(),
        })
    }

    /// Record a fetched key set
    pub fn key_set_fetched(&self, locator: &str, key_count: usize) -> AuditRecord {
        self.log(TokenEvent::KeySetFetched {
            locator: locator.to_string(),
            key_count,
        })
    }

    fn hash(&self, value: &str) -> String {
        if self.hash_identifiers {
            let hash = blake3::hash(value.as_bytes());
            format!("blake3:{}", &hash.to_hex()[..16])
        } else {
            value.to_string()
        }
    }

    fn redact(&self, event: TokenEvent) -> TokenEvent {
        if !self.hash_identifiers {
            return event;
        }

        match event {
            TokenEvent::TokenAccepted {
                subject,
                client_id,
                provenance,
            } => TokenEvent::TokenAccepted {
                subject: subject.map(|s| self.hash(&s)),
                client_id: client_id.map(|c| self.hash(&c)),
                provenance,
            },
            TokenEvent::TokenRejected { client_id, reason } => TokenEvent::TokenRejected {
                client_id: client_id.map(|c| self.hash(&c)),
                reason,
            },
            TokenEvent::TokenExchanged {
                grant_type,
                endpoint,
                client_id,
                correlation_id,
                expires_in,
            } => TokenEvent::TokenExchanged {
                grant_type,
                endpoint,
                client_id: client_id.map(|c| self.hash(&c)),
                correlation_id,
                expires_in,
            },
            other => other,
        }
    }
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::new("tokentrust")
    }
}

/// Token event types for audit logging
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TokenEvent {
    /// A token passed every validation step
    TokenAccepted {
        /// Subject claim
        subject: Option<String>,
        /// Client id claim
        client_id: Option<String>,
        /// Source of the verifying key
        provenance: KeyProvenance,
    },

    /// A token was rejected
    TokenRejected {
        /// Client id claim, if the token could be parsed
        client_id: Option<String>,
        /// Error category
        #[serde(with = "error_kind_label")]
        reason: ErrorKind,
    },

    /// A key set was fetched from a trusted locator
    KeySetFetched {
        /// Normalized locator
        locator: String,
        /// Number of usable keys
        key_count: usize,
    },

    /// A `jku` locator failed the trust check
    TrustViolation {
        /// Locator as found in the token header
        locator: String,
        /// Which rule was violated
        #[serde(with = "error_kind_label")]
        reason: ErrorKind,
    },

    /// The token endpoint issued a token
    TokenExchanged {
        /// Grant type wire name
        grant_type: String,
        /// Token endpoint
        endpoint: String,
        /// Client the token was requested for
        client_id: Option<String>,
        /// Correlation id sent with the request
        correlation_id: String,
        /// Lifetime granted by the server, in seconds
        expires_in: i64,
    },

    /// A token exchange failed
    ExchangeFailed {
        /// Grant type wire name
        grant_type: String,
        /// Token endpoint
        endpoint: String,
        /// HTTP status, absent for transport failures
        status: Option<u16>,
        /// Correlation id sent with the request
        correlation_id: String,
    },
}

/// Audit record wrapping an event with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Unique audit record ID
    pub id: Uuid,
    /// Timestamp of the event
    pub timestamp: DateTime<Utc>,
    /// Service that generated the event
    pub service: String,
    /// The audit event
    pub event: TokenEvent,
}

mod error_kind_label {
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::error::ErrorKind;

    const KINDS: [ErrorKind; 14] = [
        ErrorKind::MalformedToken,
        ErrorKind::InsecureScheme,
        ErrorKind::UntrustedDomain,
        ErrorKind::InvalidKeyEndpoint,
        ErrorKind::NoTrustedKeySource,
        ErrorKind::SignatureInvalid,
        ErrorKind::TokenExpired,
        ErrorKind::ClientMismatch,
        ErrorKind::KeyFetchFailed,
        ErrorKind::Exchange,
        ErrorKind::AmbiguousAuthenticationConfiguration,
        ErrorKind::ResolutionFailed,
        ErrorKind::Configuration,
        ErrorKind::Http,
    ];

    pub(super) fn serialize<S>(kind: &ErrorKind, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(kind.as_str())
    }

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<ErrorKind, D::Error>
    where
        D: Deserializer<'de>,
    {
        let label = String::deserialize(deserializer)?;
        KINDS
            .into_iter()
            .find(|kind| kind.as_str() == label)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown error kind '{label}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_logger_creation() {
        let logger = AuditLogger::new("test-service");
        assert_eq!(logger.service_name, "test-service");
        assert!(!logger.hash_identifiers);
        assert!(AuditLogger::privacy_focused("x").hash_identifiers);
    }

    #[test]
    fn test_identifier_hashing() {
        let logger = AuditLogger::new("test").with_identifier_hashing(true);
        let hashed = logger.hash("user123");
        assert!(hashed.starts_with("blake3:"));
        assert_eq!(hashed.len(), 23);
    }

    #[test]
    fn test_privacy_focused_record_has_no_raw_identifiers() {
        let logger = AuditLogger::privacy_focused("test");
        let record = logger.log(TokenEvent::TokenAccepted {
            subject: Some("alice".to_string()),
            client_id: Some("sb-app".to_string()),
            provenance: KeyProvenance::Fallback,
        });

        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("alice"));
        assert!(!json.contains("sb-app"));
        assert!(json.contains("\"provenance\":\"fallback\""));
    }

    #[test]
    fn test_event_serialization() {
        let event = TokenEvent::TokenRejected {
            client_id: Some("sb-app".to_string()),
            reason: ErrorKind::TokenExpired,
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"token_rejected\""));
        assert!(json.contains("\"reason\":\"token_expired\""));

        let back: TokenEvent = serde_json::from_str(&json).unwrap();
        assert!(matches!(
            back,
            TokenEvent::TokenRejected {
                reason: ErrorKind::TokenExpired,
                ..
            }
        ));
    }

    #[test]
    fn test_trust_violation_event() {
        let logger = AuditLogger::new("test");
        let record = logger.log(TokenEvent::TrustViolation {
            locator: "https://evil.example.com/token_keys".to_string(),
            reason: ErrorKind::UntrustedDomain,
        });
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"type\":\"trust_violation\""));
        assert!(json.contains("untrusted_domain"));
    }
}
