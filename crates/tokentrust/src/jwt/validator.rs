//! Token validation
//!
//! `decode` walks a token through
//! `RECEIVED → HEADER_PARSED → KEY_RESOLVED → SIGNATURE_VERIFIED →
//! CLAIMS_VALIDATED → ACCEPTED`; each step either advances or rejects with
//! one [`Error`] variant.
//!
//! # Key resolution
//!
//! | fallback key | `jku` header | trusted domain | key used |
//! |---|---|---|---|
//! | yes | absent | any | fallback |
//! | yes | any | absent | fallback |
//! | any | present | present | fetched, fallback as last resort |
//! | no | absent | any | `NoTrustedKeySource` |
//! | no | present | absent | `NoTrustedKeySource` |
//!
//! A locator that fails the trust check rejects the token outright; the
//! fallback key is never tried for it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use tracing::{debug, warn};

use super::jwks::KeyCache;
use super::{JkuTrustPolicy, KeyProvenance, Token, TrustedKeySetRef, ValidatedToken};
use crate::audit::AuditLogger;
use crate::auth_metrics;
use crate::config::TrustConfig;
use crate::error::{Error, Result};

/// Validates compact tokens against one trust configuration
///
/// # Example
///
/// ```rust,no_run
/// # use std::sync::Arc;
/// # use tokentrust::config::TrustConfig;
/// # use tokentrust::jwt::{HttpKeySetFetcher, KeyCache, TokenValidator};
/// # tokio_test::block_on(async {
/// let config = TrustConfig::with_trusted_domain("auth.example.com");
/// let fetcher = Arc::new(HttpKeySetFetcher::with_timeout(config.fetch_timeout)?);
/// let cache = Arc::new(KeyCache::new(fetcher, config.key_set_cache_ttl));
/// let validator = TokenValidator::new(&config, cache)?;
///
/// let validated = validator.decode("eyJhbGciOiJSUzI1NiIs...").await?;
/// println!("accepted, key was {}", validated.provenance());
/// # Ok::<(), tokentrust::Error>(())
/// # });
/// ```
pub struct TokenValidator {
    client_id: Option<String>,
    trust_policy: Option<JkuTrustPolicy>,
    fallback_key: Option<DecodingKey>,
    algorithms: Vec<Algorithm>,
    key_cache: Arc<KeyCache>,
    audit: Option<Arc<AuditLogger>>,
}

// Manual Debug impl, DecodingKey is opaque
impl std::fmt::Debug for TokenValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenValidator")
            .field("client_id", &self.client_id)
            .field("trust_policy", &self.trust_policy)
            .field("has_fallback_key", &self.fallback_key.is_some())
            .field("algorithms", &self.algorithms)
            .field("key_cache", &self.key_cache)
            .finish()
    }
}

impl TokenValidator {
    /// Build a validator
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the configuration is inconsistent
    /// or the fallback verification key is not a valid RSA public key.
    pub fn new(config: &TrustConfig, key_cache: Arc<KeyCache>) -> Result<Self> {
        config.validate()?;

        let fallback_key = config
            .verification_key
            .as_deref()
            .filter(|pem| !pem.trim().is_empty())
            .map(parse_verification_key)
            .transpose()?;

        Ok(Self {
            client_id: config.client_id.clone(),
            trust_policy: JkuTrustPolicy::from_config(config),
            fallback_key,
            algorithms: config.algorithms.clone(),
            key_cache,
            audit: None,
        })
    }

    /// Record accepted and rejected tokens through an audit logger
    pub fn with_audit(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Validate a token against the current time
    ///
    /// # Errors
    ///
    /// Returns the [`Error`] of the first failed step.
    pub async fn decode(&self, raw: &str) -> Result<ValidatedToken> {
        self.decode_at(raw, Utc::now()).await
    }

    /// Validate a token against an explicit instant
    ///
    /// # Errors
    ///
    /// Returns the [`Error`] of the first failed step.
    pub async fn decode_at(&self, raw: &str, now: DateTime<Utc>) -> Result<ValidatedToken> {
        let started = std::time::Instant::now();

        let result = match Token::parse(raw) {
            Ok(token) => match self.verify(&token, now).await {
                Ok(provenance) => {
                    debug!(
                        client_id = ?token.client_id(),
                        provenance = %provenance,
                        "Token accepted"
                    );
                    if let Some(audit) = &self.audit {
                        audit.token_accepted(&token, provenance);
                    }
                    Ok(ValidatedToken::new(token, provenance))
                }
                Err(e) => {
                    warn!(client_id = ?token.client_id(), error = %e, "Token rejected");
                    if let Some(audit) = &self.audit {
                        audit.token_rejected(Some(&token), &e);
                    }
                    Err(e)
                }
            },
            Err(e) => {
                warn!(error = %e, "Token rejected");
                if let Some(audit) = &self.audit {
                    audit.token_rejected(None, &e);
                }
                Err(e)
            }
        };

        match &result {
            Ok(validated) => {
                auth_metrics::record_validation("accepted", Some(validated.provenance().as_str()));
            }
            Err(e) => auth_metrics::record_validation(e.kind().as_str(), None),
        }
        auth_metrics::record_validation_duration(started.elapsed().as_secs_f64());

        result
    }

    async fn verify(&self, token: &Token, now: DateTime<Utc>) -> Result<KeyProvenance> {
        let algorithm = token.header().algorithm;
        if !self.algorithms.contains(&algorithm) {
            return Err(Error::malformed(format!(
                "algorithm {algorithm:?} is not accepted"
            )));
        }

        let provenance = self.verify_signature(token).await?;
        self.check_claims(token, now)?;
        Ok(provenance)
    }

    async fn verify_signature(&self, token: &Token) -> Result<KeyProvenance> {
        let jku = token.header().key_set_url.as_deref();

        let (jku, policy) = match (&self.fallback_key, jku, &self.trust_policy) {
            (Some(fallback), None, _) | (Some(fallback), Some(_), None) => {
                debug!("Verifying with fallback key");
                verify_with(token, fallback, KeyProvenance::Fallback)?;
                return Ok(KeyProvenance::Fallback);
            }
            (None, None, _) => {
                return Err(Error::NoTrustedKeySource(
                    "token has no 'jku' header and no verification key is configured".to_string(),
                ));
            }
            (None, Some(_), None) => {
                return Err(Error::NoTrustedKeySource(
                    "no trusted domain is configured for 'jku' and no verification key is configured"
                        .to_string(),
                ));
            }
            (_, Some(jku), Some(policy)) => (jku, policy),
        };

        let locator = policy.resolve(jku).inspect_err(|e| {
            warn!(jku = %jku, error = %e, "Untrusted key-set locator");
        })?;

        match self.verify_fetched(token, &locator).await {
            Ok(()) => Ok(KeyProvenance::Fetched),
            Err(fetched_error) => {
                let Some(fallback) = &self.fallback_key else {
                    return Err(fetched_error);
                };
                warn!(
                    jku = %locator,
                    error = %fetched_error,
                    "Fetched key failed, trying fallback key"
                );
                verify_with(token, fallback, KeyProvenance::Fallback).map_err(|e| {
                    Error::SignatureInvalid {
                        provenance: KeyProvenance::Fallback,
                        reason: format!(
                            "Jwt validation with fallback verificationkey failed ({e}) after fetched key failed ({fetched_error})"
                        ),
                    }
                })?;
                Ok(KeyProvenance::Fallback)
            }
        }
    }

    async fn verify_fetched(&self, token: &Token, locator: &TrustedKeySetRef) -> Result<()> {
        let kid = token.header().key_id.as_deref();
        let key_set = self.key_cache.get(locator).await?;

        let key = match key_set.key(kid) {
            Some(key) => key.clone(),
            None => {
                debug!(jku = %locator, kid = ?kid, "Key not in cached set");
                self.key_cache
                    .refresh(&key_set)
                    .await?
                    .and_then(|refreshed| refreshed.key(kid).cloned())
                    .ok_or_else(|| Error::SignatureInvalid {
                        provenance: KeyProvenance::Fetched,
                        reason: match kid {
                            Some(kid) => format!("no key with id '{kid}' in key set {locator}"),
                            None => format!(
                                "token has no 'kid' and key set {locator} holds more than one key"
                            ),
                        },
                    })?
            }
        };

        verify_with(token, &key, KeyProvenance::Fetched)
    }

    fn check_claims(&self, token: &Token, now: DateTime<Utc>) -> Result<()> {
        let expires_at = token
            .expires_at()
            .ok_or_else(|| Error::malformed("token has no valid 'exp' claim"))?;
        if expires_at <= now {
            return Err(Error::TokenExpired {
                expired_at: expires_at.timestamp(),
                validated_at: now.timestamp(),
            });
        }

        if let Some(expected) = &self.client_id
            && token.client_id() != Some(expected.as_str())
        {
            return Err(Error::ClientMismatch {
                expected: expected.clone(),
                actual: token.client_id().map(str::to_string),
            });
        }

        Ok(())
    }
}

fn verify_with(token: &Token, key: &DecodingKey, provenance: KeyProvenance) -> Result<()> {
    // Only the signature is checked here; claims are checked against `now`
    let mut validation = Validation::new(token.header().algorithm);
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    jsonwebtoken::decode::<serde_json::Value>(token.raw(), key, &validation)
        .map(|_| ())
        .map_err(|e| Error::SignatureInvalid {
            provenance,
            reason: e.to_string(),
        })
}

/// Parse the configured fallback key
///
/// Accepts PEM with or without line breaks, the form keys take when they are
/// passed through environment variables.
fn parse_verification_key(pem: &str) -> Result<DecodingKey> {
    let normalized = normalize_pem(pem);
    DecodingKey::from_rsa_pem(normalized.as_bytes())
        .map_err(|e| Error::Configuration(format!("invalid verification key: {e}")))
}

fn normalize_pem(pem: &str) -> String {
    let label = if pem.contains("BEGIN RSA PUBLIC KEY") {
        "RSA PUBLIC KEY"
    } else {
        "PUBLIC KEY"
    };
    let begin = format!("-----BEGIN {label}-----");
    let end = format!("-----END {label}-----");

    let body: String = pem
        .replace("\\n", "")
        .replace(&begin, "")
        .replace(&end, "")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();

    let mut normalized = String::with_capacity(body.len() + begin.len() + end.len() + 32);
    normalized.push_str(&begin);
    normalized.push('\n');
    for line in body.as_bytes().chunks(64) {
        normalized.push_str(&String::from_utf8_lossy(line));
        normalized.push('\n');
    }
    normalized.push_str(&end);
    normalized.push('\n');
    normalized
}
