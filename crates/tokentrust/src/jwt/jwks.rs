//! Key-set fetching and caching
//!
//! - **Trusted input only**: fetchers take a [`TrustedKeySetRef`], which only
//!   the `jku` trust check can produce
//! - **TTL-based caching**: default 10 minutes, zero disables caching
//! - **Single-flight**: concurrent lookups for one locator share one fetch
//! - **Rate-limited refresh**: an unknown `kid` forces at most one refetch per
//!   locator every 5 seconds
//! - **Failures are not cached**: every waiter of a failed fetch gets the same
//!   [`Error::KeyFetchFailed`], the next lookup fetches again

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jsonwebtoken::DecodingKey;
use jsonwebtoken::jwk::JwkSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use url::Url;

use super::TrustedKeySetRef;
use crate::audit::AuditLogger;
use crate::auth_metrics;
use crate::cache::SingleFlight;
use crate::config::DEFAULT_KEY_SET_CACHE_CAPACITY;
use crate::error::{Error, Result};
use crate::http_client;

/// Minimum time between forced refreshes of one key set
const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

/// Source of key-set documents
#[async_trait]
pub trait KeySetFetcher: Send + Sync {
    /// Fetch the key set published at a trusted locator
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyFetchFailed`] if the document cannot be retrieved
    /// or parsed.
    async fn fetch(&self, locator: &TrustedKeySetRef) -> Result<JwkSet>;
}

/// HTTPS key-set fetcher
///
/// Redirects are not followed: a redirect would leave the trusted domain
/// behind the trust check's back.
#[derive(Debug, Clone)]
pub struct HttpKeySetFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpKeySetFetcher {
    /// Fetcher on a shared client
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// Fetcher with its own client
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] if the HTTP client cannot be built.
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        Ok(Self::new(http_client::build_client(None)?, timeout))
    }

    async fn fetch_url(&self, url: &Url) -> Result<JwkSet> {
        let failed = |reason: String| Error::KeyFetchFailed {
            locator: url.to_string(),
            reason,
        };

        info!(jku = %url, "Fetching key set");

        let response = self
            .client
            .get(url.clone())
            .header(reqwest::header::ACCEPT, "application/json")
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                error!(jku = %url, error = %e, "Failed to fetch key set");
                failed(if e.is_timeout() {
                    format!("timed out after {:?}", self.timeout)
                } else {
                    e.to_string()
                })
            })?;

        let status = response.status();
        if !status.is_success() {
            error!(jku = %url, status = %status, "Key-set endpoint returned error status");
            return Err(failed(format!("endpoint returned status {status}")));
        }

        response.json::<JwkSet>().await.map_err(|e| {
            error!(jku = %url, error = %e, "Failed to parse key set");
            failed(format!("invalid key set document: {e}"))
        })
    }
}

#[async_trait]
impl KeySetFetcher for HttpKeySetFetcher {
    async fn fetch(&self, locator: &TrustedKeySetRef) -> Result<JwkSet> {
        self.fetch_url(locator.url()).await
    }
}

/// Verification keys of one fetched key set
#[derive(Clone)]
pub struct CachedKeySet {
    locator: TrustedKeySetRef,
    keys: HashMap<String, DecodingKey>,
    unnamed: Vec<DecodingKey>,
    fetched_at: DateTime<Utc>,
    fetched: Instant,
    ttl: Duration,
}

impl fmt::Debug for CachedKeySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedKeySet")
            .field("locator", &self.locator)
            .field("key_ids", &self.keys.keys().collect::<Vec<_>>())
            .field("unnamed_keys", &self.unnamed.len())
            .field("fetched_at", &self.fetched_at)
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl CachedKeySet {
    /// Convert a fetched document, skipping keys that cannot verify anything
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyFetchFailed`] if no key in the document is usable.
    pub fn from_jwks(locator: TrustedKeySetRef, jwks: &JwkSet, ttl: Duration) -> Result<Self> {
        let mut keys = HashMap::new();
        let mut unnamed = Vec::new();

        for jwk in &jwks.keys {
            match DecodingKey::from_jwk(jwk) {
                Ok(key) => match &jwk.common.key_id {
                    Some(kid) => {
                        keys.insert(kid.clone(), key);
                    }
                    None => unnamed.push(key),
                },
                Err(e) => {
                    warn!(
                        jku = %locator,
                        kid = ?jwk.common.key_id,
                        error = %e,
                        "Skipping unusable key"
                    );
                }
            }
        }

        if keys.is_empty() && unnamed.is_empty() {
            return Err(Error::KeyFetchFailed {
                locator: locator.to_string(),
                reason: "key set contains no usable keys".to_string(),
            });
        }

        Ok(Self {
            locator,
            keys,
            unnamed,
            fetched_at: Utc::now(),
            fetched: Instant::now(),
            ttl,
        })
    }

    /// Key for `kid`; without a `kid` the only key of a one-key set
    pub fn key(&self, kid: Option<&str>) -> Option<&DecodingKey> {
        match kid {
            Some(kid) => self.keys.get(kid),
            None if self.len() == 1 => self.keys.values().chain(&self.unnamed).next(),
            None => None,
        }
    }

    /// Locator the set was fetched from
    pub fn locator(&self) -> &TrustedKeySetRef {
        &self.locator
    }

    /// Key ids present in the set
    pub fn key_ids(&self) -> impl Iterator<Item = &str> {
        self.keys.keys().map(String::as_str)
    }

    /// Number of usable keys
    pub fn len(&self) -> usize {
        self.keys.len() + self.unnamed.len()
    }

    /// Whether the set holds no keys
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// When the set was fetched
    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    /// When the cached set goes stale
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.fetched_at
            + chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::zero())
    }

    fn is_fresh(&self, interval: Duration) -> bool {
        self.fetched.elapsed() < interval
    }
}

/// Single-flight cache of key sets, keyed by normalized locator
///
/// # Example
///
/// ```rust,no_run
/// # use std::sync::Arc;
/// # use std::time::Duration;
/// # use tokentrust::jwt::{HttpKeySetFetcher, JkuTrustPolicy, KeyCache};
/// # tokio_test::block_on(async {
/// let fetcher = Arc::new(HttpKeySetFetcher::with_timeout(Duration::from_secs(10))?);
/// let cache = KeyCache::new(fetcher, Duration::from_secs(600));
///
/// let policy = JkuTrustPolicy::new("auth.example.com");
/// let locator = policy.resolve("https://tenant.auth.example.com/token_keys")?;
/// let keys = cache.get(&locator).await?;
/// assert!(!keys.is_empty());
/// # Ok::<(), tokentrust::Error>(())
/// # });
/// ```
pub struct KeyCache {
    fetcher: Arc<dyn KeySetFetcher>,
    entries: SingleFlight<TrustedKeySetRef, Arc<CachedKeySet>>,
    ttl: Duration,
    min_refresh_interval: Duration,
    audit: Option<Arc<AuditLogger>>,
}

impl fmt::Debug for KeyCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyCache")
            .field("ttl", &self.ttl)
            .field("min_refresh_interval", &self.min_refresh_interval)
            .field("entries", &self.entries.len())
            .finish_non_exhaustive()
    }
}

impl KeyCache {
    /// Cache with the given fetcher and TTL; a zero TTL disables caching
    pub fn new(fetcher: Arc<dyn KeySetFetcher>, ttl: Duration) -> Self {
        Self::with_capacity(fetcher, ttl, DEFAULT_KEY_SET_CACHE_CAPACITY)
    }

    /// Cache holding at most `capacity` key sets
    pub fn with_capacity(
        fetcher: Arc<dyn KeySetFetcher>,
        ttl: Duration,
        capacity: usize,
    ) -> Self {
        Self {
            fetcher,
            entries: SingleFlight::new("key_set", capacity),
            ttl,
            min_refresh_interval: MIN_REFRESH_INTERVAL,
            audit: None,
        }
    }

    /// Record fetches through an audit logger
    pub fn with_audit(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Configured TTL
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Key set for a trusted locator, fetched at most once per TTL
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyFetchFailed`] if the fetch fails; all concurrent
    /// waiters receive the same error.
    pub async fn get(&self, locator: &TrustedKeySetRef) -> Result<Arc<CachedKeySet>> {
        let fetcher = Arc::clone(&self.fetcher);
        let audit = self.audit.clone();
        let ttl = self.ttl;
        let target = locator.clone();
        let abort_locator = locator.to_string();

        self.entries
            .get_or_load(
                locator.clone(),
                move || async move {
                    let result = fetcher
                        .fetch(&target)
                        .await
                        .and_then(|jwks| CachedKeySet::from_jwks(target.clone(), &jwks, ttl));
                    auth_metrics::record_key_set_fetch(result.is_ok());
                    match &result {
                        Ok(set) => {
                            debug!(jku = %target, key_count = set.len(), "Key set cached");
                            if let Some(audit) = &audit {
                                audit.key_set_fetched(target.as_str(), set.len());
                            }
                        }
                        Err(e) => warn!(jku = %target, error = %e, "Key-set fetch failed"),
                    }
                    result.map(Arc::new)
                },
                move |_| ttl,
                move |reason| Error::KeyFetchFailed {
                    locator: abort_locator,
                    reason,
                },
            )
            .await
    }

    /// Refetch after a lookup miss, e.g. an unknown `kid` after key rotation
    ///
    /// Returns `None` without fetching when `current` is younger than the
    /// minimum refresh interval, or when caching is disabled (the set was
    /// fetched for this very lookup).
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyFetchFailed`] if the refetch fails.
    pub async fn refresh(&self, current: &CachedKeySet) -> Result<Option<Arc<CachedKeySet>>> {
        if self.ttl.is_zero() || current.is_fresh(self.min_refresh_interval) {
            debug!(jku = %current.locator(), "Key-set refresh rate limited");
            return Ok(None);
        }

        info!(jku = %current.locator(), "Refreshing key set");
        self.entries.invalidate(current.locator());
        self.get(current.locator()).await.map(Some)
    }

    /// Drop every cached key set
    pub fn clear(&self) {
        self.entries.clear();
    }
}
