//! Token response cache
//!
//! Responses are keyed by a [`TokenFingerprint`] of the request and kept for
//! `min(expires_in - expiry_delta, cache_duration)`. Concurrent requests with
//! the same fingerprint share one exchange.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use secrecy::ExposeSecret;
use tracing::debug;

use super::{ParamValue, TokenExchangeClient, TokenRequest};
use crate::cache::SingleFlight;
use crate::config::TokenCacheConfig;
use crate::error::{Error, Result};
use crate::types::TokenResponse;

/// Cache key derived from a token request
///
/// Covers the grant type, endpoint, subdomain, extra headers and every form
/// parameter. Secret values only enter as their own BLAKE3 hash, so the
/// fingerprint identifies a secret without containing it.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TokenFingerprint([u8; 32]);

impl TokenFingerprint {
    /// Fingerprint of `request`
    pub fn of(request: &TokenRequest) -> Self {
        let mut hasher = blake3::Hasher::new();
        let mut field = |bytes: &[u8]| {
            hasher.update(&(bytes.len() as u64).to_le_bytes());
            hasher.update(bytes);
        };

        field(request.grant_type().as_str().as_bytes());
        field(request.endpoint().as_str().as_bytes());
        field(request.get_subdomain().unwrap_or_default().as_bytes());

        for (key, value) in request.params() {
            field(key.as_bytes());
            match value {
                ParamValue::Plain(plain) => {
                    field(b"p");
                    field(plain.as_bytes());
                }
                ParamValue::Secret(secret) => {
                    field(b"s");
                    field(blake3::hash(secret.expose_secret().as_bytes()).as_bytes());
                }
            }
        }

        for (name, value) in request.headers() {
            field(name.as_str().as_bytes());
            field(value.as_bytes());
        }

        Self(*hasher.finalize().as_bytes())
    }

    /// Hex form
    pub fn to_hex(&self) -> String {
        blake3::Hash::from(self.0).to_hex().to_string()
    }
}

impl fmt::Debug for TokenFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TokenFingerprint({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for TokenFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Cache of token endpoint responses
pub struct TokenResponseCache {
    entries: SingleFlight<TokenFingerprint, TokenResponse>,
    config: TokenCacheConfig,
}

impl fmt::Debug for TokenResponseCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponseCache")
            .field("entries", &self.entries.len())
            .field("config", &self.config)
            .finish()
    }
}

impl TokenResponseCache {
    /// Empty cache
    pub fn new(config: TokenCacheConfig) -> Self {
        Self {
            entries: SingleFlight::new("token_response", config.max_entries),
            config,
        }
    }

    /// Settings in use
    pub fn config(&self) -> &TokenCacheConfig {
        &self.config
    }

    /// Cached response for `fingerprint`, or the result of `exchange`
    ///
    /// With caching disabled every call runs `exchange`.
    ///
    /// # Errors
    ///
    /// Returns the error produced by `exchange`; every caller waiting on the
    /// same fingerprint receives it, and nothing is cached.
    pub async fn get_or_exchange<F, Fut>(
        &self,
        fingerprint: TokenFingerprint,
        exchange: F,
    ) -> Result<TokenResponse>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<TokenResponse>> + Send + 'static,
    {
        if !self.config.is_enabled() {
            return exchange().await;
        }

        let config = self.config.clone();
        self.entries
            .get_or_load(
                fingerprint,
                exchange,
                move |response| {
                    let ttl = time_to_live(&config, response);
                    debug!(
                        fingerprint = ?fingerprint,
                        ttl_secs = ttl.as_secs(),
                        "Caching token response"
                    );
                    ttl
                },
                |reason| Error::Exchange {
                    message: format!("token exchange task aborted: {reason}"),
                    status: None,
                    endpoint: String::new(),
                    body: None,
                },
            )
            .await
    }

    /// Exchange `request` through `client`, reusing a cached response
    ///
    /// # Errors
    ///
    /// Returns [`Error::Exchange`] if the token endpoint rejects the request
    /// or cannot be reached.
    pub async fn exchange(
        &self,
        client: &TokenExchangeClient,
        request: TokenRequest,
    ) -> Result<TokenResponse> {
        let fingerprint = TokenFingerprint::of(&request);
        let client = client.clone();
        self.get_or_exchange(fingerprint, move || async move {
            client.exchange(&request).await
        })
        .await
    }

    /// Drop the cached response for `fingerprint`
    pub fn invalidate(&self, fingerprint: &TokenFingerprint) {
        self.entries.invalidate(fingerprint);
    }

    /// Number of entries, including exchanges in flight
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds nothing
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every cached response
    pub fn clear(&self) {
        self.entries.clear();
    }
}

fn time_to_live(config: &TokenCacheConfig, response: &TokenResponse) -> Duration {
    let issued = Duration::from_secs(response.expires_in.max(0).unsigned_abs());
    issued
        .saturating_sub(config.expiry_delta)
        .min(config.cache_duration)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use secrecy::SecretString;
    use url::Url;

    use super::*;

    fn endpoint(host: &str) -> Url {
        Url::parse(&format!("https://{host}/oauth/token")).unwrap()
    }

    fn request(secret: &str) -> TokenRequest {
        TokenRequest::client_credentials(
            endpoint("mydomain.auth.com"),
            "sb-app",
            SecretString::new(secret.to_string()),
        )
    }

    fn response(token: &str, expires_in: i64) -> TokenResponse {
        TokenResponse {
            access_token: token.to_string(),
            token_type: "bearer".to_string(),
            expires_in,
            refresh_token: None,
            scope: None,
        }
    }

    fn issue(
        calls: &Arc<AtomicUsize>,
        token: &'static str,
        expires_in: i64,
    ) -> impl FnOnce() -> std::future::Ready<Result<TokenResponse>> {
        let calls = Arc::clone(calls);
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Ok(response(token, expires_in)))
        }
    }

    #[test]
    fn test_fingerprint_tracks_secret_identity() {
        assert_eq!(TokenFingerprint::of(&request("a")), TokenFingerprint::of(&request("a")));
        assert_ne!(TokenFingerprint::of(&request("a")), TokenFingerprint::of(&request("b")));
    }

    #[test]
    fn test_fingerprint_separates_subdomains_and_scopes() {
        let base = TokenFingerprint::of(&request("a"));
        assert_ne!(base, TokenFingerprint::of(&request("a").subdomain("tenant")));
        assert_ne!(base, TokenFingerprint::of(&request("a").scope("read")));
    }

    #[test]
    fn test_fingerprint_hides_secret() {
        let fingerprint = TokenFingerprint::of(&request("very-secret-value"));
        assert!(!format!("{fingerprint:?} {fingerprint}").contains("very-secret-value"));
        assert_eq!(fingerprint.to_hex().len(), 64);
    }

    #[test]
    fn test_ttl_is_clamped_and_shortened() {
        let config = TokenCacheConfig {
            cache_duration: Duration::from_secs(600),
            expiry_delta: Duration::from_secs(30),
            max_entries: 10,
        };
        assert_eq!(time_to_live(&config, &response("t", 43199)), Duration::from_secs(600));
        assert_eq!(time_to_live(&config, &response("t", 300)), Duration::from_secs(270));
        assert_eq!(time_to_live(&config, &response("t", 10)), Duration::ZERO);
        assert_eq!(time_to_live(&config, &response("t", -5)), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hit_within_ttl_skips_exchange() {
        let cache = TokenResponseCache::new(TokenCacheConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let fingerprint = TokenFingerprint::of(&request("a"));

        let first = cache
            .get_or_exchange(fingerprint, issue(&calls, "one", 3600))
            .await
            .unwrap();
        let second = cache
            .get_or_exchange(fingerprint, issue(&calls, "two", 3600))
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(first, second);
        assert_eq!(second.access_token, "one");
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_cache_still_stores_newest_response() {
        let cache = TokenResponseCache::new(TokenCacheConfig {
            max_entries: 2,
            ..TokenCacheConfig::default()
        });
        let calls = Arc::new(AtomicUsize::new(0));

        for secret in ["a", "b", "c"] {
            cache
                .get_or_exchange(TokenFingerprint::of(&request(secret)), issue(&calls, secret, 3600))
                .await
                .unwrap();
            tokio::time::advance(Duration::from_secs(1)).await;
        }
        assert_eq!(cache.len(), 2);

        let newest = cache
            .get_or_exchange(TokenFingerprint::of(&request("c")), issue(&calls, "other", 3600))
            .await
            .unwrap();
        assert_eq!(newest.access_token, "c");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_exchanges_again() {
        let cache = TokenResponseCache::new(TokenCacheConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let fingerprint = TokenFingerprint::of(&request("a"));

        cache
            .get_or_exchange(fingerprint, issue(&calls, "one", 60))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(61)).await;
        let renewed = cache
            .get_or_exchange(fingerprint, issue(&calls, "two", 60))
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(renewed.access_token, "two");
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_cache_always_exchanges() {
        let cache = TokenResponseCache::new(TokenCacheConfig::disabled());
        let calls = Arc::new(AtomicUsize::new(0));
        let fingerprint = TokenFingerprint::of(&request("a"));

        for _ in 0..3 {
            cache
                .get_or_exchange(fingerprint, issue(&calls, "t", 3600))
                .await
                .unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_forces_exchange() {
        let cache = TokenResponseCache::new(TokenCacheConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let fingerprint = TokenFingerprint::of(&request("a"));

        cache
            .get_or_exchange(fingerprint, issue(&calls, "one", 3600))
            .await
            .unwrap();
        cache.invalidate(&fingerprint);
        cache
            .get_or_exchange(fingerprint, issue(&calls, "two", 3600))
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
