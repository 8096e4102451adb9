//! Engine configuration types
//!
//! Configuration is a plain value: it is deserialized (or built in code) once,
//! checked by [`EngineConfig::validate`], and handed to
//! [`TrustEngine::new`](crate::TrustEngine::new). Nothing in the engine
//! mutates it afterwards. Re-creating the engine is the way to change it.

use std::fmt;
use std::time::Duration;

use jsonwebtoken::Algorithm;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};

/// Default path of the key-set endpoint on the trusted domain
pub const DEFAULT_KEY_SET_PATH: &str = "/token_keys";

/// Default number of key sets kept in the key cache
pub const DEFAULT_KEY_SET_CACHE_CAPACITY: usize = 1000;

/// Default token endpoint path below the authorization URL
pub const DEFAULT_TOKEN_PATH: &str = "/oauth/token";

/// Default name of the tenant-subdomain request header
pub const DEFAULT_SUBDOMAIN_HEADER: &str = "X-Identity-Zone-Subdomain";

/// Product identifier sent as `User-Agent` on outgoing requests
pub const DEFAULT_USER_AGENT: &str = concat!("tokentrust/", env!("CARGO_PKG_VERSION"));

/// An accepted way of obtaining a bearer token from an inbound request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthenticationMethod {
    /// Basic `user:password` credentials exchanged for a token
    Basic,
    /// Bearer token passed through unchanged
    #[serde(rename = "OAUTH2")]
    OAuth2,
    /// Basic-encoded client id and secret exchanged with the client-credentials grant
    ClientCredentials,
}

impl AuthenticationMethod {
    /// Configuration name of the method
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Basic => "BASIC",
            Self::OAuth2 => "OAUTH2",
            Self::ClientCredentials => "CLIENT_CREDENTIALS",
        }
    }

    /// Whether the method reads the `Authorization: Basic` header
    pub fn reads_basic_header(self) -> bool {
        matches!(self, Self::Basic | Self::ClientCredentials)
    }
}

impl fmt::Display for AuthenticationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Grant used when the BASIC method exchanges `user:password`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BasicGrant {
    /// Username and password become the client id and secret
    #[default]
    ClientCredentials,
    /// Username and password are resource-owner credentials, sent with the
    /// configured service client
    Password,
}

/// Token validation and key-set trust settings
#[derive(Clone, Serialize, Deserialize)]
pub struct TrustConfig {
    /// Client id every accepted token must carry (`cid`, `client_id` or `azp`)
    #[serde(default)]
    pub client_id: Option<String>,
    /// Base domain key-set locators must belong to
    #[serde(default)]
    pub trusted_domain: Option<String>,
    /// Static fallback verification key (PEM encoded RSA public key)
    #[serde(default)]
    pub verification_key: Option<String>,
    /// Exact path of the key-set endpoint
    #[serde(default = "default_key_set_path")]
    pub key_set_path: String,
    /// Lifetime of a fetched key set, zero disables caching
    #[serde(default = "default_key_set_cache_ttl", with = "duration_secs")]
    pub key_set_cache_ttl: Duration,
    /// Maximum number of key sets kept; the one closest to expiry is evicted
    /// to make room
    #[serde(default = "default_key_set_cache_capacity")]
    pub key_set_cache_capacity: usize,
    /// Timeout for one key-set fetch
    #[serde(default = "default_fetch_timeout", with = "duration_secs")]
    pub fetch_timeout: Duration,
    /// Accepted signature algorithms
    #[serde(default = "default_algorithms")]
    pub algorithms: Vec<Algorithm>,
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            trusted_domain: None,
            verification_key: None,
            key_set_path: default_key_set_path(),
            key_set_cache_ttl: default_key_set_cache_ttl(),
            key_set_cache_capacity: default_key_set_cache_capacity(),
            fetch_timeout: default_fetch_timeout(),
            algorithms: default_algorithms(),
        }
    }
}

impl fmt::Debug for TrustConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustConfig")
            .field("client_id", &self.client_id)
            .field("trusted_domain", &self.trusted_domain)
            .field("has_verification_key", &self.verification_key.is_some())
            .field("key_set_path", &self.key_set_path)
            .field("key_set_cache_ttl", &self.key_set_cache_ttl)
            .field("key_set_cache_capacity", &self.key_set_cache_capacity)
            .field("fetch_timeout", &self.fetch_timeout)
            .field("algorithms", &self.algorithms)
            .finish()
    }
}

impl TrustConfig {
    /// Config with a trusted domain and the default key-set path
    pub fn with_trusted_domain(domain: impl Into<String>) -> Self {
        Self {
            trusted_domain: Some(domain.into()),
            ..Self::default()
        }
    }

    /// Config with only a static fallback key
    pub fn with_verification_key(pem: impl Into<String>) -> Self {
        Self {
            verification_key: Some(pem.into()),
            ..Self::default()
        }
    }

    /// Check the values for consistency
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] when the trusted domain is not a bare
    /// host name, the key-set path is not absolute, or the algorithm list is
    /// empty or contains a symmetric algorithm.
    pub fn validate(&self) -> Result<()> {
        if let Some(domain) = &self.trusted_domain {
            let trimmed = domain.trim_end_matches('.');
            if trimmed.is_empty()
                || trimmed.starts_with('.')
                || trimmed.contains(['/', ':', '@', '?', '#', ' ', '\\'])
            {
                return Err(Error::Configuration(format!(
                    "trusted_domain must be a bare host name, got '{domain}'"
                )));
            }
        }

        if !self.key_set_path.starts_with('/') {
            return Err(Error::Configuration(format!(
                "key_set_path must start with '/', got '{}'",
                self.key_set_path
            )));
        }

        if self.algorithms.is_empty() {
            return Err(Error::Configuration(
                "at least one signature algorithm is required".to_string(),
            ));
        }

        if let Some(alg) = self
            .algorithms
            .iter()
            .find(|alg| matches!(alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512))
        {
            return Err(Error::Configuration(format!(
                "symmetric algorithm {alg:?} cannot verify tokens"
            )));
        }

        Ok(())
    }
}

/// Token response cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenCacheConfig {
    /// Maximum lifetime of a cached response, zero disables caching
    #[serde(default = "default_cache_duration", with = "duration_secs")]
    pub cache_duration: Duration,
    /// Subtracted from `expires_in` so tokens are renewed before they expire
    #[serde(default, with = "duration_secs")]
    pub expiry_delta: Duration,
    /// Maximum number of cached responses
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

impl Default for TokenCacheConfig {
    fn default() -> Self {
        Self {
            cache_duration: default_cache_duration(),
            expiry_delta: Duration::ZERO,
            max_entries: default_max_entries(),
        }
    }
}

impl TokenCacheConfig {
    /// Config that never caches
    pub fn disabled() -> Self {
        Self {
            cache_duration: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Whether responses are cached at all
    pub fn is_enabled(&self) -> bool {
        !self.cache_duration.is_zero() && self.max_entries > 0
    }
}

/// Token endpoint client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    /// Timeout for one exchange
    #[serde(default = "default_exchange_timeout", with = "duration_secs")]
    pub timeout: Duration,
    /// Value of the `User-Agent` header
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            timeout: default_exchange_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

/// Credential resolution settings
#[derive(Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Authorization server base URL, e.g. `https://mydomain.auth.com`
    #[serde(default)]
    pub auth_url: Option<String>,
    /// Token endpoint path below `auth_url`
    #[serde(default = "default_token_path")]
    pub token_path: String,
    /// Service client id used by the password grant
    #[serde(default)]
    pub client_id: Option<String>,
    /// Service client secret used by the password grant
    #[serde(
        default,
        serialize_with = "serialize_optional_secret",
        deserialize_with = "deserialize_optional_secret"
    )]
    pub client_secret: Option<SecretString>,
    /// Ordered resolution policy
    #[serde(default = "default_methods")]
    pub methods: Vec<AuthenticationMethod>,
    /// Header carrying the tenant subdomain
    #[serde(default = "default_subdomain_header")]
    pub subdomain_header: String,
    /// Grant used by the BASIC method
    #[serde(default)]
    pub basic_grant: BasicGrant,
    /// Scope requested on every exchange
    #[serde(default)]
    pub scope: Option<String>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            auth_url: None,
            token_path: default_token_path(),
            client_id: None,
            client_secret: None,
            methods: default_methods(),
            subdomain_header: default_subdomain_header(),
            basic_grant: BasicGrant::default(),
            scope: None,
        }
    }
}

impl fmt::Debug for ResolverConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolverConfig")
            .field("auth_url", &self.auth_url)
            .field("token_path", &self.token_path)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "****"))
            .field("methods", &self.methods)
            .field("subdomain_header", &self.subdomain_header)
            .field("basic_grant", &self.basic_grant)
            .field("scope", &self.scope)
            .finish()
    }
}

impl ResolverConfig {
    /// Parsed authorization URL
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] when `auth_url` is missing, does not
    /// parse, or has no host.
    pub fn parsed_auth_url(&self) -> Result<Url> {
        let raw = self.auth_url.as_deref().ok_or_else(|| {
            Error::Configuration("auth_url is required for token exchange".to_string())
        })?;
        let url = Url::parse(raw)
            .map_err(|e| Error::Configuration(format!("invalid auth_url '{raw}': {e}")))?;
        if url.host_str().is_none() {
            return Err(Error::Configuration(format!("auth_url '{raw}' has no host")));
        }
        Ok(url)
    }

    /// Check the values for consistency
    ///
    /// Policy ambiguity is not checked here; it is reported per resolution.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] when an exchanging method is configured
    /// without a usable `auth_url`, when the password grant lacks a service
    /// client, or when the subdomain header name is invalid.
    pub fn validate(&self) -> Result<()> {
        let exchanges = self.methods.iter().any(|m| m.reads_basic_header());
        if exchanges || self.auth_url.is_some() {
            self.parsed_auth_url()?;
        }

        if !self.token_path.starts_with('/') {
            return Err(Error::Configuration(format!(
                "token_path must start with '/', got '{}'",
                self.token_path
            )));
        }

        if self.methods.contains(&AuthenticationMethod::Basic)
            && self.basic_grant == BasicGrant::Password
            && (self.client_id.is_none() || self.client_secret.is_none())
        {
            return Err(Error::Configuration(
                "the password grant requires client_id and client_secret".to_string(),
            ));
        }

        http::HeaderName::from_bytes(self.subdomain_header.as_bytes()).map_err(|_| {
            Error::Configuration(format!(
                "invalid subdomain header name '{}'",
                self.subdomain_header
            ))
        })?;

        Ok(())
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Validation settings
    #[serde(default)]
    pub trust: TrustConfig,
    /// Token response cache settings
    #[serde(default)]
    pub token_cache: TokenCacheConfig,
    /// Token endpoint client settings
    #[serde(default)]
    pub exchange: ExchangeConfig,
    /// Credential resolution settings
    #[serde(default)]
    pub resolver: ResolverConfig,
}

impl EngineConfig {
    /// Check every section
    ///
    /// # Errors
    ///
    /// Returns the first [`Error::Configuration`] found.
    pub fn validate(&self) -> Result<()> {
        self.trust.validate()?;
        self.resolver.validate()
    }
}

fn default_key_set_path() -> String {
    DEFAULT_KEY_SET_PATH.to_string()
}

fn default_key_set_cache_ttl() -> Duration {
    Duration::from_secs(600)
}

fn default_key_set_cache_capacity() -> usize {
    DEFAULT_KEY_SET_CACHE_CAPACITY
}

fn default_fetch_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_algorithms() -> Vec<Algorithm> {
    vec![Algorithm::RS256]
}

fn default_cache_duration() -> Duration {
    Duration::from_secs(600)
}

fn default_max_entries() -> usize {
    1000
}

fn default_exchange_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_token_path() -> String {
    DEFAULT_TOKEN_PATH.to_string()
}

fn default_methods() -> Vec<AuthenticationMethod> {
    vec![AuthenticationMethod::OAuth2]
}

fn default_subdomain_header() -> String {
    DEFAULT_SUBDOMAIN_HEADER.to_string()
}

fn serialize_optional_secret<S>(
    secret: &Option<SecretString>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match secret {
        Some(secret) => serializer.serialize_some(secret.expose_secret()),
        None => serializer.serialize_none(),
    }
}

fn deserialize_optional_secret<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<SecretString>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value: Option<String> = Deserialize::deserialize(deserializer)?;
    Ok(value.map(SecretString::new))
}

/// Durations as whole seconds
mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(value.as_secs())
    }

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();

        assert_eq!(config.trust.key_set_path, "/token_keys");
        assert_eq!(config.trust.key_set_cache_ttl, Duration::from_secs(600));
        assert_eq!(config.trust.key_set_cache_capacity, DEFAULT_KEY_SET_CACHE_CAPACITY);
        assert_eq!(config.trust.algorithms, vec![Algorithm::RS256]);
        assert_eq!(config.token_cache.cache_duration, Duration::from_secs(600));
        assert_eq!(config.exchange.timeout, Duration::from_secs(30));
        assert!(config.exchange.user_agent.starts_with("tokentrust/"));
        assert_eq!(config.resolver.methods, vec![AuthenticationMethod::OAuth2]);
        assert_eq!(config.resolver.subdomain_header, "X-Identity-Zone-Subdomain");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserialize_from_json() {
        let json = serde_json::json!({
            "trust": {
                "client_id": "sb-app",
                "trusted_domain": "auth.example.com",
                "key_set_cache_ttl": 0
            },
            "token_cache": { "cache_duration": 120, "expiry_delta": 30 },
            "resolver": {
                "auth_url": "https://mydomain.auth.com",
                "methods": ["CLIENT_CREDENTIALS", "OAUTH2"],
                "client_secret": "s3cr3t"
            }
        });

        let config: EngineConfig = serde_json::from_value(json).unwrap();
        assert_eq!(config.trust.client_id.as_deref(), Some("sb-app"));
        assert!(config.trust.key_set_cache_ttl.is_zero());
        assert_eq!(config.token_cache.expiry_delta, Duration::from_secs(30));
        assert_eq!(
            config.resolver.methods,
            vec![
                AuthenticationMethod::ClientCredentials,
                AuthenticationMethod::OAuth2
            ]
        );
        assert_eq!(
            config
                .resolver
                .client_secret
                .as_ref()
                .map(|s| s.expose_secret().as_str()),
            Some("s3cr3t")
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_debug_hides_secrets() {
        let config = ResolverConfig {
            client_secret: Some(SecretString::new("hunter2".to_string())),
            ..ResolverConfig::default()
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("hunter2"));

        let trust = TrustConfig::with_verification_key("-----BEGIN PUBLIC KEY-----abc");
        assert!(!format!("{trust:?}").contains("BEGIN PUBLIC KEY"));
    }

    #[test]
    fn test_rejects_symmetric_algorithms() {
        let config = TrustConfig {
            algorithms: vec![Algorithm::RS256, Algorithm::HS256],
            ..TrustConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_rejects_domain_with_scheme() {
        let config = TrustConfig::with_trusted_domain("https://auth.example.com");
        assert!(config.validate().is_err());
        assert!(TrustConfig::with_trusted_domain("auth.example.com").validate().is_ok());
    }

    #[test]
    fn test_exchanging_method_requires_auth_url() {
        let config = ResolverConfig {
            methods: vec![AuthenticationMethod::ClientCredentials],
            ..ResolverConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_password_grant_requires_service_client() {
        let config = ResolverConfig {
            auth_url: Some("https://mydomain.auth.com".to_string()),
            methods: vec![AuthenticationMethod::Basic],
            basic_grant: BasicGrant::Password,
            ..ResolverConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_method_names() {
        let methods: Vec<AuthenticationMethod> =
            serde_json::from_str(r#"["BASIC","OAUTH2","CLIENT_CREDENTIALS"]"#).unwrap();
        assert_eq!(
            methods,
            vec![
                AuthenticationMethod::Basic,
                AuthenticationMethod::OAuth2,
                AuthenticationMethod::ClientCredentials
            ]
        );
        assert_eq!(AuthenticationMethod::OAuth2.to_string(), "OAUTH2");
        assert!(!AuthenticationMethod::OAuth2.reads_basic_header());
    }
}
