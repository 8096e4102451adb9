//! Engine facade
//!
//! One [`TrustEngine`] owns one key cache, one token response cache and one
//! HTTP client. Engines never share cache state, so a process may run one per
//! tenant.

use std::sync::Arc;

use tracing::info;

use crate::audit::AuditLogger;
use crate::config::EngineConfig;
use crate::credentials::InboundRequest;
use crate::error::Result;
use crate::http_client::build_client;
use crate::jwt::{HttpKeySetFetcher, KeyCache, KeySetFetcher, TokenValidator, ValidatedToken};
use crate::oauth2::{TokenExchangeClient, TokenResponseCache};
use crate::resolver::CredentialResolver;
use crate::types::BearerToken;

/// Token validation and credential resolution for one configuration
#[derive(Debug)]
pub struct TrustEngine {
    validator: TokenValidator,
    resolver: CredentialResolver,
    key_cache: Arc<KeyCache>,
    token_cache: Arc<TokenResponseCache>,
}

impl TrustEngine {
    /// Build an engine that fetches key sets over HTTPS
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`](crate::Error::Configuration) when the
    /// configuration does not validate and [`Error::Http`](crate::Error::Http)
    /// when the HTTP client cannot be built.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let http = build_client(Some(&config.exchange.user_agent))?;
        let fetcher = Arc::new(HttpKeySetFetcher::new(http.clone(), config.trust.fetch_timeout));
        Self::assemble(config, http, fetcher)
    }

    /// Build an engine that obtains key sets from `fetcher`
    ///
    /// # Errors
    ///
    /// As for [`TrustEngine::new`].
    pub fn with_fetcher(config: EngineConfig, fetcher: Arc<dyn KeySetFetcher>) -> Result<Self> {
        let http = build_client(Some(&config.exchange.user_agent))?;
        Self::assemble(config, http, fetcher)
    }

    fn assemble(
        config: EngineConfig,
        http: reqwest::Client,
        fetcher: Arc<dyn KeySetFetcher>,
    ) -> Result<Self> {
        config.validate()?;
        let audit = Arc::new(AuditLogger::default());

        let key_cache = Arc::new(
            KeyCache::with_capacity(
                fetcher,
                config.trust.key_set_cache_ttl,
                config.trust.key_set_cache_capacity,
            )
            .with_audit(Arc::clone(&audit)),
        );
        let validator =
            TokenValidator::new(&config.trust, Arc::clone(&key_cache))?.with_audit(Arc::clone(&audit));

        let token_cache = Arc::new(TokenResponseCache::new(config.token_cache.clone()));
        let client = TokenExchangeClient::new(http, config.exchange.clone());
        let resolver = CredentialResolver::new(config.resolver, client, Arc::clone(&token_cache))?
            .with_audit(audit);

        info!(
            trusted_domain = ?config.trust.trusted_domain,
            fallback_key = config.trust.verification_key.is_some(),
            methods = ?resolver.methods(),
            "Trust engine ready"
        );

        Ok(Self {
            validator,
            resolver,
            key_cache,
            token_cache,
        })
    }

    /// Validate a compact token
    ///
    /// # Errors
    ///
    /// See [`TokenValidator::decode`].
    pub async fn validate(&self, raw: &str) -> Result<ValidatedToken> {
        self.validator.decode(raw).await
    }

    /// Obtain a bearer token for an inbound request
    ///
    /// # Errors
    ///
    /// See [`CredentialResolver::resolve`].
    pub async fn resolve(&self, request: &InboundRequest) -> Result<BearerToken> {
        self.resolver.resolve(request).await
    }

    /// Obtain a bearer token for `request` and validate it
    ///
    /// # Errors
    ///
    /// The resolution error, or the validation error of the obtained token.
    pub async fn resolve_and_validate(&self, request: &InboundRequest) -> Result<ValidatedToken> {
        let token = self.resolve(request).await?;
        self.validate(token.as_str()).await
    }

    /// Validator
    pub fn validator(&self) -> &TokenValidator {
        &self.validator
    }

    /// Resolver
    pub fn resolver(&self) -> &CredentialResolver {
        &self.resolver
    }

    /// Key-set cache
    pub fn key_cache(&self) -> &KeyCache {
        &self.key_cache
    }

    /// Token response cache
    pub fn token_cache(&self) -> &TokenResponseCache {
        &self.token_cache
    }
}
