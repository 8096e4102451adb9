//! Credential resolution
//!
//! Walks an ordered policy of [`AuthenticationMethod`]s and returns a bearer
//! token from the first method whose credential material is present in the
//! request. BASIC and CLIENT_CREDENTIALS exchange their credentials at the
//! tenant's token endpoint through the shared [`TokenResponseCache`];
//! OAUTH2 passes the presented bearer token through.
//!
//! BASIC and CLIENT_CREDENTIALS both read the `Authorization: Basic` header.
//! A policy listing both is rejected before any header is looked at.

use std::sync::Arc;

use http::HeaderName;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, warn};
use url::{Host, Url};

use crate::audit::AuditLogger;
use crate::config::{AuthenticationMethod, BasicGrant, ResolverConfig};
use crate::credentials::{CredentialMaterial, InboundRequest};
use crate::error::{Error, Result};
use crate::oauth2::{TokenExchangeClient, TokenRequest, TokenResponseCache};
use crate::types::BearerToken;

/// Resolves inbound credentials to a bearer token
#[derive(Debug)]
pub struct CredentialResolver {
    config: ResolverConfig,
    auth_url: Option<Url>,
    subdomain_header: HeaderName,
    client: TokenExchangeClient,
    cache: Arc<TokenResponseCache>,
}

impl CredentialResolver {
    /// Resolver exchanging through `client` and caching in `cache`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if `config` does not validate.
    pub fn new(
        config: ResolverConfig,
        client: TokenExchangeClient,
        cache: Arc<TokenResponseCache>,
    ) -> Result<Self> {
        config.validate()?;
        let auth_url = config
            .auth_url
            .is_some()
            .then(|| config.parsed_auth_url())
            .transpose()?;
        let subdomain_header = HeaderName::from_bytes(config.subdomain_header.as_bytes())
            .map_err(|_| Error::Configuration("invalid subdomain header name".to_string()))?;

        Ok(Self {
            config,
            auth_url,
            subdomain_header,
            client,
            cache,
        })
    }

    /// Record exchanges through `audit`
    pub fn with_audit(mut self, audit: Arc<AuditLogger>) -> Self {
        self.client = self.client.with_audit(audit);
        self
    }

    /// Configured policy
    pub fn methods(&self) -> &[AuthenticationMethod] {
        &self.config.methods
    }

    /// Resolve `request` with the configured policy
    ///
    /// # Errors
    ///
    /// Same as [`resolve_with`](Self::resolve_with).
    pub async fn resolve(&self, request: &InboundRequest) -> Result<BearerToken> {
        self.resolve_with(request, &self.config.methods).await
    }

    /// Resolve `request` with an explicit policy
    ///
    /// # Errors
    ///
    /// - [`Error::AmbiguousAuthenticationConfiguration`] when two methods in
    ///   `policy` read the same header
    /// - [`Error::ResolutionFailed`] when `policy` is empty, the subdomain
    ///   header is not a host label, or no method finds credentials
    /// - [`Error::Exchange`] when the token endpoint refuses the credentials
    pub async fn resolve_with(
        &self,
        request: &InboundRequest,
        policy: &[AuthenticationMethod],
    ) -> Result<BearerToken> {
        check_policy(policy)?;
        let subdomain = self.subdomain(request)?;

        for &method in policy {
            let Some(material) = CredentialMaterial::extract(method, request) else {
                debug!(method = %method, "No credentials for method");
                continue;
            };
            debug!(method = %method, subdomain = ?subdomain, "Resolving token");
            return self.resolve_material(method, material, subdomain).await;
        }

        warn!(policy = ?policy, "No credentials matched the authentication policy");
        Err(Error::resolution(format!(
            "no credentials found for any of [{}]",
            policy
                .iter()
                .map(|m| m.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        )))
    }

    async fn resolve_material(
        &self,
        method: AuthenticationMethod,
        material: CredentialMaterial,
        subdomain: Option<&str>,
    ) -> Result<BearerToken> {
        let request = match material {
            CredentialMaterial::Bearer(token) => {
                return Ok(BearerToken::passthrough(token.expose_secret().as_str()));
            }
            CredentialMaterial::ClientCredentials {
                client_id,
                client_secret,
            } => TokenRequest::client_credentials(self.endpoint(subdomain)?, client_id, client_secret),
            CredentialMaterial::Basic { username, password } => match self.config.basic_grant {
                BasicGrant::ClientCredentials => {
                    TokenRequest::client_credentials(self.endpoint(subdomain)?, username, password)
                }
                BasicGrant::Password => {
                    let (client_id, client_secret) = self.service_client()?;
                    TokenRequest::password(
                        self.endpoint(subdomain)?,
                        client_id,
                        client_secret,
                        username,
                        password,
                    )
                }
            },
        };

        let request = match &self.config.scope {
            Some(scope) => request.scope(scope.as_str()),
            None => request,
        };
        let request = match subdomain {
            Some(subdomain) => request.subdomain(subdomain),
            None => request,
        };

        let response = self.cache.exchange(&self.client, request).await?;
        Ok(BearerToken::exchanged(method, response))
    }

    fn service_client(&self) -> Result<(String, SecretString)> {
        match (&self.config.client_id, &self.config.client_secret) {
            (Some(id), Some(secret)) => Ok((id.clone(), secret.clone())),
            _ => Err(Error::Configuration(
                "the password grant requires client_id and client_secret".to_string(),
            )),
        }
    }

    fn subdomain<'a>(&self, request: &'a InboundRequest) -> Result<Option<&'a str>> {
        let Some(value) = request
            .header(self.subdomain_header.as_str())
            .map(str::trim)
            .filter(|v| !v.is_empty())
        else {
            return Ok(None);
        };
        if !is_host_label(value) {
            return Err(Error::resolution(format!(
                "header {} does not carry a valid subdomain",
                self.subdomain_header
            )));
        }
        Ok(Some(value))
    }

    fn endpoint(&self, subdomain: Option<&str>) -> Result<Url> {
        let base = self.auth_url.as_ref().ok_or_else(|| {
            Error::Configuration("auth_url is required for token exchange".to_string())
        })?;
        tenant_endpoint(base, subdomain, &self.config.token_path)
    }
}

fn check_policy(policy: &[AuthenticationMethod]) -> Result<()> {
    if policy.is_empty() {
        return Err(Error::resolution("authentication policy is empty"));
    }

    let mut readers = policy.iter().filter(|m| m.reads_basic_header());
    if let Some(&first) = readers.next()
        && let Some(&second) = readers.find(|&&m| m != first)
    {
        return Err(Error::AmbiguousAuthenticationConfiguration { first, second });
    }
    Ok(())
}

/// Token endpoint of `subdomain`
///
/// The first label of the base host is replaced by the subdomain; IP hosts and
/// single-label hosts are used as they are.
///
/// # Errors
///
/// Returns [`Error::ResolutionFailed`] if the resulting host is not valid.
pub fn tenant_endpoint(base: &Url, subdomain: Option<&str>, token_path: &str) -> Result<Url> {
    let mut url = base.clone();

    if let (Some(subdomain), Some(Host::Domain(host))) = (subdomain, base.host())
        && let Some((_, parent)) = host.split_once('.')
    {
        url.set_host(Some(format!("{subdomain}.{parent}").as_str()))
            .map_err(|e| Error::resolution(format!("invalid tenant host: {e}")))?;
    }

    let path = format!("{}{}", base.path().trim_end_matches('/'), token_path);
    url.set_path(&path);
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

fn is_host_label(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= 63
        && !value.starts_with('-')
        && !value.ends_with('-')
        && value.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExchangeConfig, TokenCacheConfig};
    use crate::http_client::build_client;

    fn base() -> Url {
        Url::parse("https://mydomain.auth.com").unwrap()
    }

    fn resolver(methods: Vec<AuthenticationMethod>) -> CredentialResolver {
        let config = ResolverConfig {
            auth_url: Some("https://mydomain.auth.com".to_string()),
            methods,
            ..ResolverConfig::default()
        };
        CredentialResolver::new(
            config,
            TokenExchangeClient::new(build_client(None).unwrap(), ExchangeConfig::default()),
            Arc::new(TokenResponseCache::new(TokenCacheConfig::default())),
        )
        .unwrap()
    }

    #[test]
    fn test_tenant_endpoint_replaces_first_label() {
        let url = tenant_endpoint(&base(), Some("other"), "/oauth/token").unwrap();
        assert_eq!(url.as_str(), "https://other.auth.com/oauth/token");

        let url = tenant_endpoint(&base(), None, "/oauth/token").unwrap();
        assert_eq!(url.as_str(), "https://mydomain.auth.com/oauth/token");
    }

    #[test]
    fn test_tenant_endpoint_keeps_ip_and_single_label_hosts() {
        let ip = Url::parse("http://127.0.0.1:8080/").unwrap();
        assert_eq!(
            tenant_endpoint(&ip, Some("other"), "/oauth/token").unwrap().as_str(),
            "http://127.0.0.1:8080/oauth/token"
        );

        let single = Url::parse("http://localhost:8080").unwrap();
        assert_eq!(
            tenant_endpoint(&single, Some("other"), "/oauth/token").unwrap().as_str(),
            "http://localhost:8080/oauth/token"
        );
    }

    #[test]
    fn test_tenant_endpoint_appends_to_base_path() {
        let prefixed = Url::parse("https://mydomain.auth.com/uaa/").unwrap();
        assert_eq!(
            tenant_endpoint(&prefixed, None, "/oauth/token").unwrap().as_str(),
            "https://mydomain.auth.com/uaa/oauth/token"
        );
    }

    #[test]
    fn test_policy_checks() {
        use AuthenticationMethod::*;

        assert!(check_policy(&[OAuth2, ClientCredentials]).is_ok());
        assert!(check_policy(&[Basic, OAuth2, Basic]).is_ok());
        assert!(matches!(
            check_policy(&[]),
            Err(Error::ResolutionFailed { .. })
        ));
        assert!(matches!(
            check_policy(&[Basic, OAuth2, ClientCredentials]),
            Err(Error::AmbiguousAuthenticationConfiguration {
                first: Basic,
                second: ClientCredentials
            })
        ));
    }

    #[test]
    fn test_host_labels() {
        assert!(is_host_label("tenant-1"));
        assert!(!is_host_label("-tenant"));
        assert!(!is_host_label("a.b"));
        assert!(!is_host_label("evil.com/"));
        assert!(!is_host_label(&"a".repeat(64)));
    }

    #[tokio::test]
    async fn test_bearer_passthrough() {
        let resolver = resolver(vec![AuthenticationMethod::OAuth2]);
        let request = InboundRequest::from_pairs([("Authorization", "Bearer eyJ.x.y")]).unwrap();

        let token = resolver.resolve(&request).await.unwrap();
        assert_eq!(token.as_str(), "eyJ.x.y");
        assert_eq!(token.method(), AuthenticationMethod::OAuth2);
        assert!(token.response().is_none());
    }

    #[tokio::test]
    async fn test_no_material_fails() {
        let resolver = resolver(vec![AuthenticationMethod::OAuth2]);
        let err = resolver
            .resolve(&InboundRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ResolutionFailed { .. }));
        assert!(err.to_string().contains("OAUTH2"));
    }

    #[tokio::test]
    async fn test_invalid_subdomain_fails() {
        let resolver = resolver(vec![AuthenticationMethod::OAuth2]);
        let request = InboundRequest::from_pairs([
            ("Authorization", "Bearer eyJ.x.y"),
            ("X-Identity-Zone-Subdomain", "evil.com"),
        ])
        .unwrap();
        let err = resolver.resolve(&request).await.unwrap_err();
        assert!(matches!(err, Error::ResolutionFailed { .. }));
    }
}
