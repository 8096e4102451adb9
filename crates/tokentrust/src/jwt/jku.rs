//! Trust check for the `jku` key-set locator
//!
//! The locator comes from the token header, so it is attacker controlled
//! until proven otherwise. A locator is trusted only when all of these hold:
//!
//! 1. The scheme is `https` ([`Error::InsecureScheme`] otherwise)
//! 2. There is no user-info component, such as `https://trusted@evil/`
//!    ([`Error::UntrustedDomain`])
//! 3. The host is the trusted domain or a subdomain of it, compared on a dot
//!    boundary and case-insensitively, on the default port
//!    ([`Error::UntrustedDomain`])
//! 4. The path is exactly the key-set path, with no traversal sequences
//!    ([`Error::InvalidKeyEndpoint`])
//! 5. There is no query and no fragment ([`Error::InvalidKeyEndpoint`])
//!
//! Only a [`TrustedKeySetRef`] can be handed to a key-set fetcher, and the
//! only way to obtain one is [`JkuTrustPolicy::resolve`].

use std::fmt;

use url::{Host, Url};

use crate::config::{DEFAULT_KEY_SET_PATH, TrustConfig};
use crate::error::{Error, Result};

/// A key-set locator that passed every trust check
///
/// Holds the normalized form (`https://host/path`), which also serves as the
/// key-set cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrustedKeySetRef {
    url: Url,
}

impl TrustedKeySetRef {
    /// Normalized locator
    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    /// Normalized locator as a URL
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Host the key set is served from
    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    #[cfg(test)]
    pub(crate) fn for_tests(raw: &str) -> Self {
        Self {
            url: Url::parse(raw).unwrap(),
        }
    }
}

impl fmt::Display for TrustedKeySetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trusted domain and key-set path against which locators are checked
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JkuTrustPolicy {
    trusted_domain: String,
    key_set_path: String,
}

impl JkuTrustPolicy {
    /// Policy for `trusted_domain` with the default `/token_keys` path
    pub fn new(trusted_domain: impl AsRef<str>) -> Self {
        Self::with_path(trusted_domain, DEFAULT_KEY_SET_PATH)
    }

    /// Policy with a custom key-set path
    pub fn with_path(trusted_domain: impl AsRef<str>, key_set_path: impl Into<String>) -> Self {
        Self {
            trusted_domain: normalize_host(trusted_domain.as_ref()),
            key_set_path: key_set_path.into(),
        }
    }

    /// Policy from configuration, `None` when no trusted domain is set
    pub fn from_config(config: &TrustConfig) -> Option<Self> {
        config
            .trusted_domain
            .as_deref()
            .filter(|domain| !domain.trim().is_empty())
            .map(|domain| Self::with_path(domain, config.key_set_path.clone()))
    }

    /// Trusted base domain, lowercase
    pub fn trusted_domain(&self) -> &str {
        &self.trusted_domain
    }

    /// Check an untrusted locator
    ///
    /// No network access happens here.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InsecureScheme`], [`Error::UntrustedDomain`] or
    /// [`Error::InvalidKeyEndpoint`] for the first violated rule.
    pub fn resolve(&self, locator: &str) -> Result<TrustedKeySetRef> {
        // The URL parser silently strips whitespace and turns '\' into '/'
        if locator
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || c == '\\')
        {
            return Err(Error::untrusted(
                "locator contains whitespace, control characters or backslashes",
            ));
        }

        let url = Url::parse(locator)
            .map_err(|e| Error::invalid_endpoint(format!("locator is not a valid URL: {e}")))?;

        if url.scheme() != "https" {
            return Err(Error::InsecureScheme {
                scheme: url.scheme().to_string(),
            });
        }

        if !url.username().is_empty() || url.password().is_some() {
            return Err(Error::untrusted("locator carries user info"));
        }

        let host = match url.host() {
            Some(Host::Domain(domain)) => normalize_host(domain),
            Some(Host::Ipv4(_) | Host::Ipv6(_)) => {
                return Err(Error::untrusted("locator host is an IP address"));
            }
            None => return Err(Error::untrusted("locator has no host")),
        };

        if !self.is_trusted_host(&host) {
            return Err(Error::untrusted(format!(
                "host '{host}' is not part of trusted domain '{}'",
                self.trusted_domain
            )));
        }

        if let Some(port) = url.port() {
            return Err(Error::untrusted(format!("locator uses non-default port {port}")));
        }

        // Traversal is checked on the raw text, the parser has already
        // collapsed dot segments in `url.path()`
        let lowered = locator.to_ascii_lowercase();
        if lowered.contains("..") || lowered.contains("%2e") || lowered.contains("%2f") {
            return Err(Error::invalid_endpoint("locator contains path traversal sequences"));
        }

        if url.path() != self.key_set_path {
            return Err(Error::invalid_endpoint(format!(
                "path '{}' is not the key-set endpoint '{}'",
                url.path(),
                self.key_set_path
            )));
        }

        if url.query().is_some() {
            return Err(Error::invalid_endpoint("locator carries a query string"));
        }

        if url.fragment().is_some() {
            return Err(Error::invalid_endpoint("locator carries a fragment"));
        }

        let normalized = format!("https://{host}{}", self.key_set_path);
        let url = Url::parse(&normalized)
            .map_err(|e| Error::invalid_endpoint(format!("cannot normalize locator: {e}")))?;

        Ok(TrustedKeySetRef { url })
    }

    fn is_trusted_host(&self, host: &str) -> bool {
        host == self.trusted_domain
            || host
                .strip_suffix(self.trusted_domain.as_str())
                .is_some_and(|prefix| prefix.len() > 1 && prefix.ends_with('.'))
    }
}

fn normalize_host(host: &str) -> String {
    host.trim().trim_end_matches('.').to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn policy() -> JkuTrustPolicy {
        JkuTrustPolicy::new("auth.example.com")
    }

    fn kind(locator: &str) -> ErrorKind {
        policy().resolve(locator).unwrap_err().kind()
    }

    #[test]
    fn test_accepts_trusted_domain_and_subdomains() {
        let trusted = policy()
            .resolve("https://auth.example.com/token_keys")
            .unwrap();
        assert_eq!(trusted.as_str(), "https://auth.example.com/token_keys");

        let sub = policy()
            .resolve("https://Tenant-1.AUTH.example.com/token_keys")
            .unwrap();
        assert_eq!(sub.as_str(), "https://tenant-1.auth.example.com/token_keys");
        assert_eq!(sub.host(), "tenant-1.auth.example.com");
    }

    #[test]
    fn test_default_port_is_normalized_away() {
        let trusted = policy()
            .resolve("https://auth.example.com:443/token_keys")
            .unwrap();
        assert_eq!(trusted.as_str(), "https://auth.example.com/token_keys");
    }

    #[test]
    fn test_rejects_insecure_scheme() {
        assert_eq!(kind("http://auth.example.com/token_keys"), ErrorKind::InsecureScheme);
        assert_eq!(kind("file:///token_keys"), ErrorKind::InsecureScheme);
    }

    #[test]
    fn test_rejects_foreign_hosts() {
        for locator in [
            "https://evil.example.com/token_keys",
            "https://example.com/token_keys",
            "https://notauth.example.com/token_keys",
            "https://auth.example.com.evil.com/token_keys",
            "https://auth.example.comevil.com/token_keys",
            "https://127.0.0.1/token_keys",
            "https://[::1]/token_keys",
        ] {
            assert_eq!(kind(locator), ErrorKind::UntrustedDomain, "{locator}");
        }
    }

    #[test]
    fn test_rejects_user_info_spoof() {
        assert_eq!(
            kind("https://auth.example.com@evil.com/token_keys"),
            ErrorKind::UntrustedDomain
        );
        assert_eq!(
            kind("https://user:pw@auth.example.com/token_keys"),
            ErrorKind::UntrustedDomain
        );
        assert_eq!(
            kind("https://evil.com\\@auth.example.com/token_keys"),
            ErrorKind::UntrustedDomain
        );
    }

    #[test]
    fn test_rejects_non_default_port() {
        assert_eq!(
            kind("https://auth.example.com:8443/token_keys"),
            ErrorKind::UntrustedDomain
        );
    }

    #[test]
    fn test_rejects_wrong_paths() {
        for locator in [
            "https://auth.example.com/token_keys/extra",
            "https://auth.example.com/other",
            "https://auth.example.com/",
            "https://auth.example.com",
            "https://auth.example.com/a/../token_keys",
            "https://auth.example.com/%2e%2e/token_keys",
            "https://auth.example.com/token_keys%2F..",
            "https://auth.example.com/TOKEN_KEYS",
        ] {
            assert_eq!(kind(locator), ErrorKind::InvalidKeyEndpoint, "{locator}");
        }
    }

    #[test]
    fn test_rejects_query_and_fragment() {
        assert_eq!(
            kind("https://auth.example.com/token_keys?redirect=evil"),
            ErrorKind::InvalidKeyEndpoint
        );
        assert_eq!(
            kind("https://auth.example.com/token_keys?"),
            ErrorKind::InvalidKeyEndpoint
        );
        assert_eq!(
            kind("https://auth.example.com/token_keys#frag"),
            ErrorKind::InvalidKeyEndpoint
        );
    }

    #[test]
    fn test_custom_key_set_path() {
        let policy = JkuTrustPolicy::with_path("auth.example.com", "/oauth/keys");
        assert!(policy.resolve("https://auth.example.com/oauth/keys").is_ok());
        assert!(policy.resolve("https://auth.example.com/token_keys").is_err());
    }

    #[test]
    fn test_from_config() {
        assert!(JkuTrustPolicy::from_config(&TrustConfig::default()).is_none());

        let config = TrustConfig::with_trusted_domain("Auth.Example.com.");
        let policy = JkuTrustPolicy::from_config(&config).unwrap();
        assert_eq!(policy.trusted_domain(), "auth.example.com");
    }
}
