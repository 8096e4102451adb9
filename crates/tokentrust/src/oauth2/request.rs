//! Token endpoint requests
//!
//! A [`TokenRequest`] is built fresh for every exchange and never cached.
//! Secret parameters stay wrapped in [`SecretString`] until the form body is
//! assembled, and [`MaskedParameters`] is the only way parameters reach a log.

use std::collections::BTreeMap;
use std::fmt;

use http::{HeaderMap, HeaderName, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use url::Url;

use super::GrantType;
use crate::error::{Error, Result};

/// Replacement for secret values in diagnostic output
pub const MASK: &str = "****";

/// Form field names
pub mod param {
    /// `grant_type`
    pub const GRANT_TYPE: &str = "grant_type";
    /// `client_id`
    pub const CLIENT_ID: &str = "client_id";
    /// `client_secret`
    pub const CLIENT_SECRET: &str = "client_secret";
    /// `username`
    pub const USERNAME: &str = "username";
    /// `password`
    pub const PASSWORD: &str = "password";
    /// `assertion`
    pub const ASSERTION: &str = "assertion";
    /// `refresh_token`
    pub const REFRESH_TOKEN: &str = "refresh_token";
    /// `scope`
    pub const SCOPE: &str = "scope";
    /// `response_type`
    pub const RESPONSE_TYPE: &str = "response_type";
}

/// Whether values under `key` are secret
///
/// Matches by substring, so `client_secret`, `new_password` and
/// `client_assertion` are all covered.
pub fn is_secret_key(key: &str) -> bool {
    key.contains(param::PASSWORD)
        || key.contains(param::CLIENT_SECRET)
        || key.contains(param::ASSERTION)
}

/// A form parameter value
#[derive(Clone)]
pub enum ParamValue {
    /// Value that may be logged
    Plain(String),
    /// Value that must never be logged
    Secret(SecretString),
}

impl ParamValue {
    pub(crate) fn expose(&self) -> &str {
        match self {
            Self::Plain(value) => value,
            Self::Secret(secret) => secret.expose_secret(),
        }
    }

    /// Whether the value is secret
    pub fn is_secret(&self) -> bool {
        matches!(self, Self::Secret(_))
    }
}

impl fmt::Debug for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plain(value) => fmt::Debug::fmt(value, f),
            Self::Secret(_) => f.write_str(MASK),
        }
    }
}

/// A request against a token endpoint
#[derive(Debug, Clone)]
pub struct TokenRequest {
    grant_type: GrantType,
    endpoint: Url,
    params: BTreeMap<String, ParamValue>,
    headers: HeaderMap,
    correlation_id: Option<String>,
    subdomain: Option<String>,
}

impl TokenRequest {
    /// Request with only `grant_type` set
    pub fn new(grant_type: GrantType, endpoint: Url) -> Self {
        let mut params = BTreeMap::new();
        params.insert(
            param::GRANT_TYPE.to_string(),
            ParamValue::Plain(grant_type.as_str().to_string()),
        );
        Self {
            grant_type,
            endpoint,
            params,
            headers: HeaderMap::new(),
            correlation_id: None,
            subdomain: None,
        }
    }

    /// `client_credentials` grant
    pub fn client_credentials(
        endpoint: Url,
        client_id: impl Into<String>,
        client_secret: SecretString,
    ) -> Self {
        Self::new(GrantType::ClientCredentials, endpoint).with_client(client_id, client_secret)
    }

    /// `password` grant for a resource owner
    pub fn password(
        endpoint: Url,
        client_id: impl Into<String>,
        client_secret: SecretString,
        username: impl Into<String>,
        password: SecretString,
    ) -> Self {
        Self::new(GrantType::Password, endpoint)
            .with_client(client_id, client_secret)
            .param(param::USERNAME, username)
            .secret(param::PASSWORD, password)
    }

    /// JWT bearer grant (RFC 7523) exchanging `assertion`
    pub fn jwt_bearer(
        endpoint: Url,
        client_id: impl Into<String>,
        client_secret: SecretString,
        assertion: SecretString,
    ) -> Self {
        Self::new(GrantType::JwtBearer, endpoint)
            .with_client(client_id, client_secret)
            .secret(param::ASSERTION, assertion)
            .param(param::RESPONSE_TYPE, "token")
    }

    /// `refresh_token` grant
    pub fn refresh(
        endpoint: Url,
        client_id: impl Into<String>,
        client_secret: SecretString,
        refresh_token: SecretString,
    ) -> Self {
        Self::new(GrantType::RefreshToken, endpoint)
            .with_client(client_id, client_secret)
            .secret(param::REFRESH_TOKEN, refresh_token)
    }

    fn with_client(self, client_id: impl Into<String>, client_secret: SecretString) -> Self {
        self.param(param::CLIENT_ID, client_id)
            .secret(param::CLIENT_SECRET, client_secret)
    }

    /// Add a parameter; values under secret keys are stored as secrets
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = value.into();
        let value = if is_secret_key(&key) {
            ParamValue::Secret(SecretString::new(value))
        } else {
            ParamValue::Plain(value)
        };
        self.params.insert(key, value);
        self
    }

    /// Add a secret parameter
    pub fn secret(mut self, key: impl Into<String>, value: SecretString) -> Self {
        self.params.insert(key.into(), ParamValue::Secret(value));
        self
    }

    /// Set the requested scope
    pub fn scope(self, scope: impl Into<String>) -> Self {
        self.param(param::SCOPE, scope)
    }

    /// Tenant subdomain the request is made for
    ///
    /// Not sent as a form field; it selects the endpoint and separates cache
    /// entries.
    pub fn subdomain(mut self, subdomain: impl Into<String>) -> Self {
        self.subdomain = Some(subdomain.into());
        self
    }

    /// Reuse a correlation id instead of generating one
    pub fn correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Add a request header
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the name or value is not a valid
    /// HTTP header.
    pub fn header(mut self, name: &str, value: &str) -> Result<Self> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| Error::Configuration(format!("invalid header name '{name}'")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| Error::Configuration(format!("invalid value for header '{name}'")))?;
        self.headers.append(name, value);
        Ok(self)
    }

    /// Grant type
    pub fn grant_type(&self) -> GrantType {
        self.grant_type
    }

    /// Token endpoint
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Parameter by key
    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.params.get(key)
    }

    /// Plain parameter value by key, `None` for secrets
    pub fn plain(&self, key: &str) -> Option<&str> {
        match self.params.get(key) {
            Some(ParamValue::Plain(value)) => Some(value),
            _ => None,
        }
    }

    /// Parameters in key order
    pub fn params(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Extra request headers
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Caller-supplied correlation id
    pub fn get_correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    /// Tenant subdomain
    pub fn get_subdomain(&self) -> Option<&str> {
        self.subdomain.as_deref()
    }

    /// Parameters for logging
    pub fn masked(&self) -> MaskedParameters<'_> {
        MaskedParameters(&self.params)
    }

    pub(crate) fn form(&self) -> Vec<(&str, &str)> {
        self.params
            .iter()
            .map(|(k, v)| (k.as_str(), v.expose()))
            .collect()
    }
}

/// `Display` view of request parameters with secret values masked
pub struct MaskedParameters<'a>(&'a BTreeMap<String, ParamValue>);

impl fmt::Display for MaskedParameters<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (key, value)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            if value.is_secret() || is_secret_key(key) {
                write!(f, "{key}={MASK}")?;
            } else {
                write!(f, "{key}={}", value.expose())?;
            }
        }
        f.write_str("}")
    }
}
