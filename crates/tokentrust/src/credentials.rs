//! Credential material carried by an inbound request
//!
//! The resolver only sees headers. `Authorization` may appear more than once;
//! headers are scanned in order and the first one that parses for the method
//! being tried wins.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use http::header::AUTHORIZATION;
use http::{HeaderMap, HeaderName, HeaderValue};
use secrecy::SecretString;

use crate::config::AuthenticationMethod;
use crate::error::{Error, Result};

/// Headers of the request being authenticated
#[derive(Clone, Default)]
pub struct InboundRequest {
    headers: HeaderMap,
}

impl fmt::Debug for InboundRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundRequest")
            .field("header_names", &self.headers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl From<HeaderMap> for InboundRequest {
    fn from(headers: HeaderMap) -> Self {
        Self { headers }
    }
}

impl InboundRequest {
    /// Wrap a header map
    pub fn new(headers: HeaderMap) -> Self {
        Self { headers }
    }

    /// Build from `(name, value)` pairs, keeping their order
    ///
    /// # Errors
    ///
    /// Returns [`Error::ResolutionFailed`] naming the header that is not valid
    /// HTTP. The value is never included.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            let name = name.as_ref();
            let header = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| Error::resolution(format!("invalid header name '{name}'")))?;
            let value = HeaderValue::from_str(value.as_ref())
                .map_err(|_| Error::resolution(format!("invalid value for header '{name}'")))?;
            headers.append(header, value);
        }
        Ok(Self { headers })
    }

    /// All headers
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// First value of `name` that is visible ASCII
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get_all(name)
            .iter()
            .find_map(|value| value.to_str().ok())
    }

    /// `Authorization` values whose scheme is `scheme`, in header order
    fn authorization<'a>(&'a self, scheme: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .get_all(AUTHORIZATION)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .filter_map(move |value| {
                let (found, rest) = value.trim().split_once(char::is_whitespace)?;
                found
                    .eq_ignore_ascii_case(scheme)
                    .then(|| rest.trim())
                    .filter(|rest| !rest.is_empty())
            })
    }

    /// First `Basic` header that decodes to `user:password`
    pub fn basic_credentials(&self) -> Option<(String, SecretString)> {
        self.authorization("Basic").find_map(decode_basic)
    }

    /// First non-empty `Bearer` token
    pub fn bearer_token(&self) -> Option<&str> {
        self.authorization("Bearer").next()
    }
}

fn decode_basic(encoded: &str) -> Option<(String, SecretString)> {
    let bytes = STANDARD.decode(encoded).ok()?;
    let decoded = String::from_utf8(bytes).ok()?;
    let (user, password) = decoded.split_once(':')?;
    if user.is_empty() {
        return None;
    }
    Some((user.to_string(), SecretString::new(password.to_string())))
}

/// Credentials extracted for one authentication method
pub enum CredentialMaterial {
    /// `user:password` from a Basic header
    Basic {
        /// User name
        username: String,
        /// Password
        password: SecretString,
    },
    /// Compact token from a Bearer header
    Bearer(SecretString),
    /// Client id and secret from a Basic header
    ClientCredentials {
        /// Client id
        client_id: String,
        /// Client secret
        client_secret: SecretString,
    },
}

impl fmt::Debug for CredentialMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"****")
                .finish(),
            Self::Bearer(_) => f.debug_tuple("Bearer").field(&"****").finish(),
            Self::ClientCredentials { client_id, .. } => f
                .debug_struct("ClientCredentials")
                .field("client_id", client_id)
                .field("client_secret", &"****")
                .finish(),
        }
    }
}

impl CredentialMaterial {
    /// Material `method` reads from `request`, if any
    pub fn extract(method: AuthenticationMethod, request: &InboundRequest) -> Option<Self> {
        match method {
            AuthenticationMethod::Basic => request
                .basic_credentials()
                .map(|(username, password)| Self::Basic { username, password }),
            AuthenticationMethod::ClientCredentials => {
                request
                    .basic_credentials()
                    .map(|(client_id, client_secret)| Self::ClientCredentials {
                        client_id,
                        client_secret,
                    })
            }
            AuthenticationMethod::OAuth2 => request
                .bearer_token()
                .map(|token| Self::Bearer(SecretString::new(token.to_string()))),
        }
    }
}
