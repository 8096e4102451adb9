//! Compact token parsing and validation
//!
//! # Architecture
//!
//! ```text
//! raw token ──► Token::parse ──► TokenValidator ──► ValidatedToken
//!                                    │
//!                       ┌────────────┴────────────┐
//!                       ▼                         ▼
//!               fallback PEM key        jku ─► JkuTrustPolicy
//!                                                 │ TrustedKeySetRef
//!                                                 ▼
//!                                             KeyCache ─► KeySetFetcher
//! ```
//!
//! # Modules
//!
//! - `jku` - trust check for the key-set locator in the token header
//! - `jwks` - key-set fetching and the single-flight key cache
//! - `validator` - the decode state machine

pub mod jku;
pub mod jwks;
pub mod validator;

pub use jku::{JkuTrustPolicy, TrustedKeySetRef};
pub use jwks::{CachedKeySet, HttpKeySetFetcher, KeyCache, KeySetFetcher};
pub use validator::TokenValidator;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use jsonwebtoken::Algorithm;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};
use crate::oauth2::GrantType;

/// Where the key that verified a token came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyProvenance {
    /// Key set fetched from a trusted `jku` locator
    Fetched,
    /// Static verification key from the configuration
    Fallback,
}

impl KeyProvenance {
    /// Lowercase label
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fetched => "fetched",
            Self::Fallback => "fallback",
        }
    }
}

impl fmt::Display for KeyProvenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoded JOSE header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenHeader {
    /// Signature algorithm (`alg`)
    pub algorithm: Algorithm,
    /// Key id (`kid`)
    pub key_id: Option<String>,
    /// Untrusted key-set locator (`jku`)
    pub key_set_url: Option<String>,
    /// Media type (`typ`)
    pub token_type: Option<String>,
}

#[derive(Deserialize)]
struct RawHeader {
    alg: String,
    #[serde(default)]
    kid: Option<String>,
    #[serde(default)]
    jku: Option<String>,
    #[serde(default)]
    typ: Option<String>,
}

/// Decoded claim set
///
/// Registered claims and the client-id variants get their own fields;
/// everything else lands in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Issuer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    /// Subject
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    /// Audience, a single string in the token becomes a one-element list
    #[serde(
        default,
        deserialize_with = "one_or_many",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub aud: Vec<String>,
    /// Issued at, seconds since the epoch
    #[serde(
        default,
        deserialize_with = "numeric_date",
        skip_serializing_if = "Option::is_none"
    )]
    pub iat: Option<i64>,
    /// Expiry, seconds since the epoch
    #[serde(
        default,
        deserialize_with = "numeric_date",
        skip_serializing_if = "Option::is_none"
    )]
    pub exp: Option<i64>,
    /// Client id (identity-zone style)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
    /// Client id (RFC 9068 style)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Authorized party (OIDC)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azp: Option<String>,
    /// Extension attributes
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// A parsed compact token
///
/// Parsing checks structure only; use [`TokenValidator`] to establish trust.
#[derive(Clone)]
pub struct Token {
    raw: String,
    header: TokenHeader,
    claims: TokenClaims,
    expires_at: Option<DateTime<Utc>>,
    signature: Vec<u8>,
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The raw form is a bearer credential
        f.debug_struct("Token")
            .field("header", &self.header)
            .field("claims", &self.claims)
            .field("raw", &"<redacted>")
            .finish()
    }
}

impl Token {
    /// Split and decode a compact serialization
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedToken`] if the token does not have three
    /// base64url segments, if the header or claims are not JSON objects, or if
    /// the header names an unknown algorithm (including `none`).
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let mut segments = raw.split('.');
        let (Some(header_b64), Some(claims_b64), Some(signature_b64), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(Error::malformed("expected three dot-separated segments"));
        };

        let header_json = decode_segment(header_b64, "header")?;
        let raw_header: RawHeader = serde_json::from_slice(&header_json)
            .map_err(|e| Error::malformed(format!("invalid header: {e}")))?;
        let algorithm = Algorithm::from_str(&raw_header.alg)
            .map_err(|_| Error::malformed(format!("unsupported algorithm '{}'", raw_header.alg)))?;

        let claims_json = decode_segment(claims_b64, "claims")?;
        let claims: TokenClaims = serde_json::from_slice(&claims_json)
            .map_err(|e| Error::malformed(format!("invalid claims: {e}")))?;
        let expiry: RawExpiry = serde_json::from_slice(&claims_json)
            .map_err(|e| Error::malformed(format!("invalid claims: {e}")))?;

        let signature = decode_segment(signature_b64, "signature")?;
        if signature.is_empty() {
            return Err(Error::malformed("empty signature"));
        }

        Ok(Self {
            raw: raw.to_string(),
            header: TokenHeader {
                algorithm,
                key_id: raw_header.kid,
                key_set_url: raw_header.jku,
                token_type: raw_header.typ,
            },
            claims,
            expires_at: expiry.exp.as_ref().and_then(instant_of),
            signature,
        })
    }

    /// Decoded header
    pub fn header(&self) -> &TokenHeader {
        &self.header
    }

    /// Decoded claims
    pub fn claims(&self) -> &TokenClaims {
        &self.claims
    }

    /// Compact serialization as received
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Raw signature bytes
    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    /// Client id from `cid`, then `client_id`, then `azp`
    pub fn client_id(&self) -> Option<&str> {
        self.claims
            .cid
            .as_deref()
            .or(self.claims.client_id.as_deref())
            .or(self.claims.azp.as_deref())
    }

    /// Subject claim
    pub fn subject(&self) -> Option<&str> {
        self.claims.sub.as_deref()
    }

    /// Expiry as a timestamp, keeping any fractional seconds of `exp`
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Identity zone (`zid`)
    pub fn zone_id(&self) -> Option<&str> {
        self.claim("zid").and_then(serde_json::Value::as_str)
    }

    /// Scopes from the `scope` claim, either an array or a space-separated string
    pub fn scopes(&self) -> Vec<String> {
        match self.claim("scope") {
            Some(serde_json::Value::Array(values)) => values
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            Some(serde_json::Value::String(s)) => {
                s.split_whitespace().map(str::to_string).collect()
            }
            _ => Vec::new(),
        }
    }

    /// Grant the token was issued for
    pub fn grant_type(&self) -> Option<GrantType> {
        self.claim("grant_type")
            .and_then(serde_json::Value::as_str)
            .and_then(|s| s.parse().ok())
    }

    /// Extension attribute by name
    pub fn claim(&self, name: &str) -> Option<&serde_json::Value> {
        self.claims.extra.get(name)
    }
}

/// A token that passed every validation step
#[derive(Debug, Clone)]
pub struct ValidatedToken {
    token: Token,
    provenance: KeyProvenance,
}

impl ValidatedToken {
    pub(crate) fn new(token: Token, provenance: KeyProvenance) -> Self {
        Self { token, provenance }
    }

    /// The accepted token
    pub fn token(&self) -> &Token {
        &self.token
    }

    /// Source of the verifying key
    pub fn provenance(&self) -> KeyProvenance {
        self.provenance
    }

    /// Consume into the token
    pub fn into_token(self) -> Token {
        self.token
    }
}

impl std::ops::Deref for ValidatedToken {
    type Target = Token;

    fn deref(&self) -> &Token {
        &self.token
    }
}

fn decode_segment(segment: &str, what: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(segment.trim_end_matches('='))
        .map_err(|e| Error::malformed(format!("{what} is not base64url: {e}")))
}

fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        Some(OneOrMany::One(value)) => vec![value],
        Some(OneOrMany::Many(values)) => values,
        None => Vec::new(),
    })
}

#[derive(Deserialize)]
struct RawExpiry {
    #[serde(default)]
    exp: Option<serde_json::Number>,
}

fn instant_of(n: &serde_json::Number) -> Option<DateTime<Utc>> {
    if let Some(secs) = n.as_i64() {
        return DateTime::from_timestamp(secs, 0);
    }
    let value = n.as_f64()?;
    let secs = value.floor();
    let nanos = ((value - secs) * 1e9) as u32;
    DateTime::from_timestamp(secs as i64, nanos)
}

fn numeric_date<'de, D>(deserializer: D) -> std::result::Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Number>::deserialize(deserializer)?;
    value
        .map(|n| {
            n.as_i64()
                .or_else(|| n.as_f64().map(|f| f.floor() as i64))
                .ok_or_else(|| serde::de::Error::custom("numeric date out of range"))
        })
        .transpose()
}
