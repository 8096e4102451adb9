//! Error taxonomy for token validation, key-set trust and token exchange
//!
//! Every failure the engine can produce is one variant of [`Error`]. All of
//! them are fail-closed: a caller holding an `Err` must treat the token or the
//! credential as rejected.
//!
//! Secrets (passwords, client secrets, assertions) are never formatted into
//! an error. Only non-secret context such as endpoints, status codes, header
//! names and key-set locators is carried.

use thiserror::Error;

use crate::config::AuthenticationMethod;
use crate::jwt::KeyProvenance;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the trust engine
///
/// `Error` is `Clone` so that a single outcome of a coalesced fetch or
/// exchange can be handed to every waiter.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The compact serialization, the header JSON or the claim set is invalid
    #[error("Malformed token: {0}")]
    MalformedToken(String),

    /// The key-set locator does not use https
    #[error("Key set locator uses insecure scheme '{scheme}' (only https is permitted)")]
    InsecureScheme {
        /// Scheme found in the locator
        scheme: String,
    },

    /// The key-set locator points outside the trusted domain
    #[error("Do not trust 'jku' token header: {reason}")]
    UntrustedDomain {
        /// Why the host was rejected
        reason: String,
    },

    /// The key-set locator does not address the configured key-set endpoint
    #[error("Token does not contain a valid 'jku' header parameter: {reason}")]
    InvalidKeyEndpoint {
        /// Why the endpoint was rejected
        reason: String,
    },

    /// Neither a fallback key nor a trusted locator is available
    #[error("No trusted key source: {0}")]
    NoTrustedKeySource(String),

    /// Signature verification failed under the resolved key
    #[error("Signature invalid (verified using {provenance} key): {reason}")]
    SignatureInvalid {
        /// Which key source was used for the failed verification
        provenance: KeyProvenance,
        /// Failure detail
        reason: String,
    },

    /// The `exp` claim is not strictly in the future
    #[error("Token expired at {expired_at} (validated at {validated_at})")]
    TokenExpired {
        /// `exp` claim, seconds since the epoch
        expired_at: i64,
        /// Validation instant, seconds since the epoch
        validated_at: i64,
    },

    /// The token's client id does not match the configured client id
    #[error("Token client id {actual:?} does not match the expected client id '{expected}'")]
    ClientMismatch {
        /// Configured client id
        expected: String,
        /// Client id found in the token, if any
        actual: Option<String>,
    },

    /// The trusted key set could not be fetched or parsed
    #[error("Failed to fetch key set from {locator}: {reason}")]
    KeyFetchFailed {
        /// Normalized locator (scheme, host and path)
        locator: String,
        /// Failure detail
        reason: String,
    },

    /// The token endpoint could not be reached or answered with an error
    #[error("Token exchange with {endpoint} failed: {message}")]
    Exchange {
        /// Failure summary (never contains request parameters)
        message: String,
        /// HTTP status, absent for transport-level failures
        status: Option<u16>,
        /// Token endpoint that was called
        endpoint: String,
        /// Response body returned by the authorization server
        body: Option<String>,
    },

    /// Two configured methods would read the same `Authorization` header
    #[error(
        "Ambiguous authentication configuration: {first} and {second} both read the basic Authorization header"
    )]
    AmbiguousAuthenticationConfiguration {
        /// Method listed first in the policy
        first: AuthenticationMethod,
        /// Method listed second in the policy
        second: AuthenticationMethod,
    },

    /// No credential material in the request matched any policy method
    #[error("Unable to resolve a token: {reason}")]
    ResolutionFailed {
        /// Why resolution failed
        reason: String,
    },

    /// A configuration value is invalid
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// The HTTP client could not be created
    #[error("HTTP client error: {0}")]
    Http(String),
}

/// Fieldless view of [`Error`] for callers that branch on the category only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`Error::MalformedToken`]
    MalformedToken,
    /// See [`Error::InsecureScheme`]
    InsecureScheme,
    /// See [`Error::UntrustedDomain`]
    UntrustedDomain,
    /// See [`Error::InvalidKeyEndpoint`]
    InvalidKeyEndpoint,
    /// See [`Error::NoTrustedKeySource`]
    NoTrustedKeySource,
    /// See [`Error::SignatureInvalid`]
    SignatureInvalid,
    /// See [`Error::TokenExpired`]
    TokenExpired,
    /// See [`Error::ClientMismatch`]
    ClientMismatch,
    /// See [`Error::KeyFetchFailed`]
    KeyFetchFailed,
    /// See [`Error::Exchange`]
    Exchange,
    /// See [`Error::AmbiguousAuthenticationConfiguration`]
    AmbiguousAuthenticationConfiguration,
    /// See [`Error::ResolutionFailed`]
    ResolutionFailed,
    /// See [`Error::Configuration`]
    Configuration,
    /// See [`Error::Http`]
    Http,
}

impl ErrorKind {
    /// Stable snake_case label, used for audit records and metrics
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MalformedToken => "malformed_token",
            Self::InsecureScheme => "insecure_scheme",
            Self::UntrustedDomain => "untrusted_domain",
            Self::InvalidKeyEndpoint => "invalid_key_endpoint",
            Self::NoTrustedKeySource => "no_trusted_key_source",
            Self::SignatureInvalid => "signature_invalid",
            Self::TokenExpired => "token_expired",
            Self::ClientMismatch => "client_mismatch",
            Self::KeyFetchFailed => "key_fetch_failed",
            Self::Exchange => "exchange_error",
            Self::AmbiguousAuthenticationConfiguration => "ambiguous_authentication_configuration",
            Self::ResolutionFailed => "resolution_failed",
            Self::Configuration => "configuration",
            Self::Http => "http",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MalformedToken(_) => ErrorKind::MalformedToken,
            Self::InsecureScheme { .. } => ErrorKind::InsecureScheme,
            Self::UntrustedDomain { .. } => ErrorKind::UntrustedDomain,
            Self::InvalidKeyEndpoint { .. } => ErrorKind::InvalidKeyEndpoint,
            Self::NoTrustedKeySource(_) => ErrorKind::NoTrustedKeySource,
            Self::SignatureInvalid { .. } => ErrorKind::SignatureInvalid,
            Self::TokenExpired { .. } => ErrorKind::TokenExpired,
            Self::ClientMismatch { .. } => ErrorKind::ClientMismatch,
            Self::KeyFetchFailed { .. } => ErrorKind::KeyFetchFailed,
            Self::Exchange { .. } => ErrorKind::Exchange,
            Self::AmbiguousAuthenticationConfiguration { .. } => {
                ErrorKind::AmbiguousAuthenticationConfiguration
            }
            Self::ResolutionFailed { .. } => ErrorKind::ResolutionFailed,
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Http(_) => ErrorKind::Http,
        }
    }

    /// Whether this error is a rejection of the key-set locator
    pub fn is_trust_violation(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::InsecureScheme | ErrorKind::UntrustedDomain | ErrorKind::InvalidKeyEndpoint
        )
    }

    /// HTTP status of a failed exchange, if the server answered
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Exchange { status, .. } => *status,
            _ => None,
        }
    }

    pub(crate) fn malformed(detail: impl Into<String>) -> Self {
        Self::MalformedToken(detail.into())
    }

    pub(crate) fn untrusted(reason: impl Into<String>) -> Self {
        Self::UntrustedDomain {
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_endpoint(reason: impl Into<String>) -> Self {
        Self::InvalidKeyEndpoint {
            reason: reason.into(),
        }
    }

    pub(crate) fn resolution(reason: impl Into<String>) -> Self {
        Self::ResolutionFailed {
            reason: reason.into(),
        }
    }

    pub(crate) fn transport(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Exchange {
            message: message.into(),
            status: None,
            endpoint: endpoint.into(),
            body: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_message_names_provenance() {
        let fetched = Error::SignatureInvalid {
            provenance: KeyProvenance::Fetched,
            reason: "mismatch".to_string(),
        };
        let fallback = Error::SignatureInvalid {
            provenance: KeyProvenance::Fallback,
            reason: "mismatch".to_string(),
        };

        assert!(fetched.to_string().contains("verified using fetched key"));
        assert!(fallback.to_string().contains("verified using fallback key"));
    }

    #[test]
    fn test_exchange_error_status() {
        let err = Error::Exchange {
            message: "status 401".to_string(),
            status: Some(401),
            endpoint: "https://auth.example.com/oauth/token".to_string(),
            body: Some("{\"error\":\"unauthorized\"}".to_string()),
        };

        assert_eq!(err.status(), Some(401));
        assert_eq!(err.kind(), ErrorKind::Exchange);
        assert!(err.to_string().contains("https://auth.example.com/oauth/token"));

        let transport = Error::transport("https://auth.example.com/oauth/token", "timed out");
        assert_eq!(transport.status(), None);
    }

    #[test]
    fn test_trust_violation_classification() {
        assert!(Error::untrusted("evil.example.com").is_trust_violation());
        assert!(Error::invalid_endpoint("query").is_trust_violation());
        assert!(
            Error::InsecureScheme {
                scheme: "http".into()
            }
            .is_trust_violation()
        );
        assert!(!Error::malformed("bad").is_trust_violation());
    }

    #[test]
    fn test_ambiguous_message() {
        let err = Error::AmbiguousAuthenticationConfiguration {
            first: AuthenticationMethod::Basic,
            second: AuthenticationMethod::ClientCredentials,
        };
        assert_eq!(err.kind().as_str(), "ambiguous_authentication_configuration");
        assert!(err.to_string().contains("BASIC"));
        assert!(err.to_string().contains("CLIENT_CREDENTIALS"));
    }
}
