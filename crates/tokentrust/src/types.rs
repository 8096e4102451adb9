//! Values handed back to callers
//!
//! [`TokenResponse`] is what the token endpoint issued, [`BearerToken`] is
//! what credential resolution produced. Both keep their token strings out of
//! `Debug` output.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::config::AuthenticationMethod;

fn default_token_type() -> String {
    "bearer".to_string()
}

/// Normalized token endpoint response
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    /// Issued access token
    pub access_token: String,
    /// Token type, `bearer` when the server omits it
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Lifetime in seconds
    #[serde(deserialize_with = "expires_in_value")]
    pub expires_in: i64,
    /// Refresh token, if the grant issues one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Granted scope, if the server reports it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("scope", &self.scope)
            .finish()
    }
}

/// `expires_in` arrives as a number from most servers and as a string from some
fn expires_in_value<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(i64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.trim().parse().map_err(|_| {
            serde::de::Error::custom(format!("Cannot convert expires_in from {s:?} to an integer"))
        }),
    }
}

/// Token produced by credential resolution
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken {
    value: String,
    method: AuthenticationMethod,
    response: Option<TokenResponse>,
}

impl BearerToken {
    pub(crate) fn passthrough(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            method: AuthenticationMethod::OAuth2,
            response: None,
        }
    }

    pub(crate) fn exchanged(method: AuthenticationMethod, response: TokenResponse) -> Self {
        Self {
            value: response.access_token.clone(),
            method,
            response: Some(response),
        }
    }

    /// Compact token string
    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// Method that produced the token
    pub fn method(&self) -> AuthenticationMethod {
        self.method
    }

    /// Token endpoint response, absent for passed-through bearer tokens
    pub fn response(&self) -> Option<&TokenResponse> {
        self.response.as_ref()
    }

    /// Take the token string
    pub fn into_string(self) -> String {
        self.value
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BearerToken")
            .field("value", &"[REDACTED]")
            .field("method", &self.method)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expires_in_number_or_string() {
        let numeric: TokenResponse =
            serde_json::from_str(r#"{"access_token":"abc","token_type":"bearer","expires_in":3600}"#)
                .unwrap();
        let textual: TokenResponse =
            serde_json::from_str(r#"{"access_token":"abc","expires_in":"3600"}"#).unwrap();

        assert_eq!(numeric.expires_in, 3600);
        assert_eq!(textual.expires_in, 3600);
        assert_eq!(textual.token_type, "bearer");
        assert_eq!(textual.refresh_token, None);
    }

    #[test]
    fn test_expires_in_rejects_garbage() {
        let err = serde_json::from_str::<TokenResponse>(
            r#"{"access_token":"abc","expires_in":"soon"}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("Cannot convert expires_in"));

        assert!(
            serde_json::from_str::<TokenResponse>(r#"{"access_token":"abc","expires_in":1.5}"#)
                .is_err()
        );
        assert!(serde_json::from_str::<TokenResponse>(r#"{"access_token":"abc"}"#).is_err());
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let response = TokenResponse {
            access_token: "eyJsecret".to_string(),
            token_type: "bearer".to_string(),
            expires_in: 60,
            refresh_token: Some("refresh-secret".to_string()),
            scope: None,
        };
        let rendered = format!("{response:?}");
        assert!(!rendered.contains("eyJsecret"));
        assert!(!rendered.contains("refresh-secret"));

        let bearer = BearerToken::exchanged(AuthenticationMethod::ClientCredentials, response);
        assert!(!format!("{bearer:?}").contains("eyJsecret"));
        assert_eq!(bearer.as_str(), "eyJsecret");
    }
}
