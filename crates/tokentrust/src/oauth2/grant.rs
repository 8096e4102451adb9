//! OAuth 2.0 grant types and their wire names

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Grant type sent as the `grant_type` form field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum GrantType {
    /// `client_credentials`
    ClientCredentials,
    /// `password` (resource-owner password credentials)
    Password,
    /// `refresh_token`
    RefreshToken,
    /// `authorization_code`
    AuthorizationCode,
    /// `urn:ietf:params:oauth:grant-type:jwt-bearer` (RFC 7523)
    JwtBearer,
    /// `urn:ietf:params:oauth:grant-type:saml2-bearer` (RFC 7522)
    Saml2Bearer,
    /// `user_token` (legacy identity-zone grant)
    UserToken,
    /// `client_x509` (legacy certificate grant)
    ClientX509,
}

impl GrantType {
    /// All grant types
    pub const ALL: [Self; 8] = [
        Self::ClientCredentials,
        Self::Password,
        Self::RefreshToken,
        Self::AuthorizationCode,
        Self::JwtBearer,
        Self::Saml2Bearer,
        Self::UserToken,
        Self::ClientX509,
    ];

    /// Wire name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClientCredentials => "client_credentials",
            Self::Password => "password",
            Self::RefreshToken => "refresh_token",
            Self::AuthorizationCode => "authorization_code",
            Self::JwtBearer => "urn:ietf:params:oauth:grant-type:jwt-bearer",
            Self::Saml2Bearer => "urn:ietf:params:oauth:grant-type:saml2-bearer",
            Self::UserToken => "user_token",
            Self::ClientX509 => "client_x509",
        }
    }
}

impl fmt::Display for GrantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GrantType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|grant| grant.as_str() == s)
            .ok_or_else(|| Error::Configuration(format!("unknown grant type '{s}'")))
    }
}

impl TryFrom<String> for GrantType {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<GrantType> for String {
    fn from(grant: GrantType) -> Self {
        grant.as_str().to_string()
    }
}
