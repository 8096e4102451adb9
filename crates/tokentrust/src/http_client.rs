//! Shared HTTP client construction
//!
//! Key-set fetches and token exchanges both go through a `reqwest` client that
//! never follows redirects. A redirect from a trusted key endpoint or a token
//! endpoint would otherwise hand the request to a host nobody vetted.

use reqwest::redirect::Policy;

use crate::config::DEFAULT_USER_AGENT;
use crate::error::{Error, Result};

/// Build a client with redirects disabled
///
/// Per-request timeouts are applied by the callers, so the client itself has
/// none.
///
/// # Errors
///
/// Returns [`Error::Http`] if the TLS backend cannot be initialised.
pub fn build_client(user_agent: Option<&str>) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .redirect(Policy::none())
        .user_agent(user_agent.unwrap_or(DEFAULT_USER_AGENT))
        .build()
        .map_err(|e| Error::Http(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        assert!(build_client(None).is_ok());
        assert!(build_client(Some("my-service/1.0")).is_ok());
    }
}
