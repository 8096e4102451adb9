//! Token endpoint client
//!
//! Executes one form-encoded POST per [`TokenRequest`] and normalizes the
//! answer into a [`TokenResponse`]. There is no retry: an assertion or a
//! refresh token may be single-use, so the caller decides whether to try
//! again.

use std::fmt;
use std::sync::Arc;

use reqwest::StatusCode;
use reqwest::header::{ACCEPT, USER_AGENT};
use tracing::{debug, error};
use uuid::Uuid;

use super::TokenRequest;
use super::request::param;
use crate::audit::{AuditLogger, TokenEvent};
use crate::auth_metrics;
use crate::config::ExchangeConfig;
use crate::error::{Error, Result};
use crate::types::TokenResponse;

/// Header carrying the correlation id of an exchange
pub const CORRELATION_ID_HEADER: &str = "X-CorrelationID";

/// Client for an OAuth 2.0 token endpoint
#[derive(Clone)]
pub struct TokenExchangeClient {
    http: reqwest::Client,
    config: ExchangeConfig,
    audit: Option<Arc<AuditLogger>>,
}

impl fmt::Debug for TokenExchangeClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenExchangeClient")
            .field("config", &self.config)
            .field("audit", &self.audit.is_some())
            .finish()
    }
}

impl TokenExchangeClient {
    /// Client over an existing `reqwest` client
    ///
    /// The client should not follow redirects; see
    /// [`build_client`](crate::http_client::build_client).
    pub fn new(http: reqwest::Client, config: ExchangeConfig) -> Self {
        Self {
            http,
            config,
            audit: None,
        }
    }

    /// Record exchanges with `audit`
    pub fn with_audit(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Settings in use
    pub fn config(&self) -> &ExchangeConfig {
        &self.config
    }

    /// POST `request` to its endpoint and parse the issued token
    ///
    /// # Errors
    ///
    /// [`Error::Exchange`] with the status and response body when the server
    /// answers anything but 200, and without a status when the endpoint
    /// cannot be reached, the call times out, or the body is not a token
    /// response.
    pub async fn exchange(&self, request: &TokenRequest) -> Result<TokenResponse> {
        let endpoint = request.endpoint().as_str();
        let grant_type = request.grant_type().as_str();
        let correlation_id = request
            .get_correlation_id()
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        debug!(
            endpoint,
            grant_type,
            correlation_id = %correlation_id,
            params = %request.masked(),
            "Requesting token"
        );

        let result = self.send(request, &correlation_id).await;

        auth_metrics::record_exchange(grant_type, result.is_ok());
        if let Some(audit) = &self.audit {
            match &result {
                Ok(response) => {
                    audit.log(TokenEvent::TokenExchanged {
                        grant_type: grant_type.to_string(),
                        endpoint: endpoint.to_string(),
                        client_id: request.plain(param::CLIENT_ID).map(str::to_string),
                        correlation_id: correlation_id.clone(),
                        expires_in: response.expires_in,
                    });
                }
                Err(e) => {
                    audit.log(TokenEvent::ExchangeFailed {
                        grant_type: grant_type.to_string(),
                        endpoint: endpoint.to_string(),
                        status: e.status(),
                        correlation_id: correlation_id.clone(),
                    });
                }
            }
        }

        result
    }

    async fn send(&self, request: &TokenRequest, correlation_id: &str) -> Result<TokenResponse> {
        let endpoint = request.endpoint().as_str();

        let response = self
            .http
            .post(request.endpoint().clone())
            .headers(request.headers().clone())
            .header(ACCEPT, "application/json")
            .header(USER_AGENT, &self.config.user_agent)
            .header(CORRELATION_ID_HEADER, correlation_id)
            .form(&request.form())
            .timeout(self.config.timeout)
            .send()
            .await
            .map_err(|e| {
                error!(endpoint, correlation_id, error = %e, "Token endpoint unreachable");
                let message = if e.is_timeout() {
                    format!(
                        "Unexpected error retrieving token: timed out after {:?}",
                        self.config.timeout
                    )
                } else {
                    format!("Unexpected error retrieving token: {e}")
                };
                Error::transport(endpoint, message)
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            error!(endpoint, correlation_id, error = %e, "Failed to read token response");
            Error::transport(endpoint, format!("Unexpected error reading token response: {e}"))
        })?;

        if status != StatusCode::OK {
            error!(
                endpoint,
                correlation_id,
                status = status.as_u16(),
                "Token endpoint returned error status"
            );
            return Err(Error::Exchange {
                message: format!("Error retrieving token: status {}", status.as_u16()),
                status: Some(status.as_u16()),
                endpoint: endpoint.to_string(),
                body: Some(body),
            });
        }

        let parsed: TokenResponse = serde_json::from_str(&body).map_err(|e| {
            error!(endpoint, correlation_id, error = %e, "Invalid token response");
            Error::transport(endpoint, format!("Invalid token response: {e}"))
        })?;

        debug!(
            endpoint,
            correlation_id,
            token_type = %parsed.token_type,
            expires_in = parsed.expires_in,
            "Token issued"
        );
        Ok(parsed)
    }
}
