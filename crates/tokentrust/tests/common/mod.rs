//! Common test utilities for integration tests
//!
//! Provides a wiremock authorization server (key-set and token endpoints),
//! RSA test keys from `tests/fixtures/`, token signing helpers, and a key-set
//! fetcher that serves trusted locators from the mock server.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde_json::{Value, json};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tokentrust::jwt::{KeySetFetcher, TrustedKeySetRef};

pub const SIGNING_KEY: &str = include_str!("../fixtures/signing_key.pem");
pub const SIGNING_PUB: &str = include_str!("../fixtures/signing_key.pub.pem");
pub const ROGUE_KEY: &str = include_str!("../fixtures/rogue_key.pem");
pub const ROGUE_PUB: &str = include_str!("../fixtures/rogue_key.pub.pem");

/// Modulus of `signing_key.pem`
pub const SIGNING_KEY_N: &str = "sToKfP9hlqLu2E21Ej79PmcbRWHNyH8kEAwh1GEjP0RX-O_JEx2zjrbaDHzCg8KyzqVu7sxz5e9ez9_v9luQrCVu7MlecMXHdDVchkWQUU7nsCVNz-bifEQ6LOXQSqlhiNDJwRknZq_zDe3b0RXLryYNeBHSp3f0iBqpCN1AQbVedXen9fge10J6_9j6m1_j8jkdyjs8NYAvLYjr1Dwl8FAwpqZuzBFLwG6MFrI1BhOIzAfF0zhTbrylMg2oI8qc0or0dV-PiPCorGW3h0AIz9bLDoLHKrosSEfDQyI0XDxzaHE9sYBr6KZbxdWWKzMODTQe81VPRY1Bzjk1tugqVw";

pub const TRUSTED_DOMAIN: &str = "auth.example.com";
pub const TRUSTED_JKU: &str = "https://tenant.auth.example.com/token_keys";
pub const KEY_ID: &str = "key-id-1";

/// Mock authorization server
pub struct MockAuthServer {
    pub server: MockServer,
}

impl MockAuthServer {
    /// Start a server with no mocks
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Base URL, e.g. `http://127.0.0.1:4242`
    pub fn uri(&self) -> String {
        self.server.uri()
    }

    /// Token endpoint URL
    pub fn token_endpoint(&self) -> String {
        format!("{}/oauth/token", self.server.uri())
    }

    /// Serve the signing key at `/token_keys`
    pub async fn mock_key_set(&self) {
        Mock::given(method("GET"))
            .and(path("/token_keys"))
            .respond_with(ResponseTemplate::new(200).set_body_json(signing_jwks()))
            .mount(&self.server)
            .await;
    }

    /// Issue `access_token` from the token endpoint
    pub async fn mock_token(&self, access_token: &str, expires_in: i64) {
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body(
                access_token,
                expires_in,
            )))
            .mount(&self.server)
            .await;
    }

    /// Number of requests the token endpoint received
    pub async fn token_requests(&self) -> usize {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path() == "/oauth/token")
            .count()
    }

    /// Form bodies the token endpoint received, in order
    pub async fn token_forms(&self) -> Vec<String> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path() == "/oauth/token")
            .map(|r| String::from_utf8_lossy(&r.body).into_owned())
            .collect()
    }
}

/// Token endpoint response body
pub fn token_body(access_token: &str, expires_in: i64) -> Value {
    json!({
        "access_token": access_token,
        "token_type": "bearer",
        "expires_in": expires_in,
    })
}

/// Key set holding the public half of `signing_key.pem`
pub fn signing_jwks() -> Value {
    json!({
        "keys": [{
            "kty": "RSA",
            "kid": KEY_ID,
            "alg": "RS256",
            "use": "sig",
            "n": SIGNING_KEY_N,
            "e": "AQAB"
        }]
    })
}

/// Serves trusted locators from a mock server, counting fetches
///
/// The locator's path is requested from the mock server, so the trust check
/// still runs against the real `https://` locator in the token.
pub struct MockServerFetcher {
    base: String,
    client: reqwest::Client,
    pub calls: AtomicUsize,
}

impl MockServerFetcher {
    pub fn new(server: &MockAuthServer) -> Arc<Self> {
        Arc::new(Self {
            base: server.uri(),
            client: reqwest::Client::new(),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeySetFetcher for MockServerFetcher {
    async fn fetch(&self, locator: &TrustedKeySetRef) -> tokentrust::Result<JwkSet> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let url = format!("{}{}", self.base, locator.url().path());
        let failed = |reason: String| tokentrust::Error::KeyFetchFailed {
            locator: locator.to_string(),
            reason,
        };

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;
        if !response.status().is_success() {
            return Err(failed(format!("status {}", response.status())));
        }
        response.json().await.map_err(|e| failed(e.to_string()))
    }
}

/// Current Unix time in seconds
pub fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock before epoch")
        .as_secs() as i64
}

/// Claims for client `sb-app` expiring at `exp`
pub fn claims(exp: i64) -> Value {
    json!({
        "iss": "https://tenant.auth.example.com/oauth/token",
        "sub": "user-1",
        "cid": "sb-app",
        "zid": "tenant-zone",
        "scope": ["openid", "app.read"],
        "exp": exp,
    })
}

/// RS256-sign `claims` with `private_pem`
pub fn sign(private_pem: &str, kid: Option<&str>, jku: Option<&str>, claims: &Value) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = kid.map(str::to_string);
    header.jku = jku.map(str::to_string);
    let key = EncodingKey::from_rsa_pem(private_pem.as_bytes()).expect("valid test key");
    jsonwebtoken::encode(&header, claims, &key).expect("signable claims")
}

/// Token signed by the trusted key, announcing `jku`
pub fn trusted_token(jku: &str) -> String {
    sign(SIGNING_KEY, Some(KEY_ID), Some(jku), &claims(now() + 300))
}

/// `Basic` header value for `user:password`
pub fn basic(user: &str, password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{user}:{password}")))
}
