//! # tokentrust - Bearer-Token Trust Engine
//!
//! Validates bearer tokens issued by an OAuth 2.0 / OIDC authorization server
//! and exchanges inbound credentials for new access tokens at that server.
//!
//! ## Design Principles
//!
//! - **Fail closed**: every validation step either advances or rejects with a
//!   typed [`Error`]; nothing is accepted with a warning
//! - **Trusted key sources only**: a token's `jku` header is dereferenced only
//!   after it passes the trust check in [`jwt::JkuTrustPolicy`]
//! - **Single-flight caches**: concurrent lookups for one key set or one token
//!   request share one network call
//! - **No ambient state**: caches belong to a [`TrustEngine`]; two engines
//!   never share them
//!
//! ## Architecture
//!
//! - [`jwt`] - token parsing, `jku` trust check, key-set cache, validator
//! - [`oauth2`] - grant types, token requests, exchange client, response cache
//! - [`credentials`] - credential material carried by inbound requests
//! - [`resolver`] - ordered authentication policy resolving a bearer token
//! - [`engine`] - [`TrustEngine`] wiring all of the above
//! - [`config`] - configuration values
//! - [`audit`] - structured audit records under the `audit::token` target
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tokentrust::{EngineConfig, InboundRequest, TrustEngine};
//! use tokentrust::config::{AuthenticationMethod, ResolverConfig, TrustConfig};
//!
//! # tokio_test::block_on(async {
//! let engine = TrustEngine::new(EngineConfig {
//!     trust: TrustConfig::with_trusted_domain("auth.example.com"),
//!     resolver: ResolverConfig {
//!         auth_url: Some("https://mydomain.auth.example.com".to_string()),
//!         methods: vec![AuthenticationMethod::OAuth2, AuthenticationMethod::ClientCredentials],
//!         ..ResolverConfig::default()
//!     },
//!     ..EngineConfig::default()
//! })?;
//!
//! let request = InboundRequest::from_pairs([("Authorization", "Bearer eyJhbGciOi...")])?;
//! let validated = engine.resolve_and_validate(&request).await?;
//! println!("client {:?}, key {}", validated.client_id(), validated.provenance());
//! # Ok::<(), tokentrust::Error>(())
//! # });
//! ```
//!
//! ## Feature Flags
//!
//! - `metrics` - counters for validations, key-set fetches, exchanges and
//!   cache lookups through the `metrics` facade
//!
//! The crate logs through `tracing` and never installs a subscriber.

pub mod audit;
pub mod auth_metrics;
mod cache;
pub mod config;
pub mod credentials;
pub mod engine;
pub mod error;
pub mod http_client;
pub mod jwt;
pub mod oauth2;
pub mod resolver;
pub mod types;

#[doc(inline)]
pub use config::{AuthenticationMethod, EngineConfig};

#[doc(inline)]
pub use error::{Error, ErrorKind, Result};

#[doc(inline)]
pub use credentials::{CredentialMaterial, InboundRequest};

#[doc(inline)]
pub use engine::TrustEngine;

#[doc(inline)]
pub use jwt::{KeyProvenance, Token, TokenValidator, ValidatedToken};

#[doc(inline)]
pub use oauth2::{GrantType, TokenExchangeClient, TokenRequest, TokenResponseCache};

#[doc(inline)]
pub use resolver::CredentialResolver;

#[doc(inline)]
pub use types::{BearerToken, TokenResponse};

pub use auth_metrics::init_metrics;
