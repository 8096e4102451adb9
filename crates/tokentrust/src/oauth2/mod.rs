//! OAuth 2.0 token exchange
//!
//! - `grant` - grant types and their wire names
//! - `request` - [`TokenRequest`] builder and parameter masking
//! - `client` - [`TokenExchangeClient`] for the token endpoint
//! - `cache` - [`TokenResponseCache`] keyed by [`TokenFingerprint`]

pub mod cache;
pub mod client;
pub mod grant;
pub mod request;

pub use cache::{TokenFingerprint, TokenResponseCache};
pub use client::{CORRELATION_ID_HEADER, TokenExchangeClient};
pub use grant::GrantType;
pub use request::{MASK, MaskedParameters, ParamValue, TokenRequest, is_secret_key};
