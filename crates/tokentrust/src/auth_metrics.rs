//! Engine metrics for observability
//!
//! Enable with the `metrics` feature flag. Requires a `metrics` recorder
//! to be installed by the host (e.g., via `metrics-exporter-prometheus`).
//!
//! ## Metrics Provided
//!
//! - `tokentrust_validations_total` - Token validations (labels: outcome, provenance)
//! - `tokentrust_validation_duration_seconds` - Histogram of `decode` duration
//! - `tokentrust_key_set_fetches_total` - Key-set fetches (labels: status)
//! - `tokentrust_exchanges_total` - Token exchanges (labels: grant_type, status)
//! - `tokentrust_cache_lookups_total` - Cache lookups (labels: cache, result)
//!
//! ## Example
//!
//! ```rust
//! use tokentrust::init_metrics;
//!
//! // Register metric descriptions once at startup
//! init_metrics();
//! ```

#[cfg(feature = "metrics")]
use metrics::{counter, describe_counter, describe_histogram, histogram};

#[cfg(feature = "metrics")]
use std::sync::Once;

#[cfg(feature = "metrics")]
static INIT: Once = Once::new();

/// Register metric descriptions. Idempotent.
#[cfg(feature = "metrics")]
pub fn init_metrics() {
    INIT.call_once(|| {
        describe_counter!(
            "tokentrust_validations_total",
            "Token validations by outcome and key provenance"
        );
        describe_histogram!(
            "tokentrust_validation_duration_seconds",
            "Token validation duration in seconds"
        );
        describe_counter!(
            "tokentrust_key_set_fetches_total",
            "Key-set fetches against trusted locators"
        );
        describe_counter!(
            "tokentrust_exchanges_total",
            "Token endpoint exchanges by grant type"
        );
        describe_counter!(
            "tokentrust_cache_lookups_total",
            "Key-set and token-response cache lookups"
        );
    });
}

/// Record a finished validation
///
/// `outcome` is `accepted` or an [`ErrorKind`](crate::ErrorKind) label.
#[cfg(feature = "metrics")]
pub(crate) fn record_validation(outcome: &'static str, provenance: Option<&'static str>) {
    counter!(
        "tokentrust_validations_total",
        "outcome" => outcome,
        "provenance" => provenance.unwrap_or("none")
    )
    .increment(1);
}

#[cfg(feature = "metrics")]
pub(crate) fn record_validation_duration(duration_seconds: f64) {
    histogram!("tokentrust_validation_duration_seconds").record(duration_seconds);
}

#[cfg(feature = "metrics")]
pub(crate) fn record_key_set_fetch(success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!("tokentrust_key_set_fetches_total", "status" => status).increment(1);
}

#[cfg(feature = "metrics")]
pub(crate) fn record_exchange(grant_type: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "tokentrust_exchanges_total",
        "grant_type" => grant_type.to_owned(),
        "status" => status
    )
    .increment(1);
}

/// Record a cache lookup
///
/// `result` is `hit`, `miss` or `coalesced` (joined an in-flight load).
#[cfg(feature = "metrics")]
pub(crate) fn record_cache_lookup(cache: &'static str, result: &'static str) {
    counter!(
        "tokentrust_cache_lookups_total",
        "cache" => cache,
        "result" => result
    )
    .increment(1);
}

// No-op versions when metrics feature is disabled
#[cfg(not(feature = "metrics"))]
#[allow(missing_docs)]
pub fn init_metrics() {}

#[cfg(not(feature = "metrics"))]
pub(crate) fn record_validation(_outcome: &'static str, _provenance: Option<&'static str>) {}

#[cfg(not(feature = "metrics"))]
pub(crate) fn record_validation_duration(_duration_seconds: f64) {}

#[cfg(not(feature = "metrics"))]
pub(crate) fn record_key_set_fetch(_success: bool) {}

#[cfg(not(feature = "metrics"))]
pub(crate) fn record_exchange(_grant_type: &str, _success: bool) {}

#[cfg(not(feature = "metrics"))]
pub(crate) fn record_cache_lookup(_cache: &'static str, _result: &'static str) {}
