//! Metrics definitions for JWT authentication.
//!
//! All metrics follow Prometheus naming conventions:
//! - `jwt_authn_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded to prevent cardinality explosion:
//! - `status`: 9 values (`ok` plus the failure status codes)
//! - `result`: 4 values (hit, miss, attach, inline)
//! - `outcome`: bounded by [`FetchOutcome`]
//!
//! Issuers are not used as labels; they come from configuration
//! but the set is operator controlled and unbounded.

use crate::errors::Status;
use metrics::{counter, histogram};
use std::time::Duration;

/// How a key acquisition was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheResult {
    /// Fresh key set already cached.
    Hit,
    /// No usable key set; a fetch was started.
    Miss,
    /// Joined a fetch already in flight.
    Attach,
    /// Inline key source; never cached or fetched.
    Inline,
}

impl CacheResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheResult::Hit => "hit",
            CacheResult::Miss => "miss",
            CacheResult::Attach => "attach",
            CacheResult::Inline => "inline",
        }
    }
}

/// Terminal outcome of a JWKS fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Success,
    /// Upstream target did not resolve; no request was sent.
    Unresolved,
    Transport,
    /// Non-2xx response.
    HttpStatus,
    /// 2xx response with an unusable JWKS body.
    Parse,
    /// Every waiter detached before completion.
    Cancelled,
    /// The fetch task panicked or was dropped before settling.
    Aborted,
}

impl FetchOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchOutcome::Success => "success",
            FetchOutcome::Unresolved => "unresolved",
            FetchOutcome::Transport => "transport",
            FetchOutcome::HttpStatus => "http_status",
            FetchOutcome::Parse => "parse",
            FetchOutcome::Cancelled => "cancelled",
            FetchOutcome::Aborted => "aborted",
        }
    }
}

// ============================================================================
// Verification Metrics
// ============================================================================

/// Record a terminal verification outcome.
///
/// Metric: `jwt_authn_verifications_total`
/// Labels: `status` ("ok" or a status wire name)
pub fn record_verification(result: Result<(), Status>) {
    let status = match result {
        Ok(()) => "ok",
        Err(status) => status.as_str(),
    };
    counter!("jwt_authn_verifications_total",
        "status" => status
    )
    .increment(1);
}

// ============================================================================
// Key Cache Metrics
// ============================================================================

/// Record how a key acquisition was satisfied.
///
/// Metric: `jwt_authn_key_cache_total`
/// Labels: `result`
pub fn record_key_cache(result: CacheResult) {
    counter!("jwt_authn_key_cache_total",
        "result" => result.as_str()
    )
    .increment(1);
}

// ============================================================================
// JWKS Fetch Metrics
// ============================================================================

/// Record a JWKS fetch outcome and, for fetches that reached the network,
/// its duration.
///
/// Metric: `jwt_authn_jwks_fetch_total`, `jwt_authn_jwks_fetch_duration_seconds`
/// Labels: `outcome`
pub fn record_jwks_fetch(outcome: FetchOutcome, duration: Option<Duration>) {
    if let Some(duration) = duration {
        histogram!("jwt_authn_jwks_fetch_duration_seconds").record(duration.as_secs_f64());
    }

    counter!("jwt_authn_jwks_fetch_total",
        "outcome" => outcome.as_str()
    )
    .increment(1);
}
