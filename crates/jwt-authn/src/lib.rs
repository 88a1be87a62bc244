//! Bearer JWT verification against per-issuer trust rules.
//!
//! Keys come from an inline value or a remote JWKS endpoint that is fetched
//! once per issuer and cached. See [`authenticator`] for the verification
//! flow and [`cache`] for the single-flight fetch discipline.

/// Module for audience normalization and matching
pub mod audience;

/// Module for the per-request verification orchestrator
pub mod authenticator;

/// Module for the per-issuer key cache
pub mod cache;

/// Module for rule schema and environment configuration
pub mod config;

/// Module for outcome and configuration error types
pub mod errors;

/// Module for remote JWKS retrieval and its host capabilities
pub mod fetcher;

/// Module for read-only header access and credential locations
pub mod headers;

/// Module for JWKS parsing
pub mod jwks;

/// Module for JWT decoding and validation
pub mod jwt;

pub mod observability;

/// Module for the issuer rule registry
pub mod rules;

pub use authenticator::{AuthCallbacks, Authenticator, JwtAuthn, Verified};
pub use errors::{ConfigError, FetchError, Status};
pub use jwt::DecodedJwt;
