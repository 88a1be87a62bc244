//! Test utilities for jwt-authn
//!
//! This crate provides shared test fixtures, mocks, and builders for the
//! jwt-authn crate's integration tests.
//!
//! # Modules
//!
//! - `crypto_fixtures` - Deterministic keypairs, example JWKS documents and
//!   pre-signed RS256 tokens
//! - `token_builders` - Builders for signed tokens and rule configs
//! - `mock_upstream` - Scripted [`HttpClient`](jwt_authn::fetcher::HttpClient)
//! - `callbacks` - Recording verification callbacks

pub mod callbacks;
pub mod crypto_fixtures;
pub mod mock_upstream;
pub mod token_builders;

// Re-export commonly used items
pub use callbacks::*;
pub use crypto_fixtures::*;
pub use mock_upstream::*;
pub use token_builders::*;
