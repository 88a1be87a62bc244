//! Observability for JWT authentication.
//!
//! Provides metrics definitions. No recorder is installed here; the host
//! process owns the exporter.

pub mod metrics;
