//! Error and outcome types for JWT authentication.
//!
//! Verification outcomes are a closed set of [`Status`] codes delivered to the
//! caller's callbacks. They are values, never propagated panics. Display messages
//! are intentionally generic so they can be surfaced to clients without leaking
//! token contents; details are logged at debug level.

use thiserror::Error;

/// Terminal failure code for a verification.
///
/// Checks run in a fixed order (token presence, token format, issuer, key
/// acquisition, signature, expiry, audience) and the first failing check
/// determines the code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum Status {
    /// No credential was found in any configured header.
    #[error("Jwt is missing")]
    JwtMissed,

    /// The credential is not a structurally valid JWT.
    #[error("Jwt is not in the form of Header.Payload.Signature")]
    JwtBadFormat,

    /// `exp` is absent or not in the future.
    #[error("Jwt is expired")]
    JwtExpired,

    /// `iss` is absent or has no verification rule.
    #[error("Jwt issuer is not configured")]
    JwtUnknownIssuer,

    /// No token audience matches the rule's audiences.
    #[error("Audience doesn't match")]
    AudienceNotAllowed,

    /// The key set could not be retrieved from its upstream.
    #[error("Failed to fetch public key")]
    FailedFetchPubkey,

    /// The key set document (or an inline key) could not be parsed.
    #[error("Failed to parse public key")]
    JwkParseError,

    /// No candidate key validated the signature.
    #[error("Jwt verification fails")]
    JwtInvalidSignature,
}

impl Status {
    /// Wire name of the status, also used as a metrics label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::JwtMissed => "JWT_MISSED",
            Status::JwtBadFormat => "JWT_BAD_FORMAT",
            Status::JwtExpired => "JWT_EXPIRED",
            Status::JwtUnknownIssuer => "JWT_UNKNOWN_ISSUER",
            Status::AudienceNotAllowed => "AUDIENCE_NOT_ALLOWED",
            Status::FailedFetchPubkey => "FAILED_FETCH_PUBKEY",
            Status::JwkParseError => "JWK_PARSE_ERROR",
            Status::JwtInvalidSignature => "JWT_INVALID_SIGNATURE",
        }
    }
}

/// Errors raised while building rules or loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    #[error("Duplicate rule for issuer: {0}")]
    DuplicateIssuer(String),

    #[error("Rule for issuer {0} must set exactly one of remote_jwks or local_jwks")]
    InvalidKeySource(String),

    #[error("Invalid JWKS uri for issuer {issuer}: {reason}")]
    InvalidUri { issuer: String, reason: String },

    #[error("Invalid inline key set for issuer {0}")]
    InvalidInlineKeys(String),

    #[error("Failed to read rules file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse rules: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("No tokio runtime available to drive key fetches")]
    RuntimeUnavailable,
}

/// Errors returned by the host HTTP fetch capability.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Failed to read response body: {0}")]
    Body(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_names() {
        assert_eq!(Status::JwtMissed.as_str(), "JWT_MISSED");
        assert_eq!(Status::JwtBadFormat.as_str(), "JWT_BAD_FORMAT");
        assert_eq!(Status::JwtExpired.as_str(), "JWT_EXPIRED");
        assert_eq!(Status::JwtUnknownIssuer.as_str(), "JWT_UNKNOWN_ISSUER");
        assert_eq!(Status::AudienceNotAllowed.as_str(), "AUDIENCE_NOT_ALLOWED");
        assert_eq!(Status::FailedFetchPubkey.as_str(), "FAILED_FETCH_PUBKEY");
        assert_eq!(Status::JwkParseError.as_str(), "JWK_PARSE_ERROR");
        assert_eq!(Status::JwtInvalidSignature.as_str(), "JWT_INVALID_SIGNATURE");
    }

    #[test]
    fn test_status_messages_are_generic() {
        // Messages go to clients; they must not echo anything request specific
        assert_eq!(Status::JwtExpired.to_string(), "Jwt is expired");
        assert_eq!(
            Status::JwtInvalidSignature.to_string(),
            "Jwt verification fails"
        );
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::DuplicateIssuer("https://example.com".to_string());
        assert_eq!(
            err.to_string(),
            "Duplicate rule for issuer: https://example.com"
        );

        let err = ConfigError::InvalidUri {
            issuer: "iss".to_string(),
            reason: "relative URL without a base".to_string(),
        };
        assert!(err.to_string().contains("iss"));
    }
}
