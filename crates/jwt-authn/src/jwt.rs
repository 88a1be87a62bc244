//! JWT decoding and validation.
//!
//! This module provides the token-level half of verification:
//! - Structural decoding of `header.payload.signature` with a size limit
//! - Signature verification against a [`KeySet`] with `kid` selection and fallback
//! - Claim validation (`exp`, `aud`) against a [`VerificationRule`]
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing (DoS prevention)
//! - The header `alg` is only honoured if it names a supported algorithm;
//!   `none` and unknown values never verify
//! - Claim values are redacted in Debug output

use crate::errors::Status;
use crate::jwks::KeySet;
use crate::rules::{EmptyAudiencePolicy, VerificationRule};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::Algorithm;
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Maximum allowed JWT size in bytes (8KB).
///
/// Typical tokens are well under 1KB; anything larger is rejected before any
/// base64 or JSON work is done.
pub const MAX_JWT_SIZE_BYTES: usize = 8192;

/// A structurally valid, not yet verified, JWT.
#[derive(Clone)]
pub struct DecodedJwt {
    alg: Option<String>,
    kid: Option<String>,
    iss: Option<String>,
    aud: Vec<String>,
    exp: Option<i64>,
    header: Map<String, Value>,
    claims: Map<String, Value>,
    signing_input: String,
    signature: String,
}

impl fmt::Debug for DecodedJwt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedJwt")
            .field("alg", &self.alg)
            .field("kid", &self.kid)
            .field("iss", &self.iss)
            .field("aud", &self.aud)
            .field("exp", &self.exp)
            .field("claims", &"[REDACTED]")
            .finish()
    }
}

impl DecodedJwt {
    /// Header `alg`, if present.
    pub fn alg(&self) -> Option<&str> {
        self.alg.as_deref()
    }

    /// Header `kid`, if present and non-empty.
    pub fn kid(&self) -> Option<&str> {
        self.kid.as_deref()
    }

    pub fn issuer(&self) -> Option<&str> {
        self.iss.as_deref()
    }

    /// Token audiences; a single-string `aud` yields one entry.
    pub fn audiences(&self) -> &[String] {
        &self.aud
    }

    pub fn expires_at(&self) -> Option<i64> {
        self.exp
    }

    pub fn subject(&self) -> Option<&str> {
        self.claims.get("sub").and_then(Value::as_str)
    }

    /// Any header field.
    pub fn header_field(&self, name: &str) -> Option<&Value> {
        self.header.get(name)
    }

    /// Any payload claim, including the ones exposed by typed accessors.
    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.claims.get(name)
    }

    pub fn claims(&self) -> &Map<String, Value> {
        &self.claims
    }
}

/// Decode a compact-serialized JWT without verifying it.
///
/// # Errors
///
/// Returns `Status::JwtBadFormat` if the token is oversized, does not have
/// exactly three base64url segments, its header or payload is not a JSON
/// object, or a registered field has the wrong JSON type.
pub fn decode(token: &str) -> Result<DecodedJwt, Status> {
    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "jwt_authn.jwt",
            token_size = token.len(),
            max_size = MAX_JWT_SIZE_BYTES,
            "Token rejected: size exceeds maximum allowed"
        );
        return Err(Status::JwtBadFormat);
    }

    let mut parts = token.split('.');
    let (Some(header_b64), Some(payload_b64), Some(signature_b64), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        tracing::debug!(target: "jwt_authn.jwt", "Token rejected: invalid JWT format");
        return Err(Status::JwtBadFormat);
    };

    let header = decode_object(header_b64, "header")?;
    let claims = decode_object(payload_b64, "payload")?;
    decode_segment(signature_b64, "signature")?;

    let alg = optional_string(&header, "alg")?;
    let kid = optional_string(&header, "kid")?.filter(|kid| !kid.is_empty());
    let iss = optional_string(&claims, "iss")?;
    let aud = audiences(&claims)?;
    let exp = expiry(&claims)?;

    Ok(DecodedJwt {
        alg,
        kid,
        iss,
        aud,
        exp,
        header,
        claims,
        signing_input: format!("{header_b64}.{payload_b64}"),
        signature: signature_b64.to_string(),
    })
}

fn decode_segment(segment: &str, part: &'static str) -> Result<Vec<u8>, Status> {
    URL_SAFE_NO_PAD
        .decode(segment.trim_end_matches('='))
        .map_err(|e| {
            tracing::debug!(target: "jwt_authn.jwt", part, error = %e, "Failed to decode JWT segment base64");
            Status::JwtBadFormat
        })
}

fn decode_object(segment: &str, part: &'static str) -> Result<Map<String, Value>, Status> {
    let bytes = decode_segment(segment, part)?;
    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => {
            tracing::debug!(target: "jwt_authn.jwt", part, "JWT segment is not a JSON object");
            Err(Status::JwtBadFormat)
        }
        Err(e) => {
            tracing::debug!(target: "jwt_authn.jwt", part, error = %e, "Failed to parse JWT segment JSON");
            Err(Status::JwtBadFormat)
        }
    }
}

fn optional_string(map: &Map<String, Value>, name: &str) -> Result<Option<String>, Status> {
    match map.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => {
            tracing::debug!(target: "jwt_authn.jwt", field = name, "JWT field is not a string");
            Err(Status::JwtBadFormat)
        }
    }
}

fn audiences(claims: &Map<String, Value>) -> Result<Vec<String>, Status> {
    match claims.get("aud") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::String(aud)) => Ok(vec![aud.clone()]),
        Some(Value::Array(values)) => values
            .iter()
            .map(|v| v.as_str().map(ToString::to_string))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| {
                tracing::debug!(target: "jwt_authn.jwt", "JWT aud array contains a non-string");
                Status::JwtBadFormat
            }),
        Some(_) => {
            tracing::debug!(target: "jwt_authn.jwt", "JWT aud is neither string nor array");
            Err(Status::JwtBadFormat)
        }
    }
}

fn expiry(claims: &Map<String, Value>) -> Result<Option<i64>, Status> {
    match claims.get("exp") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => {
            // Fractional seconds are allowed by RFC 7519; truncate toward zero
            #[allow(clippy::cast_possible_truncation)]
            let exp = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64));
            Ok(exp)
        }
        Some(_) => {
            tracing::debug!(target: "jwt_authn.jwt", "JWT exp is not numeric");
            Err(Status::JwtBadFormat)
        }
    }
}

/// Verify the token signature against `keys`.
///
/// Only keys whose `alg` is absent or equal to the token's algorithm are
/// candidates. A token without a `kid` tries every candidate in order. A
/// token with a `kid` tries the candidates carrying that `kid` first, then
/// the candidates without a `kid`; keys bound to a different `kid` are never
/// tried.
/// `default_alg` is used when the token header has no `alg`.
///
/// # Errors
///
/// - `Status::JwtInvalidSignature` - unsupported algorithm or no key validated
/// - `Status::JwkParseError` - every candidate key failed to convert
pub fn verify_signature(
    jwt: &DecodedJwt,
    keys: &KeySet,
    default_alg: Algorithm,
) -> Result<(), Status> {
    let (alg, alg_name) = match jwt.alg() {
        Some(name) => match Algorithm::from_str(name) {
            Ok(alg) => (alg, name.to_string()),
            Err(_) => {
                tracing::debug!(target: "jwt_authn.jwt", alg = %name, "Unsupported JWT algorithm");
                return Err(Status::JwtInvalidSignature);
            }
        },
        None => (default_alg, format!("{default_alg:?}")),
    };

    let compatible: Vec<(usize, &crate::jwks::Key)> = keys
        .keys()
        .iter()
        .enumerate()
        .filter(|(_, key)| key.is_compatible(alg, &alg_name))
        .collect();

    let token_kid = jwt.kid();
    let (by_kid, fallback): (Vec<_>, Vec<_>) = compatible
        .into_iter()
        .filter(|(_, key)| {
            token_kid.is_none() || key.kid.is_none() || key.kid.as_deref() == token_kid
        })
        .partition(|(_, key)| token_kid.is_some() && key.kid.as_deref() == token_kid);

    let mut tried = 0usize;
    let mut conversion_failures = 0usize;
    for (index, key) in by_kid.into_iter().chain(fallback) {
        tried += 1;
        let decoding_key = match key.decoding_key(alg) {
            Ok(k) => k,
            Err(_) => {
                conversion_failures += 1;
                continue;
            }
        };
        match jsonwebtoken::crypto::verify(
            &jwt.signature,
            jwt.signing_input.as_bytes(),
            &decoding_key,
            alg,
        ) {
            Ok(true) => {
                tracing::debug!(target: "jwt_authn.jwt", key_index = index, kid = ?key.kid, "Signature verified");
                return Ok(());
            }
            Ok(false) => {}
            Err(e) => {
                tracing::debug!(target: "jwt_authn.jwt", key_index = index, error = %e, "Signature check errored");
            }
        }
    }

    if tried > 0 && conversion_failures == tried {
        return Err(Status::JwkParseError);
    }

    tracing::debug!(target: "jwt_authn.jwt", candidates = tried, "No key validated the signature");
    Err(Status::JwtInvalidSignature)
}

/// Validate `exp` and `aud` against the current time.
///
/// # Errors
///
/// See [`validate_claims_at`].
pub fn validate_claims(
    jwt: &DecodedJwt,
    rule: &VerificationRule,
    empty_audiences: EmptyAudiencePolicy,
) -> Result<(), Status> {
    let now = chrono::Utc::now().timestamp();
    validate_claims_at(jwt, rule, empty_audiences, now)
}

/// Deterministic claim validation against an explicit `now` (Unix seconds).
///
/// Prefer [`validate_claims`] in production code. This variant exists so that
/// boundary conditions can be unit-tested without wall-clock dependence.
///
/// # Errors
///
/// - `Status::JwtExpired` - `exp` is absent or `exp <= now`
/// - `Status::AudienceNotAllowed` - no token audience matches the rule
pub fn validate_claims_at(
    jwt: &DecodedJwt,
    rule: &VerificationRule,
    empty_audiences: EmptyAudiencePolicy,
    now: i64,
) -> Result<(), Status> {
    match jwt.expires_at() {
        Some(exp) if exp > now => {}
        exp => {
            tracing::debug!(target: "jwt_authn.jwt", exp = ?exp, now, "Token rejected: expired or no exp");
            return Err(Status::JwtExpired);
        }
    }

    let audiences = rule.audiences();
    let allowed = if audiences.is_empty() {
        empty_audiences == EmptyAudiencePolicy::AllowAny
    } else {
        audiences.matches_any(jwt.audiences())
    };
    if !allowed {
        tracing::debug!(target: "jwt_authn.jwt", issuer = %rule.issuer(), "Token rejected: audience not allowed");
        return Err(Status::AudienceNotAllowed);
    }

    Ok(())
}
