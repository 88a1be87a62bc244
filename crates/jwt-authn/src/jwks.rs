//! JSON Web Key Set parsing.
//!
//! A [`KeySet`] is produced either from a JWKS document (`{"keys": [...]}`),
//! fetched remotely or configured inline, or from a single inline PEM public
//! key. JWK entries are converted into `jsonwebtoken` decoding keys up front;
//! entries that cannot be used for signature verification are skipped.
//!
//! # Security
//!
//! - Keys marked `"use": "enc"` are never used to verify signatures
//! - A key is only tried for algorithms of its own family (an RSA key never
//!   verifies an ES256 token)

use crate::errors::Status;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::{Algorithm, DecodingKey};
use serde::Deserialize;
use std::fmt;

/// JSON Web Key as it appears in a JWKS document.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    /// Key type ("RSA", "EC", "OKP", "oct").
    pub kty: String,

    /// Key ID; optional, absent keys act as wildcard candidates.
    #[serde(default)]
    pub kid: Option<String>,

    /// Algorithm; optional, absent means compatible with any algorithm of the family.
    #[serde(default)]
    pub alg: Option<String>,

    /// Key use ("sig" or "enc").
    #[serde(default, rename = "use")]
    pub key_use: Option<String>,

    /// Curve name for EC/OKP keys.
    #[serde(default)]
    pub crv: Option<String>,

    /// RSA modulus (base64url).
    #[serde(default)]
    pub n: Option<String>,

    /// RSA exponent (base64url).
    #[serde(default)]
    pub e: Option<String>,

    /// EC x coordinate or OKP public key (base64url).
    #[serde(default)]
    pub x: Option<String>,

    /// EC y coordinate (base64url).
    #[serde(default)]
    pub y: Option<String>,

    /// Symmetric key value (base64url).
    #[serde(default)]
    pub k: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JwksDocument {
    keys: Vec<serde_json::Value>,
}

/// Family of signature schemes a key can serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFamily {
    Rsa,
    Ec,
    Okp,
    Oct,
}

impl KeyFamily {
    /// Family that verifies `alg`.
    pub fn for_algorithm(alg: Algorithm) -> Self {
        match alg {
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => KeyFamily::Oct,
            Algorithm::ES256 | Algorithm::ES384 => KeyFamily::Ec,
            Algorithm::EdDSA => KeyFamily::Okp,
            Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512 => KeyFamily::Rsa,
        }
    }

    fn from_kty(kty: &str) -> Option<Self> {
        match kty {
            "RSA" => Some(KeyFamily::Rsa),
            "EC" => Some(KeyFamily::Ec),
            "OKP" => Some(KeyFamily::Okp),
            "oct" => Some(KeyFamily::Oct),
            _ => None,
        }
    }
}

/// Verification material held by a [`Key`].
#[derive(Clone)]
pub enum KeyMaterial {
    /// Converted from a JWK; usable only with algorithms of `family`.
    Jwk { family: KeyFamily, key: DecodingKey },
    /// Raw PEM public key, converted per algorithm at verification time.
    Pem(String),
}

/// One verification key.
#[derive(Clone)]
pub struct Key {
    pub kid: Option<String>,
    pub alg: Option<String>,
    pub material: KeyMaterial,
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let material = match &self.material {
            KeyMaterial::Jwk { family, .. } => format!("Jwk({family:?})"),
            KeyMaterial::Pem(_) => "Pem".to_string(),
        };
        f.debug_struct("Key")
            .field("kid", &self.kid)
            .field("alg", &self.alg)
            .field("material", &material)
            .finish()
    }
}

impl Key {
    /// Whether this key may be tried for a token signed with `alg`.
    ///
    /// A key without `alg` is compatible with every algorithm of its family.
    pub fn is_compatible(&self, alg: Algorithm, alg_name: &str) -> bool {
        if let Some(key_alg) = &self.alg {
            if key_alg != alg_name {
                return false;
            }
        }
        match &self.material {
            KeyMaterial::Jwk { family, .. } => *family == KeyFamily::for_algorithm(alg),
            KeyMaterial::Pem(_) => true,
        }
    }

    /// Decoding key for `alg`.
    ///
    /// # Errors
    ///
    /// Returns `Status::JwkParseError` if PEM material cannot be read as a key
    /// of the algorithm's family.
    pub fn decoding_key(&self, alg: Algorithm) -> Result<DecodingKey, Status> {
        match &self.material {
            KeyMaterial::Jwk { key, .. } => Ok(key.clone()),
            KeyMaterial::Pem(pem) => {
                let bytes = pem.as_bytes();
                let result = match KeyFamily::for_algorithm(alg) {
                    KeyFamily::Rsa => DecodingKey::from_rsa_pem(bytes),
                    KeyFamily::Ec => DecodingKey::from_ec_pem(bytes),
                    KeyFamily::Okp => DecodingKey::from_ed_pem(bytes),
                    KeyFamily::Oct => {
                        tracing::debug!(target: "jwt_authn.jwks", "PEM key cannot verify HMAC tokens");
                        return Err(Status::JwkParseError);
                    }
                };
                result.map_err(|e| {
                    tracing::debug!(target: "jwt_authn.jwks", error = %e, "Failed to read PEM public key");
                    Status::JwkParseError
                })
            }
        }
    }
}

/// Ordered set of verification keys.
#[derive(Debug, Clone, Default)]
pub struct KeySet {
    keys: Vec<Key>,
}

impl KeySet {
    pub fn new(keys: Vec<Key>) -> Self {
        Self { keys }
    }

    /// Parse a JWKS JSON document.
    ///
    /// # Errors
    ///
    /// Returns `Status::JwkParseError` if the document is not a JWKS object or
    /// none of its entries is a usable signature key.
    pub fn from_jwks(document: &str) -> Result<Self, Status> {
        let parsed: JwksDocument = serde_json::from_str(document).map_err(|e| {
            tracing::debug!(target: "jwt_authn.jwks", error = %e, "Failed to parse JWKS document");
            Status::JwkParseError
        })?;

        let total = parsed.keys.len();
        let keys: Vec<Key> = parsed
            .keys
            .into_iter()
            .filter_map(|value| {
                let jwk: Jwk = serde_json::from_value(value)
                    .map_err(|e| {
                        tracing::debug!(target: "jwt_authn.jwks", error = %e, "Skipping malformed JWK entry");
                    })
                    .ok()?;
                convert_jwk(jwk)
            })
            .collect();

        if keys.is_empty() {
            tracing::debug!(target: "jwt_authn.jwks", total, "JWKS contains no usable keys");
            return Err(Status::JwkParseError);
        }

        tracing::debug!(
            target: "jwt_authn.jwks",
            key_count = keys.len(),
            skipped = total - keys.len(),
            "JWKS parsed"
        );
        Ok(Self { keys })
    }

    /// Single PEM public key with neither `kid` nor `alg`.
    pub fn from_pem(pem: &str) -> Self {
        Self {
            keys: vec![Key {
                kid: None,
                alg: None,
                material: KeyMaterial::Pem(pem.to_string()),
            }],
        }
    }

    /// Parse an inline key value: PEM if it starts like one, JWKS otherwise.
    ///
    /// # Errors
    ///
    /// Returns `Status::JwkParseError` if a JWKS document is invalid.
    pub fn from_inline(value: &str) -> Result<Self, Status> {
        let trimmed = value.trim_start();
        if trimmed.starts_with("-----BEGIN") {
            Ok(Self::from_pem(trimmed))
        } else {
            Self::from_jwks(value)
        }
    }

    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

fn convert_jwk(jwk: Jwk) -> Option<Key> {
    if jwk.key_use.as_deref() == Some("enc") {
        tracing::debug!(target: "jwt_authn.jwks", kid = ?jwk.kid, "Skipping encryption key");
        return None;
    }

    let Some(family) = KeyFamily::from_kty(&jwk.kty) else {
        tracing::debug!(target: "jwt_authn.jwks", kty = %jwk.kty, "Skipping unsupported key type");
        return None;
    };

    let key = match family {
        KeyFamily::Rsa => match (&jwk.n, &jwk.e) {
            (Some(n), Some(e)) => DecodingKey::from_rsa_components(n, e).ok(),
            _ => None,
        },
        KeyFamily::Ec => match (&jwk.x, &jwk.y) {
            (Some(x), Some(y)) => DecodingKey::from_ec_components(x, y).ok(),
            _ => None,
        },
        KeyFamily::Okp => {
            if jwk.crv.as_deref().is_some_and(|crv| crv != "Ed25519") {
                None
            } else {
                jwk.x
                    .as_deref()
                    .and_then(|x| DecodingKey::from_ed_components(x).ok())
            }
        }
        KeyFamily::Oct => jwk
            .k
            .as_deref()
            .and_then(|k| URL_SAFE_NO_PAD.decode(k.trim_end_matches('=')).ok())
            .map(|secret| DecodingKey::from_secret(&secret)),
    };

    let Some(key) = key else {
        tracing::debug!(target: "jwt_authn.jwks", kid = ?jwk.kid, kty = %jwk.kty, "Skipping JWK with invalid parameters");
        return None;
    };

    Some(Key {
        kid: jwk.kid.filter(|kid| !kid.is_empty()),
        alg: jwk.alg,
        material: KeyMaterial::Jwk { family, key },
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    const RSA_N: &str = "up97uqrF9MWOPaPkwSaBeuAPLOr9FKcaWGdVEGzQ4f3Zq5WKVZowx9TCBxmImNJ1qmUi13pB8otwM_l5lfY1AFBMxVbQCUXntLovhDaiSvYp4wGDjFzQiYA-pUq8h6MUZBnhleYrkU7XlCBwNVyN8qNMkpLA7KFZYz-486GnV2NIJJx_4BGa3HdKwQGxi2tjuQsQvao5W4xmSVaaEWopBwMy2QmlhSFQuPUpTaywTqUcUq_6SfAHhZ4IDa_FxEd2c2z8gFGtfst9cY3lRYf-c_ZdboY3mqN9Su3-j3z5r2SHWlhB_LNAjyWlBGsvbGPlTqDziYQwZN4aGsqVKQb9Vw";

    fn rsa_jwk(kid: Option<&str>, alg: Option<&str>) -> serde_json::Value {
        let mut jwk = serde_json::json!({"kty": "RSA", "n": RSA_N, "e": "AQAB"});
        if let Some(kid) = kid {
            jwk["kid"] = kid.into();
        }
        if let Some(alg) = alg {
            jwk["alg"] = alg.into();
        }
        jwk
    }

    #[test]
    fn test_jwk_deserialization() {
        let json = r#"{
            "kty": "OKP",
            "kid": "test-key-01",
            "crv": "Ed25519",
            "x": "dGVzdC1wdWJsaWMta2V5LWRhdGE",
            "alg": "EdDSA",
            "use": "sig"
        }"#;

        let jwk: Jwk = serde_json::from_str(json).unwrap();

        assert_eq!(jwk.kty, "OKP");
        assert_eq!(jwk.kid.as_deref(), Some("test-key-01"));
        assert_eq!(jwk.crv.as_deref(), Some("Ed25519"));
        assert_eq!(jwk.alg.as_deref(), Some("EdDSA"));
        assert_eq!(jwk.key_use.as_deref(), Some("sig"));
    }

    #[test]
    fn test_jwk_deserialization_minimal() {
        let jwk: Jwk = serde_json::from_str(r#"{"kty": "RSA"}"#).unwrap();
        assert_eq!(jwk.kty, "RSA");
        assert!(jwk.kid.is_none());
        assert!(jwk.alg.is_none());
        assert!(jwk.n.is_none());
    }

    #[test]
    fn test_from_jwks_keeps_order_and_metadata() {
        let doc = serde_json::json!({"keys": [
            rsa_jwk(Some("key-1"), Some("RS256")),
            rsa_jwk(Some("key-2"), None),
            rsa_jwk(None, None),
        ]});

        let set = KeySet::from_jwks(&doc.to_string()).unwrap();

        assert_eq!(set.len(), 3);
        assert_eq!(set.keys()[0].kid.as_deref(), Some("key-1"));
        assert_eq!(set.keys()[0].alg.as_deref(), Some("RS256"));
        assert_eq!(set.keys()[1].kid.as_deref(), Some("key-2"));
        assert!(set.keys()[1].alg.is_none());
        assert!(set.keys()[2].kid.is_none());
    }

    #[test]
    fn test_from_jwks_rejects_non_json() {
        assert_eq!(
            KeySet::from_jwks("invalid publik key").unwrap_err(),
            Status::JwkParseError
        );
    }

    #[test]
    fn test_from_jwks_rejects_missing_keys_array() {
        assert_eq!(
            KeySet::from_jwks(r#"{"kty": "RSA"}"#).unwrap_err(),
            Status::JwkParseError
        );
    }

    #[test]
    fn test_from_jwks_rejects_document_without_usable_keys() {
        let doc = serde_json::json!({"keys": [
            {"kty": "RSA", "kid": "no-modulus"},
            {"kty": "unknown", "kid": "weird"},
        ]});
        assert_eq!(
            KeySet::from_jwks(&doc.to_string()).unwrap_err(),
            Status::JwkParseError
        );
        assert_eq!(
            KeySet::from_jwks(r#"{"keys": []}"#).unwrap_err(),
            Status::JwkParseError
        );
    }

    #[test]
    fn test_from_jwks_skips_encryption_and_malformed_entries() {
        let mut enc = rsa_jwk(Some("enc-key"), None);
        enc["use"] = "enc".into();
        let doc = serde_json::json!({"keys": [
            enc,
            {"kid": 42},
            rsa_jwk(Some("sig-key"), None),
        ]});

        let set = KeySet::from_jwks(&doc.to_string()).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.keys()[0].kid.as_deref(), Some("sig-key"));
    }

    #[test]
    fn test_oct_and_okp_keys_are_accepted() {
        let doc = serde_json::json!({"keys": [
            {"kty": "oct", "kid": "hmac", "k": "c2VjcmV0"},
            {"kty": "OKP", "crv": "Ed25519", "kid": "ed", "x": "11qYAYKxCrfVS_7TyWQHOg7hcvPapiMlrwIaaPcHURo"},
        ]});
        let set = KeySet::from_jwks(&doc.to_string()).unwrap();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_okp_with_unsupported_curve_is_skipped() {
        let doc = serde_json::json!({"keys": [
            {"kty": "OKP", "crv": "X25519", "x": "11qYAYKxCrfVS_7TyWQHOg7hcvPapiMlrwIaaPcHURo"},
        ]});
        assert!(KeySet::from_jwks(&doc.to_string()).is_err());
    }

    #[test]
    fn test_compatibility_respects_alg_and_family() {
        let doc = serde_json::json!({"keys": [
            rsa_jwk(Some("a"), Some("RS256")),
            rsa_jwk(Some("b"), None),
        ]});
        let set = KeySet::from_jwks(&doc.to_string()).unwrap();
        let with_alg = &set.keys()[0];
        let without_alg = &set.keys()[1];

        assert!(with_alg.is_compatible(Algorithm::RS256, "RS256"));
        assert!(!with_alg.is_compatible(Algorithm::RS384, "RS384"));
        assert!(without_alg.is_compatible(Algorithm::RS384, "RS384"));
        assert!(without_alg.is_compatible(Algorithm::PS256, "PS256"));
        assert!(!without_alg.is_compatible(Algorithm::ES256, "ES256"));
    }

    #[test]
    fn test_from_inline_detects_pem() {
        let pem = "-----BEGIN PUBLIC KEY-----\nMCowBQYDK2VwAyEA\n-----END PUBLIC KEY-----";
        let set = KeySet::from_inline(pem).unwrap();
        assert_eq!(set.len(), 1);
        assert!(matches!(set.keys()[0].material, KeyMaterial::Pem(_)));
        assert!(set.keys()[0].kid.is_none());
    }

    #[test]
    fn test_unreadable_pem_is_parse_error() {
        let set = KeySet::from_pem("-----BEGIN PUBLIC KEY-----\n!!!\n-----END PUBLIC KEY-----");
        let err = set.keys()[0].decoding_key(Algorithm::RS256).err().unwrap();
        assert_eq!(err, Status::JwkParseError);
    }

    #[test]
    fn test_key_debug_hides_material() {
        let set = KeySet::from_pem("-----BEGIN PUBLIC KEY-----\nsecretish\n-----END PUBLIC KEY-----");
        let debug = format!("{:?}", set.keys()[0]);
        assert!(!debug.contains("secretish"));
        assert!(debug.contains("Pem"));
    }
}
