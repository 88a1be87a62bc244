//! Builder patterns for test data construction
//!
//! Provides fluent APIs for creating signed test tokens and rule configs.

use crate::crypto_fixtures::{
    TestKeypair, EXAMPLE_AUDIENCES, EXAMPLE_CACHE_SECONDS, EXAMPLE_ISSUER, EXAMPLE_JWKS_URI,
    EXAMPLE_UPSTREAM,
};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey};
use jwt_authn::config::{HeaderLocationConfig, LocalJwksConfig, RemoteJwksConfig, RuleConfig};
use serde_json::{json, Map, Value};

/// Builder for creating signed test JWTs
///
/// Defaults: `alg` EdDSA, `typ` JWT, issuer `https://example.com`, audience
/// `example_service`, expiring in one hour.
///
/// # Example
/// ```rust,ignore
/// let keypair = TestKeypair::new(1, Some("key-1"));
/// let token = TestTokenBuilder::new()
///     .kid("key-1")
///     .audience("http://example_service/")
///     .sign(&keypair);
/// ```
#[derive(Debug, Clone)]
pub struct TestTokenBuilder {
    header: Map<String, Value>,
    claims: Map<String, Value>,
}

impl TestTokenBuilder {
    /// Create a new token builder with defaults
    pub fn new() -> Self {
        let mut header = Map::new();
        header.insert("alg".to_string(), json!("EdDSA"));
        header.insert("typ".to_string(), json!("JWT"));

        let mut claims = Map::new();
        claims.insert("iss".to_string(), json!(EXAMPLE_ISSUER));
        claims.insert("sub".to_string(), json!("test@example.com"));
        claims.insert("aud".to_string(), json!("example_service"));
        claims.insert(
            "exp".to_string(),
            json!((Utc::now() + Duration::seconds(3600)).timestamp()),
        );

        Self { header, claims }
    }

    /// Set the header `kid`
    pub fn kid(mut self, kid: &str) -> Self {
        self.header.insert("kid".to_string(), json!(kid));
        self
    }

    /// Set the header `alg` (a label only; signing uses the signing method)
    pub fn alg(mut self, alg: &str) -> Self {
        self.header.insert("alg".to_string(), json!(alg));
        self
    }

    /// Remove the header `alg`
    pub fn without_alg(mut self) -> Self {
        self.header.remove("alg");
        self
    }

    pub fn issuer(mut self, issuer: &str) -> Self {
        self.claims.insert("iss".to_string(), json!(issuer));
        self
    }

    /// Set a single-string `aud`
    pub fn audience(mut self, audience: &str) -> Self {
        self.claims.insert("aud".to_string(), json!(audience));
        self
    }

    /// Set a list `aud`
    pub fn audiences(mut self, audiences: &[&str]) -> Self {
        self.claims.insert("aud".to_string(), json!(audiences));
        self
    }

    /// Set expiration in seconds from now (negative for the past)
    pub fn expires_in(mut self, seconds: i64) -> Self {
        self.claims.insert(
            "exp".to_string(),
            json!((Utc::now() + Duration::seconds(seconds)).timestamp()),
        );
        self
    }

    /// Set any claim, replacing a previous value
    pub fn claim(mut self, name: &str, value: Value) -> Self {
        self.claims.insert(name.to_string(), value);
        self
    }

    /// Remove a claim
    pub fn without_claim(mut self, name: &str) -> Self {
        self.claims.remove(name);
        self
    }

    fn signing_input(&self) -> String {
        format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(Value::Object(self.header.clone()).to_string()),
            URL_SAFE_NO_PAD.encode(Value::Object(self.claims.clone()).to_string())
        )
    }

    fn sign_with(&self, key: &EncodingKey, algorithm: Algorithm) -> String {
        let message = self.signing_input();
        let signature = jsonwebtoken::crypto::sign(message.as_bytes(), key, algorithm)
            .expect("Failed to sign token");
        format!("{message}.{signature}")
    }

    /// Sign with an Ed25519 keypair
    pub fn sign(self, keypair: &TestKeypair) -> String {
        self.sign_with(&keypair.encoding_key(), Algorithm::EdDSA)
    }

    /// Sign with an HMAC secret
    pub fn sign_hs256(self, secret: &[u8]) -> String {
        self.sign_with(&EncodingKey::from_secret(secret), Algorithm::HS256)
    }
}

impl Default for TestTokenBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for rule configs
///
/// Defaults to the example rule: issuer `https://example.com`, the three
/// example audiences, and a remote JWKS at `https://pubkey_server/pubkey_path`
/// via upstream `pubkey_cluster` cached for 600 seconds.
#[derive(Debug, Clone)]
pub struct TestRuleBuilder {
    config: RuleConfig,
}

impl TestRuleBuilder {
    pub fn new() -> Self {
        Self {
            config: RuleConfig {
                issuer: EXAMPLE_ISSUER.to_string(),
                audiences: EXAMPLE_AUDIENCES.iter().map(ToString::to_string).collect(),
                remote_jwks: Some(RemoteJwksConfig {
                    uri: EXAMPLE_JWKS_URI.to_string(),
                    upstream_target: EXAMPLE_UPSTREAM.to_string(),
                    cache_duration_seconds: EXAMPLE_CACHE_SECONDS,
                }),
                local_jwks: None,
                from_headers: Vec::new(),
            },
        }
    }

    pub fn issuer(mut self, issuer: &str) -> Self {
        self.config.issuer = issuer.to_string();
        self
    }

    pub fn audiences(mut self, audiences: &[&str]) -> Self {
        self.config.audiences = audiences.iter().map(ToString::to_string).collect();
        self
    }

    /// Replace the key source with an inline value
    pub fn inline_keys(mut self, value: &str) -> Self {
        self.config.remote_jwks = None;
        self.config.local_jwks = Some(LocalJwksConfig {
            inline_value: value.to_string(),
        });
        self
    }

    pub fn upstream(mut self, upstream: &str) -> Self {
        if let Some(remote) = self.config.remote_jwks.as_mut() {
            remote.upstream_target = upstream.to_string();
        }
        self
    }

    pub fn cache_seconds(mut self, seconds: u64) -> Self {
        if let Some(remote) = self.config.remote_jwks.as_mut() {
            remote.cache_duration_seconds = seconds;
        }
        self
    }

    /// Add a credential location
    pub fn from_header(mut self, name: &str, value_prefix: &str) -> Self {
        self.config.from_headers.push(HeaderLocationConfig {
            name: name.to_string(),
            value_prefix: value_prefix.to_string(),
        });
        self
    }

    pub fn build(self) -> RuleConfig {
        self.config
    }
}

impl Default for TestRuleBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_part(token: &str, index: usize) -> Value {
        let part = token.split('.').nth(index).unwrap();
        serde_json::from_slice(&URL_SAFE_NO_PAD.decode(part).unwrap()).unwrap()
    }

    #[test]
    fn test_builder_defaults() {
        let token = TestTokenBuilder::new().sign(&TestKeypair::new(1, None));
        assert_eq!(token.split('.').count(), 3);

        let header = decode_part(&token, 0);
        assert_eq!(header["alg"], "EdDSA");
        assert!(header.get("kid").is_none());

        let claims = decode_part(&token, 1);
        assert_eq!(claims["iss"], EXAMPLE_ISSUER);
        assert_eq!(claims["aud"], "example_service");
        assert!(claims["exp"].as_i64().unwrap() > Utc::now().timestamp());
    }

    #[test]
    fn test_builder_overrides() {
        let token = TestTokenBuilder::new()
            .kid("key-1")
            .without_alg()
            .audiences(&["a", "b"])
            .without_claim("exp")
            .claim("scope", json!("read"))
            .sign(&TestKeypair::new(1, None));

        let header = decode_part(&token, 0);
        assert_eq!(header["kid"], "key-1");
        assert!(header.get("alg").is_none());

        let claims = decode_part(&token, 1);
        assert_eq!(claims["aud"], json!(["a", "b"]));
        assert!(claims.get("exp").is_none());
        assert_eq!(claims["scope"], "read");
    }

    #[test]
    fn test_signing_is_deterministic_for_ed25519() {
        let keypair = TestKeypair::new(1, None);
        let builder = TestTokenBuilder::new().expires_in(60).claim("exp", json!(2_000_000_000));
        assert_eq!(builder.clone().sign(&keypair), builder.sign(&keypair));
    }

    #[test]
    fn test_rule_builder() {
        let rule = TestRuleBuilder::new()
            .issuer("other")
            .from_header("X-Jwt", "")
            .build();
        assert_eq!(rule.issuer, "other");
        assert_eq!(rule.audiences.len(), 3);
        assert_eq!(rule.from_headers.len(), 1);

        let inline = TestRuleBuilder::new().inline_keys("{}").build();
        assert!(inline.remote_jwks.is_none());
        assert!(inline.local_jwks.is_some());
    }
}
