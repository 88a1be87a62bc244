//! Deterministic cryptographic fixtures for testing
//!
//! Two families of fixtures:
//! - A fixed RSA JWKS with RS256 tokens pre-signed by its private key
//!   (issuer `https://example.com`, `exp` 2001001001)
//! - Seeded Ed25519 keypairs for tokens built at test time

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use jsonwebtoken::EncodingKey;
use ring::signature::{Ed25519KeyPair, KeyPair};
use thiserror::Error;

/// Test fixture error type
#[derive(Error, Debug)]
pub enum FixtureError {
    #[error("Cryptographic operation failed: {0}")]
    Crypto(String),
}

/// Issuer of every fixture token.
pub const EXAMPLE_ISSUER: &str = "https://example.com";

/// Audiences of the example rule, one per accepted spelling.
pub const EXAMPLE_AUDIENCES: [&str; 3] = [
    "example_service",
    "http://example_service1",
    "https://example_service2/",
];

/// JWKS endpoint of the example rule.
pub const EXAMPLE_JWKS_URI: &str = "https://pubkey_server/pubkey_path";

/// Upstream target of the example rule.
pub const EXAMPLE_UPSTREAM: &str = "pubkey_cluster";

/// Cache lifetime of the example rule.
pub const EXAMPLE_CACHE_SECONDS: u64 = 600;

pub const RSA_KID_1: &str = "62a93512c9ee4c7f8067b5a216dade2763d32a47";
pub const RSA_KID_2: &str = "b3319a147514df7ee5e4bcdee51350cc890cc89e";

/// Modulus shared by both keys of [`example_jwks`].
pub const RSA_MODULUS: &str = concat!(
    "up97uqrF9MWOPaPkwSaBeuAPLOr9FKcaWGdVEGzQ4f3Zq5WKVZowx9TCBxmImNJ1q",
    "mUi13pB8otwM_l5lfY1AFBMxVbQCUXntLovhDaiSvYp4wGDjFzQiYA-pUq8h6MUZBnhleYrk",
    "U7XlCBwNVyN8qNMkpLA7KFZYz-486GnV2NIJJx_4BGa3HdKwQGxi2tjuQsQvao5W4xmSVaaE",
    "WopBwMy2QmlhSFQuPUpTaywTqUcUq_6SfAHhZ4IDa_FxEd2c2z8gFGtfst9cY3lRYf-c_Zdb",
    "oY3mqN9Su3-j3z5r2SHWlhB_LNAjyWlBGsvbGPlTqDziYQwZN4aGsqVKQb9Vw",
);

/// RS256, no `kid`, `aud` of `example_service`.
pub const GOOD_TOKEN: &str = concat!(
    "eyJhbGciOiJSUzI1NiIsInR5cCI6IkpXVCJ9.eyJpc3MiOiJodHRwczovL2V4YW1wbGUu",
    "Y29tIiwic3ViIjoidGVzdEBleGFtcGxlLmNvbSIsImV4cCI6MjAwMTAwMTAwMSwiY",
    "XVkIjoiZXhhbXBsZV9zZXJ2aWNlIn0.cuui_Syud76B0tqvjESE8IZbX7vzG6xA-M",
    "Daof1qEFNIoCFT_YQPkseLSUSR2Od3TJcNKk-dKjvUEL1JW3kGnyC1dBx4f3-Xxro",
    "yL23UbR2eS8TuxO9ZcNCGkjfvH5O4mDb6cVkFHRDEolGhA7XwNiuVgkGJ5Wkrvshi",
    "h6nqKXcPNaRx9lOaRWg2PkE6ySNoyju7rNfunXYtVxPuUIkl0KMq3WXWRb_cb8a_Z",
    "EprqSZUzi_ZzzYzqBNVhIJujcNWij7JRra2sXXiSAfKjtxHQoxrX8n4V1ySWJ3_1T",
    "H_cJcdfS_RKP7YgXRWC0L16PNF5K7iqRqmjKALNe83ZFnFIw",
);

/// As [`GOOD_TOKEN`] but `exp` is 1205005587.
pub const EXPIRED_TOKEN: &str = concat!(
    "eyJhbGciOiJSUzI1NiIsInR5cCI6IkpXVCJ9.eyJpc3MiOiJodHRwczovL2V4YW1wbGUu",
    "Y29tIiwic3ViIjoidGVzdEBleGFtcGxlLmNvbSIsImV4cCI6MTIwNTAwNTU4NywiY",
    "XVkIjoiZXhhbXBsZV9zZXJ2aWNlIn0.izDa6aHNgbsbeRzucE0baXIP7SXOrgopYQ",
    "ALLFAsKq_N0GvOyqpAZA9nwCAhqCkeKWcL-9gbQe3XJa0KN3FPa2NbW4ChenIjmf2",
    "QYXOuOQaDu9QRTdHEY2Y4mRy6DiTZAsBHWGA71_cLX-rzTSO_8aC8eIqdHo898oJw",
    "3E8ISKdryYjayb9X3wtF6KLgNomoD9_nqtOkliuLElD8grO0qHKI1xQurGZNaoeyi",
    "V1AdwgX_5n3SmQTacVN0WcSgk6YJRZG6VE8PjxZP9bEameBmbSB0810giKRpdTU1-",
    "RJtjq6aCSTD4CYXtW38T5uko4V-S4zifK3BXeituUTebkgoA",
);

/// As [`GOOD_TOKEN`] but `aud` is `invalid_service`.
pub const INVALID_AUD_TOKEN: &str = concat!(
    "eyJhbGciOiJSUzI1NiIsInR5cCI6IkpXVCJ9.eyJpc3MiOiJodHRwczovL2V4YW1wbGUu",
    "Y29tIiwic3ViIjoidGVzdEBleGFtcGxlLmNvbSIsImV4cCI6MjAwMTAwMTAwMSwiY",
    "XVkIjoiaW52YWxpZF9zZXJ2aWNlIn0.B9HuVXpRDVYIvApfNQmE_l5fEMPEiPdi-s",
    "dKbTione8I_UsnYHccKZVegaF6f2uyWhAvaTPgaMosyDlJD6skadEcmZD0V4TzsYK",
    "v7eP5FQga26hZ1Kra7n9hAq4oFfH0J8aZLOvDV3tAgCNRXlh9h7QiBPeDNQlwztqE",
    "csyp1lHI3jdUhsn3InIn-vathdx4PWQWLVb-74vwsP-END-MGlOfu_TY5OZUeY-GB",
    "E4Wr06aOSU2XQjuNr6y2WJGMYFsKKWfF01kHSuyc9hjnq5UI19WrOM8s7LFP4w2iK",
    "WFIPUGmPy3aM0TiF2oFOuuMxdPR3HNdSG7EWWRwoXv7n__jA",
);

/// `aud` is `http://example_service/`.
pub const GOOD_TOKEN_AUD_HAS_PROTOCOL_SCHEME: &str = concat!(
    "eyJhbGciOiJSUzI1NiIsInR5cCI6IkpXVCJ9.eyJpc3MiOiJodHRwczovL2V4YW1wbGUu",
    "Y29tIiwic3ViIjoidGVzdEBleGFtcGxlLmNvbSIsImV4cCI6MjAwMTAwMTAwMSwiY",
    "XVkIjoiaHR0cDovL2V4YW1wbGVfc2VydmljZS8ifQ.gHqO8m3hUZZ8m7EajMQy8vB",
    "RL5o3njwU5Pg2NxU4z3AwUP6P_7MoB_ChiByjg_LQ92GjHXbHn1gAQHVOn0hERVwm",
    "VYGmNsZHm4k5pmD6orPcYV1i3DdLqqxEVyw2R1XD8bC9zK7Tc8mKTRIJYC4T1QSo8",
    "mKTzZ8M-EwAuDYa0CsWGhIfA4o3xChXKPLM2hxA4uM1A6s4AQ4ipNQ5FTgLDabgsC",
    "EpfDR3lAXSaug1NE22zX_tm0d9JnC5ZrIk3kwmPJPrnAS2_9RKTQW2e2skpAT8dUV",
    "T5aSpQxJmWIkyp4PKWmH6h4H2INS7hWyASZdX4oW-R0PMy3FAd8D6Y8740A",
);

/// `aud` is `https://example_service1/`.
pub const GOOD_TOKEN_AUD_SERVICE1: &str = concat!(
    "eyJhbGciOiJSUzI1NiIsInR5cCI6IkpXVCJ9.eyJpc3MiOiJodHRwczovL2V4YW1wbGUu",
    "Y29tIiwic3ViIjoidGVzdEBleGFtcGxlLmNvbSIsImV4cCI6MjAwMTAwMTAwMSwiY",
    "XVkIjoiaHR0cHM6Ly9leGFtcGxlX3NlcnZpY2UxLyJ9.JJq_-fzbNWykI2npW13hJ",
    "F_2_IK9JAlodt_T_kO_kSCb7ngAJvmbDhnIUKp7PX-UCEx_6sehNnLZzZeazGeDgw",
    "xcjI4zM7E1bzus_sY_Kl7MSYBx7UyW0rgbEvjJOg681Uwn8MkQh9wfQ-SuzPfe07Y",
    "O4bFMuNBiZsxS0j3_agJrbmpEPycNBSIZ0ez3aQpnDyUgZ1ZGBoVOgzXUJDXptb71",
    "nzvwse8DINafa5kOhBmQcrIADiOyTVC1IqcOvaftVcS4MTkTeCyzfsqcNQ-VeNPKY",
    "3e6wTe9brxbii-IPZFNY-1osQNnfCtYpEDjfvMjwHTielF-b55xq_tUwuqaaQ",
);

/// `aud` is `http://example_service2`.
pub const GOOD_TOKEN_AUD_SERVICE2: &str = concat!(
    "eyJhbGciOiJSUzI1NiIsInR5cCI6IkpXVCJ9.eyJpc3MiOiJodHRwczovL2V4YW1wbGUu",
    "Y29tIiwic3ViIjoidGVzdEBleGFtcGxlLmNvbSIsImV4cCI6MjAwMTAwMTAwMSwiY",
    "XVkIjoiaHR0cDovL2V4YW1wbGVfc2VydmljZTIifQ.XFPQHdA5A2rpoQgMMcCBRcW",
    "t8QrwVJAhdTgNqBjga_ebnoWZdzj9C6t-8mYYoCQ6t7bulLFbPzO8iJREo7zxN7Rn",
    "F0-15ur16LV7AYeDnH0istAiti9uy3POW3telcN374hbBVdA6sBafGqzeQ8cDpb4o",
    "0T_BIy6-kaz3ne4-UEdl8kLrR7UaA_LYrdXGomYKqwH3Q4q4mnV7mpE0YUm98AyI6",
    "Thwt7f3DTmHOMBeO_3xrLOOZgNtuXipqupkp9sb-DcCRdSokoFpGSTibvV_8RwkQo",
    "W2fdqw_ZD7WOe4sTcK27Uma9exclisHVxzJJbQOW82WdPQGicYaR_EajYzA",
);

fn rsa_jwk(kid: Option<&str>, alg: Option<&str>) -> serde_json::Value {
    let mut jwk = serde_json::json!({
        "kty": "RSA",
        "n": RSA_MODULUS,
        "e": "AQAB",
    });
    if let Some(alg) = alg {
        jwk["alg"] = alg.into();
    }
    if let Some(kid) = kid {
        jwk["kid"] = kid.into();
    }
    jwk
}

/// Build a JWKS document from JWK values.
pub fn jwks_document(keys: &[serde_json::Value]) -> String {
    serde_json::json!({ "keys": keys }).to_string()
}

/// JWKS verifying every RSA fixture token: two RS256 keys with distinct kids.
pub fn example_jwks() -> String {
    jwks_document(&[
        rsa_jwk(Some(RSA_KID_1), Some("RS256")),
        rsa_jwk(Some(RSA_KID_2), Some("RS256")),
    ])
}

/// [`example_jwks`] with `alg` removed from every key.
pub fn example_jwks_without_alg() -> String {
    jwks_document(&[rsa_jwk(Some(RSA_KID_1), None), rsa_jwk(Some(RSA_KID_2), None)])
}

/// [`example_jwks`] with `kid` removed from every key.
pub fn example_jwks_without_kid() -> String {
    jwks_document(&[rsa_jwk(None, Some("RS256")), rsa_jwk(None, Some("RS256"))])
}

/// Deterministic Ed25519 keypair.
///
/// The same seed always produces the same keypair, ensuring test reproducibility.
#[derive(Debug, Clone)]
pub struct TestKeypair {
    pub kid: Option<String>,
    pub public_key_bytes: Vec<u8>,
    pub private_key_pkcs8: Vec<u8>,
}

impl TestKeypair {
    /// # Errors
    ///
    /// Returns `FixtureError::Crypto` if ring rejects the seed.
    pub fn try_new(seed: u8, kid: Option<&str>) -> Result<Self, FixtureError> {
        // Create deterministic 32-byte seed from input
        let mut seed_bytes = [0u8; 32];
        seed_bytes[0] = seed;
        for (i, byte) in seed_bytes.iter_mut().enumerate().skip(1) {
            *byte = seed.wrapping_mul(i as u8).wrapping_add(i as u8);
        }

        let key_pair = Ed25519KeyPair::from_seed_unchecked(&seed_bytes).map_err(|e| {
            FixtureError::Crypto(format!("Failed to generate test keypair: {:?}", e))
        })?;

        Ok(Self {
            kid: kid.map(ToString::to_string),
            public_key_bytes: key_pair.public_key().as_ref().to_vec(),
            private_key_pkcs8: build_pkcs8_from_seed(&seed_bytes),
        })
    }

    /// Panicking form of [`try_new`](Self::try_new) for test bodies.
    pub fn new(seed: u8, kid: Option<&str>) -> Self {
        Self::try_new(seed, kid).expect("Failed to create test keypair")
    }

    pub fn encoding_key(&self) -> EncodingKey {
        EncodingKey::from_ed_der(&self.private_key_pkcs8)
    }

    /// OKP JWK; `alg` is included when `Some`.
    pub fn jwk(&self, alg: Option<&str>) -> serde_json::Value {
        let mut jwk = serde_json::json!({
            "kty": "OKP",
            "crv": "Ed25519",
            "x": URL_SAFE_NO_PAD.encode(&self.public_key_bytes),
            "use": "sig",
        });
        if let Some(kid) = &self.kid {
            jwk["kid"] = kid.clone().into();
        }
        if let Some(alg) = alg {
            jwk["alg"] = alg.into();
        }
        jwk
    }

    /// Single-key JWKS with `alg: EdDSA`.
    pub fn jwks(&self) -> String {
        jwks_document(&[self.jwk(Some("EdDSA"))])
    }

    /// SubjectPublicKeyInfo PEM (RFC 8410).
    pub fn public_key_pem(&self) -> String {
        // SEQUENCE { SEQUENCE { OID 1.3.101.112 } BIT STRING (0 unused bits) }
        let mut spki = vec![
            0x30, 0x2a, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x03, 0x21, 0x00,
        ];
        spki.extend_from_slice(&self.public_key_bytes);
        format!(
            "-----BEGIN PUBLIC KEY-----\n{}\n-----END PUBLIC KEY-----\n",
            STANDARD.encode(spki)
        )
    }
}

/// Build PKCS#8 v1 document from Ed25519 seed
///
/// This is a test-only utility. Production code must use ring::rand::SystemRandom.
fn build_pkcs8_from_seed(seed: &[u8; 32]) -> Vec<u8> {
    // SEQUENCE { INTEGER 0, SEQUENCE { OID 1.3.101.112 }, OCTET STRING { OCTET STRING seed } }
    let mut pkcs8 = vec![
        0x30, 0x2e, 0x02, 0x01, 0x00, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x04, 0x22, 0x04,
        0x20,
    ];
    pkcs8.extend_from_slice(seed);
    pkcs8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypair_is_deterministic() {
        let a = TestKeypair::new(1, Some("k"));
        let b = TestKeypair::new(1, Some("k"));
        assert_eq!(a.public_key_bytes, b.public_key_bytes);
        assert_eq!(a.private_key_pkcs8, b.private_key_pkcs8);
        assert_ne!(a.public_key_bytes, TestKeypair::new(2, None).public_key_bytes);
    }

    #[test]
    fn test_pkcs8_is_48_bytes() {
        assert_eq!(TestKeypair::new(1, None).private_key_pkcs8.len(), 48);
    }

    #[test]
    fn test_example_jwks_variants() {
        assert!(example_jwks().contains(RSA_KID_1));
        assert!(example_jwks().contains("RS256"));
        assert!(!example_jwks_without_alg().contains("RS256"));
        assert!(example_jwks_without_alg().contains(RSA_KID_2));
        assert!(!example_jwks_without_kid().contains(RSA_KID_1));
    }

    #[test]
    fn test_jwk_omits_kid_when_absent() {
        let jwk = TestKeypair::new(3, None).jwk(None);
        assert!(jwk.get("kid").is_none());
        assert!(jwk.get("alg").is_none());
    }
}
