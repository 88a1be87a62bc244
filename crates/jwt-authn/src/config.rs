//! Rule schema and process configuration.
//!
//! Rules are deserialized from a JSON array of [`RuleConfig`]. Process level
//! settings are loaded from environment variables by [`Config::from_env`].

use crate::errors::ConfigError;
use crate::rules::{EmptyAudiencePolicy, StoreOptions};
use jsonwebtoken::Algorithm;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Default prefix expected before the token in a credential header.
pub const DEFAULT_VALUE_PREFIX: &str = "Bearer ";

/// Default JWKS fetch timeout in seconds.
pub const DEFAULT_FETCH_TIMEOUT_SECONDS: u64 = 10;

/// Maximum JWKS fetch timeout in seconds.
pub const MAX_FETCH_TIMEOUT_SECONDS: u64 = 60;

/// One verification rule as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleConfig {
    pub issuer: String,

    #[serde(default)]
    pub audiences: Vec<String>,

    #[serde(default)]
    pub remote_jwks: Option<RemoteJwksConfig>,

    #[serde(default)]
    pub local_jwks: Option<LocalJwksConfig>,

    /// Headers to read the credential from; empty means `Authorization: Bearer`.
    #[serde(default)]
    pub from_headers: Vec<HeaderLocationConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemoteJwksConfig {
    pub uri: String,

    /// Name resolved by the upstream resolver to a reachable service.
    pub upstream_target: String,

    /// Cache lifetime; 0 caches until restart.
    #[serde(default)]
    pub cache_duration_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocalJwksConfig {
    /// JWKS document or a PEM public key.
    pub inline_value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HeaderLocationConfig {
    pub name: String,

    #[serde(default = "default_value_prefix")]
    pub value_prefix: String,
}

fn default_value_prefix() -> String {
    DEFAULT_VALUE_PREFIX.to_string()
}

/// Parse a rules document (a JSON array of rules).
///
/// # Errors
///
/// Returns `ConfigError::Parse` if the document is not valid.
pub fn parse_rules(document: &str) -> Result<Vec<RuleConfig>, ConfigError> {
    Ok(serde_json::from_str(document)?)
}

/// Read and parse a rules file.
///
/// # Errors
///
/// Returns `ConfigError::Io` if the file cannot be read, or
/// `ConfigError::Parse` if it is not a valid rules document.
pub fn load_rules(path: &Path) -> Result<Vec<RuleConfig>, ConfigError> {
    let document = std::fs::read_to_string(path)?;
    parse_rules(&document)
}

/// Process configuration.
///
/// Loaded from environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the rules JSON document.
    pub rules_path: PathBuf,

    /// Upstream target name to base URL, for the static resolver.
    pub upstreams: HashMap<String, String>,

    /// Algorithm assumed for tokens without a header `alg` (default: RS256).
    pub default_algorithm: Algorithm,

    /// Treatment of rules that configure no audiences.
    pub empty_audiences: EmptyAudiencePolicy,

    /// Timeout for a single JWKS fetch.
    pub fetch_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if `JWT_RULES_PATH` is unset, or
    /// `ConfigError::InvalidValue` if any variable fails validation (see
    /// [`Config::from_vars`]).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    ///
    /// # Errors
    ///
    /// - `ConfigError::MissingEnvVar` - `JWT_RULES_PATH` is absent
    /// - `ConfigError::InvalidValue` - a malformed `JWT_UPSTREAMS` entry, an
    ///   unknown `JWT_DEFAULT_ALGORITHM` or `JWT_EMPTY_AUDIENCES`, or a
    ///   `JWKS_FETCH_TIMEOUT_SECONDS` outside 1..=60
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let rules_path = vars
            .get("JWT_RULES_PATH")
            .map(PathBuf::from)
            .ok_or_else(|| ConfigError::MissingEnvVar("JWT_RULES_PATH".to_string()))?;

        let upstreams = match vars.get("JWT_UPSTREAMS") {
            Some(value) => parse_upstreams(value)?,
            None => HashMap::new(),
        };

        let default_algorithm = match vars.get("JWT_DEFAULT_ALGORITHM") {
            Some(value) => Algorithm::from_str(value).map_err(|e| {
                ConfigError::InvalidValue(format!(
                    "JWT_DEFAULT_ALGORITHM must name a supported algorithm, got '{}': {}",
                    value, e
                ))
            })?,
            None => Algorithm::RS256,
        };

        let empty_audiences = match vars.get("JWT_EMPTY_AUDIENCES").map(String::as_str) {
            None | Some("allow_any") => EmptyAudiencePolicy::AllowAny,
            Some("reject_all") => EmptyAudiencePolicy::RejectAll,
            Some(other) => {
                return Err(ConfigError::InvalidValue(format!(
                    "JWT_EMPTY_AUDIENCES must be 'allow_any' or 'reject_all', got '{}'",
                    other
                )))
            }
        };

        let fetch_timeout_seconds = if let Some(value_str) = vars.get("JWKS_FETCH_TIMEOUT_SECONDS")
        {
            let value: u64 = value_str.parse().map_err(|e| {
                ConfigError::InvalidValue(format!(
                    "JWKS_FETCH_TIMEOUT_SECONDS must be a valid positive integer, got '{}': {}",
                    value_str, e
                ))
            })?;

            if value == 0 || value > MAX_FETCH_TIMEOUT_SECONDS {
                return Err(ConfigError::InvalidValue(format!(
                    "JWKS_FETCH_TIMEOUT_SECONDS must be between 1 and {}, got {}",
                    MAX_FETCH_TIMEOUT_SECONDS, value
                )));
            }

            value
        } else {
            DEFAULT_FETCH_TIMEOUT_SECONDS
        };

        Ok(Config {
            rules_path,
            upstreams,
            default_algorithm,
            empty_audiences,
            fetch_timeout: Duration::from_secs(fetch_timeout_seconds),
        })
    }

    /// Options for building a rule store from this configuration.
    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            default_algorithm: self.default_algorithm,
            empty_audiences: self.empty_audiences,
        }
    }
}

fn parse_upstreams(value: &str) -> Result<HashMap<String, String>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((name, url)) if !name.trim().is_empty() && !url.trim().is_empty() => {
                Ok((name.trim().to_string(), url.trim().to_string()))
            }
            _ => Err(ConfigError::InvalidValue(format!(
                "JWT_UPSTREAMS entries must be 'name=base_url', got '{}'",
                pair
            ))),
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn base_vars() -> HashMap<String, String> {
        HashMap::from([(
            "JWT_RULES_PATH".to_string(),
            "/etc/jwt-authn/rules.json".to_string(),
        )])
    }

    #[test]
    fn test_from_vars_success_with_defaults() {
        let config = Config::from_vars(&base_vars()).expect("Config should load successfully");

        assert_eq!(config.rules_path, PathBuf::from("/etc/jwt-authn/rules.json"));
        assert!(config.upstreams.is_empty());
        assert_eq!(config.default_algorithm, Algorithm::RS256);
        assert_eq!(config.empty_audiences, EmptyAudiencePolicy::AllowAny);
        assert_eq!(
            config.fetch_timeout,
            Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECONDS)
        );
    }

    #[test]
    fn test_from_vars_missing_rules_path() {
        let result = Config::from_vars(&HashMap::new());
        assert!(
            matches!(result, Err(ConfigError::MissingEnvVar(ref name)) if name == "JWT_RULES_PATH")
        );
    }

    #[test]
    fn test_from_vars_custom_values() {
        let mut vars = base_vars();
        vars.insert(
            "JWT_UPSTREAMS".to_string(),
            "pubkey_cluster=https://keys.example.com, other = http://localhost:9000".to_string(),
        );
        vars.insert("JWT_DEFAULT_ALGORITHM".to_string(), "ES256".to_string());
        vars.insert("JWT_EMPTY_AUDIENCES".to_string(), "reject_all".to_string());
        vars.insert("JWKS_FETCH_TIMEOUT_SECONDS".to_string(), "3".to_string());

        let config = Config::from_vars(&vars).unwrap();

        assert_eq!(
            config.upstreams.get("pubkey_cluster").map(String::as_str),
            Some("https://keys.example.com")
        );
        assert_eq!(
            config.upstreams.get("other").map(String::as_str),
            Some("http://localhost:9000")
        );
        assert_eq!(config.default_algorithm, Algorithm::ES256);
        assert_eq!(config.empty_audiences, EmptyAudiencePolicy::RejectAll);
        assert_eq!(config.fetch_timeout, Duration::from_secs(3));

        let options = config.store_options();
        assert_eq!(options.default_algorithm, Algorithm::ES256);
        assert_eq!(options.empty_audiences, EmptyAudiencePolicy::RejectAll);
    }

    #[test]
    fn test_from_vars_rejects_bad_values() {
        let cases = [
            ("JWT_DEFAULT_ALGORITHM", "none"),
            ("JWT_EMPTY_AUDIENCES", "sometimes"),
            ("JWKS_FETCH_TIMEOUT_SECONDS", "0"),
            ("JWKS_FETCH_TIMEOUT_SECONDS", "61"),
            ("JWKS_FETCH_TIMEOUT_SECONDS", "soon"),
            ("JWT_UPSTREAMS", "no-equals-sign"),
            ("JWT_UPSTREAMS", "=http://x"),
        ];
        for (key, value) in cases {
            let mut vars = base_vars();
            vars.insert(key.to_string(), value.to_string());
            let result = Config::from_vars(&vars);
            assert!(
                matches!(result, Err(ConfigError::InvalidValue(_))),
                "{key}={value} should be rejected"
            );
        }
    }

    #[test]
    fn test_fetch_timeout_boundaries() {
        for value in ["1", "60"] {
            let mut vars = base_vars();
            vars.insert("JWKS_FETCH_TIMEOUT_SECONDS".to_string(), value.to_string());
            assert!(Config::from_vars(&vars).is_ok(), "{value} should be accepted");
        }
    }

    #[test]
    fn test_parse_rules_document() {
        let rules = parse_rules(
            r#"[
                {
                    "issuer": "https://example.com",
                    "audiences": ["example_service"],
                    "remote_jwks": {
                        "uri": "https://pubkey_server/pubkey_path",
                        "upstream_target": "pubkey_cluster",
                        "cache_duration_seconds": 600
                    }
                },
                {
                    "issuer": "https://local.example.com",
                    "local_jwks": {"inline_value": "{\"keys\": []}"},
                    "from_headers": [{"name": "x-jwt-assertion", "value_prefix": ""}, {"name": "x-token"}]
                }
            ]"#,
        )
        .unwrap();

        assert_eq!(rules.len(), 2);
        let remote = rules[0].remote_jwks.as_ref().unwrap();
        assert_eq!(remote.upstream_target, "pubkey_cluster");
        assert_eq!(remote.cache_duration_seconds, 600);
        assert!(rules[0].local_jwks.is_none());
        assert!(rules[0].from_headers.is_empty());

        assert!(rules[1].audiences.is_empty());
        assert_eq!(rules[1].from_headers[0].value_prefix, "");
        assert_eq!(rules[1].from_headers[1].value_prefix, "Bearer ");
    }

    #[test]
    fn test_parse_rules_cache_duration_defaults_to_zero() {
        let rules = parse_rules(
            r#"[{"issuer": "i", "remote_jwks": {"uri": "https://h/p", "upstream_target": "c"}}]"#,
        )
        .unwrap();
        assert_eq!(rules[0].remote_jwks.as_ref().unwrap().cache_duration_seconds, 0);
    }

    #[test]
    fn test_parse_rules_rejects_unknown_fields() {
        let result = parse_rules(r#"[{"issuer": "i", "audience": ["typo"]}]"#);
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_rules_missing_file() {
        let result = load_rules(Path::new("/nonexistent/jwt-authn/rules.json"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}
