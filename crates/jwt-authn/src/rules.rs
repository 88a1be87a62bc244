//! Verification rules keyed by issuer.
//!
//! A [`RuleStore`] is built once from configuration and never mutated.
//! Reconfiguration builds a new store and swaps it in whole (see
//! [`crate::authenticator::JwtAuthn::reconfigure`]).

use crate::audience::AudienceMatcher;
use crate::config::{RemoteJwksConfig, RuleConfig};
use crate::errors::ConfigError;
use crate::headers::CredentialLocation;
use crate::jwks::KeySet;
use jsonwebtoken::Algorithm;
use reqwest::Url;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// How a rule with no configured audiences treats token audiences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmptyAudiencePolicy {
    /// The issuer is trusted for any audience, including none.
    #[default]
    AllowAny,
    /// Every token fails with `AUDIENCE_NOT_ALLOWED`.
    RejectAll,
}

/// Store-wide verification options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    /// Algorithm assumed when a token header has no `alg`.
    pub default_algorithm: Algorithm,
    pub empty_audiences: EmptyAudiencePolicy,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            default_algorithm: Algorithm::RS256,
            empty_audiences: EmptyAudiencePolicy::AllowAny,
        }
    }
}

/// Remote JWKS endpoint, pre-parsed into the parts a fetch needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteJwks {
    /// The configured URI, verbatim.
    pub uri: String,
    /// Host (and port, when explicit) sent as the request authority.
    pub authority: String,
    /// Path plus query sent to the resolved upstream.
    pub path: String,
    pub upstream_target: String,
    /// `None` caches the key set until restart.
    pub cache_ttl: Option<Duration>,
}

impl RemoteJwks {
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidUri` if `uri` is not an absolute URL with a host.
    pub fn from_config(issuer: &str, config: &RemoteJwksConfig) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidUri {
            issuer: issuer.to_string(),
            reason,
        };

        let url = Url::parse(&config.uri).map_err(|e| invalid(e.to_string()))?;
        let host = url
            .host_str()
            .ok_or_else(|| invalid("uri has no host".to_string()))?;
        let authority = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        let path = match url.query() {
            Some(query) => format!("{}?{}", url.path(), query),
            None => url.path().to_string(),
        };

        Ok(Self {
            uri: config.uri.clone(),
            authority,
            path,
            upstream_target: config.upstream_target.clone(),
            cache_ttl: match config.cache_duration_seconds {
                0 => None,
                seconds => Some(Duration::from_secs(seconds)),
            },
        })
    }
}

/// Where a rule's signing keys come from.
#[derive(Debug, Clone)]
pub enum KeySource {
    Remote(RemoteJwks),
    /// Parsed when the rule is built; never fetched.
    Inline(Arc<KeySet>),
}

/// Trust rule for one issuer.
#[derive(Debug, Clone)]
pub struct VerificationRule {
    issuer: String,
    audiences: AudienceMatcher,
    key_source: KeySource,
    from_headers: Vec<CredentialLocation>,
}

impl VerificationRule {
    /// Build a rule, validating its key source.
    ///
    /// # Errors
    ///
    /// - `ConfigError::InvalidKeySource` - neither or both of `remote_jwks` and `local_jwks`
    /// - `ConfigError::InvalidUri` - the remote uri cannot be parsed
    /// - `ConfigError::InvalidInlineKeys` - the inline value is not a usable key set
    pub fn from_config(config: &RuleConfig) -> Result<Self, ConfigError> {
        let key_source = match (&config.remote_jwks, &config.local_jwks) {
            (Some(remote), None) => {
                KeySource::Remote(RemoteJwks::from_config(&config.issuer, remote)?)
            }
            (None, Some(local)) => {
                let keys = KeySet::from_inline(&local.inline_value)
                    .map_err(|_| ConfigError::InvalidInlineKeys(config.issuer.clone()))?;
                KeySource::Inline(Arc::new(keys))
            }
            _ => return Err(ConfigError::InvalidKeySource(config.issuer.clone())),
        };

        Ok(Self {
            issuer: config.issuer.clone(),
            audiences: AudienceMatcher::new(&config.audiences),
            key_source,
            from_headers: config
                .from_headers
                .iter()
                .map(|h| CredentialLocation::new(&h.name, &h.value_prefix))
                .collect(),
        })
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn audiences(&self) -> &AudienceMatcher {
        &self.audiences
    }

    pub fn key_source(&self) -> &KeySource {
        &self.key_source
    }

    pub fn from_headers(&self) -> &[CredentialLocation] {
        &self.from_headers
    }
}

/// Immutable issuer to rule registry.
#[derive(Debug)]
pub struct RuleStore {
    rules: HashMap<String, Arc<VerificationRule>>,
    credential_locations: Vec<CredentialLocation>,
    options: StoreOptions,
}

impl RuleStore {
    /// Build a store. Fails on the first invalid rule.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::DuplicateIssuer` if two rules name the same
    /// issuer, or any error from [`VerificationRule::from_config`].
    pub fn new(configs: &[RuleConfig], options: StoreOptions) -> Result<Self, ConfigError> {
        let mut rules = HashMap::with_capacity(configs.len());
        let mut credential_locations: Vec<CredentialLocation> = Vec::new();

        for config in configs {
            let rule = VerificationRule::from_config(config)?;
            for location in rule.from_headers() {
                if !credential_locations.contains(location) {
                    credential_locations.push(location.clone());
                }
            }
            if rules
                .insert(rule.issuer.clone(), Arc::new(rule))
                .is_some()
            {
                return Err(ConfigError::DuplicateIssuer(config.issuer.clone()));
            }
        }

        if credential_locations.is_empty() {
            credential_locations.push(CredentialLocation::authorization_bearer());
        }

        tracing::info!(
            target: "jwt_authn.rules",
            rule_count = rules.len(),
            locations = credential_locations.len(),
            "Rule store built"
        );

        Ok(Self {
            rules,
            credential_locations,
            options,
        })
    }

    /// Rule for `issuer`, if configured.
    pub fn lookup(&self, issuer: &str) -> Option<&Arc<VerificationRule>> {
        self.rules.get(issuer)
    }

    /// Header locations scanned for a credential, in first-seen order.
    pub fn credential_locations(&self) -> &[CredentialLocation] {
        &self.credential_locations
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
