//! Audience normalization and matching.
//!
//! Audiences are compared after stripping an `http://` or `https://` scheme
//! and a single trailing `/`, so `http://svc/`, `https://svc`, and `svc` all
//! name the same audience.

use std::collections::HashSet;

/// Strip a leading `http://`/`https://` and one trailing `/`.
pub fn normalize(audience: &str) -> &str {
    let bare = audience
        .strip_prefix("https://")
        .or_else(|| audience.strip_prefix("http://"))
        .unwrap_or(audience);
    bare.strip_suffix('/').unwrap_or(bare)
}

/// Compare a token audience with a configured audience.
pub fn matches(token_audience: &str, configured_audience: &str) -> bool {
    normalize(token_audience) == normalize(configured_audience)
}

/// Pre-normalized set of configured audiences for one rule.
#[derive(Debug, Clone, Default)]
pub struct AudienceMatcher {
    normalized: HashSet<String>,
}

impl AudienceMatcher {
    pub fn new<I, S>(audiences: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            normalized: audiences
                .into_iter()
                .map(|a| normalize(a.as_ref()).to_string())
                .collect(),
        }
    }

    /// True when no audiences are configured.
    pub fn is_empty(&self) -> bool {
        self.normalized.is_empty()
    }

    /// Set intersection: any token audience matching any configured audience.
    pub fn matches_any<S: AsRef<str>>(&self, token_audiences: &[S]) -> bool {
        token_audiences
            .iter()
            .any(|aud| self.normalized.contains(normalize(aud.as_ref())))
    }
}
