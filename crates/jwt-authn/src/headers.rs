//! Read-only view over request headers.
//!
//! The host server owns header framing; verification only needs a
//! case-insensitive lookup by name.

use reqwest::header::HeaderMap;

/// Case-insensitive, read-only header lookup.
pub trait HeaderView {
    /// Value of the first header named `name`, if present and valid UTF-8.
    fn header(&self, name: &str) -> Option<&str>;
}

impl HeaderView for HeaderMap {
    fn header(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|value| value.to_str().ok())
    }
}

impl<K: AsRef<str>, V: AsRef<str>> HeaderView for [(K, V)] {
    fn header(&self, name: &str) -> Option<&str> {
        self.iter()
            .find(|(key, _)| key.as_ref().eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_ref())
    }
}

impl<K: AsRef<str>, V: AsRef<str>> HeaderView for Vec<(K, V)> {
    fn header(&self, name: &str) -> Option<&str> {
        self.as_slice().header(name)
    }
}

/// Where a credential may be carried: a header and the prefix before the token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialLocation {
    /// Lower-cased header name.
    pub header: String,
    /// Literal, case-sensitive prefix (e.g. `"Bearer "`).
    pub value_prefix: String,
}

impl CredentialLocation {
    pub fn new(header: &str, value_prefix: &str) -> Self {
        Self {
            header: header.to_ascii_lowercase(),
            value_prefix: value_prefix.to_string(),
        }
    }

    /// The conventional `Authorization: Bearer <token>` location.
    pub fn authorization_bearer() -> Self {
        Self::new("authorization", "Bearer ")
    }

    /// Token carried at this location, if the header exists with the prefix.
    pub fn extract<'h, H: HeaderView + ?Sized>(&self, headers: &'h H) -> Option<&'h str> {
        headers
            .header(&self.header)
            .and_then(|value| value.strip_prefix(self.value_prefix.as_str()))
    }
}
