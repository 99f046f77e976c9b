//! Rate-limit bucket keys.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque identifier of the origin of a request, typically a network address.
///
/// The key is not authenticated in any way; it is only trusted as the bucket
/// that attempts and lockouts are counted against.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientKey(String);

impl ClientKey {
    pub fn new(key: impl Into<String>) -> Self {
        ClientKey(key.into())
    }

    /// Resolve the key for a request.
    ///
    /// The direct peer address wins. Without one, the first hop of the
    /// `X-Forwarded-For` value is used. When neither is present every such
    /// request shares the empty key.
    pub fn from_request(remote_addr: Option<&str>, forwarded_for: Option<&str>) -> Self {
        if let Some(addr) = remote_addr.map(str::trim).filter(|a| !a.is_empty()) {
            return ClientKey::new(addr);
        }

        forwarded_for
            .and_then(|chain| chain.split(',').next())
            .map(str::trim)
            .filter(|hop| !hop.is_empty())
            .map(ClientKey::new)
            .unwrap_or_default()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for ClientKey {
    fn default() -> Self {
        ClientKey(String::new())
    }
}

impl fmt::Display for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientKey {
    fn from(s: &str) -> Self {
        ClientKey::new(s)
    }
}

impl From<String> for ClientKey {
    fn from(s: String) -> Self {
        ClientKey(s)
    }
}

impl AsRef<str> for ClientKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
