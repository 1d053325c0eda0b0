use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// Key used for targets without a recognizable host
const UNKNOWN_ENDPOINT: &str = "unknown_api";

/// Identifier of one rate-limit bucket.
///
/// All requests that share a quota upstream map to the same key, e.g. every
/// player lookup of an API shares `wynncraft_player_api` regardless of the
/// player name in the path. Keys are normalized to lowercase.
///
/// # Examples
///
/// ```
/// use ratewise_lib::EndpointKey;
/// use url::Url;
///
/// let url = Url::parse("https://Example.com:8080/some/path").unwrap();
/// assert_eq!(EndpointKey::from_host(&url).as_str(), "example.com:8080_api");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct EndpointKey(String);

impl EndpointKey {
    /// Derive the fallback key from the host (and port) of a URL.
    ///
    /// URLs without a host yield [`EndpointKey::unknown`].
    #[must_use]
    pub fn from_host(url: &Url) -> Self {
        match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => Self::from(format!("{host}:{port}_api")),
            (Some(host), None) => Self::from(format!("{host}_api")),
            (None, _) => Self::unknown(),
        }
    }

    /// The key shared by all targets without a host
    #[must_use]
    pub fn unknown() -> Self {
        Self(UNKNOWN_ENDPOINT.to_string())
    }

    /// Get the key as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Get the key as an owned String
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for EndpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for EndpointKey {
    fn from(key: String) -> Self {
        EndpointKey(key.to_lowercase())
    }
}

impl From<&str> for EndpointKey {
    fn from(key: &str) -> Self {
        EndpointKey(key.to_lowercase())
    }
}

impl From<EndpointKey> for String {
    fn from(key: EndpointKey) -> Self {
        key.0
    }
}
