use thiserror::Error;
use url::Url;

use crate::executor::TransportError;
use crate::ratelimit::EndpointKey;

/// Boxed error type used where the concrete source is transport specific
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Possible errors when scheduling requests with `ratewise_lib`
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The bounded request queue has no free slot left.
    /// Returned immediately by `submit`, never retried.
    #[error("Request queue is full (capacity: {capacity})")]
    QueueFull {
        /// Maximum number of waiting requests
        capacity: usize,
    },

    /// The queue was shut down before the request could be served
    #[error("Request queue has been shut down")]
    QueueClosed,

    /// The scheduler was built without a request queue
    #[error("Request queue is disabled for this scheduler")]
    QueueDisabled,

    /// The endpoint kept answering `429 Too Many Requests`
    #[error("Rate limit for endpoint `{endpoint}` still exceeded after {attempts} attempts")]
    RateLimitExceeded {
        /// The endpoint bucket which was exhausted
        endpoint: EndpointKey,
        /// Number of requests sent before giving up
        attempts: u64,
    },

    /// Every attempt timed out
    #[error("Request to {url} timed out after {attempts} attempts")]
    Timeout {
        /// Target of the request
        url: Url,
        /// Number of requests sent before giving up
        attempts: u64,
        /// Error of the last attempt
        #[source]
        source: TransportError,
    },

    /// Connection or protocol failure which persisted through all retries
    #[error("Request to {url} failed after {attempts} attempts: {source}")]
    Transport {
        /// Target of the request
        url: Url,
        /// Number of requests sent before giving up
        attempts: u64,
        /// Error of the last attempt
        #[source]
        source: TransportError,
    },

    /// A worker went away without fulfilling the result handle
    #[error("Request was dropped before a result was produced")]
    ResultDropped,

    /// The HTTP client of the default transport could not be built
    #[error("Failed to build HTTP client: {0}")]
    BuildClient(#[source] reqwest::Error),

    /// The scheduler has to be created inside a Tokio runtime
    #[error("No Tokio runtime available to spawn queue workers")]
    NoRuntime(#[source] tokio::runtime::TryCurrentError),

    /// The given string can not be parsed into a valid URL
    #[error("Cannot parse `{0}` as URL")]
    InvalidUrl(String, #[source] url::ParseError),

    /// An endpoint rule contains an invalid regular expression
    #[error("Invalid endpoint rule pattern `{0}`")]
    InvalidRule(String, #[source] regex::Error),

    /// The given header could not be parsed.
    /// A possible error when converting a `HeaderValue` from a string or byte
    /// slice.
    #[error("Header could not be parsed.")]
    InvalidHeader(#[from] http::header::InvalidHeaderValue),

    /// The response body is not valid UTF-8
    #[error("Attempted to interpret an invalid sequence of bytes as a string")]
    Utf8(#[from] std::str::Utf8Error),
}

impl ErrorKind {
    /// Number of requests sent before the error was returned, if any were sent
    #[must_use]
    pub const fn attempts(&self) -> Option<u64> {
        match self {
            Self::RateLimitExceeded { attempts, .. }
            | Self::Timeout { attempts, .. }
            | Self::Transport { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }

    /// Returns `true` if the error came from a saturated or closed queue
    #[must_use]
    pub const fn is_queue_error(&self) -> bool {
        matches!(
            self,
            Self::QueueFull { .. } | Self::QueueClosed | Self::QueueDisabled
        )
    }
}
