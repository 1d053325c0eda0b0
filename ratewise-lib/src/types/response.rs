use std::fmt::Display;

use http::{HeaderMap, StatusCode};
use url::Url;

use crate::executor::TransportResponse;
use crate::ratelimit::EndpointKey;
use crate::types::Result;

/// Response returned to the caller of the scheduler.
///
/// Non-2xx responses are returned as well; only `429 Too Many Requests` is
/// handled by the scheduler itself.
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    url: Url,
    headers: HeaderMap,
    body: Vec<u8>,
    endpoint: EndpointKey,
    attempts: u64,
}

impl Response {
    pub(crate) fn new(response: TransportResponse, endpoint: EndpointKey, attempts: u64) -> Self {
        Self {
            status: response.status,
            url: response.url,
            headers: response.headers,
            body: response.body,
            endpoint,
            attempts,
        }
    }

    /// HTTP status of the final attempt
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Final URL after redirects
    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    /// Response headers
    #[must_use]
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Raw response body
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Consume the response and return the body
    #[must_use]
    pub fn into_body(self) -> Vec<u8> {
        self.body
    }

    /// Response body as UTF-8 text
    ///
    /// # Errors
    ///
    /// Returns an error if the body is not valid UTF-8
    pub fn text(&self) -> Result<&str> {
        Ok(std::str::from_utf8(&self.body)?)
    }

    /// Rate-limit bucket the request was accounted to
    #[must_use]
    pub const fn endpoint(&self) -> &EndpointKey {
        &self.endpoint
    }

    /// Number of requests sent, including retries
    #[must_use]
    pub const fn attempts(&self) -> u64 {
        self.attempts
    }
}

impl Display for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.status.as_u16(), self.url)
    }
}
