//! Rotation between several API credentials.
//!
//! Every credential keeps its own [`RateLimitState`](crate::RateLimitState),
//! fed from the responses to requests made with it. The pool sticks with the
//! current credential until its quota runs low, then moves on to the next one
//! in the configured order.

mod pool;

use http::HeaderValue;
use serde::Serialize;

pub use pool::CredentialPool;

/// Handle to one credential of a [`CredentialPool`].
///
/// The token itself never leaves the pool; the handle only carries the
/// prepared `Authorization` header, which is marked sensitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    index: usize,
    authorization: HeaderValue,
}

impl Credential {
    /// Position in the rotation order
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Value for the `Authorization` header
    #[must_use]
    pub const fn authorization(&self) -> &HeaderValue {
        &self.authorization
    }
}

/// Reportable view of one credential
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CredentialStatus {
    /// Position in the rotation order
    pub index: usize,
    /// Last characters of the token
    pub token: String,
    /// Currently selected credential
    pub is_current: bool,
    /// Total requests allowed in the current window
    pub limit: Option<u64>,
    /// Requests left in the current window
    pub remaining: Option<i64>,
    /// Seconds until the window resets
    pub reset_in_seconds: u64,
    /// Quota used up and not yet reset
    pub is_rate_limited: bool,
    /// Remaining quota at or below the credential threshold
    pub should_throttle: bool,
}

/// Show only the last four characters of a token
fn mask(token: &str) -> String {
    let visible: String = token
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    if visible.chars().count() == token.chars().count() {
        "****".to_string()
    } else {
        format!("****{visible}")
    }
}
