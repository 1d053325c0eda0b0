//! Handle rate limiting and cache headers.
//!
//! Header names for quotas are not standardised yet (see the
//! [IETF draft](https://datatracker.ietf.org/doc/draft-ietf-httpapi-ratelimit-headers/)),
//! so the common spellings are all accepted.

use headers::{CacheControl, Expires, HeaderMapExt};
use http::{HeaderMap, HeaderValue};
use std::str::FromStr;
use std::time::{Duration, SystemTime};
use thiserror::Error;

const LIMIT_HEADERS: &[&str] = &["ratelimit-limit", "x-ratelimit-limit", "x-rate-limit-limit"];

const REMAINING_HEADERS: &[&str] = &[
    "ratelimit-remaining",
    "x-ratelimit-remaining",
    "x-rate-limit-remaining",
];

const RESET_HEADERS: &[&str] = &["ratelimit-reset", "x-ratelimit-reset", "x-rate-limit-reset"];

const VERSION_HEADER: &str = "version";

/// Reset values above this are Unix timestamps rather than countdowns
const EPOCH_RESET_THRESHOLD: u64 = 1_000_000_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum RetryAfterParseError {
    #[error("Unable to parse value '{0}'")]
    ValueError(String),

    #[error("Header value contains invalid chars")]
    HeaderValueError,
}

/// Parse the "Retry-After" header as specified per
/// [RFC 7231 section 7.1.3](https://www.rfc-editor.org/rfc/rfc7231#section-7.1.3).
///
/// Returns `None` when the header is absent or malformed.
#[must_use]
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(http::header::RETRY_AFTER)?;
    match parse_retry_after_value(value) {
        Ok(duration) => Some(duration),
        Err(e) => {
            log::warn!("Ignoring malformed Retry-After header: {e}");
            None
        }
    }
}

fn parse_retry_after_value(value: &HeaderValue) -> Result<Duration, RetryAfterParseError> {
    let value = value
        .to_str()
        .map_err(|_| RetryAfterParseError::HeaderValueError)?;

    // RFC 7231: Retry-After = HTTP-date / delay-seconds
    value.parse::<u64>().map(Duration::from_secs).or_else(|_| {
        httpdate::parse_http_date(value)
            .map(|s| {
                s.duration_since(SystemTime::now())
                    // if date is in the past, we can use ZERO
                    .unwrap_or(Duration::ZERO)
            })
            .map_err(|_| RetryAfterParseError::ValueError(value.into()))
    })
}

/// Everything a single response tells about quota and cache freshness.
///
/// Each header family is parsed on its own: a malformed value is logged and
/// leaves only its own fields empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderObservation {
    /// Total requests allowed in the current window
    pub limit: Option<u64>,
    /// Requests left in the current window, may be negative
    pub remaining: Option<i64>,
    /// When the window resets
    pub reset_at: Option<SystemTime>,
    /// `max-age` of the `Cache-Control` header
    pub cache_ttl: Option<Duration>,
    /// Absolute expiry from the `Expires` header
    pub cache_expires_at: Option<SystemTime>,
    /// Value of the `Version` header
    pub api_version: Option<String>,
    /// When the response was observed
    pub observed_at: SystemTime,
}

impl HeaderObservation {
    /// Parse the headers of a response received just now
    #[must_use]
    pub fn parse(headers: &HeaderMap) -> Self {
        Self::parse_at(headers, SystemTime::now())
    }

    /// Parse the headers of a response received at `now`
    #[must_use]
    pub fn parse_at(headers: &HeaderMap, now: SystemTime) -> Self {
        let (limit, remaining) = parse_quota(headers);
        let (cache_ttl, cache_expires_at) = parse_cache(headers);

        Self {
            limit,
            remaining,
            reset_at: parse_reset(headers, now),
            cache_ttl,
            cache_expires_at,
            api_version: parse_version(headers),
            observed_at: now,
        }
    }

    /// An observation without any header information
    #[must_use]
    pub const fn empty_at(now: SystemTime) -> Self {
        Self {
            limit: None,
            remaining: None,
            reset_at: None,
            cache_ttl: None,
            cache_expires_at: None,
            api_version: None,
            observed_at: now,
        }
    }
}

fn parse_quota(headers: &HeaderMap) -> (Option<u64>, Option<i64>) {
    (
        parse_header_value(headers, LIMIT_HEADERS),
        parse_header_value(headers, REMAINING_HEADERS),
    )
}

fn parse_reset(headers: &HeaderMap, now: SystemTime) -> Option<SystemTime> {
    let seconds: u64 = parse_header_value(headers, RESET_HEADERS)?;
    let base = if seconds >= EPOCH_RESET_THRESHOLD {
        SystemTime::UNIX_EPOCH
    } else {
        now
    };
    base.checked_add(Duration::from_secs(seconds))
}

fn parse_cache(headers: &HeaderMap) -> (Option<Duration>, Option<SystemTime>) {
    let ttl = match headers.typed_try_get::<CacheControl>() {
        Ok(cache_control) => cache_control.and_then(|c| c.max_age()),
        Err(e) => {
            log::warn!("Ignoring malformed Cache-Control header: {e}");
            None
        }
    };

    let expires = match headers.typed_try_get::<Expires>() {
        Ok(expires) => expires.map(SystemTime::from),
        Err(e) => {
            log::warn!("Ignoring malformed Expires header: {e}");
            None
        }
    };

    (ttl, expires)
}

fn parse_version(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(VERSION_HEADER)?;
    match value.to_str() {
        Ok(version) => Some(version.trim().to_string()),
        Err(e) => {
            log::warn!("Ignoring malformed Version header: {e}");
            None
        }
    }
}

/// Parse the first present header out of `header_names`.
/// Malformed values are logged and the next spelling is tried.
fn parse_header_value<T: FromStr>(headers: &HeaderMap, header_names: &[&str]) -> Option<T> {
    for header_name in header_names {
        let Some(value) = headers.get(*header_name) else {
            continue;
        };
        match value.to_str().ok().map(str::trim).map(str::parse::<T>) {
            Some(Ok(number)) => return Some(number),
            _ => log::warn!("Ignoring malformed {header_name} header: {value:?}"),
        }
    }
    None
}
