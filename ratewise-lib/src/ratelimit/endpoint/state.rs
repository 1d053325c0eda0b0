use std::time::{Duration, SystemTime};

use crate::ratelimit::HeaderObservation;

/// Quota and cache freshness last reported by an upstream.
///
/// Every field stays `None` until a response carrying it is observed.
/// Later observations only overwrite the fields they actually carry, so a
/// response without quota headers does not erase a previously seen quota.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateLimitState {
    /// Total requests allowed in the current window
    pub limit: Option<u64>,
    /// Requests left in the current window, may be negative
    pub remaining: Option<i64>,
    /// When the window resets
    pub reset_at: Option<SystemTime>,
    /// Relative cache lifetime (`Cache-Control: max-age`)
    pub cache_ttl: Option<Duration>,
    /// Absolute cache expiry (`Expires`)
    pub cache_expires_at: Option<SystemTime>,
    /// When the last response was observed
    pub last_request_at: Option<SystemTime>,
    /// Opaque API version tag
    pub api_version: Option<String>,
}

impl RateLimitState {
    /// Sticky-merge an observation into the state
    pub fn merge(&mut self, observation: &HeaderObservation) {
        fn keep<T: Clone>(field: &mut Option<T>, update: Option<&T>) {
            if let Some(value) = update {
                *field = Some(value.clone());
            }
        }

        keep(&mut self.limit, observation.limit.as_ref());
        keep(&mut self.remaining, observation.remaining.as_ref());
        keep(&mut self.reset_at, observation.reset_at.as_ref());
        keep(&mut self.cache_ttl, observation.cache_ttl.as_ref());
        keep(&mut self.cache_expires_at, observation.cache_expires_at.as_ref());
        keep(&mut self.api_version, observation.api_version.as_ref());
        self.last_request_at = Some(observation.observed_at);
    }

    /// Returns `true` if the quota is used up and the window has not reset yet
    #[must_use]
    pub fn is_rate_limited(&self) -> bool {
        self.is_rate_limited_at(SystemTime::now())
    }

    /// Like [`Self::is_rate_limited`] with an explicit clock
    #[must_use]
    pub fn is_rate_limited_at(&self, now: SystemTime) -> bool {
        self.remaining.is_some_and(|remaining| remaining <= 0)
            && self.reset_at.is_some_and(|reset_at| reset_at > now)
    }

    /// Returns `true` if the remaining quota is known and at or below `threshold`
    #[must_use]
    pub fn should_throttle(&self, threshold: u64) -> bool {
        let threshold = i64::try_from(threshold).unwrap_or(i64::MAX);
        self.remaining.is_some_and(|remaining| remaining <= threshold)
    }

    /// Returns `true` if the last announced window has already ended
    #[must_use]
    pub fn has_reset_at(&self, now: SystemTime) -> bool {
        self.reset_at.is_some_and(|reset_at| reset_at <= now)
    }

    /// Time until the window resets, zero if unknown or already past
    #[must_use]
    pub fn until_reset_at(&self, now: SystemTime) -> Duration {
        self.reset_at
            .and_then(|reset_at| reset_at.duration_since(now).ok())
            .unwrap_or(Duration::ZERO)
    }

    /// Whole seconds until the window resets, rounded up
    #[must_use]
    pub fn seconds_until_reset(&self) -> u64 {
        self.seconds_until_reset_at(SystemTime::now())
    }

    /// Like [`Self::seconds_until_reset`] with an explicit clock
    #[must_use]
    pub fn seconds_until_reset_at(&self, now: SystemTime) -> u64 {
        let until = self.until_reset_at(now);
        until.as_secs() + u64::from(until.subsec_nanos() > 0)
    }

    /// Share of the quota left, if both limit and remaining are known
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn remaining_fraction(&self) -> Option<f64> {
        match (self.remaining, self.limit) {
            (Some(remaining), Some(limit)) if limit > 0 => Some(remaining as f64 / limit as f64),
            _ => None,
        }
    }

    /// Returns `true` if a cached copy of the last response may still be used
    #[must_use]
    pub fn is_cache_fresh(&self) -> bool {
        self.is_cache_fresh_at(SystemTime::now())
    }

    /// Like [`Self::is_cache_fresh`] with an explicit clock
    #[must_use]
    pub fn is_cache_fresh_at(&self, now: SystemTime) -> bool {
        if self.cache_expires_at.is_some_and(|expires| expires > now) {
            return true;
        }
        match (self.last_request_at, self.cache_ttl) {
            // A lifetime past the end of representable time never expires
            (Some(last), Some(ttl)) => last.checked_add(ttl).is_none_or(|expires| expires > now),
            _ => false,
        }
    }
}
