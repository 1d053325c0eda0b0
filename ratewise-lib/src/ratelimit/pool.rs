use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::ratelimit::{
    DelayPolicy, Endpoint, EndpointKey, HeaderObservation, RateLimitConfig, RateLimitState,
    ScheduledDelay,
};

/// Tracks the rate-limit state of every endpoint seen so far.
///
/// Endpoints are created lazily on the first observed response. Each one
/// guards its own state, so concurrent requests to different endpoints never
/// contend on a shared lock.
#[derive(Debug, Clone)]
pub struct EndpointPool {
    /// Map of endpoint key to endpoint, created on-demand
    endpoints: Arc<DashMap<EndpointKey, Arc<Endpoint>>>,

    /// Global defaults and per-endpoint overrides
    config: Arc<RateLimitConfig>,
}

impl EndpointPool {
    /// Create an empty pool
    #[must_use]
    pub fn new(config: Arc<RateLimitConfig>) -> Self {
        Self {
            endpoints: Arc::new(DashMap::new()),
            config,
        }
    }

    /// Record the headers of a response for `key`
    pub fn observe(&self, key: &EndpointKey, observation: &HeaderObservation) {
        self.get_or_create_endpoint(key).observe(observation);
    }

    /// Delay before the next request to `key`
    #[must_use]
    pub fn compute_delay(&self, key: &EndpointKey) -> Duration {
        self.scheduled_delay_at(key, SystemTime::now()).duration
    }

    /// Delay before the next request to `key`, with the rule that produced it
    #[must_use]
    pub fn scheduled_delay_at(&self, key: &EndpointKey, now: SystemTime) -> ScheduledDelay {
        match self.endpoints.get(key) {
            Some(endpoint) => endpoint.delay_at(now),
            None => DelayPolicy::from(&self.config.settings_for(key)).delay_at(None, now),
        }
    }

    /// Copy of the state of `key`, if a response was observed for it
    #[must_use]
    pub fn state(&self, key: &EndpointKey) -> Option<RateLimitState> {
        self.endpoints.get(key).map(|endpoint| endpoint.state())
    }

    /// Status of one endpoint.
    ///
    /// Returns empty status for endpoints without observed responses, so the
    /// answer does not depend on whether a request was made yet.
    #[must_use]
    pub fn status(&self, key: &EndpointKey) -> EndpointStatus {
        let now = SystemTime::now();
        self.endpoints.get(key).map_or_else(
            || {
                let threshold = self.config.settings_for(key).throttle_threshold;
                EndpointStatus::from_state(&RateLimitState::default(), threshold, now)
            },
            |endpoint| endpoint.status_at(now),
        )
    }

    /// Status of every endpoint with observed responses
    #[must_use]
    pub fn all_statuses(&self) -> BTreeMap<EndpointKey, EndpointStatus> {
        let now = SystemTime::now();
        self.endpoints
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().status_at(now)))
            .collect()
    }

    /// Forget the state of one endpoint, or of all of them.
    ///
    /// Requests in flight keep their endpoint; their responses land in a
    /// freshly created one.
    pub fn reset(&self, key: Option<&EndpointKey>) {
        match key {
            Some(key) => {
                if self.endpoints.remove(key).is_some() {
                    log::info!("Reset rate limit state of endpoint {key}");
                }
            }
            None => {
                self.endpoints.clear();
                log::info!("Reset rate limit state of all endpoints");
            }
        }
    }

    /// Get the number of endpoints with observed responses
    #[must_use]
    pub fn active_endpoint_count(&self) -> usize {
        self.endpoints.len()
    }

    fn get_or_create_endpoint(&self, key: &EndpointKey) -> Arc<Endpoint> {
        if let Some(endpoint) = self.endpoints.get(key) {
            return endpoint.clone();
        }

        let endpoint = Arc::new(Endpoint::new(key.clone(), self.config.settings_for(key)));

        // Another task may have created it in the meantime
        self.endpoints
            .entry(key.clone())
            .or_insert(endpoint)
            .clone()
    }
}

impl Default for EndpointPool {
    fn default() -> Self {
        Self::new(Arc::new(RateLimitConfig::default()))
    }
}

/// Reportable view of an endpoint's [`RateLimitState`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointStatus {
    /// Total requests allowed in the current window
    pub limit: Option<u64>,
    /// Requests left in the current window
    pub remaining: Option<i64>,
    /// Seconds until the window resets
    pub reset_in_seconds: u64,
    /// Quota used up and not yet reset
    pub is_rate_limited: bool,
    /// Remaining quota at or below the throttle threshold
    pub should_throttle: bool,
    /// Relative cache lifetime
    #[serde(with = "humantime_serde")]
    pub cache_ttl: Option<Duration>,
    /// Absolute cache expiry as HTTP date
    pub cache_expires: Option<String>,
    /// Opaque API version tag
    pub api_version: Option<String>,
    /// Last observed response as HTTP date
    pub last_request_at: Option<String>,
    /// Cached responses may still be used
    pub cache_valid: bool,
}

impl EndpointStatus {
    pub(crate) fn from_state(state: &RateLimitState, threshold: u64, now: SystemTime) -> Self {
        Self {
            limit: state.limit,
            remaining: state.remaining,
            reset_in_seconds: state.seconds_until_reset_at(now),
            is_rate_limited: state.is_rate_limited_at(now),
            should_throttle: state.should_throttle(threshold),
            cache_ttl: state.cache_ttl,
            cache_expires: state.cache_expires_at.map(httpdate::fmt_http_date),
            api_version: state.api_version.clone(),
            last_request_at: state.last_request_at.map(httpdate::fmt_http_date),
            cache_valid: state.is_cache_fresh_at(now),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::ratelimit::DelayTier;

    fn observation(remaining: i64, reset_in: Option<u64>) -> HeaderObservation {
        let now = SystemTime::now();
        let mut observation = HeaderObservation::empty_at(now);
        observation.limit = Some(100);
        observation.remaining = Some(remaining);
        observation.reset_at = reset_in.map(|secs| now + Duration::from_secs(secs));
        observation
    }

    #[test]
    fn test_endpoint_pool_creation() {
        let pool = EndpointPool::default();
        assert_eq!(pool.active_endpoint_count(), 0);
        assert!(pool.all_statuses().is_empty());
    }

    #[test]
    fn test_endpoints_are_created_lazily() {
        let pool = EndpointPool::default();
        let key = EndpointKey::from("example.com_api");

        assert_eq!(pool.compute_delay(&key), Duration::from_millis(200));
        assert_eq!(pool.state(&key), None);
        assert_eq!(pool.active_endpoint_count(), 0);

        pool.observe(&key, &observation(90, None));
        assert_eq!(pool.active_endpoint_count(), 1);
        assert_eq!(pool.state(&key).unwrap().remaining, Some(90));
    }

    #[test]
    fn test_wynncraft_player_low_quota_throttles() {
        let pool = EndpointPool::default();
        let key = EndpointKey::from("wynncraft_player_api");
        let mut low = HeaderObservation::empty_at(SystemTime::now());
        low.remaining = Some(3);
        pool.observe(&key, &low);

        let status = pool.status(&key);
        assert!(status.should_throttle);
        assert!(!status.is_rate_limited);

        let delay = pool.scheduled_delay_at(&key, SystemTime::now());
        assert_eq!(delay.tier, DelayTier::Throttled);
        assert!(pool.compute_delay(&key) > Duration::from_millis(200));
    }

    #[test]
    fn test_exhausted_endpoint_waits_for_reset() {
        let pool = EndpointPool::default();
        let key = EndpointKey::from("example.com_api");
        pool.observe(&key, &observation(0, Some(60)));

        let status = pool.status(&key);
        assert!(status.is_rate_limited);
        assert!(status.reset_in_seconds > 55 && status.reset_in_seconds <= 60);

        let delay = pool.compute_delay(&key);
        assert!(delay > Duration::from_secs(55) && delay <= Duration::from_secs(60));
    }

    #[test]
    fn test_reset_single_endpoint() {
        let pool = EndpointPool::default();
        let a = EndpointKey::from("a_api");
        let b = EndpointKey::from("b_api");
        pool.observe(&a, &observation(1, None));
        pool.observe(&b, &observation(1, None));

        pool.reset(Some(&a));
        assert_eq!(pool.state(&a), None);
        assert!(pool.state(&b).is_some());

        pool.reset(None);
        assert_eq!(pool.active_endpoint_count(), 0);
    }

    #[test]
    fn test_status_of_unknown_endpoint_is_empty() {
        let pool = EndpointPool::default();
        let status = pool.status(&EndpointKey::from("never_seen_api"));
        assert_eq!(status.limit, None);
        assert_eq!(status.reset_in_seconds, 0);
        assert!(!status.is_rate_limited);
        assert!(!status.should_throttle);
        assert!(!status.cache_valid);
    }

    #[test]
    fn test_status_serialization() {
        let pool = EndpointPool::default();
        let key = EndpointKey::from("nori_fish_api");
        let mut observation = observation(4, None);
        observation.cache_ttl = Some(Duration::from_secs(300));
        observation.api_version = Some("2".to_string());
        pool.observe(&key, &observation);

        let json = serde_json::to_value(pool.all_statuses()).unwrap();
        let status = &json["nori_fish_api"];
        assert_eq!(status["remaining"], 4);
        assert_eq!(status["should_throttle"], true);
        assert_eq!(status["cache_ttl"], "5m");
        assert_eq!(status["cache_valid"], true);
        assert_eq!(status["api_version"], "2");
    }
}
