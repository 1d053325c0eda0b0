use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use super::{EndpointKey, RateLimitState};
use crate::ratelimit::{
    DelayPolicy, EndpointSettings, EndpointStatus, HeaderObservation, ScheduledDelay,
};

/// A single rate-limit bucket with the state observed for it.
///
/// The state sits behind one lock which is only held to read or merge, never
/// across I/O or sleeps.
#[derive(Debug)]
pub struct Endpoint {
    /// The bucket this instance tracks
    pub key: EndpointKey,

    /// Resolved settings for this bucket
    settings: EndpointSettings,

    /// Quota and cache state from the latest responses
    state: Mutex<RateLimitState>,
}

impl Endpoint {
    /// Create an endpoint without any observed state
    #[must_use]
    pub fn new(key: EndpointKey, settings: EndpointSettings) -> Self {
        Self {
            key,
            settings,
            state: Mutex::new(RateLimitState::default()),
        }
    }

    /// Resolved settings of this endpoint
    #[must_use]
    pub const fn settings(&self) -> &EndpointSettings {
        &self.settings
    }

    /// Merge the headers of a response into the state
    pub fn observe(&self, observation: &HeaderObservation) {
        let mut state = self.lock();
        state.merge(observation);

        if state.is_rate_limited_at(observation.observed_at) {
            log::warn!(
                "Endpoint {} is rate limited for another {}s",
                self.key,
                state.seconds_until_reset_at(observation.observed_at)
            );
        } else if state.should_throttle(self.settings.throttle_threshold) {
            log::debug!(
                "Endpoint {} is running low on quota ({:?} of {:?} left)",
                self.key,
                state.remaining,
                state.limit
            );
        }
    }

    /// Delay to apply before the next request
    #[must_use]
    pub fn delay_at(&self, now: SystemTime) -> ScheduledDelay {
        let state = self.lock();
        DelayPolicy::from(&self.settings).delay_at(Some(&state), now)
    }

    /// Copy of the current state
    #[must_use]
    pub fn state(&self) -> RateLimitState {
        self.lock().clone()
    }

    /// Summary of the current state for reporting
    #[must_use]
    pub fn status_at(&self, now: SystemTime) -> EndpointStatus {
        EndpointStatus::from_state(&self.lock(), self.settings.throttle_threshold, now)
    }

    fn lock(&self) -> MutexGuard<'_, RateLimitState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::ratelimit::{DelayTier, RateLimitConfig};

    #[test]
    fn test_endpoint_creation() {
        let key = EndpointKey::from("nori_fish_api");
        let settings = RateLimitConfig::default().settings_for(&key);
        let endpoint = Endpoint::new(key.clone(), settings);

        assert_eq!(endpoint.key, key);
        assert_eq!(endpoint.state(), RateLimitState::default());
        assert_eq!(
            endpoint.delay_at(SystemTime::now()).duration,
            Duration::from_millis(500)
        );
    }

    #[test]
    fn test_observe_drives_delay() {
        let key = EndpointKey::from("wynncraft_player_api");
        let settings = RateLimitConfig::default().settings_for(&key);
        let endpoint = Endpoint::new(key, settings);

        let now = SystemTime::now();
        let mut observation = HeaderObservation::empty_at(now);
        observation.limit = Some(100);
        observation.remaining = Some(3);
        endpoint.observe(&observation);

        let delay = endpoint.delay_at(now);
        assert_eq!(delay.tier, DelayTier::Throttled);
        assert!(delay.duration > settings.delay);
        assert_eq!(endpoint.state().last_request_at, Some(now));
    }
}
