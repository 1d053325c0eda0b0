use std::time::{Duration, SystemTime};

use strum::Display;

use crate::ratelimit::{EndpointSettings, RateLimitState};

/// Throttle delays by remaining share of the quota, lowest share first
const THROTTLE_TIERS: &[(f64, Duration)] = &[
    (0.1, Duration::from_secs(2)),
    (0.2, Duration::from_secs(1)),
];

/// Throttle delay once more than the last tier's share of the quota is left
const THROTTLE_FLOOR: Duration = Duration::from_millis(500);

/// Which pacing rule produced a delay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum DelayTier {
    /// Quota is fine or unknown
    Default,
    /// Remaining quota is at or below the throttle threshold
    Throttled,
    /// Quota is used up until the window resets
    RateLimited,
}

/// Delay to wait before the next request, and why
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledDelay {
    /// How long to wait
    pub duration: Duration,
    /// Rule that produced the duration
    pub tier: DelayTier,
}

/// Pacing rules of one endpoint.
///
/// The delay never drops below the endpoint's default delay, except while
/// waiting out a reset, and grows as the remaining share of the quota
/// shrinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayPolicy {
    default_delay: Duration,
    throttle_threshold: u64,
}

impl DelayPolicy {
    /// Create a policy from a default delay and a throttle threshold
    #[must_use]
    pub const fn new(default_delay: Duration, throttle_threshold: u64) -> Self {
        Self {
            default_delay,
            throttle_threshold,
        }
    }

    /// Delay before the next request, given the state observed so far
    #[must_use]
    pub fn delay_at(&self, state: Option<&RateLimitState>, now: SystemTime) -> ScheduledDelay {
        let Some(state) = state else {
            return self.unthrottled();
        };

        if state.is_rate_limited_at(now) {
            return ScheduledDelay {
                duration: state.until_reset_at(now),
                tier: DelayTier::RateLimited,
            };
        }

        if state.should_throttle(self.throttle_threshold) {
            return ScheduledDelay {
                duration: throttle_delay(state.remaining_fraction()).max(self.default_delay),
                tier: DelayTier::Throttled,
            };
        }

        self.unthrottled()
    }

    const fn unthrottled(&self) -> ScheduledDelay {
        ScheduledDelay {
            duration: self.default_delay,
            tier: DelayTier::Default,
        }
    }
}

impl From<&EndpointSettings> for DelayPolicy {
    fn from(settings: &EndpointSettings) -> Self {
        Self::new(settings.delay, settings.throttle_threshold)
    }
}

fn throttle_delay(remaining_fraction: Option<f64>) -> Duration {
    let Some(fraction) = remaining_fraction else {
        return THROTTLE_FLOOR;
    };

    THROTTLE_TIERS
        .iter()
        .find(|(max_fraction, _)| fraction <= *max_fraction)
        .map_or(THROTTLE_FLOOR, |(_, delay)| *delay)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    const DEFAULT: Duration = Duration::from_millis(200);

    fn policy() -> DelayPolicy {
        DelayPolicy::new(DEFAULT, 10)
    }

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn state(limit: u64, remaining: i64) -> RateLimitState {
        RateLimitState {
            limit: Some(limit),
            remaining: Some(remaining),
            ..RateLimitState::default()
        }
    }

    #[test]
    fn test_no_state_uses_default() {
        let delay = policy().delay_at(None, at(0));
        assert_eq!(delay.duration, DEFAULT);
        assert_eq!(delay.tier, DelayTier::Default);
    }

    #[test]
    fn test_plenty_of_quota_uses_default() {
        let delay = policy().delay_at(Some(&state(100, 80)), at(0));
        assert_eq!(delay.duration, DEFAULT);
        assert_eq!(delay.tier, DelayTier::Default);
    }

    #[rstest]
    #[case(100, 10, Duration::from_secs(2))]
    #[case(100, 1, Duration::from_secs(2))]
    #[case(50, 10, Duration::from_secs(1))]
    #[case(20, 10, Duration::from_millis(500))]
    fn test_throttle_tiers(#[case] limit: u64, #[case] remaining: i64, #[case] expected: Duration) {
        let delay = policy().delay_at(Some(&state(limit, remaining)), at(0));
        assert_eq!(delay.tier, DelayTier::Throttled);
        assert_eq!(delay.duration, expected);
    }

    #[test]
    fn test_throttle_without_limit_uses_smallest_tier() {
        let state = RateLimitState {
            remaining: Some(3),
            ..RateLimitState::default()
        };
        assert_eq!(
            policy().delay_at(Some(&state), at(0)).duration,
            Duration::from_millis(500)
        );
    }

    #[test]
    fn test_throttle_never_below_default() {
        let slow = DelayPolicy::new(Duration::from_millis(1500), 10);
        assert_eq!(
            slow.delay_at(Some(&state(20, 10)), at(0)).duration,
            Duration::from_millis(1500)
        );
    }

    #[test]
    fn test_throttle_is_monotonic_in_remaining_share() {
        let policy = DelayPolicy::new(DEFAULT, 100);
        let delays: Vec<Duration> = (0..=100)
            .map(|remaining| policy.delay_at(Some(&state(100, remaining)), at(0)).duration)
            .collect();
        assert!(delays.windows(2).all(|pair| pair[0] >= pair[1]));
    }

    #[test]
    fn test_rate_limited_waits_for_reset() {
        let state = RateLimitState {
            reset_at: Some(at(130)),
            ..state(100, 0)
        };
        let delay = policy().delay_at(Some(&state), at(100));
        assert_eq!(delay.tier, DelayTier::RateLimited);
        assert_eq!(delay.duration, Duration::from_secs(30));
    }

    #[test]
    fn test_reset_in_the_past_is_not_rate_limited() {
        let state = RateLimitState {
            reset_at: Some(at(50)),
            ..state(100, 0)
        };
        let delay = policy().delay_at(Some(&state), at(100));
        assert_eq!(delay.tier, DelayTier::Throttled);
        assert_eq!(delay.duration, Duration::from_secs(2));
    }

    #[test]
    fn test_tier_display() {
        assert_eq!(DelayTier::RateLimited.to_string(), "rate-limited");
    }
}
