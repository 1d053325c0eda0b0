use std::time::Duration;

const DEFAULT_TIMEOUT_BASE: Duration = Duration::from_secs(1);
const DEFAULT_TIMEOUT_CAP: Duration = Duration::from_secs(10);

/// Waits between retries of failed requests.
///
/// Timeouts back off exponentially from `timeout_base` up to `timeout_cap`.
/// Other transport failures wait `2^attempt` seconds plus a small linear
/// spread of `attempt * 100ms`, without a cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    timeout_base: Duration,
    timeout_cap: Duration,
}

impl Backoff {
    /// Create a backoff with a custom timeout base and cap
    #[must_use]
    pub const fn new(timeout_base: Duration, timeout_cap: Duration) -> Self {
        Self {
            timeout_base,
            timeout_cap,
        }
    }

    /// Wait before retrying after the `attempt`-th timeout (zero-based)
    #[must_use]
    pub fn timeout_delay(&self, attempt: u64) -> Duration {
        let factor = 2_u32.saturating_pow(clamp_exponent(attempt));
        self.timeout_base
            .saturating_mul(factor)
            .min(self.timeout_cap)
    }

    /// Wait before retrying after the `attempt`-th transport failure (zero-based)
    #[must_use]
    pub fn failure_delay(&self, attempt: u64) -> Duration {
        let exponential = Duration::from_secs(2_u64.saturating_pow(clamp_exponent(attempt)));
        let spread = Duration::from_millis(attempt.saturating_mul(100));
        exponential.saturating_add(spread)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT_BASE, DEFAULT_TIMEOUT_CAP)
    }
}

fn clamp_exponent(attempt: u64) -> u32 {
    u32::try_from(attempt).unwrap_or(u32::MAX)
}
