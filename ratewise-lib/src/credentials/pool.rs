use http::HeaderValue;
use secrecy::{ExposeSecret, SecretString};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use super::{Credential, CredentialStatus, mask};
use crate::Result;
use crate::ratelimit::{HeaderObservation, RateLimitState};

#[derive(Debug)]
struct Slot {
    authorization: HeaderValue,
    masked: String,
}

/// Position in the rotation and the quota of every credential.
/// Always read and written together.
#[derive(Debug)]
struct Rotation {
    current: usize,
    states: Vec<RateLimitState>,
}

/// Fixed, ordered set of API credentials with per-credential quota tracking.
///
/// An empty pool is valid: every operation then returns `None` and requests
/// go out without an `Authorization` header.
#[derive(Debug)]
pub struct CredentialPool {
    slots: Vec<Slot>,
    rotation: Mutex<Rotation>,
    threshold: u64,
}

impl CredentialPool {
    /// Create a pool; the order of `tokens` is the rotation order.
    ///
    /// A credential counts as used up once its remaining quota is at or
    /// below `threshold`.
    ///
    /// # Errors
    ///
    /// Returns an error if a token can not be sent as a header value
    pub fn new(tokens: impl IntoIterator<Item = SecretString>, threshold: u64) -> Result<Self> {
        let slots = tokens
            .into_iter()
            .map(|token| {
                let secret = token.expose_secret();
                let mut authorization = HeaderValue::from_str(&format!("Bearer {secret}"))?;
                authorization.set_sensitive(true);
                Ok(Slot {
                    authorization,
                    masked: mask(secret),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let rotation = Rotation {
            current: 0,
            states: vec![RateLimitState::default(); slots.len()],
        };

        Ok(Self {
            slots,
            rotation: Mutex::new(rotation),
            threshold,
        })
    }

    /// Create a pool without credentials
    #[must_use]
    pub fn empty() -> Self {
        Self {
            slots: Vec::new(),
            rotation: Mutex::new(Rotation {
                current: 0,
                states: Vec::new(),
            }),
            threshold: 0,
        }
    }

    /// Number of credentials
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns `true` if the pool holds no credentials
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// The currently selected credential, without rotating
    #[must_use]
    pub fn current(&self) -> Option<Credential> {
        if self.is_empty() {
            return None;
        }
        let current = self.lock().current;
        Some(self.handle(current))
    }

    /// Pick the credential for the next request.
    ///
    /// Keeps the current credential while it has quota left. Otherwise
    /// switches to the next one in rotation order that has. If none has, the
    /// current one is returned anyway.
    #[must_use]
    pub fn acquire(&self) -> Option<Credential> {
        self.acquire_at(SystemTime::now())
    }

    /// Like [`Self::acquire`] with an explicit clock
    #[must_use]
    pub fn acquire_at(&self, now: SystemTime) -> Option<Credential> {
        if self.is_empty() {
            return None;
        }

        let mut rotation = self.lock();
        let current = rotation.current;
        if self.is_available(&rotation.states[current], now) {
            return Some(self.handle(current));
        }

        if let Some(next) = self.next_available(&rotation, now) {
            log::info!("Credential #{current} is running low on quota, switching to #{next}");
            rotation.current = next;
            return Some(self.handle(next));
        }

        log::warn!(
            "All {} credentials are exhausted, continuing with credential #{current}",
            self.len()
        );
        Some(self.handle(current))
    }

    /// Record the headers of a response to a request made with `credential`
    pub fn report(&self, credential: &Credential, observation: &HeaderObservation) {
        let mut rotation = self.lock();
        if let Some(state) = rotation.states.get_mut(credential.index) {
            state.merge(observation);
        }
    }

    /// Move away from the current credential.
    ///
    /// Prefers the next credential with quota left, otherwise simply the next
    /// one in order.
    #[must_use]
    pub fn rotate(&self) -> Option<Credential> {
        self.rotate_at(SystemTime::now())
    }

    /// Like [`Self::rotate`] with an explicit clock
    #[must_use]
    pub fn rotate_at(&self, now: SystemTime) -> Option<Credential> {
        if self.is_empty() {
            return None;
        }

        let mut rotation = self.lock();
        let current = rotation.current;
        let next = self
            .next_available(&rotation, now)
            .unwrap_or((current + 1) % self.len());
        if next != current {
            log::info!("Rotating from credential #{current} to #{next}");
            rotation.current = next;
        }
        Some(self.handle(next))
    }

    /// Status of every credential
    #[must_use]
    pub fn status(&self) -> Vec<CredentialStatus> {
        let now = SystemTime::now();
        let rotation = self.lock();
        rotation
            .states
            .iter()
            .zip(&self.slots)
            .enumerate()
            .map(|(index, (state, slot))| CredentialStatus {
                index,
                token: slot.masked.clone(),
                is_current: index == rotation.current,
                limit: state.limit,
                remaining: state.remaining,
                reset_in_seconds: state.seconds_until_reset_at(now),
                is_rate_limited: state.is_rate_limited_at(now),
                should_throttle: state.should_throttle(self.threshold),
            })
            .collect()
    }

    /// Forget all quota information and start over with the first credential
    pub fn reset(&self) {
        let mut rotation = self.lock();
        rotation.current = 0;
        for state in &mut rotation.states {
            *state = RateLimitState::default();
        }
    }

    /// A credential whose window has ended is assumed to have its quota back
    fn is_available(&self, state: &RateLimitState, now: SystemTime) -> bool {
        state.has_reset_at(now)
            || (!state.is_rate_limited_at(now) && !state.should_throttle(self.threshold))
    }

    fn next_available(&self, rotation: &Rotation, now: SystemTime) -> Option<usize> {
        let len = self.len();
        (1..len)
            .map(|offset| (rotation.current + offset) % len)
            .find(|&index| self.is_available(&rotation.states[index], now))
    }

    fn handle(&self, index: usize) -> Credential {
        Credential {
            index,
            authorization: self.slots[index].authorization.clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Rotation> {
        self.rotation.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
