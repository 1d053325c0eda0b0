//! Per-endpoint rate-limit tracking and request pacing.
//!
//! Upstream APIs announce their quota through response headers. This module
//! turns those headers into a [`RateLimitState`] per rate-limit bucket and
//! derives from it how long the next request to that bucket should wait.
//!
//! # Architecture
//!
//! - [`EndpointClassifier`]: maps a request target to its [`EndpointKey`]
//! - [`RateLimitState`]: quota and cache freshness observed for one key
//! - [`Endpoint`]: a key with its state behind a lock and resolved settings
//! - [`EndpointPool`]: lazily creates endpoints and answers delay queries
//! - [`DelayPolicy`]: the pacing rules, from plain default delay to waiting
//!   out a reset
//! - [`RateLimitConfig`]: global defaults plus per-endpoint overrides

mod config;
mod delay;
mod endpoint;
mod headers;
mod pool;

pub use config::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_CREDENTIAL_THRESHOLD, DEFAULT_DELAY, DEFAULT_MAX_QUEUE_SIZE,
    DEFAULT_MAX_RETRIES, DEFAULT_QUEUE_WORKERS, DEFAULT_READ_TIMEOUT, DEFAULT_RETRY_AFTER,
    DEFAULT_THROTTLE_THRESHOLD, EndpointConfig, EndpointConfigs, EndpointSettings,
    RateLimitConfig, RuleConfig,
};
pub use delay::{DelayPolicy, DelayTier, ScheduledDelay};
pub use endpoint::{Endpoint, EndpointClassifier, EndpointKey, EndpointRule, RateLimitState};
pub use headers::{HeaderObservation, parse_retry_after};
pub use pool::{EndpointPool, EndpointStatus};
