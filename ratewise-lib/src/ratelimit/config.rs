use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::Result;
use crate::ratelimit::{EndpointClassifier, EndpointKey, EndpointRule};

/// Default pause before every request to the same endpoint
pub const DEFAULT_DELAY: Duration = Duration::from_millis(200);

/// Default remaining-quota threshold below which requests get slowed down
pub const DEFAULT_THROTTLE_THRESHOLD: u64 = 10;

/// Default remaining-quota threshold below which a credential is rotated away from
pub const DEFAULT_CREDENTIAL_THRESHOLD: u64 = 2;

/// Default number of requests that may wait in the queue
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 1000;

/// Default number of queue workers
pub const DEFAULT_QUEUE_WORKERS: usize = 5;

/// Default number of retries after the first attempt
pub const DEFAULT_MAX_RETRIES: u64 = 3;

/// Default time allowed to establish a connection
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default time allowed for a whole request
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Wait applied after a `429` without a usable `Retry-After` header
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(5);

/// Global scheduling configuration that applies as defaults to all endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Pause before every request to the same endpoint
    #[serde(default = "default_delay", with = "humantime_serde")]
    pub default_delay: Duration,

    /// Remaining quota at or below which requests are slowed down
    #[serde(default = "default_throttle_threshold")]
    pub throttle_threshold: u64,

    /// Remaining quota at or below which a credential counts as used up
    #[serde(default = "default_credential_threshold")]
    pub credential_threshold: u64,

    /// Maximum number of requests waiting in the queue
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// Number of worker tasks serving the queue
    #[serde(default = "default_queue_workers")]
    pub queue_workers: usize,

    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u64,

    /// Time allowed to establish a connection
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Time allowed for a whole request
    #[serde(default = "default_read_timeout", with = "humantime_serde")]
    pub read_timeout: Duration,

    /// Wait after a `429` without `Retry-After`
    #[serde(default = "default_retry_after", with = "humantime_serde")]
    pub retry_after: Duration,

    /// Additional classification rules, checked before the built-in ones
    #[serde(default)]
    pub rules: Vec<RuleConfig>,

    /// Per-endpoint overrides, layered on top of the built-in presets.
    /// An override replaces the preset of the same key as a whole.
    #[serde(
        default = "default_endpoints",
        deserialize_with = "deserialize_endpoints"
    )]
    pub endpoints: EndpointConfigs,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            default_delay: default_delay(),
            throttle_threshold: default_throttle_threshold(),
            credential_threshold: default_credential_threshold(),
            max_queue_size: default_max_queue_size(),
            queue_workers: default_queue_workers(),
            max_retries: default_max_retries(),
            connect_timeout: default_connect_timeout(),
            read_timeout: default_read_timeout(),
            retry_after: default_retry_after(),
            rules: Vec::new(),
            endpoints: default_endpoints(),
        }
    }
}

const fn default_delay() -> Duration {
    DEFAULT_DELAY
}

const fn default_throttle_threshold() -> u64 {
    DEFAULT_THROTTLE_THRESHOLD
}

const fn default_credential_threshold() -> u64 {
    DEFAULT_CREDENTIAL_THRESHOLD
}

const fn default_max_queue_size() -> usize {
    DEFAULT_MAX_QUEUE_SIZE
}

const fn default_queue_workers() -> usize {
    DEFAULT_QUEUE_WORKERS
}

const fn default_max_retries() -> u64 {
    DEFAULT_MAX_RETRIES
}

const fn default_connect_timeout() -> Duration {
    DEFAULT_CONNECT_TIMEOUT
}

const fn default_read_timeout() -> Duration {
    DEFAULT_READ_TIMEOUT
}

const fn default_retry_after() -> Duration {
    DEFAULT_RETRY_AFTER
}

/// Presets for the APIs this scheduler was first written against
fn default_endpoints() -> EndpointConfigs {
    let wynncraft = EndpointConfig {
        delay: Some(Duration::from_millis(200)),
        throttle_threshold: Some(10),
        max_retries: Some(3),
        ..EndpointConfig::default()
    };
    let nori_fish = EndpointConfig {
        delay: Some(Duration::from_millis(500)),
        throttle_threshold: Some(5),
        max_retries: Some(2),
        ..EndpointConfig::default()
    };

    HashMap::from([
        (EndpointKey::from("wynncraft_player_api"), wynncraft),
        (EndpointKey::from("wynncraft_api_v3"), wynncraft),
        (EndpointKey::from("nori_fish_api"), nori_fish),
    ])
}

fn deserialize_endpoints<'de, D>(deserializer: D) -> std::result::Result<EndpointConfigs, D::Error>
where
    D: Deserializer<'de>,
{
    let overrides = EndpointConfigs::deserialize(deserializer)?;
    let mut endpoints = default_endpoints();
    endpoints.extend(overrides);
    Ok(endpoints)
}

impl RateLimitConfig {
    /// Layer `overrides` on top of the configured endpoints
    #[must_use]
    pub fn with_endpoint_overrides(mut self, overrides: EndpointConfigs) -> Self {
        self.endpoints.extend(overrides);
        self
    }

    /// Settings for `key`, with endpoint overrides falling back to the global values
    #[must_use]
    pub fn settings_for(&self, key: &EndpointKey) -> EndpointSettings {
        self.endpoints
            .get(key)
            .copied()
            .unwrap_or_default()
            .resolve(self)
    }

    /// Build the classifier: configured rules first, then the built-in ones
    ///
    /// # Errors
    ///
    /// Returns an error if a configured rule is not a valid regular expression
    pub fn classifier(&self) -> Result<EndpointClassifier> {
        let rules = self
            .rules
            .iter()
            .map(|rule| EndpointRule::new(&rule.pattern, rule.endpoint.clone()))
            .collect::<Result<Vec<_>>>()?;
        Ok(EndpointClassifier::default().with_leading_rules(rules))
    }
}

/// Per-endpoint configuration overrides
pub type EndpointConfigs = HashMap<EndpointKey, EndpointConfig>;

/// Configuration for a specific endpoint's scheduling behavior
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EndpointConfig {
    /// Pause before every request to this endpoint
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub delay: Option<Duration>,

    /// Remaining quota at or below which requests are slowed down
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub throttle_threshold: Option<u64>,

    /// Retries after the first attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u64>,

    /// Time allowed to establish a connection
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub connect_timeout: Option<Duration>,

    /// Time allowed for a whole request
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub read_timeout: Option<Duration>,
}

impl EndpointConfig {
    /// Get the effective delay, falling back to the global default
    #[must_use]
    pub fn effective_delay(&self, global_config: &RateLimitConfig) -> Duration {
        self.delay.unwrap_or(global_config.default_delay)
    }

    /// Get the effective throttle threshold, falling back to the global default
    #[must_use]
    pub fn effective_throttle_threshold(&self, global_config: &RateLimitConfig) -> u64 {
        self.throttle_threshold
            .unwrap_or(global_config.throttle_threshold)
    }

    /// Get the effective retry budget, falling back to the global default
    #[must_use]
    pub fn effective_max_retries(&self, global_config: &RateLimitConfig) -> u64 {
        self.max_retries.unwrap_or(global_config.max_retries)
    }

    /// Get the effective connect timeout, falling back to the global default
    #[must_use]
    pub fn effective_connect_timeout(&self, global_config: &RateLimitConfig) -> Duration {
        self.connect_timeout
            .unwrap_or(global_config.connect_timeout)
    }

    /// Get the effective read timeout, falling back to the global default
    #[must_use]
    pub fn effective_read_timeout(&self, global_config: &RateLimitConfig) -> Duration {
        self.read_timeout.unwrap_or(global_config.read_timeout)
    }

    fn resolve(self, global_config: &RateLimitConfig) -> EndpointSettings {
        EndpointSettings {
            delay: self.effective_delay(global_config),
            throttle_threshold: self.effective_throttle_threshold(global_config),
            max_retries: self.effective_max_retries(global_config),
            connect_timeout: self.effective_connect_timeout(global_config),
            read_timeout: self.effective_read_timeout(global_config),
        }
    }
}

/// Fully resolved settings of one endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EndpointSettings {
    /// Pause before every request
    #[serde(with = "humantime_serde")]
    pub delay: Duration,
    /// Remaining quota at or below which requests are slowed down
    pub throttle_threshold: u64,
    /// Retries after the first attempt
    pub max_retries: u64,
    /// Time allowed to establish a connection
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Time allowed for a whole request
    #[serde(with = "humantime_serde")]
    pub read_timeout: Duration,
}

/// A classification rule as written in the configuration file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleConfig {
    /// Regular expression matched against the target without its query string
    pub pattern: String,
    /// Endpoint key assigned to matching targets
    pub endpoint: EndpointKey,
}
