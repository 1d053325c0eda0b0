use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use super::EndpointKey;
use crate::{ErrorKind, Result};

/// Built-in buckets, most specific first
const DEFAULT_RULES: &[(&str, &str)] = &[
    (r"api\.wynncraft\.com/v3/player/", "wynncraft_player_api"),
    (r"api\.wynncraft\.com/v3/", "wynncraft_api_v3"),
    (r"nori\.fish", "nori_fish_api"),
];

static DEFAULT_CLASSIFIER: LazyLock<EndpointClassifier> = LazyLock::new(|| {
    let rules = DEFAULT_RULES
        .iter()
        .map(|(pattern, key)| EndpointRule {
            pattern: Regex::new(pattern).unwrap(),
            key: EndpointKey::from(*key),
        })
        .collect();
    EndpointClassifier::new(rules)
});

/// A pattern that assigns matching targets to one endpoint key
#[derive(Debug, Clone)]
pub struct EndpointRule {
    pattern: Regex,
    key: EndpointKey,
}

impl EndpointRule {
    /// Create a rule from a regular expression
    ///
    /// # Errors
    ///
    /// Returns an error if `pattern` is not a valid regular expression
    pub fn new(pattern: &str, key: impl Into<EndpointKey>) -> Result<Self> {
        let pattern =
            Regex::new(pattern).map_err(|e| ErrorKind::InvalidRule(pattern.to_string(), e))?;
        Ok(Self {
            pattern,
            key: key.into(),
        })
    }

    /// Key assigned to matching targets
    #[must_use]
    pub const fn key(&self) -> &EndpointKey {
        &self.key
    }

    fn is_match(&self, target: &str) -> bool {
        self.pattern.is_match(target)
    }
}

/// Maps request targets onto rate-limit buckets.
///
/// Rules are checked in order and the first match wins. Query strings and
/// fragments are removed before matching, so they never split a bucket.
/// Targets no rule matches fall back to a per-host key.
///
/// Classification never fails and is stable for the lifetime of the
/// classifier.
#[derive(Debug, Clone)]
pub struct EndpointClassifier(Vec<EndpointRule>);

impl EndpointClassifier {
    /// Create a classifier from an ordered list of rules
    #[must_use]
    pub const fn new(rules: Vec<EndpointRule>) -> Self {
        Self(rules)
    }

    /// Create a classifier which only derives keys from hosts
    #[must_use]
    pub const fn host_only() -> Self {
        Self(Vec::new())
    }

    /// Put `rules` in front of the existing rules, so they take precedence
    #[must_use]
    pub fn with_leading_rules(mut self, rules: Vec<EndpointRule>) -> Self {
        self.0.splice(0..0, rules);
        self
    }

    /// Resolve the endpoint key for a target
    ///
    /// # Examples
    ///
    /// ```
    /// use ratewise_lib::EndpointClassifier;
    ///
    /// let classifier = EndpointClassifier::default();
    /// let a = classifier.classify("https://api.wynncraft.com/v3/player/Salted?fullResult");
    /// let b = classifier.classify("https://api.wynncraft.com/v3/player/Jumla");
    /// assert_eq!(a, b);
    /// assert_eq!(a.as_str(), "wynncraft_player_api");
    /// ```
    #[must_use]
    pub fn classify(&self, target: &str) -> EndpointKey {
        let target = strip_query(target);

        self.0
            .iter()
            .find(|rule| rule.is_match(target))
            .map_or_else(|| host_key(target), |rule| rule.key.clone())
    }

    /// Resolve the endpoint key for an already parsed URL
    #[must_use]
    pub fn classify_url(&self, url: &Url) -> EndpointKey {
        self.classify(url.as_str())
    }

    /// Returns `true` if there are no rules defined.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Get the number of defined rules
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl Default for EndpointClassifier {
    fn default() -> Self {
        DEFAULT_CLASSIFIER.clone()
    }
}

fn strip_query(target: &str) -> &str {
    target
        .find(['?', '#'])
        .map_or(target, |end| &target[..end])
}

/// Targets without a scheme are treated as `http` so their host is still
/// recognized.
fn host_key(target: &str) -> EndpointKey {
    let parsed = if target.contains("://") {
        Url::parse(target)
    } else {
        Url::parse(&format!("http://{target}"))
    };

    parsed.map_or_else(|_| EndpointKey::unknown(), |url| EndpointKey::from_host(&url))
}
