use ratewise_lib::ratelimit::EndpointSettings;
use ratewise_lib::{EndpointKey, ErrorKind, RateLimitConfig, Response, StatusSummary};
use serde::Serialize;

/// Outcome of one fetched URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct RequestOutcome {
    pub(crate) url: String,
    pub(crate) endpoint: EndpointKey,
    pub(crate) status: Option<u16>,
    pub(crate) attempts: Option<u64>,
    pub(crate) error: Option<String>,
}

impl RequestOutcome {
    pub(crate) fn new(url: &str, endpoint: EndpointKey, result: &Result<Response, ErrorKind>) -> Self {
        match result {
            Ok(response) => Self {
                url: url.to_string(),
                endpoint: response.endpoint().clone(),
                status: Some(response.status().as_u16()),
                attempts: Some(response.attempts()),
                error: None,
            },
            Err(e) => Self {
                url: url.to_string(),
                endpoint,
                status: None,
                attempts: e.attempts(),
                error: Some(e.to_string()),
            },
        }
    }

    /// A 2xx response was received
    pub(crate) fn is_success(&self) -> bool {
        self.status.is_some_and(|status| (200..300).contains(&status))
    }
}

/// Everything `fetch` prints: the per-URL outcomes and the final scheduler state
#[derive(Debug, Clone, Serialize)]
pub(crate) struct FetchReport {
    pub(crate) results: Vec<RequestOutcome>,
    pub(crate) summary: StatusSummary,
}

impl FetchReport {
    pub(crate) fn successes(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    pub(crate) fn failures(&self) -> usize {
        self.results.len() - self.successes()
    }

    pub(crate) fn is_success(&self) -> bool {
        self.failures() == 0
    }
}

/// Endpoint and resolved settings of one target
#[derive(Debug, Clone, Serialize)]
pub(crate) struct TargetStatus {
    pub(crate) target: String,
    pub(crate) endpoint: EndpointKey,
    pub(crate) settings: EndpointSettings,
}

/// Everything `status` prints
#[derive(Debug, Clone, Serialize)]
pub(crate) struct StatusReport {
    pub(crate) config: RateLimitConfig,
    pub(crate) credentials: usize,
    pub(crate) targets: Vec<TargetStatus>,
}
