//! Sending requests: pacing, credential selection, header ingestion and
//! retries.
//!
//! [`RequestExecutor`] drives a single request through the full cycle. It is
//! used both for direct calls and by the queue workers.

mod backoff;
mod transport;

use http::StatusCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use url::Url;

pub use backoff::Backoff;
pub use transport::{
    ReqwestTransport, Transport, TransportError, TransportRequest, TransportResponse,
};

use crate::credentials::{Credential, CredentialPool};
use crate::ratelimit::{
    EndpointClassifier, EndpointKey, EndpointPool, EndpointSettings, HeaderObservation,
    RateLimitConfig, parse_retry_after,
};
use crate::types::{ErrorKind, RequestOptions, Response, Result};

/// Sends requests on behalf of callers while respecting upstream rate limits.
///
/// Cloning is cheap; all clones share endpoint and credential state.
#[derive(Debug, Clone)]
pub struct RequestExecutor {
    transport: Arc<dyn Transport>,
    classifier: Arc<EndpointClassifier>,
    endpoints: EndpointPool,
    credentials: Arc<CredentialPool>,
    config: Arc<RateLimitConfig>,
    backoff: Backoff,
}

impl RequestExecutor {
    /// Create an executor sending through `transport`
    ///
    /// # Errors
    ///
    /// Returns an error if a configured classification rule is invalid
    pub fn new(
        transport: Arc<dyn Transport>,
        config: Arc<RateLimitConfig>,
        credentials: Arc<CredentialPool>,
    ) -> Result<Self> {
        Ok(Self {
            transport,
            classifier: Arc::new(config.classifier()?),
            endpoints: EndpointPool::new(config.clone()),
            credentials,
            config,
            backoff: Backoff::default(),
        })
    }

    /// Replace the retry backoff
    #[must_use]
    pub const fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Per-endpoint rate-limit state
    #[must_use]
    pub const fn endpoints(&self) -> &EndpointPool {
        &self.endpoints
    }

    /// Credentials used for outgoing requests
    #[must_use]
    pub fn credentials(&self) -> &CredentialPool {
        &self.credentials
    }

    /// Classifier mapping targets to endpoint keys
    #[must_use]
    pub fn classifier(&self) -> &EndpointClassifier {
        &self.classifier
    }

    /// Effective configuration
    #[must_use]
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Send a request to `url`.
    ///
    /// Every attempt waits for the endpoint's delay first. A `429 Too Many
    /// Requests` is answered by rotating the credential, waiting for
    /// `Retry-After` and sending one extra attempt that does not count
    /// against the retry budget. The `Retry-After` wait takes the place of
    /// the endpoint delay for the attempt that follows it. Further `429`s, timeouts and transport
    /// failures are retried until the budget is used up.
    ///
    /// Any other response is returned as is, including client and server
    /// errors.
    ///
    /// # Errors
    ///
    /// Returns an error once the retry budget is exhausted:
    /// [`ErrorKind::RateLimitExceeded`], [`ErrorKind::Timeout`] or
    /// [`ErrorKind::Transport`], depending on the last attempt.
    pub async fn execute(&self, url: Url, options: RequestOptions) -> Result<Response> {
        let key = self.classifier.classify_url(&url);
        let settings = self.config.settings_for(&key);
        let max_retries = options.max_retries.unwrap_or(settings.max_retries);

        let mut sent: u64 = 0;
        let mut retries: u64 = 0;
        let mut rate_limit_retried = false;
        let mut skip_pace = false;

        loop {
            if !skip_pace {
                self.pace(&key).await;
            }
            skip_pace = false;

            let credential = self.credentials.acquire();
            let request = prepare(&url, &options, credential.as_ref(), &settings);
            sent += 1;
            log::debug!("Sending {} {url} (attempt {sent}, endpoint {key})", options.method);

            let error = match self.transport.send(request).await {
                Ok(response) => {
                    self.ingest(&key, credential.as_ref(), &response.headers);
                    if response.status != StatusCode::TOO_MANY_REQUESTS {
                        return Ok(Response::new(response, key, sent));
                    }

                    if rate_limit_retried {
                        if retries >= max_retries {
                            return Err(ErrorKind::RateLimitExceeded {
                                endpoint: key,
                                attempts: sent,
                            });
                        }
                        retries += 1;
                    }
                    rate_limit_retried = true;

                    let wait =
                        parse_retry_after(&response.headers).unwrap_or(self.config.retry_after);
                    log::warn!("Rate limited by {url} (endpoint {key}), retrying in {wait:?}");
                    let _ = self.credentials.rotate();
                    sleep(wait).await;
                    skip_pace = true;
                    continue;
                }
                Err(error) => error,
            };

            if retries >= max_retries {
                log::warn!("Giving up on {url} after {sent} attempts: {error}");
                return Err(if error.is_timeout() {
                    ErrorKind::Timeout {
                        url,
                        attempts: sent,
                        source: error,
                    }
                } else {
                    ErrorKind::Transport {
                        url,
                        attempts: sent,
                        source: error,
                    }
                });
            }

            let wait = if error.is_timeout() {
                self.backoff.timeout_delay(retries)
            } else {
                self.backoff.failure_delay(retries)
            };
            log::info!("Request to {url} failed ({error}), retrying in {wait:?}");
            retries += 1;
            sleep(wait).await;
        }
    }

    async fn pace(&self, key: &EndpointKey) {
        let delay = self.endpoints.compute_delay(key);
        if delay > Duration::ZERO {
            log::trace!("Waiting {delay:?} before request to {key}");
            sleep(delay).await;
        }
    }

    fn ingest(
        &self,
        key: &EndpointKey,
        credential: Option<&Credential>,
        headers: &http::HeaderMap,
    ) {
        let observation = HeaderObservation::parse(headers);
        self.endpoints.observe(key, &observation);
        if let Some(credential) = credential {
            self.credentials.report(credential, &observation);
        }
    }
}

fn prepare(
    url: &Url,
    options: &RequestOptions,
    credential: Option<&Credential>,
    settings: &EndpointSettings,
) -> TransportRequest {
    let mut headers = options.headers.clone();
    if let Some(credential) = credential {
        headers.insert(http::header::AUTHORIZATION, credential.authorization().clone());
    }

    TransportRequest {
        method: options.method.clone(),
        url: url.clone(),
        headers,
        body: options.body.clone(),
        connect_timeout: settings.connect_timeout,
        read_timeout: settings.read_timeout,
    }
}
