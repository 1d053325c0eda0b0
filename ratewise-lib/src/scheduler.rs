use secrecy::SecretString;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use typed_builder::TypedBuilder;
use url::Url;

use crate::credentials::{CredentialPool, CredentialStatus};
use crate::executor::{Backoff, ReqwestTransport, RequestExecutor, Transport};
use crate::queue::{Priority, QueueStatus, RequestQueue, ResultHandle};
use crate::ratelimit::{EndpointKey, EndpointStatus, RateLimitConfig};
use crate::types::{DEFAULT_USER_AGENT, ErrorKind, RequestOptions, Response, Result};

/// Builder for [`Scheduler`].
///
/// See crate-level documentation for usage example.
#[derive(TypedBuilder, Debug)]
#[builder(field_defaults(default, setter(into)))]
#[builder(builder_method(doc = "
Create a builder for building `SchedulerBuilder`.

On the builder call, call methods with same name as its fields to set their values.

Finally, call `.build()` to create the instance of `SchedulerBuilder`.
"))]
pub struct SchedulerBuilder {
    /// Global defaults, endpoint overrides and classification rules
    config: RateLimitConfig,

    /// API tokens, in rotation order.
    ///
    /// Each one is sent as `Authorization: Bearer <token>`. Without tokens,
    /// requests are sent without `Authorization` header.
    credentials: Vec<SecretString>,

    /// Replaces the default `reqwest` transport
    #[builder(setter(strip_option, !into))]
    transport: Option<Arc<dyn Transport>>,

    /// Start the request queue and its workers.
    ///
    /// Without the queue only direct calls are possible.
    #[builder(default = true)]
    enable_queue: bool,

    /// User agent of the default transport
    #[builder(default_code = "String::from(DEFAULT_USER_AGENT)")]
    user_agent: String,

    /// Waits between retries of failed requests
    backoff: Backoff,
}

impl Default for SchedulerBuilder {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl SchedulerBuilder {
    /// Instantiates a [`Scheduler`].
    ///
    /// Queue workers are spawned on the current Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an `Err` if:
    /// - A credential can not be used as header value.
    /// - A configured classification rule is invalid.
    /// - The HTTP client can not be created.
    /// - The queue is enabled and no Tokio runtime is running.
    pub fn scheduler(self) -> Result<Scheduler> {
        let Self {
            config,
            credentials,
            transport,
            enable_queue,
            user_agent,
            backoff,
        } = self;

        let config = Arc::new(config);
        let credentials = Arc::new(CredentialPool::new(
            credentials,
            config.credential_threshold,
        )?);
        let transport: Arc<dyn Transport> = match transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(user_agent, config.connect_timeout)?),
        };

        let executor =
            RequestExecutor::new(transport, config.clone(), credentials)?.with_backoff(backoff);

        let queue = if enable_queue {
            Some(Arc::new(RequestQueue::new(
                executor.clone(),
                config.max_queue_size,
                config.queue_workers,
            )?))
        } else {
            None
        };

        log::debug!(
            "Scheduler ready with {} credentials, queue {}",
            executor.credentials().len(),
            if queue.is_some() { "enabled" } else { "disabled" }
        );

        Ok(Scheduler { executor, queue })
    }
}

/// Everything the scheduler knows about upstream quotas
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSummary {
    /// State of every endpoint with observed responses
    pub endpoints: BTreeMap<EndpointKey, EndpointStatus>,
    /// State of every credential, `None` without credentials
    pub credentials: Option<Vec<CredentialStatus>>,
    /// Queue fill level, `None` with the queue disabled
    pub queue: Option<QueueStatus>,
}

/// Handle to a rate-limit-aware request scheduler.
///
/// Cheap to clone; all clones share state, credentials and the queue. The
/// queue is shut down once the last clone is dropped, or explicitly with
/// [`Scheduler::shutdown`].
#[derive(Debug, Clone)]
pub struct Scheduler {
    executor: RequestExecutor,
    queue: Option<Arc<RequestQueue>>,
}

impl Scheduler {
    /// Create a builder with default settings
    #[must_use]
    pub fn builder() -> SchedulerBuilderBuilder {
        SchedulerBuilder::builder()
    }

    /// Send a request on the calling task.
    ///
    /// The endpoint's retry budget applies unless `options` sets one.
    ///
    /// # Errors
    ///
    /// Returns an error if `target` is not a valid URL, or if the request
    /// failed after all retries
    pub async fn execute(&self, target: &str, options: RequestOptions) -> Result<Response> {
        self.executor.execute(parse_url(target)?, options).await
    }

    /// Send a request on the calling task with an explicit retry budget
    ///
    /// # Errors
    ///
    /// See [`Self::execute`]
    pub async fn execute_with_retries(
        &self,
        target: &str,
        mut options: RequestOptions,
        max_retries: u64,
    ) -> Result<Response> {
        options.max_retries = Some(max_retries);
        self.execute(target, options).await
    }

    /// Hand a request to the queue workers.
    ///
    /// Returns right away; await the handle for the response.
    ///
    /// # Errors
    ///
    /// Returns an error if `target` is not a valid URL, the queue is full,
    /// shut down or disabled
    pub fn submit(
        &self,
        target: &str,
        options: RequestOptions,
        priority: Priority,
    ) -> Result<ResultHandle> {
        let queue = self.queue.as_ref().ok_or(ErrorKind::QueueDisabled)?;
        queue.submit(parse_url(target)?, options, priority)
    }

    /// Snapshot of endpoints, credentials and queue
    #[must_use]
    pub fn status_summary(&self) -> StatusSummary {
        let credentials = self.executor.credentials();
        StatusSummary {
            endpoints: self.executor.endpoints().all_statuses(),
            credentials: (!credentials.is_empty()).then(|| credentials.status()),
            queue: self.queue_status(),
        }
    }

    /// Status of the endpoint `target` belongs to
    #[must_use]
    pub fn endpoint_status(&self, target: &str) -> EndpointStatus {
        self.executor.endpoints().status(&self.classify(target))
    }

    /// Queue fill level, `None` with the queue disabled
    #[must_use]
    pub fn queue_status(&self) -> Option<QueueStatus> {
        self.queue.as_ref().map(|queue| queue.status())
    }

    /// Forget observed rate-limit state.
    ///
    /// `target` may be an endpoint key or any URL of the endpoint. With
    /// `None`, every endpoint is reset.
    pub fn reset(&self, target: Option<&str>) {
        let endpoints = self.executor.endpoints();
        match target {
            Some(target) => {
                let key = EndpointKey::from(target);
                if endpoints.state(&key).is_some() {
                    endpoints.reset(Some(&key));
                } else {
                    endpoints.reset(Some(&self.classify(target)));
                }
            }
            None => endpoints.reset(None),
        }
    }

    /// Returns `true` if the cache headers of the last response from
    /// `target`'s endpoint still allow using a cached copy
    #[must_use]
    pub fn is_cache_valid(&self, target: &str) -> bool {
        self.executor
            .endpoints()
            .state(&self.classify(target))
            .is_some_and(|state| state.is_cache_fresh())
    }

    /// Endpoint key of `target`
    #[must_use]
    pub fn classify(&self, target: &str) -> EndpointKey {
        self.executor.classifier().classify(target)
    }

    /// Effective configuration
    #[must_use]
    pub fn config(&self) -> &RateLimitConfig {
        self.executor.config()
    }

    /// Stop the queue without waiting for it.
    ///
    /// Direct calls keep working.
    pub fn shutdown(&self) {
        if let Some(queue) = &self.queue {
            queue.shutdown();
        }
    }

    /// Stop the queue and wait until requests in flight are done
    pub async fn shutdown_and_wait(&self) {
        if let Some(queue) = &self.queue {
            queue.shutdown();
            queue.join().await;
        }
    }
}

fn parse_url(target: &str) -> Result<Url> {
    Url::parse(target).map_err(|e| ErrorKind::InvalidUrl(target.to_string(), e))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use http::StatusCode;
    use pretty_assertions::assert_eq;
    use secrecy::SecretString;
    use test_utils::mock_server;
    use wiremock::matchers::{header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::test_utils::{ScriptedTransport, respond};

    fn fast_config() -> RateLimitConfig {
        RateLimitConfig {
            default_delay: Duration::ZERO,
            ..RateLimitConfig::default()
        }
    }

    #[tokio::test]
    async fn test_execute_against_mock_server() {
        let mock_server = mock_server!(
            StatusCode::OK,
            insert_header("RateLimit-Limit", "60"),
            insert_header("RateLimit-Remaining", "59"),
            insert_header("Cache-Control", "max-age=300"),
            set_body_string("{}")
        );
        let scheduler = Scheduler::builder()
            .config(fast_config())
            .build()
            .scheduler()
            .unwrap();

        let target = format!("{}/items?page=1", mock_server.uri());
        let response = scheduler
            .execute(&target, RequestOptions::default())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.text().unwrap(), "{}");

        let status = scheduler.endpoint_status(&target);
        assert_eq!(status.limit, Some(60));
        assert_eq!(status.remaining, Some(59));
        assert!(scheduler.is_cache_valid(&target));

        scheduler.shutdown_and_wait().await;
    }

    #[tokio::test]
    async fn test_bearer_token_is_sent() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("authorization", "Bearer secret-token"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;

        let scheduler = Scheduler::builder()
            .config(fast_config())
            .credentials(vec![SecretString::from("secret-token")])
            .enable_queue(false)
            .build()
            .scheduler()
            .unwrap();

        let response = scheduler
            .execute(&mock_server.uri(), RequestOptions::default())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let summary = scheduler.status_summary();
        let credentials = summary.credentials.unwrap();
        assert_eq!(credentials.len(), 1);
        assert_eq!(credentials[0].token, "****oken");
    }

    #[tokio::test]
    async fn test_too_many_requests_is_retried_after_wait() {
        let mock_server = test_utils::rate_limited_mock_server!(1);
        let scheduler = Scheduler::builder()
            .config(fast_config())
            .enable_queue(false)
            .build()
            .scheduler()
            .unwrap();

        let start = std::time::Instant::now();
        let response = scheduler
            .execute(&mock_server.uri(), RequestOptions::default())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.attempts(), 2);
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_submit_through_queue() {
        let mock_server = mock_server!(StatusCode::ACCEPTED);
        let scheduler = Scheduler::builder()
            .config(fast_config())
            .build()
            .scheduler()
            .unwrap();

        let handle = scheduler
            .submit(&mock_server.uri(), RequestOptions::default(), 0)
            .unwrap();
        assert_eq!(handle.await.unwrap().status(), StatusCode::ACCEPTED);

        let queue = scheduler.queue_status().unwrap();
        assert!(queue.is_empty);
        assert_eq!(queue.capacity, 1000);

        scheduler.shutdown_and_wait().await;
        let error = scheduler
            .submit(&mock_server.uri(), RequestOptions::default(), 0)
            .unwrap_err();
        assert!(matches!(error, ErrorKind::QueueClosed));
    }

    #[tokio::test]
    async fn test_submit_without_queue() {
        let scheduler = Scheduler::builder()
            .enable_queue(false)
            .build()
            .scheduler()
            .unwrap();

        assert_eq!(scheduler.queue_status(), None);
        let error = scheduler
            .submit("http://api.test/", RequestOptions::default(), 0)
            .unwrap_err();
        assert!(matches!(error, ErrorKind::QueueDisabled));
    }

    #[tokio::test]
    async fn test_invalid_target() {
        let scheduler = Scheduler::builder()
            .enable_queue(false)
            .build()
            .scheduler()
            .unwrap();

        let error = scheduler
            .execute("not a url", RequestOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(error, ErrorKind::InvalidUrl(..)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_with_retries() {
        let transport = ScriptedTransport::new([crate::test_utils::Scripted::Fail]);
        let scheduler = Scheduler::builder()
            .transport(transport.clone())
            .enable_queue(false)
            .build()
            .scheduler()
            .unwrap();

        let error = scheduler
            .execute_with_retries("http://api.test/", RequestOptions::default(), 2)
            .await
            .unwrap_err();
        assert_eq!(error.attempts(), Some(3));
        assert_eq!(transport.sent(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_by_key_and_by_url() {
        let transport = ScriptedTransport::new([respond(200, &[("RateLimit-Remaining", "1")])]);
        let scheduler = Scheduler::builder()
            .transport(transport)
            .enable_queue(false)
            .build()
            .scheduler()
            .unwrap();

        for target in ["https://api.nori.fish/a", "http://other.test/b"] {
            scheduler
                .execute(target, RequestOptions::default())
                .await
                .unwrap();
        }
        assert_eq!(scheduler.status_summary().endpoints.len(), 2);

        scheduler.reset(Some("nori_fish_api"));
        let endpoints = scheduler.status_summary().endpoints;
        assert!(!endpoints.contains_key(&EndpointKey::from("nori_fish_api")));

        scheduler.reset(Some("http://other.test/elsewhere"));
        assert!(scheduler.status_summary().endpoints.is_empty());

        scheduler
            .execute("http://other.test/b", RequestOptions::default())
            .await
            .unwrap();
        scheduler.reset(None);
        assert!(scheduler.status_summary().endpoints.is_empty());
    }

    #[tokio::test]
    async fn test_status_summary_serialization() {
        let transport = ScriptedTransport::new([respond(
            200,
            &[("RateLimit-Limit", "100"), ("RateLimit-Remaining", "0"), ("RateLimit-Reset", "30")],
        )]);
        let scheduler = Scheduler::builder()
            .config(fast_config())
            .transport(transport)
            .credentials(vec![SecretString::from("abcdef123456")])
            .build()
            .scheduler()
            .unwrap();

        scheduler
            .execute("https://api.wynncraft.com/v3/guild/Foo", RequestOptions::default())
            .await
            .unwrap();

        let json = serde_json::to_value(scheduler.status_summary()).unwrap();
        let endpoint = &json["endpoints"]["wynncraft_api_v3"];
        assert_eq!(endpoint["is_rate_limited"], true);
        assert_eq!(endpoint["remaining"], 0);
        assert_eq!(json["credentials"][0]["token"], "****3456");
        assert_eq!(json["credentials"][0]["is_rate_limited"], true);
        assert_eq!(json["queue"]["capacity"], 1000);

        scheduler.shutdown_and_wait().await;
    }

    #[test]
    fn test_queue_needs_runtime() {
        let transport: Arc<dyn Transport> = ScriptedTransport::new([respond(200, &[])]);
        let error = Scheduler::builder()
            .transport(transport.clone())
            .build()
            .scheduler()
            .unwrap_err();
        assert!(matches!(error, ErrorKind::NoRuntime(_)));

        // Direct calls only need a runtime when awaited
        assert!(
            Scheduler::builder()
                .transport(transport)
                .enable_queue(false)
                .build()
                .scheduler()
                .is_ok()
        );
    }
}
