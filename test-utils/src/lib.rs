//! `test-utils` is used for testing in both `ratewise-lib` and `ratewise-bin`.
//! This crate does not depend on `ratewise-lib` or `ratewise-bin`, else we would get dependency cycles.
//! Macros are used instead, so that the importer is responsible for providing the dependencies.

/// Create a mock web server, which responds with a predefined status when
/// handling a matching request
#[macro_export]
macro_rules! mock_server {
    ($status:expr $(, $func:tt ($($arg:expr),*))*) => {{
        let mock_server = wiremock::MockServer::start().await;
        let response_template = wiremock::ResponseTemplate::new(http::StatusCode::from($status));
        let template = response_template$(.$func($($arg),*))*;
        wiremock::Mock::given(wiremock::matchers::method("GET")).respond_with(template).mount(&mock_server).await;
        mock_server
    }};
}

/// Create a mock web server which answers the first request with
/// `429 Too Many Requests` and the given `Retry-After` seconds, and every
/// later request with `200 OK`
#[macro_export]
macro_rules! rate_limited_mock_server {
    ($retry_after:expr) => {{
        let mock_server = wiremock::MockServer::start().await;

        let too_many = wiremock::ResponseTemplate::new(http::StatusCode::TOO_MANY_REQUESTS)
            .insert_header("Retry-After", $retry_after.to_string().as_str());
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(too_many)
            .up_to_n_times(1)
            .expect(1)
            .mount(&mock_server)
            .await;

        let ok = wiremock::ResponseTemplate::new(http::StatusCode::OK);
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(ok)
            .expect(1)
            .mount(&mock_server)
            .await;

        mock_server
    }};
}

/// Create a mock web server reporting the given quota in `RateLimit-*`
/// headers on every response
#[macro_export]
macro_rules! quota_mock_server {
    ($limit:expr, $remaining:expr, $reset:expr) => {{
        let mock_server = wiremock::MockServer::start().await;
        let template = wiremock::ResponseTemplate::new(http::StatusCode::OK)
            .insert_header("RateLimit-Limit", $limit.to_string().as_str())
            .insert_header("RateLimit-Remaining", $remaining.to_string().as_str())
            .insert_header("RateLimit-Reset", $reset.to_string().as_str());
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(template)
            .mount(&mock_server)
            .await;
        mock_server
    }};
}
