use async_trait::async_trait;
use dashmap::DashMap;
use http::{HeaderMap, Method, StatusCode};
use std::fmt::Debug;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::ErrorKind;
use crate::types::BoxError;

/// A fully prepared request, as handed to a [`Transport`]
#[derive(Debug, Clone)]
pub struct TransportRequest {
    /// HTTP method
    pub method: Method,
    /// Target URL
    pub url: Url,
    /// Request headers, including `Authorization` if a credential was used
    pub headers: HeaderMap,
    /// Optional request body
    pub body: Option<Vec<u8>>,
    /// Time allowed to establish a connection
    pub connect_timeout: Duration,
    /// Time allowed for the whole request
    pub read_timeout: Duration,
}

/// The result of a HTTP request, with the body already read
#[derive(Debug, Clone)]
pub struct TransportResponse {
    /// Response status
    pub status: StatusCode,
    /// Final URL after redirects
    pub url: Url,
    /// Response headers
    pub headers: HeaderMap,
    /// Raw body
    pub body: Vec<u8>,
}

impl TransportResponse {
    async fn from_response(response: reqwest::Response) -> Result<Self, TransportError> {
        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let body = response.bytes().await?.to_vec();

        Ok(Self {
            status,
            url,
            headers,
            body,
        })
    }
}

/// Why a request did not produce a response
#[derive(Error, Debug)]
pub enum TransportError {
    /// Connecting or reading took longer than allowed
    #[error("Request timed out: {0}")]
    Timeout(#[source] BoxError),

    /// Any other connection or protocol failure
    #[error("Network error: {0}")]
    Network(#[source] BoxError),
}

impl TransportError {
    /// Wrap an error as a timeout
    pub fn timeout(error: impl Into<BoxError>) -> Self {
        Self::Timeout(error.into())
    }

    /// Wrap an error as a network failure
    pub fn network(error: impl Into<BoxError>) -> Self {
        Self::Network(error.into())
    }

    /// Returns `true` if the request ran out of time
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::timeout(error)
        } else {
            Self::network(error)
        }
    }
}

/// Sends prepared requests.
///
/// The scheduler only depends on this trait, so tests and embedders can
/// replace the HTTP stack.
#[async_trait]
pub trait Transport: Debug + Send + Sync {
    /// Send a single request, without any retries
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError>;
}

/// [`Transport`] backed by `reqwest`.
///
/// `reqwest` fixes the connect timeout per client, so one client is kept per
/// distinct connect timeout. The read timeout is applied per request.
#[derive(Debug)]
pub struct ReqwestTransport {
    user_agent: String,
    clients: DashMap<Duration, reqwest::Client>,
}

impl ReqwestTransport {
    /// Create a transport sending the given `User-Agent`.
    ///
    /// The client for `connect_timeout` is built right away, so configuration
    /// problems surface here rather than on the first request.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying client can not be built
    pub fn new(user_agent: impl Into<String>, connect_timeout: Duration) -> crate::Result<Self> {
        let transport = Self {
            user_agent: user_agent.into(),
            clients: DashMap::new(),
        };
        let client = transport
            .build_client(connect_timeout)
            .map_err(ErrorKind::BuildClient)?;
        transport.clients.insert(connect_timeout, client);
        Ok(transport)
    }

    fn build_client(&self, connect_timeout: Duration) -> reqwest::Result<reqwest::Client> {
        reqwest::ClientBuilder::new()
            .user_agent(self.user_agent.as_str())
            .connect_timeout(connect_timeout)
            .gzip(true)
            .build()
    }

    fn client(&self, connect_timeout: Duration) -> Result<reqwest::Client, TransportError> {
        if let Some(client) = self.clients.get(&connect_timeout) {
            return Ok(client.clone());
        }

        let client = self
            .build_client(connect_timeout)
            .map_err(TransportError::network)?;

        Ok(self
            .clients
            .entry(connect_timeout)
            .or_insert(client)
            .clone())
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        let client = self.client(request.connect_timeout)?;

        let mut builder = client
            .request(request.method, request.url)
            .headers(request.headers)
            .timeout(request.read_timeout);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        TransportResponse::from_response(response).await
    }
}
