use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use tokio::time::Instant;
use url::Url;

use crate::executor::{Transport, TransportError, TransportRequest, TransportResponse};

/// One canned answer of a [`ScriptedTransport`]
#[derive(Debug, Clone)]
pub(crate) enum Scripted {
    Respond(StatusCode, HeaderMap),
    Timeout,
    Fail,
}

/// Build a scripted response with the given headers
pub(crate) fn respond(status: u16, headers: &[(&str, &str)]) -> Scripted {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        map.insert(
            HeaderName::from_bytes(name.as_bytes()).unwrap(),
            HeaderValue::from_str(value).unwrap(),
        );
    }
    Scripted::Respond(StatusCode::from_u16(status).unwrap(), map)
}

/// A request seen by a [`ScriptedTransport`], with the (virtual) time it was sent
#[derive(Debug, Clone)]
pub(crate) struct Recorded {
    pub(crate) at: Instant,
    pub(crate) request: TransportRequest,
}

/// Transport answering from a fixed script.
///
/// Once the script runs out, the last entry is repeated.
#[derive(Debug)]
pub(crate) struct ScriptedTransport {
    script: Mutex<VecDeque<Scripted>>,
    last: Mutex<Option<Scripted>>,
    recorded: Mutex<Vec<Recorded>>,
}

impl ScriptedTransport {
    pub(crate) fn new(script: impl IntoIterator<Item = Scripted>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into_iter().collect()),
            last: Mutex::new(None),
            recorded: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn recorded(&self) -> Vec<Recorded> {
        self.recorded.lock().unwrap().clone()
    }

    pub(crate) fn sent(&self) -> usize {
        self.recorded.lock().unwrap().len()
    }

    fn next(&self) -> Scripted {
        let mut last = self.last.lock().unwrap();
        if let Some(next) = self.script.lock().unwrap().pop_front() {
            *last = Some(next);
        }
        last.clone().expect("empty script")
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        let url: Url = request.url.clone();
        self.recorded.lock().unwrap().push(Recorded {
            at: Instant::now(),
            request,
        });

        match self.next() {
            Scripted::Respond(status, headers) => Ok(TransportResponse {
                status,
                url,
                headers,
                body: Vec::new(),
            }),
            Scripted::Timeout => Err(TransportError::timeout("scripted timeout")),
            Scripted::Fail => Err(TransportError::network("scripted failure")),
        }
    }
}
