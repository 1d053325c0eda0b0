//! Bounded priority queue served by a fixed pool of worker tasks.
//!
//! Requests are served by priority (lower value first) and, within equal
//! priority, in submission order. Submitting never waits: a full queue
//! rejects the request right away.

mod handle;
mod item;

use serde::Serialize;
use std::collections::BinaryHeap;
use std::pin::pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::{Notify, oneshot};
use tokio::task::JoinHandle;
use url::Url;

pub use handle::ResultHandle;
use item::QueuedRequest;

use crate::executor::RequestExecutor;
use crate::types::{ErrorKind, RequestOptions, Result};

/// Queue priority; lower values are served first, negative values ahead of
/// the default `0`
pub type Priority = i32;

/// Snapshot of the queue fill level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    /// Requests waiting to be picked up by a worker
    pub size: usize,
    /// Maximum number of waiting requests
    pub capacity: usize,
    /// No further request can be submitted right now
    pub is_full: bool,
    /// No request is waiting
    pub is_empty: bool,
}

#[derive(Debug, Default)]
struct QueueState {
    items: BinaryHeap<QueuedRequest>,
    next_sequence: u64,
    closed: bool,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<QueueState>,
    notify: Notify,
    capacity: usize,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Bounded request queue with its worker tasks.
///
/// Dropping the queue shuts it down.
#[derive(Debug)]
pub struct RequestQueue {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl RequestQueue {
    /// Create a queue holding up to `capacity` requests and spawn `workers`
    /// worker tasks on the current Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::NoRuntime`] when called outside a Tokio runtime
    pub fn new(executor: RequestExecutor, capacity: usize, workers: usize) -> Result<Self> {
        let runtime = Handle::try_current().map_err(ErrorKind::NoRuntime)?;

        let workers = if workers == 0 {
            log::warn!("Queue configured without workers, starting one");
            1
        } else {
            workers
        };

        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            capacity,
        });

        let handles = (0..workers)
            .map(|id| runtime.spawn(work(id, shared.clone(), executor.clone())))
            .collect();
        log::debug!("Started request queue with {workers} workers and capacity {capacity}");

        Ok(Self {
            shared,
            workers: Mutex::new(handles),
        })
    }

    /// Add a request to the queue.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::QueueFull`] if no slot is free and
    /// [`ErrorKind::QueueClosed`] after [`Self::shutdown`]
    pub fn submit(
        &self,
        url: Url,
        options: RequestOptions,
        priority: Priority,
    ) -> Result<ResultHandle> {
        let (sender, receiver) = oneshot::channel();
        {
            let mut state = self.shared.lock();
            if state.closed {
                return Err(ErrorKind::QueueClosed);
            }
            if state.items.len() >= self.shared.capacity {
                return Err(ErrorKind::QueueFull {
                    capacity: self.shared.capacity,
                });
            }

            let sequence = state.next_sequence;
            state.next_sequence += 1;
            state.items.push(QueuedRequest {
                url,
                options,
                priority,
                sequence,
                sender,
            });
        }

        self.shared.notify.notify_one();
        Ok(ResultHandle::new(receiver))
    }

    /// Current fill level
    #[must_use]
    pub fn status(&self) -> QueueStatus {
        let size = self.shared.lock().items.len();
        QueueStatus {
            size,
            capacity: self.shared.capacity,
            is_full: size >= self.shared.capacity,
            is_empty: size == 0,
        }
    }

    /// Returns `true` once the queue has been shut down
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Stop accepting requests.
    ///
    /// Waiting requests fail with [`ErrorKind::QueueClosed`]. Requests a
    /// worker already picked up run to completion, then the workers exit.
    /// Does not wait for that; see [`Self::join`].
    pub fn shutdown(&self) {
        let pending: Vec<_> = {
            let mut state = self.shared.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.items.drain().collect()
        };

        if !pending.is_empty() {
            log::info!("Shutting down request queue, {} requests dropped", pending.len());
        }
        for item in pending {
            item.complete(Err(ErrorKind::QueueClosed));
        }
        self.shared.notify.notify_waiters();
    }

    /// Wait until all workers have exited.
    ///
    /// Only returns after [`Self::shutdown`] was called.
    pub async fn join(&self) {
        let handles = std::mem::take(
            &mut *self
                .workers
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                log::error!("Queue worker failed: {e}");
            }
        }
    }
}

impl Drop for RequestQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn work(id: usize, shared: Arc<Shared>, executor: RequestExecutor) {
    loop {
        // Register for wakeups before looking at the queue, so a submit
        // between the check and the wait is not missed
        let mut notified = pin!(shared.notify.notified());
        notified.as_mut().enable();

        let next = {
            let mut state = shared.lock();
            match state.items.pop() {
                Some(item) => Some(item),
                None if state.closed => break,
                None => None,
            }
        };

        match next {
            Some(item) => {
                log::trace!(
                    "Worker {id} picked up {} (priority {})",
                    item.url,
                    item.priority
                );
                let result = executor.execute(item.url.clone(), item.options.clone()).await;
                item.complete(result);
            }
            None => notified.await,
        }
    }
    log::debug!("Queue worker {id} stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::credentials::CredentialPool;
    use crate::ratelimit::RateLimitConfig;
    use crate::test_utils::{ScriptedTransport, respond};

    fn queue(transport: &Arc<ScriptedTransport>, capacity: usize, workers: usize) -> RequestQueue {
        let executor = RequestExecutor::new(
            transport.clone(),
            Arc::new(RateLimitConfig::default()),
            Arc::new(CredentialPool::empty()),
        )
        .unwrap();
        RequestQueue::new(executor, capacity, workers).unwrap()
    }

    fn url(path: &str) -> Url {
        Url::parse(&format!("http://api.test/{path}")).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_priority_order() {
        let transport = ScriptedTransport::new([respond(200, &[])]);
        let queue = queue(&transport, 10, 1);

        let handles: Vec<_> = [2, 0, 1]
            .into_iter()
            .map(|priority| {
                queue
                    .submit(url(&format!("p{priority}")), RequestOptions::default(), priority)
                    .unwrap()
            })
            .collect();
        for result in futures::future::join_all(handles).await {
            assert!(result.unwrap().status().is_success());
        }

        let paths: Vec<_> = transport
            .recorded()
            .into_iter()
            .map(|recorded| recorded.request.url.path().to_string())
            .collect();
        assert_eq!(paths, ["/p0", "/p1", "/p2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_negative_priority_jumps_ahead() {
        let transport = ScriptedTransport::new([respond(200, &[])]);
        let queue = queue(&transport, 10, 1);

        let handles: Vec<_> = [("default", 0), ("urgent", -1), ("later", 3)]
            .into_iter()
            .map(|(path, priority)| {
                queue
                    .submit(url(path), RequestOptions::default(), priority)
                    .unwrap()
            })
            .collect();
        futures::future::join_all(handles).await;

        let paths: Vec<_> = transport
            .recorded()
            .into_iter()
            .map(|recorded| recorded.request.url.path().to_string())
            .collect();
        assert_eq!(paths, ["/urgent", "/default", "/later"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_equal_priority_is_first_in_first_out() {
        let transport = ScriptedTransport::new([respond(200, &[])]);
        let queue = queue(&transport, 10, 1);

        let handles: Vec<_> = (0..4)
            .map(|i| {
                queue
                    .submit(url(&format!("{i}")), RequestOptions::default(), 5)
                    .unwrap()
            })
            .collect();
        futures::future::join_all(handles).await;

        let paths: Vec<_> = transport
            .recorded()
            .into_iter()
            .map(|recorded| recorded.request.url.path().to_string())
            .collect();
        assert_eq!(paths, ["/0", "/1", "/2", "/3"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_queue_rejects_immediately() {
        let transport = ScriptedTransport::new([respond(200, &[])]);
        let queue = queue(&transport, 2, 1);

        let first = queue.submit(url("a"), RequestOptions::default(), 0).unwrap();
        let second = queue.submit(url("b"), RequestOptions::default(), 0).unwrap();
        let error = queue
            .submit(url("c"), RequestOptions::default(), 0)
            .unwrap_err();
        assert!(matches!(error, ErrorKind::QueueFull { capacity: 2 }));

        assert_eq!(
            queue.status(),
            QueueStatus {
                size: 2,
                capacity: 2,
                is_full: true,
                is_empty: false,
            }
        );

        first.await.unwrap();
        second.await.unwrap();
        assert!(queue.status().is_empty);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_finishes_in_flight_and_fails_pending() {
        let transport = ScriptedTransport::new([respond(200, &[])]);
        let queue = queue(&transport, 10, 1);

        let in_flight = queue.submit(url("a"), RequestOptions::default(), 0).unwrap();
        let pending = queue.submit(url("b"), RequestOptions::default(), 0).unwrap();

        // Let the worker pick up the first request
        while queue.status().size > 1 {
            tokio::task::yield_now().await;
        }

        queue.shutdown();
        assert!(queue.is_closed());
        assert!(matches!(pending.await, Err(ErrorKind::QueueClosed)));
        assert!(in_flight.await.is_ok());

        let error = queue
            .submit(url("c"), RequestOptions::default(), 0)
            .unwrap_err();
        assert!(matches!(error, ErrorKind::QueueClosed));

        queue.join().await;
        assert_eq!(transport.sent(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_multiple_workers_drain_queue() {
        let transport = ScriptedTransport::new([respond(200, &[])]);
        let queue = queue(&transport, 100, 5);

        let handles: Vec<_> = (0..20)
            .map(|i| {
                queue
                    .submit(url(&format!("{i}")), RequestOptions::default(), i % 3)
                    .unwrap()
            })
            .collect();
        let results = futures::future::join_all(handles).await;

        assert!(results.iter().all(Result::is_ok));
        assert_eq!(transport.sent(), 20);

        queue.shutdown();
        queue.join().await;
    }

    #[test]
    fn test_requires_runtime() {
        let transport = ScriptedTransport::new([respond(200, &[])]);
        let executor = RequestExecutor::new(
            transport,
            Arc::new(RateLimitConfig::default()),
            Arc::new(CredentialPool::empty()),
        )
        .unwrap();
        let error = RequestQueue::new(executor, 1, 1).unwrap_err();
        assert!(matches!(error, ErrorKind::NoRuntime(_)));
    }
}
