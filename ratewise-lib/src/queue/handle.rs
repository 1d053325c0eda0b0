use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::types::{ErrorKind, Response, Result};

/// Pending result of a queued request.
///
/// Resolves exactly once, with the response or the error the request ended
/// with. Dropping the handle does not cancel the request.
#[derive(Debug)]
#[must_use = "the handle is the only way to get at the response"]
pub struct ResultHandle {
    receiver: oneshot::Receiver<Result<Response>>,
}

impl ResultHandle {
    pub(crate) const fn new(receiver: oneshot::Receiver<Result<Response>>) -> Self {
        Self { receiver }
    }
}

impl Future for ResultHandle {
    type Output = Result<Response>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(ErrorKind::ResultDropped)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dropped_sender_resolves_to_error() {
        let (sender, receiver) = oneshot::channel();
        drop(sender);
        let result = ResultHandle::new(receiver).await;
        assert!(matches!(result, Err(ErrorKind::ResultDropped)));
    }

    #[tokio::test]
    async fn test_resolves_with_sent_error() {
        let (sender, receiver) = oneshot::channel();
        sender.send(Err(ErrorKind::QueueClosed)).unwrap();
        let result = ResultHandle::new(receiver).await;
        assert!(matches!(result, Err(ErrorKind::QueueClosed)));
    }
}
