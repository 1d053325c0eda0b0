use std::cmp::Ordering;

use tokio::sync::oneshot;
use url::Url;

use super::Priority;
use crate::types::{RequestOptions, Response, Result};

/// A request waiting in the queue
#[derive(Debug)]
pub(crate) struct QueuedRequest {
    pub(crate) url: Url,
    pub(crate) options: RequestOptions,
    pub(crate) priority: Priority,
    pub(crate) sequence: u64,
    pub(crate) sender: oneshot::Sender<Result<Response>>,
}

impl QueuedRequest {
    /// Fulfil the result handle. A caller that dropped its handle is ignored.
    pub(crate) fn complete(self, result: Result<Response>) {
        if self.sender.send(result).is_err() {
            log::debug!("Result of {} discarded, handle was dropped", self.url);
        }
    }
}

impl PartialEq for QueuedRequest {
    fn eq(&self, other: &Self) -> bool {
        self.sequence == other.sequence
    }
}

impl Eq for QueuedRequest {}

impl Ord for QueuedRequest {
    // `BinaryHeap` is a max-heap: lower priority values and then older
    // submissions must compare greater
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for QueuedRequest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BinaryHeap;

    use pretty_assertions::assert_eq;

    use super::*;

    fn item(priority: Priority, sequence: u64) -> QueuedRequest {
        let (sender, _) = oneshot::channel();
        QueuedRequest {
            url: Url::parse("http://api.test/").unwrap(),
            options: RequestOptions::default(),
            priority,
            sequence,
            sender,
        }
    }

    #[test]
    fn test_lower_priority_value_first_then_oldest() {
        let mut heap = BinaryHeap::new();
        for (priority, sequence) in [(2, 0), (0, 1), (1, 2), (0, 3), (2, 4)] {
            heap.push(item(priority, sequence));
        }

        let order: Vec<_> = std::iter::from_fn(|| heap.pop())
            .map(|item| (item.priority, item.sequence))
            .collect();
        assert_eq!(order, [(0, 1), (0, 3), (1, 2), (2, 0), (2, 4)]);
    }
}
