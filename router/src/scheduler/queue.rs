//! Wait queues for admitted requests that could not be placed yet.
//!
//! One FIFO per class. Each entry carries its payload and the sender half of
//! a oneshot that the original caller is awaiting.

use std::collections::VecDeque;

use tokio::sync::oneshot;
use tokio::time::Instant;
use uuid::Uuid;

use adasplit_common::{ChatCompletionRequest, QueueDepths, TaskClass};

use crate::error::RouterError;
use crate::forward::ForwardedResponse;

pub type Completion = Result<ForwardedResponse, RouterError>;

/// A queued request waiting for a backend.
pub struct PendingRequest {
    pub id: Uuid,
    pub request: ChatCompletionRequest,
    pub response_tx: oneshot::Sender<Completion>,
    pub enqueued_at: Instant,
}

impl PendingRequest {
    pub fn new(
        request: ChatCompletionRequest,
        now: Instant,
    ) -> (Self, oneshot::Receiver<Completion>) {
        let (response_tx, response_rx) = oneshot::channel();
        let pending = Self {
            id: Uuid::new_v4(),
            request,
            response_tx,
            enqueued_at: now,
        };
        (pending, response_rx)
    }

    /// The caller stopped waiting.
    pub fn is_abandoned(&self) -> bool {
        self.response_tx.is_closed()
    }
}

pub struct WaitQueues {
    short: VecDeque<PendingRequest>,
    long: VecDeque<PendingRequest>,
    max_len: Option<usize>,
}

impl WaitQueues {
    pub fn new(max_len: Option<usize>) -> Self {
        Self {
            short: VecDeque::new(),
            long: VecDeque::new(),
            max_len,
        }
    }

    fn queue(&self, class: TaskClass) -> &VecDeque<PendingRequest> {
        match class {
            TaskClass::Short => &self.short,
            TaskClass::Long => &self.long,
        }
    }

    fn queue_mut(&mut self, class: TaskClass) -> &mut VecDeque<PendingRequest> {
        match class {
            TaskClass::Short => &mut self.short,
            TaskClass::Long => &mut self.long,
        }
    }

    /// Append to the class queue. Returns the new depth, or `Overloaded`
    /// when the queue is already at its cap.
    pub fn enqueue(&mut self, class: TaskClass, pending: PendingRequest) -> Result<usize, RouterError> {
        let max_len = self.max_len;
        let queue = self.queue_mut(class);
        if let Some(max) = max_len {
            if queue.len() >= max {
                return Err(RouterError::Overloaded {
                    class,
                    depth: queue.len(),
                });
            }
        }
        queue.push_back(pending);
        Ok(queue.len())
    }

    pub fn front(&self, class: TaskClass) -> Option<&PendingRequest> {
        self.queue(class).front()
    }

    pub fn pop(&mut self, class: TaskClass) -> Option<PendingRequest> {
        self.queue_mut(class).pop_front()
    }

    /// Remove a specific request, e.g. because its caller went away.
    /// Returns `None` if it was already dispatched.
    pub fn remove(&mut self, class: TaskClass, id: Uuid) -> Option<PendingRequest> {
        let queue = self.queue_mut(class);
        let position = queue.iter().position(|p| p.id == id)?;
        queue.remove(position)
    }

    pub fn len(&self, class: TaskClass) -> usize {
        self.queue(class).len()
    }

    pub fn is_empty(&self, class: TaskClass) -> bool {
        self.queue(class).is_empty()
    }

    pub fn depths(&self) -> QueueDepths {
        QueueDepths {
            short: self.short.len(),
            long: self.long.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adasplit_common::ChatMessage;

    fn pending(text: &str) -> (PendingRequest, oneshot::Receiver<Completion>) {
        let request = ChatCompletionRequest::new(vec![ChatMessage::text("user", text)]);
        PendingRequest::new(request, Instant::now())
    }

    fn text_of(p: &PendingRequest) -> String {
        p.request.messages[0].content.as_ref().unwrap().as_str().unwrap().to_string()
    }

    #[test]
    fn test_fifo_per_class() {
        let mut queues = WaitQueues::new(None);
        let (a, _rx_a) = pending("a");
        let (b, _rx_b) = pending("b");
        let (c, _rx_c) = pending("c");
        queues.enqueue(TaskClass::Long, a).unwrap();
        queues.enqueue(TaskClass::Short, b).unwrap();
        queues.enqueue(TaskClass::Long, c).unwrap();

        assert_eq!(queues.depths(), QueueDepths { short: 1, long: 2 });
        assert_eq!(text_of(&queues.pop(TaskClass::Long).unwrap()), "a");
        assert_eq!(text_of(&queues.pop(TaskClass::Long).unwrap()), "c");
        assert!(queues.pop(TaskClass::Long).is_none());
        assert_eq!(text_of(&queues.pop(TaskClass::Short).unwrap()), "b");
    }

    #[test]
    fn test_remove_by_id_keeps_order() {
        let mut queues = WaitQueues::new(None);
        let (a, _rx_a) = pending("a");
        let (b, _rx_b) = pending("b");
        let (c, _rx_c) = pending("c");
        let b_id = b.id;
        for p in [a, b, c] {
            queues.enqueue(TaskClass::Short, p).unwrap();
        }

        assert!(queues.remove(TaskClass::Short, b_id).is_some());
        assert!(queues.remove(TaskClass::Short, b_id).is_none());
        assert!(queues.remove(TaskClass::Long, Uuid::new_v4()).is_none());
        assert_eq!(text_of(&queues.pop(TaskClass::Short).unwrap()), "a");
        assert_eq!(text_of(&queues.pop(TaskClass::Short).unwrap()), "c");
    }

    #[test]
    fn test_cap_rejects_only_the_full_class() {
        let mut queues = WaitQueues::new(Some(1));
        let (a, _rx_a) = pending("a");
        let (b, _rx_b) = pending("b");
        let (c, _rx_c) = pending("c");

        assert_eq!(queues.enqueue(TaskClass::Long, a).unwrap(), 1);
        let err = queues.enqueue(TaskClass::Long, b).unwrap_err();
        assert!(matches!(
            err,
            RouterError::Overloaded { class: TaskClass::Long, depth: 1 }
        ));
        assert_eq!(queues.enqueue(TaskClass::Short, c).unwrap(), 1);
    }

    #[test]
    fn test_abandoned_when_receiver_dropped() {
        let (p, rx) = pending("a");
        assert!(!p.is_abandoned());
        drop(rx);
        assert!(p.is_abandoned());
    }
}
