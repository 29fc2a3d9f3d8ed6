//! FIFO accumulator for client→server messages observed while a restart is
//! in progress (C6 Message Buffer).
//!
//! Bounded per `spec.md` §9 Design Notes: "A naive unbounded buffer is
//! acceptable for interactive use, but implementations SHOULD impose a
//! ceiling and drop with a logged warning beyond it, since a stuck spawn
//! could otherwise exhaust memory." Messages already queued are preserved;
//! an incoming message arriving once the buffer is full is the one dropped.

use std::collections::VecDeque;

use serde_json::Value;
use tokio::sync::Mutex;

/// Default ceiling on buffered messages during a restart.
pub const DEFAULT_MAX_BUFFERED_MESSAGES: usize = 10_000;

pub struct MessageBuffer {
    queue: Mutex<VecDeque<Value>>,
    cap: usize,
}

impl MessageBuffer {
    pub fn new(cap: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            cap,
        }
    }

    /// Append `message` to the buffer, dropping it with a logged warning if
    /// the buffer is already at capacity.
    pub async fn push(&self, message: Value) {
        let mut queue = self.queue.lock().await;
        if queue.len() >= self.cap {
            tracing::warn!(cap = self.cap, "message buffer full, dropping incoming message");
            return;
        }
        queue.push_back(message);
    }

    /// Drain and return every buffered message in FIFO order, clearing the
    /// buffer.
    pub async fn drain(&self) -> Vec<Value> {
        let mut queue = self.queue.lock().await;
        queue.drain(..).collect()
    }

    pub async fn len(&self) -> usize {
        self.queue.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for MessageBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BUFFERED_MESSAGES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_push_and_drain_fifo_order() {
        let buffer = MessageBuffer::default();
        buffer.push(json!({"id": 10})).await;
        buffer.push(json!({"id": 11})).await;
        buffer.push(json!({"id": 12})).await;

        let drained = buffer.drain().await;
        let ids: Vec<i64> = drained.iter().map(|m| m["id"].as_i64().unwrap()).collect();
        assert_eq!(ids, vec![10, 11, 12]);
        assert!(buffer.is_empty().await);
    }

    #[tokio::test]
    async fn test_drain_empty_buffer() {
        let buffer = MessageBuffer::default();
        assert!(buffer.drain().await.is_empty());
    }

    #[tokio::test]
    async fn test_ceiling_drops_incoming_preserving_existing() {
        let buffer = MessageBuffer::new(2);
        buffer.push(json!({"id": 1})).await;
        buffer.push(json!({"id": 2})).await;
        buffer.push(json!({"id": 3})).await; // dropped, buffer full

        let drained = buffer.drain().await;
        let ids: Vec<i64> = drained.iter().map(|m| m["id"].as_i64().unwrap()).collect();
        assert_eq!(ids, vec![1, 2]);
    }
}
