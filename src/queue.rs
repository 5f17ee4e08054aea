use std::{collections::VecDeque, sync::Arc};
use tokio::sync::Mutex;
use tracing::debug;

use crate::types::Command;

/// Unbounded FIFO of commands waiting for the poll loop
///
/// Cloning yields another handle to the same queue. Any number of handles may
/// push concurrently; the poll loop takes everything at once with
/// [`CommandQueue::drain`]. Commands come out in the order they went in and
/// are never merged or reordered.
#[derive(Debug, Clone, Default)]
pub struct CommandQueue {
    inner: Arc<Mutex<VecDeque<Command>>>,
}

impl CommandQueue {
    /// Create an empty queue
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a command
    pub async fn push(&self, command: Command) {
        let mut queue = self.inner.lock().await;
        queue.push_back(command);
        debug!("Queued {} ({} pending)", command, queue.len());
    }

    /// Remove and return every queued command, oldest first
    ///
    /// Everything pushed before the drain takes the lock is included.
    pub async fn drain(&self) -> Vec<Command> {
        let mut queue = self.inner.lock().await;
        queue.drain(..).collect()
    }

    /// Number of queued commands
    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    /// Whether the queue is empty
    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_drain_preserves_order() {
        let queue = CommandQueue::new();
        queue.push(Command::Pause).await;
        queue.push(Command::SetSpeed(100)).await;
        queue.push(Command::Pause).await;

        assert_eq!(queue.len().await, 3);
        assert_eq!(
            queue.drain().await,
            vec![Command::Pause, Command::SetSpeed(100), Command::Pause]
        );
        assert!(queue.is_empty().await);
        assert!(queue.drain().await.is_empty());
    }

    #[tokio::test]
    async fn test_clones_share_queue() {
        let queue = CommandQueue::new();
        let producer = queue.clone();

        producer.push(Command::Stop).await;
        assert_eq!(queue.drain().await, vec![Command::Stop]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_producers() {
        let queue = CommandQueue::new();

        let producers: Vec<_> = (0..8u16)
            .map(|producer| {
                let queue = queue.clone();
                tokio::spawn(async move {
                    for step in 0..50u16 {
                        queue.push(Command::SetSpeed(producer * 100 + step)).await;
                    }
                })
            })
            .collect();

        for producer in producers {
            producer.await.unwrap();
        }

        let drained = queue.drain().await;
        assert_eq!(drained.len(), 400);

        // Each producer's commands stay in the order it pushed them
        for producer in 0..8u16 {
            let own: Vec<u16> = drained
                .iter()
                .filter_map(|command| match command {
                    Command::SetSpeed(speed) if speed / 100 == producer => Some(*speed),
                    _ => None,
                })
                .collect();
            let expected: Vec<u16> = (0..50).map(|step| producer * 100 + step).collect();
            assert_eq!(own, expected);
        }
    }
}
