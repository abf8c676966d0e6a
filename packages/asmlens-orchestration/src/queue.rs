use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{OrchestratorError, Result};

/// Unbounded FIFO of analysis ids shared by every worker.
#[derive(Clone)]
pub struct TaskQueue {
    tx: mpsc::UnboundedSender<String>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    pending: Arc<AtomicUsize>,
}

impl TaskQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Never blocks.
    pub fn enqueue(&self, analysis_id: &str) -> Result<()> {
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(analysis_id.to_string()).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(OrchestratorError::Config("task queue is closed".to_string()));
        }
        debug!(analysis_id, "analysis enqueued");
        Ok(())
    }

    /// Waits for the next id; `None` once `shutdown` is cancelled.
    pub async fn dequeue(&self, shutdown: &CancellationToken) -> Option<String> {
        let mut rx = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return None,
            guard = self.rx.lock() => guard,
        };
        let item = tokio::select! {
            biased;
            _ = shutdown.cancelled() => None,
            item = rx.recv() => item,
        };
        if item.is_some() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }
        item
    }

    /// Ids enqueued but not yet dequeued
    pub fn len(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = TaskQueue::new();
        let shutdown = CancellationToken::new();

        queue.enqueue("a-1").unwrap();
        queue.enqueue("a-2").unwrap();
        queue.enqueue("a-1").unwrap();
        assert_eq!(queue.len(), 3);

        assert_eq!(queue.dequeue(&shutdown).await.as_deref(), Some("a-1"));
        assert_eq!(queue.dequeue(&shutdown).await.as_deref(), Some("a-2"));
        assert_eq!(queue.dequeue(&shutdown).await.as_deref(), Some("a-1"));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_dequeue_stops_on_shutdown() {
        let queue = TaskQueue::new();
        let shutdown = CancellationToken::new();

        let waiter = {
            let queue = queue.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { queue.dequeue(&shutdown).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        shutdown.cancel();

        assert_eq!(waiter.await.unwrap(), None);

        queue.enqueue("a-1").unwrap();
        assert_eq!(queue.dequeue(&shutdown).await, None);
    }

    #[tokio::test]
    async fn test_clones_share_one_queue() {
        let queue = TaskQueue::new();
        let producer = queue.clone();
        let shutdown = CancellationToken::new();

        producer.enqueue("a-9").unwrap();
        assert_eq!(queue.dequeue(&shutdown).await.as_deref(), Some("a-9"));
    }
}
