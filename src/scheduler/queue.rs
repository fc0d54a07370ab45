//! Bounded in-process work queue.
//!
//! The queue connects the producer (queue builder) with every worker:
//!
//! - `QueueWriter`: producer side, pushes with a bounded wait
//! - `QueueReader`: consumer side, shared by all workers, pops with a bounded wait
//!
//! Capacity is enforced by a bounded `tokio::sync::mpsc` channel, so the
//! number of buffered messages never exceeds `max_queue_size`. The
//! receiving half sits behind an async mutex so that any number of workers
//! can block on it; whichever worker holds the lock takes the next message.
//!
//! Occupancy reads are approximate: they race with concurrent pushes and
//! pops, and the builder treats them as a hint.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{mpsc, Mutex};

use super::job::{ItemId, QueueMessage};
use crate::error::QueueError;

/// Creates a bounded queue and returns both halves.
///
/// # Panics
///
/// Panics if `capacity` is zero. `Settings::validate` rejects that value.
pub fn bounded(capacity: usize) -> (QueueWriter, QueueReader) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        QueueWriter { tx },
        QueueReader {
            rx: Arc::new(Mutex::new(rx)),
            capacity,
        },
    )
}

/// Producer half of the shared queue.
#[derive(Debug, Clone)]
pub struct QueueWriter {
    tx: mpsc::Sender<QueueMessage>,
}

impl QueueWriter {
    /// Pushes a message, waiting up to `timeout` for a free slot.
    ///
    /// # Errors
    ///
    /// - `QueueError::Full` if no slot freed up in time
    /// - `QueueError::Disconnected` if every reader has been dropped
    pub async fn push(&self, message: QueueMessage, timeout: Duration) -> Result<(), QueueError> {
        match self.tx.send_timeout(message, timeout).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(QueueError::Full(timeout)),
            Err(SendTimeoutError::Closed(_)) => Err(QueueError::Disconnected),
        }
    }

    /// Pushes a work item. Shorthand for `push(QueueMessage::Item(id), ..)`.
    pub async fn push_item(&self, id: ItemId, timeout: Duration) -> Result<(), QueueError> {
        self.push(QueueMessage::Item(id), timeout).await
    }

    /// Approximate number of buffered messages.
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Returns whether the queue looks empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of buffered messages.
    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }
}

/// Consumer half of the shared queue. Cloning shares the same receiver.
#[derive(Debug, Clone)]
pub struct QueueReader {
    rx: Arc<Mutex<mpsc::Receiver<QueueMessage>>>,
    capacity: usize,
}

impl QueueReader {
    /// Pops the next message, waiting up to `timeout` in total (including
    /// the wait for other workers to release the receiver).
    ///
    /// # Errors
    ///
    /// - `QueueError::Empty` if nothing arrived in time
    /// - `QueueError::Disconnected` if the queue is empty and every writer
    ///   has been dropped
    pub async fn pop(&self, timeout: Duration) -> Result<QueueMessage, QueueError> {
        let attempt = async {
            let mut rx = self.rx.lock().await;
            rx.recv().await
        };

        match tokio::time::timeout(timeout, attempt).await {
            Ok(Some(message)) => Ok(message),
            Ok(None) => Err(QueueError::Disconnected),
            Err(_) => Err(QueueError::Empty(timeout)),
        }
    }

    /// Maximum number of buffered messages.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_millis(20);

    #[tokio::test]
    async fn test_fifo_order() {
        let (writer, reader) = bounded(4);
        for i in 0..3 {
            writer.push_item(ItemId::from(i), TIMEOUT).await.expect("push");
        }
        assert_eq!(writer.len(), 3);

        for i in 0..3 {
            let message = reader.pop(TIMEOUT).await.expect("pop");
            assert_eq!(message, QueueMessage::Item(ItemId::from(i)));
        }
        assert!(writer.is_empty());
    }

    #[tokio::test]
    async fn test_push_reports_full() {
        let (writer, _reader) = bounded(2);
        writer.push_item(ItemId::from(1), TIMEOUT).await.expect("push");
        writer.push_item(ItemId::from(2), TIMEOUT).await.expect("push");

        let err = writer.push_item(ItemId::from(3), TIMEOUT).await.unwrap_err();
        assert_eq!(err, QueueError::Full(TIMEOUT));
        assert_eq!(writer.len(), 2);
    }

    #[tokio::test]
    async fn test_pop_reports_empty() {
        let (_writer, reader) = bounded(2);
        let err = reader.pop(TIMEOUT).await.unwrap_err();
        assert_eq!(err, QueueError::Empty(TIMEOUT));
    }

    #[tokio::test]
    async fn test_pop_reports_disconnected_after_drain() {
        let (writer, reader) = bounded(2);
        writer.push(QueueMessage::Close, TIMEOUT).await.expect("push");
        drop(writer);

        assert_eq!(reader.pop(TIMEOUT).await, Ok(QueueMessage::Close));
        assert_eq!(reader.pop(TIMEOUT).await, Err(QueueError::Disconnected));
    }

    #[tokio::test]
    async fn test_capacity_never_exceeded_under_contention() {
        let capacity = 8;
        let (writer, reader) = bounded(capacity);

        let mut producers = Vec::new();
        for p in 0..4 {
            let writer = writer.clone();
            producers.push(tokio::spawn(async move {
                for i in 0..50 {
                    let id = ItemId::from(p * 1000 + i);
                    while writer.push_item(id.clone(), TIMEOUT).await.is_err() {}
                    assert!(writer.len() <= capacity);
                }
            }));
        }

        let mut consumers = Vec::new();
        for _ in 0..3 {
            let reader = reader.clone();
            consumers.push(tokio::spawn(async move {
                let mut seen = 0usize;
                while let Ok(QueueMessage::Item(_)) = reader.pop(Duration::from_millis(200)).await
                {
                    seen += 1;
                }
                seen
            }));
        }

        for producer in producers {
            producer.await.expect("producer panicked");
        }
        drop(writer);

        let mut total = 0;
        for consumer in consumers {
            total += consumer.await.expect("consumer panicked");
        }
        assert_eq!(total, 200);
    }
}
