use tokio_util::sync::CancellationToken;

use crate::error::ReplayError;

/// Fixed-capacity FIFO shared between the ingestion tasks (producers) and the
/// dispatch workers (consumers).  A full queue blocks producers; an empty one
/// blocks consumers.  The queue closes once every `QueueSender` is dropped.
pub fn bounded<T>(capacity: usize) -> (QueueSender<T>, QueueReceiver<T>) {
    let (tx, rx) = flume::bounded(capacity.max(1));
    (QueueSender { tx }, QueueReceiver { rx })
}

#[derive(Debug)]
pub struct QueueSender<T> {
    tx: flume::Sender<T>,
}

#[derive(Debug)]
pub struct QueueReceiver<T> {
    rx: flume::Receiver<T>,
}

// Manual impls: derive(Clone) would demand `T: Clone`.
impl<T> Clone for QueueSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> Clone for QueueReceiver<T> {
    fn clone(&self) -> Self {
        Self {
            rx: self.rx.clone(),
        }
    }
}

impl<T> QueueSender<T> {
    /// Block until there is room for `item`.  Fails with `Cancelled` when the
    /// run is cancelled or no consumer is left to take the item.
    pub async fn push(&self, item: T, cancel: &CancellationToken) -> Result<(), ReplayError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ReplayError::Cancelled),
            sent = self.tx.send_async(item) => sent.map_err(|_| ReplayError::Cancelled),
        }
    }

    pub fn capacity(&self) -> usize {
        self.tx.capacity().unwrap_or(usize::MAX)
    }
}

impl<T> QueueReceiver<T> {
    /// Next item in FIFO order.  `None` once the queue is closed and drained,
    /// or as soon as `cancel` fires.
    pub async fn pop(&self, cancel: &CancellationToken) -> Option<T> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            received = self.rx.recv_async() => received.ok(),
        }
    }
}
