//! Ordered handoff of logged operations to the applier and observers.
//!
//! Entries enter the channel in WAL-append order and come out in that
//! same order. One registered consumer (the state applier) drains the
//! channel from a background thread; any number of observers can also
//! subscribe for committed operations.

use crate::wal::LoggedOperation;
use parking_lot::{Mutex, RwLock};
use std::sync::mpsc::{self, Receiver, Sender};

/// Distributes logged operations, preserving publish order.
pub struct OperationChannel {
    /// The single applier-side sender, dropped on close so the consumer
    /// thread's `recv` unblocks and exits.
    consumer: Mutex<Option<Sender<LoggedOperation>>>,
    /// Observer senders.
    subscribers: RwLock<Vec<Sender<LoggedOperation>>>,
}

impl OperationChannel {
    /// Creates an empty channel with no consumer or subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            consumer: Mutex::new(None),
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Registers the applier consumer and returns its receiving end.
    ///
    /// Replaces any previous consumer; the old receiver is disconnected.
    pub fn register_consumer(&self) -> Receiver<LoggedOperation> {
        let (tx, rx) = mpsc::channel();
        *self.consumer.lock() = Some(tx);
        rx
    }

    /// Subscribes an observer to all future published operations.
    ///
    /// The receiver should be drained regularly; events queue unbounded
    /// on the receiving side.
    pub fn subscribe(&self) -> Receiver<LoggedOperation> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Publishes one logged operation to the consumer and all observers.
    pub fn publish(&self, entry: LoggedOperation) {
        // Observers first so a hung consumer can never starve them.
        {
            let mut subscribers = self.subscribers.write();
            subscribers.retain(|tx| tx.send(entry.clone()).is_ok());
        }

        let consumer = self.consumer.lock();
        if let Some(tx) = consumer.as_ref() {
            if tx.send(entry).is_err() {
                tracing::warn!("operation channel consumer disconnected");
            }
        }
    }

    /// Closes the channel: the consumer's `recv` will return an error
    /// once the queue drains, and observers stop receiving.
    pub fn close(&self) {
        self.consumer.lock().take();
        self.subscribers.write().clear();
    }

    /// Returns the number of live observers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl Default for OperationChannel {
    fn default() -> Self {
        Self::new()
    }
}
