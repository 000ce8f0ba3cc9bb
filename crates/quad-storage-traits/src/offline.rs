//! Durable local buffer for messages composed while offline
//!
//! Implementations must be safe to call from several threads at once; appends
//! and removals are serialized by the implementation.

use crate::types::QueuedMessage;

/// Error returned by [`OfflineQueueStorage`] operations
#[derive(Debug, thiserror::Error)]
pub enum OfflineQueueError {
    /// The underlying store failed
    #[error("Offline queue storage error: {0}")]
    Storage(String),
    /// An item with the same local id is already queued
    #[error("Message already queued: {0}")]
    Duplicate(String),
}

/// Storage for the offline queue
pub trait OfflineQueueStorage: Send + Sync {
    /// Append an item at the tail of the queue
    fn append(&self, message: QueuedMessage) -> Result<(), OfflineQueueError>;

    /// All queued items in enqueue order
    fn list(&self) -> Result<Vec<QueuedMessage>, OfflineQueueError>;

    /// Remove the item with `local_id`. Returns whether an item was removed.
    fn remove(&self, local_id: &str) -> Result<bool, OfflineQueueError>;

    /// Number of queued items
    fn len(&self) -> Result<usize, OfflineQueueError> {
        Ok(self.list()?.len())
    }

    /// Whether the queue is empty
    fn is_empty(&self) -> Result<bool, OfflineQueueError> {
        Ok(self.len()? == 0)
    }
}
