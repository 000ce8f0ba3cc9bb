//! Memory-based implementation of [`OfflineQueueStorage`]

use parking_lot::Mutex;
use quad_storage_traits::{OfflineQueueError, OfflineQueueStorage, QueuedMessage};

/// Non-persistent offline queue. Contents are lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryOfflineQueue {
    items: Mutex<Vec<QueuedMessage>>,
}

impl MemoryOfflineQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }
}

impl OfflineQueueStorage for MemoryOfflineQueue {
    fn append(&self, message: QueuedMessage) -> Result<(), OfflineQueueError> {
        let mut items = self.items.lock();
        if items.iter().any(|m| m.local_id == message.local_id) {
            return Err(OfflineQueueError::Duplicate(message.local_id));
        }
        items.push(message);
        Ok(())
    }

    fn list(&self) -> Result<Vec<QueuedMessage>, OfflineQueueError> {
        Ok(self.items.lock().clone())
    }

    fn remove(&self, local_id: &str) -> Result<bool, OfflineQueueError> {
        let mut items = self.items.lock();
        let before = items.len();
        items.retain(|m| m.local_id != local_id);
        Ok(items.len() != before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queued(local_id: &str) -> QueuedMessage {
        QueuedMessage {
            local_id: local_id.to_string(),
            conversation_id: "c1".to_string(),
            content: format!("body {local_id}"),
            sender_id: "u1".to_string(),
            sender_display_name: "Ada".to_string(),
            created_at: 1,
        }
    }

    #[test]
    fn preserves_enqueue_order_across_removals() {
        let q = MemoryOfflineQueue::new();
        q.append(queued("a")).unwrap();
        q.append(queued("b")).unwrap();
        q.append(queued("c")).unwrap();
        assert!(q.remove("b").unwrap());
        assert!(!q.remove("b").unwrap());
        let ids: Vec<_> = q.list().unwrap().into_iter().map(|m| m.local_id).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert_eq!(q.len().unwrap(), 2);
    }

    #[test]
    fn rejects_duplicate_local_ids() {
        let q = MemoryOfflineQueue::new();
        q.append(queued("a")).unwrap();
        assert!(matches!(
            q.append(queued("a")),
            Err(OfflineQueueError::Duplicate(id)) if id == "a"
        ));
    }
}
