// Durable buffer for messages written while the network is down, and the
// flush that drains it in enqueue order.

use std::sync::Arc;

use quad_storage_traits::{
    BackendError, OfflineQueueError, OfflineQueueStorage, QueuedMessage, StoredMessage,
};

use super::AppCore;
use crate::error::QuadError;
use crate::state::{ChatMessage, Connectivity, MessageDeliveryState};
use crate::updates::{CoreMsg, InternalEvent};

#[derive(Clone)]
pub(crate) struct OfflineQueue {
    storage: Arc<dyn OfflineQueueStorage>,
}

impl OfflineQueue {
    pub(crate) fn new(storage: Arc<dyn OfflineQueueStorage>) -> Self {
        Self { storage }
    }

    /// Persist `item`. Re-queueing a local id that is already queued is a no-op.
    pub(crate) fn enqueue(&self, item: QueuedMessage) -> Result<(), QuadError> {
        match self.storage.append(item) {
            Ok(()) => Ok(()),
            Err(OfflineQueueError::Duplicate(local_id)) => {
                tracing::debug!(%local_id, "message already queued");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub(crate) fn pending(&self) -> Result<Vec<QueuedMessage>, QuadError> {
        Ok(self.storage.list()?)
    }

    pub(crate) fn pending_for(&self, conversation_id: &str) -> Vec<QueuedMessage> {
        match self.pending() {
            Ok(items) => items
                .into_iter()
                .filter(|m| m.conversation_id == conversation_id)
                .collect(),
            Err(e) => {
                tracing::warn!(%e, "failed to read offline queue");
                vec![]
            }
        }
    }

    pub(crate) fn len(&self) -> u32 {
        match self.storage.len() {
            Ok(n) => n as u32,
            Err(e) => {
                tracing::warn!(%e, "failed to count offline queue");
                0
            }
        }
    }

    fn storage(&self) -> Arc<dyn OfflineQueueStorage> {
        self.storage.clone()
    }
}

impl From<&QueuedMessage> for ChatMessage {
    fn from(item: &QueuedMessage) -> Self {
        Self {
            local_id: item.local_id.clone(),
            server_id: None,
            conversation_id: item.conversation_id.clone(),
            sender_id: item.sender_id.clone(),
            sender_display_name: item.sender_display_name.clone(),
            content: item.content.clone(),
            created_at: item.created_at,
            is_mine: true,
            delivery: MessageDeliveryState::QueuedOffline,
        }
    }
}

impl AppCore {
    /// Persist a message that could not be written now and mark it queued.
    pub(super) fn queue_offline(&mut self, item: QueuedMessage) {
        let local_id = item.local_id.clone();
        let conversation_id = item.conversation_id.clone();
        let delivery = match self.offline_queue.enqueue(item) {
            Ok(()) => {
                tracing::info!(%local_id, %conversation_id, "message_queued_offline");
                // The durable queue owns it from here.
                self.forget_outgoing(&conversation_id, &local_id);
                MessageDeliveryState::QueuedOffline
            }
            Err(e) => {
                tracing::error!(%e, %local_id, "failed to queue message offline");
                self.state.toast = Some(format!("Could not save message: {e}"));
                let failed = MessageDeliveryState::Failed {
                    reason: e.to_string(),
                };
                self.mark_outgoing(&conversation_id, &local_id, failed.clone());
                failed
            }
        };
        if self.message_store.is_for(&conversation_id) {
            self.message_store.set_delivery(&local_id, delivery);
        }
        self.state.offline_queue_len = self.offline_queue.len();
        self.emit_current_conversation();
    }

    /// Drain the queue in enqueue order, stopping at the first transient
    /// failure. Items the backend rejects leave the queue as failed sends.
    /// Only one flush runs at a time; a request made meanwhile re-runs it after.
    pub(super) fn flush_offline_queue(&mut self) {
        if self.state.connectivity != Connectivity::Online {
            return;
        }
        if self.flush_in_flight {
            self.flush_dirty = true;
            return;
        }
        let items = match self.offline_queue.pending() {
            Ok(items) => items,
            Err(e) => {
                self.toast(format!("Offline queue unavailable: {e}"));
                return;
            }
        };
        if items.is_empty() {
            return;
        }

        self.flush_in_flight = true;
        self.flush_dirty = false;
        tracing::info!(count = items.len(), "offline_flush_start");
        for item in &items {
            if self.message_store.is_for(&item.conversation_id) {
                self.message_store
                    .set_delivery(&item.local_id, MessageDeliveryState::Pending);
            }
        }
        self.set_busy(|b| b.flushing_offline_queue = true);
        self.emit_current_conversation();

        let backend = self.backend.clone();
        let storage = self.offline_queue.storage();
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            for item in items {
                let result = backend.insert_message(item.to_new_message()).await;
                let blocked = matches!(&result, Err(e) if e.is_transient());
                if !blocked {
                    if let Err(e) = storage.remove(&item.local_id) {
                        tracing::error!(
                            %e,
                            local_id = %item.local_id,
                            "failed to dequeue flushed message"
                        );
                    }
                }
                let _ = tx.send(CoreMsg::Internal(Box::new(
                    InternalEvent::FlushItemResult { item, result },
                )));
                if blocked {
                    break;
                }
            }
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::FlushFinished)));
        });
    }

    pub(super) fn handle_flush_item_result(
        &mut self,
        item: QueuedMessage,
        result: Result<StoredMessage, BackendError>,
    ) {
        let in_view = self.message_store.is_for(&item.conversation_id);
        match result {
            Ok(stored) => {
                tracing::info!(
                    local_id = %item.local_id,
                    server_id = %stored.server_id,
                    "offline_message_sent"
                );
                self.touch_conversation(&item.conversation_id, stored.created_at);
                if in_view {
                    self.message_store.reconcile(&item.local_id, Ok(stored));
                }
            }
            Err(e) if e.is_transient() => {
                tracing::warn!(%e, local_id = %item.local_id, "offline flush stopped");
                if in_view {
                    self.message_store
                        .set_delivery(&item.local_id, MessageDeliveryState::QueuedOffline);
                }
            }
            Err(e) => {
                tracing::warn!(%e, local_id = %item.local_id, "queued message rejected");
                let mut failed = ChatMessage::from(&item);
                failed.delivery = MessageDeliveryState::Failed {
                    reason: e.to_string(),
                };
                if in_view {
                    self.message_store
                        .set_delivery(&item.local_id, failed.delivery.clone());
                }
                self.remember_outgoing(failed);
            }
        }
        self.state.offline_queue_len = self.offline_queue.len();
        self.emit_current_conversation();
    }

    pub(super) fn handle_flush_finished(&mut self) {
        self.flush_in_flight = false;
        self.set_busy(|b| b.flushing_offline_queue = false);
        self.state.offline_queue_len = self.offline_queue.len();
        // Anything still marked pending from this flush goes back to queued.
        if let Some(conversation_id) = self.current_conversation_id() {
            for item in self.offline_queue.pending_for(&conversation_id) {
                if self
                    .message_store
                    .get(&item.local_id)
                    .is_some_and(|m| m.delivery == MessageDeliveryState::Pending)
                {
                    self.message_store
                        .set_delivery(&item.local_id, MessageDeliveryState::QueuedOffline);
                }
            }
        }
        self.emit_current_conversation();
        if std::mem::take(&mut self.flush_dirty) {
            self.flush_offline_queue();
        }
    }
}
