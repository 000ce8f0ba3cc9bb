//! Memory-based implementation of [`ChatBackend`]

use async_trait::async_trait;
use quad_storage_traits::{
    BackendError, ChatBackend, Conversation, ConversationKind, NewMessage, StoredMessage,
    TransportEvent,
};

use crate::{MemoryBackend, now_millis};

impl MemoryBackend {
    fn check_reachable(&self) -> Result<(), BackendError> {
        if self.inner.read().faults.unreachable {
            return Err(BackendError::Unreachable("network unreachable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ChatBackend for MemoryBackend {
    async fn list_conversations(&self, user_id: &str) -> Result<Vec<Conversation>, BackendError> {
        self.check_reachable()?;
        let inner = self.inner.read();
        let list = inner
            .members
            .iter()
            .filter(|(_, members)| members.contains(user_id))
            .filter_map(|(id, _)| inner.conversations.get(id).cloned())
            .collect();
        Ok(list)
    }

    async fn create_conversation(
        &self,
        _creator_id: &str,
        display_name: &str,
        kind: ConversationKind,
    ) -> Result<Conversation, BackendError> {
        self.check_reachable()?;
        let mut inner = self.inner.write();
        inner.next_conversation += 1;
        let conversation = Conversation {
            id: format!("conv-{}", inner.next_conversation),
            display_name: display_name.to_string(),
            kind,
            created_at: now_millis(),
            last_activity_at: None,
        };
        inner
            .conversations
            .insert(conversation.id.clone(), conversation.clone());
        inner.members.entry(conversation.id.clone()).or_default();
        Ok(conversation)
    }

    async fn add_member(&self, conversation_id: &str, user_id: &str) -> Result<(), BackendError> {
        self.check_reachable()?;
        let mut inner = self.inner.write();
        if !inner.conversations.contains_key(conversation_id) {
            return Err(BackendError::NotFound(conversation_id.to_string()));
        }
        inner
            .members
            .entry(conversation_id.to_string())
            .or_default()
            .insert(user_id.to_string());
        Ok(())
    }

    async fn load_history(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<StoredMessage>, BackendError> {
        self.check_reachable()?;
        let inner = self.inner.read();
        if !inner.conversations.contains_key(conversation_id) {
            return Err(BackendError::NotFound(conversation_id.to_string()));
        }
        let mut history = inner
            .messages
            .get(conversation_id)
            .cloned()
            .unwrap_or_default();
        // Stable: equal timestamps keep insertion order.
        history.sort_by_key(|m| m.created_at);
        Ok(history)
    }

    async fn insert_message(&self, message: NewMessage) -> Result<StoredMessage, BackendError> {
        let latency = self.inner.read().faults.insert_latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.check_reachable()?;

        let stored = {
            let mut inner = self.inner.write();
            if inner.faults.dropped_inserts > 0 {
                inner.faults.dropped_inserts -= 1;
                return Err(BackendError::Unreachable("insert dropped".to_string()));
            }
            if inner.faults.rejected_inserts > 0 {
                inner.faults.rejected_inserts -= 1;
                return Err(BackendError::Rejected("insert rejected".to_string()));
            }
            let Some(conversation) = inner.conversations.get_mut(&message.conversation_id) else {
                return Err(BackendError::NotFound(message.conversation_id));
            };
            conversation.last_activity_at = Some(
                conversation
                    .last_activity_at
                    .map_or(message.created_at, |t| t.max(message.created_at)),
            );
            inner.next_message += 1;
            let stored = StoredMessage {
                server_id: format!("srv-{}", inner.next_message),
                local_id: Some(message.local_id),
                conversation_id: message.conversation_id,
                sender_id: message.sender_id,
                sender_display_name: message.sender_display_name,
                content: message.content,
                created_at: message.created_at,
            };
            inner
                .messages
                .entry(stored.conversation_id.clone())
                .or_default()
                .push(stored.clone());
            stored
        };

        for tx in self.senders(&stored.conversation_id, None) {
            let _ = tx.send(TransportEvent::Insert(stored.clone())).await;
        }
        Ok(stored)
    }
}
