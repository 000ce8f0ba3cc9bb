// Outbound messages and typing announcements.

use std::time::Instant;

use quad_storage_traits::{BackendError, NewMessage, QueuedMessage, StoredMessage};

use super::typing::{TypingPayload, TYPING_EVENT};
use super::AppCore;
use crate::error::QuadError;
use crate::state::{now_millis, ChatMessage, Connectivity, MessageDeliveryState};
use crate::updates::{CoreMsg, InternalEvent};

impl AppCore {
    pub(super) fn send_message(&mut self, content: String) {
        let Some(identity) = self.identity.clone() else {
            self.toast(QuadError::NotAuthenticated.to_string());
            return;
        };
        let Some(conversation_id) = self.current_conversation_id() else {
            self.toast("Open a conversation first");
            return;
        };
        let content = content.trim();
        if content.is_empty() {
            return;
        }

        let message = NewMessage {
            local_id: uuid::Uuid::new_v4().to_string(),
            conversation_id,
            sender_id: identity.user_id,
            sender_display_name: identity.display_name,
            content: content.to_string(),
            created_at: self.next_outgoing_ts(),
        };
        let local = ChatMessage {
            local_id: message.local_id.clone(),
            server_id: None,
            conversation_id: message.conversation_id.clone(),
            sender_id: message.sender_id.clone(),
            sender_display_name: message.sender_display_name.clone(),
            content: message.content.clone(),
            created_at: message.created_at,
            is_mine: true,
            delivery: MessageDeliveryState::Pending,
        };
        self.remember_outgoing(local.clone());
        self.message_store.insert_local(local);
        // Sending a message ends our typing burst.
        self.typing.reset_announcements();
        self.emit_current_conversation();
        self.write_message(message);
    }

    pub(super) fn retry_message(&mut self, local_id: String) {
        let Some(existing) = self.message_store.get(&local_id).cloned() else {
            return;
        };
        if !existing.delivery.is_retryable() {
            return;
        }
        tracing::info!(%local_id, "retry_message");
        self.message_store
            .set_delivery(&local_id, MessageDeliveryState::Pending);
        self.remember_outgoing(ChatMessage {
            delivery: MessageDeliveryState::Pending,
            ..existing.clone()
        });
        self.emit_current_conversation();
        self.write_message(NewMessage {
            local_id: existing.local_id,
            conversation_id: existing.conversation_id,
            sender_id: existing.sender_id,
            sender_display_name: existing.sender_display_name,
            content: existing.content,
            created_at: existing.created_at,
        });
    }

    /// Online: write now. Offline: straight to the durable queue.
    fn write_message(&mut self, message: NewMessage) {
        if self.state.connectivity == Connectivity::Offline {
            self.queue_offline(QueuedMessage::from(message));
            return;
        }

        let backend = self.backend.clone();
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            let result = backend.insert_message(message.clone()).await;
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::SendResult {
                message,
                result,
            })));
        });
    }

    pub(super) fn handle_send_result(
        &mut self,
        message: NewMessage,
        result: Result<StoredMessage, BackendError>,
    ) {
        let in_view = self.message_store.is_for(&message.conversation_id);
        match result {
            Ok(stored) => {
                tracing::debug!(
                    local_id = %message.local_id,
                    server_id = %stored.server_id,
                    "message_sent"
                );
                self.forget_outgoing(&message.conversation_id, &message.local_id);
                self.touch_conversation(&message.conversation_id, stored.created_at);
                if in_view {
                    self.message_store.reconcile(&message.local_id, Ok(stored));
                }
                self.emit_current_conversation();
            }
            Err(e) if e.is_transient() => {
                tracing::warn!(%e, local_id = %message.local_id, "send failed, queueing offline");
                self.queue_offline(QueuedMessage::from(message));
            }
            Err(e) => {
                let err = QuadError::SendFailed {
                    local_id: message.local_id.clone(),
                    reason: e.to_string(),
                };
                tracing::warn!(%err, "send rejected");
                self.mark_outgoing(
                    &message.conversation_id,
                    &message.local_id,
                    MessageDeliveryState::Failed {
                        reason: e.to_string(),
                    },
                );
                if in_view {
                    self.message_store
                        .reconcile(&message.local_id, Err(e.to_string()));
                }
                self.emit_current_conversation();
            }
        }
    }

    pub(super) fn typing_started(&mut self) {
        let Some(identity) = self.identity.as_ref() else {
            return;
        };
        let Some((conversation_id, subscription)) = self
            .channel
            .subscription()
            .map(|(c, s)| (c.to_string(), s))
        else {
            return;
        };
        if !self
            .typing
            .should_announce(&conversation_id, &identity.user_id, Instant::now())
        {
            return;
        }
        let payload = TypingPayload {
            user_id: identity.user_id.clone(),
            display_name: Some(identity.display_name.clone()),
        };
        let payload = match serde_json::to_value(&payload) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(%e, "failed to encode typing payload");
                return;
            }
        };

        let transport = self.transport.clone();
        self.runtime.spawn(async move {
            if let Err(e) = transport
                .broadcast(&conversation_id, subscription, TYPING_EVENT, payload)
                .await
            {
                tracing::debug!(%e, %conversation_id, "typing broadcast failed");
            }
        });
    }

    /// Keep a pending or failed send around across conversation switches.
    pub(super) fn remember_outgoing(&mut self, message: ChatMessage) {
        self.local_outbox
            .entry(message.conversation_id.clone())
            .or_default()
            .insert(message.local_id.clone(), message);
    }

    pub(super) fn mark_outgoing(
        &mut self,
        conversation_id: &str,
        local_id: &str,
        delivery: MessageDeliveryState,
    ) {
        if let Some(m) = self
            .local_outbox
            .get_mut(conversation_id)
            .and_then(|m| m.get_mut(local_id))
        {
            m.delivery = delivery;
        }
    }

    pub(super) fn forget_outgoing(&mut self, conversation_id: &str, local_id: &str) {
        let Some(m) = self.local_outbox.get_mut(conversation_id) else {
            return;
        };
        m.remove(local_id);
        if m.is_empty() {
            self.local_outbox.remove(conversation_id);
        }
    }

    /// Unsettled sends for `conversation_id`.
    pub(super) fn outgoing_for(&self, conversation_id: &str) -> Vec<ChatMessage> {
        self.local_outbox
            .get(conversation_id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Strictly increasing timestamps for our own messages so rapid sends
    /// never tie.
    fn next_outgoing_ts(&mut self) -> i64 {
        let ts = now_millis().max(self.last_outgoing_ts + 1);
        self.last_outgoing_ts = ts;
        ts
    }
}
