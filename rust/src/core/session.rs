// Conversation selection + realtime channel side effects.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use quad_storage_traits::{
    BackendError, StoredMessage, SubscriptionId, TransportError, TransportEvent,
};

use super::channel::{ClosedChannel, FailureDecision};
use super::typing::{TypingPayload, TYPING_EVENT};
use super::AppCore;
use crate::error::QuadError;
use crate::state::{ChatMessage, ConversationKind, ConversationSummary};
use crate::updates::{CoreMsg, InternalEvent};

// Slack after the typing window before the sweep fires.
const TYPING_SWEEP_SLACK: Duration = Duration::from_millis(20);

impl AppCore {
    pub(super) fn select_conversation(&mut self, conversation_id: String) {
        if self.identity.is_none() {
            self.toast(QuadError::NotAuthenticated.to_string());
            return;
        }
        let summary = self
            .state
            .conversations
            .iter()
            .find(|s| s.conversation_id == conversation_id)
            .cloned()
            .unwrap_or_else(|| ConversationSummary {
                conversation_id: conversation_id.clone(),
                display_name: conversation_id.clone(),
                kind: ConversationKind::Group,
                created_at: 0,
                last_activity_at: None,
            });
        tracing::info!(%conversation_id, "select_conversation");

        self.close_channel();
        self.current = Some(summary);
        self.message_store.reset(Some(&conversation_id));
        self.presence.reset(Some(&conversation_id));
        self.typing.clear();

        // Sends not yet settled on the server stay visible across switches.
        for item in self.offline_queue.pending_for(&conversation_id) {
            self.message_store.insert_local(ChatMessage::from(&item));
        }
        for message in self.outgoing_for(&conversation_id) {
            self.message_store.insert_local(message);
        }

        self.open_channel(&conversation_id);
        self.load_history(&conversation_id);
        self.emit_current_conversation();
    }

    pub(super) fn close_conversation(&mut self) {
        self.close_channel();
        self.current = None;
        self.history_token = self.history_token.wrapping_add(1);
        self.message_store.reset(None);
        self.presence.reset(None);
        self.typing.clear();
        self.set_busy(|b| b.loading_history = false);
        self.emit_current_conversation();
    }

    pub(super) fn open_channel(&mut self, conversation_id: &str) {
        let (token, alive, closed) = self.channel.open(conversation_id);
        if let Some(closed) = closed {
            self.release_channel(closed);
        }
        self.spawn_subscribe(token, conversation_id.to_string(), alive);
    }

    pub(super) fn close_channel(&mut self) {
        if self.channel.begin_close() && self.current.is_some() {
            self.emit_current_conversation();
        }
        if let Some(closed) = self.channel.close() {
            self.release_channel(closed);
        }
        self.presence.clear();
        self.typing.clear();
    }

    /// Untrack presence and drop the remote subscription of a torn-down channel.
    fn release_channel(&mut self, closed: ClosedChannel) {
        let Some(subscription) = closed.subscription else {
            return;
        };
        self.release_subscription(closed.conversation_id, subscription);
    }

    fn release_subscription(&mut self, conversation_id: String, subscription: SubscriptionId) {
        let transport = self.transport.clone();
        self.runtime.spawn(async move {
            let _ = transport
                .untrack_presence(&conversation_id, subscription)
                .await;
            if let Err(e) = transport.unsubscribe(&conversation_id, subscription).await {
                tracing::debug!(%e, %conversation_id, subscription, "unsubscribe failed");
            }
        });
    }

    /// One worker per channel: subscribe, then forward every inbound event to
    /// the actor tagged with the channel token.
    fn spawn_subscribe(&mut self, token: u64, conversation_id: String, alive: Arc<AtomicBool>) {
        let transport = self.transport.clone();
        let tx = self.core_sender.clone();
        let worker = self.runtime.spawn(async move {
            let mut subscription = match transport.subscribe(&conversation_id).await {
                Ok(s) => s,
                Err(error) => {
                    let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::ChannelFailed {
                        token,
                        error,
                    })));
                    return;
                }
            };
            if !alive.load(Ordering::SeqCst) {
                let _ = transport.unsubscribe(&conversation_id, subscription.id).await;
                return;
            }
            let _ = tx.send(CoreMsg::Internal(Box::new(
                InternalEvent::ChannelSubscribed {
                    token,
                    conversation_id: conversation_id.clone(),
                    subscription: subscription.id,
                },
            )));

            let reason = loop {
                match subscription.events.recv().await {
                    Some(TransportEvent::Closed { reason }) => break reason,
                    Some(event) => {
                        if !alive.load(Ordering::SeqCst) {
                            return;
                        }
                        let _ = tx.send(CoreMsg::Internal(Box::new(
                            InternalEvent::ChannelEvent { token, event },
                        )));
                    }
                    None => break "event stream ended".to_string(),
                }
            };
            if alive.load(Ordering::SeqCst) {
                let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::ChannelDropped {
                    token,
                    reason,
                })));
            }
        });
        self.channel.attach_worker(token, worker);
    }

    pub(super) fn handle_channel_subscribed(
        &mut self,
        token: u64,
        conversation_id: String,
        subscription: SubscriptionId,
    ) {
        let Some(resubscribed) = self.channel.on_subscribed(token, subscription) else {
            // Subscribed after teardown began; release it.
            self.release_subscription(conversation_id, subscription);
            return;
        };
        tracing::info!(%conversation_id, subscription, resubscribed, "channel_subscribed");

        if let Some(identity) = self.identity.as_ref() {
            let transport = self.transport.clone();
            let key = identity.user_id.clone();
            let conversation_id = conversation_id.clone();
            self.runtime.spawn(async move {
                if let Err(e) = transport
                    .track_presence(&conversation_id, subscription, &key)
                    .await
                {
                    tracing::warn!(%e, %conversation_id, "track_presence failed");
                }
            });
        }

        if resubscribed {
            // Pick up anything written while we were disconnected.
            self.load_history(&conversation_id);
        }
        self.emit_current_conversation();
        self.flush_offline_queue();
    }

    pub(super) fn handle_channel_event(&mut self, token: u64, event: TransportEvent) {
        if !self.channel.is_current(token) {
            tracing::trace!(token, "dropping event from retired channel");
            return;
        }
        let Some(conversation_id) = self.current_conversation_id() else {
            return;
        };
        let my_user_id = self.identity.as_ref().map(|i| i.user_id.clone());

        let changed = match event {
            TransportEvent::Insert(message) => {
                if message.conversation_id != conversation_id {
                    return;
                }
                self.typing.clear_user(&message.sender_id);
                self.touch_conversation(&message.conversation_id, message.created_at);
                self.message_store
                    .on_remote_insert(message, my_user_id.as_deref())
                    .is_some()
            }
            TransportEvent::PresenceSync { member_refs } => {
                self.presence.replace(&conversation_id, member_refs)
            }
            // Presence is replaced wholesale on sync; deltas carry nothing extra.
            TransportEvent::PresenceJoin { .. } | TransportEvent::PresenceLeave { .. } => false,
            TransportEvent::Broadcast { event, payload } => {
                if event != TYPING_EVENT {
                    return;
                }
                let payload = match serde_json::from_value::<TypingPayload>(payload) {
                    Ok(p) => p,
                    Err(e) => {
                        tracing::debug!(%e, "malformed typing payload");
                        return;
                    }
                };
                let added = self
                    .typing
                    .on_signal(payload, my_user_id.as_deref(), Instant::now());
                if added {
                    self.schedule_typing_sweep(token);
                }
                added
            }
            TransportEvent::Closed { reason } => {
                self.handle_channel_failure(token, reason);
                return;
            }
        };
        if changed {
            self.emit_current_conversation();
        }
    }

    fn schedule_typing_sweep(&mut self, token: u64) {
        let delay = self.typing.window() + TYPING_SWEEP_SLACK;
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::TypingSweep {
                token,
            })));
        });
    }

    pub(super) fn handle_typing_sweep(&mut self, token: u64) {
        if !self.channel.is_current(token) {
            return;
        }
        if self.typing.prune(Instant::now()) {
            self.emit_current_conversation();
        }
    }

    pub(super) fn handle_channel_failure(&mut self, token: u64, reason: String) {
        let Some(decision) = self.channel.on_failure(token) else {
            return;
        };
        self.presence.clear();
        self.typing.clear();
        match decision {
            FailureDecision::Retry { attempt, delay } => {
                tracing::warn!(token, %reason, attempt, ?delay, "channel_retry_scheduled");
                let tx = self.core_sender.clone();
                self.runtime.spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::ChannelRetry {
                        token,
                    })));
                });
                self.emit_current_conversation();
            }
            FailureDecision::Exhausted { attempts } => {
                let conversation_id = self
                    .channel
                    .conversation_id()
                    .unwrap_or_default()
                    .to_string();
                let err = QuadError::ChannelUnavailable {
                    conversation_id,
                    attempts,
                };
                tracing::error!(%err, %reason, "channel_unavailable");
                self.state.toast = Some(err.to_string());
                self.emit_current_conversation();
            }
        }
    }

    pub(super) fn handle_channel_failed(&mut self, token: u64, error: TransportError) {
        self.handle_channel_failure(token, error.to_string());
    }

    pub(super) fn handle_channel_retry(&mut self, token: u64) {
        let Some((conversation_id, alive)) = self.channel.connecting(token) else {
            return;
        };
        tracing::debug!(token, %conversation_id, "channel_resubscribe");
        self.spawn_subscribe(token, conversation_id, alive);
    }

    pub(super) fn load_history(&mut self, conversation_id: &str) {
        self.history_token = self.history_token.wrapping_add(1);
        let token = self.history_token;
        self.set_busy(|b| b.loading_history = true);

        let backend = self.backend.clone();
        let tx = self.core_sender.clone();
        let conversation_id = conversation_id.to_string();
        self.runtime.spawn(async move {
            let result = backend.load_history(&conversation_id).await;
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::HistoryLoaded {
                token,
                conversation_id,
                result,
            })));
        });
    }

    pub(super) fn handle_history_loaded(
        &mut self,
        token: u64,
        conversation_id: String,
        result: Result<Vec<StoredMessage>, BackendError>,
    ) {
        if token != self.history_token || !self.message_store.is_for(&conversation_id) {
            return;
        }
        self.set_busy(|b| b.loading_history = false);
        match result {
            Ok(history) => {
                let my_user_id = self.identity.as_ref().map(|i| i.user_id.clone());
                let appended = self
                    .message_store
                    .merge_history(history, my_user_id.as_deref());
                tracing::debug!(
                    %conversation_id,
                    appended,
                    total = self.message_store.len(),
                    "history_merged"
                );
                self.emit_current_conversation();
            }
            Err(e) => {
                tracing::warn!(%e, %conversation_id, "load_history failed");
                self.toast(format!("Failed to load messages: {e}"));
            }
        }
    }
}
