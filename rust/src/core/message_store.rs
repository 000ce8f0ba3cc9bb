// Ordered message list for the open conversation, with optimistic inserts and
// reconciliation by local id.

use quad_storage_traits::StoredMessage;

use crate::state::{ChatMessage, MessageDeliveryState};

#[derive(Debug, Clone)]
struct Entry {
    message: ChatMessage,
    // Local arrival order; tie-break for equal `created_at`.
    arrival: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RemoteInsert {
    Appended,
    /// The insert was the echo of one of our optimistic sends.
    Reconciled,
    /// Already present under the same server id.
    Duplicate,
}

/// Messages of one conversation, always sorted by `(created_at, arrival)`.
#[derive(Debug, Default)]
pub(crate) struct MessageStore {
    conversation_id: Option<String>,
    entries: Vec<Entry>,
    next_arrival: u64,
}

impl MessageStore {
    /// Drop every entry and bind the store to `conversation_id`.
    pub(crate) fn reset(&mut self, conversation_id: Option<&str>) {
        self.conversation_id = conversation_id.map(ToString::to_string);
        self.entries.clear();
    }

    pub(crate) fn is_for(&self, conversation_id: &str) -> bool {
        self.conversation_id.as_deref() == Some(conversation_id)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn messages(&self) -> Vec<ChatMessage> {
        self.entries.iter().map(|e| e.message.clone()).collect()
    }

    pub(crate) fn get(&self, local_id: &str) -> Option<&ChatMessage> {
        self.entries
            .iter()
            .map(|e| &e.message)
            .find(|m| m.local_id == local_id)
    }

    /// Append a client-originated message (pending or queued offline).
    ///
    /// Ignored when the message belongs to another conversation or its local id
    /// is already present.
    pub(crate) fn insert_local(&mut self, message: ChatMessage) -> bool {
        if !self.is_for(&message.conversation_id) || self.get(&message.local_id).is_some() {
            return false;
        }
        self.insert_sorted(message);
        true
    }

    /// Apply a message delivered by the channel (or fetched history).
    pub(crate) fn on_remote_insert(
        &mut self,
        stored: StoredMessage,
        my_user_id: Option<&str>,
    ) -> Option<RemoteInsert> {
        if !self.is_for(&stored.conversation_id) {
            return None;
        }
        if self.find_by_server_id(&stored.server_id).is_some() {
            return Some(RemoteInsert::Duplicate);
        }
        if let Some(local_id) = stored.local_id.clone() {
            if self.get(&local_id).is_some() {
                self.reconcile(&local_id, Ok(stored));
                return Some(RemoteInsert::Reconciled);
            }
        }

        let local_id = stored
            .local_id
            .clone()
            .unwrap_or_else(|| format!("remote-{}", stored.server_id));
        let is_mine = my_user_id == Some(stored.sender_id.as_str());
        self.insert_sorted(ChatMessage {
            local_id,
            server_id: Some(stored.server_id),
            conversation_id: stored.conversation_id,
            sender_id: stored.sender_id,
            sender_display_name: stored.sender_display_name,
            content: stored.content,
            created_at: stored.created_at,
            is_mine,
            delivery: MessageDeliveryState::Sent,
        });
        Some(RemoteInsert::Appended)
    }

    /// Merge a freshly fetched history. Entries already present (optimistic
    /// sends, early inserts) are kept; duplicates by server id are skipped.
    pub(crate) fn merge_history(
        &mut self,
        history: Vec<StoredMessage>,
        my_user_id: Option<&str>,
    ) -> usize {
        history
            .into_iter()
            .filter_map(|m| self.on_remote_insert(m, my_user_id))
            .filter(|r| *r == RemoteInsert::Appended)
            .count()
    }

    /// Settle the outcome of a write issued for `local_id`.
    ///
    /// On success the server id is assigned once and never replaced. If the
    /// echo of this write was appended before the acknowledgment arrived, that
    /// copy is dropped so the message stays unique.
    pub(crate) fn reconcile(
        &mut self,
        local_id: &str,
        outcome: Result<StoredMessage, String>,
    ) -> bool {
        let Some(idx) = self.position_of(local_id) else {
            return false;
        };
        let stored = match outcome {
            Ok(stored) => stored,
            Err(reason) => {
                let entry = &mut self.entries[idx].message;
                if entry.server_id.is_some() {
                    return false;
                }
                entry.delivery = MessageDeliveryState::Failed { reason };
                return true;
            }
        };

        if let Some(existing) = self.entries[idx].message.server_id.as_deref() {
            if existing != stored.server_id {
                tracing::warn!(
                    local_id,
                    existing,
                    incoming = %stored.server_id,
                    "ignoring second server id for message"
                );
            }
            let entry = &mut self.entries[idx].message;
            if entry.delivery != MessageDeliveryState::Sent {
                entry.delivery = MessageDeliveryState::Sent;
                return true;
            }
            return false;
        }

        if let Some(dup) = self.find_by_server_id(&stored.server_id) {
            self.entries.remove(dup);
        }
        let Some(idx) = self.position_of(local_id) else {
            return false;
        };
        let mut entry = self.entries.remove(idx);
        entry.message.server_id = Some(stored.server_id);
        entry.message.created_at = stored.created_at;
        entry.message.delivery = MessageDeliveryState::Sent;
        self.insert_entry(entry);
        true
    }

    pub(crate) fn set_delivery(&mut self, local_id: &str, delivery: MessageDeliveryState) -> bool {
        let Some(idx) = self.position_of(local_id) else {
            return false;
        };
        let entry = &mut self.entries[idx].message;
        if entry.server_id.is_some() || entry.delivery == delivery {
            return false;
        }
        entry.delivery = delivery;
        true
    }

    fn position_of(&self, local_id: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.message.local_id == local_id)
    }

    fn find_by_server_id(&self, server_id: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.message.server_id.as_deref() == Some(server_id))
    }

    fn insert_sorted(&mut self, message: ChatMessage) {
        let arrival = self.next_arrival;
        self.next_arrival += 1;
        self.insert_entry(Entry { message, arrival });
    }

    fn insert_entry(&mut self, entry: Entry) {
        let key = (entry.message.created_at, entry.arrival);
        let at = self
            .entries
            .partition_point(|e| (e.message.created_at, e.arrival) <= key);
        self.entries.insert(at, entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONV: &str = "conv-1";

    fn local(local_id: &str, content: &str, created_at: i64) -> ChatMessage {
        ChatMessage {
            local_id: local_id.to_string(),
            server_id: None,
            conversation_id: CONV.to_string(),
            sender_id: "me".to_string(),
            sender_display_name: "Me".to_string(),
            content: content.to_string(),
            created_at,
            is_mine: true,
            delivery: MessageDeliveryState::Pending,
        }
    }

    fn stored(
        server_id: &str,
        local_id: Option<&str>,
        sender: &str,
        created_at: i64,
    ) -> StoredMessage {
        StoredMessage {
            server_id: server_id.to_string(),
            local_id: local_id.map(ToString::to_string),
            conversation_id: CONV.to_string(),
            sender_id: sender.to_string(),
            sender_display_name: sender.to_uppercase(),
            content: format!("from {sender}"),
            created_at,
        }
    }

    fn store() -> MessageStore {
        let mut s = MessageStore::default();
        s.reset(Some(CONV));
        s
    }

    fn order(s: &MessageStore) -> Vec<String> {
        s.messages().into_iter().map(|m| m.local_id).collect()
    }

    #[test]
    fn ack_assigns_server_id_by_local_id() {
        let mut s = store();
        s.insert_local(local("L1", "hello", 100));
        s.insert_local(local("L2", "hello", 101));

        assert!(s.reconcile("L2", Ok(stored("S2", Some("L2"), "me", 101))));
        let l1 = s.get("L1").unwrap();
        let l2 = s.get("L2").unwrap();
        assert_eq!(l1.server_id, None);
        assert_eq!(l1.delivery, MessageDeliveryState::Pending);
        assert_eq!(l2.server_id.as_deref(), Some("S2"));
        assert_eq!(l2.delivery, MessageDeliveryState::Sent);
    }

    #[test]
    fn server_id_is_assigned_only_once() {
        let mut s = store();
        s.insert_local(local("L1", "hello", 100));
        s.reconcile("L1", Ok(stored("S1", Some("L1"), "me", 100)));
        s.reconcile("L1", Ok(stored("S9", Some("L1"), "me", 100)));
        assert_eq!(s.get("L1").unwrap().server_id.as_deref(), Some("S1"));
    }

    #[test]
    fn redelivered_echo_is_suppressed() {
        let mut s = store();
        s.insert_local(local("L1", "hello", 100));
        s.reconcile("L1", Ok(stored("S1", Some("L1"), "me", 100)));

        for _ in 0..3 {
            assert_eq!(
                s.on_remote_insert(stored("S1", None, "me", 100), Some("me")),
                Some(RemoteInsert::Duplicate)
            );
        }
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn echo_before_ack_reconciles_by_local_id() {
        let mut s = store();
        s.insert_local(local("L1", "hello", 100));
        assert_eq!(
            s.on_remote_insert(stored("S1", Some("L1"), "me", 100), Some("me")),
            Some(RemoteInsert::Reconciled)
        );
        // The acknowledgment lands afterwards and must not duplicate anything.
        s.reconcile("L1", Ok(stored("S1", Some("L1"), "me", 100)));
        assert_eq!(s.len(), 1);
        assert_eq!(s.get("L1").unwrap().delivery, MessageDeliveryState::Sent);
    }

    #[test]
    fn anonymous_echo_before_ack_is_collapsed_on_ack() {
        let mut s = store();
        s.insert_local(local("L1", "hello", 100));
        assert_eq!(
            s.on_remote_insert(stored("S1", None, "me", 100), Some("me")),
            Some(RemoteInsert::Appended)
        );
        assert_eq!(s.len(), 2);
        s.reconcile("L1", Ok(stored("S1", Some("L1"), "me", 100)));
        assert_eq!(order(&s), vec!["L1"]);
    }

    #[test]
    fn interleaved_inserts_stay_sorted_with_stable_ties() {
        let mut s = store();
        s.insert_local(local("L1", "a", 200));
        s.on_remote_insert(stored("S1", None, "bob", 100), Some("me"));
        s.on_remote_insert(stored("S2", None, "eve", 200), Some("me"));
        s.insert_local(local("L2", "b", 150));
        s.on_remote_insert(stored("S3", None, "bob", 300), Some("me"));
        s.reconcile("L1", Ok(stored("S4", Some("L1"), "me", 200)));

        let times: Vec<i64> = s.messages().iter().map(|m| m.created_at).collect();
        assert!(times.windows(2).all(|w| w[0] <= w[1]), "{times:?}");
        assert_eq!(
            order(&s),
            vec!["remote-S1", "L2", "L1", "remote-S2", "remote-S3"]
        );
    }

    #[test]
    fn ack_with_server_timestamp_resorts_entry() {
        let mut s = store();
        s.insert_local(local("L1", "a", 100));
        s.on_remote_insert(stored("S1", None, "bob", 150), Some("me"));
        s.reconcile("L1", Ok(stored("S2", Some("L1"), "me", 200)));
        assert_eq!(order(&s), vec!["remote-S1", "L1"]);
    }

    #[test]
    fn failure_keeps_message_visible() {
        let mut s = store();
        s.insert_local(local("L1", "hello", 100));
        assert!(s.reconcile("L1", Err("rejected".to_string())));
        let m = s.get("L1").unwrap();
        assert_eq!(
            m.delivery,
            MessageDeliveryState::Failed {
                reason: "rejected".to_string()
            }
        );
    }

    #[test]
    fn sent_messages_do_not_change_delivery_state() {
        let mut s = store();
        s.insert_local(local("L1", "hello", 100));
        s.reconcile("L1", Ok(stored("S1", Some("L1"), "me", 100)));
        assert!(!s.set_delivery("L1", MessageDeliveryState::QueuedOffline));
        assert!(!s.reconcile("L1", Err("late failure".to_string())));
        assert_eq!(s.get("L1").unwrap().delivery, MessageDeliveryState::Sent);
    }

    #[test]
    fn inserts_for_other_conversations_are_ignored() {
        let mut s = store();
        let mut other = stored("S1", None, "bob", 100);
        other.conversation_id = "conv-2".to_string();
        assert_eq!(s.on_remote_insert(other, Some("me")), None);
        let mut msg = local("L1", "x", 1);
        msg.conversation_id = "conv-2".to_string();
        assert!(!s.insert_local(msg));
        assert_eq!(s.len(), 0);
    }

    #[test]
    fn history_merge_keeps_optimistic_entries() {
        let mut s = store();
        s.insert_local(local("L9", "pending", 500));
        let appended = s.merge_history(
            vec![
                stored("S1", None, "bob", 100),
                stored("S2", None, "me", 200),
                stored("S1", None, "bob", 100),
            ],
            Some("me"),
        );
        assert_eq!(appended, 2);
        assert_eq!(order(&s), vec!["remote-S1", "remote-S2", "L9"]);
        assert!(s.get("remote-S2").unwrap().is_mine);
        assert!(!s.get("remote-S1").unwrap().is_mine);
    }
}
