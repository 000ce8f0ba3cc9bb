pub use quad_storage_traits::ConversationKind;

/// The signed-in user, as supplied by the host's identity provider.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct Identity {
    pub user_id: String,
    pub display_name: String,
}

#[derive(Clone, Debug, serde::Serialize)]
pub struct AppState {
    pub rev: u64,
    pub auth: AuthState,
    pub busy: BusyState,
    pub connectivity: Connectivity,
    pub conversations: Vec<ConversationSummary>,
    /// Last directory failure. The list above degrades to empty instead of erroring.
    pub directory_error: Option<String>,
    pub current: Option<ConversationViewState>,
    pub offline_queue_len: u32,
    pub toast: Option<String>,
}

impl AppState {
    pub fn empty() -> Self {
        Self {
            rev: 0,
            auth: AuthState::SignedOut,
            busy: BusyState::idle(),
            connectivity: Connectivity::Online,
            conversations: vec![],
            directory_error: None,
            current: None,
            offline_queue_len: 0,
            toast: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub enum AuthState {
    SignedOut,
    SignedIn {
        user_id: String,
        display_name: String,
    },
}

/// "In flight" flags for async operations the UI should reflect.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct BusyState {
    pub loading_conversations: bool,
    pub creating_conversation: bool,
    pub loading_history: bool,
    pub flushing_offline_queue: bool,
}

impl BusyState {
    pub fn idle() -> Self {
        Self {
            loading_conversations: false,
            creating_conversation: false,
            loading_history: false,
            flushing_offline_queue: false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub enum Connectivity {
    Online,
    Offline,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct ConversationSummary {
    pub conversation_id: String,
    pub display_name: String,
    pub kind: ConversationKind,
    pub created_at: i64,
    pub last_activity_at: Option<i64>,
}

/// Lifecycle of the realtime channel bound to the open conversation.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub enum ChannelStatus {
    Idle,
    Connecting { attempt: u32 },
    Subscribed,
    Closing,
    /// Reconnect attempts exhausted. Re-selecting the conversation starts over.
    Unavailable { attempts: u32 },
}

#[derive(Clone, Debug, serde::Serialize)]
pub struct ConversationViewState {
    pub conversation_id: String,
    pub display_name: String,
    pub kind: ConversationKind,
    pub messages: Vec<ChatMessage>,
    pub presence_count: u32,
    pub typing_users: Vec<TypingMember>,
    pub channel: ChannelStatus,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct TypingMember {
    pub user_id: String,
    pub display_name: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct ChatMessage {
    pub local_id: String,
    pub server_id: Option<String>,
    pub conversation_id: String,
    pub sender_id: String,
    pub sender_display_name: String,
    pub content: String,
    pub created_at: i64,
    pub is_mine: bool,
    pub delivery: MessageDeliveryState,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub enum MessageDeliveryState {
    Pending,
    Sent,
    Failed { reason: String },
    QueuedOffline,
}

impl MessageDeliveryState {
    /// Whether the UI should offer a retry action.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

pub fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Name given to a conversation created without one.
pub fn default_conversation_name(creator: &Identity) -> String {
    let name = creator.display_name.trim();
    if name.is_empty() {
        format!("{}'s chat", creator.user_id)
    } else {
        format!("{name}'s chat")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_failed_messages_are_retryable() {
        assert!(MessageDeliveryState::Failed {
            reason: "rejected".to_string(),
        }
        .is_retryable());
        assert!(!MessageDeliveryState::Pending.is_retryable());
        assert!(!MessageDeliveryState::Sent.is_retryable());
        assert!(!MessageDeliveryState::QueuedOffline.is_retryable());
    }

    #[test]
    fn snapshot_serializes_for_hosts() {
        let mut state = AppState::empty();
        state.current = Some(ConversationViewState {
            conversation_id: "conv-1".to_string(),
            display_name: "Study group".to_string(),
            kind: ConversationKind::Group,
            messages: vec![ChatMessage {
                local_id: "L1".to_string(),
                server_id: None,
                conversation_id: "conv-1".to_string(),
                sender_id: "ada".to_string(),
                sender_display_name: "Ada".to_string(),
                content: "hi".to_string(),
                created_at: 1,
                is_mine: true,
                delivery: MessageDeliveryState::Failed {
                    reason: "rejected".to_string(),
                },
            }],
            presence_count: 2,
            typing_users: vec![],
            channel: ChannelStatus::Connecting { attempt: 1 },
        });

        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["connectivity"], "Online");
        assert_eq!(json["current"]["presence_count"], 2);
        assert_eq!(json["current"]["channel"]["Connecting"]["attempt"], 1);
        assert_eq!(
            json["current"]["messages"][0]["delivery"]["Failed"]["reason"],
            "rejected"
        );
    }

    #[test]
    fn default_name_uses_display_name_then_user_id() {
        let ada = Identity {
            user_id: "u1".to_string(),
            display_name: "Ada".to_string(),
        };
        assert_eq!(default_conversation_name(&ada), "Ada's chat");

        let nameless = Identity {
            user_id: "u2".to_string(),
            display_name: "  ".to_string(),
        };
        assert_eq!(default_conversation_name(&nameless), "u2's chat");
    }
}
