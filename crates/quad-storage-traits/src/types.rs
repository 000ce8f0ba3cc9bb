//! Record types exchanged between the messaging core and its collaborators.
//!
//! All timestamps are milliseconds since the Unix epoch.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Whether a conversation is a one-to-one thread or a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
    /// Two participants
    Direct,
    /// Any number of participants
    Group,
}

impl ConversationKind {
    /// Stable string form used in storage columns
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Group => "group",
        }
    }
}

impl fmt::Display for ConversationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ConversationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct" => Ok(Self::Direct),
            "group" => Ok(Self::Group),
            other => Err(format!("unknown conversation kind: {other}")),
        }
    }
}

/// A conversation the current user participates in.
///
/// Identity is immutable once created. Membership is owned by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    /// Backend-assigned identifier
    pub id: String,
    /// Human readable name
    pub display_name: String,
    /// Direct or group
    pub kind: ConversationKind,
    /// Creation time
    pub created_at: i64,
    /// Time of the most recent message, when the backend tracks it
    pub last_activity_at: Option<i64>,
}

/// A message write issued by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    /// Client-generated identifier, echoed back on the stored row
    pub local_id: String,
    /// Target conversation
    pub conversation_id: String,
    /// Author
    pub sender_id: String,
    /// Author display name at send time
    pub sender_display_name: String,
    /// Message body
    pub content: String,
    /// Client-side creation time
    pub created_at: i64,
}

/// A message as persisted by the backend and delivered on `insert` events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Backend-assigned identifier
    pub server_id: String,
    /// Client identifier of the write that produced this row, if any
    pub local_id: Option<String>,
    /// Owning conversation
    pub conversation_id: String,
    /// Author
    pub sender_id: String,
    /// Author display name
    pub sender_display_name: String,
    /// Message body
    pub content: String,
    /// Creation time
    pub created_at: i64,
}

/// A message composed while offline, held until the next flush.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedMessage {
    /// Client-generated identifier; also the queue key
    pub local_id: String,
    /// Target conversation
    pub conversation_id: String,
    /// Message body
    pub content: String,
    /// Author
    pub sender_id: String,
    /// Author display name at compose time
    pub sender_display_name: String,
    /// Client-side creation time
    pub created_at: i64,
}

impl QueuedMessage {
    /// The backend write this queued item turns into when flushed.
    pub fn to_new_message(&self) -> NewMessage {
        NewMessage {
            local_id: self.local_id.clone(),
            conversation_id: self.conversation_id.clone(),
            sender_id: self.sender_id.clone(),
            sender_display_name: self.sender_display_name.clone(),
            content: self.content.clone(),
            created_at: self.created_at,
        }
    }
}

impl From<NewMessage> for QueuedMessage {
    fn from(m: NewMessage) -> Self {
        Self {
            local_id: m.local_id,
            conversation_id: m.conversation_id,
            content: m.content,
            sender_id: m.sender_id,
            sender_display_name: m.sender_display_name,
            created_at: m.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_kind_round_trips_through_str() {
        for kind in [ConversationKind::Direct, ConversationKind::Group] {
            assert_eq!(kind.as_str().parse::<ConversationKind>().unwrap(), kind);
        }
        assert!("channel".parse::<ConversationKind>().is_err());
    }

    #[test]
    fn queued_message_keeps_local_id_when_flushed() {
        let queued = QueuedMessage {
            local_id: "local-1".to_string(),
            conversation_id: "c1".to_string(),
            content: "bye".to_string(),
            sender_id: "u1".to_string(),
            sender_display_name: "Ada".to_string(),
            created_at: 42,
        };
        let write = queued.to_new_message();
        assert_eq!(write.local_id, "local-1");
        assert_eq!(write.created_at, 42);
        assert_eq!(QueuedMessage::from(write), queued);
    }

    #[test]
    fn conversation_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ConversationKind::Group).unwrap();
        assert_eq!(json, "\"group\"");
    }
}
