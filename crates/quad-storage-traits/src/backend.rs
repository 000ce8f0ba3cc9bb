//! Conversation, membership and message persistence

use async_trait::async_trait;

use crate::types::{Conversation, ConversationKind, NewMessage, StoredMessage};

/// Error returned by [`ChatBackend`] operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// The backend could not be reached (no network, timeout, connection reset)
    #[error("Backend unreachable: {0}")]
    Unreachable(String),
    /// The backend was reached and refused the operation
    #[error("Backend rejected request: {0}")]
    Rejected(String),
    /// The referenced record does not exist
    #[error("Not found: {0}")]
    NotFound(String),
}

impl BackendError {
    /// Whether retrying later, once connectivity returns, can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unreachable(_))
    }
}

/// Backing store for conversations, members and messages.
///
/// Writes through [`ChatBackend::insert_message`] must be published to every
/// realtime subscriber of the conversation, including the writer.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Conversations `user_id` is a member of, in no particular order
    async fn list_conversations(&self, user_id: &str) -> Result<Vec<Conversation>, BackendError>;

    /// Create a conversation. Does not add any members.
    async fn create_conversation(
        &self,
        creator_id: &str,
        display_name: &str,
        kind: ConversationKind,
    ) -> Result<Conversation, BackendError>;

    /// Register `user_id` as a member of `conversation_id`
    async fn add_member(&self, conversation_id: &str, user_id: &str) -> Result<(), BackendError>;

    /// Full history of a conversation, ascending by creation time
    async fn load_history(&self, conversation_id: &str)
    -> Result<Vec<StoredMessage>, BackendError>;

    /// Persist a message and assign its server id
    async fn insert_message(&self, message: NewMessage) -> Result<StoredMessage, BackendError>;
}
