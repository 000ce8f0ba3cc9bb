use std::sync::Arc;

use quad_storage_traits::{ChatBackend, Conversation, ConversationKind};

use super::AppCore;
use crate::error::QuadError;
use crate::state::{default_conversation_name, ConversationSummary, Identity};
use crate::updates::{CoreMsg, InternalEvent};

/// Conversations visible to a user. The list degrades to empty on backend
/// failure; `error` says why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationListing {
    pub conversations: Vec<Conversation>,
    pub error: Option<QuadError>,
}

/// Lists and creates conversations. Usable directly from async code without
/// going through the app actor.
#[derive(Clone)]
pub struct ConversationDirectory {
    backend: Arc<dyn ChatBackend>,
}

impl ConversationDirectory {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        Self { backend }
    }

    /// Most recent activity first, falling back to creation time.
    pub async fn list_conversations(
        &self,
        user_id: Option<&str>,
    ) -> Result<ConversationListing, QuadError> {
        let user_id = user_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or(QuadError::NotAuthenticated)?;

        match self.backend.list_conversations(user_id).await {
            Ok(mut conversations) => {
                sort_by_recency(&mut conversations);
                Ok(ConversationListing {
                    conversations,
                    error: None,
                })
            }
            Err(e) => {
                tracing::warn!(%e, user_id, "list_conversations failed");
                Ok(ConversationListing {
                    conversations: vec![],
                    error: Some(e.into()),
                })
            }
        }
    }

    /// Create a conversation and register the creator as its first member.
    /// A blank `name` is replaced by one derived from the creator.
    pub async fn create_conversation(
        &self,
        creator: Option<&Identity>,
        name: Option<&str>,
        kind: ConversationKind,
    ) -> Result<Conversation, QuadError> {
        let creator = creator
            .filter(|c| !c.user_id.trim().is_empty())
            .ok_or(QuadError::NotAuthenticated)?;
        let name = match name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(n) => n.to_string(),
            None => default_conversation_name(creator),
        };

        let conversation = self
            .backend
            .create_conversation(&creator.user_id, &name, kind)
            .await?;
        self.backend
            .add_member(&conversation.id, &creator.user_id)
            .await?;
        tracing::info!(conversation_id = %conversation.id, %kind, "conversation_created");
        Ok(conversation)
    }
}

fn activity_key(c: &Conversation) -> i64 {
    c.last_activity_at.unwrap_or(c.created_at)
}

pub(crate) fn sort_by_recency(conversations: &mut [Conversation]) {
    conversations.sort_by(|a, b| {
        activity_key(b)
            .cmp(&activity_key(a))
            .then_with(|| b.created_at.cmp(&a.created_at))
    });
}

fn summary_key(s: &ConversationSummary) -> (i64, i64) {
    (s.last_activity_at.unwrap_or(s.created_at), s.created_at)
}

impl From<Conversation> for ConversationSummary {
    fn from(c: Conversation) -> Self {
        Self {
            conversation_id: c.id,
            display_name: c.display_name,
            kind: c.kind,
            created_at: c.created_at,
            last_activity_at: c.last_activity_at,
        }
    }
}

impl AppCore {
    pub(super) fn refresh_conversations(&mut self) {
        let Some(identity) = self.identity.clone() else {
            self.state.conversations.clear();
            self.state.directory_error = Some(QuadError::NotAuthenticated.to_string());
            self.emit_state();
            return;
        };

        self.conversations_token = self.conversations_token.wrapping_add(1);
        let token = self.conversations_token;
        self.set_busy(|b| b.loading_conversations = true);

        let directory = self.directory.clone();
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            let result = directory.list_conversations(Some(&identity.user_id)).await;
            let _ = tx.send(CoreMsg::Internal(Box::new(
                InternalEvent::ConversationsLoaded { token, result },
            )));
        });
    }

    pub(super) fn handle_conversations_loaded(
        &mut self,
        token: u64,
        result: Result<ConversationListing, QuadError>,
    ) {
        // Ignore stale results (e.g. sign-out while loading).
        if token != self.conversations_token {
            return;
        }
        self.set_busy(|b| b.loading_conversations = false);
        match result {
            Ok(listing) => {
                self.state.conversations = listing
                    .conversations
                    .into_iter()
                    .map(ConversationSummary::from)
                    .collect();
                self.state.directory_error = listing.error.map(|e| e.to_string());
            }
            Err(e) => {
                self.state.conversations.clear();
                self.state.directory_error = Some(e.to_string());
            }
        }
        self.emit_state();
    }

    pub(super) fn create_conversation(&mut self, name: Option<String>, kind: ConversationKind) {
        let Some(identity) = self.identity.clone() else {
            self.toast(QuadError::NotAuthenticated.to_string());
            return;
        };
        self.set_busy(|b| b.creating_conversation = true);

        let directory = self.directory.clone();
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            let result = directory
                .create_conversation(Some(&identity), name.as_deref(), kind)
                .await;
            let _ = tx.send(CoreMsg::Internal(Box::new(
                InternalEvent::ConversationCreated { result },
            )));
        });
    }

    pub(super) fn handle_conversation_created(&mut self, result: Result<Conversation, QuadError>) {
        self.set_busy(|b| b.creating_conversation = false);
        if self.identity.is_none() {
            return;
        }
        match result {
            Ok(conversation) => {
                let conversation_id = conversation.id.clone();
                self.upsert_summary(ConversationSummary::from(conversation));
                self.emit_state();
                // Creating a conversation lands you in it.
                self.select_conversation(conversation_id);
            }
            Err(e) => self.toast(format!("Create conversation failed: {e}")),
        }
    }

    pub(super) fn upsert_summary(&mut self, summary: ConversationSummary) {
        let list = &mut self.state.conversations;
        list.retain(|s| s.conversation_id != summary.conversation_id);
        list.push(summary);
        list.sort_by(|a, b| summary_key(b).cmp(&summary_key(a)));
    }

    /// Move a conversation up the list after a message lands in it.
    pub(super) fn touch_conversation(&mut self, conversation_id: &str, at: i64) {
        let Some(existing) = self
            .state
            .conversations
            .iter()
            .find(|s| s.conversation_id == conversation_id)
            .cloned()
        else {
            return;
        };
        if existing.last_activity_at.is_some_and(|prev| prev >= at) {
            return;
        }
        self.upsert_summary(ConversationSummary {
            last_activity_at: Some(at),
            ..existing
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quad_memory_storage::MemoryBackend;

    fn ada() -> Identity {
        Identity {
            user_id: "ada".to_string(),
            display_name: "Ada".to_string(),
        }
    }

    fn conversation(id: &str, created_at: i64, last_activity_at: Option<i64>) -> Conversation {
        Conversation {
            id: id.to_string(),
            display_name: id.to_string(),
            kind: ConversationKind::Group,
            created_at,
            last_activity_at,
        }
    }

    #[test]
    fn recency_prefers_activity_then_creation() {
        let mut list = vec![
            conversation("old-busy", 10, Some(500)),
            conversation("new-quiet", 300, None),
            conversation("mid", 200, Some(250)),
        ];
        sort_by_recency(&mut list);
        let ids: Vec<&str> = list.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["old-busy", "new-quiet", "mid"]);
    }

    #[tokio::test]
    async fn listing_requires_a_user() {
        let directory = ConversationDirectory::new(Arc::new(MemoryBackend::new()));
        assert_eq!(
            directory.list_conversations(None).await,
            Err(QuadError::NotAuthenticated)
        );
        assert_eq!(
            directory.list_conversations(Some("  ")).await,
            Err(QuadError::NotAuthenticated)
        );
    }

    #[tokio::test]
    async fn blank_name_uses_creator_default_and_adds_member() {
        let backend = MemoryBackend::new();
        let directory = ConversationDirectory::new(Arc::new(backend.clone()));
        let created = directory
            .create_conversation(Some(&ada()), Some("   "), ConversationKind::Direct)
            .await
            .unwrap();
        assert_eq!(created.display_name, "Ada's chat");
        assert_eq!(created.kind, ConversationKind::Direct);
        assert_eq!(
            backend.members(&created.id).into_iter().collect::<Vec<_>>(),
            vec!["ada".to_string()]
        );

        let listing = directory.list_conversations(Some("ada")).await.unwrap();
        assert_eq!(listing.error, None);
        assert_eq!(listing.conversations, vec![created]);
    }

    #[tokio::test]
    async fn unreachable_backend_degrades_to_empty_listing() {
        let backend = MemoryBackend::new();
        let directory = ConversationDirectory::new(Arc::new(backend.clone()));
        directory
            .create_conversation(Some(&ada()), Some("Study group"), ConversationKind::Group)
            .await
            .unwrap();

        backend.set_reachable(false);
        let listing = directory.list_conversations(Some("ada")).await.unwrap();
        assert!(listing.conversations.is_empty());
        assert!(matches!(listing.error, Some(QuadError::Persistence(_))));
    }

    #[tokio::test]
    async fn create_requires_identity() {
        let directory = ConversationDirectory::new(Arc::new(MemoryBackend::new()));
        let err = directory
            .create_conversation(None, Some("x"), ConversationKind::Group)
            .await
            .unwrap_err();
        assert_eq!(err, QuadError::NotAuthenticated);
    }
}
