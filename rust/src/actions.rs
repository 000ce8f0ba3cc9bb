use crate::state::ConversationKind;

#[derive(Debug, Clone)]
pub enum AppAction {
    // Identity
    SignIn {
        user_id: String,
        display_name: String,
    },
    SignOut,

    // Directory
    RefreshConversations,
    CreateConversation {
        name: Option<String>,
        kind: ConversationKind,
    },

    // Conversation
    SelectConversation {
        conversation_id: String,
    },
    CloseConversation,
    SendMessage {
        content: String,
    },
    RetryMessage {
        local_id: String,
    },
    TypingStarted,

    // UI
    ClearToast,

    // Lifecycle
    NetworkChanged {
        online: bool,
    },
}

impl AppAction {
    /// Log-safe action tag (never includes message content).
    pub fn tag(&self) -> &'static str {
        match self {
            // Identity
            AppAction::SignIn { .. } => "SignIn",
            AppAction::SignOut => "SignOut",

            // Directory
            AppAction::RefreshConversations => "RefreshConversations",
            AppAction::CreateConversation { .. } => "CreateConversation",

            // Conversation
            AppAction::SelectConversation { .. } => "SelectConversation",
            AppAction::CloseConversation => "CloseConversation",
            AppAction::SendMessage { .. } => "SendMessage",
            AppAction::RetryMessage { .. } => "RetryMessage",
            AppAction::TypingStarted => "TypingStarted",

            // UI
            AppAction::ClearToast => "ClearToast",

            // Lifecycle
            AppAction::NetworkChanged { .. } => "NetworkChanged",
        }
    }
}
