use quad_storage_traits::{
    BackendError, Conversation, NewMessage, QueuedMessage, StoredMessage, SubscriptionId,
    TransportError, TransportEvent,
};

use crate::core::ConversationListing;
use crate::error::QuadError;
use crate::state::AppState;
use crate::AppAction;

#[derive(Clone, Debug)]
pub enum AppUpdate {
    FullState(AppState),
}

impl AppUpdate {
    pub fn rev(&self) -> u64 {
        match self {
            AppUpdate::FullState(s) => s.rev,
        }
    }
}

#[derive(Debug)]
pub enum CoreMsg {
    Action(AppAction),
    Internal(Box<InternalEvent>),
    Shutdown,
}

#[derive(Debug)]
pub enum InternalEvent {
    // Directory results
    ConversationsLoaded {
        token: u64,
        result: Result<ConversationListing, QuadError>,
    },
    ConversationCreated {
        result: Result<Conversation, QuadError>,
    },
    HistoryLoaded {
        token: u64,
        conversation_id: String,
        result: Result<Vec<StoredMessage>, BackendError>,
    },

    // Send path
    SendResult {
        message: NewMessage,
        result: Result<StoredMessage, BackendError>,
    },
    FlushItemResult {
        item: QueuedMessage,
        result: Result<StoredMessage, BackendError>,
    },
    FlushFinished,

    // Channel lifecycle. Every event carries the token of the channel that
    // produced it; tokens of torn-down channels never match again.
    ChannelSubscribed {
        token: u64,
        conversation_id: String,
        subscription: SubscriptionId,
    },
    ChannelEvent {
        token: u64,
        event: TransportEvent,
    },
    ChannelFailed {
        token: u64,
        error: TransportError,
    },
    ChannelDropped {
        token: u64,
        reason: String,
    },
    ChannelRetry {
        token: u64,
    },
    TypingSweep {
        token: u64,
    },

    Toast(String),
}
