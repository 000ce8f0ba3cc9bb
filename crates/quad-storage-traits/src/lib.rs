//! Quad storage - collaborator traits and record types for the Quad messaging core.
//!
//! The messaging core never talks to a database or a socket directly. It is handed
//! three collaborators, each behind a trait defined here:
//!
//! - [`ChatBackend`]: conversation, membership and message persistence
//! - [`RealtimeTransport`]: publish/subscribe channel keyed by conversation id
//! - [`OfflineQueueStorage`]: durable local buffer for messages composed offline
//!
//! Implementations live in `quad-memory-storage` (in-process, used by tests) and
//! `quad-sqlite-storage` (durable offline queue).

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::bare_urls)]

pub mod backend;
pub mod offline;
pub mod transport;
pub mod types;

pub use self::backend::{BackendError, ChatBackend};
pub use self::offline::{OfflineQueueError, OfflineQueueStorage};
pub use self::transport::{
    RealtimeTransport, Subscription, SubscriptionId, TransportError, TransportEvent,
};
pub use self::types::{
    Conversation, ConversationKind, NewMessage, QueuedMessage, StoredMessage,
};
