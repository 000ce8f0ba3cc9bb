//! Realtime publish/subscribe channel keyed by conversation id

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::types::StoredMessage;

/// Identifier of one subscription, unique per transport instance
pub type SubscriptionId = u64;

/// Error returned by [`RealtimeTransport`] operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The transport could not establish or use the connection
    #[error("Transport unavailable: {0}")]
    Unavailable(String),
    /// The subscription id is unknown or already closed
    #[error("Unknown subscription: {0}")]
    UnknownSubscription(SubscriptionId),
}

/// Events delivered on a subscription, in channel order.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A message row was inserted into the conversation
    Insert(StoredMessage),
    /// Full presence snapshot: every tracked key currently connected
    PresenceSync {
        /// Opaque session keys
        member_refs: Vec<String>,
    },
    /// A key started being tracked
    PresenceJoin {
        /// Opaque session key
        key: String,
    },
    /// A key stopped being tracked
    PresenceLeave {
        /// Opaque session key
        key: String,
    },
    /// Ad hoc payload sent by another subscriber
    Broadcast {
        /// Application-level event name
        event: String,
        /// Small JSON payload
        payload: serde_json::Value,
    },
    /// The transport closed the subscription; no further events follow
    Closed {
        /// Human readable cause
        reason: String,
    },
}

/// An open subscription. Dropping the receiver does not unsubscribe; call
/// [`RealtimeTransport::unsubscribe`].
#[derive(Debug)]
pub struct Subscription {
    /// Subscription handle
    pub id: SubscriptionId,
    /// Bounded inbound event stream
    pub events: mpsc::Receiver<TransportEvent>,
}

/// Publish/subscribe transport.
#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    /// Open a subscription on `conversation_id`
    async fn subscribe(&self, conversation_id: &str) -> Result<Subscription, TransportError>;

    /// Close a subscription and release its presence key, if tracked
    async fn unsubscribe(
        &self,
        conversation_id: &str,
        subscription: SubscriptionId,
    ) -> Result<(), TransportError>;

    /// Join the presence set of `conversation_id` under `key`
    async fn track_presence(
        &self,
        conversation_id: &str,
        subscription: SubscriptionId,
        key: &str,
    ) -> Result<(), TransportError>;

    /// Leave the presence set of `conversation_id`
    async fn untrack_presence(
        &self,
        conversation_id: &str,
        subscription: SubscriptionId,
    ) -> Result<(), TransportError>;

    /// Send a payload to every other subscriber of `conversation_id`
    async fn broadcast(
        &self,
        conversation_id: &str,
        subscription: SubscriptionId,
        event: &str,
        payload: serde_json::Value,
    ) -> Result<(), TransportError>;
}
