//! Memory-based collaborators for the Quad messaging core.
//!
//! [`MemoryBackend`] plays both the persistence backend and the realtime hub:
//! every message inserted through [`ChatBackend`](quad_storage_traits::ChatBackend)
//! is published as an `Insert` event to all subscribers of the conversation,
//! including the writer, and presence snapshots are recomputed whenever a key is
//! tracked or released. Clones share the same state, so two app instances
//! handed clones of one backend can talk to each other.
//!
//! Nothing here is persistent. The backend also exposes fault-injection knobs
//! (unreachable network, failing subscribes, rejected inserts, insert latency)
//! so tests can drive the core's partial-failure paths.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::bare_urls)]

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use quad_storage_traits::{Conversation, StoredMessage, SubscriptionId, TransportEvent};
use tokio::sync::mpsc;

mod backend;
mod offline;
mod transport;

pub use self::offline::MemoryOfflineQueue;

/// Default capacity of each subscription's event buffer
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug)]
struct Subscriber {
    tx: mpsc::Sender<TransportEvent>,
    presence_key: Option<String>,
}

#[derive(Debug, Default)]
struct Faults {
    unreachable: bool,
    failing_subscribes: u32,
    rejected_inserts: u32,
    dropped_inserts: u32,
    insert_latency: Duration,
}

#[derive(Debug, Default)]
struct Inner {
    conversations: HashMap<String, Conversation>,
    members: HashMap<String, BTreeSet<String>>,
    messages: HashMap<String, Vec<StoredMessage>>,
    subscribers: HashMap<String, BTreeMap<SubscriptionId, Subscriber>>,
    next_conversation: u64,
    next_message: u64,
    next_subscription: SubscriptionId,
    faults: Faults,
}

/// In-process backend and realtime hub.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    inner: Arc<RwLock<Inner>>,
    channel_capacity: usize,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Create an empty backend
    pub fn new() -> Self {
        Self::with_channel_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create an empty backend whose subscriptions buffer at most `capacity` events
    pub fn with_channel_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
            channel_capacity: capacity.max(1),
        }
    }

    /// Simulate losing or regaining the network.
    ///
    /// Going unreachable closes every open subscription with a `Closed` event;
    /// while unreachable every backend and transport call fails.
    pub fn set_reachable(&self, reachable: bool) {
        let dropped = {
            let mut inner = self.inner.write();
            inner.faults.unreachable = !reachable;
            if reachable {
                Vec::new()
            } else {
                drain_all_subscribers(&mut inner)
            }
        };
        for tx in dropped {
            let _ = tx.try_send(TransportEvent::Closed {
                reason: "network unreachable".to_string(),
            });
        }
    }

    /// Whether the backend currently accepts calls
    pub fn is_reachable(&self) -> bool {
        !self.inner.read().faults.unreachable
    }

    /// Make the next `n` subscribe calls fail
    pub fn fail_next_subscribes(&self, n: u32) {
        self.inner.write().faults.failing_subscribes = n;
    }

    /// Make the next `n` message inserts fail with `Rejected`
    pub fn reject_next_inserts(&self, n: u32) {
        self.inner.write().faults.rejected_inserts = n;
    }

    /// Make the next `n` message inserts fail with `Unreachable` without
    /// closing any subscription
    pub fn drop_next_inserts(&self, n: u32) {
        self.inner.write().faults.dropped_inserts = n;
    }

    /// Delay every message insert by `latency` before it is acknowledged
    pub fn set_insert_latency(&self, latency: Duration) {
        self.inner.write().faults.insert_latency = latency;
    }

    /// Close every open subscription with `reason`, leaving the backend reachable
    pub fn disconnect_all(&self, reason: &str) {
        let dropped = drain_all_subscribers(&mut self.inner.write());
        for tx in dropped {
            let _ = tx.try_send(TransportEvent::Closed {
                reason: reason.to_string(),
            });
        }
    }

    /// Deliver an arbitrary event to every subscriber of `conversation_id`
    pub async fn inject(&self, conversation_id: &str, event: TransportEvent) {
        for tx in self.senders(conversation_id, None) {
            let _ = tx.send(event.clone()).await;
        }
    }

    /// Number of open subscriptions on `conversation_id`
    pub fn subscriber_count(&self, conversation_id: &str) -> usize {
        self.inner
            .read()
            .subscribers
            .get(conversation_id)
            .map(|s| s.len())
            .unwrap_or(0)
    }

    /// Members registered on `conversation_id`
    pub fn members(&self, conversation_id: &str) -> BTreeSet<String> {
        self.inner
            .read()
            .members
            .get(conversation_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Every message stored on `conversation_id`, in insertion order
    pub fn stored_messages(&self, conversation_id: &str) -> Vec<StoredMessage> {
        self.inner
            .read()
            .messages
            .get(conversation_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Senders for every subscriber of `conversation_id` except `skip`.
    ///
    /// Collected under the lock and returned so callers can await sends
    /// without holding it.
    fn senders(
        &self,
        conversation_id: &str,
        skip: Option<SubscriptionId>,
    ) -> Vec<mpsc::Sender<TransportEvent>> {
        self.inner
            .read()
            .subscribers
            .get(conversation_id)
            .map(|subs| {
                subs.iter()
                    .filter(|(id, _)| Some(**id) != skip)
                    .map(|(_, s)| s.tx.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn drain_all_subscribers(inner: &mut Inner) -> Vec<mpsc::Sender<TransportEvent>> {
    inner
        .subscribers
        .drain()
        .flat_map(|(_, subs)| subs.into_values().map(|s| s.tx))
        .collect()
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
