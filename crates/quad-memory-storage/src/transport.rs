//! Memory-based implementation of [`RealtimeTransport`]

use std::collections::BTreeSet;

use async_trait::async_trait;
use quad_storage_traits::{
    RealtimeTransport, Subscription, SubscriptionId, TransportError, TransportEvent,
};
use tokio::sync::mpsc;

use crate::{Inner, MemoryBackend, Subscriber};

/// Events to send after a presence change, computed under the lock.
struct PresenceFanout {
    delta: Option<TransportEvent>,
    sync: TransportEvent,
    targets: Vec<mpsc::Sender<TransportEvent>>,
}

fn presence_fanout(
    inner: &Inner,
    conversation_id: &str,
    delta: Option<TransportEvent>,
) -> PresenceFanout {
    let subs = inner.subscribers.get(conversation_id);
    let member_refs: BTreeSet<String> = subs
        .map(|s| s.values().filter_map(|s| s.presence_key.clone()).collect())
        .unwrap_or_default();
    PresenceFanout {
        delta,
        sync: TransportEvent::PresenceSync {
            member_refs: member_refs.into_iter().collect(),
        },
        targets: subs
            .map(|s| s.values().map(|s| s.tx.clone()).collect())
            .unwrap_or_default(),
    }
}

impl PresenceFanout {
    async fn deliver(self) {
        for tx in self.targets {
            if let Some(delta) = &self.delta {
                let _ = tx.send(delta.clone()).await;
            }
            let _ = tx.send(self.sync.clone()).await;
        }
    }
}

impl MemoryBackend {
    fn check_transport(&self) -> Result<(), TransportError> {
        if self.inner.read().faults.unreachable {
            return Err(TransportError::Unavailable("network unreachable".to_string()));
        }
        Ok(())
    }

    /// Remove the presence key of `subscription`, returning the fanout to deliver
    fn release_presence(
        inner: &mut Inner,
        conversation_id: &str,
        subscription: SubscriptionId,
    ) -> Result<Option<PresenceFanout>, TransportError> {
        let sub = inner
            .subscribers
            .get_mut(conversation_id)
            .and_then(|s| s.get_mut(&subscription))
            .ok_or(TransportError::UnknownSubscription(subscription))?;
        let Some(key) = sub.presence_key.take() else {
            return Ok(None);
        };
        Ok(Some(presence_fanout(
            inner,
            conversation_id,
            Some(TransportEvent::PresenceLeave { key }),
        )))
    }
}

#[async_trait]
impl RealtimeTransport for MemoryBackend {
    async fn subscribe(&self, conversation_id: &str) -> Result<Subscription, TransportError> {
        self.check_transport()?;
        let mut inner = self.inner.write();
        if inner.faults.failing_subscribes > 0 {
            inner.faults.failing_subscribes -= 1;
            return Err(TransportError::Unavailable(
                "subscribe refused".to_string(),
            ));
        }
        inner.next_subscription += 1;
        let id = inner.next_subscription;
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        inner
            .subscribers
            .entry(conversation_id.to_string())
            .or_default()
            .insert(
                id,
                Subscriber {
                    tx,
                    presence_key: None,
                },
            );
        tracing::debug!(%conversation_id, subscription = id, "memory transport subscribed");
        Ok(Subscription { id, events: rx })
    }

    async fn unsubscribe(
        &self,
        conversation_id: &str,
        subscription: SubscriptionId,
    ) -> Result<(), TransportError> {
        let fanout = {
            let mut inner = self.inner.write();
            let fanout = Self::release_presence(&mut inner, conversation_id, subscription)?;
            if let Some(subs) = inner.subscribers.get_mut(conversation_id) {
                subs.remove(&subscription);
                if subs.is_empty() {
                    inner.subscribers.remove(conversation_id);
                }
            }
            // Recompute targets now that the subscription is gone.
            fanout.map(|f| presence_fanout(&inner, conversation_id, f.delta))
        };
        if let Some(fanout) = fanout {
            fanout.deliver().await;
        }
        Ok(())
    }

    async fn track_presence(
        &self,
        conversation_id: &str,
        subscription: SubscriptionId,
        key: &str,
    ) -> Result<(), TransportError> {
        self.check_transport()?;
        let fanout = {
            let mut inner = self.inner.write();
            let sub = inner
                .subscribers
                .get_mut(conversation_id)
                .and_then(|s| s.get_mut(&subscription))
                .ok_or(TransportError::UnknownSubscription(subscription))?;
            sub.presence_key = Some(key.to_string());
            presence_fanout(
                &inner,
                conversation_id,
                Some(TransportEvent::PresenceJoin {
                    key: key.to_string(),
                }),
            )
        };
        fanout.deliver().await;
        Ok(())
    }

    async fn untrack_presence(
        &self,
        conversation_id: &str,
        subscription: SubscriptionId,
    ) -> Result<(), TransportError> {
        let fanout = {
            let mut inner = self.inner.write();
            Self::release_presence(&mut inner, conversation_id, subscription)?
        };
        if let Some(fanout) = fanout {
            fanout.deliver().await;
        }
        Ok(())
    }

    async fn broadcast(
        &self,
        conversation_id: &str,
        subscription: SubscriptionId,
        event: &str,
        payload: serde_json::Value,
    ) -> Result<(), TransportError> {
        self.check_transport()?;
        let event = TransportEvent::Broadcast {
            event: event.to_string(),
            payload,
        };
        for tx in self.senders(conversation_id, Some(subscription)) {
            let _ = tx.send(event.clone()).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn next_sync(sub: &mut Subscription) -> Vec<String> {
        loop {
            match sub.events.recv().await {
                Some(TransportEvent::PresenceSync { member_refs }) => return member_refs,
                Some(_) => continue,
                None => panic!("subscription closed"),
            }
        }
    }

    #[tokio::test]
    async fn presence_sync_carries_full_snapshot() {
        let hub = MemoryBackend::new();
        let mut a = hub.subscribe("c1").await.unwrap();
        let mut b = hub.subscribe("c1").await.unwrap();

        hub.track_presence("c1", a.id, "alice").await.unwrap();
        assert_eq!(next_sync(&mut a).await, vec!["alice".to_string()]);
        assert_eq!(next_sync(&mut b).await, vec!["alice".to_string()]);

        hub.track_presence("c1", b.id, "bob").await.unwrap();
        assert_eq!(
            next_sync(&mut a).await,
            vec!["alice".to_string(), "bob".to_string()]
        );

        hub.unsubscribe("c1", b.id).await.unwrap();
        assert_eq!(next_sync(&mut a).await, vec!["alice".to_string()]);
        assert_eq!(hub.subscriber_count("c1"), 1);
    }

    #[tokio::test]
    async fn broadcast_skips_the_sender() {
        let hub = MemoryBackend::new();
        let mut a = hub.subscribe("c1").await.unwrap();
        let mut b = hub.subscribe("c1").await.unwrap();

        hub.broadcast("c1", a.id, "typing", serde_json::json!({"user_id": "alice"}))
            .await
            .unwrap();
        match b.events.recv().await {
            Some(TransportEvent::Broadcast { event, payload }) => {
                assert_eq!(event, "typing");
                assert_eq!(payload["user_id"], "alice");
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(a.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn failing_subscribes_are_counted_down() {
        let hub = MemoryBackend::new();
        hub.fail_next_subscribes(2);
        assert!(hub.subscribe("c1").await.is_err());
        assert!(hub.subscribe("c1").await.is_err());
        assert!(hub.subscribe("c1").await.is_ok());
    }

    #[tokio::test]
    async fn going_unreachable_closes_subscriptions() {
        let hub = MemoryBackend::new();
        let mut a = hub.subscribe("c1").await.unwrap();
        hub.set_reachable(false);
        assert!(matches!(
            a.events.recv().await,
            Some(TransportEvent::Closed { .. })
        ));
        assert_eq!(hub.subscriber_count("c1"), 0);
        assert!(hub.subscribe("c1").await.is_err());
    }

    #[tokio::test]
    async fn unknown_subscription_is_reported() {
        let hub = MemoryBackend::new();
        let err = hub.track_presence("c1", 99, "alice").await.unwrap_err();
        assert_eq!(err, TransportError::UnknownSubscription(99));
    }
}
