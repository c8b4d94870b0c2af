//! Push notification channel abstraction and its in-process implementation.

use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use futures::{
    FutureExt, StreamExt,
    future::{self, BoxFuture},
    stream::BoxStream,
};
use thiserror::Error;
use tokio::sync::{broadcast, oneshot};
use tokio_stream::wrappers::{BroadcastStream, errors::BroadcastStreamRecvError};
use tracing::debug;
use uuid::Uuid;

use crate::dto::sse::{ChangeEvent, ChangeKind, Topic};

pub type SubscriptionId = Uuid;

/// Live subscription to one topic. Dropping `events` does not unsubscribe.
pub struct Subscription {
    pub id: SubscriptionId,
    pub topic: Topic,
    pub events: BoxStream<'static, ChangeEvent>,
}

#[derive(Debug, Error)]
pub enum PushError {
    #[error("push channel unavailable: {0}")]
    Unavailable(String),
    #[error("failed to connect to push endpoint {url}")]
    Connect {
        url: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("push endpoint {url} answered {status}")]
    Status { url: String, status: u16 },
}

/// Channel that notifies subscribers when records of a topic change.
pub trait PushChannel: Send + Sync {
    fn subscribe(&self, topic: Topic) -> BoxFuture<'_, Result<Subscription, PushError>>;
    fn unsubscribe(&self, id: SubscriptionId) -> BoxFuture<'_, ()>;
}

/// Broadcast hub fed by in-process writers (the memory store change feed or the relay).
pub struct LocalPushChannel {
    sender: broadcast::Sender<ChangeEvent>,
    subscriptions: DashMap<SubscriptionId, oneshot::Sender<()>>,
    available: AtomicBool,
}

impl LocalPushChannel {
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self {
            sender,
            subscriptions: DashMap::new(),
            available: AtomicBool::new(true),
        }
    }

    /// Sender that publishes into this channel, e.g. for [`MemoryRecordStore::with_observer`].
    ///
    /// [`MemoryRecordStore::with_observer`]: crate::dao::record_store::memory::MemoryRecordStore::with_observer
    pub fn sender(&self) -> broadcast::Sender<ChangeEvent> {
        self.sender.clone()
    }

    pub fn publish(&self, event: ChangeEvent) {
        let _ = self.sender.send(event);
    }

    /// Refuse new subscriptions while `false`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Release);
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// End every live subscription stream and refuse new ones.
    pub fn close(&self) {
        self.set_available(false);
        let ids: Vec<SubscriptionId> = self.subscriptions.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, cancel)) = self.subscriptions.remove(&id) {
                let _ = cancel.send(());
            }
        }
        debug!("push channel closed");
    }
}

impl PushChannel for LocalPushChannel {
    fn subscribe(&self, topic: Topic) -> BoxFuture<'_, Result<Subscription, PushError>> {
        async move {
            tokio::task::yield_now().await;
            if !self.available.load(Ordering::Acquire) {
                return Err(PushError::Unavailable(format!(
                    "cannot subscribe to {}",
                    topic.event_name()
                )));
            }

            let id = Uuid::new_v4();
            let (cancel_tx, cancel_rx) = oneshot::channel();
            self.subscriptions.insert(id, cancel_tx);

            let events = BroadcastStream::new(self.sender.subscribe())
                .filter_map(move |item| {
                    future::ready(match item {
                        Ok(event) if event.topic == topic => Some(event),
                        Ok(_) => None,
                        // Missed events: ask for a full resync.
                        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                            debug!(skipped, topic = topic.event_name(), "push subscriber lagged");
                            Some(ChangeEvent {
                                topic,
                                kind: ChangeKind::Update,
                                session_id: None,
                            })
                        }
                    })
                })
                .take_until(cancel_rx)
                .boxed();

            Ok(Subscription { id, topic, events })
        }
        .boxed()
    }

    fn unsubscribe(&self, id: SubscriptionId) -> BoxFuture<'_, ()> {
        async move {
            tokio::task::yield_now().await;
            if let Some((_, cancel)) = self.subscriptions.remove(&id) {
                let _ = cancel.send(());
            }
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(topic: Topic) -> ChangeEvent {
        ChangeEvent {
            topic,
            kind: ChangeKind::Insert,
            session_id: Some("alice".into()),
        }
    }

    #[tokio::test]
    async fn subscribers_only_see_their_topic() {
        let channel = LocalPushChannel::new(8);
        let mut readiness = channel.subscribe(Topic::Readiness).await.unwrap();

        channel.publish(event(Topic::Presence));
        channel.publish(event(Topic::Readiness));

        let received = readiness.events.next().await.unwrap();
        assert_eq!(received.topic, Topic::Readiness);
    }

    #[tokio::test]
    async fn unsubscribe_ends_the_stream() {
        let channel = LocalPushChannel::new(8);
        let mut presence = channel.subscribe(Topic::Presence).await.unwrap();
        assert_eq!(channel.subscription_count(), 1);

        channel.unsubscribe(presence.id).await;
        assert_eq!(channel.subscription_count(), 0);
        assert!(presence.events.next().await.is_none());
    }

    #[tokio::test]
    async fn closing_ends_every_subscription() {
        let channel = LocalPushChannel::new(8);
        let mut presence = channel.subscribe(Topic::Presence).await.unwrap();
        let mut readiness = channel.subscribe(Topic::Readiness).await.unwrap();

        channel.close();
        assert_eq!(channel.subscription_count(), 0);
        assert!(presence.events.next().await.is_none());
        assert!(readiness.events.next().await.is_none());
        assert!(channel.subscribe(Topic::Presence).await.is_err());
    }

    #[tokio::test]
    async fn unavailable_channel_refuses_subscriptions() {
        let channel = LocalPushChannel::new(8);
        channel.set_available(false);
        assert!(matches!(
            channel.subscribe(Topic::Presence).await,
            Err(PushError::Unavailable(_))
        ));
    }
}
