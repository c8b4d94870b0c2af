//! Choice between push-driven and poll-driven synchronization.
//!
//! Push is attempted once per session. Any failure during setup selects polling for
//! the rest of the session. A push stream that ends later drops the scheduler to
//! polling as well. There is no switching back to push.

pub mod push;
pub mod scheduler;
#[cfg(feature = "rest-store")]
pub mod sse_client;

use std::{fmt, sync::Arc};

use futures::{
    StreamExt,
    stream::{self, BoxStream},
};
use tracing::{info, warn};

use crate::dto::sse::{ChangeEvent, Topic};

use self::push::{PushChannel, Subscription};

/// Topics every session listens to.
pub const TOPICS: [Topic; 2] = [Topic::Presence, Topic::Readiness];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    Push,
    Poll,
}

/// Selected synchronization strategy, owning the push subscriptions when any.
pub enum SyncStrategy {
    Push {
        channel: Arc<dyn PushChannel>,
        subscriptions: Vec<Subscription>,
    },
    Poll,
}

impl fmt::Debug for SyncStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncStrategy::Push { subscriptions, .. } => f
                .debug_struct("Push")
                .field("subscriptions", &subscriptions.len())
                .finish(),
            SyncStrategy::Poll => f.write_str("Poll"),
        }
    }
}

impl SyncStrategy {
    pub fn kind(&self) -> StrategyKind {
        match self {
            SyncStrategy::Push { .. } => StrategyKind::Push,
            SyncStrategy::Poll => StrategyKind::Poll,
        }
    }

    /// Merge every subscription's events into one stream, leaving the ids for shutdown.
    pub fn take_events(&mut self) -> Option<BoxStream<'static, ChangeEvent>> {
        match self {
            SyncStrategy::Push { subscriptions, .. } => {
                let streams = subscriptions.iter_mut().map(|subscription| {
                    std::mem::replace(&mut subscription.events, stream::empty().boxed())
                });
                Some(stream::select_all(streams).boxed())
            }
            SyncStrategy::Poll => None,
        }
    }

    /// Release push subscriptions.
    pub async fn shutdown(self) {
        if let SyncStrategy::Push {
            channel,
            subscriptions,
        } = self
        {
            for subscription in subscriptions {
                channel.unsubscribe(subscription.id).await;
            }
        }
    }
}

/// Try to subscribe to every topic on `channel`; fall back to polling on any failure.
pub async fn select_strategy(channel: Option<Arc<dyn PushChannel>>) -> SyncStrategy {
    let Some(channel) = channel else {
        info!("no push channel configured; polling");
        return SyncStrategy::Poll;
    };

    let mut subscriptions = Vec::with_capacity(TOPICS.len());
    for topic in TOPICS {
        match channel.subscribe(topic).await {
            Ok(subscription) => subscriptions.push(subscription),
            Err(err) => {
                warn!(topic = topic.event_name(), error = %err, "push setup failed; falling back to polling");
                for subscription in subscriptions {
                    channel.unsubscribe(subscription.id).await;
                }
                return SyncStrategy::Poll;
            }
        }
    }

    info!("push subscriptions established");
    SyncStrategy::Push {
        channel,
        subscriptions,
    }
}
