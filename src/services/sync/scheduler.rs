//! Timer-driven synchronization loop for one lobby session.

use std::{future::pending, sync::Arc, time::Duration};

use futures::{StreamExt, future::BoxFuture, stream::BoxStream};
use tokio::{
    sync::{oneshot, watch},
    task::JoinHandle,
    time::{Instant, Interval, MissedTickBehavior, interval_at},
};
use tracing::{debug, info, warn};

use crate::{
    config::LobbySettings,
    dto::sse::ChangeEvent,
    services::sync::{StrategyKind, SyncStrategy},
    state::session::Visibility,
};

/// What the scheduler drives: usually a [`LobbySession`](crate::state::session::LobbySession).
pub trait SyncTarget: Send + Sync + 'static {
    fn refresh(&self) -> BoxFuture<'_, ()>;
    fn heartbeat(&self) -> BoxFuture<'_, ()>;
    fn visibility(&self) -> watch::Receiver<Visibility>;
}

/// Runs heartbeats, polls or push-triggered refreshes until stopped.
pub struct SyncScheduler {
    target: Arc<dyn SyncTarget>,
    heartbeat_interval: Duration,
    poll_interval: Duration,
    strategy: Option<SyncStrategy>,
    kind: StrategyKind,
    running: Option<(oneshot::Sender<()>, JoinHandle<Option<SyncStrategy>>)>,
}

impl SyncScheduler {
    pub fn new(target: Arc<dyn SyncTarget>, strategy: SyncStrategy, settings: &LobbySettings) -> Self {
        Self {
            target,
            heartbeat_interval: settings.heartbeat_interval,
            poll_interval: settings.poll_interval,
            kind: strategy.kind(),
            strategy: Some(strategy),
            running: None,
        }
    }

    pub fn kind(&self) -> StrategyKind {
        self.kind
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Spawn the driver loop. Does nothing when already running.
    pub fn start(&mut self) {
        if self.running.is_some() {
            return;
        }
        let Some(mut strategy) = self.strategy.take() else {
            warn!("sync scheduler has no strategy left to start");
            return;
        };

        let events = strategy.take_events();
        let (stop_tx, stop_rx) = oneshot::channel();
        let driver = Driver {
            target: Arc::clone(&self.target),
            heartbeat_every: self.heartbeat_interval,
            poll_every: self.poll_interval,
            polling: strategy.kind() == StrategyKind::Poll,
            events,
        };
        info!(strategy = ?self.kind, "sync scheduler started");
        let handle = tokio::spawn(async move {
            driver.run(stop_rx).await;
            Some(strategy)
        });
        self.running = Some((stop_tx, handle));
    }

    /// Stop the driver loop and release push subscriptions.
    pub async fn stop(&mut self) {
        let Some((stop_tx, handle)) = self.running.take() else {
            return;
        };
        let _ = stop_tx.send(());
        match handle.await {
            Ok(Some(strategy)) => strategy.shutdown().await,
            Ok(None) => {}
            Err(err) => warn!(error = %err, "sync driver ended abnormally"),
        }
        info!(strategy = ?self.kind, "sync scheduler stopped");
    }

    /// Run one refresh cycle now, independently of the timers.
    pub async fn tick(&self) {
        self.target.refresh().await;
    }
}

struct Driver {
    target: Arc<dyn SyncTarget>,
    heartbeat_every: Duration,
    poll_every: Duration,
    polling: bool,
    events: Option<BoxStream<'static, ChangeEvent>>,
}

impl Driver {
    async fn run(mut self, mut stop: oneshot::Receiver<()>) {
        self.target.heartbeat().await;
        self.target.refresh().await;

        let mut heartbeat = periodic(self.heartbeat_every);
        let mut poll = self.polling.then(|| periodic(self.poll_every));
        let mut visibility = self.target.visibility();

        loop {
            tokio::select! {
                _ = &mut stop => break,
                _ = heartbeat.tick() => self.target.heartbeat().await,
                _ = next_tick(&mut poll) => self.target.refresh().await,
                event = next_event(&mut self.events) => match event {
                    Some(event) => {
                        debug!(topic = ?event.topic, kind = ?event.kind, "push event received");
                        self.target.refresh().await;
                    }
                    None => {
                        // One-way switch: push is not retried for this session.
                        warn!("push stream ended; falling back to polling");
                        self.events = None;
                        poll = Some(periodic(self.poll_every));
                        self.target.refresh().await;
                    }
                },
                changed = visibility.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let now_visible = *visibility.borrow_and_update() == Visibility::Visible;
                    if now_visible {
                        self.target.heartbeat().await;
                        self.target.refresh().await;
                    }
                }
            }
        }
    }
}

fn periodic(every: Duration) -> Interval {
    let mut interval = interval_at(Instant::now() + every, every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => pending().await,
    }
}

async fn next_event(events: &mut Option<BoxStream<'static, ChangeEvent>>) -> Option<ChangeEvent> {
    match events {
        Some(events) => events.next().await,
        None => pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::FutureExt;

    use super::*;
    use crate::{
        dto::sse::{ChangeKind, Topic},
        services::sync::{
            push::{LocalPushChannel, PushChannel},
            select_strategy,
        },
    };

    struct Counting {
        refreshes: AtomicUsize,
        heartbeats: AtomicUsize,
        visibility: watch::Sender<Visibility>,
    }

    impl Counting {
        fn new() -> Arc<Self> {
            let (visibility, _rx) = watch::channel(Visibility::Visible);
            Arc::new(Self {
                refreshes: AtomicUsize::new(0),
                heartbeats: AtomicUsize::new(0),
                visibility,
            })
        }

        fn refreshes(&self) -> usize {
            self.refreshes.load(Ordering::SeqCst)
        }

        fn heartbeats(&self) -> usize {
            self.heartbeats.load(Ordering::SeqCst)
        }
    }

    impl SyncTarget for Counting {
        fn refresh(&self) -> BoxFuture<'_, ()> {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            async {}.boxed()
        }

        fn heartbeat(&self) -> BoxFuture<'_, ()> {
            self.heartbeats.fetch_add(1, Ordering::SeqCst);
            async {}.boxed()
        }

        fn visibility(&self) -> watch::Receiver<Visibility> {
            self.visibility.subscribe()
        }
    }

    fn scheduler(target: &Arc<Counting>, strategy: SyncStrategy) -> SyncScheduler {
        SyncScheduler::new(target.clone(), strategy, &LobbySettings::default())
    }

    #[tokio::test(start_paused = true)]
    async fn poll_strategy_refreshes_every_interval() {
        let target = Counting::new();
        let mut scheduler = scheduler(&target, SyncStrategy::Poll);
        scheduler.start();

        tokio::time::sleep(Duration::from_millis(1_250)).await;
        // Initial refresh plus ticks at 500 ms and 1000 ms.
        assert_eq!(target.refreshes(), 3);
        assert_eq!(target.heartbeats(), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(target.heartbeats(), 2);

        scheduler.stop().await;
        let after_stop = target.refreshes();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(target.refreshes(), after_stop);
        assert!(!scheduler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn push_strategy_refreshes_on_events_only() {
        let target = Counting::new();
        let channel = Arc::new(LocalPushChannel::new(8));
        let strategy = select_strategy(Some(channel.clone() as Arc<dyn PushChannel>)).await;
        let mut scheduler = scheduler(&target, strategy);
        assert_eq!(scheduler.kind(), StrategyKind::Push);
        scheduler.start();

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(target.refreshes(), 1);

        channel.publish(ChangeEvent {
            topic: Topic::Readiness,
            kind: ChangeKind::Insert,
            session_id: Some("bob".into()),
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(target.refreshes(), 2);

        scheduler.stop().await;
        assert_eq!(channel.subscription_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn ended_push_stream_falls_back_to_polling() {
        let target = Counting::new();
        let channel = Arc::new(LocalPushChannel::new(8));
        let strategy = select_strategy(Some(channel.clone() as Arc<dyn PushChannel>)).await;
        let mut scheduler = scheduler(&target, strategy);
        scheduler.start();

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(target.refreshes(), 1);

        channel.close();
        tokio::time::sleep(Duration::from_millis(10)).await;
        // Catch-up refresh as soon as the stream ends.
        assert_eq!(target.refreshes(), 2);

        tokio::time::sleep(Duration::from_millis(1_000)).await;
        // Poll ticks at 500 ms and 1000 ms after the fallback.
        assert_eq!(target.refreshes(), 4);

        scheduler.stop().await;
        let after_stop = target.refreshes();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(target.refreshes(), after_stop);
    }

    #[tokio::test(start_paused = true)]
    async fn regaining_visibility_refreshes_immediately() {
        let target = Counting::new();
        let channel = Arc::new(LocalPushChannel::new(8));
        let strategy = select_strategy(Some(channel as Arc<dyn PushChannel>)).await;
        let mut scheduler = scheduler(&target, strategy);
        scheduler.start();
        tokio::time::sleep(Duration::from_millis(10)).await;

        target.visibility.send_replace(Visibility::Hidden);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(target.refreshes(), 1);

        target.visibility.send_replace(Visibility::Visible);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(target.refreshes(), 2);
        assert_eq!(target.heartbeats(), 2);

        scheduler.stop().await;
    }

    #[tokio::test]
    async fn tick_refreshes_without_starting() {
        let target = Counting::new();
        let scheduler = scheduler(&target, SyncStrategy::Poll);
        scheduler.tick().await;
        assert_eq!(target.refreshes(), 1);
        assert!(!scheduler.is_running());
    }
}
