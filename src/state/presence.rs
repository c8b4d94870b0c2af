//! Liveness heartbeat of this session and the TTL-filtered view of everyone else's.

use std::{sync::Arc, time::Duration};

use time::OffsetDateTime;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::{
    dao::{client::RecordStoreClient, models::PresenceRecord},
    state::{clock::Clock, identity::Identity, reconcile::reconcile},
};

/// Tracks which sessions are currently present.
///
/// Presence is advisory: store failures are logged and answered from the last snapshot,
/// never surfaced to the caller.
pub struct PresenceTracker {
    client: RecordStoreClient,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    snapshot: RwLock<Vec<PresenceRecord>>,
    last_beat: Mutex<Option<OffsetDateTime>>,
}

impl PresenceTracker {
    pub fn new(client: RecordStoreClient, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            client,
            clock,
            ttl,
            snapshot: RwLock::new(Vec::new()),
            last_beat: Mutex::new(None),
        }
    }

    /// Upsert this session's presence record. Returns whether the store accepted the write.
    ///
    /// The local snapshot is updated first so the session sees itself even when the store
    /// is unreachable.
    pub async fn heartbeat(&self, identity: &Identity) -> bool {
        let stamp = self.next_stamp().await;
        let record = PresenceRecord {
            session_id: identity.session_id().to_string(),
            is_guest: !identity.is_authenticated(),
            last_seen_at: stamp,
        };
        self.remember(record.clone()).await;

        match self
            .client
            .upsert_presence(&record.session_id, record.is_guest, stamp)
            .await
        {
            Ok(()) => true,
            Err(err) => {
                warn!(session_id = %record.session_id, error = %err, "presence heartbeat failed");
                false
            }
        }
    }

    /// Pull the presence set from the store, deduplicated and TTL-filtered.
    pub async fn current_presence(&self) -> Vec<PresenceRecord> {
        let now = self.clock.now();
        match self.client.read_presence(now - self.ttl).await {
            Ok(records) => {
                let live = self.live(reconcile(records), now);
                *self.snapshot.write().await = live.clone();
                live
            }
            Err(err) => {
                warn!(error = %err, "failed to read presence; using cached snapshot");
                self.snapshot().await
            }
        }
    }

    /// Number of present sessions that are not guests.
    pub async fn authorized_count(&self) -> usize {
        count_authorized(&self.current_presence().await)
    }

    /// Last known presence set, without touching the store.
    pub async fn snapshot(&self) -> Vec<PresenceRecord> {
        let now = self.clock.now();
        let cached = self.snapshot.read().await.clone();
        self.live(cached, now)
    }

    /// Best-effort removal of this session's record. Returns whether the store accepted it.
    pub async fn leave(&self, identity: &Identity) -> bool {
        self.forget(identity.session_id()).await;
        match self.client.delete_presence(identity.session_id()).await {
            Ok(()) => true,
            Err(err) => {
                debug!(session_id = identity.session_id(), error = %err, "presence removal failed; TTL will expire it");
                false
            }
        }
    }

    /// Drop a session from the local snapshot only.
    pub async fn forget(&self, session_id: &str) {
        self.snapshot
            .write()
            .await
            .retain(|record| record.session_id != session_id);
    }

    async fn remember(&self, record: PresenceRecord) {
        let mut snapshot = self.snapshot.write().await;
        let merged = reconcile(snapshot.drain(..).chain(std::iter::once(record)));
        *snapshot = merged;
    }

    /// Heartbeat timestamps never go backwards for this session.
    async fn next_stamp(&self) -> OffsetDateTime {
        let now = self.clock.now();
        let mut last = self.last_beat.lock().await;
        let stamp = last.map_or(now, |previous| previous.max(now));
        *last = Some(stamp);
        stamp
    }

    fn live(&self, records: Vec<PresenceRecord>, now: OffsetDateTime) -> Vec<PresenceRecord> {
        let cutoff = now - self.ttl;
        records
            .into_iter()
            .filter(|record| record.last_seen_at > cutoff)
            .collect()
    }
}

/// Count entries belonging to authenticated sessions.
pub fn count_authorized(records: &[PresenceRecord]) -> usize {
    records.iter().filter(|record| !record.is_guest).count()
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;
    use crate::{
        dao::{models::Table, record_store::memory::MemoryRecordStore},
        state::clock::ManualClock,
    };

    fn tracker() -> (MemoryRecordStore, ManualClock, PresenceTracker) {
        let store = MemoryRecordStore::new();
        let clock = ManualClock::new(datetime!(2025-03-01 12:00:00 UTC));
        let tracker = PresenceTracker::new(
            RecordStoreClient::new(Arc::new(store.clone())),
            Arc::new(clock.clone()),
            Duration::from_secs(30),
        );
        (store, clock, tracker)
    }

    #[tokio::test]
    async fn repeated_heartbeats_keep_one_record() {
        let (store, clock, tracker) = tracker();
        let alice = Identity::member("alice");
        for _ in 0..5 {
            assert!(tracker.heartbeat(&alice).await);
            clock.advance(Duration::from_secs(3));
        }

        assert_eq!(store.rows(Table::Presence).len(), 1);
        let present = tracker.current_presence().await;
        assert_eq!(present.len(), 1);
        assert_eq!(present[0].session_id, "alice");
    }

    #[tokio::test]
    async fn stale_records_are_excluded() {
        let (_, clock, tracker) = tracker();
        tracker.heartbeat(&Identity::member("alice")).await;
        clock.advance(Duration::from_secs(20));
        tracker.heartbeat(&Identity::member("bob")).await;
        clock.advance(Duration::from_secs(10));

        let present = tracker.current_presence().await;
        let ids: Vec<_> = present.iter().map(|r| r.session_id.as_str()).collect();
        assert_eq!(ids, ["bob"]);
    }

    #[tokio::test]
    async fn guests_are_tracked_but_not_counted() {
        let (_, _, tracker) = tracker();
        tracker.heartbeat(&Identity::member("alice")).await;
        tracker.heartbeat(&Identity::guest("visitor_1_abcdefghi")).await;

        assert_eq!(tracker.current_presence().await.len(), 2);
        assert_eq!(tracker.authorized_count().await, 1);
    }

    #[tokio::test]
    async fn store_failure_falls_back_to_snapshot() {
        let (store, clock, tracker) = tracker();
        tracker.heartbeat(&Identity::member("alice")).await;
        assert_eq!(tracker.current_presence().await.len(), 1);

        store.set_offline(true);
        assert!(!tracker.heartbeat(&Identity::member("alice")).await);
        assert_eq!(tracker.current_presence().await.len(), 1);

        clock.advance(Duration::from_secs(31));
        assert!(tracker.current_presence().await.is_empty());
    }

    #[tokio::test]
    async fn heartbeat_stamps_never_regress() {
        let (store, clock, tracker) = tracker();
        let alice = Identity::member("alice");
        tracker.heartbeat(&alice).await;
        clock.set(datetime!(2025-03-01 11:59:00 UTC));
        tracker.heartbeat(&alice).await;

        let rows = store.rows(Table::Presence);
        assert_eq!(rows[0]["last_seen_at"], "2025-03-01T12:00:00Z");
    }

    #[tokio::test]
    async fn leave_removes_the_record() {
        let (store, _, tracker) = tracker();
        let alice = Identity::member("alice");
        tracker.heartbeat(&alice).await;
        assert!(tracker.leave(&alice).await);
        assert!(store.rows(Table::Presence).is_empty());
        assert!(tracker.snapshot().await.is_empty());
    }
}
