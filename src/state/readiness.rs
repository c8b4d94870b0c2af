//! Readiness declarations, the startable predicate and the host-only bulk clear.

use std::{fmt, sync::Arc};

use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::{
    config::ParticipantBounds,
    dao::{
        client::RecordStoreClient,
        models::{ReadinessRecord, ReadinessRole},
    },
    state::{
        clock::Clock,
        identity::Identity,
        notify::{LobbyChange, Notifier},
        reconcile::reconcile,
    },
};

/// Longest accepted role distribution mode label.
pub const MAX_MODE_LEN: usize = 64;

/// Host-selected label describing how roles will be distributed in the next round.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoleDistributionMode(String);

/// Raised when a role distribution mode label is blank or too long.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("role distribution mode must be 1..={MAX_MODE_LEN} characters")]
pub struct InvalidMode;

impl RoleDistributionMode {
    pub fn new(raw: impl AsRef<str>) -> Result<Self, InvalidMode> {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() || trimmed.chars().count() > MAX_MODE_LEN {
            return Err(InvalidMode);
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoleDistributionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessState {
    NotReady,
    Ready,
}

/// Outcome of a readiness declaration.
///
/// The local view is always updated; `synced` tells whether the store accepted the write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessChange {
    pub state: ReadinessState,
    pub synced: bool,
}

/// Reasons a readiness declaration is refused before anything is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ReadinessRejection {
    #[error("guests cannot declare readiness; sign in first")]
    NotAuthenticated,
    #[error("only the host can declare readiness as host")]
    NotHost,
    #[error("select a role distribution mode before readying up as host")]
    ModeNotSelected,
}

/// Coordinates this session's readiness with the shared readiness set.
pub struct ReadinessCoordinator {
    client: RecordStoreClient,
    clock: Arc<dyn Clock>,
    bounds: ParticipantBounds,
    snapshot: RwLock<Vec<ReadinessRecord>>,
    notifier: Notifier,
}

impl ReadinessCoordinator {
    pub fn new(
        client: RecordStoreClient,
        clock: Arc<dyn Clock>,
        bounds: ParticipantBounds,
        notifier: Notifier,
    ) -> Self {
        Self {
            client,
            clock,
            bounds,
            snapshot: RwLock::new(Vec::new()),
            notifier,
        }
    }

    pub fn bounds(&self) -> ParticipantBounds {
        self.bounds
    }

    /// Declare this session ready under `role`.
    ///
    /// A host declaration carries the selected mode; a participant declaration never does.
    pub async fn declare_ready(
        &self,
        identity: &Identity,
        role: ReadinessRole,
        mode: Option<&RoleDistributionMode>,
    ) -> Result<ReadinessChange, ReadinessRejection> {
        if !identity.is_authenticated() {
            return Err(ReadinessRejection::NotAuthenticated);
        }
        let role_mode = match role {
            ReadinessRole::Participant => None,
            ReadinessRole::Host => {
                if !identity.is_host() {
                    return Err(ReadinessRejection::NotHost);
                }
                Some(mode.ok_or(ReadinessRejection::ModeNotSelected)?)
            }
        };

        let record = ReadinessRecord {
            session_id: identity.session_id().to_string(),
            role,
            role_mode: role_mode.map(|mode| mode.as_str().to_string()),
            declared_at: self.clock.now(),
        };
        self.remember(record.clone()).await;

        let synced = match self
            .client
            .upsert_readiness(
                &record.session_id,
                record.role,
                record.role_mode.as_deref(),
                record.declared_at,
            )
            .await
        {
            Ok(()) => true,
            Err(err) => {
                warn!(session_id = %record.session_id, error = %err, "failed to persist readiness");
                false
            }
        };
        debug!(session_id = %record.session_id, ?role, synced, "declared ready");
        self.notifier.notify(LobbyChange::Readiness);

        Ok(ReadinessChange {
            state: ReadinessState::Ready,
            synced,
        })
    }

    /// Retract this session's readiness.
    pub async fn declare_not_ready(&self, identity: &Identity) -> ReadinessChange {
        self.forget(identity.session_id()).await;
        let synced = match self.client.delete_readiness(identity.session_id()).await {
            Ok(()) => true,
            Err(err) => {
                warn!(session_id = identity.session_id(), error = %err, "failed to retract readiness");
                false
            }
        };
        self.notifier.notify(LobbyChange::Readiness);

        ReadinessChange {
            state: ReadinessState::NotReady,
            synced,
        }
    }

    /// Flip this session's readiness based on the local view.
    pub async fn toggle(
        &self,
        identity: &Identity,
        role: ReadinessRole,
        mode: Option<&RoleDistributionMode>,
    ) -> Result<ReadinessChange, ReadinessRejection> {
        if !identity.is_authenticated() {
            return Err(ReadinessRejection::NotAuthenticated);
        }
        if self.is_ready(identity.session_id()).await {
            Ok(self.declare_not_ready(identity).await)
        } else {
            self.declare_ready(identity, role, mode).await
        }
    }

    /// Whether the local view lists `session_id` as ready.
    pub async fn is_ready(&self, session_id: &str) -> bool {
        self.snapshot
            .read()
            .await
            .iter()
            .any(|record| record.session_id == session_id)
    }

    /// Pull the readiness set from the store, deduplicated by session.
    pub async fn current_readiness(&self) -> Vec<ReadinessRecord> {
        match self.client.read_readiness().await {
            Ok(records) => {
                let reconciled = reconcile(records);
                *self.snapshot.write().await = reconciled.clone();
                reconciled
            }
            Err(err) => {
                warn!(error = %err, "failed to read readiness; using cached snapshot");
                self.snapshot().await
            }
        }
    }

    /// Last known readiness set, without touching the store.
    pub async fn snapshot(&self) -> Vec<ReadinessRecord> {
        self.snapshot.read().await.clone()
    }

    /// Whether the current ready count lies within the participant bounds.
    pub async fn is_startable(&self) -> bool {
        self.bounds.contains(self.current_readiness().await.len())
    }

    /// Empty the readiness set. The local view is cleared whatever the store says.
    pub async fn clear_all(&self) -> bool {
        self.snapshot.write().await.clear();
        let synced = match self.client.clear_readiness().await {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, "failed to clear readiness in the store");
                false
            }
        };
        info!(synced, "readiness cleared");
        self.notifier.notify(LobbyChange::Readiness);
        synced
    }

    /// Drop a session from the local view only.
    pub async fn forget(&self, session_id: &str) {
        self.snapshot
            .write()
            .await
            .retain(|record| record.session_id != session_id);
    }

    async fn remember(&self, record: ReadinessRecord) {
        let mut snapshot = self.snapshot.write().await;
        snapshot.retain(|existing| existing.session_id != record.session_id);
        snapshot.push(record);
        let merged = reconcile(snapshot.drain(..));
        *snapshot = merged;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use time::macros::datetime;

    use super::*;
    use crate::{
        dao::{models::Table, record_store::memory::MemoryRecordStore},
        state::clock::ManualClock,
    };

    fn coordinator() -> (MemoryRecordStore, ManualClock, ReadinessCoordinator) {
        let store = MemoryRecordStore::new();
        let clock = ManualClock::new(datetime!(2025-03-01 12:00:00 UTC));
        let coordinator = ReadinessCoordinator::new(
            RecordStoreClient::new(Arc::new(store.clone())),
            Arc::new(clock.clone()),
            ParticipantBounds::default(),
            Notifier::default(),
        );
        (store, clock, coordinator)
    }

    fn mode(label: &str) -> RoleDistributionMode {
        RoleDistributionMode::new(label).unwrap()
    }

    #[test]
    fn mode_labels_are_trimmed_and_bounded() {
        assert_eq!(mode("  classic ").as_str(), "classic");
        assert_eq!(RoleDistributionMode::new("   "), Err(InvalidMode));
        assert_eq!(RoleDistributionMode::new("x".repeat(65)), Err(InvalidMode));
    }

    #[tokio::test]
    async fn guests_are_rejected_without_writes() {
        let (store, _, coordinator) = coordinator();
        let err = coordinator
            .declare_ready(&Identity::guest("visitor_1_abcdefghi"), ReadinessRole::Participant, None)
            .await
            .unwrap_err();
        assert_eq!(err, ReadinessRejection::NotAuthenticated);
        assert!(store.rows(Table::Readiness).is_empty());
    }

    #[tokio::test]
    async fn host_declaration_requires_mode_and_privilege() {
        let (_, _, coordinator) = coordinator();
        let err = coordinator
            .declare_ready(&Identity::host("root"), ReadinessRole::Host, None)
            .await
            .unwrap_err();
        assert_eq!(err, ReadinessRejection::ModeNotSelected);

        let err = coordinator
            .declare_ready(&Identity::member("alice"), ReadinessRole::Host, Some(&mode("classic")))
            .await
            .unwrap_err();
        assert_eq!(err, ReadinessRejection::NotHost);

        let change = coordinator
            .declare_ready(&Identity::host("root"), ReadinessRole::Host, Some(&mode("classic")))
            .await
            .unwrap();
        assert_eq!(change.state, ReadinessState::Ready);
        let ready = coordinator.current_readiness().await;
        assert_eq!(ready[0].role_mode.as_deref(), Some("classic"));
    }

    #[tokio::test]
    async fn toggle_flips_state() {
        let (store, _, coordinator) = coordinator();
        let alice = Identity::member("alice");

        let first = coordinator.toggle(&alice, ReadinessRole::Participant, None).await.unwrap();
        assert_eq!(first.state, ReadinessState::Ready);
        assert_eq!(store.rows(Table::Readiness).len(), 1);

        let second = coordinator.toggle(&alice, ReadinessRole::Participant, None).await.unwrap();
        assert_eq!(second.state, ReadinessState::NotReady);
        assert!(store.rows(Table::Readiness).is_empty());
    }

    #[tokio::test]
    async fn startable_follows_bounds() {
        let (_, clock, coordinator) = coordinator();
        for name in ["a", "b", "c"] {
            coordinator
                .declare_ready(&Identity::member(name), ReadinessRole::Participant, None)
                .await
                .unwrap();
            clock.advance(Duration::from_millis(10));
        }
        assert!(!coordinator.is_startable().await);

        coordinator
            .declare_ready(&Identity::member("d"), ReadinessRole::Participant, None)
            .await
            .unwrap();
        assert!(coordinator.is_startable().await);
    }

    #[tokio::test]
    async fn store_failure_keeps_local_view() {
        let (store, _, coordinator) = coordinator();
        store.set_offline(true);
        let change = coordinator
            .declare_ready(&Identity::member("alice"), ReadinessRole::Participant, None)
            .await
            .unwrap();
        assert!(!change.synced);
        assert!(coordinator.is_ready("alice").await);
        assert_eq!(coordinator.current_readiness().await.len(), 1);
    }

    #[tokio::test]
    async fn clear_all_empties_local_view_even_when_offline() {
        let (store, _, coordinator) = coordinator();
        coordinator
            .declare_ready(&Identity::member("alice"), ReadinessRole::Participant, None)
            .await
            .unwrap();
        store.set_offline(true);

        assert!(!coordinator.clear_all().await);
        assert!(coordinator.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn declarations_notify_subscribers() {
        let (_, _, coordinator) = coordinator();
        let mut changes = coordinator.notifier.subscribe();
        coordinator
            .declare_ready(&Identity::member("alice"), ReadinessRole::Participant, None)
            .await
            .unwrap();
        assert_eq!(changes.recv().await.unwrap(), LobbyChange::Readiness);
    }
}
