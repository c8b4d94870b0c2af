//! Per-session context tying the lobby components together.

use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicBool, Ordering},
};

use futures::future::BoxFuture;
use thiserror::Error;
use tokio::{
    sync::{RwLock, broadcast, watch},
    task::JoinHandle,
};
use tracing::{debug, info};

use crate::{
    config::LobbySettings,
    dao::{
        client::RecordStoreClient,
        models::{PresenceRecord, ReadinessRecord, ReadinessRole},
    },
    services::{
        beacon::{BestEffortDelivery, Farewell},
        sync::scheduler::SyncTarget,
    },
    state::{
        clock::Clock,
        identity::Identity,
        notify::{LobbyChange, Notifier},
        presence::{PresenceTracker, count_authorized},
        readiness::{
            InvalidMode, ReadinessChange, ReadinessCoordinator, ReadinessRejection,
            RoleDistributionMode,
        },
        round::{RejectionReason, RoundController, RoundRoster},
        state_machine::RoundPhase,
    },
};

/// Whether the session is currently in front of its user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    Hidden,
}

/// Everything a lobby UI renders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LobbyView {
    pub presence: Vec<PresenceRecord>,
    /// Present sessions that are not guests.
    pub authorized_count: usize,
    pub readiness: Vec<ReadinessRecord>,
    pub startable: bool,
    /// Whether this session is in the readiness set.
    pub ready: bool,
    pub phase: RoundPhase,
    pub selected_mode: Option<RoleDistributionMode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModeSelectionError {
    #[error("only the host selects the role distribution mode")]
    NotHost,
    #[error(transparent)]
    Invalid(#[from] InvalidMode),
}

/// One browser-tab-equivalent session in the lobby.
pub struct LobbySession {
    identity: Identity,
    settings: LobbySettings,
    presence: PresenceTracker,
    readiness: Arc<ReadinessCoordinator>,
    round: RoundController,
    notifier: Notifier,
    selected_mode: RwLock<Option<RoleDistributionMode>>,
    visibility: watch::Sender<Visibility>,
    grace: Mutex<Option<JoinHandle<()>>>,
    suspended: AtomicBool,
}

impl LobbySession {
    pub fn new(
        identity: Identity,
        client: RecordStoreClient,
        clock: Arc<dyn Clock>,
        settings: LobbySettings,
    ) -> Arc<Self> {
        let notifier = Notifier::default();
        let presence = PresenceTracker::new(client.clone(), clock.clone(), settings.presence_ttl);
        let readiness = Arc::new(ReadinessCoordinator::new(
            client,
            clock,
            settings.bounds,
            notifier.clone(),
        ));
        let round = RoundController::new(readiness.clone(), notifier.clone());
        let (visibility, _rx) = watch::channel(Visibility::Visible);

        Arc::new(Self {
            identity,
            settings,
            presence,
            readiness,
            round,
            notifier,
            selected_mode: RwLock::new(None),
            visibility,
            grace: Mutex::new(None),
            suspended: AtomicBool::new(false),
        })
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn settings(&self) -> &LobbySettings {
        &self.settings
    }

    /// Renew this session's presence. Skipped while retracted after the hidden grace.
    pub async fn heartbeat(&self) -> bool {
        if self.suspended.load(Ordering::Acquire) {
            debug!(session_id = self.identity.session_id(), "heartbeat suspended while hidden");
            return false;
        }
        let synced = self.presence.heartbeat(&self.identity).await;
        self.notifier.notify(LobbyChange::Presence);
        synced
    }

    /// Pull presence and readiness, notifying subscribers of whatever changed.
    pub async fn refresh(&self) -> LobbyView {
        let before_presence = self.presence.snapshot().await;
        let before_readiness = self.readiness.snapshot().await;

        let (presence, readiness) = tokio::join!(
            self.presence.current_presence(),
            self.readiness.current_readiness()
        );

        if presence != before_presence {
            self.notifier.notify(LobbyChange::Presence);
        }
        if readiness != before_readiness {
            self.notifier.notify(LobbyChange::Readiness);
        }
        self.build_view(presence, readiness).await
    }

    /// Current view from local snapshots only.
    pub async fn view(&self) -> LobbyView {
        let presence = self.presence.snapshot().await;
        let readiness = self.readiness.snapshot().await;
        self.build_view(presence, readiness).await
    }

    /// Host-only: choose how roles will be distributed in the next round.
    pub async fn select_mode(&self, raw: &str) -> Result<RoleDistributionMode, ModeSelectionError> {
        if !self.identity.is_host() {
            return Err(ModeSelectionError::NotHost);
        }
        let mode = RoleDistributionMode::new(raw)?;
        *self.selected_mode.write().await = Some(mode.clone());
        info!(host = self.identity.session_id(), mode = %mode, "role distribution mode selected");
        Ok(mode)
    }

    pub async fn selected_mode(&self) -> Option<RoleDistributionMode> {
        self.selected_mode.read().await.clone()
    }

    /// The ready button: hosts declare as host with the selected mode, others as participants.
    pub async fn toggle_ready(&self) -> Result<ReadinessChange, ReadinessRejection> {
        let mode = self.selected_mode().await;
        self.readiness
            .toggle(&self.identity, self.own_role(), mode.as_ref())
            .await
    }

    pub async fn declare_ready(&self) -> Result<ReadinessChange, ReadinessRejection> {
        let mode = self.selected_mode().await;
        self.readiness
            .declare_ready(&self.identity, self.own_role(), mode.as_ref())
            .await
    }

    pub async fn declare_not_ready(&self) -> ReadinessChange {
        self.readiness.declare_not_ready(&self.identity).await
    }

    pub async fn request_start(&self) -> Result<RoundRoster, RejectionReason> {
        let mode = self.selected_mode().await;
        self.round.request_start(&self.identity, mode.as_ref()).await
    }

    pub async fn force_start(&self) -> Result<RoundRoster, RejectionReason> {
        let mode = self.selected_mode().await;
        self.round.force_start(&self.identity, mode.as_ref()).await
    }

    pub async fn roster(&self) -> Option<RoundRoster> {
        self.round.roster().await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LobbyChange> {
        self.notifier.subscribe()
    }

    /// Watch visibility transitions; the sync driver refreshes when the session reappears.
    pub fn visibility(&self) -> watch::Receiver<Visibility> {
        self.visibility.subscribe()
    }

    /// Record a visibility transition.
    ///
    /// Hiding arms the grace timer; once it elapses the session retracts its readiness
    /// and presence and stops heartbeating until it is visible again.
    pub fn set_visibility(self: &Arc<Self>, visibility: Visibility) {
        let previous = self.visibility.send_replace(visibility);
        let mut grace = self.grace.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = grace.take() {
            task.abort();
        }

        match visibility {
            Visibility::Visible => {
                if previous == Visibility::Hidden {
                    self.suspended.store(false, Ordering::Release);
                }
            }
            Visibility::Hidden => {
                let session = Arc::clone(self);
                let delay = self.settings.hidden_grace;
                *grace = Some(tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    session.retract_while_hidden().await;
                }));
            }
        }
    }

    /// Send the final retraction messages without waiting for them and drop local state.
    pub async fn teardown(&self, delivery: &dyn BestEffortDelivery) {
        self.suspended.store(true, Ordering::Release);
        let pending_grace = self
            .grace
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = pending_grace {
            task.abort();
        }

        let session_id = self.identity.session_id().to_string();
        let readiness_sent = !self.identity.is_authenticated()
            || delivery.dispatch(Farewell::RetractReadiness {
                session_id: session_id.clone(),
            });
        let presence_sent = delivery.dispatch(Farewell::RemovePresence {
            session_id: session_id.clone(),
        });

        self.readiness.forget(&session_id).await;
        self.presence.forget(&session_id).await;
        info!(session_id, readiness_sent, presence_sent, "session torn down");
    }

    async fn retract_while_hidden(&self) {
        self.suspended.store(true, Ordering::Release);
        if self.identity.is_authenticated() {
            self.readiness.declare_not_ready(&self.identity).await;
        }
        self.presence.leave(&self.identity).await;
        self.notifier.notify(LobbyChange::Presence);
        info!(
            session_id = self.identity.session_id(),
            grace_ms = self.settings.hidden_grace.as_millis() as u64,
            "session hidden past grace; readiness and presence retracted"
        );
    }

    fn own_role(&self) -> ReadinessRole {
        if self.identity.is_host() {
            ReadinessRole::Host
        } else {
            ReadinessRole::Participant
        }
    }

    async fn build_view(
        &self,
        presence: Vec<PresenceRecord>,
        readiness: Vec<ReadinessRecord>,
    ) -> LobbyView {
        let own_id = self.identity.session_id();
        LobbyView {
            authorized_count: count_authorized(&presence),
            startable: self.settings.bounds.contains(readiness.len()),
            ready: readiness.iter().any(|record| record.session_id == own_id),
            phase: self.round.phase().await,
            selected_mode: self.selected_mode().await,
            presence,
            readiness,
        }
    }
}

impl SyncTarget for LobbySession {
    fn refresh(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            LobbySession::refresh(self).await;
        })
    }

    fn heartbeat(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            LobbySession::heartbeat(self).await;
        })
    }

    fn visibility(&self) -> watch::Receiver<Visibility> {
        LobbySession::visibility(self)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        dao::{models::Table, record_store::memory::MemoryRecordStore},
        state::clock::SystemClock,
    };

    fn session(identity: Identity, store: &MemoryRecordStore) -> Arc<LobbySession> {
        LobbySession::new(
            identity,
            RecordStoreClient::new(Arc::new(store.clone())),
            Arc::new(SystemClock),
            LobbySettings::default(),
        )
    }

    #[tokio::test]
    async fn only_hosts_select_a_mode() {
        let store = MemoryRecordStore::new();
        let member = session(Identity::member("alice"), &store);
        assert_eq!(member.select_mode("classic").await, Err(ModeSelectionError::NotHost));

        let host = session(Identity::host("root"), &store);
        assert_eq!(
            host.select_mode("  ").await,
            Err(ModeSelectionError::Invalid(InvalidMode))
        );
        host.select_mode("classic").await.unwrap();
        assert_eq!(host.view().await.selected_mode.unwrap().as_str(), "classic");
    }

    #[tokio::test]
    async fn host_ready_button_records_the_mode() {
        let store = MemoryRecordStore::new();
        let host = session(Identity::host("root"), &store);
        assert_eq!(
            host.toggle_ready().await.unwrap_err(),
            ReadinessRejection::ModeNotSelected
        );

        host.select_mode("classic").await.unwrap();
        host.toggle_ready().await.unwrap();
        let rows = store.rows(Table::Readiness);
        assert_eq!(rows[0]["role"], "host");
        assert_eq!(rows[0]["role_mode"], "classic");
    }

    #[tokio::test]
    async fn refresh_reports_the_shared_view() {
        let store = MemoryRecordStore::new();
        let alice = session(Identity::member("alice"), &store);
        let guest = session(Identity::guest("visitor_1_abcdefghi"), &store);
        alice.heartbeat().await;
        guest.heartbeat().await;
        alice.declare_ready().await.unwrap();

        let view = guest.refresh().await;
        assert_eq!(view.presence.len(), 2);
        assert_eq!(view.authorized_count, 1);
        assert_eq!(view.readiness.len(), 1);
        assert!(!view.ready);
        assert!(!view.startable);
        assert_eq!(view.phase, RoundPhase::Lobby);
    }

    #[tokio::test(start_paused = true)]
    async fn hidden_past_grace_retracts_and_suspends() {
        let store = MemoryRecordStore::new();
        let alice = session(Identity::member("alice"), &store);
        alice.heartbeat().await;
        alice.declare_ready().await.unwrap();

        alice.set_visibility(Visibility::Hidden);
        tokio::time::sleep(Duration::from_secs(6)).await;

        assert!(store.rows(Table::Readiness).is_empty());
        assert!(store.rows(Table::Presence).is_empty());
        assert!(!alice.heartbeat().await);

        alice.set_visibility(Visibility::Visible);
        assert!(alice.heartbeat().await);
        assert_eq!(store.rows(Table::Presence).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn returning_within_grace_keeps_readiness() {
        let store = MemoryRecordStore::new();
        let alice = session(Identity::member("alice"), &store);
        alice.declare_ready().await.unwrap();

        alice.set_visibility(Visibility::Hidden);
        tokio::time::sleep(Duration::from_secs(3)).await;
        alice.set_visibility(Visibility::Visible);
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(store.rows(Table::Readiness).len(), 1);
    }
}
