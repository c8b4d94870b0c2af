//! Gate between the open lobby and a generated round.

use std::{future::Future, sync::Arc};

use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::{
    config::ParticipantBounds,
    dao::models::ReadinessRole,
    state::{
        identity::Identity,
        notify::{LobbyChange, Notifier},
        readiness::{ReadinessCoordinator, ReadinessRejection, ReadinessState, RoleDistributionMode},
        state_machine::{
            AbortError, ApplyError, Plan, PlanError, RoundEvent, RoundPhase, RoundStateMachine,
            Snapshot,
        },
    },
};

/// Frozen participant list handed to content generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundRoster {
    /// Ready sessions in declaration order.
    pub participants: Vec<String>,
    pub role_mode: RoleDistributionMode,
    pub size: usize,
}

/// Why a start request did not produce a round.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectionReason {
    /// Non-host request; readiness was toggled instead.
    #[error("only the host can start the round")]
    NotHost { now_ready: bool },
    #[error("guests cannot take part in a round")]
    NotAuthenticated,
    #[error("select a role distribution mode first")]
    ModeNotSelected,
    #[error("{count} ready participants; a round needs between {min} and {max}")]
    CountOutOfRange { count: usize, min: usize, max: usize },
    #[error("round already started ({phase:?})")]
    RoundAlreadyStarted { phase: RoundPhase },
    #[error("round transition failed: {0}")]
    Transition(String),
}

impl From<ReadinessRejection> for RejectionReason {
    fn from(value: ReadinessRejection) -> Self {
        match value {
            ReadinessRejection::NotAuthenticated => RejectionReason::NotAuthenticated,
            ReadinessRejection::ModeNotSelected => RejectionReason::ModeNotSelected,
            ReadinessRejection::NotHost => RejectionReason::NotHost { now_ready: false },
        }
    }
}

impl From<PlanError> for RejectionReason {
    fn from(err: PlanError) -> Self {
        match err {
            PlanError::AlreadyPending => {
                RejectionReason::Transition("state transition already pending".into())
            }
            PlanError::InvalidTransition(invalid) => RejectionReason::Transition(invalid.to_string()),
        }
    }
}

impl From<ApplyError> for RejectionReason {
    fn from(err: ApplyError) -> Self {
        RejectionReason::Transition(format!("{err:?}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StartKind {
    Normal,
    /// Host override that bypasses the participant floor.
    Forced,
}

/// Owns the round phase and the roster once one is frozen.
pub struct RoundController {
    readiness: Arc<ReadinessCoordinator>,
    bounds: ParticipantBounds,
    machine: RwLock<RoundStateMachine>,
    roster: RwLock<Option<RoundRoster>>,
    start_gate: Mutex<()>,
    notifier: Notifier,
}

impl RoundController {
    pub fn new(readiness: Arc<ReadinessCoordinator>, notifier: Notifier) -> Self {
        let bounds = readiness.bounds();
        Self {
            readiness,
            bounds,
            machine: RwLock::new(RoundStateMachine::new()),
            roster: RwLock::new(None),
            start_gate: Mutex::new(()),
            notifier,
        }
    }

    pub async fn phase(&self) -> RoundPhase {
        self.machine.read().await.phase()
    }

    pub async fn snapshot(&self) -> Snapshot {
        self.machine.read().await.snapshot()
    }

    /// Roster frozen by the last successful start, if any.
    pub async fn roster(&self) -> Option<RoundRoster> {
        self.roster.read().await.clone()
    }

    /// Start the round when the host asks and the ready count is within bounds.
    ///
    /// For any other authenticated session this toggles readiness and reports
    /// [`RejectionReason::NotHost`] with the resulting state.
    pub async fn request_start(
        &self,
        identity: &Identity,
        mode: Option<&RoleDistributionMode>,
    ) -> Result<RoundRoster, RejectionReason> {
        self.ensure_lobby().await?;
        if !identity.is_authenticated() {
            return Err(RejectionReason::NotAuthenticated);
        }
        if !identity.is_host() {
            let change = self
                .readiness
                .toggle(identity, ReadinessRole::Participant, None)
                .await?;
            return Err(RejectionReason::NotHost {
                now_ready: change.state == ReadinessState::Ready,
            });
        }
        self.start(identity, mode, StartKind::Normal).await
    }

    /// Host override: start with fewer than the minimum number of participants.
    pub async fn force_start(
        &self,
        identity: &Identity,
        mode: Option<&RoleDistributionMode>,
    ) -> Result<RoundRoster, RejectionReason> {
        self.ensure_lobby().await?;
        if !identity.is_authenticated() {
            return Err(RejectionReason::NotAuthenticated);
        }
        if !identity.is_host() {
            return Err(RejectionReason::NotHost {
                now_ready: self.readiness.is_ready(identity.session_id()).await,
            });
        }
        self.start(identity, mode, StartKind::Forced).await
    }

    async fn start(
        &self,
        identity: &Identity,
        mode: Option<&RoleDistributionMode>,
        kind: StartKind,
    ) -> Result<RoundRoster, RejectionReason> {
        let mode = mode.ok_or(RejectionReason::ModeNotSelected)?;
        let _gate = self.start_gate.lock().await;
        self.ensure_lobby().await?;

        let ready = self.readiness.current_readiness().await;
        let count = ready.len();
        let within = match kind {
            StartKind::Normal => self.bounds.contains(count),
            StartKind::Forced => count > 0 && count <= self.bounds.max,
        };
        if !within {
            return Err(RejectionReason::CountOutOfRange {
                count,
                min: self.bounds.min,
                max: self.bounds.max,
            });
        }
        if kind == StartKind::Forced {
            warn!(
                host = identity.session_id(),
                count,
                min = self.bounds.min,
                "administrative override: forcing round start"
            );
        }

        let roster = RoundRoster {
            participants: ready.into_iter().map(|record| record.session_id).collect(),
            role_mode: mode.clone(),
            size: count,
        };

        self.run_transition(
            RoundEvent::Commit {
                size: count,
                forced: kind == StartKind::Forced,
            },
            || async {
                self.readiness.clear_all().await;
                Ok(())
            },
        )
        .await?;
        *self.roster.write().await = Some(roster.clone());
        self.run_transition(RoundEvent::Generated, || async { Ok(()) })
            .await?;

        info!(
            host = identity.session_id(),
            size = roster.size,
            mode = %roster.role_mode,
            "round started"
        );
        self.notifier.notify(LobbyChange::Round);
        Ok(roster)
    }

    async fn ensure_lobby(&self) -> Result<(), RejectionReason> {
        match self.phase().await {
            RoundPhase::Lobby => Ok(()),
            phase => Err(RejectionReason::RoundAlreadyStarted { phase }),
        }
    }

    /// Plan `event`, run `work`, then apply the plan or abort it if `work` failed.
    ///
    /// Callers hold `start_gate`.
    async fn run_transition<F, Fut>(&self, event: RoundEvent, work: F) -> Result<RoundPhase, RejectionReason>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), RejectionReason>>,
    {
        let Plan { id: plan_id, .. } = self.machine.write().await.plan(event)?;

        match work().await {
            Ok(()) => {
                let next = self.machine.write().await.apply(plan_id)?;
                Ok(next)
            }
            Err(err) => {
                if let Err(abort_err) = self.machine.write().await.abort(plan_id) {
                    log_abort_failure(event, &abort_err);
                }
                Err(err)
            }
        }
    }
}

fn log_abort_failure(event: RoundEvent, err: &AbortError) {
    warn!(event = ?event, error = ?err, "failed to abort transition after work error");
}
