use std::time::Instant;

use thiserror::Error;
use uuid::Uuid;

/// Phases a lobby goes through on its way into a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundPhase {
    /// Sessions gather and declare readiness.
    Lobby,
    /// The host committed; the roster is frozen while characters are generated.
    Generating,
    /// The round is being played. Terminal for this engine.
    RoundActive,
}

/// Events that can be applied to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundEvent {
    /// Host commits the current ready set.
    Commit {
        /// Size of the frozen roster.
        size: usize,
        /// Whether the lower participant bound was bypassed.
        forced: bool,
    },
    /// Character generation finished.
    Generated,
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    pub from: RoundPhase,
    pub event: RoundEvent,
}

/// Errors that can occur when planning a state machine transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// A transition is already pending and must be applied or aborted.
    AlreadyPending,
    /// The requested transition is not valid from the current phase.
    InvalidTransition(InvalidTransition),
}

/// Errors that can occur when applying a planned state machine transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyError {
    NoPending,
    IdMismatch { expected: PlanId, got: PlanId },
    PhaseMismatch { expected: RoundPhase, actual: RoundPhase },
    VersionMismatch { expected: usize, actual: usize },
}

/// Errors that can occur when aborting a planned state machine transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortError {
    NoPending,
    IdMismatch { expected: PlanId, got: PlanId },
}

/// Unique identifier for a planned state transition.
pub type PlanId = Uuid;

/// A validated transition that has not been applied yet.
#[derive(Debug, Clone)]
pub struct Plan {
    pub id: PlanId,
    pub from: RoundPhase,
    pub to: RoundPhase,
    pub event: RoundEvent,
    /// Version number after applying this transition.
    pub version_next: usize,
    pub pending_since: Instant,
}

/// Snapshot of the current state machine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub phase: RoundPhase,
    pub version: usize,
    pub pending: Option<RoundPhase>,
}

/// Lobby to round flow. Transitions are planned first, then applied once their side
/// effects succeeded, or aborted otherwise.
#[derive(Debug, Clone)]
pub struct RoundStateMachine {
    phase: RoundPhase,
    version: usize,
    pending: Option<Plan>,
}

impl Default for RoundStateMachine {
    fn default() -> Self {
        Self {
            phase: RoundPhase::Lobby,
            version: 0,
            pending: None,
        }
    }
}

impl RoundStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> RoundPhase {
        self.phase
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            phase: self.phase,
            version: self.version,
            pending: self.pending.as_ref().map(|plan| plan.to),
        }
    }

    /// Validate that `event` applies to the current phase and reserve the transition.
    pub fn plan(&mut self, event: RoundEvent) -> Result<Plan, PlanError> {
        if self.pending.is_some() {
            return Err(PlanError::AlreadyPending);
        }

        let next = self
            .compute_transition(event)
            .map_err(PlanError::InvalidTransition)?;

        let plan = Plan {
            id: Uuid::new_v4(),
            from: self.phase,
            to: next,
            event,
            version_next: self.version + 1,
            pending_since: Instant::now(),
        };

        self.pending = Some(plan.clone());

        Ok(plan)
    }

    /// Apply a planned transition and return the new phase.
    pub fn apply(&mut self, plan_id: PlanId) -> Result<RoundPhase, ApplyError> {
        let plan = self.pending.take().ok_or(ApplyError::NoPending)?;

        if plan.id != plan_id {
            let expected = plan.id;
            self.pending = Some(plan);
            return Err(ApplyError::IdMismatch {
                expected,
                got: plan_id,
            });
        }

        if self.phase != plan.from {
            return Err(ApplyError::PhaseMismatch {
                expected: plan.from,
                actual: self.phase,
            });
        }

        if self.version + 1 != plan.version_next {
            return Err(ApplyError::VersionMismatch {
                expected: plan.version_next,
                actual: self.version + 1,
            });
        }

        self.phase = plan.to;
        self.version = plan.version_next;

        Ok(self.phase)
    }

    /// Drop a planned transition, leaving the phase untouched.
    pub fn abort(&mut self, plan_id: PlanId) -> Result<(), AbortError> {
        let plan = self.pending.as_ref().ok_or(AbortError::NoPending)?;

        if plan.id != plan_id {
            return Err(AbortError::IdMismatch {
                expected: plan.id,
                got: plan_id,
            });
        }

        self.pending = None;
        Ok(())
    }

    fn compute_transition(&self, event: RoundEvent) -> Result<RoundPhase, InvalidTransition> {
        match (self.phase, event) {
            (RoundPhase::Lobby, RoundEvent::Commit { size, .. }) if size > 0 => {
                Ok(RoundPhase::Generating)
            }
            (RoundPhase::Generating, RoundEvent::Generated) => Ok(RoundPhase::RoundActive),
            (from, event) => Err(InvalidTransition { from, event }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COMMIT: RoundEvent = RoundEvent::Commit {
        size: 4,
        forced: false,
    };

    fn apply(sm: &mut RoundStateMachine, event: RoundEvent) -> RoundPhase {
        let plan = sm.plan(event).unwrap();
        sm.apply(plan.id).unwrap()
    }

    #[test]
    fn initial_state_is_lobby() {
        assert_eq!(RoundStateMachine::new().phase(), RoundPhase::Lobby);
    }

    #[test]
    fn happy_path_reaches_round_active() {
        let mut sm = RoundStateMachine::new();
        assert_eq!(apply(&mut sm, COMMIT), RoundPhase::Generating);
        assert_eq!(apply(&mut sm, RoundEvent::Generated), RoundPhase::RoundActive);
        assert_eq!(sm.snapshot().version, 2);
    }

    #[test]
    fn round_active_is_terminal() {
        let mut sm = RoundStateMachine::new();
        apply(&mut sm, COMMIT);
        apply(&mut sm, RoundEvent::Generated);

        for event in [COMMIT, RoundEvent::Generated] {
            match sm.plan(event).unwrap_err() {
                PlanError::InvalidTransition(invalid) => {
                    assert_eq!(invalid.from, RoundPhase::RoundActive)
                }
                other => panic!("unexpected error: {other:?}"),
            }
        }
    }

    #[test]
    fn empty_roster_cannot_commit() {
        let mut sm = RoundStateMachine::new();
        let err = sm
            .plan(RoundEvent::Commit {
                size: 0,
                forced: true,
            })
            .unwrap_err();
        assert!(matches!(err, PlanError::InvalidTransition(_)));
    }

    #[test]
    fn second_plan_is_refused_while_pending() {
        let mut sm = RoundStateMachine::new();
        let plan = sm.plan(COMMIT).unwrap();
        assert_eq!(sm.plan(COMMIT).unwrap_err(), PlanError::AlreadyPending);
        assert_eq!(sm.snapshot().pending, Some(RoundPhase::Generating));
        sm.apply(plan.id).unwrap();
    }

    #[test]
    fn mismatched_plan_id_keeps_pending() {
        let mut sm = RoundStateMachine::new();
        let plan = sm.plan(COMMIT).unwrap();
        let err = sm.apply(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, ApplyError::IdMismatch { .. }));
        assert_eq!(sm.apply(plan.id).unwrap(), RoundPhase::Generating);
    }

    #[test]
    fn abort_clears_pending() {
        let mut sm = RoundStateMachine::new();
        let plan = sm.plan(COMMIT).unwrap();
        sm.abort(plan.id).unwrap();
        assert!(sm.pending.is_none());
        assert_eq!(sm.phase(), RoundPhase::Lobby);
    }
}
