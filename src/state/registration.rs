//! Registration step machine with plan, apply and abort.

use thiserror::Error;
use uuid::Uuid;

use crate::dao::models::TeamMode;

/// Steps a user walks through to register a team.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationStep {
    /// No resolved identity.
    Login,
    /// Identity known and no invitation occupies the user.
    ModeSelection,
    /// Solo entrant confirming they register alone.
    SoloConfirmation,
    /// Inviter composing or managing an outgoing invitation.
    DuoInvite,
    /// Invitee reviewing, or waiting on, an incoming invitation.
    InviteReceived,
    /// Naming the team (solo entrant or duo inviter).
    TeamName,
    /// Team registered.
    Completed,
}

/// Where a freshly resolved identity resumes, decided from the stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumePoint {
    /// Nothing stored, or only a terminal record.
    NoInvite,
    /// Active record sent by the user.
    AsInviter,
    /// Active record addressed to the user.
    AsInvitee,
    /// Completed record in the given mode.
    Registered(TeamMode),
}

/// Inputs of the registration state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationEvent {
    /// Identity became known and the stored record was inspected.
    IdentityResolved(ResumePoint),
    /// Identity dropped (logout or provider sign-out).
    SignedOut,
    /// User picked solo or duo.
    ModeChosen(TeamMode),
    /// Solo entrant confirmed and moves on to naming.
    SoloConfirmed,
    /// Inviter proceeds to naming once the partner accepted.
    DuoConfirmed,
    /// Invitee turned the invitation down.
    InviteRejected,
    /// Invitee's record disappeared (inviter cancelled).
    InviteWithdrawn,
    /// Invitee observed the record completed by the inviter.
    PartnerCompleted,
    /// Team created and the record completed.
    TeamNamed,
    /// Return to the previous step.
    Back,
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    /// The step the machine was in when the event was received.
    pub from: RegistrationStep,
    /// The event that cannot be applied from this step.
    pub event: RegistrationEvent,
}

/// Errors that can occur when planning a transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    /// A transition is already pending and must be applied or aborted.
    #[error("a transition is already pending")]
    AlreadyPending,
    /// The event is not allowed from the current step.
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
}

/// Errors that can occur when applying or aborting a planned transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplyError {
    /// Nothing was planned.
    #[error("no transition is pending")]
    NoPending,
    /// Another plan is pending.
    #[error("plan {got} does not match pending plan {expected}")]
    IdMismatch {
        /// Pending plan.
        expected: PlanId,
        /// Plan passed by the caller.
        got: PlanId,
    },
}

/// Identifier of a [`Plan`].
pub type PlanId = Uuid;

/// A validated transition that has not been applied yet.
#[derive(Debug, Clone)]
pub struct Plan {
    /// Matches the pending plan until applied or aborted.
    pub id: PlanId,

    /// Step when the plan was made.
    pub from: RegistrationStep,
    /// Step once applied.
    pub to: RegistrationStep,
    /// Event that produced the plan.
    pub event: RegistrationEvent,
    /// Mode in effect once the plan is applied.
    pub mode: Option<TeamMode>,
}

/// Per-session registration state machine.
///
/// `version` increases on every applied transition; asynchronous callbacks
/// capture it when they are set up and are ignored once it moved on.
#[derive(Debug, Clone)]
pub struct RegistrationStateMachine {
    step: RegistrationStep,
    mode: Option<TeamMode>,
    version: u64,
    pending: Option<Plan>,
}

impl Default for RegistrationStateMachine {
    fn default() -> Self {
        Self {
            step: RegistrationStep::Login,
            mode: None,
            version: 0,
            pending: None,
        }
    }
}

impl RegistrationStateMachine {
    /// Machine at the login step.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current step.
    pub fn step(&self) -> RegistrationStep {
        self.step
    }

    /// Team composition chosen for this session, if any.
    pub fn mode(&self) -> Option<TeamMode> {
        self.mode
    }

    /// Number of applied transitions.
    pub fn version(&self) -> u64 {

        self.version
    }

    /// Validate `event` and reserve the transition until it is applied or aborted.
    pub fn plan(&mut self, event: RegistrationEvent) -> Result<Plan, PlanError> {
        if self.pending.is_some() {
            return Err(PlanError::AlreadyPending);
        }

        let (to, mode) = self.compute_transition(event)?;
        let plan = Plan {
            id: Uuid::new_v4(),
            from: self.step,
            to,
            event,
            mode,
        };
        self.pending = Some(plan.clone());
        Ok(plan)
    }

    /// Apply the pending plan and return the new step.
    pub fn apply(&mut self, plan_id: PlanId) -> Result<RegistrationStep, ApplyError> {
        let plan = self.pending.take().ok_or(ApplyError::NoPending)?;
        if plan.id != plan_id {
            let expected = plan.id;
            self.pending = Some(plan);
            return Err(ApplyError::IdMismatch {
                expected,
                got: plan_id,
            });
        }

        self.step = plan.to;
        self.mode = plan.mode;
        self.version += 1;
        Ok(self.step)
    }

    /// Drop the pending plan, leaving the step untouched.
    pub fn abort(&mut self, plan_id: PlanId) -> Result<(), ApplyError> {
        let plan = self.pending.as_ref().ok_or(ApplyError::NoPending)?;
        if plan.id != plan_id {
            return Err(ApplyError::IdMismatch {
                expected: plan.id,
                got: plan_id,
            });
        }
        self.pending = None;
        Ok(())
    }

    /// Plan and apply in one go, for transitions with no side effect to wait on.
    pub fn fire(&mut self, event: RegistrationEvent) -> Result<RegistrationStep, PlanError> {
        let plan = self.plan(event)?;
        // the plan was just installed, so applying it cannot fail
        self.apply(plan.id).map_err(|_| PlanError::AlreadyPending)
    }

    fn compute_transition(
        &self,
        event: RegistrationEvent,
    ) -> Result<(RegistrationStep, Option<TeamMode>), InvalidTransition> {
        use RegistrationEvent as E;
        use RegistrationStep as S;

        let next = match (self.step, event) {
            (_, E::IdentityResolved(resume)) => match resume {
                ResumePoint::NoInvite => (S::ModeSelection, None),
                ResumePoint::AsInviter => (S::DuoInvite, Some(TeamMode::Duo)),
                ResumePoint::AsInvitee => (S::InviteReceived, Some(TeamMode::Duo)),
                ResumePoint::Registered(mode) => (S::Completed, Some(mode)),
            },
            (_, E::SignedOut) => (S::Login, None),
            (S::ModeSelection, E::ModeChosen(TeamMode::Solo)) => {
                (S::SoloConfirmation, Some(TeamMode::Solo))
            }
            (S::ModeSelection, E::ModeChosen(TeamMode::Duo)) => (S::DuoInvite, Some(TeamMode::Duo)),
            (S::SoloConfirmation, E::SoloConfirmed) => (S::TeamName, self.mode),
            (S::DuoInvite, E::DuoConfirmed) => (S::TeamName, self.mode),
            (S::InviteReceived, E::InviteRejected | E::InviteWithdrawn) => (S::ModeSelection, None),
            (S::InviteReceived, E::PartnerCompleted) => (S::Completed, self.mode),
            (S::TeamName, E::TeamNamed) => (S::Completed, self.mode),
            (S::SoloConfirmation | S::DuoInvite, E::Back) => (S::ModeSelection, None),
            (S::ModeSelection, E::Back) => (S::Login, None),
            (S::TeamName, E::Back) => match self.mode {
                Some(TeamMode::Solo) => (S::SoloConfirmation, self.mode),
                Some(TeamMode::Duo) => (S::DuoInvite, self.mode),
                None => return Err(InvalidTransition { from: self.step, event }),
            },
            (from, event) => return Err(InvalidTransition { from, event }),
        };

        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(sm: &mut RegistrationStateMachine, event: RegistrationEvent) -> RegistrationStep {
        let plan = sm.plan(event).unwrap();
        sm.apply(plan.id).unwrap()
    }

    #[test]
    fn initial_step_is_login() {
        let sm = RegistrationStateMachine::new();
        assert_eq!(sm.step(), RegistrationStep::Login);
        assert_eq!(sm.version(), 0);
    }

    #[test]
    fn solo_happy_path() {
        let mut sm = RegistrationStateMachine::new();
        assert_eq!(
            apply(&mut sm, RegistrationEvent::IdentityResolved(ResumePoint::NoInvite)),
            RegistrationStep::ModeSelection
        );
        assert_eq!(
            apply(&mut sm, RegistrationEvent::ModeChosen(TeamMode::Solo)),
            RegistrationStep::SoloConfirmation
        );
        assert_eq!(
            apply(&mut sm, RegistrationEvent::SoloConfirmed),
            RegistrationStep::TeamName
        );
        assert_eq!(
            apply(&mut sm, RegistrationEvent::TeamNamed),
            RegistrationStep::Completed
        );
        assert_eq!(sm.mode(), Some(TeamMode::Solo));
        assert_eq!(sm.version(), 4);
    }

    #[test]
    fn invitee_resumes_and_completes_through_partner() {
        let mut sm = RegistrationStateMachine::new();
        apply(&mut sm, RegistrationEvent::IdentityResolved(ResumePoint::AsInvitee));
        assert_eq!(sm.step(), RegistrationStep::InviteReceived);

        let err = sm.plan(RegistrationEvent::TeamNamed).unwrap_err();
        assert_eq!(
            err,
            PlanError::InvalidTransition(InvalidTransition {
                from: RegistrationStep::InviteReceived,
                event: RegistrationEvent::TeamNamed,
            })
        );

        assert_eq!(
            apply(&mut sm, RegistrationEvent::PartnerCompleted),
            RegistrationStep::Completed
        );
    }

    #[test]
    fn back_from_team_name_follows_mode() {
        let mut sm = RegistrationStateMachine::new();
        apply(&mut sm, RegistrationEvent::IdentityResolved(ResumePoint::NoInvite));
        apply(&mut sm, RegistrationEvent::ModeChosen(TeamMode::Duo));
        apply(&mut sm, RegistrationEvent::DuoConfirmed);
        assert_eq!(
            apply(&mut sm, RegistrationEvent::Back),
            RegistrationStep::DuoInvite
        );
        assert_eq!(
            apply(&mut sm, RegistrationEvent::Back),
            RegistrationStep::ModeSelection
        );
        assert_eq!(sm.mode(), None);
        assert_eq!(apply(&mut sm, RegistrationEvent::Back), RegistrationStep::Login);
    }

    #[test]
    fn aborted_plan_leaves_step_and_version() {
        let mut sm = RegistrationStateMachine::new();
        apply(&mut sm, RegistrationEvent::IdentityResolved(ResumePoint::NoInvite));
        let version = sm.version();

        let plan = sm.plan(RegistrationEvent::ModeChosen(TeamMode::Solo)).unwrap();
        assert_eq!(
            sm.plan(RegistrationEvent::Back).unwrap_err(),
            PlanError::AlreadyPending
        );
        sm.abort(plan.id).unwrap();

        assert_eq!(sm.step(), RegistrationStep::ModeSelection);
        assert_eq!(sm.version(), version);
        assert_eq!(sm.apply(plan.id).unwrap_err(), ApplyError::NoPending);
    }

    #[test]
    fn sign_out_is_valid_everywhere() {
        let mut sm = RegistrationStateMachine::new();
        apply(&mut sm, RegistrationEvent::IdentityResolved(ResumePoint::Registered(
            TeamMode::Solo,
        )));
        assert_eq!(sm.step(), RegistrationStep::Completed);
        let version = sm.version();
        assert_eq!(
            apply(&mut sm, RegistrationEvent::SignedOut),
            RegistrationStep::Login
        );
        assert_eq!(sm.mode(), None);
        assert_eq!(sm.version(), version + 1);
    }
}
