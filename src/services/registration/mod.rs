//! Registry of registration sessions, one team formation controller each.

pub mod controller;

use std::time::Duration;

use tokio::time::interval;
use tracing::{debug, info};
use uuid::Uuid;

pub use controller::{ControllerSettings, TeamFormationController};

use crate::{config::AppConfig, error::ServiceError, state::SharedState};

const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

impl From<&AppConfig> for ControllerSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            team_name_min_length: config.team_name_min_length,
            name_check_debounce: config.name_check_debounce,
            eligible_event_ids: config.eligible_event_ids.clone(),
        }
    }
}

/// Open a new signed-out session.
pub fn create_session(state: &SharedState) -> TeamFormationController {
    let controller = TeamFormationController::new(
        state.stores().clone(),
        state.identity().clone(),
        state.config().into(),
    );
    state.sessions().insert(controller.id(), controller.clone());
    info!(session = %controller.id(), active = state.sessions().len(), "registration session opened");
    controller
}

/// Look a session up for a client request, marking it active.
pub fn find_session(state: &SharedState, id: Uuid) -> Result<TeamFormationController, ServiceError> {
    let controller = state
        .sessions()
        .get(&id)
        .map(|entry| entry.value().clone())
        .ok_or_else(|| ServiceError::NotFound(format!("session `{id}`")))?;
    controller.touch();
    Ok(controller)
}

/// Forget a session; its subscriptions stop once the last handle is gone.
pub fn close_session(state: &SharedState, id: Uuid) -> Result<(), ServiceError> {
    state
        .sessions()
        .remove(&id)
        .map(|_| info!(session = %id, "registration session closed"))
        .ok_or_else(|| ServiceError::NotFound(format!("session `{id}`")))
}

/// Close every session idle for longer than the configured timeout and
/// return how many were closed.
pub fn sweep_idle_sessions(state: &SharedState) -> usize {
    let idle = state.config().session_idle_timeout;
    let mut closed = 0;
    state.sessions().retain(|id, controller| {
        if controller.is_idle(idle) {
            debug!(session = %id, "closing idle registration session");
            closed += 1;
            false
        } else {
            true
        }
    });
    closed
}

/// Periodically close idle sessions; runs for the lifetime of the process.
pub async fn run_idle_sweeper(state: SharedState) {
    let period = state.config().session_idle_timeout.min(MAX_SWEEP_INTERVAL);
    let mut ticker = interval(period);
    loop {
        ticker.tick().await;
        let closed = sweep_idle_sessions(&state);
        if closed > 0 {
            info!(closed, active = state.sessions().len(), "closed idle registration sessions");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::time::advance;

    use super::*;
    use crate::{identity::StaticIdentityProvider, state::AppState};

    #[tokio::test(start_paused = true)]
    async fn idle_sessions_without_listeners_are_closed() {
        let state = AppState::new(
            AppConfig::default(),
            Arc::new(StaticIdentityProvider::new(&[])),
        )
        .unwrap();
        let timeout = state.config().session_idle_timeout;

        let abandoned = create_session(&state).id();
        let active = create_session(&state).id();
        let followed = create_session(&state);
        let views = followed.subscribe();

        advance(timeout - Duration::from_secs(1)).await;
        find_session(&state, active).unwrap();
        advance(Duration::from_secs(2)).await;

        assert_eq!(sweep_idle_sessions(&state), 1);
        assert!(find_session(&state, abandoned).is_err());
        assert!(find_session(&state, active).is_ok());
        assert!(find_session(&state, followed.id()).is_ok());

        advance(timeout).await;
        drop(views);
        assert_eq!(sweep_idle_sessions(&state), 2);
        assert!(state.sessions().is_empty());
    }
}
