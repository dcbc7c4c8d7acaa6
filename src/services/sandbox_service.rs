use tracing::info;

use crate::{
    dao::teams::{TeamStore, normalize_team_name},
    dto::sandbox::{
        LockSelectionRequest, LockSelectionResponse, SubmitDraftRequest, SubmitDraftResponse,
    },
    error::ServiceError,
    state::SharedState,
};

/// Make sure the draft belongs to a registered team before calling the engine.
async fn require_team(state: &SharedState, team_name: &str) -> Result<String, ServiceError> {
    let name = normalize_team_name(team_name);
    let store = state.require_document_store().await?;
    if !TeamStore::new(store).exists(&name).await? {
        return Err(ServiceError::NotFound(format!("team `{name}`")));
    }
    Ok(name)
}

/// Simulate a draft against the current field and return the new standings.
pub async fn submit_draft(
    state: &SharedState,
    mut request: SubmitDraftRequest,
) -> Result<SubmitDraftResponse, ServiceError> {
    request.team_name = require_team(state, &request.team_name).await?;
    let response = state.match_engine().submit_draft(&request).await?;
    info!(
        team = %request.team_name,
        draft = %request.draft_id,
        unique = response.is_unique,
        "draft simulated"
    );
    Ok(response)
}

/// Lock a draft as the team's final strategy; the public board changes with it.
pub async fn lock_selection(
    state: &SharedState,
    mut request: LockSelectionRequest,
) -> Result<LockSelectionResponse, ServiceError> {
    request.team_name = require_team(state, &request.team_name).await?;
    let response = state.match_engine().lock_selection(&request).await?;
    state.leaderboard().invalidate();
    info!(
        team = %request.team_name,
        final_name = %response.final_name,
        renamed = response.name_changed,
        "draft locked"
    );
    Ok(response)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::document_store::MemoryDocumentStore,
        identity::static_provider::StaticIdentityProvider,
        state::{AppState, StoreSlot},
    };

    #[tokio::test]
    async fn unknown_team_is_rejected_before_the_engine_is_called() {
        let state = AppState::with_stores(
            AppConfig::default(),
            Arc::new(StaticIdentityProvider::new(&[])),
            StoreSlot::with_store(Arc::new(MemoryDocumentStore::new())),
        )
        .unwrap();

        let request = LockSelectionRequest {
            team_name: "ghost".into(),
            draft_id: "draft_1".into(),
        };
        match lock_selection(&state, request).await {
            Err(ServiceError::NotFound(message)) => assert!(message.contains("GHOST")),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
