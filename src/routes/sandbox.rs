use axum::{Json, Router, extract::State, routing::post};
use axum_valid::Valid;

use crate::{
    dto::sandbox::{
        LockSelectionRequest, LockSelectionResponse, SubmitDraftRequest, SubmitDraftResponse,
    },
    error::AppError,
    services::sandbox_service,
    state::SharedState,
};

/// Simulation sandbox endpoints backed by the match engine.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/sandbox/drafts", post(submit_draft))
        .route("/sandbox/lock", post(lock_selection))
}

/// Run a strategy draft through the match engine.
#[utoipa::path(
    post,
    path = "/sandbox/drafts",
    tag = "sandbox",
    request_body = SubmitDraftRequest,
    responses(
        (status = 200, description = "Draft simulated", body = SubmitDraftResponse),
        (status = 400, description = "Invalid draft or rejected by the engine"),
        (status = 404, description = "Unknown team"),
        (status = 502, description = "Match engine failure")
    )
)]
pub async fn submit_draft(
    State(state): State<SharedState>,
    Valid(Json(body)): Valid<Json<SubmitDraftRequest>>,
) -> Result<Json<SubmitDraftResponse>, AppError> {
    Ok(Json(sandbox_service::submit_draft(&state, body).await?))
}

/// Lock a draft in as the team's final strategy.
#[utoipa::path(
    post,
    path = "/sandbox/lock",
    tag = "sandbox",
    request_body = LockSelectionRequest,
    responses(
        (status = 200, description = "Draft locked as final strategy", body = LockSelectionResponse),
        (status = 404, description = "Unknown team"),
        (status = 502, description = "Match engine failure")
    )
)]
pub async fn lock_selection(
    State(state): State<SharedState>,
    Valid(Json(body)): Valid<Json<LockSelectionRequest>>,
) -> Result<Json<LockSelectionResponse>, AppError> {
    Ok(Json(sandbox_service::lock_selection(&state, body).await?))
}
