use axum::{
    Json, Router,
    extract::{Query, State},
    routing::get,
};
use axum_valid::Valid;

use crate::{
    dto::leaderboard::{LeaderboardQuery, LeaderboardResponse},
    error::AppError,
    services::leaderboard_service,
    state::SharedState,
};

#[utoipa::path(
    get,
    path = "/leaderboard",
    tag = "leaderboard",
    params(LeaderboardQuery),
    responses(
        (status = 200, description = "Standings with player names", body = LeaderboardResponse),
        (status = 503, description = "Document store unavailable")
    )
)]
/// Return the top of the tournament standings.
pub async fn leaderboard(
    State(state): State<SharedState>,
    Valid(Query(query)): Valid<Query<LeaderboardQuery>>,
) -> Result<Json<LeaderboardResponse>, AppError> {
    let board = leaderboard_service::leaderboard(&state, query.limit).await?;
    Ok(Json(board.as_ref().clone()))
}

/// Leaderboard routes.
pub fn router() -> Router<SharedState> {

    Router::<SharedState>::new().route("/leaderboard", get(leaderboard))
}
