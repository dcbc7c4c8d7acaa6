//! HTTP route trees.

use axum::Router;

use crate::state::SharedState;

/// Swagger UI and the OpenAPI document.
pub mod docs;
/// Health check.
pub mod health;
/// Public standings.
pub mod leaderboard;
/// Registration sessions and admin grants.
pub mod registration;
/// Draft submission and lock-in.
pub mod sandbox;

/// Compose all route trees, wiring in shared state and documentation routes.
pub fn router(state: SharedState) -> Router<()> {
    let api_router = health::router()
        .merge(registration::router())
        .merge(leaderboard::router())
        .merge(sandbox::router())
        .merge(docs::router());

    api_router.with_state(state)
}
