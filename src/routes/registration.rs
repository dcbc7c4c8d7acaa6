use std::convert::Infallible;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, Sse},
    routing::{get, post},
};
use axum_valid::Valid;
use futures::Stream;
use uuid::Uuid;

use crate::{
    dto::registration::{
        GrantRequest, GrantResponse, InviteRequest, LoginRequest, ModeRequest,
        RegistrationView, SessionCreatedResponse, TeamNameCheckQuery, TeamNameCheckResponse,
        TeamNameRequest,
    },
    error::AppError,
    services::{registration, sse_service},
    state::SharedState,
};

type ViewResult = Result<Json<RegistrationView>, AppError>;

/// Registration session endpoints driving one team formation controller each.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/sessions", post(create_session))
        .route("/sessions/{id}", get(get_session).delete(close_session))
        .route("/sessions/{id}/events", get(session_events))
        .route("/sessions/{id}/login", post(login))
        .route("/sessions/{id}/logout", post(logout))
        .route("/sessions/{id}/mode", post(select_mode))
        .route("/sessions/{id}/solo/confirm", post(confirm_solo))
        .route("/sessions/{id}/duo/invite", post(send_invite))
        .route("/sessions/{id}/duo/cancel", post(cancel_invite))
        .route("/sessions/{id}/duo/confirm", post(confirm_duo))
        .route("/sessions/{id}/invite/accept", post(accept_invite))
        .route("/sessions/{id}/invite/reject", post(reject_invite))
        .route("/sessions/{id}/team-name/check", get(check_team_name))
        .route("/sessions/{id}/team-name", post(set_team_name))
        .route("/sessions/{id}/back", post(go_back))
        .route("/sessions/{id}/admin/grant", post(grant_registration))
}

/// Open a signed-out registration session.
#[utoipa::path(
    post,
    path = "/sessions",
    tag = "registration",
    responses((status = 201, description = "Session created", body = SessionCreatedResponse))
)]
pub async fn create_session(
    State(state): State<SharedState>,
) -> (StatusCode, Json<SessionCreatedResponse>) {
    let controller = registration::create_session(&state);
    (
        StatusCode::CREATED,
        Json(SessionCreatedResponse {
            session_id: controller.id(),
            view: controller.view(),
        }),
    )
}

/// Current view of a session.
#[utoipa::path(
    get,
    path = "/sessions/{id}",
    tag = "registration",
    params(("id" = Uuid, Path, description = "Session identifier")),
    responses(
        (status = 200, description = "Current view", body = RegistrationView),
        (status = 404, description = "Unknown session")
    )
)]
pub async fn get_session(State(state): State<SharedState>, Path(id): Path<Uuid>) -> ViewResult {
    Ok(Json(registration::find_session(&state, id)?.view()))
}

/// Close a session and stop its listeners.
#[utoipa::path(
    delete,
    path = "/sessions/{id}",
    tag = "registration",
    params(("id" = Uuid, Path, description = "Session identifier")),
    responses(
        (status = 204, description = "Session closed"),
        (status = 404, description = "Unknown session")
    )
)]
pub async fn close_session(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    registration::close_session(&state, id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Stream the session view after every change.
#[utoipa::path(
    get,
    path = "/sessions/{id}/events",
    tag = "registration",
    params(("id" = Uuid, Path, description = "Session identifier")),
    responses((status = 200, description = "Session SSE stream", content_type = "text/event-stream", body = String))
)]
pub async fn session_events(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let controller = registration::find_session(&state, id)?;
    Ok(sse_service::session_stream(
        controller,
        state.degraded_watcher(),
    ))
}

/// Sign in, verify the ticket and resume any stored invitation.
#[utoipa::path(
    post,
    path = "/sessions/{id}/login",
    tag = "registration",
    params(("id" = Uuid, Path, description = "Session identifier")),
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Signed in", body = RegistrationView),
        (status = 401, description = "Invalid credentials"),
        (status = 403, description = "No valid ticket")
    )
)]
pub async fn login(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Valid(Json(body)): Valid<Json<LoginRequest>>,
) -> ViewResult {
    let controller = registration::find_session(&state, id)?;
    Ok(Json(controller.sign_in(&body.email, &body.password).await?))
}

/// Sign out; stored invitations are left untouched.
#[utoipa::path(
    post,
    path = "/sessions/{id}/logout",
    tag = "registration",
    params(("id" = Uuid, Path, description = "Session identifier")),
    responses((status = 200, description = "Signed out", body = RegistrationView))
)]
pub async fn logout(State(state): State<SharedState>, Path(id): Path<Uuid>) -> ViewResult {
    let controller = registration::find_session(&state, id)?;
    Ok(Json(controller.reset().await?))
}

/// Choose solo or duo.
#[utoipa::path(
    post,
    path = "/sessions/{id}/mode",
    tag = "registration",
    params(("id" = Uuid, Path, description = "Session identifier")),
    request_body = ModeRequest,
    responses(
        (status = 200, description = "Mode selected", body = RegistrationView),
        (status = 409, description = "Not on the mode selection step")
    )
)]
pub async fn select_mode(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Valid(Json(body)): Valid<Json<ModeRequest>>,
) -> ViewResult {
    let controller = registration::find_session(&state, id)?;
    Ok(Json(controller.select_mode(body.mode.into()).await?))
}

/// Confirm a solo entry.
#[utoipa::path(
    post,
    path = "/sessions/{id}/solo/confirm",
    tag = "registration",
    params(("id" = Uuid, Path, description = "Session identifier")),
    responses(
        (status = 200, description = "Solo registration confirmed", body = RegistrationView),
        (status = 409, description = "Already in an invitation")
    )
)]
pub async fn confirm_solo(State(state): State<SharedState>, Path(id): Path<Uuid>) -> ViewResult {
    let controller = registration::find_session(&state, id)?;
    Ok(Json(controller.confirm_solo().await?))
}

/// Invite a registered partner by email.
#[utoipa::path(
    post,
    path = "/sessions/{id}/duo/invite",
    tag = "registration",
    params(("id" = Uuid, Path, description = "Session identifier")),
    request_body = InviteRequest,
    responses(
        (status = 200, description = "Invitation sent", body = RegistrationView),
        (status = 404, description = "No user with this email"),
        (status = 409, description = "Inviter or invitee already in an invitation")
    )
)]
pub async fn send_invite(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Valid(Json(body)): Valid<Json<InviteRequest>>,
) -> ViewResult {
    let controller = registration::find_session(&state, id)?;
    Ok(Json(controller.send_invite(&body.email).await?))
}

/// Withdraw the outgoing invitation.
#[utoipa::path(
    post,
    path = "/sessions/{id}/duo/cancel",
    tag = "registration",
    params(("id" = Uuid, Path, description = "Session identifier")),
    responses((status = 200, description = "Invitation cancelled", body = RegistrationView))
)]
pub async fn cancel_invite(State(state): State<SharedState>, Path(id): Path<Uuid>) -> ViewResult {
    let controller = registration::find_session(&state, id)?;
    Ok(Json(controller.cancel_invite().await?))
}

/// Move on to naming once the partner accepted.
#[utoipa::path(
    post,
    path = "/sessions/{id}/duo/confirm",
    tag = "registration",
    params(("id" = Uuid, Path, description = "Session identifier")),
    responses(
        (status = 200, description = "Moved on to naming the team", body = RegistrationView),
        (status = 409, description = "Invitation not accepted yet")
    )
)]
pub async fn confirm_duo(State(state): State<SharedState>, Path(id): Path<Uuid>) -> ViewResult {
    let controller = registration::find_session(&state, id)?;
    Ok(Json(controller.confirm_duo().await?))
}

/// Accept the incoming invitation.
#[utoipa::path(
    post,
    path = "/sessions/{id}/invite/accept",
    tag = "registration",
    params(("id" = Uuid, Path, description = "Session identifier")),
    responses(
        (status = 200, description = "Invitation accepted", body = RegistrationView),
        (status = 409, description = "Invitation no longer pending")
    )
)]
pub async fn accept_invite(State(state): State<SharedState>, Path(id): Path<Uuid>) -> ViewResult {
    let controller = registration::find_session(&state, id)?;
    Ok(Json(controller.accept_invite().await?))
}

/// Decline the incoming invitation.
#[utoipa::path(
    post,
    path = "/sessions/{id}/invite/reject",
    tag = "registration",
    params(("id" = Uuid, Path, description = "Session identifier")),
    responses((status = 200, description = "Invitation rejected", body = RegistrationView))
)]
pub async fn reject_invite(State(state): State<SharedState>, Path(id): Path<Uuid>) -> ViewResult {
    let controller = registration::find_session(&state, id)?;
    Ok(Json(controller.reject_invite().await?))
}

/// Debounced availability check; superseded calls report `SUPERSEDED`.
#[utoipa::path(
    get,
    path = "/sessions/{id}/team-name/check",
    tag = "registration",
    params(("id" = Uuid, Path, description = "Session identifier"), TeamNameCheckQuery),
    responses((status = 200, description = "Availability of the name", body = TeamNameCheckResponse))
)]
pub async fn check_team_name(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Query(query): Query<TeamNameCheckQuery>,
) -> Result<Json<TeamNameCheckResponse>, AppError> {
    let controller = registration::find_session(&state, id)?;
    Ok(Json(controller.check_team_name(&query.name).await?))
}

/// Claim the team name and complete the registration.
#[utoipa::path(
    post,
    path = "/sessions/{id}/team-name",
    tag = "registration",
    params(("id" = Uuid, Path, description = "Session identifier")),
    request_body = TeamNameRequest,
    responses(
        (status = 200, description = "Team registered", body = RegistrationView),
        (status = 409, description = "Name already taken")
    )
)]
pub async fn set_team_name(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Valid(Json(body)): Valid<Json<TeamNameRequest>>,
) -> ViewResult {
    let controller = registration::find_session(&state, id)?;
    Ok(Json(controller.set_team_name(&body.name).await?))
}

/// Return to the previous step.
#[utoipa::path(
    post,
    path = "/sessions/{id}/back",
    tag = "registration",
    params(("id" = Uuid, Path, description = "Session identifier")),
    responses(
        (status = 200, description = "Moved one step back", body = RegistrationView),
        (status = 409, description = "No previous step")
    )
)]
pub async fn go_back(State(state): State<SharedState>, Path(id): Path<Uuid>) -> ViewResult {
    let controller = registration::find_session(&state, id)?;
    Ok(Json(controller.go_back().await?))
}

/// Mark another user as pre-registered; admins only.
#[utoipa::path(
    post,
    path = "/sessions/{id}/admin/grant",
    tag = "registration",
    params(("id" = Uuid, Path, description = "Session identifier")),
    request_body = GrantRequest,
    responses(
        (status = 200, description = "Registration granted", body = GrantResponse),
        (status = 403, description = "Signed-in user is not an admin"),
        (status = 404, description = "No user with this email")
    )
)]
pub async fn grant_registration(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Valid(Json(body)): Valid<Json<GrantRequest>>,
) -> Result<Json<GrantResponse>, AppError> {
    let controller = registration::find_session(&state, id)?;
    let profile = controller.grant_registration(&body.email).await?;
    Ok(Json(profile.into()))
}
