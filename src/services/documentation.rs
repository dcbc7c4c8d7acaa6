use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for the registration backend.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::registration::create_session,
        crate::routes::registration::get_session,
        crate::routes::registration::close_session,
        crate::routes::registration::session_events,
        crate::routes::registration::login,
        crate::routes::registration::logout,
        crate::routes::registration::select_mode,
        crate::routes::registration::confirm_solo,
        crate::routes::registration::send_invite,
        crate::routes::registration::cancel_invite,
        crate::routes::registration::confirm_duo,
        crate::routes::registration::accept_invite,
        crate::routes::registration::reject_invite,
        crate::routes::registration::check_team_name,
        crate::routes::registration::set_team_name,
        crate::routes::registration::go_back,
        crate::routes::registration::grant_registration,
        crate::routes::leaderboard::leaderboard,
        crate::routes::sandbox::submit_draft,
        crate::routes::sandbox::lock_selection,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::registration::RegistrationView,
            crate::dto::registration::StepDto,
            crate::dto::registration::ModeDto,
            crate::dto::registration::DuoInviteStatus,
            crate::dto::registration::InviteSummary,
            crate::dto::registration::SessionCreatedResponse,
            crate::dto::registration::TeamNameCheckResponse,
            crate::dto::registration::NameAvailability,
            crate::dto::registration::GrantResponse,
            crate::dto::leaderboard::LeaderboardResponse,
            crate::dto::sandbox::SubmitDraftResponse,
            crate::dto::sandbox::LockSelectionResponse,
            crate::dto::sse::Handshake,
            crate::dto::sse::SystemStatus,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "registration", description = "Team formation sessions"),
        (name = "leaderboard", description = "Tournament standings"),
        (name = "sandbox", description = "Strategy drafts forwarded to the match engine"),
    )
)]
/// OpenAPI document of every route.
pub struct ApiDoc;


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_route_is_documented() {
        let doc = ApiDoc::openapi();
        for path in [
            "/healthcheck",
            "/sessions",
            "/sessions/{id}/events",
            "/sessions/{id}/team-name/check",
            "/leaderboard",
            "/sandbox/lock",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }
}
