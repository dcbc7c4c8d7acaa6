//! DTO definitions for the registration session API.

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dao::models::{InviteEntity, InviteRole, InviteStatus, TeamMode, UserProfileEntity},
    dto::format_system_time,
    identity::UserIdentity,
    state::registration::RegistrationStep,
};

/// Registration step exposed to clients.
#[derive(Debug, Serialize, ToSchema, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepDto {
    /// Waiting for credentials.
    Login,
    /// Choosing between solo and duo.
    ModeSelection,
    /// Confirming a solo entry.
    SoloConfirmation,
    /// Inviting a partner or waiting on their answer.
    DuoInvite,
    /// Answering an invitation from someone else.
    InviteReceived,
    /// Picking the team name.
    TeamName,
    /// Registration is done.
    Completed,
}

impl From<RegistrationStep> for StepDto {
    fn from(value: RegistrationStep) -> Self {
        match value {
            RegistrationStep::Login => StepDto::Login,
            RegistrationStep::ModeSelection => StepDto::ModeSelection,
            RegistrationStep::SoloConfirmation => StepDto::SoloConfirmation,
            RegistrationStep::DuoInvite => StepDto::DuoInvite,
            RegistrationStep::InviteReceived => StepDto::InviteReceived,
            RegistrationStep::TeamName => StepDto::TeamName,
            RegistrationStep::Completed => StepDto::Completed,
        }
    }
}

/// Team composition as sent by clients.
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModeDto {
    /// One player.
    Solo,
    /// Two players.
    Duo,
}

impl From<ModeDto> for TeamMode {
    fn from(value: ModeDto) -> Self {
        match value {
            ModeDto::Solo => TeamMode::Solo,
            ModeDto::Duo => TeamMode::Duo,
        }
    }
}

impl From<TeamMode> for ModeDto {
    fn from(value: TeamMode) -> Self {
        match value {
            TeamMode::Solo => ModeDto::Solo,
            TeamMode::Duo => ModeDto::Duo,
        }
    }
}

/// Sub-state of the inviter's duo view, derived from the stored record.
#[derive(Debug, Serialize, ToSchema, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DuoInviteStatus {
    /// No invitation sent yet.
    #[default]
    Idle,
    /// Waiting on the partner.
    Sent,
    /// The partner accepted.
    Accepted,
    /// The partner declined.
    Rejected,
}

impl From<InviteStatus> for DuoInviteStatus {
    fn from(value: InviteStatus) -> Self {
        match value {
            InviteStatus::Pending => DuoInviteStatus::Sent,
            InviteStatus::Accepted | InviteStatus::Completed => DuoInviteStatus::Accepted,
            InviteStatus::Rejected => DuoInviteStatus::Rejected,
        }
    }
}

/// Stored invitation status.
#[derive(Debug, Serialize, ToSchema, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InviteStatusDto {
    /// Waiting for the invitee.
    Pending,
    /// The invitee agreed.
    Accepted,
    /// The invitee declined.
    Rejected,
    /// The team has a name.
    Completed,
}

impl From<InviteStatus> for InviteStatusDto {
    fn from(value: InviteStatus) -> Self {
        match value {
            InviteStatus::Pending => InviteStatusDto::Pending,
            InviteStatus::Accepted => InviteStatusDto::Accepted,
            InviteStatus::Rejected => InviteStatusDto::Rejected,
            InviteStatus::Completed => InviteStatusDto::Completed,
        }
    }
}

/// Which side of an invitation the viewer is on.
#[derive(Debug, Serialize, ToSchema, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InviteRoleDto {
    /// Sent the invitation.
    Inviter,
    /// Received it.
    Invitee,
}

impl From<InviteRole> for InviteRoleDto {
    fn from(value: InviteRole) -> Self {
        match value {
            InviteRole::Inviter => InviteRoleDto::Inviter,
            InviteRole::Invitee => InviteRoleDto::Invitee,
        }
    }
}

/// Signed-in user.
#[derive(Debug, Serialize, ToSchema, Clone, PartialEq, Eq)]
pub struct UserSummary {
    /// Identity provider id.
    pub uid: String,
    /// Normalised email.
    pub email: String,
    /// Profile name, when the provider has one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl From<&UserIdentity> for UserSummary {
    fn from(user: &UserIdentity) -> Self {
        Self {
            uid: user.uid.clone(),
            email: user.email.clone(),
            display_name: user.display_name.clone(),
        }
    }
}

/// The other participant of a duo, as far as the record tells.
#[derive(Debug, Serialize, ToSchema, Clone, PartialEq, Eq)]
pub struct PartnerSummary {
    /// Partner email.
    pub email: String,
    /// Name from the record, or a placeholder derived from the email.
    pub display_name: String,
}

impl PartnerSummary {
    /// Falls back to the local part of `email` when `name` is blank.
    pub fn new(email: &str, name: Option<&str>) -> Self {
        let display_name = name
            .filter(|name| !name.trim().is_empty())
            .map(str::to_owned)
            .unwrap_or_else(|| email.split('@').next().unwrap_or(email).to_owned());
        Self {
            email: email.to_owned(),
            display_name,
        }
    }
}

/// Invitation record as seen by one of its participants.
#[derive(Debug, Serialize, ToSchema, Clone, PartialEq, Eq)]
pub struct InviteSummary {
    /// Document id.
    pub id: String,
    /// Stored status.
    pub status: InviteStatusDto,
    /// Viewer's side, absent when the viewer is not a participant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<InviteRoleDto>,
    /// Who sent it.
    pub inviter_email: String,
    /// Inviter's display name at the time of sending.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inviter_name: Option<String>,
    /// Who received it.
    pub invitee_email: String,
    /// Set once the team is named.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team_name: Option<String>,
    /// RFC 3339 creation timestamp.
    pub created_at: String,
    /// RFC 3339 timestamp of the invitee's answer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub responded_at: Option<String>,
}

impl InviteSummary {
    /// Builds the summary with `role` resolved for `viewer_email`.
    pub fn for_viewer(invite: &InviteEntity, viewer_email: Option<&str>) -> Self {
        Self {
            id: invite.id.clone(),
            status: invite.status().into(),
            role: viewer_email
                .and_then(|email| invite.role_of(email))
                .map(Into::into),
            inviter_email: invite.body.inviter_email.clone(),
            inviter_name: invite.body.inviter_name.clone(),
            invitee_email: invite.body.invitee_email.clone(),
            team_name: invite.body.team_name.clone(),
            created_at: format_system_time(invite.body.created_at),
            responded_at: invite.body.responded_at.map(format_system_time),
        }
    }
}

/// Everything a client needs to render the current registration step.
#[derive(Debug, Serialize, ToSchema, Clone, PartialEq, Eq)]
pub struct RegistrationView {
    /// Owning session.
    pub session_id: Uuid,
    /// Current step.
    pub step: StepDto,
    /// Increases on every step transition.
    pub version: u64,
    /// Chosen composition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<ModeDto>,
    /// Signed-in user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserSummary>,
    /// Invitation the session is following.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invite: Option<InviteSummary>,
    /// Inviter-side progress of the duo invitation.
    pub duo_status: DuoInviteStatus,
    /// The other player, for duos.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partner: Option<PartnerSummary>,
    /// Registered team name once completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team_name: Option<String>,
    /// Inline error for the team name field.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name_error: Option<String>,
    /// Last failed action, cleared by the next successful one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl RegistrationView {
    /// View of a session nobody signed into yet.
    pub fn login(session_id: Uuid) -> Self {
        Self {
            session_id,
            step: StepDto::Login,
            version: 0,
            mode: None,
            user: None,
            invite: None,
            duo_status: DuoInviteStatus::Idle,
            partner: None,
            team_name: None,
            name_error: None,
            last_error: None,
        }
    }
}

/// Email and password sign-in.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct LoginRequest {
    /// Account email.
    #[validate(email)]
    pub email: String,
    /// Account password, never logged.
    #[validate(length(min = 1))]
    pub password: String,
}

/// Mode selection payload.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct ModeRequest {
    /// Requested composition.
    pub mode: ModeDto,
}

/// Partner invitation payload.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct InviteRequest {
    /// Partner email.
    #[validate(email)]
    pub email: String,
}

/// Team name submission.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct TeamNameRequest {
    /// Raw name as typed.
    #[validate(length(min = 1, max = 64))]
    pub name: String,
}

/// Query for the availability check.
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct TeamNameCheckQuery {
    /// Raw name as typed.
    pub name: String,
}

/// Outcome of the name-as-you-type check.
#[derive(Debug, Serialize, ToSchema, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NameAvailability {
    /// Fewer than three characters after trimming.
    TooShort,
    /// Contains characters outside the allowed set.
    Invalid,
    /// Free to register.
    Available,
    /// Another team already uses it.
    Taken,
    /// A newer check replaced this one during the debounce window.
    Superseded,
}

/// Result of a name check.
#[derive(Debug, Serialize, ToSchema, Clone, PartialEq, Eq)]
pub struct TeamNameCheckResponse {
    /// Normalised form of the requested name.
    pub name: String,
    /// Outcome of the check.
    pub availability: NameAvailability,
    /// Human readable hint for the form.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Returned when a session is opened.
#[derive(Debug, Serialize, ToSchema)]
pub struct SessionCreatedResponse {
    /// Id to use in later calls.
    pub session_id: Uuid,
    /// Initial view, always at the login step.
    pub view: RegistrationView,
}

/// Admin request to mark a user as registered.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct GrantRequest {
    /// Email of the user to flag.
    #[validate(length(min = 5))]
    pub email: String,
}

/// Profile after a grant.
#[derive(Debug, Serialize, ToSchema)]
pub struct GrantResponse {
    /// Identity provider id.
    pub uid: String,
    /// Profile name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Profile email.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Whether the terms of service registration flag is set.
    pub tos_registered: bool,
}


impl From<UserProfileEntity> for GrantResponse {
    fn from(profile: UserProfileEntity) -> Self {
        Self {
            uid: profile.uid.unwrap_or_default(),
            name: profile.name,
            email: profile.email,
            tos_registered: profile.tos_registered,
        }
    }
}
