use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Lifecycle of a team formation (invitation) record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InviteStatus {
    /// Sent, waiting on the invitee.
    Pending,
    /// Both sides agreed, no team yet.
    Accepted,
    /// Declined by the invitee. Terminal.
    Rejected,
    /// Team created. Terminal.
    Completed,
}

impl InviteStatus {
    /// Wire representation, used for store-side preconditions.
    pub fn as_str(self) -> &'static str {
        match self {
            InviteStatus::Pending => "PENDING",
            InviteStatus::Accepted => "ACCEPTED",
            InviteStatus::Rejected => "REJECTED",
            InviteStatus::Completed => "COMPLETED",
        }
    }

    /// Pending and accepted records block both participants from another handshake.
    pub fn is_active(self) -> bool {
        matches!(self, InviteStatus::Pending | InviteStatus::Accepted)
    }
}

/// Persisted body of a `tos_invites/{id}` document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InviteBody {
    /// Normalised inviter email.
    pub inviter_email: String,
    /// Inviter display name at send time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inviter_name: Option<String>,
    /// Normalised invitee email. Equal to the inviter for solo entries.
    pub invitee_email: String,
    /// Identifier of the invitee, recorded when they accept.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invitee_uid: Option<String>,
    /// Current lifecycle status.
    pub status: InviteStatus,
    /// Set together with [`InviteStatus::Completed`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_name: Option<String>,
    /// Creation instant.
    pub created_at: SystemTime,
    /// When the invitee accepted or rejected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responded_at: Option<SystemTime>,
}

/// Role of a viewer relative to an invitation record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InviteRole {
    /// Sent the invitation.
    Inviter,
    /// Received the invitation.
    Invitee,
}

/// Team formation record together with its store-assigned id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InviteEntity {
    /// Document id.
    pub id: String,
    /// Stored fields.
    pub body: InviteBody,
}

impl InviteEntity {
    /// Derive the role of `email`; self-invites resolve to [`InviteRole::Inviter`].
    pub fn role_of(&self, email: &str) -> Option<InviteRole> {
        if self.body.inviter_email == email {
            Some(InviteRole::Inviter)
        } else if self.body.invitee_email == email {
            Some(InviteRole::Invitee)
        } else {
            None
        }
    }

    /// Inviter and invitee are the same person.
    pub fn is_self_invite(&self) -> bool {
        self.body.inviter_email == self.body.invitee_email
    }

    /// Self-invitation holding a solo entrant's slot while the team is written.
    pub fn is_solo_reservation(&self) -> bool {
        self.is_self_invite() && self.status() == InviteStatus::Accepted
    }

    /// Current lifecycle status.
    pub fn status(&self) -> InviteStatus {
        self.body.status
    }
}

/// Per-email slot document (`tos_invite_slots/{email}`) pointing at the
/// record that currently occupies the participant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InviteSlotEntity {
    /// Occupying invitation.
    pub invite_id: String,
    /// When the slot was taken.
    pub claimed_at: SystemTime,
}

/// Team composition.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TeamMode {
    /// One member.
    Solo,
    /// Two members.
    Duo,
}

/// Persisted `tos_teams/{team_name}` document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TeamEntity {
    /// Display name, also the document id once normalised.
    pub team_name: String,
    /// Composition.
    pub mode: TeamMode,
    /// User identifiers, inviter first.
    pub members: Vec<String>,
    /// Creation instant.
    pub created_at: SystemTime,
    /// Strategy submitted for the tournament, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finalized_strategy: Option<String>,
}

/// Subset of the `users/{uid}` profile read by registration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserProfileEntity {
    /// Identity provider id.
    #[serde(default)]
    pub uid: Option<String>,
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Account email.
    #[serde(default)]
    pub email: Option<String>,
    /// Eligible to register a team.
    #[serde(default)]
    pub tos_registered: bool,
    /// May call the admin endpoints.
    #[serde(default)]
    pub tos_admin: bool,
}

/// Line item of an `orders/{id}` document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemEntity {
    /// Event the ticket belongs to.
    #[serde(default)]
    pub event_id: Option<String>,
}

/// Subset of an `orders/{id}` document used for ticket verification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OrderEntity {
    /// Buyer.
    pub user_id: String,
    /// Payment status, `paid` once settled.
    pub status: String,
    /// Purchased items.
    #[serde(default)]
    pub items: Vec<OrderItemEntity>,
}

/// Precomputed standing stored in `tos_leaderboard/{strategy}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LeaderboardEntryEntity {
    /// Strategy identifier, also the document id.
    pub strategy: String,
    /// One-based position.
    pub rank: u32,
    /// Tournament points.
    pub points: f64,
    /// Matches won.
    pub wins: u32,
    /// Matches drawn.
    pub draws: u32,
    /// Matches lost.
    pub losses: u32,
    /// Search nodes evaluated across all matches.
    pub total_nodes: u64,
    /// Matches played.
    pub matches: u32,
    /// Owning team, when known.
    #[serde(default)]
    pub team_name: Option<String>,
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn invite_status_uses_upper_case_wire_names() {
        assert_eq!(
            serde_json::to_value(InviteStatus::Accepted).unwrap(),
            json!("ACCEPTED")
        );
        for status in [
            InviteStatus::Pending,
            InviteStatus::Accepted,
            InviteStatus::Rejected,
            InviteStatus::Completed,
        ] {
            assert_eq!(serde_json::to_value(status).unwrap(), json!(status.as_str()));
        }
    }

    #[test]
    fn role_is_derived_from_email() {
        let invite = InviteEntity {
            id: "i1".into(),
            body: InviteBody {
                inviter_email: "a@x.com".into(),
                inviter_name: Some("Ada".into()),
                invitee_email: "b@x.com".into(),
                invitee_uid: None,
                status: InviteStatus::Pending,
                team_name: None,
                created_at: SystemTime::UNIX_EPOCH,
                responded_at: None,
            },
        };

        assert_eq!(invite.role_of("a@x.com"), Some(InviteRole::Inviter));
        assert_eq!(invite.role_of("b@x.com"), Some(InviteRole::Invitee));
        assert_eq!(invite.role_of("c@x.com"), None);
        assert!(!invite.is_self_invite());
    }

    #[test]
    fn orders_read_camel_case_fields() {
        let order: OrderEntity = serde_json::from_value(json!({
            "userId": "u1",
            "status": "PAID",
            "items": [{"eventId": "pass-tech"}, {"name": "t-shirt"}]
        }))
        .unwrap();
        assert_eq!(order.items[0].event_id.as_deref(), Some("pass-tech"));
        assert_eq!(order.items[1].event_id, None);
    }
}
