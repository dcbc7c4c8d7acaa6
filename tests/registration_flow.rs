use std::{sync::Arc, time::Duration};

use futures::StreamExt;
use serde_json::Value;
use tokio::time::timeout;

use tos_registration::{
    config::{AccountConfig, AppConfig},
    dao::{
        document_store::{DocumentStore, MemoryDocumentStore},
        invites::InviteStore,
        models::{InviteStatus, TeamMode},
        teams::TeamStore,
        users::{USERS_COLLECTION, profile_document},
    },
    dto::registration::{DuoInviteStatus, RegistrationView, StepDto},
    error::RegistrationError,
    identity::StaticIdentityProvider,
    services::registration::{self, TeamFormationController},
    state::{AppState, SharedState, StoreSlot},
};

const WAIT: Duration = Duration::from_secs(2);

struct Harness {
    state: SharedState,
    store: Arc<MemoryDocumentStore>,
}

impl Harness {
    async fn new() -> Self {
        let store = Arc::new(MemoryDocumentStore::new());
        let mut accounts = Vec::new();
        for (uid, name) in [("uid-a", "Ada"), ("uid-b", "Bob"), ("uid-c", "Cy")] {
            let email = format!("{}@x.com", &uid[4..]);
            let mut profile = profile_document(name, &email);
            profile.insert("tos_registered".into(), Value::Bool(true));
            store
                .set_document(USERS_COLLECTION, uid, profile)
                .await
                .unwrap();
            accounts.push(AccountConfig {
                uid: uid.into(),
                email,
                password: "pw".into(),
                display_name: Some(name.into()),
            });
        }

        let state = AppState::with_stores(
            AppConfig::default(),
            Arc::new(StaticIdentityProvider::new(&accounts)),
            StoreSlot::with_store(store.clone()),
        )
        .unwrap();
        Self { state, store }
    }

    async fn signed_in(&self, email: &str) -> TeamFormationController {
        let controller = registration::create_session(&self.state);
        controller.sign_in(email, "pw").await.unwrap();
        controller
    }

    fn invites(&self) -> InviteStore {
        InviteStore::new(self.store.clone())
    }
}

async fn wait_until(
    controller: &TeamFormationController,
    predicate: impl FnMut(&RegistrationView) -> bool,
) -> RegistrationView {
    let mut views = controller.subscribe();
    let view = timeout(WAIT, views.wait_for(predicate))
        .await
        .expect("timed out waiting for view")
        .expect("view channel closed")
        .clone();
    view
}

#[tokio::test]
async fn solo_path_registers_alpha() {
    let harness = Harness::new().await;
    let user = harness.signed_in("a@x.com").await;
    assert_eq!(user.view().step, StepDto::ModeSelection);

    user.select_mode(TeamMode::Solo).await.unwrap();
    user.confirm_solo().await.unwrap();
    let view = user.set_team_name("alpha").await.unwrap();
    assert_eq!(view.step, StepDto::Completed);
    assert_eq!(view.team_name.as_deref(), Some("ALPHA"));

    let team = TeamStore::new(harness.store.clone())
        .find_team("ALPHA")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(team.members, vec!["uid-a"]);
    assert_eq!(team.mode, TeamMode::Solo);

    let record = harness
        .invites()
        .check_user_invite_status("a@x.com")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status(), InviteStatus::Completed);
    assert!(record.is_self_invite());
}

#[tokio::test]
async fn duo_happy_path_completes_both_sides() {
    let harness = Harness::new().await;
    let inviter = harness.signed_in("a@x.com").await;
    inviter.select_mode(TeamMode::Duo).await.unwrap();
    let view = inviter.send_invite("B@x.com").await.unwrap();
    assert_eq!(view.duo_status, DuoInviteStatus::Sent);

    let invitee = harness.signed_in("b@x.com").await;
    let view = invitee.view();
    assert_eq!(view.step, StepDto::InviteReceived);
    assert_eq!(view.partner.unwrap().display_name, "Ada");

    invitee.accept_invite().await.unwrap();
    wait_until(&inviter, |view| view.duo_status == DuoInviteStatus::Accepted).await;

    inviter.confirm_duo().await.unwrap();
    let view = inviter.set_team_name("bravo").await.unwrap();
    assert_eq!(view.step, StepDto::Completed);

    let view = wait_until(&invitee, |view| view.step == StepDto::Completed).await;
    assert_eq!(view.team_name.as_deref(), Some("BRAVO"));

    let team = TeamStore::new(harness.store.clone())
        .find_team("BRAVO")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(team.members, vec!["uid-a", "uid-b"]);
}

#[tokio::test]
async fn concurrent_name_claims_have_one_winner() {
    let harness = Harness::new().await;
    let first = harness.signed_in("a@x.com").await;
    let second = harness.signed_in("c@x.com").await;
    for controller in [&first, &second] {
        controller.select_mode(TeamMode::Solo).await.unwrap();
        controller.confirm_solo().await.unwrap();
    }

    let (a, c) = tokio::join!(first.set_team_name("charlie"), second.set_team_name("charlie"));
    let (winner, loser, loser_email) = match (a, c) {
        (Ok(_), Err(err)) => (&first, err, "c@x.com"),
        (Err(err), Ok(_)) => (&second, err, "a@x.com"),
        other => panic!("expected exactly one winner: {other:?}"),
    };
    assert!(matches!(loser, RegistrationError::NameTaken { .. }));
    assert_eq!(winner.view().step, StepDto::Completed);

    // the loser never recorded a self-invitation
    assert!(
        harness
            .invites()
            .check_user_invite_status(loser_email)
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn reload_mid_handshake_resumes_waiting_state() {
    let harness = Harness::new().await;
    let inviter = harness.signed_in("a@x.com").await;
    inviter.select_mode(TeamMode::Duo).await.unwrap();
    inviter.send_invite("b@x.com").await.unwrap();

    let invitee = harness.signed_in("b@x.com").await;
    invitee.accept_invite().await.unwrap();
    registration::close_session(&harness.state, invitee.id()).unwrap();
    drop(invitee);

    let record = harness
        .invites()
        .check_user_invite_status("b@x.com")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status(), InviteStatus::Accepted);

    let reloaded = harness.signed_in("b@x.com").await;
    assert_eq!(reloaded.view().step, StepDto::InviteReceived);

    wait_until(&inviter, |view| view.duo_status == DuoInviteStatus::Accepted).await;
    inviter.confirm_duo().await.unwrap();
    inviter.set_team_name("echo").await.unwrap();

    let view = wait_until(&reloaded, |view| view.step == StepDto::Completed).await;
    assert_eq!(view.team_name.as_deref(), Some("ECHO"));
}

#[tokio::test]
async fn rejection_deletes_the_record_for_every_listener() {
    let harness = Harness::new().await;
    let inviter = harness.signed_in("a@x.com").await;
    inviter.select_mode(TeamMode::Duo).await.unwrap();
    let invite_id = inviter.send_invite("b@x.com").await.unwrap().invite.unwrap().id;

    let mut listener = harness.invites().listen_to_invite(&invite_id).await.unwrap();
    let first = listener.next().await.unwrap().unwrap();
    assert_eq!(first.unwrap().status(), InviteStatus::Pending);

    let invitee = harness.signed_in("b@x.com").await;
    let view = invitee.reject_invite().await.unwrap();
    assert_eq!(view.step, StepDto::ModeSelection);

    let update = timeout(WAIT, listener.next()).await.unwrap().unwrap().unwrap();
    assert!(update.is_none());

    for email in ["a@x.com", "b@x.com"] {
        assert!(
            harness
                .invites()
                .check_user_invite_status(email)
                .await
                .unwrap()
                .is_none()
        );
    }

    let view = wait_until(&inviter, |view| view.invite.is_none()).await;
    assert_eq!(view.step, StepDto::DuoInvite);
    assert_eq!(view.duo_status, DuoInviteStatus::Idle);
}

#[tokio::test]
async fn cancelling_twice_is_harmless() {
    let harness = Harness::new().await;
    let inviter = harness.signed_in("a@x.com").await;
    inviter.select_mode(TeamMode::Duo).await.unwrap();
    let invite_id = inviter.send_invite("b@x.com").await.unwrap().invite.unwrap().id;

    harness.invites().cancel_invite(&invite_id).await.unwrap();
    harness.invites().cancel_invite(&invite_id).await.unwrap();
    let view = inviter.cancel_invite().await.unwrap();
    assert!(view.invite.is_none());
    assert!(
        harness
            .invites()
            .check_user_invite_status("a@x.com")
            .await
            .unwrap()
            .is_none()
    );

    // the slot is free again
    inviter.send_invite("c@x.com").await.unwrap();
}

#[tokio::test]
async fn withdrawn_invite_returns_invitee_to_mode_selection() {
    let harness = Harness::new().await;
    let inviter = harness.signed_in("a@x.com").await;
    inviter.select_mode(TeamMode::Duo).await.unwrap();
    inviter.send_invite("b@x.com").await.unwrap();

    let invitee = harness.signed_in("b@x.com").await;
    assert_eq!(invitee.view().step, StepDto::InviteReceived);

    inviter.cancel_invite().await.unwrap();
    let view = wait_until(&invitee, |view| view.step == StepDto::ModeSelection).await;
    assert!(view.invite.is_none());
    assert!(view.last_error.is_some());
}

#[tokio::test]
async fn third_listener_sees_completed_record() {
    let harness = Harness::new().await;
    let inviter = harness.signed_in("a@x.com").await;
    inviter.select_mode(TeamMode::Duo).await.unwrap();
    let invite_id = inviter.send_invite("b@x.com").await.unwrap().invite.unwrap().id;

    let invitee = harness.signed_in("b@x.com").await;
    invitee.accept_invite().await.unwrap();
    wait_until(&inviter, |view| view.duo_status == DuoInviteStatus::Accepted).await;
    inviter.confirm_duo().await.unwrap();
    inviter.set_team_name("foxtrot").await.unwrap();

    let mut listener = harness.invites().listen_to_invite(&invite_id).await.unwrap();
    let record = listener.next().await.unwrap().unwrap().unwrap();
    assert_eq!(record.status(), InviteStatus::Completed);
    assert_eq!(record.body.team_name.as_deref(), Some("FOXTROT"));
}

#[tokio::test]
async fn logout_keeps_the_invitation() {
    let harness = Harness::new().await;
    let inviter = harness.signed_in("a@x.com").await;
    inviter.select_mode(TeamMode::Duo).await.unwrap();
    inviter.send_invite("b@x.com").await.unwrap();

    let view = inviter.reset().await.unwrap();
    assert_eq!(view.step, StepDto::Login);
    assert!(view.user.is_none());

    let record = harness
        .invites()
        .check_user_invite_status("b@x.com")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status(), InviteStatus::Pending);

    inviter.sign_in("a@x.com", "pw").await.unwrap();
    let view = inviter.view();
    assert_eq!(view.step, StepDto::DuoInvite);
    assert_eq!(view.duo_status, DuoInviteStatus::Sent);
}

#[tokio::test]
async fn invited_solo_entrant_cannot_claim_a_second_team() {
    let harness = Harness::new().await;
    let solo = harness.signed_in("b@x.com").await;
    solo.select_mode(TeamMode::Solo).await.unwrap();
    solo.confirm_solo().await.unwrap();

    let inviter = harness.signed_in("a@x.com").await;
    inviter.select_mode(TeamMode::Duo).await.unwrap();
    inviter.send_invite("b@x.com").await.unwrap();

    let err = solo.set_team_name("echo").await.unwrap_err();
    assert!(matches!(err, RegistrationError::DuplicateInvite { ref email } if email == "b@x.com"));
    assert_eq!(solo.view().step, StepDto::TeamName);

    let teams = TeamStore::new(harness.store.clone());
    assert!(teams.find_team("ECHO").await.unwrap().is_none());
    let record = harness
        .invites()
        .check_user_invite_status("b@x.com")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status(), InviteStatus::Pending);
    assert!(!record.is_self_invite());

    // joining the duo leaves exactly one team holding the user
    solo.reset().await.unwrap();
    solo.sign_in("b@x.com", "pw").await.unwrap();
    assert_eq!(solo.view().step, StepDto::InviteReceived);
    solo.accept_invite().await.unwrap();
    wait_until(&inviter, |view| view.duo_status == DuoInviteStatus::Accepted).await;
    inviter.confirm_duo().await.unwrap();
    inviter.set_team_name("foxtrot").await.unwrap();

    assert!(teams.find_team("ECHO").await.unwrap().is_none());
    let team = teams.find_team("FOXTROT").await.unwrap().unwrap();
    assert_eq!(team.members, vec!["uid-a", "uid-b"]);
}

#[tokio::test]
async fn lost_name_race_releases_the_solo_slot() {
    let harness = Harness::new().await;
    TeamStore::new(harness.store.clone())
        .create_team("GOLF", TeamMode::Solo, vec!["uid-c".into()])
        .await
        .unwrap();

    let solo = harness.signed_in("a@x.com").await;
    solo.select_mode(TeamMode::Solo).await.unwrap();
    solo.confirm_solo().await.unwrap();
    let err = solo.set_team_name("golf").await.unwrap_err();
    assert!(matches!(err, RegistrationError::NameTaken { .. }));

    // the slot is free for a duo invitation again
    assert!(
        harness
            .invites()
            .check_user_invite_status("a@x.com")
            .await
            .unwrap()
            .is_none()
    );
    let inviter = harness.signed_in("c@x.com").await;
    inviter.select_mode(TeamMode::Duo).await.unwrap();
    inviter.send_invite("a@x.com").await.unwrap();
}
