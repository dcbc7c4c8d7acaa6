//! Invitation record store: the team formation handshake persisted in the
//! document store.
//!
//! Uniqueness of the "one active invitation per email" rule is carried by
//! slot documents (`tos_invite_slots/{email}`) claimed with insert-if-absent
//! writes. The invitation document is always written before its slots are
//! claimed and deleted before they are released, so a slot pointing at a
//! missing invitation is stale and may be reclaimed.

use std::{sync::Arc, time::SystemTime};

use futures::{StreamExt, stream::BoxStream};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::{
        document_store::{DocumentStore, FieldEquals, from_document, to_document},
        models::{InviteBody, InviteEntity, InviteRole, InviteSlotEntity, InviteStatus},
        storage::StorageError,
        teams::TeamStore,
        users::UserDirectory,
    },
    error::{RegistrationError, RegistrationResult},
    identity::UserIdentity,
};

/// Collection holding invitation records keyed by generated id.
pub const INVITES_COLLECTION: &str = "tos_invites";
/// Collection holding one slot per participant email.
pub const SLOTS_COLLECTION: &str = "tos_invite_slots";

const MAX_SLOT_CLAIMS: u32 = 3;
const MAX_DELETE_ATTEMPTS: u32 = 4;

/// Live view of one invitation; `None` once the record is deleted.
pub type InviteStream = BoxStream<'static, RegistrationResult<Option<InviteEntity>>>;

/// Canonical form of an email used as a document key.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[derive(Serialize)]
struct AcceptPatch<'a> {
    status: InviteStatus,
    responded_at: SystemTime,
    invitee_uid: &'a str,
}

#[derive(Serialize)]
struct CompletePatch<'a> {
    status: InviteStatus,
    team_name: &'a str,
}

/// Data-access functions over the document store implementing the handshake.
#[derive(Clone)]
pub struct InviteStore {
    store: Arc<dyn DocumentStore>,
    teams: TeamStore,
    users: UserDirectory,
}

impl InviteStore {
    /// Builds the team and user views over the same store.
    pub fn new(
store: Arc<dyn DocumentStore>) -> Self {
        Self {
            teams: TeamStore::new(store.clone()),
            users: UserDirectory::new(store.clone()),
            store,
        }
    }

    fn decode(id: &str, document: crate::dao::document_store::Document) -> RegistrationResult<InviteEntity> {
        let body: InviteBody = from_document(INVITES_COLLECTION, id, document)?;
        Ok(InviteEntity {
            id: id.to_owned(),
            body,
        })
    }

    /// Load an invitation by id.
    pub async fn find_invite(&self, id: &str) -> RegistrationResult<Option<InviteEntity>> {
        match self.store.get_document(INVITES_COLLECTION, id).await? {
            Some(document) => Self::decode(id, document).map(Some),
            None => Ok(None),
        }
    }

    /// Return the record occupying `email`, if any.
    ///
    /// Completed records are returned as well so a finished registration
    /// resumes into its final state.
    pub async fn check_user_invite_status(
        &self,
        email: &str,
    ) -> RegistrationResult<Option<InviteEntity>> {
        let email = normalize_email(email);
        let Some(slot) = self.read_slot(&email).await? else {
            return Ok(None);
        };

        match self.find_invite(&slot.invite_id).await? {
            Some(invite) => Ok(Some(invite)),
            None => {
                self.release_slot(&email, &slot.invite_id).await?;
                debug!(email = %email, invite_id = %slot.invite_id, "released stale invite slot");
                Ok(None)
            }
        }
    }

    /// Create a `PENDING` invitation from `from` to `to_email`.
    ///
    /// Fails with [`RegistrationError::DuplicateInvite`] when either
    /// participant already occupies an invitation, and with
    /// [`RegistrationError::InviteeNotFound`] when nobody owns `to_email`.
    pub async fn create_invite(
        &self,
        from: &UserIdentity,
        to_email: &str,
    ) -> RegistrationResult<InviteEntity> {
        let inviter_email = normalize_email(&from.email);
        let invitee_email = normalize_email(to_email);
        if !invitee_email.contains('@') {
            return Err(RegistrationError::InvalidInput(format!(
                "`{to_email}` is not an email address"
            )));
        }
        if inviter_email == invitee_email {
            return Err(RegistrationError::InvalidInput(
                "you cannot invite yourself; register solo instead".into(),
            ));
        }
        if self.users.find_by_email(&invitee_email).await?.is_none() {
            return Err(RegistrationError::InviteeNotFound {
                email: invitee_email,
            });
        }

        let invite = InviteEntity {
            id: Uuid::new_v4().simple().to_string(),
            body: InviteBody {
                inviter_email: inviter_email.clone(),
                inviter_name: from.display_name.clone(),
                invitee_email: invitee_email.clone(),
                invitee_uid: None,
                status: InviteStatus::Pending,
                team_name: None,
                created_at: SystemTime::now(),
                responded_at: None,
            },
        };
        self.insert_with_slots(&invite, &[&inviter_email, &invitee_email])
            .await?;

        info!(
            invite_id = %invite.id,
            inviter = %inviter_email,
            invitee = %invitee_email,
            "invitation created"
        );
        Ok(invite)
    }

    /// Hold `user`'s slot for a solo registration before the team is written.
    ///
    /// The reservation is an `ACCEPTED` self-invitation without a team name.
    /// [`create_self_invite`](Self::create_self_invite) completes it and
    /// [`cancel_invite`](Self::cancel_invite) releases it. Retrying returns
    /// the reservation already held.
    pub async fn reserve_self_invite(
        &self,
        user: &UserIdentity,
    ) -> RegistrationResult<InviteEntity> {
        let email = normalize_email(&user.email);
        if let Some(existing) = self.check_user_invite_status(&email).await? {
            if existing.is_solo_reservation() {
                return Ok(existing);
            }
            return Err(RegistrationError::DuplicateInvite { email });
        }

        let invite = self_invite(user, &email, InviteStatus::Accepted, None);
        self.insert_with_slots(&invite, &[&email]).await?;
        debug!(invite_id = %invite.id, email = %email, "solo slot reserved");
        Ok(invite)
    }

    /// Record a completed self-invitation for a solo entrant.
    ///
    /// A reservation held by the user is completed in place. Retrying with
    /// the same team name returns the existing record.
    pub async fn create_self_invite(
        &self,
        user: &UserIdentity,
        team_name: &str,
    ) -> RegistrationResult<InviteEntity> {
        let email = normalize_email(&user.email);
        let invite = match self.check_user_invite_status(&email).await? {
            Some(existing)
                if existing.is_self_invite()
                    && existing.status() == InviteStatus::Completed
                    && existing.body.team_name.as_deref() == Some(team_name) =>
            {
                return Ok(existing);
            }
            Some(existing) if existing.is_solo_reservation() => {
                self.complete_invite(&existing.id, team_name).await?
            }
            Some(_) => return Err(RegistrationError::DuplicateInvite { email }),
            None => {
                let invite = self_invite(
                    user,
                    &email,
                    InviteStatus::Completed,
                    Some(team_name.to_owned()),
                );
                self.insert_with_slots(&invite, &[&email]).await?;
                invite
            }
        };

        info!(invite_id = %invite.id, email = %email, team_name, "solo registration recorded");
        Ok(invite)
    }

    /// Delete an invitation that is not completed. Missing records are a no-op.
    pub async fn cancel_invite(&self, id: &str) -> RegistrationResult<()> {
        let Some(invite) = self
            .delete_invite_when(id, |status| status != InviteStatus::Completed)
            .await?
        else {
            return Ok(());
        };

        self.release_participants(&invite).await?;
        info!(invite_id = %id, "invitation cancelled");
        Ok(())
    }

    /// Transition `PENDING -> ACCEPTED` on behalf of the invitee.
    pub async fn accept_invite(
        &self,
        id: &str,
        invitee: &UserIdentity,
    ) -> RegistrationResult<InviteEntity> {
        let invite = self
            .find_invite(id)
            .await?
            .ok_or_else(|| RegistrationError::NotFound(format!("invitation `{id}`")))?;
        if invite.role_of(&normalize_email(&invitee.email)) != Some(InviteRole::Invitee) {
            return Err(RegistrationError::Forbidden(
                "only the invitee can accept this invitation".into(),
            ));
        }

        let patch = to_document(
            INVITES_COLLECTION,
            id,
            &AcceptPatch {
                status: InviteStatus::Accepted,
                responded_at: SystemTime::now(),
                invitee_uid: &invitee.uid,
            },
        )?;
        let updated = self
            .store
            .update_document(
                INVITES_COLLECTION,
                id,
                patch,
                Some(FieldEquals::new("status", InviteStatus::Pending.as_str())),
            )
            .await
            .map_err(|err| transition_error(err, id, "accept"))?;

        info!(invite_id = %id, invitee = %invite.body.invitee_email, "invitation accepted");
        Self::decode(id, updated)
    }

    /// Delete a `PENDING` invitation on behalf of the invitee.
    pub async fn reject_invite(&self, id: &str) -> RegistrationResult<()> {
        let Some(invite) = self
            .delete_invite_when(id, |status| status == InviteStatus::Pending)
            .await?
        else {
            return Ok(());
        };

        self.release_participants(&invite).await?;
        info!(invite_id = %id, "invitation rejected");
        Ok(())
    }

    /// Transition `ACCEPTED -> COMPLETED` and attach the team name.
    ///
    /// Must only run once the team document exists. Re-running it with the
    /// same name after success is a no-op.
    pub async fn complete_invite(
        &self,
        id: &str,
        team_name: &str,
    ) -> RegistrationResult<InviteEntity> {
        let patch = to_document(
            INVITES_COLLECTION,
            id,
            &CompletePatch {
                status: InviteStatus::Completed,
                team_name,
            },
        )?;
        let result = self
            .store
            .update_document(
                INVITES_COLLECTION,
                id,
                patch,
                Some(FieldEquals::new("status", InviteStatus::Accepted.as_str())),
            )
            .await;

        match result {
            Ok(updated) => {
                info!(invite_id = %id, team_name, "invitation completed");
                Self::decode(id, updated)
            }
            Err(StorageError::PreconditionFailed { .. }) => match self.find_invite(id).await? {
                Some(existing)
                    if existing.status() == InviteStatus::Completed
                        && existing.body.team_name.as_deref() == Some(team_name) =>
                {
                    Ok(existing)
                }
                Some(existing) => Err(RegistrationError::InvalidTransition(format!(
                    "cannot complete invitation `{id}` in state {:?}",
                    existing.status()
                ))),
                None => Err(RegistrationError::NotFound(format!("invitation `{id}`"))),
            },
            Err(err) => Err(transition_error(err, id, "complete")),
        }
    }

    /// Whether a team already owns `name`.
    pub async fn check_team_name_exists(&self, name: &str) -> RegistrationResult<bool> {
        self.teams.exists(name).await
    }

    /// Subscribe to one invitation; dropping the stream unsubscribes.
    pub async fn listen_to_invite(&self, id: &str) -> RegistrationResult<InviteStream> {
        let documents = self.store.watch_document(INVITES_COLLECTION, id).await?;
        let id = id.to_owned();
        Ok(documents
            .map(move |snapshot| match snapshot? {
                Some(document) => Self::decode(&id, document).map(Some),
                None => Ok(None),
            })
            .boxed())
    }

    async fn read_slot(&self, email: &str) -> RegistrationResult<Option<InviteSlotEntity>> {
        match self.store.get_document(SLOTS_COLLECTION, email).await? {
            Some(document) => Ok(Some(from_document(SLOTS_COLLECTION, email, document)?)),
            None => Ok(None),
        }
    }

    async fn release_slot(&self, email: &str, invite_id: &str) -> RegistrationResult<()> {
        self.store
            .delete_document_if(
                SLOTS_COLLECTION,
                email,
                FieldEquals::new("invite_id", invite_id),
            )
            .await?;
        Ok(())
    }

    async fn release_participants(&self, invite: &InviteEntity) -> RegistrationResult<()> {
        self.release_slot(&invite.body.inviter_email, &invite.id)
            .await?;
        if !invite.is_self_invite() {
            self.release_slot(&invite.body.invitee_email, &invite.id)
                .await?;
        }
        Ok(())
    }

    /// Write the invitation, then claim every slot; any lost claim rolls back.
    async fn insert_with_slots(
        &self,
        invite: &InviteEntity,
        emails: &[&str],
    ) -> RegistrationResult<()> {
        let document = to_document(INVITES_COLLECTION, &invite.id, &invite.body)?;
        self.store
            .create_document(INVITES_COLLECTION, &invite.id, document)
            .await?;

        let mut claimed: Vec<&str> = Vec::with_capacity(emails.len());
        for email in emails {
            if let Err(err) = self.claim_slot(email, &invite.id).await {
                self.roll_back(invite, &claimed).await;
                return Err(err);
            }
            claimed.push(email);
        }
        Ok(())
    }

    async fn roll_back(&self, invite: &InviteEntity, claimed: &[&str]) {
        for email in claimed {
            if let Err(err) = self.release_slot(email, &invite.id).await {
                warn!(invite_id = %invite.id, email = %email, error = %err, "failed to release slot during rollback");
            }
        }
        if let Err(err) = self
            .store
            .delete_document(INVITES_COLLECTION, &invite.id)
            .await
        {
            warn!(invite_id = %invite.id, error = %err, "failed to delete invitation during rollback");
        }
    }

    async fn claim_slot(&self, email: &str, invite_id: &str) -> RegistrationResult<()> {
        let slot = InviteSlotEntity {
            invite_id: invite_id.to_owned(),
            claimed_at: SystemTime::now(),
        };
        let document = to_document(SLOTS_COLLECTION, email, &slot)?;

        for _ in 0..MAX_SLOT_CLAIMS {
            match self
                .store
                .create_document(SLOTS_COLLECTION, email, document.clone())
                .await
            {
                Ok(()) => return Ok(()),
                Err(StorageError::AlreadyExists { .. }) => {}
                Err(err) => return Err(err.into()),
            }

            let Some(holder) = self.read_slot(email).await? else {
                continue;
            };
            if holder.invite_id == invite_id {
                return Ok(());
            }
            if self.find_invite(&holder.invite_id).await?.is_some() {
                return Err(RegistrationError::DuplicateInvite {
                    email: email.to_owned(),
                });
            }
            debug!(email = %email, stale_invite_id = %holder.invite_id, "reclaiming stale invite slot");
            self.release_slot(email, &holder.invite_id).await?;
        }

        Err(RegistrationError::DuplicateInvite {
            email: email.to_owned(),
        })
    }

    /// Delete the invitation when `allowed(status)` holds, conditioned on the
    /// status read so a concurrent transition is never overwritten.
    ///
    /// Returns the deleted record, or `None` when it was already gone.
    async fn delete_invite_when(
        &self,
        id: &str,
        allowed: impl Fn(InviteStatus) -> bool,
    ) -> RegistrationResult<Option<InviteEntity>> {
        for _ in 0..MAX_DELETE_ATTEMPTS {
            let Some(invite) = self.find_invite(id).await? else {
                return Ok(None);
            };
            if !allowed(invite.status()) {
                return Err(RegistrationError::InvalidTransition(format!(
                    "invitation `{id}` is {:?}",
                    invite.status()
                )));
            }

            let deleted = self
                .store
                .delete_document_if(
                    INVITES_COLLECTION,
                    id,
                    FieldEquals::new("status", invite.status().as_str()),
                )
                .await?;
            if deleted {
                return Ok(Some(invite));
            }
        }

        Err(RegistrationError::InvalidTransition(format!(
            "invitation `{id}` kept changing while being deleted"
        )))
    }
}

fn self_invite(
    user: &UserIdentity,
    email: &str,
    status: InviteStatus,
    team_name: Option<String>,
) -> InviteEntity {
    let now = SystemTime::now();
    InviteEntity {
        id: Uuid::new_v4().simple().to_string(),
        body: InviteBody {
            inviter_email: email.to_owned(),
            inviter_name: user.display_name.clone(),
            invitee_email: email.to_owned(),
            invitee_uid: Some(user.uid.clone()),
            status,
            team_name,
            created_at: now,
            responded_at: Some(now),
        },
    }
}

fn transition_error(err: StorageError, id: &str, action: &str) -> RegistrationError {
    match err {
        StorageError::PreconditionFailed { expected, .. } => RegistrationError::InvalidTransition(
            format!("cannot {action} invitation `{id}`: it is no longer {expected}"),
        ),
        StorageError::NotFound { .. } => {
            RegistrationError::NotFound(format!("invitation `{id}`"))
        }
        other => other.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::{
        document_store::MemoryDocumentStore,
        users::{USERS_COLLECTION, profile_document},
    };

    fn user(uid: &str, email: &str) -> UserIdentity {
        UserIdentity {
            uid: uid.into(),
            email: email.into(),
            display_name: Some(uid.to_uppercase()),
        }
    }

    async fn invite_store() -> (InviteStore, MemoryDocumentStore) {
        let memory = MemoryDocumentStore::new();
        let mut emails: Vec<String> = ["a", "b", "c", "s", "target"]
            .iter()
            .map(|name| format!("{name}@x.com"))
            .collect();
        emails.extend((0..8).map(|n| format!("u{n}@x.com")));
        for (n, email) in emails.iter().enumerate() {
            memory
                .set_document(USERS_COLLECTION, &format!("uid{n}"), profile_document("", email))
                .await
                .unwrap();
        }
        (InviteStore::new(Arc::new(memory.clone())), memory)
    }

    #[tokio::test]
    async fn create_invite_occupies_both_participants() {
        let (store, _) = invite_store().await;
        let invite = store
            .create_invite(&user("a", "A@x.com "), "b@x.com")
            .await
            .unwrap();
        assert_eq!(invite.body.inviter_email, "a@x.com");
        assert_eq!(invite.status(), InviteStatus::Pending);

        for email in ["a@x.com", "B@X.com"] {
            let found = store.check_user_invite_status(email).await.unwrap();
            assert_eq!(found.map(|i| i.id), Some(invite.id.clone()));
        }
        assert!(store.check_user_invite_status("c@x.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn second_invite_for_busy_email_is_duplicate() {
        let (store, memory) = invite_store().await;
        store
            .create_invite(&user("a", "a@x.com"), "b@x.com")
            .await
            .unwrap();

        let err = store
            .create_invite(&user("c", "c@x.com"), "b@x.com")
            .await
            .unwrap_err();
        assert!(matches!(err, RegistrationError::DuplicateInvite { ref email } if email == "b@x.com"));

        // the loser rolled back both its record and its own slot
        assert!(store.check_user_invite_status("c@x.com").await.unwrap().is_none());
        assert_eq!(memory.list_documents(INVITES_COLLECTION).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_invites_to_same_invitee_have_one_winner() {
        let (store, _) = invite_store().await;
        let mut handles = Vec::new();
        for n in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .create_invite(&user(&format!("u{n}"), &format!("u{n}@x.com")), "target@x.com")
                    .await
            }));
        }

        let mut winners = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => winners += 1,
                Err(RegistrationError::DuplicateInvite { .. }) => {}
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn self_invite_through_duo_path_is_rejected() {
        let (store, _) = invite_store().await;
        let err = store
            .create_invite(&user("a", "a@x.com"), " A@x.com")
            .await
            .unwrap_err();
        assert!(matches!(err, RegistrationError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn unknown_invitee_is_reported() {
        let (store, _) = invite_store().await;
        let err = store
            .create_invite(&user("a", "a@x.com"), "ghost@x.com")
            .await
            .unwrap_err();
        assert!(matches!(err, RegistrationError::InviteeNotFound { .. }));
        assert!(store.check_user_invite_status("a@x.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn accept_requires_pending_and_the_invitee() {
        let (store, _) = invite_store().await;
        let invite = store
            .create_invite(&user("a", "a@x.com"), "b@x.com")
            .await
            .unwrap();

        let err = store
            .accept_invite(&invite.id, &user("a", "a@x.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistrationError::Forbidden(_)));

        let accepted = store
            .accept_invite(&invite.id, &user("b", "b@x.com"))
            .await
            .unwrap();
        assert_eq!(accepted.status(), InviteStatus::Accepted);
        assert_eq!(accepted.body.invitee_uid.as_deref(), Some("b"));
        assert!(accepted.body.responded_at.is_some());

        let err = store
            .accept_invite(&invite.id, &user("b", "b@x.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistrationError::InvalidTransition(_)));
    }

    #[tokio::test]
    async fn cancel_twice_is_a_no_op() {
        let (store, _) = invite_store().await;
        let invite = store
            .create_invite(&user("a", "a@x.com"), "b@x.com")
            .await
            .unwrap();

        store.cancel_invite(&invite.id).await.unwrap();
        store.cancel_invite(&invite.id).await.unwrap();

        assert!(store.find_invite(&invite.id).await.unwrap().is_none());
        assert!(store.check_user_invite_status("a@x.com").await.unwrap().is_none());
        assert!(store.check_user_invite_status("b@x.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reject_deletes_and_notifies_listeners() {
        let (store, _) = invite_store().await;
        let invite = store
            .create_invite(&user("a", "a@x.com"), "b@x.com")
            .await
            .unwrap();
        let mut listener = store.listen_to_invite(&invite.id).await.unwrap();
        assert!(listener.next().await.unwrap().unwrap().is_some());

        store.reject_invite(&invite.id).await.unwrap();

        assert!(listener.next().await.unwrap().unwrap().is_none());
        assert!(store.check_user_invite_status("a@x.com").await.unwrap().is_none());
        assert!(store.check_user_invite_status("b@x.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reject_after_accept_is_invalid() {
        let (store, _) = invite_store().await;
        let invite = store
            .create_invite(&user("a", "a@x.com"), "b@x.com")
            .await
            .unwrap();
        store
            .accept_invite(&invite.id, &user("b", "b@x.com"))
            .await
            .unwrap();

        let err = store.reject_invite(&invite.id).await.unwrap_err();
        assert!(matches!(err, RegistrationError::InvalidTransition(_)));
    }

    #[tokio::test]
    async fn complete_is_idempotent_and_requires_acceptance() {
        let (store, _) = invite_store().await;
        let invite = store
            .create_invite(&user("a", "a@x.com"), "b@x.com")
            .await
            .unwrap();

        let err = store.complete_invite(&invite.id, "BRAVO").await.unwrap_err();
        assert!(matches!(err, RegistrationError::InvalidTransition(_)));

        store
            .accept_invite(&invite.id, &user("b", "b@x.com"))
            .await
            .unwrap();
        let completed = store.complete_invite(&invite.id, "BRAVO").await.unwrap();
        assert_eq!(completed.status(), InviteStatus::Completed);
        assert_eq!(completed.body.team_name.as_deref(), Some("BRAVO"));

        let again = store.complete_invite(&invite.id, "BRAVO").await.unwrap();
        assert_eq!(again, completed);
        let err = store.complete_invite(&invite.id, "OTHER").await.unwrap_err();
        assert!(matches!(err, RegistrationError::InvalidTransition(_)));

        let err = store.cancel_invite(&invite.id).await.unwrap_err();
        assert!(matches!(err, RegistrationError::InvalidTransition(_)));
    }

    #[tokio::test]
    async fn self_invite_blocks_later_duo_invites() {
        let (store, _) = invite_store().await;
        let solo = user("s", "s@x.com");
        let record = store.create_self_invite(&solo, "ALPHA").await.unwrap();
        assert_eq!(record.status(), InviteStatus::Completed);
        assert!(record.is_self_invite());

        let again = store.create_self_invite(&solo, "ALPHA").await.unwrap();
        assert_eq!(again.id, record.id);

        let err = store
            .create_invite(&user("a", "a@x.com"), "s@x.com")
            .await
            .unwrap_err();
        assert!(matches!(err, RegistrationError::DuplicateInvite { .. }));
    }

    #[tokio::test]
    async fn solo_reservation_holds_the_slot_until_completed() {
        let (store, _) = invite_store().await;
        let solo = user("s", "s@x.com");
        let reservation = store.reserve_self_invite(&solo).await.unwrap();
        assert!(reservation.is_solo_reservation());
        assert_eq!(store.reserve_self_invite(&solo).await.unwrap().id, reservation.id);

        let err = store
            .create_invite(&user("a", "a@x.com"), "s@x.com")
            .await
            .unwrap_err();
        assert!(matches!(err, RegistrationError::DuplicateInvite { .. }));

        let record = store.create_self_invite(&solo, "ALPHA").await.unwrap();
        assert_eq!(record.id, reservation.id);
        assert_eq!(record.status(), InviteStatus::Completed);
        assert_eq!(record.body.team_name.as_deref(), Some("ALPHA"));
    }

    #[tokio::test]
    async fn reservation_fails_for_an_invited_user_and_can_be_released() {
        let (store, _) = invite_store().await;
        store
            .create_invite(&user("a", "a@x.com"), "b@x.com")
            .await
            .unwrap();
        let err = store
            .reserve_self_invite(&user("b", "b@x.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistrationError::DuplicateInvite { ref email } if email == "b@x.com"));

        let solo = user("s", "s@x.com");
        let reservation = store.reserve_self_invite(&solo).await.unwrap();
        store.cancel_invite(&reservation.id).await.unwrap();
        assert!(store.check_user_invite_status("s@x.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stale_slots_are_reclaimed() {
        let (store, memory) = invite_store().await;
        let invite = store
            .create_invite(&user("a", "a@x.com"), "b@x.com")
            .await
            .unwrap();
        // simulate a cancel interrupted between the two deletes
        memory
            .delete_document(INVITES_COLLECTION, &invite.id)
            .await
            .unwrap();

        let next = store
            .create_invite(&user("b", "b@x.com"), "a@x.com")
            .await
            .unwrap();
        assert_eq!(
            store
                .check_user_invite_status("a@x.com")
                .await
                .unwrap()
                .map(|i| i.id),
            Some(next.id)
        );
    }

    #[tokio::test]
    async fn store_outage_surfaces_as_unavailable() {
        let (store, memory) = invite_store().await;
        memory.set_offline(true);
        let err = store.check_user_invite_status("a@x.com").await.unwrap_err();
        assert!(matches!(err, RegistrationError::StoreUnavailable { .. }));
    }
}
