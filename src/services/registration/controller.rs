//! Team formation controller: drives one user through the registration steps
//! and keeps the local view in line with the stored invitation record.

use std::{
    sync::{
        Arc, Weak,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use futures::StreamExt;
use tokio::{
    sync::{Mutex, watch},
    task::JoinHandle,
    time::{Instant, sleep},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::{
        invites::{InviteStore, InviteStream, normalize_email},
        models::{InviteEntity, InviteRole, InviteStatus, TeamMode, UserProfileEntity},
        teams::{TeamStore, normalize_team_name, validate_team_name},
        users::{TicketProof, UserDirectory},
    },
    dto::registration::{
        DuoInviteStatus, InviteSummary, NameAvailability, PartnerSummary, RegistrationView,
        TeamNameCheckResponse, UserSummary,
    },
    error::{RegistrationError, RegistrationResult},
    identity::{AuthSession, IdentityError, IdentityProvider, UserIdentity},
    state::{
        StoreSlot,
        registration::{
            PlanError, RegistrationEvent, RegistrationStateMachine, RegistrationStep, ResumePoint,
        },
    },
};

/// Tunables of the registration flow.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    /// Shortest accepted team name.
    pub team_name_min_length: usize,
    /// Quiet period before a name check runs.
    pub name_check_debounce: Duration,
    /// Event ids granting a ticket.
    pub eligible_event_ids: Vec<String>,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            team_name_min_length: 3,
            name_check_debounce: Duration::from_millis(300),
            eligible_event_ids: vec!["pass-global".into(), "pass-tech".into()],
        }
    }
}

/// Live subscription to one invitation; dropping it stops delivery.
struct InviteSubscription {
    invite_id: String,
    task: JoinHandle<()>,
}

impl Drop for InviteSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[derive(Default)]
struct Session {
    machine: RegistrationStateMachine,
    user: Option<UserIdentity>,
    /// Uid the stored record was last reconciled for.
    reconciled_uid: Option<String>,
    invite: Option<InviteEntity>,
    team_name: Option<String>,
    name_error: Option<String>,
    last_error: Option<String>,
    subscription: Option<InviteSubscription>,
}

impl Session {
    fn require_user(&self) -> RegistrationResult<UserIdentity> {
        self.user.clone().ok_or(RegistrationError::NotAuthenticated)
    }

    fn require_step(&self, step: RegistrationStep, action: &str) -> RegistrationResult<()> {
        if self.machine.step() == step {
            Ok(())
        } else {
            Err(RegistrationError::InvalidTransition(format!(
                "cannot {action} while in {:?}",
                self.machine.step()
            )))
        }
    }

    fn viewer_email(&self) -> Option<String> {
        self.user.as_ref().map(|user| normalize_email(&user.email))
    }

    fn role(&self) -> Option<InviteRole> {
        let email = self.viewer_email()?;
        self.invite.as_ref()?.role_of(&email)
    }

    fn duo_status(&self) -> DuoInviteStatus {
        self.invite
            .as_ref()
            .map(|invite| invite.status().into())
            .unwrap_or_default()
    }

    fn partner(&self) -> Option<PartnerSummary> {
        let invite = self.invite.as_ref()?;
        if invite.is_self_invite() {
            return None;
        }
        match self.role()? {
            InviteRole::Inviter => Some(PartnerSummary::new(&invite.body.invitee_email, None)),
            InviteRole::Invitee => Some(PartnerSummary::new(
                &invite.body.inviter_email,
                invite.body.inviter_name.as_deref(),
            )),
        }
    }

    /// Drop the invite reference and its subscription, returning the latter
    /// so the caller can release it once done with the session.
    fn forget_invite(&mut self) -> Option<InviteSubscription> {
        self.invite = None;
        self.subscription.take()
    }

    fn record<T>(&mut self, result: RegistrationResult<T>) -> RegistrationResult<T> {
        match &result {
            Ok(_) => self.last_error = None,
            Err(err) => self.last_error = Some(err.to_string()),
        }
        result
    }
}

struct Stores {
    invites: InviteStore,
    teams: TeamStore,
    users: UserDirectory,
}

struct Inner {
    id: Uuid,
    stores: Arc<StoreSlot>,
    auth: AuthSession,
    settings: ControllerSettings,
    session: Mutex<Session>,
    view: watch::Sender<RegistrationView>,
    name_ticket: AtomicU64,
    auth_watcher: std::sync::Mutex<Option<JoinHandle<()>>>,
    last_active: std::sync::Mutex<Instant>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.auth_watcher.lock()
            && let Some(task) = guard.take()
        {
            task.abort();
        }
    }
}

/// Registration session of one client.
#[derive(Clone)]
pub struct TeamFormationController {
    inner: Arc<Inner>,
}

impl TeamFormationController {
    /// Create a session signed out and start following its auth state.
    pub fn new(
        stores: Arc<StoreSlot>,
        identity: Arc<dyn IdentityProvider>,
        settings: ControllerSettings,
    ) -> Self {
        let id = Uuid::new_v4();
        let (view, _rx) = watch::channel(RegistrationView::login(id));
        let controller = Self {
            inner: Arc::new(Inner {
                id,
                stores,
                auth: AuthSession::new(identity),
                settings,
                session: Mutex::new(Session::default()),
                view,
                name_ticket: AtomicU64::new(0),
                auth_watcher: std::sync::Mutex::new(None),
                last_active: std::sync::Mutex::new(Instant::now()),
            }),
        };
        controller.spawn_auth_watcher();
        controller
    }

    /// Session id.
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Latest published view.
    pub fn view(&self) -> RegistrationView {
        self.inner.view.borrow().clone()
    }

    /// Receiver notified after every state change.
    pub fn subscribe(&self) -> watch::Receiver<RegistrationView> {
        self.inner.view.subscribe()
    }

    /// Identity provider session backing this registration session.
    pub fn auth(&self) -> &AuthSession {
        &self.inner.auth
    }

    /// Record client activity, postponing idle expiry.
    pub fn touch(&self) {
        if let Ok(mut last_active) = self.inner.last_active.lock() {
            *last_active = Instant::now();
        }
    }

    /// True once the session saw no activity for `idle` and no stream
    /// follows its views.
    pub fn is_idle(&self, idle: Duration) -> bool {
        if self.inner.view.receiver_count() > 0 {
            return false;
        }
        self.inner
            .last_active
            .lock()
            .map(|last_active| last_active.elapsed() >= idle)
            .unwrap_or(false)
    }

    fn spawn_auth_watcher(&self) {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let mut changes = self.inner.auth.on_auth_state_changed();
        let task = tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                let identity = changes.borrow_and_update().clone();
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let controller = TeamFormationController { inner };
                if let Err(err) = controller.on_identity(identity).await {
                    warn!(session = %controller.id(), error = %err, "reconciliation after auth change failed");
                }
            }
        });
        if let Ok(mut guard) = self.inner.auth_watcher.lock() {
            *guard = Some(task);
        }
    }

    async fn stores(&self) -> RegistrationResult<Stores> {
        let store = self.inner.stores.require().await?;
        Ok(Stores {
            invites: InviteStore::new(store.clone()),
            teams: TeamStore::new(store.clone()),
            users: UserDirectory::new(store),
        })
    }

    fn publish(&self, session: &Session) {
        let view = RegistrationView {
            session_id: self.inner.id,
            step: session.machine.step().into(),
            version: session.machine.version(),
            mode: session.machine.mode().map(Into::into),
            user: session.user.as_ref().map(UserSummary::from),
            invite: session
                .invite
                .as_ref()
                .map(|invite| InviteSummary::for_viewer(invite, session.viewer_email().as_deref())),
            duo_status: session.duo_status(),
            partner: session.partner(),
            team_name: session.team_name.clone(),
            name_error: session.name_error.clone(),
            last_error: session.last_error.clone(),
        };
        self.inner.view.send_replace(view);
    }

    /// Authenticate, verify the ticket, then resume from the stored record.
    pub async fn sign_in(&self, email: &str, password: &str) -> RegistrationResult<RegistrationView> {
        let user = self
            .inner
            .auth
            .authenticate(email, password)
            .await
            .map_err(|err| match err {
                IdentityError::InvalidCredentials => RegistrationError::NotAuthenticated,
                IdentityError::Unavailable(message) => RegistrationError::StoreUnavailable {
                    message,
                    source: None,
                },
            })?;

        let proof = self
            .stores()
            .await?
            .users
            .verify_ticket(&user.uid, &self.inner.settings.eligible_event_ids)
            .await;
        match proof {
            Ok(TicketProof::PreRegistered) => debug!(uid = %user.uid, "ticket: pre-registered"),
            Ok(TicketProof::Order { order_id }) => {
                debug!(uid = %user.uid, order_id = %order_id, "ticket: paid order")
            }
            Err(err) => {
                self.inner.auth.sign_out();
                let mut session = self.inner.session.lock().await;
                let result = session.record(Err(err));
                self.publish(&session);
                return result;
            }
        }

        self.inner.auth.publish(user.clone());
        self.on_identity(Some(user)).await?;
        Ok(self.view())
    }

    /// Reconcile with the stored record when the identity changes.
    ///
    /// Runs once per newly known uid; repeated notifications for the same
    /// identity leave the current step alone.
    async fn on_identity(&self, identity: Option<UserIdentity>) -> RegistrationResult<()> {
        let mut session = self.inner.session.lock().await;

        let current_uid = self.inner.auth.current_user().map(|user| user.uid);
        let Some(user) = identity else {
            // a sign-out overtaken by a newer sign-in is stale
            if session.user.is_none() || current_uid.is_some() {
                return Ok(());
            }
            let stale = session.forget_invite();
            *session = Session {
                machine: session.machine.clone(),
                ..Session::default()
            };
            sign_out_machine(&mut session);
            self.publish(&session);
            drop(session);
            drop(stale);
            return Ok(());
        };

        if current_uid.as_deref() != Some(user.uid.as_str())
            || session.reconciled_uid.as_deref() == Some(user.uid.as_str())
        {
            return Ok(());
        }

        let stale = session.forget_invite();
        session.user = Some(user.clone());
        session.team_name = None;
        session.name_error = None;

        let stores = match self.stores().await {
            Ok(stores) => stores,
            Err(err) => {
                let result = session.record(Err(err));
                self.publish(&session);
                return result;
            }
        };
        let found = match stores.invites.check_user_invite_status(&user.email).await {
            Ok(found) => found,
            Err(err) => {
                let result = session.record(Err(err));
                self.publish(&session);
                return result;
            }
        };

        let found = match found {
            Some(invite) if invite.is_solo_reservation() => {
                // left behind by an interrupted solo naming
                info!(invite_id = %invite.id, uid = %user.uid, "releasing unfinished solo reservation");
                if let Err(err) = stores.invites.cancel_invite(&invite.id).await {
                    let result = session.record(Err(err));
                    self.publish(&session);
                    return result;
                }
                None
            }
            other => other,
        };

        let email = normalize_email(&user.email);
        let resume = match &found {
            None => ResumePoint::NoInvite,
            Some(invite) if invite.status() == InviteStatus::Completed => {
                session.team_name = invite.body.team_name.clone();
                ResumePoint::Registered(if invite.is_self_invite() {
                    TeamMode::Solo
                } else {
                    TeamMode::Duo
                })
            }
            Some(invite) => match invite.role_of(&email) {
                Some(InviteRole::Invitee) => ResumePoint::AsInvitee,
                _ => ResumePoint::AsInviter,
            },
        };
        session
            .machine
            .fire(RegistrationEvent::IdentityResolved(resume))
            .map_err(plan_error)?;
        session.invite = found;
        session.reconciled_uid = Some(user.uid.clone());
        session.last_error = None;

        if matches!(resume, ResumePoint::AsInviter | ResumePoint::AsInvitee)
            && let Some(invite_id) = session.invite.as_ref().map(|invite| invite.id.clone())
        {
            self.watch_invite(&mut session, &stores.invites, &invite_id)
                .await;
        }

        info!(
            session = %self.inner.id,
            uid = %user.uid,
            step = ?session.machine.step(),
            "identity reconciled"
        );
        self.publish(&session);
        drop(session);
        drop(stale);
        Ok(())
    }

    /// Open a subscription on `invite_id` bound to the current version.
    ///
    /// A failure to subscribe is logged and leaves the session without live
    /// updates; the record already loaded stays visible.
    async fn watch_invite(&self, session: &mut Session, invites: &InviteStore, invite_id: &str) {
        let stream = match invites.listen_to_invite(invite_id).await {
            Ok(stream) => stream,
            Err(err) => {
                warn!(invite_id, error = %err, "failed to subscribe to invitation");
                return;
            }
        };
        let version = session.machine.version();
        let task = tokio::spawn(forward_invite_updates(
            Arc::downgrade(&self.inner),
            invite_id.to_owned(),
            version,
            stream,
        ));
        session.subscription = Some(InviteSubscription {
            invite_id: invite_id.to_owned(),
            task,
        });
    }

    async fn on_invite_update(
        &self,
        version: u64,
        invite_id: &str,
        update: RegistrationResult<Option<InviteEntity>>,
    ) {
        let mut session = self.inner.session.lock().await;
        let bound = session
            .subscription
            .as_ref()
            .is_some_and(|subscription| subscription.invite_id == invite_id);
        if !bound || session.machine.version() != version {
            debug!(invite_id, version, "dropping stale invitation update");
            return;
        }

        let update = match update {
            Ok(update) => update,
            Err(err) => {
                warn!(invite_id, error = %err, "invitation subscription failed; keeping last known state");
                return;
            }
        };

        let mut stale = None;
        match (session.machine.step(), update) {
            (RegistrationStep::DuoInvite, Some(invite)) => {
                debug!(invite_id, status = ?invite.status(), "inviter observed update");
                session.invite = Some(invite);
            }
            (RegistrationStep::DuoInvite, None) => {
                info!(invite_id, "invitation removed; back to an empty invite");
                stale = session.forget_invite();
            }
            (RegistrationStep::InviteReceived, Some(invite))
                if invite.status() == InviteStatus::Completed =>
            {
                session.team_name = invite.body.team_name.clone();
                session.invite = Some(invite);
                if let Err(err) = session.machine.fire(RegistrationEvent::PartnerCompleted) {
                    warn!(invite_id, error = %err, "cannot complete from partner update");
                }
                stale = session.subscription.take();
                info!(invite_id, team_name = ?session.team_name, "partner completed registration");
            }
            (RegistrationStep::InviteReceived, Some(invite)) => {
                session.invite = Some(invite);
            }
            (RegistrationStep::InviteReceived, None) => {
                stale = session.forget_invite();
                if let Err(err) = session.machine.fire(RegistrationEvent::InviteWithdrawn) {
                    warn!(invite_id, error = %err, "cannot leave withdrawn invitation");
                }
                session.last_error = Some("the invitation was withdrawn".into());
                info!(invite_id, "invitation withdrawn by inviter");
            }
            (step, _) => {
                debug!(invite_id, ?step, "ignoring invitation update outside invite steps");
            }
        }

        self.publish(&session);
        drop(session);
        drop(stale);
    }

    /// Pick solo or duo from the mode selection step.
    pub async fn select_mode(&self, mode: TeamMode) -> RegistrationResult<RegistrationView> {
        let mut session = self.inner.session.lock().await;
        session.require_user()?;
        let result = session
            .machine
            .fire(RegistrationEvent::ModeChosen(mode))
            .map_err(plan_error);
        session.record(result)?;
        debug!(session = %self.inner.id, ?mode, "mode selected");
        self.publish(&session);
        Ok(self.view())
    }

    /// Solo confirmation leads straight to naming.
    pub async fn confirm_solo(&self) -> RegistrationResult<RegistrationView> {
        let mut session = self.inner.session.lock().await;
        let result = session
            .machine
            .fire(RegistrationEvent::SoloConfirmed)
            .map_err(plan_error);
        session.record(result)?;
        self.publish(&session);
        Ok(self.view())
    }

    /// Send an invitation to `email` and follow it live.
    pub async fn send_invite(&self, email: &str) -> RegistrationResult<RegistrationView> {
        let mut session = self.inner.session.lock().await;
        let user = session.require_user()?;
        session.require_step(RegistrationStep::DuoInvite, "send an invitation")?;
        if session.invite.is_some() {
            let result = Err(RegistrationError::InvalidTransition(
                "an invitation is already in progress; cancel it first".into(),
            ));
            return session.record(result);
        }

        let result = match self.stores().await {
            Ok(stores) => stores
                .invites
                .create_invite(&user, email)
                .await
                .map(|invite| (stores, invite)),
            Err(err) => Err(err),
        };
        let (stores, invite) = match session.record(result) {
            Ok(created) => created,
            Err(err) => {
                self.publish(&session);
                return Err(err);
            }
        };

        let invite_id = invite.id.clone();
        session.invite = Some(invite);
        self.watch_invite(&mut session, &stores.invites, &invite_id)
            .await;
        self.publish(&session);
        Ok(self.view())
    }

    /// Withdraw the outgoing invitation, or clear a rejected one ("try again").
    pub async fn cancel_invite(&self) -> RegistrationResult<RegistrationView> {
        let mut session = self.inner.session.lock().await;
        session.require_step(RegistrationStep::DuoInvite, "cancel an invitation")?;
        let Some(invite_id) = session.invite.as_ref().map(|invite| invite.id.clone()) else {
            return Ok(self.view());
        };

        let result = match self.stores().await {
            Ok(stores) => stores.invites.cancel_invite(&invite_id).await,
            Err(err) => Err(err),
        };
        if let Err(err) = session.record(result) {
            self.publish(&session);
            return Err(err);
        }

        let stale = session.forget_invite();
        self.publish(&session);
        drop(session);
        drop(stale);
        Ok(self.view())
    }

    /// Inviter proceeds to naming once the partner accepted.
    pub async fn confirm_duo(&self) -> RegistrationResult<RegistrationView> {
        let mut session = self.inner.session.lock().await;
        session.require_step(RegistrationStep::DuoInvite, "confirm the duo")?;
        if session.duo_status() != DuoInviteStatus::Accepted {
            let result = Err(RegistrationError::InvalidTransition(
                "your partner has not accepted the invitation yet".into(),
            ));
            return session.record(result);
        }

        let result = session
            .machine
            .fire(RegistrationEvent::DuoConfirmed)
            .map_err(plan_error);
        session.record(result)?;
        let stale = session.subscription.take();
        self.publish(&session);
        drop(session);
        drop(stale);
        Ok(self.view())
    }

    /// Accept the incoming invitation and wait for the inviter to name the team.
    pub async fn accept_invite(&self) -> RegistrationResult<RegistrationView> {
        let mut session = self.inner.session.lock().await;
        let user = session.require_user()?;
        session.require_step(RegistrationStep::InviteReceived, "accept an invitation")?;
        let invite_id = session
            .invite
            .as_ref()
            .map(|invite| invite.id.clone())
            .ok_or_else(|| RegistrationError::NotFound("no invitation to accept".into()))?;

        let result = match self.stores().await {
            Ok(stores) => stores.invites.accept_invite(&invite_id, &user).await,
            Err(err) => Err(err),
        };
        match session.record(result) {
            Ok(invite) => session.invite = Some(invite),
            Err(err) => {
                self.publish(&session);
                return Err(err);
            }
        }
        self.publish(&session);
        Ok(self.view())
    }

    /// Decline the incoming invitation and return to mode selection.
    pub async fn reject_invite(&self) -> RegistrationResult<RegistrationView> {

        let mut session = self.inner.session.lock().await;
        session.require_step(RegistrationStep::InviteReceived, "reject an invitation")?;
        let invite_id = session
            .invite
            .as_ref()
            .map(|invite| invite.id.clone())
            .ok_or_else(|| RegistrationError::NotFound("no invitation to reject".into()))?;

        let plan = session
            .machine
            .plan(RegistrationEvent::InviteRejected)
            .map_err(plan_error)?;
        let result = match self.stores().await {
            Ok(stores) => stores.invites.reject_invite(&invite_id).await,
            Err(err) => Err(err),
        };
        if let Err(err) = session.record(result) {
            abort_plan(&mut session, plan.id);
            self.publish(&session);
            return Err(err);
        }

        apply_plan(&mut session, plan.id);
        let stale = session.forget_invite();
        self.publish(&session);
        drop(session);
        drop(stale);
        Ok(self.view())
    }

    /// Debounced availability check used while the user types.
    ///
    /// A call overtaken by a newer one during the debounce window reports
    /// [`NameAvailability::Superseded`] without touching the store.
    pub async fn check_team_name(&self, raw: &str) -> RegistrationResult<TeamNameCheckResponse> {
        let ticket = self.inner.name_ticket.fetch_add(1, Ordering::SeqCst) + 1;
        let name = normalize_team_name(raw);
        let min_len = self.inner.settings.team_name_min_length;

        if name.chars().count() < min_len {
            return Ok(TeamNameCheckResponse {
                name,
                availability: NameAvailability::TooShort,
                message: Some(format!("at least {min_len} characters")),
            });
        }
        if let Err(message) = validate_team_name(&name, min_len) {
            return Ok(TeamNameCheckResponse {
                name,
                availability: NameAvailability::Invalid,
                message: Some(message),
            });
        }

        sleep(self.inner.settings.name_check_debounce).await;
        if self.inner.name_ticket.load(Ordering::SeqCst) != ticket {
            return Ok(TeamNameCheckResponse {
                name,
                availability: NameAvailability::Superseded,
                message: None,
            });
        }

        let taken = self
            .stores()
            .await?
            .invites
            .check_team_name_exists(&name)
            .await?;
        Ok(TeamNameCheckResponse {
            name,
            availability: if taken {
                NameAvailability::Taken
            } else {
                NameAvailability::Available
            },
            message: None,
        })
    }

    /// Claim the team name, then complete the invitation (duo) or record the
    /// solo self-invitation. Any failure keeps the session in the naming step.
    pub async fn set_team_name(&self, raw: &str) -> RegistrationResult<RegistrationView> {
        let mut session = self.inner.session.lock().await;
        let user = session.require_user()?;
        let plan = session
            .machine
            .plan(RegistrationEvent::TeamNamed)
            .map_err(plan_error)?;

        let name = normalize_team_name(raw);
        let result = self.register_team(&session, &user, &name).await;
        match result {
            Ok(()) => {
                apply_plan(&mut session, plan.id);
                session.team_name = Some(name.clone());
                session.name_error = None;
                session.last_error = None;
                info!(session = %self.inner.id, team_name = %name, "team registered");
            }
            Err(err) => {
                abort_plan(&mut session, plan.id);
                if matches!(
                    err,
                    RegistrationError::NameTaken { .. } | RegistrationError::InvalidInput(_)
                ) {
                    session.name_error = Some(err.to_string());
                }
                let result = session.record(Err(err));
                self.publish(&session);
                return result;
            }
        }

        self.publish(&session);
        Ok(self.view())
    }

    async fn register_team(
        &self,
        session: &Session,
        user: &UserIdentity,
        name: &str,
    ) -> RegistrationResult<()> {
        validate_team_name(name, self.inner.settings.team_name_min_length)
            .map_err(RegistrationError::InvalidInput)?;
        let stores = self.stores().await?;

        let mode = session.machine.mode().unwrap_or(TeamMode::Solo);
        let members = match mode {
            TeamMode::Solo => vec![user.uid.clone()],
            TeamMode::Duo => {
                let partner_uid = session
                    .invite
                    .as_ref()
                    .and_then(|invite| invite.body.invitee_uid.clone())
                    .ok_or_else(|| {
                        RegistrationError::InvalidTransition(
                            "the invitation has not been accepted".into(),
                        )
                    })?;
                vec![user.uid.clone(), partner_uid]
            }
        };

        if let Some(existing) = stores.teams.find_team(name).await?
            && existing.members != members
        {
            return Err(RegistrationError::NameTaken {
                name: name.to_owned(),
            });
        }

        match (mode, session.invite.as_ref()) {
            (TeamMode::Duo, Some(invite)) => {
                stores.teams.create_team(name, mode, members).await?;
                stores.invites.complete_invite(&invite.id, name).await?;
            }
            (TeamMode::Duo, None) => {
                return Err(RegistrationError::InvalidTransition(
                    "no invitation to complete".into(),
                ));
            }
            (TeamMode::Solo, _) => {
                // the slot is held before the team exists so a lost slot
                // never leaves a team behind
                let reservation = stores.invites.reserve_self_invite(user).await?;
                if let Err(err) = stores.teams.create_team(name, mode, members).await {
                    if let Err(release) = stores.invites.cancel_invite(&reservation.id).await {
                        warn!(invite_id = %reservation.id, error = %release, "failed to release solo reservation");
                    }
                    return Err(err);
                }
                stores.invites.create_self_invite(user, name).await?;
            }
        }
        Ok(())
    }

    /// Step back one screen.
    pub async fn go_back(&self) -> RegistrationResult<RegistrationView> {
        let mut session = self.inner.session.lock().await;
        match session.machine.step() {
            RegistrationStep::ModeSelection => {
                drop(session);
                return self.reset().await;
            }
            RegistrationStep::DuoInvite if session.invite.is_some() => {
                let result = Err(RegistrationError::InvalidTransition(
                    "cancel the invitation before going back".into(),
                ));
                return session.record(result);
            }
            _ => {}
        }

        let result = session
            .machine
            .fire(RegistrationEvent::Back)
            .map_err(plan_error);
        let step = session.record(result)?;
        session.name_error = None;
        let mut stale = None;

        if step == RegistrationStep::DuoInvite
            && let Some(invite_id) = session.invite.as_ref().map(|invite| invite.id.clone())
        {
            // sub-state is rederived from the stored record, not from memory
            match self.stores().await {
                Ok(stores) => match stores.invites.find_invite(&invite_id).await {
                    Ok(found) => {
                        let exists = found.is_some();
                        session.invite = found;
                        if exists {
                            self.watch_invite(&mut session, &stores.invites, &invite_id)
                                .await;
                        }
                    }
                    Err(err) => warn!(invite_id = %invite_id, error = %err, "failed to reload invitation"),
                },
                Err(err) => warn!(error = %err, "store unavailable while reloading invitation"),
            }
        } else if step == RegistrationStep::ModeSelection {
            stale = session.forget_invite();
        }

        self.publish(&session);
        drop(session);
        drop(stale);
        Ok(self.view())
    }

    /// Log out: tear down subscriptions, sign out and reset every field.
    ///
    /// Invitations are left untouched.
    pub async fn reset(&self) -> RegistrationResult<RegistrationView> {
        let mut session = self.inner.session.lock().await;
        let stale = session.forget_invite();
        let machine = session.machine.clone();
        *session = Session {
            machine,
            ..Session::default()
        };
        sign_out_machine(&mut session);
        self.inner.auth.sign_out();
        info!(session = %self.inner.id, "registration reset");
        self.publish(&session);
        drop(session);
        drop(stale);
        Ok(self.view())
    }

    /// Mark the user owning `email` as registered; admins only.
    pub async fn grant_registration(&self, email: &str) -> RegistrationResult<UserProfileEntity> {
        let user = self.inner.session.lock().await.require_user()?;
        if email.trim().chars().count() < 5 {
            return Err(RegistrationError::InvalidInput(
                "email must be at least 5 characters".into(),
            ));
        }
        let stores = self.stores().await?;
        if !stores.users.is_admin(&user.uid).await? {
            return Err(RegistrationError::Forbidden(
                "only administrators can grant registrations".into(),
            ));
        }
        stores.users.grant_registration(email).await
    }
}

async fn forward_invite_updates(
    weak: Weak<Inner>,
    invite_id: String,
    version: u64,
    mut stream: InviteStream,
) {
    while let Some(update) = stream.next().await {
        let Some(inner) = weak.upgrade() else {
            break;
        };
        TeamFormationController { inner }
            .on_invite_update(version, &invite_id, update)
            .await;
    }
    debug!(invite_id = %invite_id, "invitation subscription ended");
}

fn sign_out_machine(session: &mut Session) {
    if let Err(err) = session.machine.fire(RegistrationEvent::SignedOut) {
        warn!(error = %err, "failed to return to login");
    }
}

fn plan_error(err: PlanError) -> RegistrationError {
    RegistrationError::InvalidTransition(err.to_string())
}

fn apply_plan(session: &mut Session, plan_id: Uuid) {
    if let Err(err) = session.machine.apply(plan_id) {
        warn!(error = %err, "failed to apply planned transition");
    }
}

fn abort_plan(session: &mut Session, plan_id: Uuid) {
    if let Err(err) = session.machine.abort(plan_id) {
        warn!(error = %err, "failed to abort planned transition");
    }
}
