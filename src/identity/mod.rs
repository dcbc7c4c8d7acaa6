//! Identity provider seam and the per-session authentication state built on it.

/// Account book loaded from configuration.
pub mod static_provider;

use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tracing::info;

pub use static_provider::StaticIdentityProvider;

/// Identity of an authenticated person, referenced by value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    /// Provider user id.
    pub uid: String,
    /// Normalised email.
    pub email: String,
    /// Profile name, if any.
    pub display_name: Option<String>,
}

/// Sign-in failures.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// Unknown email or wrong password.
    #[error("invalid email or password")]
    InvalidCredentials,
    /// The provider could not be reached.
    #[error("identity provider unavailable: {0}")]
    Unavailable(String),
}

/// Authenticates credentials into a [`UserIdentity`].
pub trait IdentityProvider: Send + Sync {
    /// Resolve `email` and `password`, or fail with [`IdentityError::InvalidCredentials`].
    fn authenticate(
        &self,
        email: &str,
        password: &str,
    ) -> BoxFuture<'static, Result<UserIdentity, IdentityError>>;
}

/// Authentication state of one client, observable through a watch channel.
pub struct AuthSession {
    provider: Arc<dyn IdentityProvider>,
    current: watch::Sender<Option<UserIdentity>>,
}

impl AuthSession {
    /// Signed-out session over `provider`.
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        let (current, _rx) = watch::channel(None);
        Self { provider, current }
    }

    /// Identity currently published, if any.
    pub fn current_user(&self) -> Option<UserIdentity> {
        self.current.borrow().clone()
    }

    /// Receiver notified on every sign-in and sign-out.
    pub fn on_auth_state_changed(&self) -> watch::Receiver<Option<UserIdentity>> {
        self.current.subscribe()
    }

    /// Check credentials without publishing the identity.
    pub async fn authenticate(
        &self,
        email: &str,
        password: &str,
    ) -> Result<UserIdentity, IdentityError> {
        self.provider.authenticate(email, password).await
    }

    /// Publish `user` as the signed-in identity.
    pub fn publish(&self, user: UserIdentity) {
        info!(uid = %user.uid, "signed in");
        self.current.send_replace(Some(user));
    }

    /// Clear the identity; a no-op when nobody is signed in.
    pub fn sign_out(&self) {

        if let Some(user) = self.current.send_replace(None) {
            info!(uid = %user.uid, "signed out");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AccountConfig;

    fn provider() -> Arc<dyn IdentityProvider> {
        Arc::new(StaticIdentityProvider::new(&[AccountConfig {
            uid: "u1".into(),
            email: "ada@x.com".into(),
            password: "secret".into(),
            display_name: Some("Ada".into()),
        }]))
    }

    #[tokio::test]
    async fn sign_in_and_out_notify_watchers() {
        let session = AuthSession::new(provider());
        let mut changes = session.on_auth_state_changed();
        assert!(session.current_user().is_none());

        let user = session.authenticate("ada@x.com", "secret").await.unwrap();
        assert!(session.current_user().is_none());
        session.publish(user.clone());
        changes.changed().await.unwrap();
        assert_eq!(changes.borrow().as_ref(), Some(&user));

        session.sign_out();
        changes.changed().await.unwrap();
        assert!(changes.borrow().is_none());
    }

    #[tokio::test]
    async fn bad_password_leaves_session_signed_out() {
        let session = AuthSession::new(provider());
        let err = session.authenticate("ada@x.com", "nope").await.unwrap_err();
        assert!(matches!(err, IdentityError::InvalidCredentials));
        assert!(session.current_user().is_none());
    }
}
