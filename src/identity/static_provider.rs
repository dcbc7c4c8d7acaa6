use std::{collections::HashMap, sync::Arc};

use futures::{FutureExt, future::BoxFuture};

use crate::{
    config::AccountConfig,
    dao::invites::normalize_email,
    identity::{IdentityError, IdentityProvider, UserIdentity},
};

/// Identity provider backed by a fixed account book loaded from configuration.
#[derive(Clone, Default)]
pub struct StaticIdentityProvider {
    accounts: Arc<HashMap<String, AccountConfig>>,
}

impl StaticIdentityProvider {
    /// Index `accounts` by normalised email. Later duplicates win.
    pub fn new(accounts: &[AccountConfig]) -> Self {
        let accounts = accounts
            .iter()
            .map(|account| (normalize_email(&account.email), account.clone()))
            .collect();
        Self {
            accounts: Arc::new(accounts),
        }
    }

    /// Number of distinct accounts.
    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    /// No account configured.
    pub fn is_empty(&self) -> bool {

        self.accounts.is_empty()
    }
}

impl IdentityProvider for StaticIdentityProvider {
    fn authenticate(
        &self,
        email: &str,
        password: &str,
    ) -> BoxFuture<'static, Result<UserIdentity, IdentityError>> {
        let result = match self.accounts.get(&normalize_email(email)) {
            Some(account) if account.password == password => Ok(UserIdentity {
                uid: account.uid.clone(),
                email: normalize_email(&account.email),
                display_name: account.display_name.clone(),
            }),
            _ => Err(IdentityError::InvalidCredentials),
        };
        async move { result }.boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lookup_ignores_email_case() {
        let provider = StaticIdentityProvider::new(&[AccountConfig {
            uid: "u1".into(),
            email: "Ada@X.com".into(),
            password: "pw".into(),
            display_name: None,
        }]);
        let user = provider.authenticate(" ada@x.COM", "pw").await.unwrap();
        assert_eq!(user.uid, "u1");
        assert_eq!(user.email, "ada@x.com");
        assert!(provider.authenticate("bob@x.com", "pw").await.is_err());
    }
}
