use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::{
    dao::{
        document_store::{Document, DocumentStore, FieldEquals, from_document},
        invites::normalize_email,
        models::{OrderEntity, UserProfileEntity},
    },
    error::{RegistrationError, RegistrationResult},
};

/// Profiles keyed by user id.
pub const USERS_COLLECTION: &str = "users";
/// Ticket orders, queried by `userId`.
pub const ORDERS_COLLECTION: &str = "orders";

const PAID_STATUS: &str = "PAID";

/// How a user proved their right to register.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TicketProof {
    /// Flagged `tos_registered` by an administrator.
    PreRegistered,
    /// Paid order containing an eligible event pass.
    Order {
        /// Qualifying order.
        order_id: String,
    },
}

/// Read access to the user profiles and orders owned by the ticketing side.
#[derive(Clone)]
pub struct UserDirectory {
    store: Arc<dyn DocumentStore>,
}

impl UserDirectory {
    /// Wraps the shared store.
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Profile stored under `uid`, with the id filled in when the document omits it.
    pub async fn find_profile(
&self, uid: &str) -> RegistrationResult<Option<UserProfileEntity>> {
        match self.store.get_document(USERS_COLLECTION, uid).await? {
            Some(document) => {
                let mut profile: UserProfileEntity =
                    from_document(USERS_COLLECTION, uid, document)?;
                profile.uid.get_or_insert_with(|| uid.to_owned());
                Ok(Some(profile))
            }
            None => Ok(None),
        }
    }

    /// Look a profile up by email, trying the normalised form first.
    pub async fn find_by_email(
        &self,
        email: &str,
    ) -> RegistrationResult<Option<UserProfileEntity>> {
        let normalized = normalize_email(email);
        let raw = email.trim();
        let mut candidates = vec![normalized.as_str()];
        if raw != normalized {
            candidates.push(raw);
        }

        for candidate in candidates {
            let found = self
                .store
                .query_equals(USERS_COLLECTION, FieldEquals::new("email", candidate))
                .await?;
            if let Some(first) = found.into_iter().next() {
                let mut profile: UserProfileEntity =
                    from_document(USERS_COLLECTION, &first.id, first.data)?;
                profile.uid.get_or_insert(first.id);
                return Ok(Some(profile));
            }
        }
        Ok(None)
    }

    /// Check that `uid` may take part: pre-registered, or owner of a paid
    /// order holding one of `eligible_event_ids`.
    pub async fn verify_ticket(
        &self,
        uid: &str,
        eligible_event_ids: &[String],
    ) -> RegistrationResult<TicketProof> {
        if self
            .find_profile(uid)
            .await?
            .is_some_and(|profile| profile.tos_registered)
        {
            debug!(uid, "user is pre-registered");
            return Ok(TicketProof::PreRegistered);
        }

        let orders = self
            .store
            .query_equals(ORDERS_COLLECTION, FieldEquals::new("userId", uid))
            .await?;
        for stored in orders {
            let order: OrderEntity = match from_document(ORDERS_COLLECTION, &stored.id, stored.data)
            {
                Ok(order) => order,
                Err(err) => {
                    warn!(order_id = %stored.id, error = %err, "skipping unreadable order");
                    continue;
                }
            };
            if order.status != PAID_STATUS {
                continue;
            }
            let eligible = order.items.iter().any(|item| {
                item.event_id
                    .as_ref()
                    .is_some_and(|event| eligible_event_ids.contains(event))
            });
            if eligible {
                return Ok(TicketProof::Order {
                    order_id: stored.id,
                });
            }
        }

        Err(RegistrationError::NoValidTicket(
            "no paid order with an eligible event pass".into(),
        ))
    }

    /// `tos_admin` flag of the profile, false when there is none.
    pub async fn is_admin(
&self, uid: &str) -> RegistrationResult<bool> {
        Ok(self
            .find_profile(uid)
            .await?
            .is_some_and(|profile| profile.tos_admin))
    }

    /// Mark the user owning `email` as registered.
    pub async fn grant_registration(&self, email: &str) -> RegistrationResult<UserProfileEntity> {
        let profile = self.find_by_email(email).await?.ok_or_else(|| {
            RegistrationError::InviteeNotFound {
                email: email.trim().to_owned(),
            }
        })?;
        let uid = profile.uid.clone().unwrap_or_default();

        let mut patch = Document::new();
        patch.insert("tos_registered".into(), Value::Bool(true));
        let updated = self
            .store
            .update_document(USERS_COLLECTION, &uid, patch, None)
            .await?;

        info!(uid = %uid, email = %email.trim(), "registration granted");
        let mut granted: UserProfileEntity = from_document(USERS_COLLECTION, &uid, updated)?;
        granted.uid.get_or_insert(uid);
        Ok(granted)
    }
}

/// Profile document as written by the ticketing side.
pub fn profile_document(name: &str, email: &str) -> Document {
    match json!({ "name": name, "email": email }) {
        Value::Object(map) => map,
        _ => Document::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::document_store::MemoryDocumentStore;

    fn eligible() -> Vec<String> {
        vec!["pass-tech".into(), "combo1".into()]
    }

    async fn seeded() -> (UserDirectory, MemoryDocumentStore) {
        let memory = MemoryDocumentStore::new();
        memory
            .set_document(USERS_COLLECTION, "u1", profile_document("Ada", "ada@x.com"))
            .await
            .unwrap();
        (UserDirectory::new(Arc::new(memory.clone())), memory)
    }

    fn order(user: &str, status: &str, event: &str) -> Document {
        match json!({"userId": user, "status": status, "items": [{"eventId": event}]}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn find_by_email_is_case_insensitive() {
        let (users, _) = seeded().await;
        let profile = users.find_by_email(" ADA@x.com").await.unwrap().unwrap();
        assert_eq!(profile.uid.as_deref(), Some("u1"));
        assert_eq!(profile.name.as_deref(), Some("Ada"));
        assert!(users.find_by_email("bob@x.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn ticket_requires_paid_eligible_order() {
        let (users, memory) = seeded().await;
        let err = users.verify_ticket("u1", &eligible()).await.unwrap_err();
        assert!(matches!(err, RegistrationError::NoValidTicket(_)));

        memory
            .set_document(ORDERS_COLLECTION, "o1", order("u1", "PENDING", "pass-tech"))
            .await
            .unwrap();
        memory
            .set_document(ORDERS_COLLECTION, "o2", order("u1", "PAID", "t-shirt"))
            .await
            .unwrap();
        assert!(users.verify_ticket("u1", &eligible()).await.is_err());

        memory
            .set_document(ORDERS_COLLECTION, "o3", order("u1", "PAID", "combo1"))
            .await
            .unwrap();
        assert_eq!(
            users.verify_ticket("u1", &eligible()).await.unwrap(),
            TicketProof::Order {
                order_id: "o3".into()
            }
        );
    }

    #[tokio::test]
    async fn granted_users_are_pre_registered() {
        let (users, _) = seeded().await;
        let profile = users.grant_registration("ada@x.com").await.unwrap();
        assert!(profile.tos_registered);
        assert_eq!(
            users.verify_ticket("u1", &eligible()).await.unwrap(),
            TicketProof::PreRegistered
        );

        let err = users.grant_registration("nobody@x.com").await.unwrap_err();
        assert!(matches!(err, RegistrationError::InviteeNotFound { .. }));
    }
}
