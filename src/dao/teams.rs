use std::{sync::Arc, time::SystemTime};

use tracing::info;

use crate::{
    dao::{
        document_store::{DocumentStore, from_document, to_document},
        models::{TeamEntity, TeamMode},
        storage::StorageError,
    },
    error::{RegistrationError, RegistrationResult},
};

/// Collection keyed by team name.
pub const TEAMS_COLLECTION: &str = "tos_teams";

/// Longest accepted team name, in characters.
pub const MAX_TEAM_NAME_LEN: usize = 32;

/// Canonical team name: trimmed, upper-cased, inner whitespace collapsed.
pub fn normalize_team_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

/// Check a normalised name against length and charset rules.
pub fn validate_team_name(name: &str, min_len: usize) -> Result<(), String> {
    let len = name.chars().count();
    if len < min_len {
        return Err(format!("team name must be at least {min_len} characters"));
    }
    if len > MAX_TEAM_NAME_LEN {
        return Err(format!(
            "team name must be at most {MAX_TEAM_NAME_LEN} characters"
        ));
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_alphanumeric() || matches!(c, ' ' | '-' | '_')))
    {
        return Err(format!("team name cannot contain `{bad}`"));
    }
    Ok(())
}

/// Access to the team keyspace. Teams are never renamed or deleted here.
#[derive(Clone)]
pub struct TeamStore {
    store: Arc<dyn DocumentStore>,
}

impl TeamStore {
    /// Wraps the shared store.
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Whether `name`, already normalised, is taken.
    pub async fn exists(&self, name: &str) -> RegistrationResult<bool> {
        Ok(self
            .store
            .get_document(TEAMS_COLLECTION, name)
            .await?
            .is_some())
    }

    /// Team document stored under a normalised name.
    pub async fn find_team(
&self, name: &str) -> RegistrationResult<Option<TeamEntity>> {
        match self.store.get_document(TEAMS_COLLECTION, name).await? {
            Some(document) => Ok(Some(from_document(TEAMS_COLLECTION, name, document)?)),
            None => Ok(None),
        }
    }

    /// Claim `name` with an insert-if-absent write.
    ///
    /// A team that already exists with the same mode and members is returned
    /// as is, so a retried registration does not fail on its own earlier write.
    pub async fn create_team(
        &self,
        name: &str,
        mode: TeamMode,
        members: Vec<String>,
    ) -> RegistrationResult<TeamEntity> {
        let team = TeamEntity {
            team_name: name.to_owned(),
            mode,
            members,
            created_at: SystemTime::now(),
            finalized_strategy: None,
        };
        let document = to_document(TEAMS_COLLECTION, name, &team)?;

        match self
            .store
            .create_document(TEAMS_COLLECTION, name, document)
            .await
        {
            Ok(()) => {
                info!(team_name = name, mode = ?mode, "team created");
                Ok(team)
            }
            Err(StorageError::AlreadyExists { .. }) => match self.find_team(name).await? {
                Some(existing) if existing.mode == team.mode && existing.members == team.members => {
                    Ok(existing)
                }
                _ => Err(RegistrationError::NameTaken {
                    name: name.to_owned(),
                }),
            },
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::document_store::MemoryDocumentStore;

    #[test]
    fn names_are_normalised() {
        assert_eq!(normalize_team_name("  alpha   team "), "ALPHA TEAM");
        assert_eq!(normalize_team_name("bravo"), "BRAVO");
    }

    #[test]
    fn validation_rejects_short_long_and_symbols() {
        assert!(validate_team_name("AB", 3).is_err());
        assert!(validate_team_name("ABC", 3).is_ok());
        assert!(validate_team_name("TEAM-1_X", 3).is_ok());
        assert!(validate_team_name("A/B", 3).is_err());
        assert!(validate_team_name(&"X".repeat(MAX_TEAM_NAME_LEN + 1), 3).is_err());
    }

    #[tokio::test]
    async fn concurrent_claims_have_one_winner() {
        let teams = TeamStore::new(Arc::new(MemoryDocumentStore::new()));
        let mut handles = Vec::new();
        for n in 0..8 {
            let teams = teams.clone();
            handles.push(tokio::spawn(async move {
                teams
                    .create_team("CHARLIE", TeamMode::Solo, vec![format!("u{n}")])
                    .await
            }));
        }

        let mut winners = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => winners += 1,
                Err(RegistrationError::NameTaken { name }) => assert_eq!(name, "CHARLIE"),
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }
        assert_eq!(winners, 1);
        assert!(teams.exists("CHARLIE").await.unwrap());
    }

    #[tokio::test]
    async fn retrying_the_same_team_is_idempotent() {
        let teams = TeamStore::new(Arc::new(MemoryDocumentStore::new()));
        let members = vec!["a".to_string(), "b".to_string()];
        let first = teams
            .create_team("BRAVO", TeamMode::Duo, members.clone())
            .await
            .unwrap();
        let second = teams
            .create_team("BRAVO", TeamMode::Duo, members)
            .await
            .unwrap();
        assert_eq!(first.created_at, second.created_at);
    }
}
