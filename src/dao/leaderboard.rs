use std::sync::Arc;

use tracing::warn;

use crate::dao::{
    document_store::{DocumentStore, from_document},
    models::LeaderboardEntryEntity,
    storage::StorageResult,
};

/// Collection keyed by strategy name.
pub const LEADERBOARD_COLLECTION: &str = "tos_leaderboard";

/// Read side of the precomputed standings.
#[derive(Clone)]
pub struct LeaderboardStore {
    store: Arc<dyn DocumentStore>,
}

impl LeaderboardStore {
    /// Wraps the shared store.
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {

        Self { store }
    }

    /// Entries ordered by ascending rank, at most `limit` of them.
    pub async fn top_entries(&self, limit: usize) -> StorageResult<Vec<LeaderboardEntryEntity>> {
        let documents = self.store.list_documents(LEADERBOARD_COLLECTION).await?;
        let mut entries: Vec<LeaderboardEntryEntity> = documents
            .into_iter()
            .filter_map(|stored| {
                from_document(LEADERBOARD_COLLECTION, &stored.id, stored.data)
                    .inspect_err(|err| {
                        warn!(strategy = %stored.id, error = %err, "skipping malformed leaderboard entry")
                    })
                    .ok()
            })
            .collect();

        entries.sort_by(|a, b| a.rank.cmp(&b.rank).then_with(|| a.strategy.cmp(&b.strategy)));
        entries.truncate(limit);
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::document_store::{Document, MemoryDocumentStore};
    use serde_json::{Value, json};

    fn entry(strategy: &str, rank: u32) -> Document {
        match json!({
            "strategy": strategy, "rank": rank, "points": 3.0, "wins": 1, "draws": 0,
            "losses": 0, "total_nodes": 12, "matches": 1, "team_name": "ALPHA"
        }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn entries_are_sorted_limited_and_malformed_ones_skipped() {
        let memory = MemoryDocumentStore::new();
        for (strategy, rank) in [("c", 3), ("a", 1), ("b", 2)] {
            memory
                .set_document(LEADERBOARD_COLLECTION, strategy, entry(strategy, rank))
                .await
                .unwrap();
        }
        let mut broken = Document::new();
        broken.insert("rank".into(), json!("first"));
        memory
            .set_document(LEADERBOARD_COLLECTION, "broken", broken)
            .await
            .unwrap();

        let store = LeaderboardStore::new(Arc::new(memory));
        let top = store.top_entries(2).await.unwrap();
        let strategies: Vec<_> = top.iter().map(|e| e.strategy.as_str()).collect();
        assert_eq!(strategies, ["a", "b"]);
    }
}
