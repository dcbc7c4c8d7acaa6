use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Report the degraded flag and ping the installed store, if any.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    let store_reachable = match state.document_store().await {
        Some(store) => match store.health_check().await {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, "document store health check failed");
                false
            }
        },
        None => {
            warn!("document store unavailable (degraded mode)");
            false
        }
    };

    HealthResponse::new(state.is_degraded(), store_reachable, state.sessions().len())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::document_store::MemoryDocumentStore,
        identity::static_provider::StaticIdentityProvider,
        state::{AppState, StoreSlot},
    };

    #[tokio::test]
    async fn reports_degraded_without_a_store() {
        let identity = Arc::new(StaticIdentityProvider::new(&[]));
        let state = AppState::new(AppConfig::default(), identity.clone()).unwrap();
        let health = health_status(&state).await;
        assert_eq!(health.status, "degraded");
        assert!(!health.store_reachable);

        let state = AppState::with_stores(
            AppConfig::default(),
            identity,
            StoreSlot::with_store(Arc::new(MemoryDocumentStore::new())),
        )
        .unwrap();
        let health = health_status(&state).await;
        assert_eq!(health.status, "ok");
        assert!(health.store_reachable);
        assert_eq!(health.sessions, 0);
    }
}
