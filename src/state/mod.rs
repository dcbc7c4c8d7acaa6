//! Shared application state and the per-session registration state machine.

pub mod registration;

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{RwLock, watch};
use uuid::Uuid;

use crate::{
    config::AppConfig,
    dao::document_store::DocumentStore,
    error::{RegistrationError, RegistrationResult, ServiceError},
    identity::IdentityProvider,
    services::{
        leaderboard_service::LeaderboardCache, match_engine::MatchEngineClient,
        registration::TeamFormationController,
    },
};

/// Handle passed to every handler and background task.
pub type SharedState = Arc<AppState>;

/// Slot holding the installed document store and the degraded flag.
///
/// Shared between the application state and every registration session so
/// a reconnect performed by the supervisor is picked up everywhere.
pub struct StoreSlot {
    store: RwLock<Option<Arc<dyn DocumentStore>>>,
    degraded: watch::Sender<bool>,
}

impl StoreSlot {
    /// Empty slot; starts in degraded mode.
    pub fn new() -> Arc<Self> {
        let (degraded, _rx) = watch::channel(true);
        Arc::new(Self {
            store: RwLock::new(None),
            degraded,
        })
    }

    /// Slot pre-filled with `store`.
    pub fn with_store(store: Arc<dyn DocumentStore>) -> Arc<Self> {
        let (degraded, _rx) = watch::channel(false);
        Arc::new(Self {
            store: RwLock::new(Some(store)),
            degraded,
        })
    }

    /// Current store, if one is installed.
    pub async fn get(&self) -> Option<Arc<dyn DocumentStore>> {
        self.store.read().await.as_ref().cloned()
    }

    /// Current store, or [`RegistrationError::StoreUnavailable`] in degraded mode.
    pub async fn require(&self) -> RegistrationResult<Arc<dyn DocumentStore>> {
        self.get().await.ok_or_else(RegistrationError::degraded)
    }

    /// Install `store` and leave degraded mode.
    pub async fn install(&self, store: Arc<dyn DocumentStore>) {
        *self.store.write().await = Some(store);
        self.update_degraded(false);
    }

    /// Drop the store and enter degraded mode.
    pub async fn clear(&self) {
        self.store.write().await.take();
        self.update_degraded(true);
    }

    /// Whether no store is usable right now.
    pub fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Update and broadcast the degraded flag when the value changes.
    pub fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            let changed = *current != value;
            *current = value;
            changed
        });
    }

    /// Receiver notified on every flip of the degraded flag.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }
}

/// Central application state: store slot, sessions and outbound clients.
pub struct AppState {
    stores: Arc<StoreSlot>,
    config: AppConfig,
    identity: Arc<dyn IdentityProvider>,
    sessions: DashMap<Uuid, TeamFormationController>,
    leaderboard: LeaderboardCache,
    match_engine: MatchEngineClient,
}

impl AppState {
    /// Build the shared state; the application starts in degraded mode until
    /// a storage backend is installed.
    pub fn new(
        config: AppConfig,
        identity: Arc<dyn IdentityProvider>,
    ) -> Result<SharedState, ServiceError> {
        Self::with_stores(config, identity, StoreSlot::new())
    }

    /// Same as [`AppState::new`] with a caller provided store slot.
    pub fn with_stores(
        config: AppConfig,
        identity: Arc<dyn IdentityProvider>,
        stores: Arc<StoreSlot>,
    ) -> Result<SharedState, ServiceError> {
        let match_engine = MatchEngineClient::new(config.match_engine.clone())?;
        Ok(Arc::new(Self {
            leaderboard: LeaderboardCache::new(config.leaderboard_cache_ttl),
            stores,
            config,
            identity,
            sessions: DashMap::new(),
            match_engine,
        }))
    }

    /// Loaded configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Slot shared with the sessions.
    pub fn stores(&self) -> &Arc<StoreSlot> {
        &self.stores
    }

    /// Provider used to sign users in.
    pub fn identity(&self) -> &Arc<dyn IdentityProvider> {
        &self.identity
    }

    /// Registry of live registration sessions.
    pub fn sessions(&self) -> &DashMap<Uuid, TeamFormationController> {
        &self.sessions
    }

    /// Cached leaderboard snapshot.
    pub fn leaderboard(&self) -> &LeaderboardCache {
        &self.leaderboard
    }

    /// Client for the sandbox match engine.
    pub fn match_engine(&self) -> &MatchEngineClient {
        &self.match_engine
    }

    /// Obtain a handle to the current document store, if one is installed.
    pub async fn document_store(&self) -> Option<Arc<dyn DocumentStore>> {
        self.stores.get().await
    }

    /// Current store, or [`ServiceError::Degraded`].
    pub async fn require_document_store(&self) -> Result<Arc<dyn DocumentStore>, ServiceError> {
        self.stores.get().await.ok_or(ServiceError::Degraded)
    }

    /// Install a new document store and leave degraded mode.
    pub async fn set_document_store(&self, store: Arc<dyn DocumentStore>) {
        self.stores.install(store).await;
    }

    /// Remove the current document store and enter degraded mode.
    pub async fn clear_document_store(&self) {
        self.stores.clear().await;
    }

    /// See [`StoreSlot::is_degraded`].
    pub fn is_degraded(&self) -> bool {
        self.stores.is_degraded()
    }

    /// See [`StoreSlot::update_degraded`].
    pub fn update_degraded(&self, value: bool) {
        self.stores.update_degraded(value);
    }

    /// See [`StoreSlot::degraded_watcher`].
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.stores.degraded_watcher()

    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::document_store::MemoryDocumentStore;

    #[tokio::test]
    async fn installing_a_store_leaves_degraded_mode() {
        let slot = StoreSlot::new();
        let mut watcher = slot.degraded_watcher();
        assert!(slot.is_degraded());
        assert!(matches!(
            slot.require().await,
            Err(RegistrationError::StoreUnavailable { .. })
        ));

        slot.install(Arc::new(MemoryDocumentStore::new())).await;
        watcher.changed().await.unwrap();
        assert!(!*watcher.borrow());
        assert!(slot.require().await.is_ok());

        slot.clear().await;
        assert!(slot.is_degraded());
    }
}
