//! tos-registration binary entrypoint wiring REST, SSE and the document store supervisor.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use serde_json::Value;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tos_registration::{
    config::{AccountConfig, AppConfig},
    dao::{
        document_store::{DocumentStore, MemoryDocumentStore},
        storage::StorageError,
        users::{USERS_COLLECTION, profile_document},
    },
    identity::static_provider::StaticIdentityProvider,
    routes,
    services::{registration, storage_supervisor},
    state::{AppState, SharedState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let identity = Arc::new(StaticIdentityProvider::new(&config.accounts));
    if identity.is_empty() {
        warn!("no accounts configured; every login will be refused");
    }

    let backend = env::var("STORE_BACKEND").unwrap_or_else(|_| "mongo".into());
    let accounts = config.accounts.clone();
    let app_state = AppState::new(config, identity).context("building application state")?;

    spawn_store_supervisor(app_state.clone(), &backend, accounts)?;
    tokio::spawn(registration::run_idle_sweeper(app_state.clone()));
    let app = build_router(app_state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, backend = %backend, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// Start the background supervisor for the backend named by `STORE_BACKEND`.
fn spawn_store_supervisor(
    state: SharedState,
    backend: &str,
    accounts: Vec<AccountConfig>,
) -> anyhow::Result<()> {
    match backend {
        "memory" => {
            tokio::spawn(storage_supervisor::run(state, move || {
                let accounts = accounts.clone();
                async move {
                    let store = MemoryDocumentStore::new();
                    seed_profiles(&store, &accounts).await?;
                    Ok::<_, StorageError>(Arc::new(store) as Arc<dyn DocumentStore>)
                }
            }));
        }
        #[cfg(feature = "mongo-store")]
        "mongo" => {
            use tos_registration::dao::document_store::mongodb::{MongoConfig, MongoDocumentStore};

            let uri =
                env::var("MONGO_URI").unwrap_or_else(|_| "mongodb://localhost:27017".into());
            let db_name = env::var("MONGO_DB").ok();
            tokio::spawn(storage_supervisor::run(state, move || {
                let uri = uri.clone();
                let db_name = db_name.clone();
                async move {
                    let config = MongoConfig::from_uri(&uri, db_name.as_deref()).await?;
                    let store = MongoDocumentStore::connect(config).await?;
                    Ok::<_, StorageError>(Arc::new(store) as Arc<dyn DocumentStore>)
                }
            }));
        }
        #[cfg(feature = "couch-store")]
        "couch" => {
            use tos_registration::dao::document_store::couchdb::{CouchConfig, CouchDocumentStore};

            let config = CouchConfig::from_env().context("reading CouchDB configuration")?;
            tokio::spawn(storage_supervisor::run(state, move || {
                let config = config.clone();
                async move {
                    let store = CouchDocumentStore::connect(config).await?;
                    Ok::<_, StorageError>(Arc::new(store) as Arc<dyn DocumentStore>)
                }
            }));
        }
        other => anyhow::bail!("unsupported STORE_BACKEND `{other}`"),
    }
    Ok(())
}

/// Give every configured account a pre-registered profile in a fresh memory store.
async fn seed_profiles(
    store: &MemoryDocumentStore,
    accounts: &[AccountConfig],
) -> Result<(), StorageError> {
    for account in accounts {
        let name = account.display_name.as_deref().unwrap_or(&account.email);
        let mut profile = profile_document(name, &account.email);
        profile.insert("tos_registered".into(), Value::Bool(true));
        store
            .set_document(USERS_COLLECTION, &account.uid, profile)
            .await?;
    }
    info!(accounts = accounts.len(), "seeded in-memory user profiles");
    Ok(())
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
