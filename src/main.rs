//! Hand Cricket Back binary entrypoint wiring REST, WebSocket, SSE and the room store.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::{Context, bail};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hand_cricket_back::{
    config::AppConfig,
    dao::room_store::memory::MemoryRoomStore,
    routes,
    state::{AppState, SharedState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let app_state = AppState::new(config);

    let backend = env::var("STORE_BACKEND").unwrap_or_else(|_| "memory".into());
    start_storage(&app_state, backend.trim()).await?;

    // Build the HTTP router once the shared state is ready.
    let app = build_router(app_state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// Install the in-memory store right away, or supervise an external backend in the background.
async fn start_storage(state: &SharedState, backend: &str) -> anyhow::Result<()> {
    match backend {
        "memory" => {
            let atomic_rounds = state.config().atomic_rounds;
            state
                .install_room_store(Arc::new(MemoryRoomStore::new(atomic_rounds)))
                .await;
            info!(atomic_rounds, "using in-memory room store");
        }
        #[cfg(feature = "mongo-store")]
        "mongo" => {
            use hand_cricket_back::{
                dao::{
                    room_store::{
                        RoomStore,
                        mongodb::{MongoConfig, MongoRoomStore},
                    },
                    storage::StorageError,
                },
                services::storage_supervisor,
            };

            info!("using MongoDB room store");
            tokio::spawn(storage_supervisor::run(state.clone(), || async {
                let config = MongoConfig::from_env().await?;
                let store = MongoRoomStore::connect(config).await?;
                Ok::<_, StorageError>(Arc::new(store) as Arc<dyn RoomStore>)
            }));
        }
        #[cfg(feature = "couch-store")]
        "couch" => {
            use hand_cricket_back::{
                dao::{
                    room_store::{
                        RoomStore,
                        couchdb::{CouchConfig, CouchRoomStore},
                    },
                    storage::StorageError,
                },
                services::storage_supervisor,
            };

            info!("using CouchDB room store; rounds go through the fallback path");
            tokio::spawn(storage_supervisor::run(state.clone(), || async {
                let config = CouchConfig::from_env()?;
                let store = CouchRoomStore::connect(config).await?;
                Ok::<_, StorageError>(Arc::new(store) as Arc<dyn RoomStore>)
            }));
        }
        other => bail!("unsupported STORE_BACKEND `{other}` (expected memory, mongo or couch)"),
    }
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

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler; waiting for Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
