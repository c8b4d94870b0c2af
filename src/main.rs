//! Lobby relay entrypoint: REST table access, lobby endpoints and the change stream.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use bunker_lobby::{
    config::AppConfig,
    dao::record_store::{
        RecordStore,
        memory::MemoryRecordStore,
        postgrest::{PostgrestConfig, PostgrestRecordStore},
    },
    dao::storage::StorageError,
    routes,
    services::{change_events, storage_supervisor},
    state::{AppState, PublicEndpoints, SharedState},
};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let endpoints = PublicEndpoints {
        store_url: env_var("PUBLIC_STORE_URL").or_else(|| env_var("RECORD_STORE_URL")),
        anon_key: env_var("PUBLIC_STORE_KEY"),
    };
    let app_state = AppState::new(config, endpoints);

    tokio::spawn(change_events::forward_degraded_changes(app_state.clone()));
    start_record_store(&app_state).await;

    let app = build_router(app_state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting relay");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// Supervise the configured PostgREST store, or serve from memory when none is configured.
async fn start_record_store(state: &SharedState) {
    match PostgrestConfig::from_env() {
        Ok(config) => {
            info!(url = %config.base_url, "relaying to record store");
            tokio::spawn(storage_supervisor::run(state.clone(), move || {
                let config = config.clone();
                async move {
                    let store = PostgrestRecordStore::connect(config).map_err(StorageError::from)?;
                    Ok::<_, StorageError>(Arc::new(store) as Arc<dyn RecordStore>)
                }
            }));
        }
        Err(err) => {
            warn!(error = %err, "no record store configured; serving from memory");
            state
                .install_record_store(Arc::new(MemoryRecordStore::new()))
                .await;
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.is_empty())
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
                warn!(error = %err, "failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
