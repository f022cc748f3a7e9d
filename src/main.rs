//! Settings Sync - engine host process
//!
//! Runs one engine context behind an HTTP API. Without `REMOTE_URL` the
//! process also serves the reference authoritative store under `/api`.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use settings_sync::persistence::{FileStorage, MemoryStorage, StorageBackend};
use settings_sync::remote::{HttpRemote, MemoryRemote, RemoteBackend};
use settings_sync::{
    create_remote_store_router, create_router, AppState, Config, Schema, SettingsEngine,
    SettingsMap,
};

/// Main entry point for the settings engine host.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Open durable storage and the remote backend
/// 4. Build and initialize the engine (starts background tasks)
/// 5. Start HTTP server on configured port
/// 6. On SIGINT/SIGTERM stop serving and destroy the engine
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "settings_sync=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Settings Sync engine");

    let config = Config::from_env();
    info!(
        "Configuration loaded: debounce={}ms, max_retries={}, cache_ttl={}s, port={}, transport={:?}",
        config.debounce_ms,
        config.max_retries,
        config.cache_ttl,
        config.server_port,
        config.transport
    );

    let storage: Arc<dyn StorageBackend> = match FileStorage::open(&config.storage_dir) {
        Ok(storage) => {
            info!("Durable storage at {}", config.storage_dir.display());
            Arc::new(storage)
        }
        Err(e) => {
            warn!("Durable storage unavailable ({}), keeping settings in memory", e);
            Arc::new(MemoryStorage::new())
        }
    };

    let schema = match &config.defaults_file {
        Some(path) => {
            let raw = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading defaults file {}", path.display()))?;
            let defaults: SettingsMap = serde_json::from_str(&raw)
                .with_context(|| format!("parsing defaults file {}", path.display()))?;
            info!("Loaded {} defaults from {}", defaults.len(), path.display());
            Schema::from_defaults(&defaults)
        }
        None => Schema::admin_defaults(),
    };

    let mut store_router = None;
    let remote: Arc<dyn RemoteBackend> = match &config.remote_url {
        Some(url) => {
            info!("Authoritative store at {}", url);
            Arc::new(HttpRemote::new(url.clone(), config.auth_token.clone())?)
        }
        None => {
            let store = MemoryRemote::new();
            store_router = Some(create_remote_store_router(
                store.clone(),
                config.auth_token.clone(),
            ));
            info!("No REMOTE_URL set, serving embedded store under /api");
            Arc::new(store)
        }
    };

    let engine = SettingsEngine::builder(config.clone())
        .schema(schema)
        .storage(storage)
        .remote(remote)
        .build();
    engine
        .initialize()
        .await
        .context("engine initialization failed")?;
    info!("Engine {} ready", engine.origin_id());

    let mut app = create_router(AppState::new(engine.clone()));
    if let Some(store) = store_router {
        app = app.merge(store);
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    engine.destroy().await;
    info!("Server shutdown complete");
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }
}
