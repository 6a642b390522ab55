//! Media Viewer server binary.
//!
//! Wires the catalogue store, memory governor, indexer, thumbnail engine,
//! and WebAuthn service into one [`state::AppState`], then serves the HTTP
//! surface built by [`routes::create_app`].

pub mod config;
pub mod errors;
pub mod middleware;
pub mod range;
pub mod routes;
pub mod state;
pub mod streaming;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use dashmap::DashMap;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use viewer_core::fs_resilience::{RealFs, ResilientFs};
use viewer_core::indexer::{Indexer, IndexerConfig};
use viewer_core::memory::{MemoryGovernor, MemoryGovernorConfig};
use viewer_core::session::webauthn::{RelyingPartyConfig, WebauthnService};
use viewer_core::store::CatalogueStore;
use viewer_core::thumbnail::{ImageThumbnailBuilder, ThumbnailConfig, ThumbnailEngine};

use config::Config;
use state::{AppState, Fs};

/// Configuration could not be resolved or a required directory is unwritable.
const EXIT_CONFIG_ERROR: i32 = 1;
/// The server started but failed during an unrecoverable runtime error.
const EXIT_RUNTIME_ERROR: i32 = 2;

/// CLI overrides for the handful of settings worth flipping without
/// touching the environment. Every flag also binds its equivalent env var
/// so `--port` and `PORT` are interchangeable.
#[derive(Parser, Debug)]
#[command(name = "viewer-server")]
#[command(about = "Self-hosted media viewer")]
struct Args {
    /// HTTP listen port (overrides PORT).
    #[arg(long, env = "PORT")]
    port: Option<u16>,
    /// Media tree root (overrides MEDIA_DIR).
    #[arg(long, env = "MEDIA_DIR")]
    media_dir: Option<PathBuf>,
    /// Thumbnail/transcode cache root (overrides CACHE_DIR).
    #[arg(long, env = "CACHE_DIR")]
    cache_dir: Option<PathBuf>,
    /// SQLite database directory (overrides DATABASE_DIR).
    #[arg(long, env = "DATABASE_DIR")]
    database_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let mut config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            std::process::exit(EXIT_CONFIG_ERROR);
        }
    };
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(media_dir) = args.media_dir {
        config.media_dir = media_dir;
    }
    if let Some(cache_dir) = args.cache_dir {
        config.cache_dir = cache_dir;
    }
    if let Some(database_dir) = args.database_dir {
        config.database_dir = database_dir;
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("viewer_server={0},viewer_core={0}", config.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(err) = config.ensure_directories() {
        error!(%err, "failed to prepare cache/database directories");
        std::process::exit(EXIT_CONFIG_ERROR);
    }

    if let Err(err) = run(config).await {
        error!(%err, "fatal runtime error");
        std::process::exit(EXIT_RUNTIME_ERROR);
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let config = Arc::new(config);
    info!(media_dir = %config.media_dir.display(), "starting media viewer");

    let store = Arc::new(CatalogueStore::open(&config.database_path()).await?);

    let memory = MemoryGovernor::new(MemoryGovernorConfig {
        explicit_limit_bytes: config.memory_limit_bytes,
        container_limit_bytes: config.container_limit_bytes,
        ratio: config.memory_ratio,
        ..Default::default()
    });
    let memory_handle = memory.clone().spawn();

    let fs: Arc<Fs> = Arc::new(ResilientFs::new(RealFs::new(), "media"));

    let indexer = Arc::new(Indexer::new(
        fs.clone(),
        store.clone(),
        memory.clone(),
        IndexerConfig {
            media_root: config.media_dir.clone(),
            full_scan_interval: config.index_interval,
            poll_interval: config.poll_interval,
            workers: config.index_workers,
            ..Default::default()
        },
    ));
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let indexer_handle = indexer.clone().spawn(shutdown_rx);

    let thumbnail_builder = Arc::new(ImageThumbnailBuilder::new(fs.clone(), None, 512));
    let thumbnails = Arc::new(ThumbnailEngine::new(
        fs.clone(),
        store.clone(),
        memory.clone(),
        thumbnail_builder,
        config.thumbnail_cache_dir(),
        config.media_dir.clone(),
        ThumbnailConfig {
            sweep_interval: config.thumbnail_interval,
            ..Default::default()
        },
    ));

    let webauthn = Arc::new(WebauthnService::new(&RelyingPartyConfig {
        id: config.webauthn_rp_id.clone(),
        name: config.webauthn_rp_name.clone(),
        origins: config.webauthn_origins.clone(),
    })?);

    let state = AppState {
        config: config.clone(),
        store: store.clone(),
        fs,
        memory: memory.clone(),
        indexer,
        thumbnails,
        webauthn,
        webauthn_ceremonies: Arc::new(DashMap::new()),
    };

    let cleanup_store = store.clone();
    let session_cleanup_interval = config.session_cleanup;
    let cleanup_handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(session_cleanup_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(err) = cleanup_store.delete_expired_sessions().await {
                warn!(%err, "expired session cleanup failed");
            }
        }
    });

    let app = routes::create_app(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "listening");

    let metrics_handle = if config.metrics_enabled && config.metrics_port != config.port {
        let metrics_addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
        let metrics_listener = tokio::net::TcpListener::bind(metrics_addr).await?;
        info!(%metrics_addr, "metrics listening");
        Some(tokio::spawn(async move {
            if let Err(err) = axum::serve(metrics_listener, routes::metrics_router()).await {
                error!(%err, "metrics server failed");
            }
        }))
    } else {
        None
    };

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(handle) = metrics_handle {
        handle.abort();
    }

    info!("shutdown signal received, stopping background tasks");
    let _ = shutdown_tx.send(true);
    memory.shutdown();
    cleanup_handle.abort();
    let _ = indexer_handle.await;
    let _ = memory_handle.await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
