//! todo-server: real-time todo lists over HTTP and WebSocket.
//!
//! Provides:
//! - List snapshots with selectable read consistency
//! - Live list sockets that push a full snapshot after every change
//! - Batched item writes, privacy toggle, list creation and history

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use todo_core::MemoryStore;
use todo_server::{router, AppState, Config, StoreAuthenticator};

#[derive(Parser, Debug)]
#[command(name = "todo-server")]
#[command(about = "Real-time todo list server")]
struct Cli {
    /// Port to listen on
    #[arg(long, default_value_t = 3000, env = "TODO_PORT")]
    port: u16,

    /// Address to bind to
    #[arg(long, default_value = "0.0.0.0", env = "TODO_BIND")]
    bind: String,

    /// Path to config directory
    #[arg(long, default_value = "./config", env = "TODO_CONFIG_PATH")]
    config_path: String,

    /// File the list store is loaded from and saved to (in-memory only if unset)
    #[arg(long, env = "TODO_DATA_FILE")]
    data_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "todo_server=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let config = Config::load(&cli.config_path)?;
    let store = Arc::new(
        MemoryStore::open(cli.data_file.as_deref())
            .with_context(|| format!("Failed to open store {:?}", cli.data_file))?,
    );
    let auth = Arc::new(StoreAuthenticator::new(Arc::clone(&store), config.session_cookie.clone()));
    let state = Arc::new(AppState::new(config, Arc::clone(&store), auth));

    let app = router(state);

    let addr: SocketAddr = format!("{}:{}", cli.bind, cli.port).parse()?;
    tracing::info!("Starting todo-server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    store.close().context("Failed to save store")?;
    tracing::info!("Todo server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
