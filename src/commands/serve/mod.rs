//! Web UI: session-authenticated browsing and search over an ingested
//! page database.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use axum::routing::get;
use rusqlite::Connection;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::cli::ServeArgs;
use crate::db::open_read_only;

mod handlers;
mod identity;
mod session;
mod views;

use identity::{IdentityProvider, PocketBaseClient};
use session::SessionStore;

#[derive(Debug, Clone)]
pub(crate) struct ServeConfig {
    pub(crate) db_path: PathBuf,
    pub(crate) bind: String,
    pub(crate) identity_url: String,
    pub(crate) identity_timeout: Duration,
    pub(crate) session_idle_timeout: Duration,
}

impl From<ServeArgs> for ServeConfig {
    fn from(args: ServeArgs) -> Self {
        Self {
            db_path: args.db_path,
            bind: args.bind,
            identity_url: args.identity_url,
            identity_timeout: Duration::from_secs(args.identity_timeout_secs),
            session_idle_timeout: Duration::from_secs(args.session_idle_minutes.saturating_mul(60)),
        }
    }
}

/// Everything a request handler needs; cloned per request.
#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) config: Arc<ServeConfig>,
    pub(crate) identity: Arc<dyn IdentityProvider>,
    pub(crate) sessions: Arc<SessionStore>,
}

impl AppState {
    pub(crate) fn new(config: ServeConfig, identity: Arc<dyn IdentityProvider>) -> Self {
        let sessions = SessionStore::new(config.session_idle_timeout);
        Self {
            config: Arc::new(config),
            identity,
            sessions: Arc::new(sessions),
        }
    }

    /// Opens a read-only connection for one unit of work on the blocking
    /// pool; the connection is closed when the closure returns or fails.
    pub(crate) async fn with_read_connection<T, F>(&self, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let db_path = self.config.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let connection = open_read_only(&db_path)?;
            work(&connection)
        })
        .await
        .context("database task did not complete")?
    }
}

pub(crate) fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::index))
        .route(
            "/login",
            get(handlers::login_page).post(handlers::login_submit),
        )
        .route(
            "/register",
            get(handlers::register_page).post(handlers::register_submit),
        )
        .route("/logout", get(handlers::logout))
        .route("/dashboard", get(handlers::dashboard))
        .route("/search", get(handlers::search))
        .with_state(state)
}

pub fn run(args: ServeArgs) -> Result<()> {
    let config = ServeConfig::from(args);

    if !config.db_path.exists() {
        warn!(
            db = %config.db_path.display(),
            "database file missing; dashboard and search will fail until it exists"
        );
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    runtime.block_on(async move {
        let identity = PocketBaseClient::new(&config.identity_url, config.identity_timeout)?;
        let listener = TcpListener::bind(&config.bind)
            .await
            .with_context(|| format!("failed to bind {}", config.bind))?;

        info!(
            bind = %config.bind,
            db = %config.db_path.display(),
            identity_url = %config.identity_url,
            "serving web UI"
        );

        let state = AppState::new(config, Arc::new(identity));
        axum::serve(listener, router(state))
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("web server failed")
    })
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
