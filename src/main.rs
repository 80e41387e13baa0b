//! AuthGate - Authentication & Session Service
//! Mission: Issue, rotate and revoke sessions for the platform API
//!
//! Usage:
//!   authgate --port 5000 --db-path ./authgate.db
//!
//! Environment: see `config::Config::from_env` (APP_ENV, JWT_SECRET, ...)

use anyhow::{Context, Result};
use clap::Parser;
use dotenv::dotenv;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use authgate_backend::{
    api::create_router,
    auth::{AuthState, MemorySessionCache, SessionCache, UnavailableSessionCache, UserStore},
    config::Config,
};

const CACHE_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Parser, Debug)]
#[command(name = "authgate")]
#[command(about = "Authentication and session service")]
struct Args {
    /// Bind address (overrides HOST)
    #[arg(long)]
    host: Option<String>,

    /// Listen port (overrides PORT)
    #[arg(long)]
    port: Option<u16>,

    /// SQLite user database (overrides AUTH_DB_PATH)
    #[arg(long)]
    db_path: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    init_tracing();
    let args = Args::parse();

    let mut config = Config::from_env().context("Invalid configuration")?;
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(db_path) = args.db_path {
        config.db_path = db_path;
    }

    info!(
        env = config.environment.as_str(),
        api_version = %config.api_version,
        "AuthGate starting"
    );

    let user_store = Arc::new(
        UserStore::new(&config.db_path, config.bcrypt_cost)
            .context("Failed to initialize user store")?,
    );
    info!(db_path = %config.db_path, "User store initialized");

    if let Some(admin) = &config.admin {
        if user_store.ensure_admin(&admin.email, &admin.password).await? {
            info!(email = %admin.email, "Admin account bootstrapped");
        }
    }

    let session_cache: Arc<dyn SessionCache> = if config.session_cache_enabled {
        let cache = MemorySessionCache::new();
        cache.start_cleanup_task(CACHE_CLEANUP_INTERVAL);
        Arc::new(cache)
    } else {
        warn!("Session cache disabled; refresh will fail until it is enabled");
        Arc::new(UnavailableSessionCache::new())
    };

    let state = AuthState::new(&config, user_store, session_cache);
    let app = create_router(state, &config);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("API server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    info!("Server stopped");
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "authgate_backend=debug,authgate=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_env() {
    // Standard dotenv search (cwd + parents)
    let _ = dotenv();

    // Also try the crate root when launched from elsewhere
    let manifest_env = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    if manifest_env.exists() {
        let _ = dotenv::from_path(&manifest_env);
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
