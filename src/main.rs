mod config;
mod connection;
mod db;
mod error;
mod handlers;
mod store;
#[cfg(test)]
mod testing;
mod vulcan;

use anyhow::{Context, Result};
use axum::Router;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::connection::cipher::ConnectionCipher;
use crate::store::JsonFileStore;

#[derive(Parser, Debug)]
#[command(name = "sql-publisher")]
#[command(about = "Publish ad-hoc SQL queries as HTTP endpoints", long_about = None)]
struct Args {
    /// Host for HTTP server
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port for HTTP server
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Base path when running behind reverse proxy (e.g. /sql-publisher)
    #[arg(long, default_value = "/")]
    base_path: String,

    /// State file for published APIs (defaults to the app config directory)
    #[arg(long)]
    state_file: Option<PathBuf>,

    /// Passphrase for connection URL encryption; a generated key file is used when unset
    #[arg(long, env = "SQL_PUBLISHER_SECRET", hide_env_values = true)]
    secret: Option<String>,

    /// Re-read the state file on every access
    #[arg(long)]
    reload_state: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();

    config::init_directories()?;
    let key = config::resolve_connection_key(args.secret.as_deref())?;
    let state_path = match args.state_file {
        Some(path) => path,
        None => config::get_state_path()?,
    };
    let store = JsonFileStore::open(&state_path, args.reload_state)
        .await
        .with_context(|| format!("Failed to open state file {}", state_path.display()))?;
    tracing::info!("Using state file {}", store.path().display());

    let state = Arc::new(handlers::AppState::new(
        Arc::new(store),
        Arc::new(db::SqlxRunner),
        ConnectionCipher::new(key),
    ));

    let base_path = config::normalize_base_path(&args.base_path);
    let router = handlers::build_router(state);
    let app = if base_path == "/" {
        router
    } else {
        Router::new().nest(&base_path, router)
    }
    .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on http://{}{}", addr, base_path);

    axum::serve(listener, app).await?;

    Ok(())
}
