//! Notably Server - HTTP edge for the Notably fact store.
//!
//! Authenticates callers by API key, scopes every operation to the caller's
//! user namespace, and maps the table/row/snapshot/history operations of the
//! engine onto a JSON HTTP surface.

mod auth;
mod config;
mod error;
mod routes;

use crate::config::{Cli, Config};
use axum::Router;
use clap::Parser;
use notably_engine::kv::{DynamoKv, KvStore};
use notably_engine::AuthBinder;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub binder: Arc<AuthBinder>,
    pub kv: Arc<dyn KvStore>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "notably_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env(&cli)?;

    tracing::info!("Starting Notably server on {}", config.addr);

    // Build the KV adapter and make sure the shared table exists
    let kv: Arc<dyn KvStore> = Arc::new(
        DynamoKv::from_env(&config.table_name, config.endpoint_url.as_deref()).await,
    );
    tracing::info!(table = %config.table_name, "Preparing backing table");
    notably_engine::ensure_table(kv.as_ref()).await?;

    // Build application state
    let state = AppState {
        binder: Arc::new(AuthBinder::new(kv.clone())),
        kv,
    };

    // Build router
    let app = Router::new()
        .merge(routes::create_routes())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.addr).await?;
    tracing::info!("Server listening on {}", config.addr);

    axum::serve(listener, app).await?;

    Ok(())
}
