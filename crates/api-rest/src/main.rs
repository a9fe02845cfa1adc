//! Standalone REST API server binary.
//!
//! ## Purpose
//! Runs the REST API server on its own.
//!
//! ## Intended use
//! Useful for development when you only want the inbound endpoint and static pages. The
//! workspace's main `epi-run` binary also performs the startup conversion and watches the source
//! file.

use api_rest::{router, AppState};
use epi_core::{config::core_config_from_env, IngestService, DEFAULT_REST_ADDR};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Main entry point for the epi REST API server.
///
/// # Environment Variables
/// - `EPI_REST_ADDR`: Server address (default: "0.0.0.0:8000")
/// - `EPI_*`: core configuration, see [`epi_core::config::core_config_from_env`]
///
/// # Errors
/// Returns an error if:
/// - the logging/tracing configuration cannot be initialised,
/// - the core configuration is invalid,
/// - the server address cannot be bound, or
/// - the HTTP server fails while running.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("api_rest=info".parse()?)
                .add_directive("epi=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let addr = std::env::var("EPI_REST_ADDR").unwrap_or_else(|_| DEFAULT_REST_ADDR.into());

    tracing::info!("-- Starting epi REST API on {}", addr);

    let cfg = Arc::new(core_config_from_env()?);
    let state = AppState {
        service: IngestService::new(cfg)?,
    };

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router(state)).await?;

    Ok(())
}
