use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api_rest::{AppState, router};
use epi_core::{DEFAULT_REST_ADDR, FileWatcher, IngestService, config::core_config_from_env};

/// Main entry point for the epi application
///
/// Runs the whole pipeline in one process:
/// - a startup pass converting the source file into the output bundle
/// - a watcher re-running the pipeline (and delivering) whenever the source file changes
/// - the REST server for inbound updates, reversal and static pages
///
/// # Environment Variables
/// - `EPI_REST_ADDR`: REST server address (default: "0.0.0.0:8000")
/// - `EPI_SOURCE_FILE`, `EPI_OUTPUT_FILE`, `EPI_STATIC_DIR`: file locations
/// - `EPI_MAPPER`, `EPI_COUNTRY_KEY`, `EPI_MISSING_CASES`: mapping options
/// - `EPI_DELIVERY_URL`, `EPI_DELIVERY_PAYLOAD`, `EPI_DELIVERY_TIMEOUT_SECS`: outbound delivery
/// - `EPI_WATCH_DEBOUNCE_MS`: watcher debounce
///
/// # Returns
/// * `Ok(())` - If the server runs and shuts down cleanly
/// * `Err(anyhow::Error)` - If configuration, watcher setup or the server fails
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("epi=info".parse()?)
                .add_directive("api_rest=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let rest_addr = std::env::var("EPI_REST_ADDR").unwrap_or_else(|_| DEFAULT_REST_ADDR.into());

    let cfg = Arc::new(core_config_from_env()?);
    let service = IngestService::new(cfg.clone())?;

    // Startup pass
    match service.load_and_convert() {
        Ok(bundle) => tracing::info!("++ Startup conversion produced {} entries", bundle.len()),
        Err(e) => tracing::error!("Startup conversion failed: {}", e),
    }

    // Source file watcher
    let handle = tokio::runtime::Handle::current();
    let watch_service = service.clone();
    let _watch = FileWatcher::subscribe(cfg.source_file(), cfg.watch_debounce(), move |bytes| {
        let service = watch_service.clone();
        handle.spawn(async move {
            if let Err(e) = service.handle_file_change(bytes).await {
                tracing::error!("Failed to process source file change: {}", e);
            }
        });
    })?;

    tracing::info!("++ Starting epi REST on {}", rest_addr);

    let app = router(AppState { service });
    let listener = tokio::net::TcpListener::bind(&rest_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await?;

    tracing::info!("-- epi stopped");
    Ok(())
}
