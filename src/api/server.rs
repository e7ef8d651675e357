use std::net::SocketAddr;

use axum::{Router, routing::get};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{compression::CompressionLayer, trace::TraceLayer};
use tracing::info;

use super::{
    services::{health, metrics},
    state::AppState,
};
use crate::config::Config;
use crate::scrape::Scraper;

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Routes of the exporter. Non-GET requests on either route answer 405.
pub fn router(state: AppState, metrics_path: &str) -> Router {
    Router::new()
        .route(metrics_path, get(metrics))
        .route("/health", get(health))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new()),
        )
}

pub async fn run(config: Config, address: SocketAddr) -> Result<(), AnyError> {
    let scraper = Scraper::from_config(&config)?;
    let state = AppState::new(scraper);
    let app = router(state.clone(), &config.server.metrics_path);

    let listener = TcpListener::bind(address).await?;
    info!(
        %address,
        metrics_path = %config.server.metrics_path,
        services = state.scraper.catalog().services().len(),
        "scrapeproxy listening"
    );

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let pool = state.scraper.pool();
    pool.shutdown();
    pool.wait().await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
