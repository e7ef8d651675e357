use axum::{
    Json,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
};
use tracing::info;

use super::{
    error::ApiError,
    models::{EXPOSITION_CONTENT_TYPE, HealthResponse},
    state::AppState,
};

/// Scrape endpoint (GET <metrics_path>)
///
/// Runs one snapshot across every configured service and answers with the
/// combined text exposition. Upstream failures only show up in the body, so
/// this answers 200 unless the self-metrics registry itself fails.
pub async fn metrics(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let outcome = state.scraper.scrape().await?;

    info!(
        fetches = outcome.fetches,
        failures = outcome.failures,
        bytes = outcome.body.len(),
        "Served scrape"
    );

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, EXPOSITION_CONTENT_TYPE)],
        outcome.body,
    ))
}

/// Liveness check (GET /health)
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let body = HealthResponse {
        status: "healthy",
        services: state.scraper.catalog().services().len(),
        workers: state.scraper.pool().workers(),
        version: env!("CARGO_PKG_VERSION"),
    };

    (StatusCode::OK, Json(body))
}
