use axum::{Json, http::StatusCode, response::IntoResponse};
use thiserror::Error;

use super::models::ErrorResponse;
use crate::scrape::ScrapeError;

/// Failures that reach the HTTP client. Upstream problems never do: they are
/// folded into the scrape body as `_up 0` series.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("scrape failed: {0}")]
    Scrape(#[from] ScrapeError),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Scrape(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Scrape(_) => "SCRAPE_FAILED",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = ErrorResponse {
            code: self.code(),
            message: self.to_string(),
        };

        (status, Json(body)).into_response()
    }
}
