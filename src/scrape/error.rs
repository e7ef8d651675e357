use crate::fetch::FetchError;
use crate::shape::ShapeError;
use crate::worker::PoolError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Shape(#[from] ShapeError),

    #[error("scrape deadline elapsed")]
    Timeout,

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("self-metrics registry: {0}")]
    SelfMetrics(#[from] prometheus::Error),
}

impl ScrapeError {
    /// Short kind for structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            ScrapeError::Fetch(FetchError::Transport { .. }) => "transport",
            ScrapeError::Fetch(FetchError::UpstreamStatus { .. }) => "upstream_status",
            ScrapeError::Fetch(FetchError::BodyTooLarge { .. }) => "body_too_large",
            ScrapeError::Fetch(FetchError::Decode(_)) => "decode",
            ScrapeError::Fetch(FetchError::Auth { .. }) => "auth",
            ScrapeError::Fetch(FetchError::Cancelled) | ScrapeError::Timeout => "timeout",
            ScrapeError::Shape(ShapeError::Path(_)) => "path",
            ScrapeError::Shape(_) => "shape",
            ScrapeError::Pool(_) => "pool",
            ScrapeError::SelfMetrics(_) => "self_metrics",
        }
    }
}
