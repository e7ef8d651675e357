//! HTTP upstream

use super::{FetchError, FetchRequest, Result, Upstream};
use crate::config::ScrapeConfig;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::debug;

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub max_body_bytes: u64,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(3),
            request_timeout: Duration::from_secs(5),
            max_body_bytes: 10 * 1024 * 1024,
            user_agent: concat!("scrapeproxy/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl From<&ScrapeConfig> for HttpConfig {
    fn from(scrape: &ScrapeConfig) -> Self {
        Self {
            connect_timeout: scrape.connect_timeout,
            request_timeout: scrape.request_timeout,
            max_body_bytes: scrape.max_body_bytes.as_u64(),
            user_agent: scrape.user_agent.clone(),
        }
    }
}

/// Shared reqwest client; gzip bodies are decoded transparently
#[derive(Debug, Clone)]
pub struct HttpUpstream {
    client: Client,
    config: HttpConfig,
}

impl HttpUpstream {
    pub fn new(config: HttpConfig) -> std::result::Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .user_agent(&config.user_agent)
            .gzip(true)
            .build()?;

        Ok(Self { client, config })
    }

    fn transport(url: &str, err: reqwest::Error) -> FetchError {
        let reason = if err.is_timeout() {
            "timed out".to_string()
        } else if err.is_connect() {
            format!("connection failed: {err}")
        } else {
            err.to_string()
        };
        FetchError::Transport {
            url: url.to_string(),
            reason,
        }
    }

    fn too_large(&self, url: &str) -> FetchError {
        FetchError::BodyTooLarge {
            url: url.to_string(),
            limit: self.config.max_body_bytes,
        }
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn fetch(&self, request: &FetchRequest) -> Result<Bytes> {
        let url = request.url.as_str();
        debug!(url, method = %request.method, "Fetching upstream");

        let mut builder = self.client.request(request.method.clone(), url);
        if let Some((name, value)) = &request.header {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Self::transport(url, e))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(FetchError::UpstreamStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        // Only trustworthy for identity-encoded bodies, re-checked below
        if let Some(len) = response.content_length() {
            if len > self.config.max_body_bytes {
                return Err(self.too_large(url));
            }
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| Self::transport(url, e))?;
        if body.len() as u64 > self.config.max_body_bytes {
            return Err(self.too_large(url));
        }

        debug!(url, size = body.len(), "Upstream fetch completed");
        Ok(body)
    }
}
