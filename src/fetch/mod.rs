//! Upstream access
//!
//! [`Upstream`] performs one request and returns the raw body. [`Fetcher`]
//! layers CSRF tokens on top: it attaches the scope's token, and when the
//! data request fails with a status the refresh policy matches, it
//! invalidates the token and retries exactly once.

pub mod cache;
pub mod http;
pub mod token;

pub use cache::SnapshotCache;
pub use http::{HttpConfig, HttpUpstream};
pub use token::TokenManager;

use crate::config::{Catalog, Protocol, RefreshPolicy, ResourceId};
use crate::document::DecodeError;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Method;
use std::path::PathBuf;
use thiserror::Error;
use tracing::debug;

/// Failures are cloned into every task that shares a cached fetch.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {reason}")]
    Transport { url: String, reason: String },

    #[error("{url} returned HTTP {status}")]
    UpstreamStatus { url: String, status: u16 },

    #[error("response from {url} exceeds {limit} bytes")]
    BodyTooLarge { url: String, limit: u64 },

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("cannot obtain token from {url}: {reason}")]
    Auth { url: String, reason: String },

    #[error("request cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, FetchError>;

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: Method,
    pub url: String,
    /// Optional `(name, value)` header, used for the auth token
    pub header: Option<(String, String)>,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            header: None,
        }
    }
}

/// One request, one body. No retries.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<Bytes>;
}

/// Reads `file://` resources from disk
#[derive(Debug, Clone)]
pub struct FileUpstream {
    max_body_bytes: u64,
}

impl FileUpstream {
    pub fn new(max_body_bytes: u64) -> Self {
        Self { max_body_bytes }
    }
}

#[async_trait]
impl Upstream for FileUpstream {
    async fn fetch(&self, request: &FetchRequest) -> Result<Bytes> {
        let path = PathBuf::from(request.url.strip_prefix("file://").unwrap_or(&request.url));
        let transport = |reason: String| FetchError::Transport {
            url: request.url.clone(),
            reason,
        };

        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|e| transport(e.to_string()))?;
        if metadata.len() > self.max_body_bytes {
            return Err(FetchError::BodyTooLarge {
                url: request.url.clone(),
                limit: self.max_body_bytes,
            });
        }

        let body = tokio::fs::read(&path)
            .await
            .map_err(|e| transport(e.to_string()))?;
        debug!(path = %path.display(), size = body.len(), "Read file resource");
        Ok(Bytes::from(body))
    }
}

/// Resource fetches with auth handling
pub struct Fetcher {
    http: Box<dyn Upstream>,
    file: FileUpstream,
    tokens: TokenManager,
    refresh_on: RefreshPolicy,
}

impl Fetcher {
    /// `http` serves both `http` and `https` services
    pub fn new(
        http: impl Upstream + 'static,
        file: FileUpstream,
        tokens: TokenManager,
        refresh_on: RefreshPolicy,
    ) -> Self {
        Self {
            http: Box::new(http),
            file,
            tokens,
            refresh_on,
        }
    }

    pub fn upstream(&self, protocol: Protocol) -> &dyn Upstream {
        match protocol {
            Protocol::File => &self.file,
            Protocol::Http | Protocol::Https => self.http.as_ref(),
        }
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    /// Fetch a resource's body, attaching and refreshing its token as needed
    pub async fn fetch(&self, catalog: &Catalog, id: ResourceId) -> Result<Bytes> {
        let resource = catalog.resource(id);
        let service = catalog.service(resource.service);
        let upstream = self.upstream(service.protocol);
        let mut request = FetchRequest::new(resource.method.clone(), resource.url.clone());

        let auth = catalog
            .auth_for(id)
            .filter(|_| service.protocol.is_http());
        let Some((scope, spec)) = auth else {
            return upstream.fetch(&request).await;
        };

        let token = self.tokens.token_for(scope, upstream).await?;
        request.header = Some((spec.token_header_key.clone(), token.clone()));

        match upstream.fetch(&request).await {
            Err(FetchError::UpstreamStatus { status, .. }) if self.refresh_on.should_refresh(status) => {
                debug!(
                    service = %service.name,
                    resource = %resource.name,
                    status,
                    "Refreshing token and retrying once"
                );
                self.tokens.invalidate(scope, &token).await;
                let fresh = self.tokens.token_for(scope, upstream).await?;
                request.header = Some((spec.token_header_key.clone(), fresh));
                upstream.fetch(&request).await
            }
            other => other,
        }
    }
}
