//! State of one inbound scrape

use crate::config::{Catalog, ResourceId};
use crate::document::{MetricFamily, Node};
use crate::fetch::{FetchError, Fetcher, SnapshotCache};
use crate::forwarder;
use crate::observability::{SelfMetrics, SourceTiming};
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

/// Created per scrape and dropped once the response is written
pub struct Snapshot {
    pub id: Uuid,
    pub started: Instant,
    pub metrics: SelfMetrics,
    /// Cancelled when the deadline passes or the response is composed
    pub cancel: CancellationToken,
    documents: SnapshotCache<Arc<Node>>,
    expositions: SnapshotCache<Arc<Vec<MetricFamily>>>,
}

impl Snapshot {
    pub fn new() -> prometheus::Result<Self> {
        Ok(Self {
            id: Uuid::now_v7(),
            started: Instant::now(),
            metrics: SelfMetrics::new()?,
            cancel: CancellationToken::new(),
            documents: SnapshotCache::new(),
            expositions: SnapshotCache::new(),
        })
    }

    /// Decoded document of an api resource, fetched at most once per snapshot
    pub async fn document(
        &self,
        catalog: &Catalog,
        fetcher: &Fetcher,
        id: ResourceId,
    ) -> Result<Arc<Node>, FetchError> {
        let resource = catalog.resource(id);
        self.documents
            .get_or_load(&resource.url, || async {
                let service = catalog.service(resource.service);
                let start = Instant::now();
                let body = fetcher.fetch(catalog, id).await;
                let response = start.elapsed();
                let doc = body.and_then(|body| resource.decoder.decode(&body).map_err(FetchError::from));

                self.metrics.data_source(
                    &service.name,
                    &service.instance(),
                    &resource.url,
                    SourceTiming {
                        response,
                        total: start.elapsed(),
                    },
                );
                debug!(url = %resource.url, ok = doc.is_ok(), "Loaded document");
                doc.map(Arc::new)
            })
            .await
    }

    /// Relabelled families of a forwarder resource, fetched at most once per snapshot
    pub async fn exposition(
        &self,
        catalog: &Catalog,
        fetcher: &Fetcher,
        id: ResourceId,
    ) -> Result<Arc<Vec<MetricFamily>>, FetchError> {
        let resource = catalog.resource(id);
        self.expositions
            .get_or_load(&resource.url, || async {
                let service = catalog.service(resource.service);
                let start = Instant::now();
                let body = fetcher.fetch(catalog, id).await;
                let response = start.elapsed();
                let families = body.and_then(|body| {
                    forwarder::relabel(&body, service).map_err(FetchError::from)
                });

                self.metrics.forwarder(
                    &service.name,
                    &service.instance(),
                    &resource.url,
                    SourceTiming {
                        response,
                        total: start.elapsed(),
                    },
                );
                debug!(url = %resource.url, ok = families.is_ok(), "Loaded forwarded body");
                families.map(Arc::new)
            })
            .await
    }

    /// Upstream loads issued by this snapshot
    pub fn fetches(&self) -> usize {
        self.documents.loads() + self.expositions.loads()
    }
}
