//! Scrape orchestration
//!
//! Every inbound scrape creates a [`Snapshot`], plans one task per
//! (service, api resource, metric) and one per forwarder resource, submits
//! them to the [`WorkerPool`] and joins the results against a deadline.
//! Failures never abort the scrape: they become `<name>_up 0` plus the last
//! good value.
//!
//! # Task lifecycle
//!
//! ```text
//! queued -> fetching -> decoded -> shaped -> done
//!              |-- auth status --> refresh token -> fetching (once)
//!              |-- other error --> failed (last good, up = 0)
//!  deadline -> timeout (last good, up = 0)
//! ```

pub mod error;
pub mod output;
pub mod snapshot;

pub use error::ScrapeError;
pub use output::Output;
pub use snapshot::Snapshot;

use crate::config::{Catalog, Config, MetricId, ResourceId, ResourceKind, ServiceId};
use crate::document::MetricFamily;
use crate::fetch::{FetchError, Fetcher, FileUpstream, HttpConfig, HttpUpstream, TokenManager};
use crate::shape::{self, LastGood, Shaped};
use crate::worker::{PoolError, WorkerPool};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, timeout_at};
use tracing::{Instrument, debug, info_span, warn};

/// One unit of work, addressed by catalog handles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    Metric {
        service: ServiceId,
        resource: ResourceId,
        metric: MetricId,
    },
    Forward {
        service: ServiceId,
        resource: ResourceId,
    },
}

impl Task {
    pub fn service(&self) -> ServiceId {
        match self {
            Task::Metric { service, .. } | Task::Forward { service, .. } => *service,
        }
    }

    pub fn resource(&self) -> ResourceId {
        match self {
            Task::Metric { resource, .. } | Task::Forward { resource, .. } => *resource,
        }
    }
}

enum TaskValue {
    Shaped(Shaped),
    Families(Arc<Vec<MetricFamily>>),
}

struct TaskReport {
    task: Task,
    finished: Instant,
    result: Result<TaskValue, ScrapeError>,
}

impl TaskReport {
    fn failed(task: Task, error: ScrapeError) -> Self {
        Self {
            task,
            finished: Instant::now(),
            result: Err(error),
        }
    }
}

/// What one scrape produced
#[derive(Debug)]
pub struct ScrapeOutcome {
    pub body: String,
    /// Upstream loads issued by the snapshot
    pub fetches: usize,
    pub failures: usize,
}

/// Shared engine behind the metrics endpoint
pub struct Scraper {
    catalog: Arc<Catalog>,
    fetcher: Arc<Fetcher>,
    pool: Arc<WorkerPool>,
    last_good: LastGood,
    timeout: Duration,
}

impl Scraper {
    pub fn new(
        catalog: Arc<Catalog>,
        fetcher: Arc<Fetcher>,
        pool: Arc<WorkerPool>,
        timeout: Duration,
    ) -> Self {
        Self {
            catalog,
            fetcher,
            pool,
            last_good: LastGood::default(),
            timeout,
        }
    }

    /// Wire the engine from a loaded configuration. Must run inside a tokio runtime.
    pub fn from_config(config: &Config) -> Result<Self, reqwest::Error> {
        let catalog = Arc::new(config.catalog());
        let http = HttpUpstream::new(HttpConfig::from(&config.scrape))?;
        let file = FileUpstream::new(config.scrape.max_body_bytes.as_u64());
        let tokens = TokenManager::new(&catalog);
        let fetcher = Fetcher::new(http, file, tokens, config.scrape.refresh_on);
        let pool = WorkerPool::new(config.scrape.workers);

        Ok(Self::new(
            catalog,
            Arc::new(fetcher),
            Arc::new(pool),
            config.scrape.timeout,
        ))
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn fetcher(&self) -> &Fetcher {
        &self.fetcher
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Every task a snapshot runs, in configuration order
    pub fn plan(&self) -> Vec<Task> {
        let mut tasks = Vec::new();
        for service in self.catalog.services() {
            for &resource_id in &service.resources {
                let resource = self.catalog.resource(resource_id);
                match resource.kind {
                    ResourceKind::Forwarder => tasks.push(Task::Forward {
                        service: service.id,
                        resource: resource_id,
                    }),
                    ResourceKind::Api => {
                        tasks.extend(resource.metrics.iter().map(|&metric| Task::Metric {
                            service: service.id,
                            resource: resource_id,
                            metric,
                        }))
                    }
                }
            }
        }
        tasks
    }

    /// Run one full snapshot and render the response body
    pub async fn scrape(&self) -> Result<ScrapeOutcome, ScrapeError> {
        let snapshot = Arc::new(Snapshot::new()?);
        let span = info_span!("scrape", snapshot = %snapshot.id);

        async {
            let deadline = snapshot.started + self.timeout;
            let tasks = self.plan();
            debug!(tasks = tasks.len(), "Planned scrape");

            let mut reports = Vec::with_capacity(tasks.len());
            let mut pending = Vec::with_capacity(tasks.len());
            for task in tasks {
                let job = run_task(
                    task,
                    self.catalog.clone(),
                    self.fetcher.clone(),
                    snapshot.clone(),
                );
                match timeout_at(deadline, self.pool.submit(job)).await {
                    Ok(Ok(rx)) => pending.push((task, rx)),
                    Ok(Err(e)) => reports.push(TaskReport::failed(task, e.into())),
                    Err(_) => reports.push(TaskReport::failed(task, ScrapeError::Timeout)),
                }
            }

            for (task, rx) in pending {
                let report = match timeout_at(deadline, rx).await {
                    Ok(Ok(report)) => report,
                    // The job was dropped before it could answer
                    Ok(Err(_)) => TaskReport::failed(task, PoolError::Closed.into()),
                    Err(_) => TaskReport::failed(task, ScrapeError::Timeout),
                };
                reports.push(report);
            }

            // Abandon whatever is still running
            snapshot.cancel.cancel();
            self.compose(&snapshot, reports).await
        }
        .instrument(span)
        .await
    }

    async fn compose(
        &self,
        snapshot: &Snapshot,
        reports: Vec<TaskReport>,
    ) -> Result<ScrapeOutcome, ScrapeError> {
        let mut output = Output::default();
        let mut samples: HashMap<ServiceId, usize> = HashMap::new();
        let mut finished: HashMap<ServiceId, Instant> = HashMap::new();
        let mut failures = 0;

        for report in reports {
            let task = report.task;
            let service = self.catalog.service(task.service());
            let last = finished.entry(service.id).or_insert(report.finished);
            *last = (*last).max(report.finished);

            if let Err(e) = &report.result {
                failures += 1;
                warn!(
                    service = %service.name,
                    resource = %self.catalog.resource(task.resource()).name,
                    kind = e.kind(),
                    error = %e,
                    "Scrape task failed"
                );
            }

            match (task, report.result) {
                (Task::Metric { metric, .. }, result) => {
                    let def = self.catalog.metric(metric);
                    let (value, up) = match result {
                        Ok(TaskValue::Shaped(shaped)) => {
                            self.last_good.record(metric, shaped.clone()).await;
                            *samples.entry(service.id).or_default() += shaped.sample_count();
                            (Some(shaped), true)
                        }
                        _ => (self.last_good.get(metric).await, false),
                    };
                    if let Some(value) = value {
                        output.add(output::value_family(def, service, &value));
                    }
                    output.add(output::up_family(def, service, up));
                }
                (Task::Forward { .. }, Ok(TaskValue::Families(families))) => {
                    let count: usize = families.iter().map(|f| f.samples.len()).sum();
                    *samples.entry(service.id).or_default() += count;
                    output.extend(families.iter().cloned());
                }
                (Task::Forward { .. }, _) => {}
            }
        }

        for service in self.catalog.services() {
            let elapsed = finished
                .get(&service.id)
                .map(|at| at.saturating_duration_since(snapshot.started))
                .unwrap_or_default();
            let instance = service.instance();
            snapshot.metrics.scrape_duration(&service.name, &instance, elapsed);
            snapshot.metrics.samples_scraped(
                &service.name,
                &instance,
                samples.get(&service.id).copied().unwrap_or(0),
            );
        }

        let mut body = String::new();
        snapshot.metrics.encode(&mut body)?;
        crate::document::exposition::encode(&output.into_families(), &mut body);

        debug!(
            fetches = snapshot.fetches(),
            failures,
            bytes = body.len(),
            "Scrape composed"
        );

        Ok(ScrapeOutcome {
            body,
            fetches: snapshot.fetches(),
            failures,
        })
    }
}

/// The future a worker runs for one task
async fn run_task(
    task: Task,
    catalog: Arc<Catalog>,
    fetcher: Arc<Fetcher>,
    snapshot: Arc<Snapshot>,
) -> TaskReport {
    let result = tokio::select! {
        _ = snapshot.cancel.cancelled() => Err(FetchError::Cancelled.into()),
        result = execute(task, &catalog, &fetcher, &snapshot) => result,
    };

    TaskReport {
        task,
        finished: Instant::now(),
        result,
    }
}

async fn execute(
    task: Task,
    catalog: &Catalog,
    fetcher: &Fetcher,
    snapshot: &Snapshot,
) -> Result<TaskValue, ScrapeError> {
    match task {
        Task::Metric {
            resource, metric, ..
        } => {
            let doc = snapshot.document(catalog, fetcher, resource).await?;
            let shaped = shape::shape(catalog.metric(metric), &doc)?;
            Ok(TaskValue::Shaped(shaped))
        }
        Task::Forward { resource, .. } => {
            let families = snapshot.exposition(catalog, fetcher, resource).await?;
            Ok(TaskValue::Families(families))
        }
    }
}
