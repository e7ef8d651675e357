//! Observability: tracing setup and per-snapshot self-metrics

use prometheus::{GaugeVec, Opts, Registry, TextEncoder};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Install the global fmt subscriber; `RUST_LOG` overrides the `info` default
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

pub const SCRAPE_DURATION: &str = "scrape_duration_seconds";
pub const SAMPLES_SCRAPED: &str = "scrape_samples_scraped";
pub const SOURCE_SCRAPE_DURATION: &str = "data_source_scrape_duration_seconds";
pub const SOURCE_RESPONSE_DURATION: &str = "data_source_response_duration_seconds";
pub const FORWARDER_RESPONSE_DURATION: &str = "fordwader_response_duration_seconds";
pub const FORWARDER_SCRAPE_DURATION: &str = "fordwader_scrape_duration_seconds";

/// Family names owned by [`SelfMetrics`]; nothing else may emit them
pub const SELF_METRIC_NAMES: &[&str] = &[
    SCRAPE_DURATION,
    SAMPLES_SCRAPED,
    SOURCE_SCRAPE_DURATION,
    SOURCE_RESPONSE_DURATION,
    FORWARDER_RESPONSE_DURATION,
    FORWARDER_SCRAPE_DURATION,
];

const SERVICE_LABELS: &[&str] = &["job", "instance"];
const SOURCE_LABELS: &[&str] = &["job", "instance", "datasource"];

/// Self-observation gauges written fresh by every snapshot
pub struct SelfMetrics {
    registry: Registry,
    scrape_duration: GaugeVec,
    samples_scraped: GaugeVec,
    source_scrape_duration: GaugeVec,
    source_response_duration: GaugeVec,
    forwarder_response_duration: GaugeVec,
    forwarder_scrape_duration: GaugeVec,
}

impl SelfMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let gauge = |name: &str, help: &str, labels: &[&str]| -> prometheus::Result<GaugeVec> {
            let vec = GaugeVec::new(Opts::new(name, help), labels)?;
            registry.register(Box::new(vec.clone()))?;
            Ok(vec)
        };

        let scrape_duration = gauge(
            SCRAPE_DURATION,
            "Wall-clock duration of the scrape, per service",
            SERVICE_LABELS,
        )?;
        let samples_scraped = gauge(
            SAMPLES_SCRAPED,
            "Samples emitted for the service in this scrape",
            SERVICE_LABELS,
        )?;
        let source_scrape_duration = gauge(
            SOURCE_SCRAPE_DURATION,
            "Fetch and decode duration per data source",
            SOURCE_LABELS,
        )?;
        let source_response_duration = gauge(
            SOURCE_RESPONSE_DURATION,
            "Upstream round-trip duration per data source",
            SOURCE_LABELS,
        )?;
        let forwarder_response_duration = gauge(
            FORWARDER_RESPONSE_DURATION,
            "Upstream round-trip duration per forwarded source",
            SOURCE_LABELS,
        )?;
        let forwarder_scrape_duration = gauge(
            FORWARDER_SCRAPE_DURATION,
            "Fetch, parse and relabel duration per forwarded source",
            SOURCE_LABELS,
        )?;

        Ok(Self {
            registry,
            scrape_duration,
            samples_scraped,
            source_scrape_duration,
            source_response_duration,
            forwarder_response_duration,
            forwarder_scrape_duration,
        })
    }

    pub fn scrape_duration(&self, job: &str, instance: &str, elapsed: Duration) {
        self.scrape_duration
            .with_label_values(&[job, instance])
            .set(elapsed.as_secs_f64());
    }

    pub fn samples_scraped(&self, job: &str, instance: &str, samples: usize) {
        self.samples_scraped
            .with_label_values(&[job, instance])
            .set(samples as f64);
    }

    pub fn data_source(&self, job: &str, instance: &str, datasource: &str, timing: SourceTiming) {
        let labels = [job, instance, datasource];
        self.source_response_duration
            .with_label_values(&labels)
            .set(timing.response.as_secs_f64());
        self.source_scrape_duration
            .with_label_values(&labels)
            .set(timing.total.as_secs_f64());
    }

    pub fn forwarder(&self, job: &str, instance: &str, datasource: &str, timing: SourceTiming) {
        let labels = [job, instance, datasource];
        self.forwarder_response_duration
            .with_label_values(&labels)
            .set(timing.response.as_secs_f64());
        self.forwarder_scrape_duration
            .with_label_values(&labels)
            .set(timing.total.as_secs_f64());
    }

    /// Append the text exposition of every gauge that was set
    pub fn encode(&self, out: &mut String) -> prometheus::Result<()> {
        TextEncoder::new().encode_utf8(&self.registry.gather(), out)
    }
}

/// Durations measured for one data source
#[derive(Debug, Clone, Copy, Default)]
pub struct SourceTiming {
    /// Upstream round-trip
    pub response: Duration,
    /// Round-trip plus decoding
    pub total: Duration,
}
