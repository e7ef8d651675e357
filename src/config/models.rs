use crate::document::Decoder;
use crate::humanize::ByteSize;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub scrape: ScrapeConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    /// Services resolved from the files named in `paths`
    #[serde(skip)]
    pub services: Vec<ServiceDefinition>,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    #[serde(default = "default_metrics_path")]
    pub metrics_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            metrics_path: default_metrics_path(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

/// Which upstream statuses invalidate a CSRF token before the single retry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshPolicy {
    /// 401 and 403 only
    #[default]
    Auth,
    /// Any non-200 status
    Any,
}

impl RefreshPolicy {
    pub fn should_refresh(&self, status: u16) -> bool {
        match self {
            RefreshPolicy::Auth => status == 401 || status == 403,
            RefreshPolicy::Any => status != 200,
        }
    }
}

/// Scrape engine configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScrapeConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Deadline for a whole snapshot
    #[serde(with = "humantime_serde")]
    #[serde(default = "default_timeout")]
    pub timeout: Duration,
    #[serde(with = "humantime_serde")]
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: Duration,
    #[serde(with = "humantime_serde")]
    #[serde(default = "default_request_timeout")]
    pub request_timeout: Duration,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: ByteSize,
    #[serde(default)]
    pub refresh_on: RefreshPolicy,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            timeout: default_timeout(),
            connect_timeout: default_connect_timeout(),
            request_timeout: default_request_timeout(),
            max_body_bytes: default_max_body_bytes(),
            refresh_on: RefreshPolicy::default(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_workers() -> usize {
    6
}

fn default_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(3)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_max_body_bytes() -> ByteSize {
    ByteSize(10 * 1024 * 1024) // 10 MB
}

fn default_user_agent() -> String {
    concat!("scrapeproxy/", env!("CARGO_PKG_VERSION")).to_string()
}

/// Locations of the layered service files, relative to the main file
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PathsConfig {
    #[serde(default = "default_services_path")]
    pub services: PathBuf,
    #[serde(default = "default_metrics_map_path")]
    pub metrics_for_services: PathBuf,
    #[serde(default = "default_resources_map_path")]
    pub resource_paths_for_services: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            services: default_services_path(),
            metrics_for_services: default_metrics_map_path(),
            resource_paths_for_services: default_resources_map_path(),
        }
    }
}

fn default_services_path() -> PathBuf {
    PathBuf::from("services.toml")
}

fn default_metrics_map_path() -> PathBuf {
    PathBuf::from("metrics_for_services.toml")
}

fn default_resources_map_path() -> PathBuf {
    PathBuf::from("resource_paths_for_services.toml")
}

// ---------------------------------------------------------------------------
// Layered files
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ServicesFile {
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
}

/// `metrics_for_services` and `resource_paths_for_services` share this shape
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceFileMap {
    #[serde(default)]
    pub services: Vec<ServiceFileRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceFileRef {
    pub name: String,
    pub file: PathBuf,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricsFile {
    #[serde(default)]
    pub metrics: Vec<MetricConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResourcesFile {
    #[serde(default)]
    pub resources: Vec<ResourceConfig>,
}

/// A service together with everything its own files declare
#[derive(Debug, Clone)]
pub struct ServiceDefinition {
    pub service: ServiceConfig,
    pub metrics: Vec<MetricConfig>,
    pub resources: Vec<ResourceConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Https,
    File,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
            Protocol::File => "file",
        }
    }

    pub fn is_http(&self) -> bool {
        matches!(self, Protocol::Http | Protocol::Https)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub protocol: Protocol,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default)]
    pub port: u32,
    #[serde(default)]
    pub base_path: String,
    pub auth: Option<AuthConfig>,
}

fn default_host() -> String {
    "localhost".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum AuthKind {
    #[serde(rename = "CSRF", alias = "csrf")]
    Csrf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub kind: AuthKind,
    #[serde(default)]
    pub token_header_key: String,
    #[serde(default)]
    pub token_gen_endpoint: String,
    #[serde(default)]
    pub token_path_in_response: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    Inherit,
    None,
}

/// Per-resource auth: `auth = "none"`, `auth = "inherit"` or a full table
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AuthOverrideConfig {
    Mode(AuthMode),
    Custom(AuthConfig),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    #[default]
    Api,
    Forwarder,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResourceConfig {
    pub name: String,
    #[serde(default)]
    pub uri: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub kind: ResourceKind,
    #[serde(default)]
    pub decoder: Decoder,
    #[serde(default)]
    pub metrics: Vec<String>,
    pub auth: Option<AuthOverrideConfig>,
}

fn default_method() -> String {
    "GET".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    Counter,
    Gauge,
    Histogram,
    Summary,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeSolverConfig {
    #[serde(default = "default_dialect")]
    pub dialect: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub options: serde_json::Value,
}

fn default_dialect() -> String {
    "jsonPath".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LabelConfig {
    pub name: String,
    pub node_solver: NodeSolverConfig,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ExponentialBuckets {
    pub start: f64,
    pub factor: f64,
    pub count: usize,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistogramConfig {
    pub buckets: Option<Vec<f64>>,
    pub exponential: Option<ExponentialBuckets>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricOptions {
    /// Subtree a labelled vector lives in; `/` for the whole document
    pub item_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: MetricType,
    #[serde(default)]
    pub description: String,
    pub node_solver: NodeSolverConfig,
    #[serde(default)]
    pub labels: Vec<LabelConfig>,
    pub histogram: Option<HistogramConfig>,
    #[serde(default)]
    pub options: MetricOptions,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config: Config = toml::from_str("").unwrap();

        assert_eq!(config.server.bind_addr.to_string(), "0.0.0.0:8080");
        assert_eq!(config.server.metrics_path, "/metrics");
        assert_eq!(config.scrape.workers, 6);
        assert_eq!(config.scrape.timeout, Duration::from_secs(10));
        assert_eq!(config.scrape.refresh_on, RefreshPolicy::Auth);
        assert_eq!(config.paths.services, PathBuf::from("services.toml"));
        assert!(config.services.is_empty());
    }

    #[test]
    fn test_compound_durations() {
        let config: Config = toml::from_str(
            "[scrape]\ntimeout = \"1m30s\"\nconnect_timeout = \"750ms\"\n",
        )
        .unwrap();
        assert_eq!(config.scrape.timeout, Duration::from_secs(90));
        assert_eq!(config.scrape.connect_timeout, Duration::from_millis(750));
        assert_eq!(config.scrape.request_timeout, Duration::from_secs(5));

        assert!(toml::from_str::<Config>("[scrape]\ntimeout = \"soon\"\n").is_err());
    }

    #[test]
    fn test_refresh_policy() {
        assert!(RefreshPolicy::Auth.should_refresh(401));
        assert!(RefreshPolicy::Auth.should_refresh(403));
        assert!(!RefreshPolicy::Auth.should_refresh(500));
        assert!(RefreshPolicy::Any.should_refresh(500));
        assert!(!RefreshPolicy::Any.should_refresh(200));
    }

    #[test]
    fn test_resource_auth_override_forms() {
        let file: ResourcesFile = toml::from_str(
            r#"
[[resources]]
name = "health"
uri = "/api/v1/health"
metrics = ["seq"]
auth = "none"

[[resources]]
name = "admin"
uri = "/admin"
kind = "forwarder"

[resources.auth]
kind = "CSRF"
token_header_key = "X-CSRF-Token"
token_gen_endpoint = "/csrf"
token_path_in_response = "/token"
"#,
        )
        .unwrap();

        assert_eq!(file.resources[0].method, "GET");
        assert_eq!(file.resources[0].decoder, Decoder::Json);
        assert!(matches!(
            file.resources[0].auth,
            Some(AuthOverrideConfig::Mode(AuthMode::None))
        ));
        assert_eq!(file.resources[1].kind, ResourceKind::Forwarder);
        assert!(matches!(
            file.resources[1].auth,
            Some(AuthOverrideConfig::Custom(_))
        ));
    }

    #[test]
    fn test_metric_definition() {
        let file: MetricsFile = toml::from_str(
            r#"
[[metrics]]
name = "burn_factor"
type = "histogram"
description = "Coin hour burn factor"
node_solver = { path = "/burn/factors" }
histogram = { exponential = { start = 1.0, factor = 2.0, count = 4 } }

[[metrics]]
name = "connection_height"
type = "gauge"
node_solver = { path = "/heights" }
options = { item_path = "/connections" }
labels = [{ name = "address", node_solver = { path = "/addresses" } }]
"#,
        )
        .unwrap();

        let histogram = &file.metrics[0];
        assert_eq!(histogram.kind, MetricType::Histogram);
        assert_eq!(histogram.node_solver.dialect, "jsonPath");
        let exp = histogram.histogram.as_ref().unwrap().exponential.unwrap();
        assert_eq!(exp.count, 4);

        let vector = &file.metrics[1];
        assert_eq!(vector.labels[0].name, "address");
        assert_eq!(vector.options.item_path.as_deref(), Some("/connections"));
    }
}
