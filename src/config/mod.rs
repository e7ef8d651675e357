//! Configuration management for scrapeproxy
//!
//! Settings are layered:
//! 1. Default values (embedded in structs)
//! 2. The main TOML file
//! 3. Environment variables (highest priority)
//!
//! The main file's `[paths]` section points at a services file and two map
//! files (`metrics_for_services`, `resource_paths_for_services`) naming each
//! service's own metrics and resources files.
//!
//! # Usage
//!
//! ```no_run
//! use scrapeproxy::config::Config;
//!
//! let config = Config::load().expect("Failed to load configuration");
//! let catalog = config.catalog();
//! println!("Serving {} services", catalog.services().len());
//! ```
//!
//! # Environment Variables
//!
//! Main file settings can be overridden with `SCRAPEPROXY__<section>__<key>`:
//! - `SCRAPEPROXY__SERVER__BIND_ADDR=0.0.0.0:9000`
//! - `SCRAPEPROXY__SCRAPE__TIMEOUT=5s`
//!
//! The main file defaults to `config/scrapeproxy.toml` and can be moved with
//! the `SCRAPEPROXY_CONFIG` environment variable.

pub mod catalog;
mod models;
mod sources;
mod validation;

pub use crate::humanize::ByteSize;
pub use catalog::{
    AuthOverride, AuthScope, AuthSpec, BucketSpec, Catalog, LabelDef, MetricDef, MetricId,
    NodeSolver, Resource, ResourceId, Service, ServiceId, Shape,
};
pub use models::{
    AuthConfig, AuthKind, AuthMode, AuthOverrideConfig, Config, ExponentialBuckets,
    HistogramConfig, LabelConfig, MetricConfig, MetricOptions, MetricType, MetricsFile,
    NodeSolverConfig, PathsConfig, Protocol, RefreshPolicy, ResourceConfig, ResourceKind,
    ResourcesFile, ScrapeConfig, ServerConfig, ServiceConfig, ServiceDefinition, ServicesFile,
};
pub use validation::{ValidationError, ValidationErrors};

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("{} references unknown service '{service}'", .file.display())]
    UnknownService { file: PathBuf, service: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationErrors),
}

impl Config {
    /// Load configuration from all sources (files + environment)
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - A referenced file is missing or malformed
    /// - Validation fails (see [`ValidationError`])
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path(sources::default_path())
    }

    /// Load configuration rooted at a specific main file
    pub fn load_from_path(path: PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path)?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Build the handle-addressed model the scrape engine runs on
    pub fn catalog(&self) -> Catalog {
        Catalog::build(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &std::path::Path, name: &str, content: &str) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    fn write_layout(dir: &std::path::Path, metrics: &str) {
        write(dir, "scrapeproxy.toml", "[scrape]\ntimeout = \"3s\"\n");
        write(
            dir,
            "services.toml",
            r#"
[[services]]
name = "skycoin"
protocol = "http"
host = "127.0.0.1"
port = 6420

[services.auth]
kind = "CSRF"
token_header_key = "X-CSRF-Token"
token_gen_endpoint = "/api/v1/csrf"
token_path_in_response = "/csrf_token"
"#,
        );
        write(
            dir,
            "metrics_for_services.toml",
            "[[services]]\nname = \"skycoin\"\nfile = \"skycoin/metrics.toml\"\n",
        );
        write(
            dir,
            "resource_paths_for_services.toml",
            "[[services]]\nname = \"skycoin\"\nfile = \"skycoin/resources.toml\"\n",
        );
        write(dir, "skycoin/metrics.toml", metrics);
        write(
            dir,
            "skycoin/resources.toml",
            r#"
[[resources]]
name = "health"
uri = "/api/v1/health"
metrics = ["seq"]
"#,
        );
    }

    #[test]
    fn test_load_full_layout() {
        let temp_dir = TempDir::new().unwrap();
        write_layout(
            temp_dir.path(),
            "[[metrics]]\nname = \"seq\"\ntype = \"counter\"\nnode_solver = { path = \"/blockchain/head/seq\" }\n",
        );

        let config = Config::load_from_path(temp_dir.path().join("scrapeproxy.toml")).unwrap();
        let catalog = config.catalog();

        assert_eq!(config.scrape.timeout, std::time::Duration::from_secs(3));
        assert_eq!(catalog.services().len(), 1);
        assert_eq!(catalog.metrics()[0].name, "seq");
        assert_eq!(catalog.auth_scopes().len(), 1);
    }

    #[test]
    fn test_validation_refuses_summary() {
        let temp_dir = TempDir::new().unwrap();
        write_layout(
            temp_dir.path(),
            "[[metrics]]\nname = \"seq\"\ntype = \"summary\"\nnode_solver = { path = \"/seq\" }\n",
        );

        let err = Config::load_from_path(temp_dir.path().join("scrapeproxy.toml")).unwrap_err();
        match err {
            ConfigError::ValidationError(errors) => {
                assert!(matches!(
                    errors.0.as_slice(),
                    [ValidationError::UnsupportedSummary { .. }]
                ));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
