use super::ConfigError;
use super::models::{
    Config, MetricsFile, ResourcesFile, ServiceDefinition, ServiceFileMap, ServicesFile,
};
use config::{Environment, File};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

const CONFIG_ENV_VAR: &str = "SCRAPEPROXY_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/scrapeproxy.toml";
const ENV_PREFIX: &str = "SCRAPEPROXY";
const ENV_SEPARATOR: &str = "__";

/// Path of the main file: `SCRAPEPROXY_CONFIG` or the default location
pub fn default_path() -> PathBuf {
    // Load .env file if it exists (ignore errors if file doesn't exist)
    let _ = dotenvy::dotenv();

    env::var(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Load the main file and every service file it points at
pub fn load_from_sources(config_path: PathBuf) -> Result<Config, ConfigError> {
    let base_dir = config_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();

    let mut config = load_settings(config_path)?;
    config.services = load_services(&config, &base_dir)?;
    Ok(config)
}

/// Main file plus `SCRAPEPROXY__<section>__<key>` overrides
pub fn load_settings(config_path: PathBuf) -> Result<Config, config::ConfigError> {
    let mut builder = config::Config::builder();

    if config_path.exists() {
        tracing::info!("Loading configuration from: {}", config_path.display());
        builder = builder.add_source(File::from(config_path).required(false));
    } else {
        tracing::warn!(
            "Configuration file not found at {}, using defaults and environment overrides",
            config_path.display()
        );
    }

    // SCRAPEPROXY__SCRAPE__WORKERS -> scrape.workers
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator(ENV_SEPARATOR)
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

/// Resolve services, then attach each one's metrics and resources files.
///
/// Map file paths are relative to the main file; per-service file paths are
/// relative to the map file that names them.
fn load_services(config: &Config, base_dir: &Path) -> Result<Vec<ServiceDefinition>, ConfigError> {
    let services_path = base_dir.join(&config.paths.services);
    let services: ServicesFile = read_toml(&services_path)?;

    let metrics_path = base_dir.join(&config.paths.metrics_for_services);
    let metrics_files = read_file_map(&metrics_path, &services)?;

    let resources_path = base_dir.join(&config.paths.resource_paths_for_services);
    let resource_files = read_file_map(&resources_path, &services)?;

    let mut definitions = Vec::with_capacity(services.services.len());
    for service in services.services {
        let metrics = match metrics_files.get(&service.name) {
            Some(path) => read_toml::<MetricsFile>(path)?.metrics,
            None => {
                tracing::warn!(service = %service.name, "No metrics file listed for service");
                Vec::new()
            }
        };
        let resources = match resource_files.get(&service.name) {
            Some(path) => read_toml::<ResourcesFile>(path)?.resources,
            None => {
                tracing::warn!(service = %service.name, "No resources file listed for service");
                Vec::new()
            }
        };

        tracing::debug!(
            service = %service.name,
            metrics = metrics.len(),
            resources = resources.len(),
            "Loaded service definition"
        );

        definitions.push(ServiceDefinition {
            service,
            metrics,
            resources,
        });
    }

    Ok(definitions)
}

/// Read a `[[services]] name/file` map and resolve each file path
fn read_file_map(
    path: &Path,
    services: &ServicesFile,
) -> Result<HashMap<String, PathBuf>, ConfigError> {
    let map: ServiceFileMap = read_toml(path)?;
    let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();

    let mut files = HashMap::new();
    for entry in map.services {
        if !services.services.iter().any(|s| s.name == entry.name) {
            return Err(ConfigError::UnknownService {
                file: path.to_path_buf(),
                service: entry.name,
            });
        }
        files.insert(entry.name, dir.join(entry.file));
    }
    Ok(files)
}

fn read_toml<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
