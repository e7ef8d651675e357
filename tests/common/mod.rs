#![allow(dead_code)]

use axum::Router;
use scrapeproxy::config::Config;
use scrapeproxy::scrape::Scraper;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::net::TcpListener;

pub const HEALTH_DOC: &str = r#"{"blockchain":{"head":{"seq":58894,"fee":485194},"unspents":38171,"unconfirmed":1},
 "version":{"branch":"develop"}, "open_connections":8,
 "csrf_enabled":true, "unversioned_api_enabled":false}"#;

/// The six scalar metrics read from the health document
pub const HEALTH_METRICS: &str = r#"
[[metrics]]
name = "seq"
type = "counter"
node_solver = { path = "/blockchain/head/seq" }

[[metrics]]
name = "fee"
type = "gauge"
node_solver = { path = "/blockchain/head/fee" }

[[metrics]]
name = "unspents"
type = "gauge"
node_solver = { path = "/blockchain/unspents" }

[[metrics]]
name = "csrf_enabled"
type = "gauge"
node_solver = { path = "/csrf_enabled" }

[[metrics]]
name = "unversioned_api_enabled"
type = "gauge"
node_solver = { path = "/unversioned_api_enabled" }

[[metrics]]
name = "open_connections"
type = "gauge"
node_solver = { path = "/open_connections" }
"#;

pub const HEALTH_RESOURCE: &str = r#"
[[resources]]
name = "health"
uri = "/api/v1/health"
metrics = ["seq", "fee", "unspents", "csrf_enabled", "unversioned_api_enabled", "open_connections"]
"#;

/// One service and the contents of its own files
pub struct ServiceFiles {
    pub name: String,
    /// Body of the `[[services]]` table, without the header
    pub service: String,
    pub metrics: String,
    pub resources: String,
}

impl ServiceFiles {
    pub fn http(name: &str, addr: SocketAddr, metrics: &str, resources: &str) -> Self {
        Self {
            name: name.to_string(),
            service: format!(
                "name = \"{name}\"\nprotocol = \"http\"\nhost = \"{}\"\nport = {}\n",
                addr.ip(),
                addr.port()
            ),
            metrics: metrics.to_string(),
            resources: resources.to_string(),
        }
    }
}

/// A configuration tree laid out in a temporary directory
pub struct Fixture {
    pub dir: TempDir,
}

impl Fixture {
    pub fn new(scrape: &str, services: &[ServiceFiles]) -> Self {
        let dir = TempDir::new().unwrap();
        let root = dir.path();

        write(root, "scrapeproxy.toml", &format!("[scrape]\n{scrape}\n"));

        let mut services_toml = String::new();
        let mut metrics_map = String::new();
        let mut resources_map = String::new();
        for svc in services {
            services_toml.push_str(&format!("[[services]]\n{}\n", svc.service));
            metrics_map.push_str(&format!(
                "[[services]]\nname = \"{0}\"\nfile = \"{0}/metrics.toml\"\n\n",
                svc.name
            ));
            resources_map.push_str(&format!(
                "[[services]]\nname = \"{0}\"\nfile = \"{0}/resources.toml\"\n\n",
                svc.name
            ));
            write(root, &format!("{}/metrics.toml", svc.name), &svc.metrics);
            write(root, &format!("{}/resources.toml", svc.name), &svc.resources);
        }
        write(root, "services.toml", &services_toml);
        write(root, "metrics_for_services.toml", &metrics_map);
        write(root, "resource_paths_for_services.toml", &resources_map);

        Self { dir }
    }

    pub fn main_file(&self) -> PathBuf {
        self.dir.path().join("scrapeproxy.toml")
    }

    pub fn config(&self) -> Config {
        Config::load_from_path(self.main_file()).unwrap()
    }

    pub fn scraper(&self) -> Scraper {
        Scraper::from_config(&self.config()).unwrap()
    }
}

pub fn write(root: &Path, name: &str, content: &str) {
    let path = root.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

/// Serve a mock upstream on an ephemeral port
pub async fn spawn_upstream(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Value of the first sample line starting with `series`
pub fn sample_value(body: &str, series: &str) -> Option<f64> {
    body.lines()
        .filter(|line| !line.starts_with('#'))
        .find_map(|line| line.strip_prefix(series))
        .and_then(|rest| rest.trim().parse().ok())
}
