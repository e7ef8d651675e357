//! Read-only arena built from a validated [`Config`]
//!
//! Services, resources and metrics live in flat vectors and refer to each
//! other through copyable handles, so scrape tasks can carry a
//! `(ServiceId, ResourceId, MetricId)` tuple instead of borrowing.

use super::models::{
    AuthConfig, AuthKind, AuthOverrideConfig, AuthMode, Config, MetricConfig, MetricType,
    NodeSolverConfig, Protocol, ResourceKind,
};
use crate::document::Decoder;
use reqwest::Method;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricId(pub usize);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSpec {
    pub kind: AuthKind,
    pub token_header_key: String,
    pub token_gen_endpoint: String,
    pub token_path_in_response: String,
}

impl From<&AuthConfig> for AuthSpec {
    fn from(auth: &AuthConfig) -> Self {
        Self {
            kind: auth.kind,
            token_header_key: auth.token_header_key.clone(),
            token_gen_endpoint: auth.token_gen_endpoint.clone(),
            token_path_in_response: normalize_path(&auth.token_path_in_response),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOverride {
    Inherit,
    Disabled,
    Custom(AuthSpec),
}

#[derive(Debug, Clone)]
pub struct Service {
    pub id: ServiceId,
    pub name: String,
    pub protocol: Protocol,
    pub host: String,
    pub port: u32,
    pub base_path: String,
    pub auth: Option<AuthSpec>,
    pub resources: Vec<ResourceId>,
}

impl Service {
    /// `host:port`, the `instance` label
    pub fn instance(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// `protocol://host:port/base_path`, or the base directory for files
    pub fn base_url(&self) -> String {
        match self.protocol {
            Protocol::File => format!("file://{}", self.base_path.trim_end_matches('/')),
            _ => {
                let base = format!("{}://{}", self.protocol.as_str(), self.instance());
                join_url(&base, self.base_path.trim_end_matches('/'))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Resource {
    pub id: ResourceId,
    pub service: ServiceId,
    pub name: String,
    pub uri: String,
    pub method: Method,
    pub kind: ResourceKind,
    pub decoder: Decoder,
    pub auth: AuthOverride,
    pub metrics: Vec<MetricId>,
    /// Fully resolved location, also the `datasource` label
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct NodeSolver {
    pub dialect: String,
    /// Always starts with `/`
    pub path: String,
    pub options: serde_json::Value,
}

impl From<&NodeSolverConfig> for NodeSolver {
    fn from(solver: &NodeSolverConfig) -> Self {
        Self {
            dialect: solver.dialect.clone(),
            path: normalize_path(&solver.path),
            options: solver.options.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LabelDef {
    pub name: String,
    pub solver: NodeSolver,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BucketSpec {
    Explicit(Vec<f64>),
    Exponential { start: f64, factor: f64, count: usize },
}

impl BucketSpec {
    /// Upper bounds in increasing order
    pub fn bounds(&self) -> Vec<f64> {
        match self {
            BucketSpec::Explicit(bounds) => bounds.clone(),
            BucketSpec::Exponential {
                start,
                factor,
                count,
            } => {
                let mut bounds = Vec::with_capacity(*count);
                let mut next = *start;
                for _ in 0..*count {
                    bounds.push(next);
                    next *= factor;
                }
                bounds
            }
        }
    }
}

/// How a metric turns a document into samples
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Scalar,
    Vector,
    Histogram,
}

#[derive(Debug, Clone)]
pub struct MetricDef {
    pub id: MetricId,
    pub service: ServiceId,
    pub name: String,
    pub kind: MetricType,
    pub description: String,
    pub solver: NodeSolver,
    pub labels: Vec<LabelDef>,
    pub buckets: Option<BucketSpec>,
    pub item_path: Option<String>,
}

impl MetricDef {
    pub fn shape(&self) -> Shape {
        match self.kind {
            MetricType::Histogram => Shape::Histogram,
            _ if self.labels.is_empty() => Shape::Scalar,
            _ => Shape::Vector,
        }
    }

    /// HELP text; falls back to the name when no description is configured
    pub fn help(&self) -> &str {
        if self.description.is_empty() {
            &self.name
        } else {
            &self.description
        }
    }
}

/// Scope a token slot belongs to: the service, or one resource with its own auth
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AuthScope {
    pub service: ServiceId,
    pub resource: Option<ResourceId>,
}

#[derive(Debug, Default)]
pub struct Catalog {
    services: Vec<Service>,
    resources: Vec<Resource>,
    metrics: Vec<MetricDef>,
}

impl Catalog {
    /// Build the arena. Expects a configuration that passed validation.
    pub fn build(config: &Config) -> Self {
        let mut catalog = Catalog::default();

        for definition in &config.services {
            let service_id = ServiceId(catalog.services.len());
            let svc = &definition.service;

            let mut service = Service {
                id: service_id,
                name: svc.name.clone(),
                protocol: svc.protocol,
                host: svc.host.clone(),
                port: svc.port,
                base_path: svc.base_path.clone(),
                auth: svc.auth.as_ref().map(AuthSpec::from),
                resources: Vec::new(),
            };

            let first_metric = catalog.metrics.len();
            for metric in &definition.metrics {
                let id = MetricId(catalog.metrics.len());
                catalog.metrics.push(metric_def(id, service_id, metric));
            }
            let owned = &catalog.metrics[first_metric..];

            let base_url = service.base_url();
            let mut resources = Vec::with_capacity(definition.resources.len());
            for res in &definition.resources {
                let id = ResourceId(catalog.resources.len() + resources.len());
                let metrics = res
                    .metrics
                    .iter()
                    .filter_map(|name| owned.iter().find(|m| &m.name == name).map(|m| m.id))
                    .collect();
                let auth = match &res.auth {
                    None | Some(AuthOverrideConfig::Mode(AuthMode::Inherit)) => {
                        AuthOverride::Inherit
                    }
                    Some(AuthOverrideConfig::Mode(AuthMode::None)) => AuthOverride::Disabled,
                    Some(AuthOverrideConfig::Custom(auth)) => AuthOverride::Custom(auth.into()),
                };

                resources.push(Resource {
                    id,
                    service: service_id,
                    name: res.name.clone(),
                    uri: res.uri.clone(),
                    // Methods were checked by validation
                    method: Method::from_bytes(res.method.as_bytes()).unwrap_or(Method::GET),
                    kind: res.kind,
                    decoder: match res.kind {
                        ResourceKind::Forwarder => Decoder::Prometheus,
                        ResourceKind::Api => res.decoder,
                    },
                    auth,
                    metrics,
                    url: join_url(&base_url, &res.uri),
                });
                service.resources.push(id);
            }

            catalog.resources.extend(resources);
            catalog.services.push(service);
        }

        catalog
    }

    pub fn services(&self) -> &[Service] {
        &self.services
    }

    pub fn service(&self, id: ServiceId) -> &Service {
        &self.services[id.0]
    }

    pub fn resource(&self, id: ResourceId) -> &Resource {
        &self.resources[id.0]
    }

    pub fn metric(&self, id: MetricId) -> &MetricDef {
        &self.metrics[id.0]
    }

    pub fn metrics(&self) -> &[MetricDef] {
        &self.metrics
    }

    /// Auth that applies to a resource, if any.
    ///
    /// Forwarders authenticate only with an explicit per-resource table.
    pub fn auth_for(&self, id: ResourceId) -> Option<(AuthScope, &AuthSpec)> {
        let resource = self.resource(id);
        let service = self.service(resource.service);
        match &resource.auth {
            AuthOverride::Disabled => None,
            AuthOverride::Custom(spec) => Some((
                AuthScope {
                    service: service.id,
                    resource: Some(id),
                },
                spec,
            )),
            AuthOverride::Inherit if resource.kind == ResourceKind::Forwarder => None,
            AuthOverride::Inherit => service.auth.as_ref().map(|spec| {
                (
                    AuthScope {
                        service: service.id,
                        resource: None,
                    },
                    spec,
                )
            }),
        }
    }

    /// Every distinct auth scope with the URL its token comes from
    pub fn auth_scopes(&self) -> Vec<(AuthScope, AuthSpec, String)> {
        let mut scopes: Vec<(AuthScope, AuthSpec, String)> = Vec::new();
        for resource in &self.resources {
            let Some((scope, spec)) = self.auth_for(resource.id) else {
                continue;
            };
            if scopes.iter().any(|(s, _, _)| *s == scope) {
                continue;
            }
            let base = self.service(scope.service).base_url();
            let url = join_url(&base, &spec.token_gen_endpoint);
            scopes.push((scope, spec.clone(), url));
        }
        scopes
    }
}

fn metric_def(id: MetricId, service: ServiceId, metric: &MetricConfig) -> MetricDef {
    let buckets = metric.histogram.as_ref().and_then(|h| match (&h.buckets, h.exponential) {
        (Some(bounds), _) => Some(BucketSpec::Explicit(bounds.clone())),
        (None, Some(exp)) => Some(BucketSpec::Exponential {
            start: exp.start,
            factor: exp.factor,
            count: exp.count,
        }),
        (None, None) => None,
    });

    MetricDef {
        id,
        service,
        name: metric.name.clone(),
        kind: metric.kind,
        description: metric.description.clone(),
        solver: NodeSolver::from(&metric.node_solver),
        labels: metric
            .labels
            .iter()
            .map(|label| LabelDef {
                name: label.name.clone(),
                solver: NodeSolver::from(&label.node_solver),
            })
            .collect(),
        buckets,
        item_path: metric.options.item_path.as_deref().map(normalize_path),
    }
}

fn normalize_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

/// Join two URL parts with exactly one slash between them
pub fn join_url(base: &str, path: &str) -> String {
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        return base.to_string();
    }
    format!("{}/{}", base.trim_end_matches('/'), path)
}
