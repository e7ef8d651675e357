use super::models::{
    AuthConfig, AuthOverrideConfig, Config, MetricConfig, MetricType, NodeSolverConfig, Protocol,
    ResourceKind, ServiceConfig, ServiceDefinition,
};
use std::collections::{HashMap, HashSet};
use std::fmt;
use thiserror::Error;

/// Labels every shaped sample already carries
const RESERVED_LABELS: &[&str] = &["job", "instance"];

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Service name must not be empty")]
    EmptyServiceName,

    #[error("Service '{service}' is declared more than once")]
    DuplicateService { service: String },

    #[error("Service '{service}' has invalid port {port}, expected 1-65535")]
    InvalidPort { service: String, port: u32 },

    #[error("Service '{service}' base URL '{url}' is invalid: {reason}")]
    InvalidBaseUrl {
        service: String,
        url: String,
        reason: String,
    },

    #[error("Auth for '{owner}' is missing {field}")]
    EmptyAuthField { owner: String, field: &'static str },

    #[error("Metric '{metric}' of service '{service}' is not a valid metric name")]
    InvalidMetricName { service: String, metric: String },

    #[error("Metric '{metric}' of service '{service}' is declared more than once")]
    DuplicateMetric { service: String, metric: String },

    #[error(
        "Metric '{metric}' of service '{service}' is a {kind:?} but service '{first_service}' declares it as a {first_kind:?}"
    )]
    ConflictingMetricType {
        metric: String,
        service: String,
        kind: MetricType,
        first_service: String,
        first_kind: MetricType,
    },

    #[error("Metric '{metric}' of service '{service}' has unsupported type summary")]
    UnsupportedSummary { service: String, metric: String },

    #[error("Histogram '{metric}' of service '{service}' needs exactly one of buckets or exponential")]
    BucketSpec { service: String, metric: String },

    #[error("Histogram '{metric}' of service '{service}' has invalid buckets: {reason}")]
    InvalidBuckets {
        service: String,
        metric: String,
        reason: String,
    },

    #[error("Histogram '{metric}' of service '{service}' cannot have labels")]
    HistogramLabels { service: String, metric: String },

    #[error("Metric '{metric}' of service '{service}' has bucket settings but is not a histogram")]
    UnexpectedBuckets { service: String, metric: String },

    #[error("Labelled metric '{metric}' of service '{service}' requires options.item_path")]
    MissingItemPath { service: String, metric: String },

    #[error("Metric '{metric}' of service '{service}' has invalid label name '{label}'")]
    InvalidLabelName {
        service: String,
        metric: String,
        label: String,
    },

    #[error("Node solver for '{owner}' has an empty path")]
    EmptySolverPath { owner: String },

    #[error("Node solver for '{owner}' uses unsupported dialect '{dialect}'")]
    UnsupportedDialect { owner: String, dialect: String },

    #[error("Resource '{resource}' of service '{service}' has invalid method '{method}'")]
    InvalidMethod {
        service: String,
        resource: String,
        method: String,
    },

    #[error("Resource '{resource}' of service '{service}' references unknown metric '{metric}'")]
    UnknownMetric {
        service: String,
        resource: String,
        metric: String,
    },

    #[error("Metric '{metric}' of service '{service}' is listed by more than one resource")]
    MetricFedTwice { service: String, metric: String },

    #[error("Forwarder '{resource}' of service '{service}' cannot list metrics")]
    ForwarderMetrics { service: String, resource: String },

    #[error("metrics_path '{path}' must start with '/'")]
    InvalidMetricsPath { path: String },

    #[error("scrape.workers must be at least 1")]
    NoWorkers,
}

impl ValidationError {
    /// Short kind for structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            ValidationError::EmptyServiceName
            | ValidationError::DuplicateService { .. }
            | ValidationError::InvalidPort { .. }
            | ValidationError::InvalidBaseUrl { .. } => "service",
            ValidationError::EmptyAuthField { .. } => "auth",
            ValidationError::InvalidMetricName { .. }
            | ValidationError::DuplicateMetric { .. }
            | ValidationError::ConflictingMetricType { .. }
            | ValidationError::UnsupportedSummary { .. }
            | ValidationError::BucketSpec { .. }
            | ValidationError::InvalidBuckets { .. }
            | ValidationError::HistogramLabels { .. }
            | ValidationError::UnexpectedBuckets { .. }
            | ValidationError::MissingItemPath { .. } => "metric",
            ValidationError::InvalidLabelName { .. } => "label",
            ValidationError::EmptySolverPath { .. } | ValidationError::UnsupportedDialect { .. } => {
                "node_solver"
            }
            ValidationError::InvalidMethod { .. }
            | ValidationError::UnknownMetric { .. }
            | ValidationError::MetricFedTwice { .. }
            | ValidationError::ForwarderMetrics { .. } => "resource",
            ValidationError::InvalidMetricsPath { .. } | ValidationError::NoWorkers => "settings",
        }
    }
}

/// Every problem found in one pass
#[derive(Debug)]
pub struct ValidationErrors(pub Vec<ValidationError>);

impl std::error::Error for ValidationErrors {}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} problem(s)", self.0.len())?;
        for (i, err) in self.0.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{sep}{err}")?;
        }
        Ok(())
    }
}

impl ValidationErrors {
    pub fn iter(&self) -> impl Iterator<Item = &ValidationError> {
        self.0.iter()
    }
}

/// Validate the entire configuration, logging each problem
pub fn validate(config: &Config) -> Result<(), ValidationErrors> {
    let mut errors = Vec::new();

    validate_settings(config, &mut errors);

    let mut names = HashSet::new();
    for definition in &config.services {
        if !definition.service.name.is_empty() && !names.insert(definition.service.name.as_str()) {
            errors.push(ValidationError::DuplicateService {
                service: definition.service.name.clone(),
            });
        }
        validate_definition(definition, &mut errors);
    }
    validate_shared_families(config, &mut errors);

    if errors.is_empty() {
        return Ok(());
    }

    for err in &errors {
        tracing::error!(kind = err.kind(), error = %err, "Invalid configuration");
    }
    Err(ValidationErrors(errors))
}

fn validate_settings(config: &Config, errors: &mut Vec<ValidationError>) {
    if !config.server.metrics_path.starts_with('/') {
        errors.push(ValidationError::InvalidMetricsPath {
            path: config.server.metrics_path.clone(),
        });
    }
    if config.scrape.workers == 0 {
        errors.push(ValidationError::NoWorkers);
    }
}

/// Services merge same-named metrics into one family, which needs one type
fn validate_shared_families(config: &Config, errors: &mut Vec<ValidationError>) {
    let mut first: HashMap<&str, (&str, MetricType)> = HashMap::new();
    for definition in &config.services {
        let service = definition.service.name.as_str();
        for metric in &definition.metrics {
            let (first_service, first_kind) = *first
                .entry(metric.name.as_str())
                .or_insert((service, metric.kind));
            if first_kind != metric.kind {
                errors.push(ValidationError::ConflictingMetricType {
                    metric: metric.name.clone(),
                    service: service.to_string(),
                    kind: metric.kind,
                    first_service: first_service.to_string(),
                    first_kind,
                });
            }
        }
    }
}

fn validate_definition(definition: &ServiceDefinition, errors: &mut Vec<ValidationError>) {
    let service = &definition.service;
    validate_service(service, errors);

    let mut metric_names = HashSet::new();
    for metric in &definition.metrics {
        if !metric_names.insert(metric.name.as_str()) {
            errors.push(ValidationError::DuplicateMetric {
                service: service.name.clone(),
                metric: metric.name.clone(),
            });
        }
        validate_metric(&service.name, metric, errors);
    }

    let mut referenced = HashSet::new();
    for resource in &definition.resources {
        if reqwest::Method::from_bytes(resource.method.as_bytes()).is_err() {
            errors.push(ValidationError::InvalidMethod {
                service: service.name.clone(),
                resource: resource.name.clone(),
                method: resource.method.clone(),
            });
        }

        if let Some(AuthOverrideConfig::Custom(auth)) = &resource.auth {
            validate_auth(&format!("{}/{}", service.name, resource.name), auth, errors);
        }

        if resource.kind == ResourceKind::Forwarder && !resource.metrics.is_empty() {
            errors.push(ValidationError::ForwarderMetrics {
                service: service.name.clone(),
                resource: resource.name.clone(),
            });
        }

        for name in &resource.metrics {
            if !referenced.insert(name.as_str()) {
                errors.push(ValidationError::MetricFedTwice {
                    service: service.name.clone(),
                    metric: name.clone(),
                });
            }
            if !metric_names.contains(name.as_str()) {
                errors.push(ValidationError::UnknownMetric {
                    service: service.name.clone(),
                    resource: resource.name.clone(),
                    metric: name.clone(),
                });
            }
        }
    }

    for metric in &definition.metrics {
        if !referenced.contains(metric.name.as_str()) {
            tracing::warn!(
                service = %service.name,
                metric = %metric.name,
                "Metric is not fed by any resource and will never be scraped"
            );
        }
    }
}

fn validate_service(service: &ServiceConfig, errors: &mut Vec<ValidationError>) {
    if service.name.is_empty() {
        errors.push(ValidationError::EmptyServiceName);
    }

    if service.protocol.is_http() {
        if service.port == 0 || service.port > u16::MAX as u32 {
            errors.push(ValidationError::InvalidPort {
                service: service.name.clone(),
                port: service.port,
            });
        } else {
            let url = format!(
                "{}://{}:{}/{}",
                service.protocol.as_str(),
                service.host,
                service.port,
                service.base_path.trim_start_matches('/')
            );
            if let Err(e) = reqwest::Url::parse(&url) {
                errors.push(ValidationError::InvalidBaseUrl {
                    service: service.name.clone(),
                    url,
                    reason: e.to_string(),
                });
            }
        }
    } else if service.protocol == Protocol::File && service.auth.is_some() {
        tracing::warn!(service = %service.name, "Auth is ignored for file services");
    }

    if let Some(auth) = &service.auth {
        validate_auth(&service.name, auth, errors);
    }
}

fn validate_auth(owner: &str, auth: &AuthConfig, errors: &mut Vec<ValidationError>) {
    let fields = [
        ("token_header_key", &auth.token_header_key),
        ("token_gen_endpoint", &auth.token_gen_endpoint),
        ("token_path_in_response", &auth.token_path_in_response),
    ];
    for (field, value) in fields {
        if value.trim().is_empty() {
            errors.push(ValidationError::EmptyAuthField {
                owner: owner.to_string(),
                field,
            });
        }
    }
}

fn validate_metric(service: &str, metric: &MetricConfig, errors: &mut Vec<ValidationError>) {
    let owner = format!("{}/{}", service, metric.name);

    if !is_metric_name(&metric.name) {
        errors.push(ValidationError::InvalidMetricName {
            service: service.to_string(),
            metric: metric.name.clone(),
        });
    }

    validate_solver(&owner, &metric.node_solver, errors);

    for label in &metric.labels {
        if !is_label_name(&label.name) || RESERVED_LABELS.contains(&label.name.as_str()) {
            errors.push(ValidationError::InvalidLabelName {
                service: service.to_string(),
                metric: metric.name.clone(),
                label: label.name.clone(),
            });
        }
        validate_solver(&format!("{owner}/{}", label.name), &label.node_solver, errors);
    }

    match metric.kind {
        MetricType::Summary => errors.push(ValidationError::UnsupportedSummary {
            service: service.to_string(),
            metric: metric.name.clone(),
        }),
        MetricType::Histogram => validate_histogram(service, metric, errors),
        MetricType::Counter | MetricType::Gauge => {
            if metric.histogram.is_some() {
                errors.push(ValidationError::UnexpectedBuckets {
                    service: service.to_string(),
                    metric: metric.name.clone(),
                });
            }
            if !metric.labels.is_empty() && metric.options.item_path.is_none() {
                errors.push(ValidationError::MissingItemPath {
                    service: service.to_string(),
                    metric: metric.name.clone(),
                });
            }
        }
    }
}

fn validate_histogram(service: &str, metric: &MetricConfig, errors: &mut Vec<ValidationError>) {
    if !metric.labels.is_empty() {
        errors.push(ValidationError::HistogramLabels {
            service: service.to_string(),
            metric: metric.name.clone(),
        });
    }

    let invalid = |reason: &str| ValidationError::InvalidBuckets {
        service: service.to_string(),
        metric: metric.name.clone(),
        reason: reason.to_string(),
    };

    let spec = metric.histogram.as_ref();
    match (
        spec.and_then(|h| h.buckets.as_ref()),
        spec.and_then(|h| h.exponential),
    ) {
        (Some(buckets), None) => {
            if buckets.is_empty() {
                errors.push(invalid("bucket list is empty"));
            } else if buckets.windows(2).any(|w| w[0] >= w[1]) {
                errors.push(invalid("bucket bounds must be strictly increasing"));
            }
        }
        (None, Some(exp)) => {
            if exp.start <= 0.0 {
                errors.push(invalid("exponential start must be positive"));
            }
            if exp.factor <= 1.0 {
                errors.push(invalid("exponential factor must be greater than 1"));
            }
            if exp.count == 0 {
                errors.push(invalid("exponential count must be at least 1"));
            }
        }
        _ => errors.push(ValidationError::BucketSpec {
            service: service.to_string(),
            metric: metric.name.clone(),
        }),
    }
}

fn validate_solver(owner: &str, solver: &NodeSolverConfig, errors: &mut Vec<ValidationError>) {
    if solver.path.trim().is_empty() {
        errors.push(ValidationError::EmptySolverPath {
            owner: owner.to_string(),
        });
    }
    if !solver.dialect.eq_ignore_ascii_case("jsonpath") {
        errors.push(ValidationError::UnsupportedDialect {
            owner: owner.to_string(),
            dialect: solver.dialect.clone(),
        });
    }
}

/// `[a-zA-Z_:][a-zA-Z0-9_:]*`
fn is_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

/// `[a-zA-Z_][a-zA-Z0-9_]*`, without the reserved `__` prefix
fn is_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    !name.starts_with("__") && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
