//! Rendering shaped values into exposition families

use crate::config::{MetricDef, MetricType, Service};
use crate::document::exposition::format_value;
use crate::document::{MetricFamily, MetricKind, Sample};
use crate::shape::Shaped;
use std::collections::BTreeMap;

/// Families keyed by name; same-named families from different services merge
#[derive(Debug, Default)]
pub struct Output {
    families: BTreeMap<String, MetricFamily>,
}

impl Output {
    pub fn add(&mut self, family: MetricFamily) {
        match self.families.get_mut(&family.name) {
            Some(existing) => existing.samples.extend(family.samples),
            None => {
                self.families.insert(family.name.clone(), family);
            }
        }
    }

    pub fn extend(&mut self, families: impl IntoIterator<Item = MetricFamily>) {
        for family in families {
            self.add(family);
        }
    }

    /// Families in name order
    pub fn into_families(self) -> Vec<MetricFamily> {
        self.families.into_values().collect()
    }
}

fn kind(metric: &MetricDef) -> MetricKind {
    match metric.kind {
        MetricType::Counter => MetricKind::Counter,
        MetricType::Gauge => MetricKind::Gauge,
        MetricType::Histogram => MetricKind::Histogram,
        MetricType::Summary => MetricKind::Summary,
    }
}

fn identity(service: &Service) -> Vec<(String, String)> {
    vec![
        ("job".to_string(), service.name.clone()),
        ("instance".to_string(), service.instance()),
    ]
}

/// The value family of a metric
pub fn value_family(metric: &MetricDef, service: &Service, shaped: &Shaped) -> MetricFamily {
    let mut family = MetricFamily::new(&metric.name, metric.help(), kind(metric));
    let base = identity(service);

    match shaped {
        Shaped::Scalar(value) => {
            family
                .samples
                .push(Sample::new(&metric.name, base, *value));
        }
        Shaped::Vector(rows) => {
            for (values, value) in rows {
                let mut labels = base.clone();
                labels.extend(
                    metric
                        .labels
                        .iter()
                        .map(|def| def.name.clone())
                        .zip(values.iter().cloned()),
                );
                family.samples.push(Sample::new(&metric.name, labels, *value));
            }
        }
        Shaped::Histogram(agg) => {
            let bucket = format!("{}_bucket", metric.name);
            let buckets = agg
                .buckets
                .iter()
                .map(|(bound, count)| (format_value(*bound), *count))
                .chain(std::iter::once(("+Inf".to_string(), agg.count)));
            for (le, count) in buckets {
                let mut labels = base.clone();
                labels.push(("le".to_string(), le));
                family.samples.push(Sample::new(&bucket, labels, count as f64));
            }
            family.samples.push(Sample::new(
                format!("{}_sum", metric.name),
                base.clone(),
                agg.sum,
            ));
            family.samples.push(Sample::new(
                format!("{}_count", metric.name),
                base,
                agg.count as f64,
            ));
        }
    }

    family
}

/// The `<name>_up` companion gauge
pub fn up_family(metric: &MetricDef, service: &Service, up: bool) -> MetricFamily {
    let name = format!("{}_up", metric.name);
    let mut family = MetricFamily::new(
        &name,
        format!("1 if {} was scraped successfully, 0 otherwise", metric.name),
        MetricKind::Gauge,
    );
    family.samples.push(Sample::new(
        name,
        identity(service),
        if up { 1.0 } else { 0.0 },
    ));
    family
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BucketSpec, Protocol, ServiceId};
    use crate::document::exposition::encode;
    use crate::shape::HistogramAggregate;
    use crate::shape::testing::{label, metric};

    fn service() -> Service {
        Service {
            id: ServiceId(0),
            name: "skycoin".to_string(),
            protocol: Protocol::Http,
            host: "127.0.0.1".to_string(),
            port: 6420,
            base_path: String::new(),
            auth: None,
            resources: Vec::new(),
        }
    }

    fn render(families: Vec<MetricFamily>) -> String {
        let mut out = String::new();
        encode(&families, &mut out);
        out
    }

    #[test]
    fn test_scalar_with_identity() {
        let seq = metric("seq", MetricType::Counter, "/blockchain/head/seq");
        let text = render(vec![
            value_family(&seq, &service(), &Shaped::Scalar(58894.0)),
            up_family(&seq, &service(), true),
        ]);

        assert!(text.contains("# TYPE seq counter\n"));
        assert!(text.contains(r#"seq{job="skycoin",instance="127.0.0.1:6420"} 58894"#));
        assert!(text.contains(r#"seq_up{job="skycoin",instance="127.0.0.1:6420"} 1"#));
    }

    #[test]
    fn test_vector_labels_follow_identity() {
        let mut height = metric("connection_height", MetricType::Gauge, "/height");
        height.labels.push(label("address", "/address"));
        let rows = vec![(vec!["10.0.0.2:6000".to_string()], 58894.0)];

        let family = value_family(&height, &service(), &Shaped::Vector(rows));
        let labels: Vec<_> = family.samples[0].labels.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(labels, ["job", "instance", "address"]);
    }

    #[test]
    fn test_histogram_series() {
        let mut burn = metric("burn", MetricType::Histogram, "/burns");
        burn.buckets = Some(BucketSpec::Explicit(vec![1.0, 2.5]));
        let agg = HistogramAggregate::from_values(&[1.0, 2.5], &[0.5, 2.0, 4.0]);

        let text = render(vec![value_family(&burn, &service(), &Shaped::Histogram(agg))]);
        assert!(text.contains(r#"burn_bucket{job="skycoin",instance="127.0.0.1:6420",le="1"} 1"#));
        assert!(text.contains(r#"burn_bucket{job="skycoin",instance="127.0.0.1:6420",le="2.5"} 2"#));
        assert!(text.contains(r#"burn_bucket{job="skycoin",instance="127.0.0.1:6420",le="+Inf"} 3"#));
        assert!(text.contains(r#"burn_sum{job="skycoin",instance="127.0.0.1:6420"} 6.5"#));
        assert!(text.contains(r#"burn_count{job="skycoin",instance="127.0.0.1:6420"} 3"#));
    }

    #[test]
    fn test_output_merges_and_sorts() {
        let seq = metric("seq", MetricType::Counter, "/seq");
        let mut other = service();
        other.name = "mirror".to_string();

        let mut output = Output::default();
        output.add(value_family(&seq, &service(), &Shaped::Scalar(1.0)));
        output.add(up_family(&seq, &service(), true));
        output.add(value_family(&seq, &other, &Shaped::Scalar(2.0)));

        let families = output.into_families();
        let names: Vec<_> = families.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["seq", "seq_up"]);
        assert_eq!(families[0].samples.len(), 2);
    }
}
