use super::ShapeError;
use crate::config::{BucketSpec, MetricDef};
use crate::document::Node;

/// Observations folded into cumulative buckets
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramAggregate {
    pub count: u64,
    pub sum: f64,
    /// `(upper bound, observations <= bound)`, bounds increasing
    pub buckets: Vec<(f64, u64)>,
}

impl HistogramAggregate {
    pub fn from_values(bounds: &[f64], values: &[f64]) -> Self {
        let buckets = bounds
            .iter()
            .map(|&bound| (bound, values.iter().filter(|&&v| v <= bound).count() as u64))
            .collect();

        Self {
            count: values.len() as u64,
            sum: values.iter().sum(),
            buckets,
        }
    }
}

pub fn shape(metric: &MetricDef, doc: &Node) -> Result<HistogramAggregate, ShapeError> {
    let bounds = metric
        .buckets
        .as_ref()
        .map(BucketSpec::bounds)
        .unwrap_or_default();
    if bounds.is_empty() {
        return Err(ShapeError::EmptyBuckets {
            metric: metric.name.clone(),
        });
    }

    let path = &metric.solver.path;
    let values = doc
        .lookup(path)?
        .as_sequence(path)?
        .iter()
        .enumerate()
        .map(|(i, node)| node.as_f64(&format!("{path}/{i}")))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(HistogramAggregate::from_values(&bounds, &values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MetricType;
    use crate::document::{PathError, json};
    use crate::shape::testing::metric;

    fn histogram(buckets: BucketSpec) -> MetricDef {
        let mut def = metric("burn_factor", MetricType::Histogram, "/burns");
        def.buckets = Some(buckets);
        def
    }

    #[test]
    fn test_explicit_buckets() {
        let doc = json::decode(br#"{"burns":[0.5, 2, 2, 7, 12]}"#).unwrap();
        let agg = shape(&histogram(BucketSpec::Explicit(vec![1.0, 2.0, 10.0])), &doc).unwrap();

        assert_eq!(agg.count, 5);
        assert_eq!(agg.sum, 23.5);
        assert_eq!(agg.buckets, vec![(1.0, 1), (2.0, 3), (10.0, 4)]);
    }

    #[test]
    fn test_exponential_buckets() {
        let doc = json::decode(br#"{"burns":[1, 3, 30, 300]}"#).unwrap();
        let spec = BucketSpec::Exponential {
            start: 1.0,
            factor: 10.0,
            count: 3,
        };
        let agg = shape(&histogram(spec), &doc).unwrap();

        assert_eq!(agg.buckets, vec![(1.0, 1), (10.0, 2), (100.0, 3)]);
        assert_eq!(agg.count, 4);
    }

    #[test]
    fn test_empty_sequence() {
        let doc = json::decode(br#"{"burns":[]}"#).unwrap();
        let agg = shape(&histogram(BucketSpec::Explicit(vec![1.0])), &doc).unwrap();
        assert_eq!(agg.count, 0);
        assert_eq!(agg.sum, 0.0);
        assert_eq!(agg.buckets, vec![(1.0, 0)]);
    }

    #[test]
    fn test_non_numeric_element() {
        let doc = json::decode(br#"{"burns":[1, "two"]}"#).unwrap();
        let err = shape(&histogram(BucketSpec::Explicit(vec![1.0])), &doc).unwrap_err();
        assert!(matches!(
            err,
            ShapeError::Path(PathError::TypeMismatch { ref path, .. }) if path == "/burns/1"
        ));
    }

    #[test]
    fn test_missing_buckets() {
        let doc = json::decode(br#"{"burns":[1]}"#).unwrap();
        let def = metric("burn_factor", MetricType::Histogram, "/burns");
        assert!(matches!(
            shape(&def, &doc),
            Err(ShapeError::EmptyBuckets { .. })
        ));
    }
}
