//! Labelled vectors
//!
//! `item_path` selects the subtree the vector lives in. Two layouts are
//! accepted:
//!
//! - rows: the subtree is a sequence of records; the metric and label paths
//!   are evaluated inside each record.
//! - columns: the subtree is a map; the metric path and every label path
//!   resolve to parallel sequences of equal length.

use super::{ShapeError, VectorRow, check_counter};
use crate::config::MetricDef;
use crate::document::{Node, PathError};

pub fn shape(metric: &MetricDef, doc: &Node) -> Result<Vec<VectorRow>, ShapeError> {
    let item_path = metric.item_path.as_deref().unwrap_or("/");
    match doc.lookup(item_path)? {
        Node::Sequence(records) => rows(metric, records),
        subtree => columns(metric, subtree),
    }
}

fn rows(metric: &MetricDef, records: &[Node]) -> Result<Vec<VectorRow>, ShapeError> {
    let path = &metric.solver.path;
    records
        .iter()
        .map(|record| -> Result<VectorRow, ShapeError> {
            let value = record.lookup(path)?.as_f64(path)?;
            check_counter(metric, value)?;
            let labels = metric
                .labels
                .iter()
                .map(|label| {
                    let lpath = &label.solver.path;
                    record.lookup(lpath)?.as_str(lpath).map(str::to_string)
                })
                .collect::<Result<Vec<_>, PathError>>()?;
            Ok((labels, value))
        })
        .collect()
}

fn columns(metric: &MetricDef, subtree: &Node) -> Result<Vec<VectorRow>, ShapeError> {
    let path = &metric.solver.path;
    let values = subtree.lookup(path)?.as_sequence(path)?;

    let mut label_columns = Vec::with_capacity(metric.labels.len());
    for label in &metric.labels {
        let lpath = &label.solver.path;
        let column = subtree.lookup(lpath)?.as_sequence(lpath)?;
        if column.len() != values.len() {
            return Err(ShapeError::ShapeMismatch {
                metric: metric.name.clone(),
                reason: format!(
                    "label '{}' has {} elements but '{}' has {}",
                    label.name,
                    column.len(),
                    path,
                    values.len()
                ),
            });
        }
        label_columns.push((lpath, column));
    }

    values
        .iter()
        .enumerate()
        .map(|(i, node)| -> Result<VectorRow, ShapeError> {
            let value = node.as_f64(&format!("{path}/{i}"))?;
            check_counter(metric, value)?;
            let labels = label_columns
                .iter()
                .map(|(lpath, column)| column[i].as_str(&format!("{lpath}/{i}")).map(str::to_string))
                .collect::<Result<Vec<_>, PathError>>()?;
            Ok((labels, value))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MetricType;
    use crate::document::json;
    use crate::shape::testing::{label, metric};

    fn vector(path: &str, item_path: &str, labels: &[(&str, &str)]) -> MetricDef {
        let mut def = metric("connection_height", MetricType::Gauge, path);
        def.item_path = Some(item_path.to_string());
        def.labels = labels.iter().map(|(n, p)| label(n, p)).collect();
        def
    }

    fn row(labels: &[&str], value: f64) -> VectorRow {
        (labels.iter().map(|l| l.to_string()).collect(), value)
    }

    #[test]
    fn test_parallel_arrays() {
        let doc = json::decode(
            br#"{"peers":{"heights":[100,101],"addresses":["10.0.0.1","10.0.0.2"],"dirs":["in","out"]}}"#,
        )
        .unwrap();
        let def = vector(
            "/heights",
            "/peers",
            &[("address", "/addresses"), ("direction", "/dirs")],
        );

        assert_eq!(
            shape(&def, &doc).unwrap(),
            vec![row(&["10.0.0.1", "in"], 100.0), row(&["10.0.0.2", "out"], 101.0)]
        );
    }

    #[test]
    fn test_length_mismatch() {
        let doc = json::decode(br#"{"heights":[100,101],"addresses":["10.0.0.1"]}"#).unwrap();
        let def = vector("/heights", "/", &[("address", "/addresses")]);

        assert!(matches!(
            shape(&def, &doc),
            Err(ShapeError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_records() {
        let doc = json::decode(
            br#"{"connections":[{"address":"10.0.0.1:6000","height":58890},
                                {"address":"10.0.0.2:6000","height":58894}]}"#,
        )
        .unwrap();
        let def = vector("/height", "/connections", &[("address", "/address")]);

        assert_eq!(
            shape(&def, &doc).unwrap(),
            vec![row(&["10.0.0.1:6000"], 58890.0), row(&["10.0.0.2:6000"], 58894.0)]
        );
    }

    #[test]
    fn test_empty_vector() {
        let doc = json::decode(br#"{"connections":[]}"#).unwrap();
        let def = vector("/height", "/connections", &[("address", "/address")]);
        assert!(shape(&def, &doc).unwrap().is_empty());
    }

    #[test]
    fn test_label_must_be_string() {
        let doc = json::decode(br#"{"heights":[1],"ids":[7]}"#).unwrap();
        let def = vector("/heights", "/", &[("id", "/ids")]);
        assert!(matches!(
            shape(&def, &doc),
            Err(ShapeError::Path(PathError::TypeMismatch { expected: "string", .. }))
        ));
    }
}
