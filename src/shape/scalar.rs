use super::{ShapeError, check_counter};
use crate::config::MetricDef;
use crate::document::Node;

/// A single numeric leaf; booleans read as 1 and 0
pub fn shape(metric: &MetricDef, doc: &Node) -> Result<f64, ShapeError> {
    let path = &metric.solver.path;
    let value = doc.lookup(path)?.as_f64(path)?;
    check_counter(metric, value)?;
    Ok(value)
}
