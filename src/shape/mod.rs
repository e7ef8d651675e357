//! Metric shapers
//!
//! A shaper evaluates a [`MetricDef`]'s node solvers against a decoded
//! document and produces a [`Shaped`] value. Shapers are pure; keeping the
//! last good value across snapshots is [`LastGood`]'s job.

pub mod histogram;
pub mod scalar;
pub mod vector;

pub use histogram::HistogramAggregate;

use crate::config::{MetricDef, MetricId, MetricType, Shape};
use crate::document::{Node, PathError};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ShapeError {
    #[error(transparent)]
    Path(#[from] PathError),

    #[error("metric '{metric}' shape mismatch: {reason}")]
    ShapeMismatch { metric: String, reason: String },

    #[error("counter '{metric}' got negative value {value}")]
    NegativeCounter { metric: String, value: f64 },

    #[error("histogram '{metric}' has no buckets")]
    EmptyBuckets { metric: String },
}

/// One row of a labelled vector: label values in declaration order
pub type VectorRow = (Vec<String>, f64);

#[derive(Debug, Clone, PartialEq)]
pub enum Shaped {
    Scalar(f64),
    Vector(Vec<VectorRow>),
    Histogram(HistogramAggregate),
}

impl Shaped {
    /// Samples this value contributes to the output
    pub fn sample_count(&self) -> usize {
        match self {
            Shaped::Scalar(_) => 1,
            Shaped::Vector(rows) => rows.len(),
            // one per bucket, +Inf, _sum and _count
            Shaped::Histogram(agg) => agg.buckets.len() + 3,
        }
    }
}

/// Evaluate `metric` against `doc` with the shaper its definition selects
pub fn shape(metric: &MetricDef, doc: &Node) -> Result<Shaped, ShapeError> {
    match metric.shape() {
        Shape::Scalar => scalar::shape(metric, doc).map(Shaped::Scalar),
        Shape::Vector => vector::shape(metric, doc).map(Shaped::Vector),
        Shape::Histogram => histogram::shape(metric, doc).map(Shaped::Histogram),
    }
}

fn check_counter(metric: &MetricDef, value: f64) -> Result<(), ShapeError> {
    if metric.kind == MetricType::Counter && value < 0.0 {
        return Err(ShapeError::NegativeCounter {
            metric: metric.name.clone(),
            value,
        });
    }
    Ok(())
}

/// Last successfully shaped value per metric, kept across snapshots
#[derive(Debug, Default)]
pub struct LastGood {
    values: RwLock<HashMap<MetricId, Shaped>>,
}

impl LastGood {
    pub async fn record(&self, id: MetricId, value: Shaped) {
        self.values.write().await.insert(id, value);
    }

    pub async fn get(&self, id: MetricId) -> Option<Shaped> {
        self.values.read().await.get(&id).cloned()
    }
}
