//! Decoded upstream documents and slash-path lookup
//!
//! Every upstream body is turned into a [`Node`] tree before metrics are
//! extracted from it. Leaves are runtime-typed, so extraction asserts the
//! variant it needs and reports [`PathError::TypeMismatch`] otherwise.
//!
//! Paths are slash-delimited (`/blockchain/head/seq`). Purely numeric
//! segments index sequences, everything else is a map key. An empty path
//! or `/` names the whole document.

pub mod exposition;
pub mod json;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

pub use exposition::{MetricFamily, MetricKind, Sample};

/// Max bytes of a failing body kept in a [`DecodeError`] for logging.
const BODY_PREVIEW_BYTES: usize = 512;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PathError {
    #[error("path '{path}' not found (missing segment '{segment}')")]
    NotFound { path: String, segment: String },

    #[error("path '{path}' expected {expected}, found {found}")]
    TypeMismatch {
        path: String,
        expected: &'static str,
        found: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("failed to decode {dialect} body: {reason}")]
pub struct DecodeError {
    pub dialect: Decoder,
    pub reason: String,
    /// Leading part of the offending body, for logs
    pub body: String,
}

impl DecodeError {
    pub fn new(dialect: Decoder, reason: impl Into<String>, body: &[u8]) -> Self {
        let end = body.len().min(BODY_PREVIEW_BYTES);
        Self {
            dialect,
            reason: reason.into(),
            body: String::from_utf8_lossy(&body[..end]).into_owned(),
        }
    }
}

/// Body dialect of an api resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Decoder {
    #[default]
    Json,
    Prometheus,
}

impl fmt::Display for Decoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decoder::Json => f.write_str("json"),
            Decoder::Prometheus => f.write_str("prometheus"),
        }
    }
}

impl Decoder {
    /// Decode a raw body into a document tree
    pub fn decode(&self, body: &[u8]) -> Result<Node, DecodeError> {
        match self {
            Decoder::Json => json::decode(body),
            Decoder::Prometheus => {
                exposition::parse_bytes(body).map(|families| exposition::to_node(&families))
            }
        }
    }
}

/// A decoded document
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Sequence(Vec<Node>),
    Map(BTreeMap<String, Node>),
}

impl Node {
    pub fn kind(&self) -> &'static str {
        match self {
            Node::Null => "null",
            Node::Bool(_) => "bool",
            Node::Number(_) => "number",
            Node::String(_) => "string",
            Node::Sequence(_) => "sequence",
            Node::Map(_) => "map",
        }
    }

    /// Descend `path` one segment at a time
    pub fn lookup(&self, path: &str) -> Result<&Node, PathError> {
        let mut current = self;

        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current = match current {
                Node::Map(entries) => entries.get(segment).ok_or_else(|| PathError::NotFound {
                    path: path.to_string(),
                    segment: segment.to_string(),
                })?,
                Node::Sequence(items) => {
                    let index = segment.parse::<usize>().map_err(|_| PathError::TypeMismatch {
                        path: path.to_string(),
                        expected: "map",
                        found: "sequence",
                    })?;
                    items.get(index).ok_or_else(|| PathError::NotFound {
                        path: path.to_string(),
                        segment: segment.to_string(),
                    })?
                }
                leaf => {
                    return Err(PathError::TypeMismatch {
                        path: path.to_string(),
                        expected: "container",
                        found: leaf.kind(),
                    });
                }
            };
        }

        Ok(current)
    }

    /// Numeric view of a leaf; booleans read as 1 and 0
    pub fn as_f64(&self, path: &str) -> Result<f64, PathError> {
        match self {
            Node::Number(v) => Ok(*v),
            Node::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
            _ => Err(self.mismatch(path, "number")),
        }
    }

    pub fn as_str(&self, path: &str) -> Result<&str, PathError> {
        match self {
            Node::String(s) => Ok(s),
            _ => Err(self.mismatch(path, "string")),
        }
    }

    pub fn as_sequence(&self, path: &str) -> Result<&[Node], PathError> {
        match self {
            Node::Sequence(items) => Ok(items),
            _ => Err(self.mismatch(path, "sequence")),
        }
    }

    fn mismatch(&self, path: &str, expected: &'static str) -> PathError {
        PathError::TypeMismatch {
            path: path.to_string(),
            expected,
            found: self.kind(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_doc() -> Node {
        json::decode(
            br#"{"blockchain":{"head":{"seq":58894,"fee":485194},"unspents":38171},
                 "peers":[{"addr":"a"},{"addr":"b"}],"csrf_enabled":true,"name":"node"}"#,
        )
        .unwrap()
    }

    #[test]
    fn test_lookup_nested_key() {
        let doc = sample_doc();
        let seq = doc.lookup("/blockchain/head/seq").unwrap();
        assert_eq!(seq.as_f64("/blockchain/head/seq").unwrap(), 58894.0);
    }

    #[test]
    fn test_lookup_root() {
        let doc = sample_doc();
        assert_eq!(doc.lookup("").unwrap(), &doc);
        assert_eq!(doc.lookup("/").unwrap(), &doc);
    }

    #[test]
    fn test_lookup_sequence_index() {
        let doc = sample_doc();
        let addr = doc.lookup("/peers/1/addr").unwrap();
        assert_eq!(addr.as_str("/peers/1/addr").unwrap(), "b");
    }

    #[test]
    fn test_lookup_missing_key() {
        let doc = sample_doc();
        let err = doc.lookup("/blockchain/tail/seq").unwrap_err();
        assert!(matches!(err, PathError::NotFound { ref segment, .. } if segment == "tail"));
    }

    #[test]
    fn test_lookup_index_out_of_range() {
        let doc = sample_doc();
        assert!(matches!(
            doc.lookup("/peers/5/addr"),
            Err(PathError::NotFound { .. })
        ));
    }

    #[test]
    fn test_lookup_through_leaf() {
        let doc = sample_doc();
        let err = doc.lookup("/name/first").unwrap_err();
        assert!(matches!(
            err,
            PathError::TypeMismatch { found: "string", .. }
        ));
    }

    #[test]
    fn test_lookup_named_segment_on_sequence() {
        let doc = sample_doc();
        assert!(matches!(
            doc.lookup("/peers/first"),
            Err(PathError::TypeMismatch { found: "sequence", .. })
        ));
    }

    #[test]
    fn test_bool_reads_as_number() {
        let doc = sample_doc();
        let flag = doc.lookup("/csrf_enabled").unwrap();
        assert_eq!(flag.as_f64("/csrf_enabled").unwrap(), 1.0);
        assert_eq!(Node::Bool(false).as_f64("/x").unwrap(), 0.0);
    }

    #[test]
    fn test_string_is_not_a_number() {
        let doc = sample_doc();
        let name = doc.lookup("/name").unwrap();
        assert!(matches!(
            name.as_f64("/name"),
            Err(PathError::TypeMismatch { expected: "number", .. })
        ));
    }

    #[test]
    fn test_prometheus_decoder_builds_tree() {
        let body = b"# TYPE up gauge\nup{zone=\"a\"} 1\n";
        let doc = Decoder::Prometheus.decode(body).unwrap();
        let value = doc.lookup("/up/samples/0/value").unwrap();
        assert_eq!(value.as_f64("").unwrap(), 1.0);
        let zone = doc.lookup("/up/samples/0/labels/zone").unwrap();
        assert_eq!(zone.as_str("").unwrap(), "a");
        assert_eq!(doc.lookup("/up/type").unwrap(), &Node::String("gauge".into()));
    }
}
