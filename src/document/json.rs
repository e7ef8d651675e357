//! JSON bodies

use serde_json::Value;

use super::{DecodeError, Decoder, Node};

pub fn decode(body: &[u8]) -> Result<Node, DecodeError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| DecodeError::new(Decoder::Json, e.to_string(), body))?;
    Ok(Node::from(value))
}

impl From<Value> for Node {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Node::Null,
            Value::Bool(b) => Node::Bool(b),
            // Integers beyond 2^53 lose precision here, same as any f64 sample.
            Value::Number(n) => Node::Number(n.as_f64().unwrap_or(f64::NAN)),
            Value::String(s) => Node::String(s),
            Value::Array(items) => Node::Sequence(items.into_iter().map(Node::from).collect()),
            Value::Object(map) => Node::Map(map.into_iter().map(|(k, v)| (k, Node::from(v))).collect()),
        }
    }
}
