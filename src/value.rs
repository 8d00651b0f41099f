use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

/// Raw attribute value as returned by the managed-object directory.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Integer(i64),
    Float(f64),
    Boolean(bool),
    String(String),
    /// Nested key/value data (flattened during extraction).
    Composite(BTreeMap<String, AttributeValue>),
    /// Any value the extractor does not know how to turn into a metric; carries a type name
    /// for diagnostics.
    Unsupported(String),
}

impl From<serde_json::Value> for AttributeValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;

        match value {
            Value::Bool(b) => AttributeValue::Boolean(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => AttributeValue::Integer(i),
                None => n
                    .as_f64()
                    .map_or_else(|| AttributeValue::Unsupported("number".to_string()), AttributeValue::Float),
            },
            Value::String(s) => AttributeValue::String(s),
            Value::Object(map) => AttributeValue::Composite(
                map.into_iter()
                    .map(|(key, value)| (key, AttributeValue::from(value)))
                    .collect(),
            ),
            Value::Null => AttributeValue::Unsupported("null".to_string()),
            Value::Array(_) => AttributeValue::Unsupported("array".to_string()),
        }
    }
}

/// Scalar value carried by a [`crate::QueryResult`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResultValue {
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Text(String),
}

impl fmt::Display for ResultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultValue::Integer(v) => write!(f, "{v}"),
            ResultValue::Float(v) => write!(f, "{v}"),
            ResultValue::Boolean(v) => write!(f, "{v}"),
            ResultValue::Text(v) => f.write_str(v),
        }
    }
}
