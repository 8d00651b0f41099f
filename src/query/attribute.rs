use std::collections::BTreeMap;

use serde::Deserialize;
use tracing::trace;

use crate::{AttributeValue, ObjectName, QueryResult, ResultNameStrategy, ResultValue};

/// Separator between an attribute's metric name and the path of a flattened composite leaf.
pub const KEY_SEPARATOR: &str = ".";

/// How composite attribute values are flattened.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompositePolicy {
    /// Emit every scalar leaf.
    #[default]
    FlattenAll,
    /// Only descend into the listed top-level keys, in the listed order.
    Keys(Vec<String>),
}

/// One attribute collected by a [`crate::Query`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AttributeSpec {
    name: String,
    #[serde(default)]
    result_type: Option<String>,
    #[serde(default)]
    composite: CompositePolicy,
}

impl AttributeSpec {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        AttributeSpec { name: name.into(), result_type: None, composite: CompositePolicy::FlattenAll }
    }

    #[must_use]
    pub fn with_result_type(mut self, result_type: impl Into<String>) -> Self {
        self.result_type = Some(result_type.into());
        self
    }

    #[must_use]
    pub fn with_keys<I, K>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        self.composite = CompositePolicy::Keys(keys.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn result_type(&self) -> Option<&str> {
        self.result_type.as_deref()
    }

    #[must_use]
    pub const fn composite(&self) -> &CompositePolicy {
        &self.composite
    }

    /// Converts one raw attribute value into results appended to `out`.
    ///
    /// At most `remaining` results are appended; a composite value may be cut part way
    /// through. Unsupported values are dropped.
    #[allow(clippy::too_many_arguments)]
    pub fn extract(
        &self,
        object_name: &ObjectName,
        value: &AttributeValue,
        alias: Option<&str>,
        naming: &dyn ResultNameStrategy,
        epoch_ms: u128,
        remaining: usize,
        out: &mut Vec<QueryResult>,
    ) {
        let mut extractor = Extractor { spec: self, object_name, epoch_ms, remaining, out };
        let base = naming.resolve_name(object_name, &self.name, alias);

        match (value, &self.composite) {
            (AttributeValue::Composite(entries), CompositePolicy::Keys(keys)) => {
                for key in keys {
                    let Some(value) = entries.get(key) else {
                        trace!(attribute = %self.name, %key, "Composite key not present");
                        continue;
                    };
                    if !extractor.visit(&child_name(&base, key), value) {
                        break;
                    }
                }
            }
            _ => {
                extractor.visit(&base, value);
            }
        }
    }
}

struct Extractor<'a> {
    spec: &'a AttributeSpec,
    object_name: &'a ObjectName,
    epoch_ms: u128,
    remaining: usize,
    out: &'a mut Vec<QueryResult>,
}

impl Extractor<'_> {
    /// Returns `false` once capacity is exhausted.
    fn visit(&mut self, name: &str, value: &AttributeValue) -> bool {
        if self.remaining == 0 {
            return false;
        }

        let value = match value {
            AttributeValue::Integer(v) => ResultValue::Integer(*v),
            AttributeValue::Float(v) if v.is_finite() => ResultValue::Float(*v),
            AttributeValue::Boolean(v) => ResultValue::Boolean(*v),
            AttributeValue::String(v) => ResultValue::Text(v.clone()),
            AttributeValue::Composite(entries) => return self.visit_composite(name, entries),
            AttributeValue::Float(_) | AttributeValue::Unsupported(_) => {
                trace!(attribute = %self.spec.name, name, ?value, "Dropping unsupported value");
                return true;
            }
        };

        self.out.push(QueryResult {
            name: name.to_string(),
            value,
            epoch_ms: self.epoch_ms,
            object_name: self.object_name.clone(),
            attribute: self.spec.name.clone(),
            result_type: self.spec.result_type.clone(),
        });
        self.remaining = self.remaining.saturating_sub(1);

        true
    }

    fn visit_composite(&mut self, name: &str, entries: &BTreeMap<String, AttributeValue>) -> bool {
        for (key, value) in entries {
            if !self.visit(&child_name(name, key), value) {
                return false;
            }
        }

        true
    }
}

fn child_name(parent: &str, key: &str) -> String {
    format!("{parent}{KEY_SEPARATOR}{key}")
}
