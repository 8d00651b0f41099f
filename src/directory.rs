use std::collections::BTreeMap;

use thiserror::Error;

use crate::{AttributeValue, ConfigError, ObjectName};

/// Live view of the managed objects exposed by the monitored runtime.
///
/// Shared read-only by all queries of a cycle.
pub trait Directory: Send + Sync {
    /// Resolves a name or pattern to the concrete names it selects.
    ///
    /// No match is an empty result, not an error. Order is unspecified.
    ///
    /// # Errors
    ///
    /// Errors if the directory cannot be queried at all.
    fn resolve(&self, pattern: &ObjectName) -> Result<Vec<ObjectName>, DirectoryError>;

    /// Fetches all `names` of one object in a single round trip.
    ///
    /// Attributes the object does not expose are omitted from the result.
    ///
    /// # Errors
    ///
    /// Errors if the object vanished or the fetch failed.
    fn get_attributes(
        &self,
        name: &ObjectName,
        names: &[String],
    ) -> Result<Vec<(String, AttributeValue)>, DirectoryError>;
}

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("Object not found; name={0}")]
    NotFound(String),
    #[error("Directory unavailable; err={0}")]
    Unavailable(String),
}

/// In-memory [`Directory`] backed by a fixed set of objects.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    objects: BTreeMap<ObjectName, BTreeMap<String, AttributeValue>>,
}

impl StaticDirectory {
    #[must_use]
    pub fn new() -> Self {
        StaticDirectory::default()
    }

    /// Registers (or replaces) an object and its attributes.
    pub fn insert<I, K>(&mut self, name: ObjectName, attributes: I)
    where
        I: IntoIterator<Item = (K, AttributeValue)>,
        K: Into<String>,
    {
        self.objects.insert(
            name,
            attributes
                .into_iter()
                .map(|(key, value)| (key.into(), value))
                .collect(),
        );
    }

    /// Loads a directory from a JSON document of the form
    /// `{ "<object name>": { "<attribute>": <value>, ... }, ... }`.
    ///
    /// # Errors
    ///
    /// Errors on malformed JSON or object names.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let raw: BTreeMap<String, BTreeMap<String, serde_json::Value>> = serde_json::from_str(json)?;

        let mut directory = StaticDirectory::new();
        for (name, attributes) in raw {
            directory.insert(
                ObjectName::parse(&name)?,
                attributes
                    .into_iter()
                    .map(|(key, value)| (key, AttributeValue::from(value))),
            );
        }

        Ok(directory)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl Directory for StaticDirectory {
    fn resolve(&self, pattern: &ObjectName) -> Result<Vec<ObjectName>, DirectoryError> {
        // Exact names short-circuit the scan.
        if !pattern.is_pattern() {
            return Ok(self
                .objects
                .contains_key(pattern)
                .then(|| pattern.clone())
                .into_iter()
                .collect());
        }

        Ok(self
            .objects
            .keys()
            .filter(|name| pattern.matches(name))
            .cloned()
            .collect())
    }

    fn get_attributes(
        &self,
        name: &ObjectName,
        names: &[String],
    ) -> Result<Vec<(String, AttributeValue)>, DirectoryError> {
        let attributes = self
            .objects
            .get(name)
            .ok_or_else(|| DirectoryError::NotFound(name.canonical()))?;

        Ok(names
            .iter()
            .filter_map(|key| attributes.get(key).map(|value| (key.clone(), value.clone())))
            .collect())
    }
}
