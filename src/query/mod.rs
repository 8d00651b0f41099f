mod attribute;
mod metrics;

use std::sync::Arc;
use std::time::UNIX_EPOCH;

pub use attribute::{AttributeSpec, CompositePolicy, KEY_SEPARATOR};
pub use metrics::{QueryMetrics, QueryStatus};
use quanta::Clock;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::{ConfigError, Directory, DirectoryError, ObjectName, QueryResult, ResultNameStrategy};

const DEFAULT_MAX_RESULTS: usize = 50;

/// A repeatable unit of collection: resolve an object-name pattern, fetch a fixed set of
/// attributes from every match and turn them into at most `max_results` results.
#[derive(Debug)]
pub struct Query {
    object_name: ObjectName,
    result_alias: Option<String>,
    attributes: Vec<AttributeSpec>,
    attribute_names: Vec<String>,
    max_results: usize,
    metrics: Arc<QueryMetrics>,
}

impl Query {
    #[must_use]
    pub fn builder() -> QueryBuilder {
        QueryBuilder::default()
    }

    /// Collects one cycle worth of results.
    ///
    /// A failure on one matched object is logged and that object skipped. Collection stops
    /// after the first object whose batch brings the total to `max_results`.
    ///
    /// # Errors
    ///
    /// Errors if the pattern itself cannot be resolved; the query's metrics are untouched in
    /// that case.
    pub fn collect(
        &self,
        directory: &dyn Directory,
        naming: &dyn ResultNameStrategy,
    ) -> Result<Vec<QueryResult>, DirectoryError> {
        let start = self.metrics.now();
        let epoch_ms = UNIX_EPOCH.elapsed().map_or(0, |elapsed| elapsed.as_millis());

        let matched = directory.resolve(&self.object_name)?;
        debug!(query = %self.object_name, matched = matched.len(), "Resolved query");

        let mut guard = self.metrics.start_collection(start);
        let mut results = Vec::new();
        for object_name in &matched {
            if let Err(err) =
                self.collect_object(directory, naming, object_name, epoch_ms, &mut results)
            {
                warn!(%err, query = %self.object_name, object = %object_name, "Failed to collect object");
                continue;
            }

            if results.len() >= self.max_results {
                debug!(query = %self.object_name, self.max_results, "Query reached max results");
                break;
            }
        }
        guard.collected = results.len();

        Ok(results)
    }

    fn collect_object(
        &self,
        directory: &dyn Directory,
        naming: &dyn ResultNameStrategy,
        object_name: &ObjectName,
        epoch_ms: u128,
        results: &mut Vec<QueryResult>,
    ) -> Result<(), DirectoryError> {
        let values = directory.get_attributes(object_name, &self.attribute_names)?;
        debug!(object = %object_name, attributes = values.len(), "Fetched attributes");

        for (name, value) in &values {
            let Some(spec) = self.attributes.iter().find(|spec| spec.name() == name) else {
                debug!(object = %object_name, attribute = %name, "Ignoring unrequested attribute");
                continue;
            };

            spec.extract(
                object_name,
                value,
                self.result_alias.as_deref(),
                naming,
                epoch_ms,
                self.max_results.saturating_sub(results.len()),
                results,
            );
        }

        Ok(())
    }

    /// Canonical object-name pattern, used as the query's identity.
    #[must_use]
    pub fn id(&self) -> String {
        self.object_name.canonical()
    }

    #[must_use]
    pub const fn object_name(&self) -> &ObjectName {
        &self.object_name
    }

    #[must_use]
    pub fn result_alias(&self) -> Option<&str> {
        self.result_alias.as_deref()
    }

    #[must_use]
    pub fn attributes(&self) -> &[AttributeSpec] {
        &self.attributes
    }

    #[must_use]
    pub const fn max_results(&self) -> usize {
        self.max_results
    }

    /// Shared handle to the counters, for monitoring from another thread.
    #[must_use]
    pub fn metrics(&self) -> Arc<QueryMetrics> {
        Arc::clone(&self.metrics)
    }

    #[must_use]
    pub fn status(&self) -> QueryStatus {
        self.metrics.status()
    }
}

#[derive(Debug)]
pub struct QueryBuilder {
    object_name: Option<ObjectName>,
    result_alias: Option<String>,
    attributes: Vec<AttributeSpec>,
    max_results: usize,
    clock: Option<Clock>,
}

impl Default for QueryBuilder {
    fn default() -> Self {
        QueryBuilder {
            object_name: None,
            result_alias: None,
            attributes: Vec::new(),
            max_results: DEFAULT_MAX_RESULTS,
            clock: None,
        }
    }
}

impl QueryBuilder {
    #[must_use]
    pub fn object_name(mut self, object_name: ObjectName) -> Self {
        self.object_name = Some(object_name);
        self
    }

    /// # Errors
    ///
    /// Errors if `raw` is not a valid object name.
    pub fn parse_object_name(self, raw: &str) -> Result<Self, ConfigError> {
        Ok(self.object_name(ObjectName::parse(raw)?))
    }

    #[must_use]
    pub fn result_alias(mut self, alias: impl Into<String>) -> Self {
        self.result_alias = Some(alias.into());
        self
    }

    #[must_use]
    pub const fn max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    /// Adds an attribute; a later attribute with the same name replaces the earlier one.
    #[must_use]
    pub fn attribute(mut self, attribute: AttributeSpec) -> Self {
        match self.attributes.iter_mut().find(|spec| spec.name() == attribute.name()) {
            Some(existing) => *existing = attribute,
            None => self.attributes.push(attribute),
        }
        self
    }

    #[must_use]
    pub fn attribute_name(self, name: impl Into<String>) -> Self {
        self.attribute(AttributeSpec::new(name))
    }

    #[must_use]
    pub fn attributes<I>(self, attributes: I) -> Self
    where
        I: IntoIterator<Item = AttributeSpec>,
    {
        attributes.into_iter().fold(self, QueryBuilder::attribute)
    }

    /// Overrides the clock used to time collections.
    #[must_use]
    pub fn clock(mut self, clock: Clock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// # Errors
    ///
    /// Errors if no object name was set or `max_results` is zero.
    pub fn build(self) -> Result<Query, ConfigError> {
        let object_name = self.object_name.ok_or(ConfigError::MissingField("object_name"))?;
        if self.max_results == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_results".to_string(),
                value: "0".to_string(),
            });
        }

        let attribute_names = self.attributes.iter().map(|spec| spec.name().to_string()).collect();

        Ok(Query {
            object_name,
            result_alias: self.result_alias,
            attributes: self.attributes,
            attribute_names,
            max_results: self.max_results,
            metrics: Arc::new(QueryMetrics::new(self.clock.unwrap_or_else(Clock::new))),
        })
    }
}

/// Deserializable description of a [`Query`].
#[derive(Debug, Clone, Deserialize)]
pub struct QuerySpec {
    pub object_name: String,
    #[serde(default)]
    pub result_alias: Option<String>,
    #[serde(default)]
    pub attributes: Vec<AttributeEntry>,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

/// An attribute given either by bare name or as a full [`AttributeSpec`].
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AttributeEntry {
    Name(String),
    Spec(AttributeSpec),
}

const fn default_max_results() -> usize {
    DEFAULT_MAX_RESULTS
}

impl TryFrom<QuerySpec> for Query {
    type Error = ConfigError;

    fn try_from(spec: QuerySpec) -> Result<Self, Self::Error> {
        let mut builder = Query::builder()
            .parse_object_name(&spec.object_name)?
            .max_results(spec.max_results)
            .attributes(spec.attributes.into_iter().map(|entry| match entry {
                AttributeEntry::Name(name) => AttributeSpec::new(name),
                AttributeEntry::Spec(spec) => spec,
            }));
        if let Some(alias) = spec.result_alias {
            builder = builder.result_alias(alias);
        }

        builder.build()
    }
}
