mod cycle;
mod directory;
mod naming;
mod object_name;
pub mod output;
mod query;
mod result;
mod value;

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

pub use cycle::{CollectionCycle, CycleReport};
pub use directory::{Directory, DirectoryError, StaticDirectory};
pub use naming::{DefaultNameStrategy, ResultNameStrategy};
pub use object_name::ObjectName;
pub use output::{OutputWriter, WriterError, WriterSpec};
pub use query::{
    AttributeEntry, AttributeSpec, CompositePolicy, Query, QueryBuilder, QueryMetrics, QuerySpec,
    QueryStatus, KEY_SEPARATOR,
};
pub use result::QueryResult;
use thiserror::Error;
pub use tokio_util::sync::CancellationToken;
pub use value::{AttributeValue, ResultValue};

/// Spawns the collector thread, which runs one collection cycle per `config.interval` until
/// `cxl` is cancelled and then destroys every writer.
pub fn install(cxl: CancellationToken, config: Config) -> Result<JoinHandle<()>, InstallError> {
    cycle::CollectionCycle::spawn(cxl, config)
}

pub struct Config {
    pub interval: Duration,
    pub queries: Vec<Query>,
    pub writers: Vec<Box<dyn OutputWriter>>,
    pub directory: Arc<dyn Directory>,
    pub naming: Arc<dyn ResultNameStrategy>,
}

impl Config {
    /// Config using [`DefaultNameStrategy`].
    #[must_use]
    pub fn new(
        interval: Duration,
        directory: Arc<dyn Directory>,
        queries: Vec<Query>,
        writers: Vec<Box<dyn OutputWriter>>,
    ) -> Self {
        Config { interval, queries, writers, directory, naming: Arc::new(DefaultNameStrategy) }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid object name; name={name}; reason={reason}")]
    InvalidObjectName { name: String, reason: String },
    #[error("Missing required setting; key={0}")]
    MissingField(&'static str),
    #[error("Invalid value; key={key}; value={value}")]
    InvalidValue { key: String, value: String },
    #[error("Malformed JSON; err={0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("Zero collection interval")]
    ZeroInterval,
    #[error("Spawn thread; err={0}")]
    SpawnThread(#[from] std::io::Error),
}
