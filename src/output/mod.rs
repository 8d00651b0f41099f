mod console;
mod file;
mod null;
mod opentsdb;
pub mod rollover;
mod settings;

use std::io;

pub use console::ConsoleWriter;
pub use file::FileWriter;
pub use null::NullWriter;
pub use opentsdb::{
    Connection, Connector, OpenTsdbWriter, OpenTsdbWriterBuilder, TcpConnection, TcpConnector,
};
use serde::Deserialize;
pub use settings::Settings;
use thiserror::Error;
use tracing::Level;

use crate::{ConfigError, QueryResult};

/// Emits a `tracing` event at a level only known at runtime.
macro_rules! log_at {
    ($level:expr, $($arg:tt)+) => {
        match $level {
            tracing::Level::ERROR => tracing::error!($($arg)+),
            tracing::Level::WARN => tracing::warn!($($arg)+),
            tracing::Level::INFO => tracing::info!($($arg)+),
            tracing::Level::DEBUG => tracing::debug!($($arg)+),
            _ => tracing::trace!($($arg)+),
        }
    };
}
pub(crate) use log_at;

/// Sink for the results of a collection cycle.
///
/// A writer is driven through `pre_collect`, any number of `write` calls and `post_collect`
/// once per cycle, all on the same thread, and finally `pre_destroy`.
pub trait OutputWriter: Send {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Start of a cycle; may acquire resources.
    ///
    /// # Errors
    ///
    /// Errors if the writer cannot be made ready for this cycle.
    fn pre_collect(&mut self) -> Result<(), WriterError> {
        Ok(())
    }

    /// Delivers a batch, preserving its order.
    ///
    /// # Errors
    ///
    /// Errors on the first result that cannot be delivered.
    fn write(&mut self, results: &[QueryResult]) -> Result<(), WriterError> {
        for result in results {
            self.write_result(result)?;
        }

        Ok(())
    }

    /// Delivers a single result.
    ///
    /// # Errors
    ///
    /// Errors if the result cannot be delivered.
    fn write_result(&mut self, result: &QueryResult) -> Result<(), WriterError>;

    /// End of a cycle; may flush.
    ///
    /// # Errors
    ///
    /// Errors if buffered output cannot be flushed.
    fn post_collect(&mut self) -> Result<(), WriterError> {
        Ok(())
    }

    /// Releases all resources. Calling it again is a no-op.
    ///
    /// # Errors
    ///
    /// Errors if a resource could not be released cleanly; the writer is still considered
    /// destroyed.
    fn pre_destroy(&mut self) -> Result<(), WriterError>;
}

/// Possible failure of an [`OutputWriter`].
#[derive(Debug, Error)]
pub enum WriterError {
    /// Acquiring or releasing the writer's resource failed; the writer is unusable until it
    /// is started again.
    #[error("Lifecycle failure while {action}; err={source}")]
    Lifecycle {
        action: &'static str,
        #[source]
        source: io::Error,
    },
    /// Steady-state I/O failure while delivering results.
    #[error("Write failed; err={0}")]
    Io(#[from] io::Error),
    #[error("Invalid writer configuration; err={0}")]
    Config(#[from] ConfigError),
}

/// Levels used by a writer for its "info", "debug" and "trace" style messages.
///
/// Lets a single writer be made chattier (or quieter) through its `logLevel` setting without
/// touching the global subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verbosity {
    pub info: Level,
    pub debug: Level,
    pub trace: Level,
}

impl Verbosity {
    #[must_use]
    pub fn from_level(level: &str) -> Self {
        let level = level.to_ascii_uppercase();

        match level.as_str() {
            "TRACE" | "FINEST" => Verbosity { info: Level::INFO, debug: Level::INFO, trace: Level::INFO },
            "DEBUG" | "FINER" | "FINE" => {
                Verbosity { info: Level::INFO, debug: Level::INFO, trace: Level::DEBUG }
            }
            "WARN" => Verbosity { info: Level::DEBUG, debug: Level::DEBUG, trace: Level::DEBUG },
            _ => Verbosity::default(),
        }
    }
}

impl Default for Verbosity {
    fn default() -> Self {
        Verbosity { info: Level::INFO, debug: Level::DEBUG, trace: Level::TRACE }
    }
}

/// Deserializable description of a writer.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "settings", rename_all = "snake_case")]
pub enum WriterSpec {
    Null,
    Console,
    File(Settings),
    #[serde(rename = "opentsdb")]
    OpenTsdb(Settings),
}

impl WriterSpec {
    /// Builds the writer; no resource is opened yet.
    ///
    /// # Errors
    ///
    /// Errors if a required setting is missing or invalid.
    pub fn build(self) -> Result<Box<dyn OutputWriter>, ConfigError> {
        Ok(match self {
            WriterSpec::Null => Box::new(NullWriter::default()),
            WriterSpec::Console => Box::new(ConsoleWriter::stdout()),
            WriterSpec::File(settings) => Box::new(FileWriter::from_settings(&settings)?),
            WriterSpec::OpenTsdb(settings) => Box::new(OpenTsdbWriter::from_settings(&settings)?),
        })
    }
}
