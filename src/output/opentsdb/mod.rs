mod line;
mod tcp;

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::time::Duration;

pub use tcp::{TcpConnection, TcpConnector};
use tracing::{error, warn};

use crate::output::{log_at, OutputWriter, Settings, Verbosity, WriterError};
use crate::{ConfigError, QueryResult};

/// Opens connections for an [`OpenTsdbWriter`].
pub trait Connector: Send {
    type Connection: Connection;

    /// # Errors
    ///
    /// Errors if the host cannot be resolved or reached.
    fn connect(&self, host: &str, port: u16) -> io::Result<Self::Connection>;
}

/// A persistent, bidirectional connection to an OpenTSDB server.
pub trait Connection: Send {
    /// # Errors
    ///
    /// Errors if the output stream is unavailable.
    fn output(&mut self) -> io::Result<&mut dyn Write>;

    /// Returns `true` if a complete response line can be read without blocking (or the stream
    /// ended). Must not block.
    ///
    /// # Errors
    ///
    /// Errors if the connection state cannot be queried.
    fn response_ready(&mut self) -> io::Result<bool>;

    /// Reads one complete response line without blocking; `None` at end of stream or when no
    /// complete line has arrived yet.
    ///
    /// # Errors
    ///
    /// Errors on read failure.
    fn read_response_line(&mut self) -> io::Result<Option<String>>;

    /// # Errors
    ///
    /// Errors if the connection was not shut down cleanly.
    fn close(self) -> io::Result<()>;
}

/// Sends results to OpenTSDB over a persistent socket using the telnet-style `put` protocol.
///
/// The connection lifecycle ([`start`](Self::start) / [`stop`](Self::stop)) is independent of
/// the collection cycle: failures there surface as [`WriterError::Lifecycle`], while failures
/// while writing surface as plain [`io::Error`]s and leave the connection in place.
pub struct OpenTsdbWriter<C: Connector = TcpConnector> {
    host: String,
    port: u16,
    host_tag: String,
    tags: BTreeMap<String, String>,
    verbosity: Verbosity,

    connector: C,
    connection: Option<C::Connection>,
    line: String,
}

impl OpenTsdbWriter {
    #[must_use]
    pub fn builder() -> OpenTsdbWriterBuilder {
        OpenTsdbWriterBuilder::default()
    }

    /// Builds a writer from its settings (`host`, `port`, `hostTag`, `tags`,
    /// `connectTimeoutMillis`, `logLevel`).
    ///
    /// # Errors
    ///
    /// Errors if `host` or `port` is missing, or a setting does not parse.
    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        OpenTsdbWriterBuilder::from_settings(settings)?.build()
    }
}

impl<C: Connector> OpenTsdbWriter<C> {
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Opens the connection; a no-op if already connected.
    ///
    /// # Errors
    ///
    /// Returns [`WriterError::Lifecycle`] if the connection cannot be opened. The writer stays
    /// stopped and `start` may be retried.
    pub fn start(&mut self) -> Result<(), WriterError> {
        if self.connection.is_some() {
            return Ok(());
        }

        match self.connector.connect(&self.host, self.port) {
            Ok(connection) => {
                log_at!(self.verbosity.info, host = %self.host, self.port, "Connected to OpenTSDB");
                self.connection = Some(connection);

                Ok(())
            }
            Err(err) => {
                error!(%err, host = %self.host, self.port, "Error opening socket");

                Err(WriterError::Lifecycle { action: "opening socket", source: err })
            }
        }
    }

    /// Closes the connection; a no-op if already stopped.
    ///
    /// # Errors
    ///
    /// Returns [`WriterError::Lifecycle`] if closing fails. The writer is stopped either way.
    pub fn stop(&mut self) -> Result<(), WriterError> {
        let Some(connection) = self.connection.take() else {
            return Ok(());
        };

        match connection.close() {
            Ok(()) => {
                log_at!(self.verbosity.info, host = %self.host, self.port, "Disconnected from OpenTSDB");

                Ok(())
            }
            Err(err) => {
                error!(%err, host = %self.host, self.port, "Error closing socket");

                Err(WriterError::Lifecycle { action: "closing socket", source: err })
            }
        }
    }

    /// Sends one `put` line per result, flushes once, then drains whatever the server has
    /// already answered.
    ///
    /// # Errors
    ///
    /// Errors with [`io::ErrorKind::NotConnected`] if the writer is not started, or with the
    /// underlying error if the output stream, a write or the flush fails.
    pub fn do_write(&mut self, results: &[QueryResult]) -> io::Result<()> {
        let Some(connection) = self.connection.as_mut() else {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "OpenTSDB writer not started"));
        };

        let out = connection
            .output()
            .inspect_err(|err| error!(%err, "Error obtaining output stream"))?;
        for result in results {
            self.line.clear();
            if !line::write_put(
                &mut self.line,
                &result.name,
                result.epoch_seconds(),
                &result.value,
                &self.host_tag,
                &self.tags,
            ) {
                log_at!(self.verbosity.trace, name = %result.name, value = %result.value, "Skipping non-numeric result");
                continue;
            }

            log_at!(self.verbosity.trace, line = self.line.trim_end(), "Sending");
            out.write_all(self.line.as_bytes())
                .inspect_err(|err| error!(%err, name = %result.name, "Error writing result"))?;
        }
        out.flush()
            .inspect_err(|err| error!(%err, "OpenTSDB flush failed"))?;

        self.drain_responses();

        Ok(())
    }

    /// Logs the response lines the server has already sent, without waiting for more.
    ///
    /// Returns the number of lines drained.
    pub fn drain_responses(&mut self) -> usize {
        let Some(connection) = self.connection.as_mut() else {
            return 0;
        };

        let mut drained = 0usize;
        loop {
            match connection.response_ready() {
                Ok(true) => {}
                Ok(false) => break,
                Err(err) => {
                    warn!(%err, "Error checking for OpenTSDB response");
                    break;
                }
            }

            match connection.read_response_line() {
                Ok(Some(line)) => {
                    warn!("OpenTSDB says: {line}");
                    drained = drained.saturating_add(1);
                }
                Ok(None) => break,
                Err(err) => {
                    warn!(%err, "Error reading OpenTSDB response");
                    break;
                }
            }
        }

        drained
    }
}

impl<C: Connector> OutputWriter for OpenTsdbWriter<C> {
    fn name(&self) -> &str {
        "opentsdb"
    }

    fn pre_collect(&mut self) -> Result<(), WriterError> {
        self.start()
    }

    fn write(&mut self, results: &[QueryResult]) -> Result<(), WriterError> {
        self.do_write(results).map_err(WriterError::Io)
    }

    fn write_result(&mut self, result: &QueryResult) -> Result<(), WriterError> {
        self.do_write(std::slice::from_ref(result))
            .map_err(WriterError::Io)
    }

    fn pre_destroy(&mut self) -> Result<(), WriterError> {
        self.stop()
    }
}

#[derive(Debug)]
pub struct OpenTsdbWriterBuilder {
    host: Option<String>,
    port: Option<u16>,
    host_tag: Option<String>,
    tags: BTreeMap<String, String>,
    connect_timeout: Option<Duration>,
    log_level: String,
}

impl Default for OpenTsdbWriterBuilder {
    fn default() -> Self {
        OpenTsdbWriterBuilder {
            host: None,
            port: None,
            host_tag: None,
            tags: BTreeMap::new(),
            connect_timeout: None,
            log_level: "INFO".to_string(),
        }
    }
}

impl OpenTsdbWriterBuilder {
    /// # Errors
    ///
    /// Errors if a setting does not parse or a tag is not `key=value`.
    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        let mut builder = OpenTsdbWriterBuilder::default().log_level(settings.log_level());
        if let Some(host) = settings.get("host") {
            builder = builder.host(host);
        }
        if let Some(port) = settings.parse_optional("port")? {
            builder = builder.port(port);
        }
        if let Some(host_tag) = settings.get("hostTag") {
            builder = builder.host_tag(host_tag);
        }
        if let Some(millis) = settings.parse_optional::<u64>("connectTimeoutMillis")? {
            builder = builder.connect_timeout(Duration::from_millis(millis));
        }
        for tag in settings.delimited_list("tags") {
            let (key, value) = tag.split_once('=').ok_or_else(|| ConfigError::InvalidValue {
                key: "tags".to_string(),
                value: tag.to_string(),
            })?;
            builder = builder.tag(key.trim(), value.trim());
        }

        Ok(builder)
    }

    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Value of the `host` tag; defaults to `$HOSTNAME`, else `localhost`.
    #[must_use]
    pub fn host_tag(mut self, host_tag: impl Into<String>) -> Self {
        self.host_tag = Some(host_tag.into());
        self
    }

    #[must_use]
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn log_level(mut self, log_level: impl Into<String>) -> Self {
        self.log_level = log_level.into();
        self
    }

    /// # Errors
    ///
    /// Errors if host or port is missing.
    pub fn build(self) -> Result<OpenTsdbWriter<TcpConnector>, ConfigError> {
        let connector = TcpConnector { connect_timeout: self.connect_timeout };

        self.build_with(connector)
    }

    /// Builds a writer using a custom transport.
    ///
    /// # Errors
    ///
    /// Errors if host or port is missing.
    pub fn build_with<C: Connector>(self, connector: C) -> Result<OpenTsdbWriter<C>, ConfigError> {
        let host = self.host.ok_or(ConfigError::MissingField("host"))?;
        let port = self.port.ok_or(ConfigError::MissingField("port"))?;
        let host_tag = self
            .host_tag
            .or_else(|| std::env::var("HOSTNAME").ok())
            .unwrap_or_else(|| "localhost".to_string());

        Ok(OpenTsdbWriter {
            host,
            port,
            host_tag,
            tags: self.tags,
            verbosity: Verbosity::from_level(&self.log_level),
            connector,
            connection: None,
            line: String::new(),
        })
    }
}
