use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use quanta::Clock;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::{Config, Directory, InstallError, OutputWriter, Query, ResultNameStrategy, WriterError};

/// Outcome of one [`CollectionCycle::run_once`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CycleReport {
    pub results: usize,
    pub failed_queries: usize,
    pub failed_writers: usize,
}

/// Runs every query against the directory and hands the combined batch to every writer.
pub struct CollectionCycle {
    queries: Vec<Query>,
    writers: Vec<Box<dyn OutputWriter>>,
    directory: Arc<dyn Directory>,
    naming: Arc<dyn ResultNameStrategy>,
    clock: Clock,
    destroyed: bool,
}

impl CollectionCycle {
    #[must_use]
    pub fn new(config: Config) -> Self {
        CollectionCycle {
            queries: config.queries,
            writers: config.writers,
            directory: config.directory,
            naming: config.naming,
            clock: Clock::new(),
            destroyed: false,
        }
    }

    #[must_use]
    pub fn queries(&self) -> &[Query] {
        &self.queries
    }

    /// Runs a single cycle.
    ///
    /// A writer that fails `pre_collect` sits the cycle out; a query that cannot be resolved
    /// contributes nothing. Neither affects the others.
    pub fn run_once(&mut self) -> CycleReport {
        let start = self.clock.now();
        let mut report = CycleReport::default();

        let active: Vec<bool> = self
            .writers
            .iter_mut()
            .map(|writer| match writer.pre_collect() {
                Ok(()) => true,
                Err(err) => {
                    log_failure(writer.name(), "pre_collect", &err);

                    false
                }
            })
            .collect();

        let mut batch = Vec::new();
        for query in &self.queries {
            match query.collect(&*self.directory, &*self.naming) {
                Ok(results) => {
                    metrics::counter!("query_results_collected", "query" => query.id())
                        .increment(results.len() as u64);
                    batch.extend(results);
                }
                Err(err) => {
                    warn!(%err, query = %query.object_name(), "Query failed");
                    report.failed_queries = report.failed_queries.saturating_add(1);
                }
            }
        }
        report.results = batch.len();

        for (writer, active) in self.writers.iter_mut().zip(active) {
            if !active {
                report.failed_writers = report.failed_writers.saturating_add(1);
                continue;
            }

            let written = writer
                .write(&batch)
                .inspect_err(|err| log_failure(writer.name(), "write", err));
            let flushed = writer
                .post_collect()
                .inspect_err(|err| log_failure(writer.name(), "post_collect", err));
            if written.is_err() || flushed.is_err() {
                report.failed_writers = report.failed_writers.saturating_add(1);
            }
        }

        let elapsed = self.clock.now().saturating_duration_since(start);
        metrics::counter!("collection_cycles").increment(1);
        metrics::histogram!("collection_cycle_seconds").record(elapsed.as_secs_f64());
        debug!(report.results, report.failed_queries, report.failed_writers, ?elapsed, "Cycle complete");

        report
    }

    /// Destroys every writer; later calls are no-ops.
    pub fn shutdown(&mut self) {
        if std::mem::replace(&mut self.destroyed, true) {
            return;
        }

        for writer in &mut self.writers {
            if let Err(err) = writer.pre_destroy() {
                log_failure(writer.name(), "pre_destroy", &err);
            }
        }
    }

    pub(crate) fn spawn(cxl: CancellationToken, config: Config) -> Result<JoinHandle<()>, InstallError> {
        if config.interval.is_zero() {
            return Err(InstallError::ZeroInterval);
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        std::thread::Builder::new()
            .name("MetricsCollector".to_string())
            .spawn(move || {
                let collector = {
                    let _guard = runtime.enter();
                    Collector::setup(cxl, config)
                };
                runtime.block_on(collector.run());
            })
            .map_err(Into::into)
    }
}

fn log_failure(writer: &str, stage: &'static str, err: &WriterError) {
    match err {
        WriterError::Lifecycle { .. } => error!(writer, stage, %err, "Writer lifecycle failure"),
        WriterError::Io(_) => warn!(writer, stage, %err, "Writer I/O failure"),
        WriterError::Config(_) => error!(writer, stage, %err, "Writer misconfigured"),
    }
}

struct Collector {
    cxl: CancellationToken,
    interval_duration: Duration,

    cycle: CollectionCycle,
    interval: tokio::time::Interval,
    consecutive_overruns: u64,
}

impl Collector {
    fn setup(cxl: CancellationToken, config: Config) -> Self {
        let interval_duration = config.interval;
        let mut interval = tokio::time::interval(interval_duration);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Collector {
            cxl,
            interval_duration,

            cycle: CollectionCycle::new(config),
            interval,
            consecutive_overruns: 0,
        }
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;

                () = self.cxl.cancelled() => break,
                now = self.interval.tick() => self.tick(now),
            }
        }

        self.cycle.shutdown();
    }

    fn tick(&mut self, cycle_start: tokio::time::Instant) {
        self.cycle.run_once();

        // Collection is synchronous; an overrun delays the next tick.
        if cycle_start.elapsed() > self.interval_duration {
            self.consecutive_overruns = self.consecutive_overruns.saturating_add(1);
            warn!(self.consecutive_overruns, "Collection cycle slower than interval");

            return;
        }

        self.consecutive_overruns = 0;
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::Mutex;

    use super::*;
    use crate::{
        AttributeValue, DefaultNameStrategy, DirectoryError, ObjectName, QueryResult,
        StaticDirectory,
    };

    #[derive(Debug, Default)]
    struct Log {
        events: Vec<String>,
        written: Vec<String>,
    }

    #[derive(Clone, Copy)]
    enum Fault {
        Healthy,
        PreCollect,
        Write,
        PreDestroy,
    }

    struct RecordingWriter {
        name: &'static str,
        fault: Fault,
        log: Arc<Mutex<Log>>,
    }

    impl RecordingWriter {
        fn boxed(name: &'static str, fault: Fault) -> (Box<dyn OutputWriter>, Arc<Mutex<Log>>) {
            let log = Arc::new(Mutex::new(Log::default()));

            (Box::new(RecordingWriter { name, fault, log: Arc::clone(&log) }), log)
        }

        fn event(&self, event: &str) {
            self.log.lock().unwrap().events.push(event.to_string());
        }
    }

    impl OutputWriter for RecordingWriter {
        fn name(&self) -> &str {
            self.name
        }

        fn pre_collect(&mut self) -> Result<(), WriterError> {
            self.event("pre_collect");
            match self.fault {
                Fault::PreCollect => Err(WriterError::Lifecycle {
                    action: "opening socket",
                    source: io::Error::from(io::ErrorKind::ConnectionRefused),
                }),
                _ => Ok(()),
            }
        }

        fn write_result(&mut self, result: &QueryResult) -> Result<(), WriterError> {
            if let Fault::Write = self.fault {
                return Err(io::Error::from(io::ErrorKind::BrokenPipe).into());
            }
            self.log.lock().unwrap().written.push(result.name.clone());

            Ok(())
        }

        fn post_collect(&mut self) -> Result<(), WriterError> {
            self.event("post_collect");

            Ok(())
        }

        fn pre_destroy(&mut self) -> Result<(), WriterError> {
            self.event("pre_destroy");
            match self.fault {
                Fault::PreDestroy => Err(WriterError::Lifecycle {
                    action: "closing socket",
                    source: io::Error::from(io::ErrorKind::Other),
                }),
                _ => Ok(()),
            }
        }
    }

    /// Refuses to resolve anything in the `broken` domain.
    struct PartlyBrokenDirectory(StaticDirectory);

    impl Directory for PartlyBrokenDirectory {
        fn resolve(&self, pattern: &ObjectName) -> Result<Vec<ObjectName>, DirectoryError> {
            match pattern.domain() {
                "broken" => Err(DirectoryError::Unavailable("connection reset".to_string())),
                _ => self.0.resolve(pattern),
            }
        }

        fn get_attributes(
            &self,
            name: &ObjectName,
            names: &[String],
        ) -> Result<Vec<(String, AttributeValue)>, DirectoryError> {
            self.0.get_attributes(name, names)
        }
    }

    fn directory() -> Arc<dyn Directory> {
        let mut directory = StaticDirectory::new();
        directory.insert(
            ObjectName::parse("java.lang:type=Threading").unwrap(),
            [("ThreadCount", AttributeValue::Integer(12))],
        );
        directory.insert(
            ObjectName::parse("java.lang:type=Memory").unwrap(),
            [("ObjectPendingFinalizationCount", AttributeValue::Integer(0))],
        );

        Arc::new(PartlyBrokenDirectory(directory))
    }

    fn query(object_name: &str, attribute: &str) -> Query {
        Query::builder()
            .parse_object_name(object_name)
            .unwrap()
            .attribute_name(attribute)
            .build()
            .unwrap()
    }

    fn config(writers: Vec<Box<dyn OutputWriter>>, interval: Duration) -> Config {
        Config {
            interval,
            queries: vec![
                query("java.lang:type=Threading", "ThreadCount"),
                query("broken:type=Anything", "Whatever"),
                query("java.lang:type=Memory", "ObjectPendingFinalizationCount"),
            ],
            writers,
            directory: directory(),
            naming: Arc::new(DefaultNameStrategy),
        }
    }

    #[test]
    fn query_failure_is_isolated() {
        let (writer, log) = RecordingWriter::boxed("recording", Fault::Healthy);
        let mut cycle = CollectionCycle::new(config(vec![writer], Duration::from_secs(1)));

        let report = cycle.run_once();

        assert_eq!(report, CycleReport { results: 2, failed_queries: 1, failed_writers: 0 });
        assert_eq!(
            log.lock().unwrap().written,
            [
                "java.lang.type__Threading.ThreadCount",
                "java.lang.type__Memory.ObjectPendingFinalizationCount"
            ]
        );
        assert_eq!(cycle.queries()[0].status().collection_count, 1);
        assert_eq!(cycle.queries()[1].status().collection_count, 0);
    }

    #[test]
    fn writer_failing_pre_collect_sits_out() {
        let (broken, broken_log) = RecordingWriter::boxed("broken", Fault::PreCollect);
        let (healthy, healthy_log) = RecordingWriter::boxed("healthy", Fault::Healthy);
        let mut cycle = CollectionCycle::new(config(vec![broken, healthy], Duration::from_secs(1)));

        let report = cycle.run_once();

        assert_eq!(report.failed_writers, 1);
        let broken_log = broken_log.lock().unwrap();
        assert_eq!(broken_log.events, ["pre_collect"]);
        assert!(broken_log.written.is_empty());
        let healthy_log = healthy_log.lock().unwrap();
        assert_eq!(healthy_log.events, ["pre_collect", "post_collect"]);
        assert_eq!(healthy_log.written.len(), 2);
    }

    #[test]
    fn writer_failing_write_still_post_collects() {
        let (broken, broken_log) = RecordingWriter::boxed("broken", Fault::Write);
        let (healthy, healthy_log) = RecordingWriter::boxed("healthy", Fault::Healthy);
        let mut cycle = CollectionCycle::new(config(vec![broken, healthy], Duration::from_secs(1)));

        let report = cycle.run_once();

        assert_eq!(report.failed_writers, 1);
        assert_eq!(broken_log.lock().unwrap().events, ["pre_collect", "post_collect"]);
        assert_eq!(healthy_log.lock().unwrap().written.len(), 2);
    }

    #[test]
    fn shutdown_destroys_each_writer_once() {
        let (first, first_log) = RecordingWriter::boxed("first", Fault::PreDestroy);
        let (second, second_log) = RecordingWriter::boxed("second", Fault::Healthy);
        let mut cycle = CollectionCycle::new(config(vec![first, second], Duration::from_secs(1)));

        cycle.shutdown();
        cycle.shutdown();

        assert_eq!(first_log.lock().unwrap().events, ["pre_destroy"]);
        assert_eq!(second_log.lock().unwrap().events, ["pre_destroy"]);
    }

    #[test]
    fn install_runs_until_cancelled() {
        let (writer, log) = RecordingWriter::boxed("recording", Fault::Healthy);
        let cxl = CancellationToken::new();

        let handle = crate::install(cxl.clone(), config(vec![writer], Duration::from_millis(5))).unwrap();
        assert_eq!(handle.thread().name(), Some("MetricsCollector"));
        for _ in 0..1_000 {
            if log.lock().unwrap().written.len() >= 4 {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        cxl.cancel();
        handle.join().unwrap();

        let log = log.lock().unwrap();
        assert!(log.written.len() >= 4);
        assert_eq!(log.events.last().map(String::as_str), Some("pre_destroy"));
        assert_eq!(log.events.iter().filter(|event| *event == "pre_destroy").count(), 1);
    }

    #[test]
    fn install_rejects_zero_interval() {
        let config = config(Vec::new(), Duration::ZERO);

        assert!(matches!(
            crate::install(CancellationToken::new(), config),
            Err(InstallError::ZeroInterval)
        ));
    }
}
