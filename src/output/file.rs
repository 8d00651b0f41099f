use std::path::PathBuf;

use crate::output::rollover::append_with_rollover;
use crate::output::{log_at, OutputWriter, Settings, Verbosity, WriterError};
use crate::{ConfigError, QueryResult};

const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;
const DEFAULT_MAX_BACKUP_INDEX: u32 = 5;

/// Appends `<name> <value> <epochSeconds>` lines to a file, rolling it over by size.
///
/// Lines are buffered for the duration of a cycle and appended in one go by `post_collect`.
#[derive(Debug)]
pub struct FileWriter {
    path: PathBuf,
    max_file_size: u64,
    max_backup_index: u32,
    verbosity: Verbosity,
    buffer: String,
    destroyed: bool,
}

impl FileWriter {
    /// Builds a writer from its settings (`path`, `maxFileSize`, `maxBackupIndex`,
    /// `logLevel`).
    ///
    /// # Errors
    ///
    /// Errors if `path` is missing or a size setting does not parse.
    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        Ok(FileWriter {
            path: PathBuf::from(settings.required("path")?),
            max_file_size: settings.parse_or("maxFileSize", DEFAULT_MAX_FILE_SIZE)?,
            max_backup_index: settings.parse_or("maxBackupIndex", DEFAULT_MAX_BACKUP_INDEX)?,
            verbosity: Verbosity::from_level(settings.log_level()),
            buffer: String::new(),
            destroyed: false,
        })
    }
}

impl OutputWriter for FileWriter {
    fn name(&self) -> &str {
        "file"
    }

    fn pre_collect(&mut self) -> Result<(), WriterError> {
        self.buffer.clear();

        Ok(())
    }

    fn write_result(&mut self, result: &QueryResult) -> Result<(), WriterError> {
        if self.destroyed {
            return Ok(());
        }

        self.buffer
            .push_str(&format!("{} {} {}\n", result.name, result.value, result.epoch_seconds()));

        Ok(())
    }

    fn post_collect(&mut self) -> Result<(), WriterError> {
        if self.destroyed || self.buffer.is_empty() {
            return Ok(());
        }

        let content = std::mem::take(&mut self.buffer);
        append_with_rollover(&self.path, content.as_bytes(), self.max_file_size, self.max_backup_index)?;
        log_at!(self.verbosity.debug, path = %self.path.display(), bytes = content.len(), "Appended results");

        Ok(())
    }

    fn pre_destroy(&mut self) -> Result<(), WriterError> {
        if !std::mem::replace(&mut self.destroyed, true) {
            log_at!(self.verbosity.info, path = %self.path.display(), "File writer destroyed");
            self.buffer = String::new();
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use expect_test::expect;

    use super::*;
    use crate::output::rollover::backup_path;
    use crate::output::tests::result;
    use crate::ResultValue;

    fn writer(path: &std::path::Path, max_file_size: u64) -> FileWriter {
        FileWriter::from_settings(
            &Settings::new()
                .with("path", path.to_string_lossy())
                .with("maxFileSize", max_file_size.to_string())
                .with("maxBackupIndex", "1"),
        )
        .unwrap()
    }

    #[test]
    fn requires_path() {
        assert!(matches!(
            FileWriter::from_settings(&Settings::new()),
            Err(ConfigError::MissingField("path"))
        ));
    }

    #[test]
    fn appends_each_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.log");
        let mut writer = writer(&path, 1024);

        for value in [1, 2] {
            writer.pre_collect().unwrap();
            writer.write(&[result("jvm.threads", ResultValue::Integer(value))]).unwrap();
            writer.post_collect().unwrap();
        }

        expect![[r#"
            jvm.threads 1 0
            jvm.threads 2 0
        "#]]
        .assert_eq(&fs::read_to_string(&path).unwrap());
    }

    #[test]
    fn rolls_over_between_cycles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.log");
        let mut writer = writer(&path, 20);

        for value in [1, 2] {
            writer.pre_collect().unwrap();
            writer.write(&[result("jvm.threads", ResultValue::Integer(value))]).unwrap();
            writer.post_collect().unwrap();
        }

        assert_eq!(fs::read_to_string(&path).unwrap(), "jvm.threads 2 0\n");
        assert_eq!(fs::read_to_string(backup_path(&path, 1)).unwrap(), "jvm.threads 1 0\n");
    }

    #[test]
    fn destroy_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.log");
        let mut writer = writer(&path, 1024);

        writer.pre_destroy().unwrap();
        writer.pre_destroy().unwrap();
        writer.write(&[result("late", ResultValue::Integer(1))]).unwrap();
        writer.post_collect().unwrap();

        assert!(!path.exists());
    }
}
