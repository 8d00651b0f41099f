use crate::output::{OutputWriter, WriterError};
use crate::QueryResult;

/// Discards everything, counting what it was given.
#[derive(Debug, Default)]
pub struct NullWriter {
    written: u64,
}

impl NullWriter {
    #[must_use]
    pub const fn written(&self) -> u64 {
        self.written
    }
}

impl OutputWriter for NullWriter {
    fn name(&self) -> &str {
        "null"
    }

    fn write_result(&mut self, _: &QueryResult) -> Result<(), WriterError> {
        self.written = self.written.saturating_add(1);

        Ok(())
    }

    fn pre_destroy(&mut self) -> Result<(), WriterError> {
        Ok(())
    }
}
