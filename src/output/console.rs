use std::io::{self, Stdout, Write};

use crate::output::{OutputWriter, WriterError};
use crate::QueryResult;

/// Prints every result as one JSON object per line.
#[derive(Debug)]
pub struct ConsoleWriter<W = Stdout> {
    out: W,
    destroyed: bool,
}

impl ConsoleWriter<Stdout> {
    #[must_use]
    pub fn stdout() -> Self {
        ConsoleWriter::new(io::stdout())
    }
}

impl<W: Write + Send> ConsoleWriter<W> {
    pub const fn new(out: W) -> Self {
        ConsoleWriter { out, destroyed: false }
    }

    pub const fn get_ref(&self) -> &W {
        &self.out
    }
}

impl<W: Write + Send> OutputWriter for ConsoleWriter<W> {
    fn name(&self) -> &str {
        "console"
    }

    fn write_result(&mut self, result: &QueryResult) -> Result<(), WriterError> {
        if self.destroyed {
            return Ok(());
        }

        serde_json::to_writer(&mut self.out, result).map_err(io::Error::from)?;
        self.out.write_all(b"\n")?;

        Ok(())
    }

    fn post_collect(&mut self) -> Result<(), WriterError> {
        if self.destroyed {
            return Ok(());
        }

        self.out.flush().map_err(Into::into)
    }

    fn pre_destroy(&mut self) -> Result<(), WriterError> {
        if std::mem::replace(&mut self.destroyed, true) {
            return Ok(());
        }

        self.out.flush().map_err(Into::into)
    }
}
