// crates/logging/src/sink.rs
use std::fs::File;
use std::io::{self, Write};
use tracing::{Level, Metadata};
use tracing_subscriber::fmt::writer::MakeWriter;

use crate::flags::StderrMode;

/// Console writer that routes each event to stdout or stderr.
#[derive(Clone, Copy, Debug)]
pub(crate) struct LogWriter {
    pub(crate) mode: StderrMode,
}

pub(crate) enum ConsoleWriter {
    Stdout(io::Stdout),
    Stderr(io::Stderr),
}

impl Write for ConsoleWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            ConsoleWriter::Stdout(out) => out.write(buf),
            ConsoleWriter::Stderr(err) => err.write(buf),
        }
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        match self {
            ConsoleWriter::Stdout(out) => out.lock().write_all(buf),
            ConsoleWriter::Stderr(err) => err.lock().write_all(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            ConsoleWriter::Stdout(out) => out.flush(),
            ConsoleWriter::Stderr(err) => err.flush(),
        }
    }
}

impl LogWriter {
    fn to_stderr(&self, level: &Level) -> bool {
        match self.mode {
            StderrMode::All => true,
            StderrMode::Errors => *level <= Level::WARN,
        }
    }
}

impl<'a> MakeWriter<'a> for LogWriter {
    type Writer = ConsoleWriter;

    fn make_writer(&'a self) -> Self::Writer {
        ConsoleWriter::Stderr(io::stderr())
    }

    fn make_writer_for(&'a self, meta: &Metadata<'_>) -> Self::Writer {
        if self.to_stderr(meta.level()) {
            ConsoleWriter::Stderr(io::stderr())
        } else {
            ConsoleWriter::Stdout(io::stdout())
        }
    }
}

/// Appends events to an already opened log file.
#[derive(Debug)]
pub(crate) struct FileWriter {
    pub(crate) file: File,
}

impl<'a> MakeWriter<'a> for FileWriter {
    type Writer = &'a File;

    fn make_writer(&'a self) -> Self::Writer {
        &self.file
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_mode_splits_by_level() {
        let writer = LogWriter {
            mode: StderrMode::Errors,
        };
        assert!(writer.to_stderr(&Level::ERROR));
        assert!(writer.to_stderr(&Level::WARN));
        assert!(!writer.to_stderr(&Level::INFO));
        assert!(!writer.to_stderr(&Level::TRACE));
    }

    #[test]
    fn all_mode_uses_stderr() {
        let writer = LogWriter {
            mode: StderrMode::All,
        };
        assert!(writer.to_stderr(&Level::DEBUG));
    }
}
