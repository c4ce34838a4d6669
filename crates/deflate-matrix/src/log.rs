//! Running log.
//!
//! One timestamped line is written before each unit of work, so after a
//! failure the last line names the configuration that broke.

use std::cell::{Cell, RefCell};
use std::io::{self, Write};
use std::rc::Rc;

use colored::Colorize;

use crate::error::MatrixError;

/// Indented, timestamped progress log.
pub struct Logger {
    indent: Cell<usize>,
    sink: RefCell<Box<dyn Write>>,
    colored: bool,
}

impl Logger {
    /// Logs to stdout.
    pub fn stdout() -> Self {
        Self {
            indent: Cell::new(0),
            sink: RefCell::new(Box::new(io::stdout())),
            colored: true,
        }
    }

    /// Logs into a shared in-memory buffer, uncolored.
    pub fn memory() -> (Self, LogBuffer) {
        let buffer = LogBuffer::default();
        let logger = Self {
            indent: Cell::new(0),
            sink: RefCell::new(Box::new(buffer.clone())),
            colored: false,
        };
        (logger, buffer)
    }

    /// Writes one log line at the current indentation.
    pub fn log(&self, message: impl AsRef<str>) {
        let stamp = chrono::Local::now().format("%a %b %e %H:%M:%S %Y").to_string();
        let stamp = if self.colored {
            format!("[{}]", stamp).dimmed().to_string()
        } else {
            format!("[{}]", stamp)
        };
        let pad = " ".repeat(self.indent.get() * 4);
        let mut sink = self.sink.borrow_mut();
        let _ = writeln!(sink, "{} {}{}", stamp, pad, message.as_ref());
        let _ = sink.flush();
    }

    /// Logs `message` and indents everything until the matching [`end`](Self::end).
    pub fn begin(&self, message: impl AsRef<str>) {
        self.log(message);
        self.indent.set(self.indent.get() + 1);
    }

    /// Closes a group opened by [`begin`](Self::begin).
    pub fn end(&self) {
        self.indent.set(self.indent.get().saturating_sub(1));
    }

    /// Writes the final success line.
    pub fn success(&self) {
        let line = if self.colored {
            "All tests passed!".green().bold().to_string()
        } else {
            "All tests passed!".to_string()
        };
        let mut sink = self.sink.borrow_mut();
        let _ = writeln!(sink, "{}", line);
        let _ = sink.flush();
    }
}

/// Prints a fatal error to stderr.
pub fn report_error(err: &MatrixError) {
    if let MatrixError::Usage { usage } = err {
        eprintln!("{}", usage);
        return;
    }
    eprintln!("{}[{}]: {}", "error".red().bold(), err.code(), err);
}

/// In-memory log sink shared between a [`Logger`] and a test.
#[derive(Clone, Default)]
pub struct LogBuffer(Rc<RefCell<Vec<u8>>>);

impl LogBuffer {
    /// All log lines with the timestamp prefix removed.
    pub fn lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.0.borrow())
            .lines()
            .map(|line| match line.find("] ") {
                Some(idx) if line.starts_with('[') => line[idx + 2..].to_string(),
                _ => line.to_string(),
            })
            .collect()
    }
}

impl Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
