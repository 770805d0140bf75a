//! Setup log stack.
//!
//! Library setup records what it tried and what happened into a
//! [`SetupLog`]. The stack is printed once after initialization (unless
//! suppressed via `BITSANDBYTES_NOWELCOME`) and in full on fatal failures.
//! With debug echo enabled (`BNB_DEBUG=1`) each entry is also written to
//! stderr as it is recorded.

use std::fmt::Write as _;
use std::io::{self, Write};
use std::time::Instant;

/// Log levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    /// Debug information
    Debug,
    /// Informational messages
    Info,
    /// Warnings
    Warn,
    /// Errors
    Error,
}

impl Level {
    /// Fixed-width label used in rendered lines.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
        }
    }

    fn color_code(&self) -> &'static str {
        match self {
            Level::Debug => "\x1b[36m", // Cyan
            Level::Info => "\x1b[32m",  // Green
            Level::Warn => "\x1b[33m",  // Yellow
            Level::Error => "\x1b[31m", // Red
        }
    }
}

/// A single recorded log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Severity.
    pub level: Level,
    /// Component that produced the entry (`setup`, `runtime`, `probe`).
    pub component: &'static str,
    /// Message text.
    pub message: String,
}

impl LogEntry {
    fn render(&self, color: bool) -> String {
        if color {
            format!(
                "{}[{:5}]\x1b[0m [{}] {}",
                self.level.color_code(),
                self.level.as_str(),
                self.component,
                self.message
            )
        } else {
            format!("[{:5}] [{}] {}", self.level.as_str(), self.component, self.message)
        }
    }
}

/// Ordered stack of setup diagnostics.
#[derive(Debug, Clone)]
pub struct SetupLog {
    entries: Vec<LogEntry>,
    echo: bool,
    start: Instant,
}

impl Default for SetupLog {
    fn default() -> Self {
        Self::new()
    }
}

impl SetupLog {
    /// Creates an empty log that does not echo.
    #[must_use]
    pub fn new() -> Self {
        Self { entries: Vec::new(), echo: false, start: Instant::now() }
    }

    /// Creates an empty log, echoing each entry to stderr when `echo` is set.
    #[must_use]
    pub fn with_echo(echo: bool) -> Self {
        Self { echo, ..Self::new() }
    }

    /// Records an entry.
    pub fn push(&mut self, level: Level, component: &'static str, message: impl Into<String>) {
        let entry = LogEntry { level, component, message: message.into() };
        if self.echo {
            let elapsed = self.start.elapsed().as_millis();
            let _ = writeln!(io::stderr(), "[+{:04}ms] {}", elapsed, entry.render(true));
        }
        self.entries.push(entry);
    }

    /// Records a debug entry.
    pub fn debug(&mut self, component: &'static str, message: impl Into<String>) {
        self.push(Level::Debug, component, message);
    }

    /// Records an info entry.
    pub fn info(&mut self, component: &'static str, message: impl Into<String>) {
        self.push(Level::Info, component, message);
    }

    /// Records a warning entry.
    pub fn warn(&mut self, component: &'static str, message: impl Into<String>) {
        self.push(Level::Warn, component, message);
    }

    /// Records an error entry.
    pub fn error(&mut self, component: &'static str, message: impl Into<String>) {
        self.push(Level::Error, component, message);
    }

    /// All entries in recording order.
    #[must_use]
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Number of recorded entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns true if any entry at `level` or above was recorded.
    #[must_use]
    pub fn has_level(&self, level: Level) -> bool {
        self.entries.iter().any(|e| e.level >= level)
    }

    /// Renders the stack as plain text, one entry per line.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            let _ = writeln!(out, "{}", entry.render(false));
        }
        out
    }

    /// Writes the stack to `writer` without color.
    ///
    /// # Errors
    ///
    /// Returns any error from the underlying writer.
    pub fn write_to(&self, writer: &mut dyn Write) -> io::Result<()> {
        writer.write_all(self.render().as_bytes())
    }

    /// Prints the stack to `out` with color. Write errors are ignored.
    pub fn print_to(&self, out: &mut dyn Write) {
        for entry in &self.entries {
            let _ = writeln!(out, "{}", entry.render(true));
        }
    }

    /// Prints the stack to stderr with color.
    pub fn print(&self) {
        self.print_to(&mut io::stderr().lock());
    }
}

/// Writes a single warning line to `out`.
pub fn emit_warning(out: &mut dyn Write, component: &'static str, message: &str) {
    let entry = LogEntry { level: Level::Warn, component, message: message.to_string() };
    let _ = writeln!(out, "{}", entry.render(true));
}
