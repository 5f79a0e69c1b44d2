//! Leveled event sink the core emits to.
//!
//! The core never decides *where* log events end up — that's a collaborator
//! concern (spec §1 lists "structured logging" as out of scope, consumed
//! here only as a sink). `Log` is a thin, cheaply-cloned facade over
//! `tracing` so call sites read the same way regardless of what the
//! embedding binary does with the resulting spans/events.
use std::fmt;

/// Severity of a single log entry, matching the five priorities the
/// original control system used plus a debug-only `Local` tier.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Level {
    /// Debug-only chatter, never meant to leave the host.
    Local,
    /// Verbose operational detail (e.g. DAC clamps, register writes).
    Debug,
    /// Normal informational output (e.g. chunk gaps).
    Message,
    /// Bad but recoverable (e.g. late fragment dropped, file collision).
    Warning,
    /// Operational impact requiring attention (e.g. a chunk write failed).
    Error,
    /// The run is about to die.
    Fatal,
}

/// A named logger. Cloning is cheap; `target` is attached to every emitted
/// `tracing` event so downstream filtering can scope by component
/// (`"vmedaq::board"`, `"vmedaq::writer"`, ...).
#[derive(Clone, Debug)]
pub struct Log {
    target: &'static str,
}

impl Log {
    pub const fn new(target: &'static str) -> Self {
        Self { target }
    }

    /// Emit a single entry at `level`.
    pub fn entry(&self, level: Level, args: fmt::Arguments<'_>) {
        match level {
            Level::Local => tracing::trace!(target: "vmedaq", component = self.target, "{}", args),
            Level::Debug => tracing::debug!(target: "vmedaq", component = self.target, "{}", args),
            Level::Message => tracing::info!(target: "vmedaq", component = self.target, "{}", args),
            Level::Warning => tracing::warn!(target: "vmedaq", component = self.target, "{}", args),
            Level::Error => tracing::error!(target: "vmedaq", component = self.target, "{}", args),
            Level::Fatal => tracing::error!(target: "vmedaq", component = self.target, fatal = true, "{}", args),
        }
    }
}

/// Emit a [`Log`] entry with `format!`-style arguments.
///
/// ```ignore
/// log_entry!(log, Level::Warning, "board {} dropped a late fragment", bid);
/// ```
macro_rules! log_entry {
    ($log:expr, $level:expr, $($arg:tt)*) => {
        $log.entry($level, format_args!($($arg)*))
    };
}

pub(crate) use log_entry;
