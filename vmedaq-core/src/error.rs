use std::path::PathBuf;

use thiserror::Error;

/// Errors that can cross a stage boundary within a single thread.
///
/// Per the concurrency model, these never cross an actual OS thread
/// boundary: a data-plane thread that hits a fatal variant sets the run-level
/// flag ([`crate::controller::FatalFlag`]) instead of unwinding or returning
/// the error to a caller on another thread.
#[derive(Debug, Error)]
pub enum Error {
    /// The VME bus returned something other than success or "end of data".
    #[error("board {board}: bus I/O error (code {code})")]
    BusIo { board: u16, code: i32 },

    /// A channel reported by a board has no entry in `channels.<bid>`.
    ///
    /// Fatal: data from an unmapped channel cannot be attributed downstream.
    #[error("board {board} channel {channel}: not present in channel map")]
    UnmappedChannel { board: u16, channel: u16 },

    /// A board failed to initialize, or its serial number didn't match the
    /// configured id.
    ///
    /// Fatal: aborts the whole arm sequence.
    #[error("board {board}: init failed: {reason}")]
    BoardInit { board: u16, reason: String },

    /// A chunk file could not be created, written, or renamed into place.
    ///
    /// Non-fatal: the run continues, but the affected chunk is lost.
    #[error("chunk file {path}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration document failed to parse or was missing a required
    /// key with no sensible default.
    ///
    /// Fatal only at startup, before any board is armed.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(#[from] serde_json::Error),

    /// A chunk buffer failed to compress under the configured codec.
    ///
    /// Non-fatal: the run continues, but the affected chunk is lost.
    #[error("chunk compression failed: {0}")]
    Compression(String),
}

impl Error {
    /// Whether this error is fatal to the whole run, per the error-handling
    /// design (`UnmappedChannel`, `BoardInit`, and `ConfigLoad` abort; the
    /// rest are logged and the run continues).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::UnmappedChannel { .. } | Error::BoardInit { .. } | Error::ConfigLoad(_)
        )
    }
}

/// Convenience alias used throughout the core.
pub type Result<T> = std::result::Result<T, Error>;
