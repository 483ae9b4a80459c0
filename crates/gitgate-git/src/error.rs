//! Git bridge error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while bridging a request to git.
#[derive(Debug, Error)]
pub enum GitError {
    /// Invalid pkt-line format.
    #[error("invalid pkt-line: {0}")]
    InvalidPktLine(String),

    /// The requested service is not one we are willing to run.
    #[error("unknown service: {0}")]
    UnknownService(String),

    /// The directory does not carry the bare repository markers.
    #[error("not a git repository: {}", .0.display())]
    NotARepository(PathBuf),

    /// The executable could not be started at all.
    #[error("failed to launch `{command}`: {source}")]
    Launch {
        /// Rendered command line.
        command: String,
        /// Underlying spawn error.
        #[source]
        source: std::io::Error,
    },

    /// The process ran but did not succeed.
    #[error("`{command}` failed: {reason}")]
    Process {
        /// Rendered command line.
        command: String,
        /// Exit status or captured stderr.
        reason: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GitError {
    /// Returns true if the failure happened before the process existed.
    pub fn is_launch_failure(&self) -> bool {
        matches!(self, Self::Launch { .. })
    }
}
