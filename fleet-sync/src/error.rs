//! Error types for fleet-sync.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failures at the process-invocation boundary.
///
/// A non-zero exit is *not* a `ProcessError`; callers inspect
/// [`crate::process::ProcessOutput`] and map it into their own taxonomy.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The program could not be started at all (missing binary, bad cwd).
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The program ran past its deadline and was killed.
    #[error("`{command}` timed out after {}s", .after.as_secs())]
    Timeout { command: String, after: Duration },
}

/// All errors that can arise from a working-copy sync.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Clone or fetch failed: network, auth, or an unreachable remote.
    #[error("network error syncing '{service}': {detail}")]
    Network { service: String, detail: String },

    /// The requested tag or branch does not exist on the remote.
    #[error("{reference} not found for '{service}'")]
    RefNotFound { service: String, reference: String },

    /// Any other git step failed (checkout, reset, clean, rev-parse).
    #[error("git {step} failed for '{service}': {detail}")]
    Git {
        service: String,
        step: &'static str,
        detail: String,
    },

    /// The working-copy path holds files but no repository; never overwritten.
    #[error("working copy path {path} exists but is not a git repository")]
    WorkingCopyOccupied { path: PathBuf },

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Process(#[from] ProcessError),
}

impl SyncError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, SyncError::Process(ProcessError::Timeout { .. }))
    }
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
