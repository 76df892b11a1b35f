//! Error types for fleet-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise while loading the registry or runtime settings.
///
/// Any of these is fatal to event processing: nothing runs against a registry
/// that failed to load.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying I/O failure (permission denied, unreadable file, etc.).
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error on load; carries the file path and serde_yaml line context.
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `dirs::home_dir()` returned `None`, so `~/.fleet/` cannot be located.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    /// The registry source did not exist at the expected path.
    #[error("registry not found at {path}")]
    NotFound { path: PathBuf },

    /// A single entry is structurally invalid.
    #[error("service '{service}' is invalid: {reason}")]
    InvalidService { service: String, reason: String },

    /// Two `latest-tag` entries claim the same repository; a tag push would be ambiguous.
    #[error("repository '{repo}' is registered for latest-tag by both '{first}' and '{second}'")]
    DuplicateTagRepo {
        repo: String,
        first: String,
        second: String,
    },

    /// Two `tracked-branch` entries claim the same repository and branch.
    #[error("branch '{branch}' of '{repo}' is tracked by both '{first}' and '{second}'")]
    DuplicateBranch {
        repo: String,
        branch: String,
        first: String,
        second: String,
    },

    /// Runtime settings are inconsistent (e.g. swarm mode without a registry address).
    #[error("invalid settings: {reason}")]
    InvalidSettings { reason: String },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ConfigError {
    ConfigError::Io {
        path: path.into(),
        source,
    }
}
