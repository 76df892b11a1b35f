//! Error types for fleet-deploy.

use std::path::PathBuf;

use thiserror::Error;

use fleet_sync::{ProcessError, SyncError};

/// Image build or push failed. No partial publish is ever reported.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("docker build failed for '{service}': {detail}")]
    Build { service: String, detail: String },

    #[error("docker push of {image} failed: {detail}")]
    Push { image: String, detail: String },

    #[error(transparent)]
    Process(#[from] ProcessError),
}

/// Deployment against the container runtime failed.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("docker compose up failed for '{service}': {detail}")]
    Compose { service: String, detail: String },

    /// The existence probe failed for a reason other than "service absent".
    #[error("cannot determine whether swarm service '{swarm_service}' exists: {detail}")]
    Probe { swarm_service: String, detail: String },

    #[error("docker service update failed for '{swarm_service}': {detail}")]
    Update { swarm_service: String, detail: String },

    #[error("docker stack deploy failed for stack '{stack}': {detail}")]
    StackDeploy { stack: String, detail: String },

    /// Settings name a mode whose section is missing.
    #[error("deployment target unavailable: {reason}")]
    Unconfigured { reason: String },

    #[error(transparent)]
    Process(#[from] ProcessError),
}

/// The cross-process working-copy lock could not be taken.
#[derive(Debug, Error)]
#[error("cannot lock working copy via {path}: {detail}")]
pub struct LockError {
    pub path: PathBuf,
    pub detail: String,
}

/// Failure of one Sync → Build → Deploy pipeline invocation.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("working copy lock failed: {0}")]
    Lock(#[from] LockError),

    #[error("sync failed: {0}")]
    Sync(#[from] SyncError),

    #[error("image publish failed: {0}")]
    Build(#[from] BuildError),

    #[error("deploy failed: {0}")]
    Deploy(#[from] DeployError),
}

impl PipelineError {
    /// Pipeline stage that failed, for reports and logs.
    pub fn stage(&self) -> &'static str {
        match self {
            PipelineError::Lock(_) => "lock",
            PipelineError::Sync(_) => "sync",
            PipelineError::Build(_) => "build",
            PipelineError::Deploy(_) => "deploy",
        }
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            PipelineError::Sync(e) => e.is_timeout(),
            PipelineError::Build(BuildError::Process(ProcessError::Timeout { .. }))
            | PipelineError::Deploy(DeployError::Process(ProcessError::Timeout { .. })) => true,
            _ => false,
        }
    }
}
