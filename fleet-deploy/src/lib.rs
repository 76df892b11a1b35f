//! # fleet-deploy
//!
//! Image publishing, deployment dispatch and the per-service pipeline.
//!
//! [`Orchestrator::handle_event`] routes one push event and runs
//! Sync → (swarm) Publish → Deploy; [`Orchestrator::initialize_all`] does the
//! same for every registered service.

pub mod bulk;
pub mod dispatch;
pub mod error;
pub mod image;
pub mod locks;
pub mod pipeline;
pub mod target;

pub use bulk::{BulkFailure, BulkReport};
pub use dispatch::{DeployResult, Dispatcher};
pub use error::{BuildError, DeployError, LockError, PipelineError};
pub use image::{ImagePublisher, ImageRef, PublishedImage};
pub use locks::{ServiceLocks, WorkingCopyLock};
pub use pipeline::{EventOutcome, LastOutcome, Orchestrator, PipelineReport, Snapshot};
pub use target::DeploymentTarget;
