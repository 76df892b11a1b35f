//! # fleet-sync
//!
//! Process plumbing and the git-backed repo sync engine.
//!
//! Call [`RepoSync::sync`] to bring a service's working copy to an exact tag
//! or branch tip. External tools run through a [`CommandRunner`]; tests swap
//! in [`testing::ScriptedRunner`].

pub mod engine;
pub mod error;
pub mod process;
pub mod testing;
pub mod version;

pub use engine::{RefTarget, RepoSync, SyncResult, WorkingCopyState};
pub use error::{ProcessError, SyncError};
pub use process::{CommandRunner, Invocation, ProcessOutput, SystemRunner};
