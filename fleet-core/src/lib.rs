//! fleet core library — domain types, service registry, settings, event routing.
//!
//! - [`types`] — newtypes and domain structs
//! - [`error`] — [`ConfigError`]
//! - [`registry`] — load / validate / look up services
//! - [`settings`] — runtime settings (deploy mode, workdir, timeouts)
//! - [`router`] — push event → [`router::Action`]

pub mod error;
pub mod paths;
pub mod registry;
pub mod router;
pub mod settings;
pub mod types;

pub use error::ConfigError;
pub use registry::Registry;
pub use router::{route, Action, NoOpReason};
pub use settings::{DeployMode, Settings};
pub use types::{RefPolicy, RepoFullName, ResolvedRef, ServiceEntry, ServiceName};
