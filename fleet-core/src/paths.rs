//! Filesystem layout under `<home>/.fleet/`.
//!
//! ```text
//! ~/.fleet/
//!   services.yaml   (service registry)
//!   fleet.yaml      (runtime settings, optional)
//!   repos/<name>/   (one working copy per service)
//! ```

use std::path::{Path, PathBuf};

use crate::error::ConfigError;

pub const REGISTRY_FILE: &str = "services.yaml";
pub const SETTINGS_FILE: &str = "fleet.yaml";

pub fn fleet_root(home: &Path) -> PathBuf {
    home.join(".fleet")
}

pub fn registry_path(home: &Path) -> PathBuf {
    fleet_root(home).join(REGISTRY_FILE)
}

pub fn settings_path(home: &Path) -> PathBuf {
    fleet_root(home).join(SETTINGS_FILE)
}

pub fn default_workdir(home: &Path) -> PathBuf {
    fleet_root(home).join("repos")
}

/// Current user's home, for the convenience wrappers that take no `home`.
pub fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}
