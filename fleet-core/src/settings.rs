//! Runtime settings (`~/.fleet/fleet.yaml`).
//!
//! The file is optional; a missing file yields [`Settings::defaults_at`].
//! Relative paths are resolved against `~/.fleet/` at load time so the rest of
//! the system only ever sees absolute paths.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{io_err, ConfigError};
use crate::paths;
use crate::types::ServiceName;

/// Target runtime for redeploys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeployMode {
    /// Single host; `docker compose` builds from the working copy.
    #[default]
    Compose,
    /// Multi-node swarm; images go through a private registry.
    Swarm,
}

impl fmt::Display for DeployMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeployMode::Compose => write!(f, "compose"),
            DeployMode::Swarm => write!(f, "swarm"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ComposeSettings {
    /// Directory `docker compose` runs in.
    #[serde(default = "default_compose_dir")]
    pub project_dir: PathBuf,
    /// Optional `-f` compose file.
    #[serde(default)]
    pub file: Option<PathBuf>,
    /// Optional `-p` project name.
    #[serde(default)]
    pub project_name: Option<String>,
}

fn default_compose_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for ComposeSettings {
    fn default() -> Self {
        Self {
            project_dir: default_compose_dir(),
            file: None,
            project_name: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SwarmSettings {
    /// Private registry address, e.g. `registry.local:5000`.
    pub registry: String,
    /// Stack name; swarm services are named `<stack>_<service>`.
    pub stack: String,
    /// Stack descriptor used for full-stack deploys.
    pub stack_file: PathBuf,
}

impl SwarmSettings {
    pub fn swarm_service_name(&self, service: &ServiceName) -> String {
        format!("{}_{}", self.stack, service.0)
    }
}

/// Per-invocation process timeouts, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Timeouts {
    pub git: u64,
    pub build: u64,
    pub push: u64,
    pub deploy: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            git: 300,
            build: 1800,
            push: 600,
            deploy: 300,
        }
    }
}

impl Timeouts {
    pub fn git(&self) -> Duration {
        Duration::from_secs(self.git)
    }
    pub fn build(&self) -> Duration {
        Duration::from_secs(self.build)
    }
    pub fn push(&self) -> Duration {
        Duration::from_secs(self.push)
    }
    pub fn deploy(&self) -> Duration {
        Duration::from_secs(self.deploy)
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSettings {
    #[serde(default)]
    mode: DeployMode,
    #[serde(default)]
    workdir: Option<PathBuf>,
    #[serde(default)]
    compose: ComposeSettings,
    #[serde(default)]
    swarm: Option<SwarmSettings>,
    #[serde(default)]
    timeouts: Timeouts,
}

/// Resolved runtime settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Settings {
    pub mode: DeployMode,
    /// Parent directory of every working copy.
    pub workdir: PathBuf,
    pub compose: ComposeSettings,
    pub swarm: Option<SwarmSettings>,
    pub timeouts: Timeouts,
}

impl Settings {
    /// Defaults rooted at `<home>/.fleet/`.
    pub fn defaults_at(home: &Path) -> Self {
        Self {
            mode: DeployMode::Compose,
            workdir: paths::default_workdir(home),
            compose: ComposeSettings {
                project_dir: paths::fleet_root(home),
                file: None,
                project_name: None,
            },
            swarm: None,
            timeouts: Timeouts::default(),
        }
    }

    /// Parse settings YAML; relative paths resolve against `base`.
    pub fn from_yaml(contents: &str, origin: &Path, base: &Path) -> Result<Self, ConfigError> {
        let raw: RawSettings = if contents.trim().is_empty() {
            serde_yaml::from_str::<RawSettings>("{}")
        } else {
            serde_yaml::from_str::<RawSettings>(contents)
        }
        .map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;

        let swarm = raw.swarm.map(|s| SwarmSettings {
            stack_file: base.join(s.stack_file),
            ..s
        });
        let settings = Settings {
            mode: raw.mode,
            workdir: base.join(raw.workdir.unwrap_or_else(|| PathBuf::from("repos"))),
            compose: ComposeSettings {
                project_dir: base.join(&raw.compose.project_dir),
                file: raw.compose.file.map(|f| base.join(f)),
                project_name: raw.compose.project_name,
            },
            swarm,
            timeouts: raw.timeouts,
        };
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidSettings {
            reason: reason.to_string(),
        };
        if self.mode == DeployMode::Swarm {
            let Some(swarm) = &self.swarm else {
                return Err(invalid("mode swarm requires a swarm section"));
            };
            if swarm.registry.trim().is_empty() {
                return Err(invalid("swarm.registry must not be empty"));
            }
            if swarm.stack.trim().is_empty() {
                return Err(invalid("swarm.stack must not be empty"));
            }
        }
        let t = &self.timeouts;
        if [t.git, t.build, t.push, t.deploy].contains(&0) {
            return Err(invalid("timeouts must be at least one second"));
        }
        Ok(())
    }

    /// Working copy location for a service: `<workdir>/<service>`.
    pub fn working_copy(&self, service: &ServiceName) -> PathBuf {
        self.workdir.join(&service.0)
    }
}

/// Load `<home>/.fleet/fleet.yaml`, falling back to defaults when absent.
pub fn load_at(home: &Path) -> Result<Settings, ConfigError> {
    let path = paths::settings_path(home);
    if !path.exists() {
        return Ok(Settings::defaults_at(home));
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    Settings::from_yaml(&contents, &path, &paths::fleet_root(home))
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<Settings, ConfigError> {
    load_at(&paths::home()?)
}
