//! Deployment target, derived per dispatch from settings and the synced ref.

use std::path::PathBuf;

use serde::Serialize;

use fleet_core::{DeployMode, ResolvedRef, ServiceEntry, Settings};

use crate::error::DeployError;
use crate::image::sanitize_tag;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum DeploymentTarget {
    Compose {
        project_dir: PathBuf,
        file: Option<PathBuf>,
        project_name: Option<String>,
    },
    Swarm {
        registry: String,
        /// Versioned tag published for this deploy; `latest` is always co-tagged.
        image_tag: String,
        stack_name: String,
        swarm_service_name: String,
        stack_file: PathBuf,
    },
}

impl DeploymentTarget {
    pub fn derive(
        settings: &Settings,
        entry: &ServiceEntry,
        reference: &ResolvedRef,
    ) -> Result<Self, DeployError> {
        match settings.mode {
            DeployMode::Compose => Ok(DeploymentTarget::Compose {
                project_dir: settings.compose.project_dir.clone(),
                file: settings.compose.file.clone(),
                project_name: settings.compose.project_name.clone(),
            }),
            DeployMode::Swarm => {
                let swarm = settings.swarm.as_ref().ok_or_else(|| DeployError::Unconfigured {
                    reason: "mode is swarm but no swarm section is configured".to_string(),
                })?;
                Ok(DeploymentTarget::Swarm {
                    registry: swarm.registry.clone(),
                    image_tag: sanitize_tag(reference.name()),
                    stack_name: swarm.stack.clone(),
                    swarm_service_name: swarm.swarm_service_name(&entry.name),
                    stack_file: swarm.stack_file.clone(),
                })
            }
        }
    }

    pub fn mode(&self) -> DeployMode {
        match self {
            DeploymentTarget::Compose { .. } => DeployMode::Compose,
            DeploymentTarget::Swarm { .. } => DeployMode::Swarm,
        }
    }

    /// Registry address when images must be published first.
    pub fn registry(&self) -> Option<&str> {
        match self {
            DeploymentTarget::Swarm { registry, .. } => Some(registry),
            DeploymentTarget::Compose { .. } => None,
        }
    }
}
