//! Deployment dispatcher.
//!
//! Compose: one scoped `up -d --build --no-deps <service>`; the compose engine
//! builds straight from the working copy.
//!
//! Swarm: existence of the running service decides the path.
//!
//! | probe result | action                                     |
//! |--------------|--------------------------------------------|
//! | exists       | `docker service update --image …:latest`   |
//! | absent       | `docker stack deploy -c <stack_file>`      |
//! | other error  | [`DeployError::Probe`]                     |

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use fleet_core::{ServiceEntry, ServiceName, Settings};
use fleet_sync::{CommandRunner, Invocation, ProcessOutput};

use crate::error::DeployError;
use crate::image::{image_repository, ImageRef};
use crate::target::DeploymentTarget;

/// What the dispatcher did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum DeployResult {
    ComposeRefreshed { service: ServiceName },
    SwarmUpdated { swarm_service: String, image: String },
    StackDeployed { stack: String },
}

/// Output fragments that mean "no such service" from `docker service inspect`.
const ABSENT_MARKERS: &[&str] = &["no such service", "not found"];

#[derive(Clone)]
pub struct Dispatcher {
    runner: Arc<dyn CommandRunner>,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(runner: Arc<dyn CommandRunner>, timeout: Duration) -> Self {
        Self { runner, timeout }
    }

    pub fn from_settings(runner: Arc<dyn CommandRunner>, settings: &Settings) -> Self {
        Self::new(runner, settings.timeouts.deploy())
    }

    pub async fn deploy(
        &self,
        entry: &ServiceEntry,
        target: &DeploymentTarget,
    ) -> Result<DeployResult, DeployError> {
        match target {
            DeploymentTarget::Compose {
                project_dir,
                file,
                project_name,
            } => {
                self.compose_up(entry, project_dir, file.as_deref(), project_name.as_deref())
                    .await
            }
            DeploymentTarget::Swarm {
                registry,
                stack_name,
                swarm_service_name,
                stack_file,
                ..
            } => {
                if self.service_exists(swarm_service_name).await? {
                    let image = ImageRef::latest(image_repository(registry, &entry.name));
                    self.update_service(swarm_service_name, &image).await
                } else {
                    self.deploy_stack(stack_name, stack_file).await
                }
            }
        }
    }

    async fn compose_up(
        &self,
        entry: &ServiceEntry,
        project_dir: &Path,
        file: Option<&Path>,
        project_name: Option<&str>,
    ) -> Result<DeployResult, DeployError> {
        let mut inv = Invocation::new("docker").arg("compose");
        if let Some(file) = file {
            inv = inv.arg("-f").path_arg(file);
        }
        if let Some(name) = project_name {
            inv = inv.args(["-p", name]);
        }
        let inv = inv
            .args(["up", "-d", "--build", "--no-deps", entry.name.as_str()])
            .current_dir(project_dir)
            .timeout(self.timeout);

        tracing::info!(service = %entry.name, "refreshing compose service");
        let out = self.runner.run(&inv).await?;
        if !out.success() {
            return Err(DeployError::Compose {
                service: entry.name.0.clone(),
                detail: out.diagnostic(),
            });
        }
        Ok(DeployResult::ComposeRefreshed {
            service: entry.name.clone(),
        })
    }

    /// `docker service inspect`; exit 0 means the service is running.
    pub async fn service_exists(&self, swarm_service: &str) -> Result<bool, DeployError> {
        let inv = Invocation::new("docker")
            .args(["service", "inspect", swarm_service])
            .timeout(self.timeout);
        let out = self.runner.run(&inv).await?;
        if out.success() {
            return Ok(true);
        }
        if reports_absent(&out) {
            tracing::debug!(swarm_service, "swarm service absent");
            return Ok(false);
        }
        Err(DeployError::Probe {
            swarm_service: swarm_service.to_string(),
            detail: out.diagnostic(),
        })
    }

    async fn update_service(
        &self,
        swarm_service: &str,
        image: &ImageRef,
    ) -> Result<DeployResult, DeployError> {
        let image = image.to_string();
        let inv = Invocation::new("docker")
            .args(["service", "update", "--with-registry-auth", "--image"])
            .args([image.as_str(), swarm_service])
            .timeout(self.timeout);

        tracing::info!(swarm_service, image = %image, "updating swarm service");
        let out = self.runner.run(&inv).await?;
        if !out.success() {
            return Err(DeployError::Update {
                swarm_service: swarm_service.to_string(),
                detail: out.diagnostic(),
            });
        }
        Ok(DeployResult::SwarmUpdated {
            swarm_service: swarm_service.to_string(),
            image,
        })
    }

    async fn deploy_stack(
        &self,
        stack: &str,
        stack_file: &Path,
    ) -> Result<DeployResult, DeployError> {
        let inv = Invocation::new("docker")
            .args(["stack", "deploy", "--with-registry-auth", "-c"])
            .path_arg(stack_file)
            .arg(stack)
            .timeout(self.timeout);

        tracing::info!(stack, stack_file = %stack_file.display(), "deploying full stack");
        let out = self.runner.run(&inv).await?;
        if !out.success() {
            return Err(DeployError::StackDeploy {
                stack: stack.to_string(),
                detail: out.diagnostic(),
            });
        }
        Ok(DeployResult::StackDeployed {
            stack: stack.to_string(),
        })
    }
}

fn reports_absent(out: &ProcessOutput) -> bool {
    let text = format!("{}\n{}", out.stderr, out.stdout).to_lowercase();
    ABSENT_MARKERS.iter().any(|marker| text.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::{RefPolicy, RepoFullName};
    use fleet_sync::testing::ScriptedRunner;
    use std::path::PathBuf;

    fn blog() -> ServiceEntry {
        ServiceEntry {
            name: ServiceName::from("blog"),
            repo_full_name: RepoFullName::from("acme/blog"),
            clone_url: "u".into(),
            ref_policy: RefPolicy::LatestTag,
            build_context: PathBuf::from("."),
            dockerfile_path: PathBuf::from("Dockerfile"),
        }
    }

    fn swarm() -> DeploymentTarget {
        DeploymentTarget::Swarm {
            registry: "reg:5000".into(),
            image_tag: "v2.0.0".into(),
            stack_name: "apps".into(),
            swarm_service_name: "apps_blog".into(),
            stack_file: PathBuf::from("/srv/stack.yml"),
        }
    }

    fn dispatcher(runner: Arc<ScriptedRunner>) -> Dispatcher {
        Dispatcher::new(runner, Duration::from_secs(30))
    }

    #[tokio::test]
    async fn compose_scopes_to_one_service() {
        let runner = Arc::new(ScriptedRunner::new());
        let target = DeploymentTarget::Compose {
            project_dir: PathBuf::from("/srv/web"),
            file: Some(PathBuf::from("docker-compose.prod.yml")),
            project_name: Some("web".into()),
        };
        let result = dispatcher(runner.clone()).deploy(&blog(), &target).await.expect("deploy");

        assert!(matches!(result, DeployResult::ComposeRefreshed { .. }));
        assert_eq!(
            runner.command_lines(),
            vec!["docker compose -f docker-compose.prod.yml -p web up -d --build --no-deps blog"]
        );
        assert_eq!(runner.calls()[0].cwd.as_deref(), Some(Path::new("/srv/web")));
    }

    #[tokio::test]
    async fn existing_swarm_service_is_updated_in_place() {
        let runner = Arc::new(ScriptedRunner::new());
        let result = dispatcher(runner.clone()).deploy(&blog(), &swarm()).await.expect("deploy");

        assert_eq!(
            result,
            DeployResult::SwarmUpdated {
                swarm_service: "apps_blog".into(),
                image: "reg:5000/blog:latest".into(),
            }
        );
        assert_eq!(
            runner.count("docker service update --with-registry-auth --image reg:5000/blog:latest apps_blog"),
            1
        );
        assert_eq!(runner.count("docker stack deploy"), 0);
    }

    #[tokio::test]
    async fn absent_swarm_service_triggers_stack_deploy() {
        let runner = Arc::new(ScriptedRunner::new().on_fail(
            "docker",
            &["service", "inspect"],
            1,
            "Error: no such service: apps_blog",
        ));
        let result = dispatcher(runner.clone()).deploy(&blog(), &swarm()).await.expect("deploy");

        assert_eq!(result, DeployResult::StackDeployed { stack: "apps".into() });
        assert_eq!(
            runner.count("docker stack deploy --with-registry-auth -c /srv/stack.yml apps"),
            1
        );
        assert_eq!(runner.count("docker service update"), 0);
    }

    #[tokio::test]
    async fn unexplained_probe_failure_is_probe_error() {
        let runner = Arc::new(ScriptedRunner::new().on_fail(
            "docker",
            &["service", "inspect"],
            1,
            "Cannot connect to the Docker daemon",
        ));
        let err = dispatcher(runner.clone()).deploy(&blog(), &swarm()).await.unwrap_err();

        assert!(matches!(err, DeployError::Probe { .. }), "got: {err}");
        assert_eq!(runner.count("docker stack deploy"), 0);
        assert_eq!(runner.count("docker service update"), 0);
    }

    #[tokio::test]
    async fn compose_failure_carries_diagnostic() {
        let runner =
            Arc::new(ScriptedRunner::new().on_fail("docker", &["compose"], 1, "build failed"));
        let target = DeploymentTarget::Compose {
            project_dir: PathBuf::from("/srv/web"),
            file: None,
            project_name: None,
        };
        let err = dispatcher(runner).deploy(&blog(), &target).await.unwrap_err();
        assert!(err.to_string().contains("build failed"));
    }
}
