//! `fleet event` — route one push event and run its pipeline here and now.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde_json::json;

use fleet_core::{registry, route, settings, Action};
use fleet_deploy::{DeployResult, DeploymentTarget, EventOutcome, Orchestrator, PipelineReport};
use fleet_sync::SystemRunner;

use super::{home_dir, runtime};

/// Arguments for `fleet event`.
#[derive(Args, Debug)]
pub struct EventArgs {
    /// Repository full name, `owner/repo`.
    pub repository: String,

    /// Pushed git ref, e.g. `refs/tags/v1.4.0` or `refs/heads/main`.
    #[arg(value_name = "REF")]
    pub git_ref: String,

    /// Resolve the event and print the action without running anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl EventArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let registry = registry::load_at(&home).context("failed to load service registry")?;
        let settings = settings::load_at(&home).context("failed to load settings")?;

        if self.dry_run {
            return self.print_plan(route(&registry, &self.repository, &self.git_ref), &settings);
        }

        let orchestrator = Orchestrator::new(registry, settings, Arc::new(SystemRunner));
        let outcome = runtime()?
            .block_on(orchestrator.handle_event(&self.repository, &self.git_ref))
            .with_context(|| format!("pipeline failed for {} {}", self.repository, self.git_ref))?;

        match outcome {
            EventOutcome::Ignored(reason) => {
                if self.json {
                    print_json(&json!({ "action": "noop", "reason": reason.to_string() }))?;
                } else {
                    println!("{} {reason}", "no-op:".yellow());
                }
            }
            EventOutcome::Completed(report) => {
                if self.json {
                    print_json(&json!({ "action": "completed", "report": report }))?;
                } else {
                    print_report(&report);
                }
            }
        }
        Ok(())
    }

    fn print_plan(&self, action: Action, settings: &fleet_core::Settings) -> Result<()> {
        let (entry, target) = match action {
            Action::NoOp(reason) => {
                if self.json {
                    return print_json(&json!({ "action": "noop", "reason": reason.to_string() }));
                }
                println!("[dry-run] {} {reason}", "no-op:".yellow());
                return Ok(());
            }
            Action::Run { entry, target } => (entry, target),
        };

        let deployment = DeploymentTarget::derive(settings, &entry, &target)
            .context("cannot derive deployment target")?;
        if self.json {
            return print_json(&json!({
                "action": "run",
                "service": entry.name,
                "reference": target,
                "working_copy": settings.working_copy(&entry.name),
                "deployment": deployment,
            }));
        }

        println!(
            "[dry-run] would sync '{}' to {} in {}",
            entry.name,
            target,
            settings.working_copy(&entry.name).display()
        );
        match &deployment {
            DeploymentTarget::Compose { project_dir, .. } => {
                println!(
                    "[dry-run] then refresh compose service '{}' in {}",
                    entry.name,
                    project_dir.display()
                );
            }
            DeploymentTarget::Swarm {
                registry,
                image_tag,
                swarm_service_name,
                ..
            } => {
                println!(
                    "[dry-run] then publish {registry}/{}:{image_tag} (+latest) and deploy '{swarm_service_name}'",
                    entry.name
                );
            }
        }
        Ok(())
    }
}

pub(crate) fn print_report(report: &PipelineReport) {
    println!(
        "{} '{}' at {} ({})",
        "✓".green(),
        report.service,
        report.reference,
        short_sha(&report.sync.head)
    );
    if let Some(warning) = &report.sync.warning {
        println!("  {} {warning}", "warning:".yellow());
    }
    if let Some(image) = &report.image {
        println!("  published {} and {}", image.versioned, image.latest);
    }
    match &report.deploy {
        Some(DeployResult::ComposeRefreshed { service }) => {
            println!("  refreshed compose service '{service}'")
        }
        Some(DeployResult::SwarmUpdated { swarm_service, image }) => {
            println!("  updated swarm service '{swarm_service}' to {image}")
        }
        Some(DeployResult::StackDeployed { stack }) => println!("  deployed stack '{stack}'"),
        None => println!("  sync only"),
    }
}

pub(crate) fn short_sha(sha: &str) -> &str {
    sha.get(..12).unwrap_or(sha)
}

pub(crate) fn print_json(value: &serde_json::Value) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to render JSON")?
    );
    Ok(())
}
