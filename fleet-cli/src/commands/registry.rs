//! `fleet registry` — validate and show `~/.fleet/services.yaml`.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use fleet_core::{paths, registry, settings, RefPolicy, Registry, Settings};

use super::home_dir;

#[derive(Subcommand, Debug)]
pub enum RegistryCommand {
    /// Load registry and settings, reporting the first problem found.
    Check,
    /// Show every registered service.
    List(ListArgs),
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct ServiceJson {
    name: String,
    repository: String,
    clone_url: String,
    policy: String,
    tracked_branch: Option<String>,
    build_context: String,
    dockerfile_path: String,
    working_copy: String,
}

#[derive(Tabled)]
struct ServiceTableRow {
    #[tabled(rename = "service")]
    name: String,
    #[tabled(rename = "repository")]
    repository: String,
    #[tabled(rename = "policy")]
    policy: String,
    #[tabled(rename = "dockerfile")]
    dockerfile: String,
    #[tabled(rename = "working copy")]
    working_copy: String,
}

pub fn run(command: RegistryCommand) -> Result<()> {
    let home = home_dir()?;
    let registry = registry::load_at(&home).context("failed to load service registry")?;
    let settings = settings::load_at(&home).context("failed to load settings")?;

    match command {
        RegistryCommand::Check => {
            println!(
                "{} {} ({} services, {} mode)",
                "✓".green(),
                paths::registry_path(&home).display(),
                registry.len(),
                settings.mode
            );
        }
        RegistryCommand::List(args) if args.json => print_json(&registry, &settings)?,
        RegistryCommand::List(_) => print_table(&registry, &settings),
    }
    Ok(())
}

fn print_json(registry: &Registry, settings: &Settings) -> Result<()> {
    let services: Vec<ServiceJson> = registry
        .iter()
        .map(|entry| ServiceJson {
            name: entry.name.to_string(),
            repository: entry.repo_full_name.to_string(),
            clone_url: entry.clone_url.clone(),
            policy: match entry.ref_policy {
                RefPolicy::LatestTag => "latest-tag".to_string(),
                RefPolicy::TrackedBranch { .. } => "tracked-branch".to_string(),
            },
            tracked_branch: entry.ref_policy.tracked_branch().map(String::from),
            build_context: entry.build_context.display().to_string(),
            dockerfile_path: entry.dockerfile_path.display().to_string(),
            working_copy: settings.working_copy(&entry.name).display().to_string(),
        })
        .collect();
    println!(
        "{}",
        serde_json::to_string_pretty(&services).context("failed to serialize registry JSON")?
    );
    Ok(())
}

fn print_table(registry: &Registry, settings: &Settings) {
    if registry.is_empty() {
        println!("No services registered.");
        return;
    }

    let rows: Vec<ServiceTableRow> = registry
        .iter()
        .map(|entry| ServiceTableRow {
            name: entry.name.to_string(),
            repository: entry.repo_full_name.to_string(),
            policy: entry.ref_policy.to_string(),
            dockerfile: entry.dockerfile_path.display().to_string(),
            working_copy: settings.working_copy(&entry.name).display().to_string(),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}
