//! `fleet init` — bulk-sync every registered service.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use fleet_core::{registry, settings};
use fleet_deploy::{BulkReport, Orchestrator};
use fleet_sync::SystemRunner;

use super::event::{print_json, short_sha};
use super::{home_dir, runtime};

/// Arguments for `fleet init`.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Also build, publish and deploy each service after syncing it.
    #[arg(long)]
    pub deploy: bool,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct InitTableRow {
    #[tabled(rename = "service")]
    service: String,
    #[tabled(rename = "result")]
    result: String,
    #[tabled(rename = "ref")]
    reference: String,
    #[tabled(rename = "head")]
    head: String,
    #[tabled(rename = "detail")]
    detail: String,
}

impl InitArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let registry = registry::load_at(&home)
            .context("failed to load service registry; create ~/.fleet/services.yaml first")?;
        let settings = settings::load_at(&home).context("failed to load settings")?;

        if registry.is_empty() {
            println!("No services registered.");
            return Ok(());
        }

        let orchestrator = Orchestrator::new(registry, settings, Arc::new(SystemRunner));
        let report = runtime()?.block_on(orchestrator.initialize_all(self.deploy));

        if self.json {
            print_json(&serde_json::to_value(&report).context("failed to serialize report")?)?;
        } else {
            print_table(&report, self.deploy);
        }

        if !report.is_success() {
            bail!(
                "{} of {} services failed to initialize",
                report.failed.len(),
                report.total()
            );
        }
        Ok(())
    }
}

fn print_table(report: &BulkReport, deploy: bool) {
    let mut rows = Vec::with_capacity(report.total());
    for done in &report.completed {
        rows.push(InitTableRow {
            service: done.service.to_string(),
            result: (if deploy { "deployed" } else { "synced" }).green().to_string(),
            reference: done.reference.name().to_string(),
            head: short_sha(&done.sync.head).to_string(),
            detail: done.sync.warning.clone().unwrap_or_default(),
        });
    }
    for failed in &report.failed {
        rows.push(InitTableRow {
            service: failed.service.to_string(),
            result: format!("failed ({})", failed.stage).red().to_string(),
            reference: String::new(),
            head: String::new(),
            detail: failed.error.clone(),
        });
    }
    rows.sort_by(|a, b| a.service.cmp(&b.service));

    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
    println!(
        "{} completed, {} failed",
        report.completed.len(),
        report.failed.len()
    );
}
