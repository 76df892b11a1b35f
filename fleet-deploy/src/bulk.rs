//! Bulk initializer: bring every registered service up to date.
//!
//! Each entry resolves its ref through latest-tag discovery, whatever its
//! policy, because no event names a ref. Entries run one after another in
//! name order; a failure is recorded and the pass moves on.

use serde::Serialize;

use fleet_core::ServiceName;
use fleet_sync::RefTarget;

use crate::pipeline::{Orchestrator, PipelineReport};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkFailure {
    pub service: ServiceName,
    pub stage: &'static str,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkReport {
    pub completed: Vec<PipelineReport>,
    pub failed: Vec<BulkFailure>,
}

impl BulkReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn total(&self) -> usize {
        self.completed.len() + self.failed.len()
    }

    /// Services whose sync fell back to a branch because no tags exist.
    pub fn warnings(&self) -> impl Iterator<Item = (&ServiceName, &str)> {
        self.completed
            .iter()
            .filter_map(|r| r.sync.warning.as_deref().map(|w| (&r.service, w)))
    }
}

impl Orchestrator {
    /// Sync every service, and deploy each one too when `also_deploy` is set.
    pub async fn initialize_all(&self, also_deploy: bool) -> BulkReport {
        let snapshot = self.snapshot().await;
        let mut report = BulkReport::default();

        tracing::info!(
            services = snapshot.registry.len(),
            also_deploy,
            "bulk initialization started",
        );
        for entry in snapshot.registry.iter() {
            match self.run_service(entry, RefTarget::LatestTag, also_deploy).await {
                Ok(done) => report.completed.push(done),
                Err(err) => report.failed.push(BulkFailure {
                    service: entry.name.clone(),
                    stage: err.stage(),
                    error: err.to_string(),
                }),
            }
        }

        tracing::info!(
            completed = report.completed.len(),
            failed = report.failed.len(),
            "bulk initialization finished",
        );
        report
    }
}
