//! Event → Sync → (swarm) Publish → Deploy.
//!
//! [`Orchestrator`] owns the loaded registry and settings, the per-service
//! locks and the command runner. Events and the bulk pass both funnel into
//! [`Orchestrator::run_service`], which holds the service's in-process and
//! on-disk locks for the whole sequence.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};

use fleet_core::{
    route, Action, NoOpReason, Registry, ResolvedRef, ServiceEntry, ServiceName, Settings,
};
use fleet_sync::{CommandRunner, RefTarget, RepoSync, SyncResult};

use crate::dispatch::{DeployResult, Dispatcher};
use crate::error::PipelineError;
use crate::image::{ImagePublisher, PublishedImage};
use crate::locks::{ServiceLocks, WorkingCopyLock};
use crate::target::DeploymentTarget;

/// Everything one successful pipeline run did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineReport {
    pub service: ServiceName,
    pub reference: ResolvedRef,
    pub sync: SyncResult,
    /// Present in swarm mode when deploying.
    pub image: Option<PublishedImage>,
    /// Absent when the run was sync-only.
    pub deploy: Option<DeployResult>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Result of handing one push event to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    /// Nothing subscribes to this event; a normal completion.
    Ignored(NoOpReason),
    Completed(PipelineReport),
}

/// Most recent pipeline result for one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LastOutcome {
    pub at: DateTime<Utc>,
    pub reference: Option<ResolvedRef>,
    pub head: Option<String>,
    pub ok: bool,
    /// Failing stage and error chain, when `ok` is false.
    pub error: Option<String>,
}

/// A failed run, with the sync result when the working copy was already moved.
struct PipelineFailure {
    sync: Option<SyncResult>,
    error: PipelineError,
}

impl PipelineFailure {
    fn before_sync(error: PipelineError) -> Self {
        Self { sync: None, error }
    }
}

/// Registry and settings in force. Swapped whole on reload.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub registry: Arc<Registry>,
    pub settings: Arc<Settings>,
}

pub struct Orchestrator {
    runner: Arc<dyn CommandRunner>,
    loaded: RwLock<Snapshot>,
    locks: ServiceLocks,
    outcomes: Mutex<HashMap<ServiceName, LastOutcome>>,
}

impl Orchestrator {
    pub fn new(registry: Registry, settings: Settings, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            loaded: RwLock::new(Snapshot {
                registry: Arc::new(registry),
                settings: Arc::new(settings),
            }),
            locks: ServiceLocks::new(),
            outcomes: Mutex::new(HashMap::new()),
        }
    }

    /// Current registry and settings.
    pub async fn snapshot(&self) -> Snapshot {
        self.loaded.read().await.clone()
    }

    /// Replace registry and settings. Pipelines already running keep the
    /// snapshot they started with.
    pub async fn reload(&self, registry: Registry, settings: Settings) {
        let mut loaded = self.loaded.write().await;
        tracing::info!(services = registry.len(), mode = %settings.mode, "configuration reloaded");
        *loaded = Snapshot {
            registry: Arc::new(registry),
            settings: Arc::new(settings),
        };
    }

    /// Route without running anything.
    pub async fn resolve(&self, repo_full_name: &str, raw_ref: &str) -> Action {
        let snapshot = self.snapshot().await;
        route(&snapshot.registry, repo_full_name, raw_ref)
    }

    /// Route a push event and, when a service subscribes, run its pipeline.
    pub async fn handle_event(
        &self,
        repo_full_name: &str,
        raw_ref: &str,
    ) -> Result<EventOutcome, PipelineError> {
        match self.resolve(repo_full_name, raw_ref).await {
            Action::NoOp(reason) => {
                tracing::info!(repository = repo_full_name, raw_ref, %reason, "event ignored");
                Ok(EventOutcome::Ignored(reason))
            }
            Action::Run { entry, target } => {
                tracing::info!(
                    repository = repo_full_name,
                    service = %entry.name,
                    reference = %target,
                    "event accepted",
                );
                self.run_service(&entry, RefTarget::Exact(target), true)
                    .await
                    .map(EventOutcome::Completed)
            }
        }
    }

    /// Sync `entry` to `target`, then publish and deploy when `deploy` is set.
    ///
    /// Serialized per service, across tasks by [`ServiceLocks`] and across
    /// processes by [`WorkingCopyLock`]; distinct services run concurrently.
    pub async fn run_service(
        &self,
        entry: &ServiceEntry,
        target: RefTarget,
        deploy: bool,
    ) -> Result<PipelineReport, PipelineError> {
        let _guard = self.locks.acquire(&entry.name).await;
        let snapshot = self.snapshot().await;
        let started_at = Utc::now();

        let result = match WorkingCopyLock::acquire(&snapshot.settings.workdir, &entry.name).await {
            Ok(_file_lock) => {
                self.pipeline(&snapshot.settings, entry, &target, deploy, started_at)
                    .await
            }
            Err(err) => Err(PipelineFailure::before_sync(err.into())),
        };
        self.record(entry, &result).await;
        result.map_err(|failure| {
            let err = failure.error;
            tracing::error!(
                service = %entry.name,
                stage = err.stage(),
                error = %err,
                "pipeline failed",
            );
            err
        })
    }

    async fn pipeline(
        &self,
        settings: &Settings,
        entry: &ServiceEntry,
        target: &RefTarget,
        deploy: bool,
        started_at: DateTime<Utc>,
    ) -> Result<PipelineReport, PipelineFailure> {
        let sync = RepoSync::from_settings(Arc::clone(&self.runner), settings)
            .sync(entry, target)
            .await
            .map_err(|err| PipelineFailure::before_sync(err.into()))?;

        let (image, deployed) = if deploy {
            match self.deliver(settings, entry, &sync).await {
                Ok((image, deployed)) => (image, Some(deployed)),
                Err(error) => {
                    return Err(PipelineFailure {
                        sync: Some(sync),
                        error,
                    })
                }
            }
        } else {
            (None, None)
        };

        tracing::info!(
            service = %entry.name,
            reference = %sync.reference,
            deployed = deployed.is_some(),
            "pipeline completed",
        );
        Ok(PipelineReport {
            service: entry.name.clone(),
            reference: sync.reference.clone(),
            sync,
            image,
            deploy: deployed,
            started_at,
            finished_at: Utc::now(),
        })
    }

    /// Publish (swarm only) and deploy an already-synced working copy.
    async fn deliver(
        &self,
        settings: &Settings,
        entry: &ServiceEntry,
        sync: &SyncResult,
    ) -> Result<(Option<PublishedImage>, DeployResult), PipelineError> {
        let deployment = DeploymentTarget::derive(settings, entry, &sync.reference)?;
        let mut image = None;
        if let Some(registry) = deployment.registry() {
            let published = ImagePublisher::from_settings(Arc::clone(&self.runner), settings)
                .build_and_publish(entry, &sync.path, &sync.reference, registry)
                .await?;
            image = Some(published);
        }
        let deployed = Dispatcher::from_settings(Arc::clone(&self.runner), settings)
            .deploy(entry, &deployment)
            .await?;
        Ok((image, deployed))
    }

    async fn record(&self, entry: &ServiceEntry, result: &Result<PipelineReport, PipelineFailure>) {
        let outcome = match result {
            Ok(report) => LastOutcome {
                at: report.finished_at,
                reference: Some(report.reference.clone()),
                head: Some(report.sync.head.clone()),
                ok: true,
                error: None,
            },
            // A failed build or deploy still leaves the working copy at the synced ref.
            Err(failure) => LastOutcome {
                at: Utc::now(),
                reference: failure.sync.as_ref().map(|s| s.reference.clone()),
                head: failure.sync.as_ref().map(|s| s.head.clone()),
                ok: false,
                error: Some(format!("{}: {}", failure.error.stage(), failure.error)),
            },
        };
        self.outcomes.lock().await.insert(entry.name.clone(), outcome);
    }

    /// Last recorded outcome per service, sorted by name.
    pub async fn last_outcomes(&self) -> BTreeMap<ServiceName, LastOutcome> {
        self.outcomes
            .lock()
            .await
            .iter()
            .map(|(name, outcome)| (name.clone(), outcome.clone()))
            .collect()
    }

    /// Whether a pipeline currently holds `service`'s lock.
    pub async fn is_busy(&self, service: &ServiceName) -> bool {
        self.locks.is_busy(service).await
    }
}
