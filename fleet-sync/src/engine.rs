//! Repo sync engine: brings a service's working copy to an exact ref.
//!
//! ## `sync` — 5-step protocol
//!
//! 1. Absent working copy (no `.git`) → clone; otherwise fetch.
//! 2. Resolve the target: an explicit tag/branch is used verbatim; a
//!    latest-tag request picks the highest-versioned tag.
//! 3. No tags at all → warn and fall back to the default branch tip.
//! 4. Verify the ref exists, then force-checkout it and clean the tree.
//! 5. Report the resulting `HEAD`.
//!
//! Every step is idempotent: syncing twice to the same ref with no upstream
//! change leaves the tree untouched.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use fleet_core::{ResolvedRef, ServiceEntry, ServiceName, Settings};

use crate::error::{io_err, SyncError};
use crate::process::{CommandRunner, Invocation, ProcessOutput};
use crate::version;

/// `git ls-remote --exit-code` status when no ref matched.
const LS_REMOTE_NO_MATCH: i32 = 2;

const REMOTE_HEAD: &str = "refs/remotes/origin/HEAD";

/// What the caller wants the working copy to reach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefTarget {
    /// Use this ref as-is (e.g. the tag carried by a push event).
    Exact(ResolvedRef),
    /// Discover the highest-versioned tag.
    LatestTag,
}

impl From<ResolvedRef> for RefTarget {
    fn from(r: ResolvedRef) -> Self {
        RefTarget::Exact(r)
    }
}

/// Lifecycle state of a working copy on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum WorkingCopyState {
    Absent,
    Cloned { head: String },
}

/// Outcome of a successful sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncResult {
    pub service: ServiceName,
    pub path: PathBuf,
    /// The ref now checked out.
    pub reference: ResolvedRef,
    /// Commit at `HEAD` after checkout.
    pub head: String,
    /// `true` when this sync performed the initial clone.
    pub cloned: bool,
    /// Set when a latest-tag lookup found no tags and fell back to a branch.
    pub warning: Option<String>,
    pub synced_at: DateTime<Utc>,
}

/// Git-backed sync engine. One working copy per service under `workdir`.
#[derive(Clone)]
pub struct RepoSync {
    runner: Arc<dyn CommandRunner>,
    workdir: PathBuf,
    timeout: Duration,
}

impl RepoSync {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        workdir: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Self {
        Self {
            runner,
            workdir: workdir.into(),
            timeout,
        }
    }

    pub fn from_settings(runner: Arc<dyn CommandRunner>, settings: &Settings) -> Self {
        Self::new(runner, settings.workdir.clone(), settings.timeouts.git())
    }

    /// `<workdir>/<service>`.
    pub fn working_copy(&self, service: &ServiceName) -> PathBuf {
        self.workdir.join(&service.0)
    }

    /// Inspect a working copy without touching it.
    pub async fn state(&self, entry: &ServiceEntry) -> Result<WorkingCopyState, SyncError> {
        let path = self.working_copy(&entry.name);
        if !is_repository(&path) {
            return Ok(WorkingCopyState::Absent);
        }
        let head = self.head(entry, &path).await?;
        Ok(WorkingCopyState::Cloned { head })
    }

    /// Bring the working copy for `entry` to `target`.
    pub async fn sync(
        &self,
        entry: &ServiceEntry,
        target: &RefTarget,
    ) -> Result<SyncResult, SyncError> {
        let path = self.working_copy(&entry.name);
        let cloned = !is_repository(&path);

        if cloned {
            let scoped_branch = match target {
                RefTarget::Exact(ResolvedRef::Branch(branch)) => Some(branch.as_str()),
                _ => None,
            };
            self.clone_into(entry, &path, scoped_branch).await?;
        } else {
            self.fetch(entry, &path, target).await?;
        }

        let (reference, warning) = match target {
            RefTarget::Exact(reference) => (reference.clone(), None),
            RefTarget::LatestTag => match self.latest_tag(entry, &path).await? {
                Some(tag) => (ResolvedRef::Tag(tag), None),
                None => {
                    let branch = self.default_branch(entry, &path).await?;
                    let warning =
                        format!("no tags found; using default branch '{branch}' instead");
                    tracing::warn!(
                        service = %entry.name,
                        branch = %branch,
                        "no tags found, falling back to default branch",
                    );
                    (ResolvedRef::Branch(branch), Some(warning))
                }
            },
        };

        self.checkout(entry, &path, &reference).await?;
        let head = self.head(entry, &path).await?;

        tracing::info!(
            service = %entry.name,
            reference = %reference,
            head = %head,
            cloned,
            "working copy synced",
        );

        Ok(SyncResult {
            service: entry.name.clone(),
            path,
            reference,
            head,
            cloned,
            warning,
            synced_at: Utc::now(),
        })
    }

    // -----------------------------------------------------------------------
    // Steps
    // -----------------------------------------------------------------------

    async fn clone_into(
        &self,
        entry: &ServiceEntry,
        path: &Path,
        branch: Option<&str>,
    ) -> Result<(), SyncError> {
        prepare_clone_destination(path).await?;

        let mut inv = Invocation::new("git").arg("clone");
        if let Some(branch) = branch {
            inv = inv.args(["--branch", branch, "--single-branch"]);
        }
        let inv = inv
            .arg(entry.clone_url.as_str())
            .path_arg(path)
            .timeout(self.timeout);

        tracing::info!(
            service = %entry.name,
            url = %entry.clone_url,
            path = %path.display(),
            "cloning",
        );
        let out = self.runner.run(&inv).await?;
        if !out.success() {
            if let Some(branch) = branch {
                let remote = entry.clone_url.as_str();
                return Err(self.classify_branch_failure(entry, None, remote, branch, out).await?);
            }
            return Err(SyncError::Network {
                service: entry.name.0.clone(),
                detail: out.diagnostic(),
            });
        }
        Ok(())
    }

    async fn fetch(
        &self,
        entry: &ServiceEntry,
        path: &Path,
        target: &RefTarget,
    ) -> Result<(), SyncError> {
        let args: Vec<String> = match target {
            RefTarget::Exact(ResolvedRef::Branch(branch)) => vec![
                "fetch".into(),
                "--prune".into(),
                "origin".into(),
                format!("+refs/heads/{branch}:refs/remotes/origin/{branch}"),
            ],
            _ => ["fetch", "--prune", "--tags", "--force", "origin"]
                .into_iter()
                .map(String::from)
                .collect(),
        };

        tracing::debug!(service = %entry.name, "fetching");
        let out = self.git(path, args).await?;
        if !out.success() {
            if let RefTarget::Exact(ResolvedRef::Branch(branch)) = target {
                return Err(self
                    .classify_branch_failure(entry, Some(path), "origin", branch, out)
                    .await?);
            }
            return Err(SyncError::Network {
                service: entry.name.0.clone(),
                detail: out.diagnostic(),
            });
        }
        Ok(())
    }

    /// A branch-scoped clone or fetch failed. Ask the remote whether the
    /// branch exists: `ls-remote --exit-code` exits 2 when it does not, which
    /// is a [`SyncError::RefNotFound`] rather than a retryable network error.
    async fn classify_branch_failure(
        &self,
        entry: &ServiceEntry,
        cwd: Option<&Path>,
        remote: &str,
        branch: &str,
        failed: ProcessOutput,
    ) -> Result<SyncError, SyncError> {
        let mut inv = Invocation::new("git")
            .args(["ls-remote", "--exit-code", remote])
            .arg(format!("refs/heads/{branch}"))
            .timeout(self.timeout);
        if let Some(cwd) = cwd {
            inv = inv.current_dir(cwd);
        }
        let listed = self.runner.run(&inv).await?;
        if listed.code == Some(LS_REMOTE_NO_MATCH) {
            tracing::warn!(service = %entry.name, branch, "branch not found on remote");
            return Ok(SyncError::RefNotFound {
                service: entry.name.0.clone(),
                reference: ResolvedRef::Branch(branch.to_string()).to_string(),
            });
        }
        Ok(SyncError::Network {
            service: entry.name.0.clone(),
            detail: failed.diagnostic(),
        })
    }

    /// Highest-versioned tag reachable from the remote's default branch.
    /// Without `origin/HEAD` (single-branch clones) every tag is a candidate.
    async fn latest_tag(
        &self,
        entry: &ServiceEntry,
        path: &Path,
    ) -> Result<Option<String>, SyncError> {
        let remote_head = self
            .git(path, ["rev-parse", "--verify", "--quiet", REMOTE_HEAD])
            .await?;
        let mut args = vec!["tag", "--list"];
        if remote_head.success() {
            args.extend(["--merged", REMOTE_HEAD]);
        } else {
            tracing::debug!(service = %entry.name, "origin/HEAD unset, considering every tag");
        }

        let out = self.git_ok(entry, path, "tag", args).await?;
        let tags = out.stdout.lines().map(str::trim).filter(|t| !t.is_empty());
        Ok(version::latest(tags).map(String::from))
    }

    /// The entry's tracked branch, else the branch the remote's `HEAD` points
    /// at, else the currently checked-out branch.
    async fn default_branch(&self, entry: &ServiceEntry, path: &Path) -> Result<String, SyncError> {
        if let Some(branch) = entry.ref_policy.tracked_branch() {
            return Ok(branch.to_string());
        }

        let out = self
            .git(path, ["symbolic-ref", "--quiet", "--short", REMOTE_HEAD])
            .await?;
        if out.success() {
            if let Some(branch) = out.stdout.trim().strip_prefix("origin/") {
                return Ok(branch.to_string());
            }
        }

        let out = self
            .git_ok(entry, path, "rev-parse", ["rev-parse", "--abbrev-ref", "HEAD"])
            .await?;
        let current = out.stdout.trim();
        if current.is_empty() || current == "HEAD" {
            return Err(SyncError::Git {
                service: entry.name.0.clone(),
                step: "default-branch",
                detail: "cannot determine the default branch".to_string(),
            });
        }
        Ok(current.to_string())
    }

    async fn checkout(
        &self,
        entry: &ServiceEntry,
        path: &Path,
        reference: &ResolvedRef,
    ) -> Result<(), SyncError> {
        let full_ref = match reference {
            ResolvedRef::Tag(tag) => format!("refs/tags/{tag}"),
            ResolvedRef::Branch(branch) => format!("refs/remotes/origin/{branch}"),
        };

        let commit = format!("{full_ref}^{{commit}}");
        let verify = self
            .git(path, ["rev-parse", "--verify", "--quiet", commit.as_str()])
            .await?;
        if !verify.success() {
            return Err(SyncError::RefNotFound {
                service: entry.name.0.clone(),
                reference: reference.to_string(),
            });
        }

        match reference {
            ResolvedRef::Tag(_) => {
                self.git_ok(
                    entry,
                    path,
                    "checkout",
                    ["checkout", "--force", "--detach", full_ref.as_str()],
                )
                .await?;
            }
            ResolvedRef::Branch(branch) => {
                self.git_ok(
                    entry,
                    path,
                    "checkout",
                    ["checkout", "--force", "-B", branch.as_str(), full_ref.as_str()],
                )
                .await?;
                self.git_ok(entry, path, "reset", ["reset", "--hard", full_ref.as_str()])
                    .await?;
            }
        }
        self.git_ok(entry, path, "clean", ["clean", "-ffdx"]).await?;
        Ok(())
    }

    async fn head(&self, entry: &ServiceEntry, path: &Path) -> Result<String, SyncError> {
        let out = self.git_ok(entry, path, "rev-parse", ["rev-parse", "HEAD"]).await?;
        Ok(out.stdout.trim().to_string())
    }

    // -----------------------------------------------------------------------
    // Process helpers
    // -----------------------------------------------------------------------

    async fn git<I, S>(&self, cwd: &Path, args: I) -> Result<ProcessOutput, SyncError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let inv = Invocation::new("git")
            .args(args)
            .current_dir(cwd)
            .timeout(self.timeout);
        Ok(self.runner.run(&inv).await?)
    }

    async fn git_ok<I, S>(
        &self,
        entry: &ServiceEntry,
        cwd: &Path,
        step: &'static str,
        args: I,
    ) -> Result<ProcessOutput, SyncError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let out = self.git(cwd, args).await?;
        if !out.success() {
            return Err(SyncError::Git {
                service: entry.name.0.clone(),
                step,
                detail: out.diagnostic(),
            });
        }
        Ok(out)
    }
}

fn is_repository(path: &Path) -> bool {
    path.join(".git").exists()
}

/// A clone may only land in a missing or empty directory.
async fn prepare_clone_destination(path: &Path) -> Result<(), SyncError> {
    match tokio::fs::read_dir(path).await {
        Ok(mut entries) => {
            if entries
                .next_entry()
                .await
                .map_err(|e| io_err(path, e))?
                .is_some()
            {
                return Err(SyncError::WorkingCopyOccupied {
                    path: path.to_path_buf(),
                });
            }
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(io_err(path, err)),
    }
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| io_err(parent, e))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
