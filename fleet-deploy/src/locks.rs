//! Per-service mutual exclusion.
//!
//! One async mutex per service name, created on first use. Holding the owned
//! guard serializes the whole Sync → Build → Deploy sequence for that service
//! while other services proceed concurrently.
//!
//! The mutex only covers one process. [`WorkingCopyLock`] extends the
//! exclusion to every fleet process sharing a workdir (a CLI run next to
//! the daemon, two webhook-triggered `fleet event` runs) with an advisory
//! lock on `<workdir>/<service>.lock`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fslock::LockFile;
use tokio::sync::{Mutex, OwnedMutexGuard};

use fleet_core::ServiceName;

use crate::error::LockError;

#[derive(Default)]
pub struct ServiceLocks {
    inner: Mutex<HashMap<ServiceName, Arc<Mutex<()>>>>,
}

impl ServiceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `service`'s working copy.
    pub async fn acquire(&self, service: &ServiceName) -> OwnedMutexGuard<()> {
        let lock = {
            let mut inner = self.inner.lock().await;
            Arc::clone(
                inner
                    .entry(service.clone())
                    .or_insert_with(|| Arc::new(Mutex::new(()))),
            )
        };
        lock.lock_owned().await
    }

    /// `true` while some pipeline holds `service`'s lock.
    pub async fn is_busy(&self, service: &ServiceName) -> bool {
        let inner = self.inner.lock().await;
        inner
            .get(service)
            .map(|lock| lock.try_lock().is_err())
            .unwrap_or(false)
    }
}

/// Advisory file lock on a service's working copy, released on drop.
pub struct WorkingCopyLock {
    _file: LockFile,
    path: PathBuf,
}

impl WorkingCopyLock {
    /// `<workdir>/<service>.lock`, next to the working copy itself.
    pub fn path_for(workdir: &Path, service: &ServiceName) -> PathBuf {
        workdir.join(format!("{}.lock", service.0))
    }

    /// Block (on the blocking pool) until no other process holds the lock.
    pub async fn acquire(workdir: &Path, service: &ServiceName) -> Result<Self, LockError> {
        let path = Self::path_for(workdir, service);
        let blocking_path = path.clone();
        let joined =
            tokio::task::spawn_blocking(move || Self::acquire_blocking(blocking_path)).await;
        match joined {
            Ok(result) => result,
            Err(join) => Err(LockError {
                path,
                detail: format!("lock task failed: {join}"),
            }),
        }
    }

    fn acquire_blocking(path: PathBuf) -> Result<Self, LockError> {
        let fail = |path: &Path, detail: String| LockError {
            path: path.to_path_buf(),
            detail,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| fail(&path, e.to_string()))?;
        }
        let mut file = LockFile::open(path.as_path()).map_err(|e| fail(&path, e.to_string()))?;
        file.lock().map_err(|e| fail(&path, e.to_string()))?;
        tracing::debug!(path = %path.display(), "working copy lock taken");
        Ok(Self { _file: file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
