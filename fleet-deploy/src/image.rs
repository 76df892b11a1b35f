//! Image build and publish (swarm mode).
//!
//! One build, two tags: `{registry}/{service}:{ref}` and
//! `{registry}/{service}:latest`. Both must reach the registry before a
//! [`PublishedImage`] exists.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use fleet_core::{ResolvedRef, ServiceEntry, ServiceName, Settings};
use fleet_sync::{CommandRunner, Invocation};

use crate::error::BuildError;

/// Longest tag Docker accepts.
pub const MAX_TAG_LEN: usize = 128;

/// Floating tag co-published with every versioned tag.
pub const LATEST_TAG: &str = "latest";

/// Map a ref name onto the Docker tag alphabet.
///
/// Characters outside `[A-Za-z0-9_.-]` become `-`, a leading `.` or `-`
/// becomes `_`, and the result is cut at [`MAX_TAG_LEN`].
pub fn sanitize_tag(reference: &str) -> String {
    let mut tag: String = reference
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '-'
            }
        })
        .take(MAX_TAG_LEN)
        .collect();
    if tag.starts_with(&['.', '-'][..]) {
        tag.replace_range(..1, "_");
    }
    if tag.is_empty() {
        tag.push_str(LATEST_TAG);
    }
    tag
}

/// `{registry}/{service}`.
pub fn image_repository(registry: &str, service: &ServiceName) -> String {
    format!("{}/{}", registry.trim_end_matches('/'), service)
}

/// Fully-qualified image reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageRef {
    pub repository: String,
    pub tag: String,
}

impl ImageRef {
    pub fn new(repository: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            tag: tag.into(),
        }
    }

    pub fn latest(repository: impl Into<String>) -> Self {
        Self::new(repository, LATEST_TAG)
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository, self.tag)
    }
}

/// Both tags are in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishedImage {
    pub service: ServiceName,
    pub versioned: ImageRef,
    pub latest: ImageRef,
    pub published_at: DateTime<Utc>,
}

/// Runs `docker build` and `docker push` through a [`CommandRunner`].
#[derive(Clone)]
pub struct ImagePublisher {
    runner: Arc<dyn CommandRunner>,
    build_timeout: Duration,
    push_timeout: Duration,
}

impl ImagePublisher {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        build_timeout: Duration,
        push_timeout: Duration,
    ) -> Self {
        Self {
            runner,
            build_timeout,
            push_timeout,
        }
    }

    pub fn from_settings(runner: Arc<dyn CommandRunner>, settings: &Settings) -> Self {
        Self::new(runner, settings.timeouts.build(), settings.timeouts.push())
    }

    /// Build from the synced working copy and push both tags.
    pub async fn build_and_publish(
        &self,
        entry: &ServiceEntry,
        working_copy: &Path,
        reference: &ResolvedRef,
        registry: &str,
    ) -> Result<PublishedImage, BuildError> {
        let repository = image_repository(registry, &entry.name);
        let versioned = ImageRef::new(repository.clone(), sanitize_tag(reference.name()));
        let latest = ImageRef::latest(repository);

        let build = Invocation::new("docker")
            .args(["build", "-f"])
            .path_arg(&entry.dockerfile_path)
            .args(["-t".to_string(), versioned.to_string()])
            .args(["-t".to_string(), latest.to_string()])
            .path_arg(&entry.build_context)
            .current_dir(working_copy)
            .timeout(self.build_timeout);

        tracing::info!(service = %entry.name, image = %versioned, "building image");
        let out = self.runner.run(&build).await?;
        if !out.success() {
            return Err(BuildError::Build {
                service: entry.name.0.clone(),
                detail: out.diagnostic(),
            });
        }

        self.push(&versioned).await?;
        if versioned != latest {
            self.push(&latest).await?;
        }

        tracing::info!(service = %entry.name, image = %versioned, "image published");
        Ok(PublishedImage {
            service: entry.name.clone(),
            versioned,
            latest,
            published_at: Utc::now(),
        })
    }

    async fn push(&self, image: &ImageRef) -> Result<(), BuildError> {
        let inv = Invocation::new("docker")
            .args(["push".to_string(), image.to_string()])
            .timeout(self.push_timeout);
        tracing::debug!(image = %image, "pushing");
        let out = self.runner.run(&inv).await?;
        if !out.success() {
            return Err(BuildError::Push {
                image: image.to_string(),
                detail: out.diagnostic(),
            });
        }
        Ok(())
    }
}
