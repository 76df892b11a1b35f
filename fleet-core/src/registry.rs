//! Service registry: a validated, read-only map of service name → repository
//! and build metadata.
//!
//! # Source format
//!
//! ```yaml
//! blog:
//!   repo_full_name: acme/blog
//!   clone_url: https://github.com/acme/blog.git
//!   ref_policy: latest-tag
//! api-staging:
//!   repo_full_name: acme/api
//!   clone_url: https://github.com/acme/api.git
//!   ref_policy: tracked-branch
//!   tracked_branch: staging
//!   build_context: server
//!   dockerfile_path: server/Dockerfile
//! ```
//!
//! # API pattern
//!
//! - `load_at(home)` — explicit home; used in tests with `TempDir`
//! - `load()` — derives home from `dirs::home_dir()`, delegates to `load_at`
//!
//! A loaded [`Registry`] is never mutated. Reloading means building a new one
//! and swapping it in whole.

use std::collections::{BTreeMap, HashMap};
use std::path::{Component, Path, PathBuf};

use serde::Deserialize;

use crate::error::{io_err, ConfigError};
use crate::paths;
use crate::types::{RefPolicy, RepoFullName, ServiceEntry, ServiceName};

// ---------------------------------------------------------------------------
// 1. On-disk shape
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum RawRefPolicy {
    LatestTag,
    TrackedBranch,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawServiceEntry {
    repo_full_name: String,
    clone_url: String,
    ref_policy: RawRefPolicy,
    #[serde(default)]
    tracked_branch: Option<String>,
    #[serde(default = "default_build_context")]
    build_context: PathBuf,
    #[serde(default = "default_dockerfile_path")]
    dockerfile_path: PathBuf,
}

fn default_build_context() -> PathBuf {
    PathBuf::from(".")
}

fn default_dockerfile_path() -> PathBuf {
    PathBuf::from("Dockerfile")
}

impl RawServiceEntry {
    fn into_entry(self, name: String) -> Result<ServiceEntry, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidService {
            service: name.clone(),
            reason,
        };

        let ref_policy = match (self.ref_policy, self.tracked_branch) {
            (RawRefPolicy::LatestTag, None) => RefPolicy::LatestTag,
            (RawRefPolicy::LatestTag, Some(_)) => {
                return Err(invalid(
                    "tracked_branch is only valid with ref_policy tracked-branch".into(),
                ))
            }
            (RawRefPolicy::TrackedBranch, Some(branch)) if !branch.trim().is_empty() => {
                RefPolicy::TrackedBranch {
                    branch: branch.trim().to_string(),
                }
            }
            (RawRefPolicy::TrackedBranch, _) => {
                return Err(invalid(
                    "ref_policy tracked-branch requires a non-empty tracked_branch".into(),
                ))
            }
        };

        Ok(ServiceEntry {
            name: ServiceName::from(name.clone()),
            repo_full_name: RepoFullName(self.repo_full_name.trim().to_string()),
            clone_url: self.clone_url.trim().to_string(),
            ref_policy,
            build_context: self.build_context,
            dockerfile_path: self.dockerfile_path,
        })
    }
}

// ---------------------------------------------------------------------------
// 2. Registry
// ---------------------------------------------------------------------------

/// Loaded, validated and indexed registry.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    services: BTreeMap<ServiceName, ServiceEntry>,
    /// repo key → latest-tag service
    tag_index: HashMap<String, ServiceName>,
    /// (repo key, branch) → tracked-branch service
    branch_index: HashMap<(String, String), ServiceName>,
}

impl Registry {
    /// Build a registry from entries, enforcing per-entry validity and the
    /// uniqueness rules for `latest-tag` repositories and tracked branches.
    pub fn new(entries: impl IntoIterator<Item = ServiceEntry>) -> Result<Self, ConfigError> {
        let mut registry = Registry::default();
        for entry in entries {
            validate_entry(&entry)?;
            registry.insert(entry)?;
        }
        Ok(registry)
    }

    /// Parse registry YAML. `origin` is only used in error messages.
    pub fn from_yaml(contents: &str, origin: &Path) -> Result<Self, ConfigError> {
        if contents.trim().is_empty() {
            return Ok(Registry::default());
        }
        let raw: Option<BTreeMap<String, RawServiceEntry>> =
            serde_yaml::from_str(contents).map_err(|source| ConfigError::Parse {
                path: origin.to_path_buf(),
                source,
            })?;

        let entries = raw
            .unwrap_or_default()
            .into_iter()
            .map(|(name, raw)| raw.into_entry(name))
            .collect::<Result<Vec<_>, _>>()?;
        Registry::new(entries)
    }

    fn insert(&mut self, entry: ServiceEntry) -> Result<(), ConfigError> {
        let repo = entry.repo_full_name.key();
        match &entry.ref_policy {
            RefPolicy::LatestTag => {
                if let Some(first) = self.tag_index.get(&repo) {
                    return Err(ConfigError::DuplicateTagRepo {
                        repo: entry.repo_full_name.0.clone(),
                        first: first.0.clone(),
                        second: entry.name.0.clone(),
                    });
                }
                self.tag_index.insert(repo, entry.name.clone());
            }
            RefPolicy::TrackedBranch { branch } => {
                let key = (repo, branch.clone());
                if let Some(first) = self.branch_index.get(&key) {
                    return Err(ConfigError::DuplicateBranch {
                        repo: entry.repo_full_name.0.clone(),
                        branch: branch.clone(),
                        first: first.0.clone(),
                        second: entry.name.0.clone(),
                    });
                }
                self.branch_index.insert(key, entry.name.clone());
            }
        }
        self.services.insert(entry.name.clone(), entry);
        Ok(())
    }

    /// The unique `latest-tag` entry for `repo`, if any.
    pub fn lookup_by_tag_push(&self, repo: &str) -> Option<&ServiceEntry> {
        self.tag_index
            .get(&repo.to_ascii_lowercase())
            .and_then(|name| self.services.get(name))
    }

    /// The `tracked-branch` entry for exactly `(repo, branch)`, if any.
    pub fn lookup_by_branch_push(&self, repo: &str, branch: &str) -> Option<&ServiceEntry> {
        self.branch_index
            .get(&(repo.to_ascii_lowercase(), branch.to_string()))
            .and_then(|name| self.services.get(name))
    }

    pub fn get(&self, name: &ServiceName) -> Option<&ServiceEntry> {
        self.services.get(name)
    }

    /// Entries in service-name order.
    pub fn iter(&self) -> impl Iterator<Item = &ServiceEntry> {
        self.services.values()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

// ---------------------------------------------------------------------------
// 3. Load
// ---------------------------------------------------------------------------

/// Load the registry from an explicit file.
///
/// Returns `ConfigError::NotFound` if absent, `ConfigError::Parse` (with path +
/// line context) if malformed, and a validation error if an entry is invalid.
pub fn load_from(path: &Path) -> Result<Registry, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound {
            path: path.to_path_buf(),
        });
    }
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    Registry::from_yaml(&contents, path)
}

/// Load `<home>/.fleet/services.yaml`.
pub fn load_at(home: &Path) -> Result<Registry, ConfigError> {
    load_from(&paths::registry_path(home))
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<Registry, ConfigError> {
    load_at(&paths::home()?)
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn validate_entry(entry: &ServiceEntry) -> Result<(), ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidService {
        service: entry.name.0.clone(),
        reason: reason.to_string(),
    };

    if !is_valid_service_name(&entry.name.0) {
        return Err(invalid(
            "name must be lowercase ASCII letters, digits, '-', '_' or '.', starting with a letter or digit",
        ));
    }

    let repo = &entry.repo_full_name.0;
    match repo.split_once('/') {
        Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/') => {}
        _ => return Err(invalid("repo_full_name must have the form owner/repo")),
    }

    if entry.clone_url.is_empty() {
        return Err(invalid("clone_url must not be empty"));
    }

    if !is_contained_relative(&entry.build_context) {
        return Err(invalid(
            "build_context must be a relative path inside the repository",
        ));
    }
    if !is_contained_relative(&entry.dockerfile_path)
        || entry.dockerfile_path.as_os_str().is_empty()
    {
        return Err(invalid(
            "dockerfile_path must be a relative path inside the repository",
        ));
    }
    Ok(())
}

fn is_valid_service_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c.is_ascii_digit() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '.'))
}

fn is_contained_relative(path: &Path) -> bool {
    path.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, repo: &str, policy: RefPolicy) -> ServiceEntry {
        ServiceEntry {
            name: ServiceName::from(name),
            repo_full_name: RepoFullName::from(repo),
            clone_url: format!("https://example.com/{repo}.git"),
            ref_policy: policy,
            build_context: PathBuf::from("."),
            dockerfile_path: PathBuf::from("Dockerfile"),
        }
    }

    #[test]
    fn defaults_apply_for_build_parameters() {
        let yaml = "blog:\n  repo_full_name: acme/blog\n  clone_url: https://x/blog.git\n  ref_policy: latest-tag\n";
        let reg = Registry::from_yaml(yaml, Path::new("services.yaml")).expect("parse");
        let blog = reg.get(&ServiceName::from("blog")).expect("blog");
        assert_eq!(blog.build_context, PathBuf::from("."));
        assert_eq!(blog.dockerfile_path, PathBuf::from("Dockerfile"));
        assert_eq!(blog.ref_policy, RefPolicy::LatestTag);
    }

    #[test]
    fn empty_source_is_an_empty_registry() {
        let reg = Registry::from_yaml("  \n", Path::new("services.yaml")).expect("parse");
        assert!(reg.is_empty());
    }

    #[test]
    fn branches_of_one_repo_may_map_to_different_services() {
        let reg = Registry::new(vec![
            entry("api", "acme/api", RefPolicy::TrackedBranch { branch: "main".into() }),
            entry("api-staging", "acme/api", RefPolicy::TrackedBranch { branch: "staging".into() }),
        ])
        .expect("valid");
        assert_eq!(reg.lookup_by_branch_push("acme/api", "main").unwrap().name.0, "api");
        assert_eq!(
            reg.lookup_by_branch_push("acme/api", "staging").unwrap().name.0,
            "api-staging"
        );
    }

    #[test]
    fn invalid_service_name_rejected() {
        let err =
            Registry::new(vec![entry("Blog", "acme/blog", RefPolicy::LatestTag)]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidService { .. }), "got: {err}");
    }

    #[test]
    fn escaping_build_context_rejected() {
        let mut e = entry("blog", "acme/blog", RefPolicy::LatestTag);
        e.build_context = PathBuf::from("../elsewhere");
        let err = Registry::new(vec![e]).unwrap_err();
        assert!(err.to_string().contains("build_context"));
    }

    #[test]
    fn tag_lookup_ignores_tracked_branch_entries() {
        let reg = Registry::new(vec![entry(
            "api",
            "acme/api",
            RefPolicy::TrackedBranch { branch: "main".into() },
        )])
        .expect("valid");
        assert!(reg.lookup_by_tag_push("acme/api").is_none());
    }

    #[test]
    fn iteration_is_sorted_by_name() {
        let reg = Registry::new(vec![
            entry("zeta", "acme/zeta", RefPolicy::LatestTag),
            entry("alpha", "acme/alpha", RefPolicy::LatestTag),
        ])
        .expect("valid");
        let names: Vec<_> = reg.iter().map(|e| e.name.0.as_str()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }
}
