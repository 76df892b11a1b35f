//! Domain types for the fleet service registry.
//!
//! All path fields use `PathBuf`; never `&str` or `String` for filesystem paths.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Unique name of a registered service. Also used as the container, compose
/// service, image repository and working-copy directory name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ServiceName(pub String);

impl ServiceName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ServiceName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ServiceName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// `owner/repo` identity carried by inbound push events.
///
/// Hosting providers treat these case-insensitively, so matching goes through
/// [`RepoFullName::key`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoFullName(pub String);

impl RepoFullName {
    /// Normalised lookup key.
    pub fn key(&self) -> String {
        self.0.to_ascii_lowercase()
    }

    pub fn matches(&self, other: &str) -> bool {
        self.0.eq_ignore_ascii_case(other)
    }
}

impl fmt::Display for RepoFullName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for RepoFullName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Which pushes trigger a service and which ref its working copy follows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "policy", rename_all = "kebab-case")]
pub enum RefPolicy {
    /// Any tag push on the repository triggers, regardless of branch.
    LatestTag,
    /// Only pushes to `branch` trigger; the working copy follows its tip.
    TrackedBranch { branch: String },
}

impl RefPolicy {
    pub fn tracked_branch(&self) -> Option<&str> {
        match self {
            RefPolicy::LatestTag => None,
            RefPolicy::TrackedBranch { branch } => Some(branch),
        }
    }
}

impl fmt::Display for RefPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefPolicy::LatestTag => write!(f, "latest-tag"),
            RefPolicy::TrackedBranch { branch } => write!(f, "tracked-branch({branch})"),
        }
    }
}

/// The concrete ref a working copy must reach.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "lowercase")]
pub enum ResolvedRef {
    Tag(String),
    Branch(String),
}

impl ResolvedRef {
    /// Bare ref name without any `refs/...` prefix.
    pub fn name(&self) -> &str {
        match self {
            ResolvedRef::Tag(name) | ResolvedRef::Branch(name) => name,
        }
    }

    pub fn is_tag(&self) -> bool {
        matches!(self, ResolvedRef::Tag(_))
    }
}

impl fmt::Display for ResolvedRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolvedRef::Tag(name) => write!(f, "tag {name}"),
            ResolvedRef::Branch(name) => write!(f, "branch {name}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Domain structs
// ---------------------------------------------------------------------------

/// One validated registry entry. Immutable for the lifetime of a loaded registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceEntry {
    pub name: ServiceName,
    pub repo_full_name: RepoFullName,
    pub clone_url: String,
    pub ref_policy: RefPolicy,
    /// Relative to the working copy root.
    pub build_context: PathBuf,
    /// Relative to the working copy root.
    pub dockerfile_path: PathBuf,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newtype_display() {
        assert_eq!(ServiceName::from("blog").to_string(), "blog");
        assert_eq!(RepoFullName::from("acme/blog").to_string(), "acme/blog");
    }

    #[test]
    fn repo_name_matching_ignores_case() {
        let repo = RepoFullName::from("Acme/Blog");
        assert!(repo.matches("acme/blog"));
        assert_eq!(repo.key(), "acme/blog");
        assert!(!repo.matches("acme/blog-api"));
    }

    #[test]
    fn resolved_ref_name_and_display() {
        let tag = ResolvedRef::Tag("v2.0.0".into());
        assert_eq!(tag.name(), "v2.0.0");
        assert!(tag.is_tag());
        assert_eq!(tag.to_string(), "tag v2.0.0");
        assert_eq!(ResolvedRef::Branch("main".into()).to_string(), "branch main");
    }

    #[test]
    fn resolved_ref_serializes_with_kind() {
        let json = serde_yaml::to_string(&ResolvedRef::Branch("staging".into())).expect("yaml");
        assert!(json.contains("kind: branch"));
        assert!(json.contains("name: staging"));
    }

    #[test]
    fn ref_policy_display() {
        assert_eq!(RefPolicy::LatestTag.to_string(), "latest-tag");
        let policy = RefPolicy::TrackedBranch { branch: "main".into() };
        assert_eq!(policy.to_string(), "tracked-branch(main)");
        assert_eq!(policy.tracked_branch(), Some("main"));
    }
}
