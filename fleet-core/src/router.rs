//! Event router: classifies an inbound push and resolves it to a registry entry.
//!
//! Stateless. A miss is an [`Action::NoOp`], never an error, so upstream
//! webhook delivery is not retried for pushes nobody is subscribed to.

use std::fmt;

use crate::registry::Registry;
use crate::types::{ResolvedRef, ServiceEntry};

pub const TAG_PREFIX: &str = "refs/tags/";
pub const BRANCH_PREFIX: &str = "refs/heads/";

/// Shape of a raw ref string from a push event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefKind<'a> {
    Tag(&'a str),
    Branch(&'a str),
    Other,
}

/// Classify `raw` by prefix. An empty name after the prefix counts as `Other`.
pub fn classify(raw: &str) -> RefKind<'_> {
    if let Some(tag) = raw.strip_prefix(TAG_PREFIX) {
        if !tag.is_empty() {
            return RefKind::Tag(tag);
        }
    } else if let Some(branch) = raw.strip_prefix(BRANCH_PREFIX) {
        if !branch.is_empty() {
            return RefKind::Branch(branch);
        }
    }
    RefKind::Other
}

/// Why an event produced no work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoOpReason {
    /// Neither a tag nor a branch reference.
    UnsupportedRef { raw_ref: String },
    /// No latest-tag entry for this repository.
    NoTagSubscriber { repo: String },
    /// No entry tracks this branch of this repository.
    NoBranchSubscriber { repo: String, branch: String },
}

impl fmt::Display for NoOpReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoOpReason::UnsupportedRef { raw_ref } => {
                write!(f, "ref '{raw_ref}' is neither a tag nor a branch")
            }
            NoOpReason::NoTagSubscriber { repo } => {
                write!(f, "no latest-tag service registered for '{repo}'")
            }
            NoOpReason::NoBranchSubscriber { repo, branch } => {
                write!(f, "no service tracks branch '{branch}' of '{repo}'")
            }
        }
    }
}

/// Routing decision for one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Run {
        entry: ServiceEntry,
        target: ResolvedRef,
    },
    NoOp(NoOpReason),
}

/// Route `(repo_full_name, raw_ref)` against `registry`.
///
/// Tag identifiers are taken verbatim from the event: the push is
/// authoritative for which tag to check out.
pub fn route(registry: &Registry, repo_full_name: &str, raw_ref: &str) -> Action {
    match classify(raw_ref) {
        RefKind::Tag(tag) => match registry.lookup_by_tag_push(repo_full_name) {
            Some(entry) => Action::Run {
                entry: entry.clone(),
                target: ResolvedRef::Tag(tag.to_string()),
            },
            None => Action::NoOp(NoOpReason::NoTagSubscriber {
                repo: repo_full_name.to_string(),
            }),
        },
        RefKind::Branch(branch) => match registry.lookup_by_branch_push(repo_full_name, branch) {
            Some(entry) => Action::Run {
                entry: entry.clone(),
                target: ResolvedRef::Branch(branch.to_string()),
            },
            None => Action::NoOp(NoOpReason::NoBranchSubscriber {
                repo: repo_full_name.to_string(),
                branch: branch.to_string(),
            }),
        },
        RefKind::Other => Action::NoOp(NoOpReason::UnsupportedRef {
            raw_ref: raw_ref.to_string(),
        }),
    }
}
