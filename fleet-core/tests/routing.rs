//! Event routing against a loaded registry.

use std::path::Path;

use fleet_core::{route, Action, NoOpReason, Registry, ResolvedRef};
use rstest::{fixture, rstest};

#[fixture]
fn registry() -> Registry {
    Registry::from_yaml(
        r#"
blog:
  repo_full_name: acme/blog
  clone_url: https://github.com/acme/blog.git
  ref_policy: latest-tag
api:
  repo_full_name: acme/api
  clone_url: https://github.com/acme/api.git
  ref_policy: tracked-branch
  tracked_branch: main
api-staging:
  repo_full_name: acme/api
  clone_url: https://github.com/acme/api.git
  ref_policy: tracked-branch
  tracked_branch: staging
"#,
        Path::new("services.yaml"),
    )
    .expect("registry")
}

#[rstest]
fn tag_push_routes_to_latest_tag_entry_with_verbatim_tag(registry: Registry) {
    match route(&registry, "acme/blog", "refs/tags/v2.0.0") {
        Action::Run { entry, target } => {
            assert_eq!(entry.name.0, "blog");
            assert_eq!(target, ResolvedRef::Tag("v2.0.0".into()));
        }
        other => panic!("expected Run, got {other:?}"),
    }
}

#[rstest]
#[case("refs/heads/main", "api")]
#[case("refs/heads/staging", "api-staging")]
fn branch_push_routes_to_exact_branch_subscriber(
    registry: Registry,
    #[case] raw_ref: &str,
    #[case] expected: &str,
) {
    match route(&registry, "acme/api", raw_ref) {
        Action::Run { entry, target } => {
            assert_eq!(entry.name.0, expected);
            assert!(matches!(target, ResolvedRef::Branch(_)));
        }
        other => panic!("expected Run, got {other:?}"),
    }
}

#[rstest]
fn untracked_branch_is_a_noop(registry: Registry) {
    let action = route(&registry, "acme/blog", "refs/heads/feature-x");
    assert_eq!(
        action,
        Action::NoOp(NoOpReason::NoBranchSubscriber {
            repo: "acme/blog".into(),
            branch: "feature-x".into(),
        })
    );
}

#[rstest]
fn tag_push_on_branch_only_repo_is_a_noop(registry: Registry) {
    let action = route(&registry, "acme/api", "refs/tags/v1.0.0");
    assert!(matches!(
        action,
        Action::NoOp(NoOpReason::NoTagSubscriber { .. })
    ));
}

#[rstest]
#[case("refs/pull/7/merge")]
#[case("main")]
#[case("")]
fn other_ref_shapes_are_noops(registry: Registry, #[case] raw_ref: &str) {
    assert!(matches!(
        route(&registry, "acme/blog", raw_ref),
        Action::NoOp(NoOpReason::UnsupportedRef { .. })
    ));
}

#[rstest]
fn unknown_repository_is_a_noop(registry: Registry) {
    assert!(matches!(
        route(&registry, "someone/else", "refs/tags/v1"),
        Action::NoOp(_)
    ));
}

#[rstest]
fn repository_match_ignores_case(registry: Registry) {
    assert!(matches!(
        route(&registry, "ACME/Blog", "refs/tags/v1"),
        Action::Run { .. }
    ));
}
