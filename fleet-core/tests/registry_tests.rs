//! Registry load errors, uniqueness invariants, and settings loading from
//! ~/.fleet/.

use assert_fs::prelude::*;
use fleet_core::{paths, registry, settings, ConfigError, DeployMode, RefPolicy, ServiceName};
use std::fs;

const TWO_SERVICES: &str = r#"
blog:
  repo_full_name: acme/blog
  clone_url: https://github.com/acme/blog.git
  ref_policy: latest-tag
api-staging:
  repo_full_name: acme/api
  clone_url: https://github.com/acme/api.git
  ref_policy: tracked-branch
  tracked_branch: staging
  build_context: server
  dockerfile_path: server/Dockerfile.prod
"#;

fn write_registry(home: &assert_fs::TempDir, contents: &str) {
    home.child(".fleet/services.yaml")
        .write_str(contents)
        .expect("write registry");
}

// ---------------------------------------------------------------------------
// 1. Load error messages
// ---------------------------------------------------------------------------

#[test]
fn load_missing_registry_returns_not_found() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let err = registry::load_at(home.path()).unwrap_err();
    assert!(matches!(err, ConfigError::NotFound { .. }), "got: {err}");
    assert!(err.to_string().contains("registry not found"));
    assert!(err.to_string().contains("services.yaml"));
}

#[test]
fn load_corrupt_yaml_returns_parse_error_with_path() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    write_registry(&home, ": : corrupt : yaml : !!!\n  - broken: [unclosed");

    let err = registry::load_at(home.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
    assert!(err.to_string().contains("services.yaml"));
}

#[test]
fn load_list_instead_of_mapping_returns_parse_error() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    write_registry(&home, "- blog\n- api\n");

    let err = registry::load_at(home.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
}

#[test]
fn unknown_field_is_malformed() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    write_registry(
        &home,
        "blog:\n  repo_full_name: acme/blog\n  clone_url: x\n  ref_policy: latest-tag\n  dockerfile: Dockerfile\n",
    );
    let err = registry::load_at(home.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
}

#[test]
fn unknown_ref_policy_is_malformed() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    write_registry(
        &home,
        "blog:\n  repo_full_name: acme/blog\n  clone_url: x\n  ref_policy: newest-commit\n",
    );
    let err = registry::load_at(home.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
}

// ---------------------------------------------------------------------------
// 2. Successful load
// ---------------------------------------------------------------------------

#[test]
fn load_two_services() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    write_registry(&home, TWO_SERVICES);

    let reg = registry::load_at(home.path()).expect("load");
    assert_eq!(reg.len(), 2);

    let api = reg.get(&ServiceName::from("api-staging")).expect("api-staging");
    assert_eq!(
        api.ref_policy,
        RefPolicy::TrackedBranch {
            branch: "staging".into()
        }
    );
    assert_eq!(api.build_context.to_str(), Some("server"));
    assert_eq!(api.dockerfile_path.to_str(), Some("server/Dockerfile.prod"));
}

#[test]
fn json_source_is_accepted() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    write_registry(
        &home,
        r#"{"blog": {"repo_full_name": "acme/blog", "clone_url": "https://x/blog.git", "ref_policy": "latest-tag", "build_context": ".", "dockerfile_path": "Dockerfile"}}"#,
    );
    let reg = registry::load_at(home.path()).expect("load");
    assert!(reg.lookup_by_tag_push("acme/blog").is_some());
}

// ---------------------------------------------------------------------------
// 3. Uniqueness invariants
// ---------------------------------------------------------------------------

#[test]
fn duplicate_latest_tag_repo_is_rejected() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    write_registry(
        &home,
        r#"
blog:
  repo_full_name: acme/blog
  clone_url: x
  ref_policy: latest-tag
blog-mirror:
  repo_full_name: Acme/Blog
  clone_url: y
  ref_policy: latest-tag
"#,
    );
    let err = registry::load_at(home.path()).unwrap_err();
    assert!(matches!(err, ConfigError::DuplicateTagRepo { .. }), "got: {err}");
    let msg = err.to_string();
    assert!(msg.contains("blog") && msg.contains("blog-mirror"), "got: {msg}");
}

#[test]
fn duplicate_tracked_branch_is_rejected() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    write_registry(
        &home,
        r#"
api:
  repo_full_name: acme/api
  clone_url: x
  ref_policy: tracked-branch
  tracked_branch: main
api-two:
  repo_full_name: acme/api
  clone_url: x
  ref_policy: tracked-branch
  tracked_branch: main
"#,
    );
    let err = registry::load_at(home.path()).unwrap_err();
    assert!(matches!(err, ConfigError::DuplicateBranch { .. }), "got: {err}");
}

#[test]
fn same_repo_may_have_tag_and_branch_subscribers() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    write_registry(
        &home,
        r#"
api:
  repo_full_name: acme/api
  clone_url: x
  ref_policy: latest-tag
api-edge:
  repo_full_name: acme/api
  clone_url: x
  ref_policy: tracked-branch
  tracked_branch: main
"#,
    );
    let reg = registry::load_at(home.path()).expect("load");
    assert_eq!(reg.lookup_by_tag_push("acme/api").unwrap().name.0, "api");
    assert_eq!(
        reg.lookup_by_branch_push("acme/api", "main").unwrap().name.0,
        "api-edge"
    );
}

#[test]
fn tracked_branch_without_branch_is_invalid() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    write_registry(
        &home,
        "api:\n  repo_full_name: acme/api\n  clone_url: x\n  ref_policy: tracked-branch\n",
    );
    let err = registry::load_at(home.path()).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidService { .. }), "got: {err}");
    assert!(err.to_string().contains("tracked_branch"));
}

#[test]
fn malformed_repo_full_name_is_invalid() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    write_registry(
        &home,
        "blog:\n  repo_full_name: blog\n  clone_url: x\n  ref_policy: latest-tag\n",
    );
    let err = registry::load_at(home.path()).unwrap_err();
    assert!(err.to_string().contains("owner/repo"), "got: {err}");
}

// ---------------------------------------------------------------------------
// 4. Settings
// ---------------------------------------------------------------------------

#[test]
fn settings_default_when_file_absent() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let s = settings::load_at(home.path()).expect("settings");
    assert_eq!(s.mode, DeployMode::Compose);
    assert_eq!(s.workdir, paths::default_workdir(home.path()));
}

#[test]
fn settings_swarm_file_loads() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child(".fleet/fleet.yaml")
        .write_str(
            "mode: swarm\nworkdir: /srv/repos\nswarm:\n  registry: registry.local:5000\n  stack: apps\n  stack_file: stack.yml\n",
        )
        .expect("write settings");

    let s = settings::load_at(home.path()).expect("settings");
    assert_eq!(s.mode, DeployMode::Swarm);
    assert_eq!(s.workdir, std::path::PathBuf::from("/srv/repos"));
    let swarm = s.swarm.expect("swarm section");
    assert_eq!(swarm.stack_file, paths::fleet_root(home.path()).join("stack.yml"));
}

#[test]
fn settings_parse_error_names_file() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let dir = home.path().join(".fleet");
    fs::create_dir_all(&dir).expect("mkdir");
    fs::write(dir.join("fleet.yaml"), "mode: [swarm").expect("write");
    let err = settings::load_at(home.path()).unwrap_err();
    assert!(err.to_string().contains("fleet.yaml"), "got: {err}");
}
