use std::path::Path;

use bulk_board::catalog::BatchAction;
use bulk_board::config::loader::{load_config, merge_configs};
use bulk_board::config::types::{AppConfig, PolicyKind};
use bulk_board::eligibility::{PermissionScope, PermissionView as _, Role};
use bulk_board::types::WorkspaceId;

fn fixture(name: &str) -> AppConfig {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name);
    load_config(Some(&path)).unwrap()
}

#[test]
fn parse_minimal_config() {
    let toml = r#"
[service]
base_url = "https://batch.example.com/"
"#;
    let config: AppConfig = toml::from_str(toml).unwrap();
    assert_eq!(config.service.base_url, "https://batch.example.com/");
    assert_eq!(config.service.resource, "experiments");
    assert_eq!(config.service.timeout_secs, 30);
}

#[test]
fn parse_unknown_keys_ignored() {
    let toml = r#"
unknown_top_level = "should be ignored"

[display]
label_plural = "runs"
"#;
    let config: AppConfig = toml::from_str(toml).unwrap();
    assert_eq!(config.display.label_plural, "runs");
    assert_eq!(config.display.label_singular, "experiment");
}

#[test]
fn parse_defaults() {
    let config: AppConfig = toml::from_str("").unwrap();
    assert_eq!(config.service.base_url, "http://localhost:8080");
    assert_eq!(config.service.token_env, "BULK_BOARD_TOKEN");
    assert_eq!(config.service.page_limit, 200);
    assert_eq!(config.permissions.policy, PolicyKind::Basic);
    assert!(config.permissions.workspace_roles.is_empty());
}

#[test]
fn parse_workspace_roles() {
    let config = fixture("global_config.toml");
    assert_eq!(config.permissions.policy, PolicyKind::WorkspaceRoles);
    assert_eq!(config.permissions.workspace_roles.get(&1), Some(&Role::Admin));
    assert_eq!(config.permissions.workspace_roles.get(&2), Some(&Role::Viewer));

    let view = config.permission_view();
    assert!(view.can_perform(BatchAction::Delete, PermissionScope::Workspace(WorkspaceId(1))));
    assert!(!view.can_perform(BatchAction::Archive, PermissionScope::Workspace(WorkspaceId(2))));
    assert!(view.can_perform(
        BatchAction::OpenSession,
        PermissionScope::Workspace(WorkspaceId(2))
    ));
    assert!(!view.can_perform(BatchAction::Archive, PermissionScope::Workspace(WorkspaceId(9))));
}

#[test]
fn invalid_workspace_key_is_rejected() {
    let toml = r#"
[permissions.workspace_roles]
main = "admin"
"#;
    let err = toml::from_str::<AppConfig>(toml).unwrap_err();
    assert!(err.to_string().contains("invalid workspace id"));
}

#[test]
fn unknown_role_is_rejected() {
    let toml = r#"
[permissions.workspace_roles]
1 = "owner"
"#;
    assert!(toml::from_str::<AppConfig>(toml).is_err());
}

#[test]
fn deny_all_policy_refuses_everything() {
    let config: AppConfig = toml::from_str("[permissions]\npolicy = \"deny_all\"").unwrap();
    let view = config.permission_view();
    for action in BatchAction::ALL {
        assert!(!view.can_perform(action, PermissionScope::Workspace(WorkspaceId(1))));
    }
}

#[test]
fn merge_local_over_global() {
    let merged = merge_configs(fixture("global_config.toml"), fixture("local_config.toml"));
    assert_eq!(merged.service.base_url, "http://localhost:9000");
    assert_eq!(merged.service.resource, "trials");
    assert_eq!(merged.service.page_limit, 50);
    assert_eq!(merged.display.label_plural, "trials");

    let roles = &merged.permissions.workspace_roles;
    assert_eq!(roles.get(&1), Some(&Role::Admin), "global-only entry kept");
    assert_eq!(roles.get(&2), Some(&Role::Editor), "local entry wins");
    assert_eq!(roles.get(&3), Some(&Role::Admin));
}

#[test]
fn load_explicit_path_from_tempdir() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[display]\nlabel_singular = \"job\"\nlabel_plural = \"jobs\"\n").unwrap();

    let config = load_config(Some(&path)).unwrap();
    assert_eq!(config.display.label_singular, "job");
    assert_eq!(config.display.label_plural, "jobs");
}

#[test]
fn load_reports_parse_errors_with_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.toml");
    std::fs::write(&path, "[service\nbase_url = 1").unwrap();

    let err = load_config(Some(&path)).unwrap_err();
    assert!(format!("{err:#}").contains("broken.toml"));
}

#[test]
fn load_missing_explicit_path_fails() {
    let dir = tempfile::tempdir().unwrap();
    assert!(load_config(Some(&dir.path().join("nope.toml"))).is_err());
}
