use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::config::types::AppConfig;

/// Discover and load the app config.
///
/// Priority:
/// 1. `--config` flag (explicit path)
/// 2. `.bulk-board.toml` in the current Git repository root
/// 3. `$BULK_BOARD_CONFIG` environment variable
/// 4. `$XDG_CONFIG_HOME/bulk-board/config.toml`
/// 5. `~/.config/bulk-board/config.toml`
///
/// If both a global and a repo-local config exist, the repo-local `service`
/// and `display` sections replace their global counterparts; the permission
/// policy comes from the local file and workspace roles are merged (local
/// entries override matching global workspaces).
pub fn load_config(explicit_path: Option<&Path>) -> Result<AppConfig> {
    // If an explicit path was given, just load that.
    if let Some(path) = explicit_path {
        return read_config(path);
    }

    let global_path = find_global_config();
    let local_path = find_repo_local_config();

    let config = match (global_path, local_path) {
        (Some(global), Some(local)) => {
            // Parse global first, then overlay local.
            let global_cfg = read_config(&global)?;
            let local_cfg = read_config(&local)?;
            merge_configs(global_cfg, local_cfg)
        }
        (Some(path), None) | (None, Some(path)) => read_config(&path)?,
        (None, None) => {
            // No config found, use defaults.
            AppConfig::default()
        }
    };

    tracing::debug!(
        "config: service {} resource={}",
        config.service.base_url,
        config.service.resource
    );
    Ok(config)
}

fn read_config(path: &Path) -> Result<AppConfig> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    toml::from_str(&contents).with_context(|| format!("parsing TOML from {}", path.display()))
}

/// Merge repo-local config on top of global config.
pub fn merge_configs(global: AppConfig, local: AppConfig) -> AppConfig {
    let mut permissions = local.permissions;
    permissions.workspace_roles = {
        let mut roles = global.permissions.workspace_roles;
        roles.extend(permissions.workspace_roles);
        roles
    };
    AppConfig {
        service: local.service,
        display: local.display,
        permissions,
    }
}

fn find_repo_local_config() -> Option<PathBuf> {
    // Walk up from CWD looking for `.bulk-board.toml` next to a `.git` directory.
    let mut dir = std::env::current_dir().ok()?;
    loop {
        let candidate = dir.join(".bulk-board.toml");
        if candidate.is_file() {
            return Some(candidate);
        }
        if dir.join(".git").exists() {
            // Reached git root without finding config.
            return None;
        }
        if !dir.pop() {
            return None;
        }
    }
}

fn find_global_config() -> Option<PathBuf> {
    // $BULK_BOARD_CONFIG
    if let Ok(path) = std::env::var("BULK_BOARD_CONFIG") {
        let p = PathBuf::from(&path);
        if p.is_file() {
            return Some(p);
        }
    }

    // $XDG_CONFIG_HOME/bulk-board/config.toml
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        let p = PathBuf::from(xdg).join("bulk-board/config.toml");
        if p.is_file() {
            return Some(p);
        }
    }

    // ~/.config/bulk-board/config.toml
    if let Some(home) = home_dir() {
        let p = home.join(".config/bulk-board/config.toml");
        if p.is_file() {
            return Some(p);
        }
    }

    None
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
