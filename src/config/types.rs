use std::collections::BTreeMap;

use serde::Deserialize;

use crate::eligibility::{BasicPolicy, DenyAll, PermissionView, Role, WorkspaceRoles};
use crate::types::WorkspaceId;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub service: ServiceConfig,
    pub display: DisplayConfig,
    pub permissions: PermissionsConfig,
}

impl AppConfig {
    /// Build the configured permission policy.
    pub fn permission_view(&self) -> Box<dyn PermissionView> {
        match self.permissions.policy {
            PolicyKind::Basic => Box::new(BasicPolicy),
            PolicyKind::DenyAll => Box::new(DenyAll),
            PolicyKind::WorkspaceRoles => Box::new(WorkspaceRoles::new(
                self.permissions
                    .workspace_roles
                    .iter()
                    .map(|(ws, role)| (WorkspaceId(*ws), *role))
                    .collect(),
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub base_url: String,
    /// Collection name in endpoint paths, e.g. `/api/v1/experiments/archive`.
    pub resource: String,
    /// Environment variable holding the bearer token.
    pub token_env: String,
    pub timeout_secs: u64,
    /// Maximum number of items loaded per listing fetch.
    pub page_limit: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_owned(),
            resource: "experiments".to_owned(),
            token_env: "BULK_BOARD_TOKEN".to_owned(),
            timeout_secs: 30,
            page_limit: 200,
        }
    }
}

// ---------------------------------------------------------------------------
// Display
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub label_singular: String,
    pub label_plural: String,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            label_singular: "experiment".to_owned(),
            label_plural: "experiments".to_owned(),
        }
    }
}

// ---------------------------------------------------------------------------
// Permissions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    #[default]
    Basic,
    WorkspaceRoles,
    DenyAll,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PermissionsConfig {
    pub policy: PolicyKind,
    /// Workspace id → role of the current actor.
    #[serde(deserialize_with = "role_map::deserialize")]
    pub workspace_roles: BTreeMap<u32, Role>,
}

/// TOML table keys are always strings; parse them as workspace ids.
pub(crate) mod role_map {
    use std::collections::BTreeMap;

    use serde::{Deserialize, Deserializer};

    use crate::eligibility::Role;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<BTreeMap<u32, Role>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: BTreeMap<String, Role> = BTreeMap::deserialize(deserializer)?;
        raw.into_iter()
            .map(|(key, role)| {
                key.parse::<u32>().map(|ws| (ws, role)).map_err(|_| {
                    serde::de::Error::custom(format!("invalid workspace id \"{key}\""))
                })
            })
            .collect()
    }
}
