use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::BatchAction;
use crate::filter::FilterCriteria;
use crate::selection::Selection;
use crate::types::{Item, ItemLookup, RunState, WorkspaceId};

// ---------------------------------------------------------------------------
// Permission view
// ---------------------------------------------------------------------------

/// What a permission question is asked about.
#[derive(Debug, Clone, Copy)]
pub enum PermissionScope<'a> {
    Item(&'a Item),
    Workspace(WorkspaceId),
}

/// Synchronous capability check for the current actor.
///
/// Implementations answer from data that was fetched ahead of time; they
/// must never start I/O from inside `can_perform`.
pub trait PermissionView {
    fn can_perform(&self, action: BatchAction, scope: PermissionScope<'_>) -> bool;
}

/// Open-source default: every actor may do everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicPolicy;

impl PermissionView for BasicPolicy {
    fn can_perform(&self, _action: BatchAction, _scope: PermissionScope<'_>) -> bool {
        true
    }
}

/// Refuses everything. Stands in while permissions are still loading.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenyAll;

impl PermissionView for DenyAll {
    fn can_perform(&self, _action: BatchAction, _scope: PermissionScope<'_>) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Viewer,
    Editor,
    Admin,
}

impl Role {
    fn allows(self, action: BatchAction) -> bool {
        match self {
            Self::Viewer => action == BatchAction::OpenSession,
            Self::Editor => action != BatchAction::Delete,
            Self::Admin => true,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Viewer => "viewer",
            Self::Editor => "editor",
            Self::Admin => "admin",
        })
    }
}

#[derive(Debug, Error)]
#[error("invalid role \"{0}\" (expected viewer, editor or admin)")]
pub struct RoleParseError(pub String);

impl FromStr for Role {
    type Err = RoleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "viewer" => Ok(Self::Viewer),
            "editor" => Ok(Self::Editor),
            "admin" => Ok(Self::Admin),
            _ => Err(RoleParseError(s.to_owned())),
        }
    }
}

/// Per-workspace role assignments for the current actor.
///
/// A workspace missing from the map has not been loaded yet and grants
/// nothing.
#[derive(Debug, Clone, Default)]
pub struct WorkspaceRoles {
    roles: HashMap<WorkspaceId, Role>,
}

impl WorkspaceRoles {
    pub fn new(roles: HashMap<WorkspaceId, Role>) -> Self {
        Self { roles }
    }

    pub fn set(&mut self, workspace: WorkspaceId, role: Role) {
        self.roles.insert(workspace, role);
    }
}

impl PermissionView for WorkspaceRoles {
    fn can_perform(&self, action: BatchAction, scope: PermissionScope<'_>) -> bool {
        let workspace = match scope {
            PermissionScope::Item(item) => item.workspace_id,
            PermissionScope::Workspace(ws) => ws,
        };
        self.roles
            .get(&workspace)
            .is_some_and(|role| role.allows(action))
    }
}

// ---------------------------------------------------------------------------
// Item-state legality
// ---------------------------------------------------------------------------

/// Whether `item`'s own state allows `action`, ignoring who asks.
pub fn is_legal(action: BatchAction, item: &Item) -> bool {
    use RunState::{Active, Deleting, Paused, Queued, Stopping};

    let state = item.state;
    match action {
        BatchAction::Activate => !item.archived && state == Paused,
        BatchAction::Pause => !item.archived && matches!(state, Active | Queued),
        BatchAction::Cancel => !item.archived && matches!(state, Active | Paused | Queued),
        BatchAction::Kill => {
            !item.archived && matches!(state, Active | Paused | Queued | Stopping)
        }
        BatchAction::Archive => !item.archived && state.is_terminal(),
        BatchAction::Unarchive => item.archived && state.is_terminal(),
        BatchAction::Delete => state.is_terminal(),
        BatchAction::Relocate => !item.archived,
        BatchAction::OpenSession => item.managed && state != Deleting,
        BatchAction::ChangeLogRetention => !item.archived && state != Deleting,
    }
}

/// Item legality intersected with actor permission.
pub fn is_eligible(action: BatchAction, item: &Item, permissions: &dyn PermissionView) -> bool {
    is_legal(action, item) && permissions.can_perform(action, PermissionScope::Item(item))
}

// ---------------------------------------------------------------------------
// Available actions
// ---------------------------------------------------------------------------

/// Actions to offer for the current selection.
///
/// An action is offered when at least one selected item permits it; the
/// coordinator drops ineligible items from mixed selections at dispatch.
/// Pure: re-run on every change to selection, items or permissions.
pub fn available_actions(
    selection: &Selection,
    lookup: &ItemLookup,
    permissions: &dyn PermissionView,
    criteria: &FilterCriteria,
) -> BTreeSet<BatchAction> {
    if selection.is_empty(lookup) {
        return BTreeSet::new();
    }

    match selection {
        Selection::AllExcept(_) => BatchAction::ALL
            .into_iter()
            .filter(|action| !action.meta().requires_concrete_targets)
            .filter(|action| {
                criteria.workspace_id.is_none_or(|ws| {
                    permissions.can_perform(*action, PermissionScope::Workspace(ws))
                })
            })
            .collect(),
        Selection::Explicit(ids) => {
            let mut available = BTreeSet::new();
            for item in lookup.iter().filter(|item| ids.contains(&item.id)) {
                for action in BatchAction::ALL {
                    if !available.contains(&action) && is_eligible(action, item, permissions) {
                        available.insert(action);
                    }
                }
                if available.len() == BatchAction::ALL.len() {
                    break;
                }
            }
            available
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
