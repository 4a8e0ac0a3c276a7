use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Action catalog
// ---------------------------------------------------------------------------

/// Every batch action an operator can apply to a selection.
///
/// Declaration order is menu order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BatchAction {
    Activate,
    Pause,
    Cancel,
    Kill,
    Archive,
    Unarchive,
    Delete,
    Relocate,
    OpenSession,
    ChangeLogRetention,
}

/// Static per-action metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionMeta {
    /// Rendered with danger styling.
    pub destructive: bool,
    /// Must pass through a confirmation surface before dispatch.
    pub requires_confirmation: bool,
    /// Opens a sub-workflow instead of a direct batch call.
    pub delegates_to_subworkflow: bool,
    /// Needs a concrete item list up front, so it cannot target an
    /// "all except" selection.
    pub requires_concrete_targets: bool,
}

const CONFIRMED: ActionMeta = ActionMeta {
    destructive: false,
    requires_confirmation: true,
    delegates_to_subworkflow: false,
    requires_concrete_targets: false,
};

const CONFIRMED_DESTRUCTIVE: ActionMeta = ActionMeta {
    destructive: true,
    ..CONFIRMED
};

const DELEGATED: ActionMeta = ActionMeta {
    destructive: false,
    requires_confirmation: false,
    delegates_to_subworkflow: true,
    requires_concrete_targets: false,
};

const IMMEDIATE_CONCRETE: ActionMeta = ActionMeta {
    destructive: false,
    requires_confirmation: false,
    delegates_to_subworkflow: false,
    requires_concrete_targets: true,
};

impl BatchAction {
    pub const ALL: [BatchAction; 10] = [
        Self::Activate,
        Self::Pause,
        Self::Cancel,
        Self::Kill,
        Self::Archive,
        Self::Unarchive,
        Self::Delete,
        Self::Relocate,
        Self::OpenSession,
        Self::ChangeLogRetention,
    ];

    pub fn meta(self) -> ActionMeta {
        match self {
            Self::Activate | Self::Pause | Self::Archive | Self::Unarchive => CONFIRMED,
            Self::Cancel | Self::Kill | Self::Delete => CONFIRMED_DESTRUCTIVE,
            Self::Relocate | Self::ChangeLogRetention => DELEGATED,
            Self::OpenSession => IMMEDIATE_CONCRETE,
        }
    }

    /// Title-case label for menus and notification titles.
    pub fn label(self) -> &'static str {
        match self {
            Self::Activate => "Activate",
            Self::Pause => "Pause",
            Self::Cancel => "Cancel",
            Self::Kill => "Kill",
            Self::Archive => "Archive",
            Self::Unarchive => "Unarchive",
            Self::Delete => "Delete",
            Self::Relocate => "Move",
            Self::OpenSession => "Open Session",
            Self::ChangeLogRetention => "Retain Logs",
        }
    }

    /// Lowercase form used inside sentences ("Unable to kill 3 ...").
    pub fn verb(self) -> &'static str {
        match self {
            Self::Activate => "activate",
            Self::Pause => "pause",
            Self::Cancel => "cancel",
            Self::Kill => "kill",
            Self::Archive => "archive",
            Self::Unarchive => "unarchive",
            Self::Delete => "delete",
            Self::Relocate => "move",
            Self::OpenSession => "open a session for",
            Self::ChangeLogRetention => "change log retention for",
        }
    }

    pub fn past_tense(self) -> &'static str {
        match self {
            Self::Activate => "activated",
            Self::Pause => "paused",
            Self::Cancel => "canceled",
            Self::Kill => "killed",
            Self::Archive => "archived",
            Self::Unarchive => "unarchived",
            Self::Delete => "deleted",
            Self::Relocate => "moved",
            Self::OpenSession => "opened",
            Self::ChangeLogRetention => "updated",
        }
    }

    /// Path segment of the service endpoint.
    pub fn route(self) -> &'static str {
        match self {
            Self::Activate => "activate",
            Self::Pause => "pause",
            Self::Cancel => "cancel",
            Self::Kill => "kill",
            Self::Archive => "archive",
            Self::Unarchive => "unarchive",
            Self::Delete => "delete",
            Self::Relocate => "move",
            Self::OpenSession => "sessions",
            Self::ChangeLogRetention => "retain_logs",
        }
    }

    /// Name accepted on the command line, matching the serde form.
    pub fn name(self) -> &'static str {
        match self {
            Self::Activate => "activate",
            Self::Pause => "pause",
            Self::Cancel => "cancel",
            Self::Kill => "kill",
            Self::Archive => "archive",
            Self::Unarchive => "unarchive",
            Self::Delete => "delete",
            Self::Relocate => "relocate",
            Self::OpenSession => "open-session",
            Self::ChangeLogRetention => "change-log-retention",
        }
    }
}

impl fmt::Display for BatchAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Error)]
#[error("unknown batch action \"{0}\"")]
pub struct ParseActionError(pub String);

impl FromStr for BatchAction {
    type Err = ParseActionError;

    /// Accepts kebab or snake case (`open-session`, `open_session`), plus
    /// `move` as an alias for relocate.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('_', "-");
        if normalized == "move" {
            return Ok(Self::Relocate);
        }
        Self::ALL
            .into_iter()
            .find(|action| action.name() == normalized)
            .ok_or_else(|| ParseActionError(s.to_owned()))
    }
}
