use std::fmt;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Stable identifier of a listed item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub u64);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ItemId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkspaceId(pub u32);

impl fmt::Display for WorkspaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Queued,
    Active,
    Paused,
    Stopping,
    Completed,
    Canceled,
    Errored,
    Deleting,
    DeleteFailed,
    #[serde(other)]
    Unknown,
}

impl RunState {
    /// States from which the item will never run again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Canceled | Self::Errored | Self::DeleteFailed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Stopping => "stopping",
            Self::Completed => "completed",
            Self::Canceled => "canceled",
            Self::Errored => "errored",
            Self::Deleting => "deleting",
            Self::DeleteFailed => "delete_failed",
            Self::Unknown => "unknown",
        }
    }

    /// Parse the lowercase name used in filter queries.
    pub fn from_query(s: &str) -> Option<Self> {
        Some(match s.to_lowercase().as_str() {
            "queued" => Self::Queued,
            "active" | "running" => Self::Active,
            "paused" => Self::Paused,
            "stopping" => Self::Stopping,
            "completed" => Self::Completed,
            "canceled" | "cancelled" => Self::Canceled,
            "errored" | "error" => Self::Errored,
            "deleting" => Self::Deleting,
            "delete_failed" => Self::DeleteFailed,
            _ => return None,
        })
    }
}

// ---------------------------------------------------------------------------
// Item
// ---------------------------------------------------------------------------

fn default_managed() -> bool {
    true
}

/// A listed unit that batch actions apply to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: ItemId,
    #[serde(default)]
    pub name: String,
    /// Unmanaged items are tracked by the service but their lifecycle is
    /// driven from outside it; they never go into a remote batch call.
    #[serde(default = "default_managed")]
    pub managed: bool,
    pub workspace_id: WorkspaceId,
    #[serde(default)]
    pub project_id: Option<u64>,
    pub state: RunState,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Lookup
// ---------------------------------------------------------------------------

/// Snapshot of the currently loaded items, keyed by id in listing order.
///
/// `total` is the size of the whole filtered collection as reported by the
/// service, which may exceed the number of loaded items.
#[derive(Debug, Clone, Default)]
pub struct ItemLookup {
    items: IndexMap<ItemId, Item>,
    total: Option<usize>,
}

impl ItemLookup {
    pub fn new(items: impl IntoIterator<Item = Item>) -> Self {
        Self {
            items: items.into_iter().map(|item| (item.id, item)).collect(),
            total: None,
        }
    }

    /// Record the server-reported size of the filtered collection.
    pub fn with_total(mut self, total: usize) -> Self {
        self.total = Some(total);
        self
    }

    pub fn get(&self, id: ItemId) -> Option<&Item> {
        self.items.get(&id)
    }

    pub fn contains(&self, id: ItemId) -> bool {
        self.items.contains_key(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Item> {
        self.items.values()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn total(&self) -> Option<usize> {
        self.total
    }

    /// Number of items that are known to exist: the reported total when
    /// present, otherwise what has been loaded.
    pub fn knowable_total(&self) -> usize {
        self.total.unwrap_or(self.items.len()).max(self.items.len())
    }
}
