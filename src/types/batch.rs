use serde::{Deserialize, Serialize};

use super::item::ItemId;

/// One item the service refused to act on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub id: ItemId,
    pub reason: String,
}

/// Per-item outcome of one batch dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    pub successful: Vec<ItemId>,
    pub failed: Vec<ItemFailure>,
}

impl BatchResult {
    /// Every id succeeded.
    pub fn all_ok(ids: impl IntoIterator<Item = ItemId>) -> Self {
        Self {
            successful: ids.into_iter().collect(),
            failed: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.successful.is_empty() && self.failed.is_empty()
    }

    /// Total number of ids the result accounts for.
    pub fn len(&self) -> usize {
        self.successful.len() + self.failed.len()
    }

    pub fn failed_ids(&self) -> impl Iterator<Item = ItemId> + '_ {
        self.failed.iter().map(|f| f.id)
    }
}
