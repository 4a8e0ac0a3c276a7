use std::collections::HashSet;

use crate::types::{ItemId, ItemLookup};

// ---------------------------------------------------------------------------
// Selection model
// ---------------------------------------------------------------------------

/// Which items of the filtered collection are targeted.
///
/// `Explicit` with no ids selects nothing; `AllExcept` with no exclusions
/// selects the whole collection, including rows that are not loaded yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Explicit(HashSet<ItemId>),
    AllExcept(HashSet<ItemId>),
}

impl Default for Selection {
    fn default() -> Self {
        Self::Explicit(HashSet::new())
    }
}

/// Targets of a selection once stale ids are dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedTargets {
    /// Included ids that resolve to a loaded item, in listing order.
    Items(Vec<ItemId>),
    /// Every item in the filtered collection except these ids.
    Everything { excluded: Vec<ItemId> },
}

impl Selection {
    pub fn explicit(ids: impl IntoIterator<Item = ItemId>) -> Self {
        Self::Explicit(ids.into_iter().collect())
    }

    pub fn all_except(ids: impl IntoIterator<Item = ItemId>) -> Self {
        Self::AllExcept(ids.into_iter().collect())
    }

    pub fn is_all_except(&self) -> bool {
        matches!(self, Self::AllExcept(_))
    }

    /// Flip one row's checkbox.
    pub fn toggle(&mut self, id: ItemId) {
        let set = match self {
            Self::Explicit(ids) | Self::AllExcept(ids) => ids,
        };
        if !set.remove(&id) {
            set.insert(id);
        }
    }

    pub fn select_all(&mut self) {
        *self = Self::AllExcept(HashSet::new());
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn is_selected(&self, id: ItemId) -> bool {
        match self {
            Self::Explicit(ids) => ids.contains(&id),
            Self::AllExcept(excluded) => !excluded.contains(&id),
        }
    }

    /// Drop `ids` from the selection, e.g. after a batch applied to them.
    pub fn deselect(&mut self, ids: &[ItemId]) {
        match self {
            Self::Explicit(included) => {
                for id in ids {
                    included.remove(id);
                }
            }
            Self::AllExcept(excluded) => excluded.extend(ids.iter().copied()),
        }
    }

    pub fn resolved_targets(&self, lookup: &ItemLookup) -> ResolvedTargets {
        match self {
            Self::Explicit(ids) => ResolvedTargets::Items(
                lookup
                    .iter()
                    .map(|item| item.id)
                    .filter(|id| ids.contains(id))
                    .collect(),
            ),
            Self::AllExcept(excluded) => {
                let mut excluded: Vec<ItemId> = excluded.iter().copied().collect();
                excluded.sort_unstable();
                ResolvedTargets::Everything { excluded }
            }
        }
    }

    /// Number of selected items, when it can be known.
    ///
    /// `AllExcept` is only countable once the service has reported the size
    /// of the filtered collection.
    pub fn selected_count(&self, lookup: &ItemLookup) -> Option<usize> {
        match self {
            Self::Explicit(ids) => Some(ids.iter().filter(|id| lookup.contains(**id)).count()),
            Self::AllExcept(excluded) => lookup
                .total()
                .map(|total| total.saturating_sub(known_exclusions(excluded, lookup))),
        }
    }

    /// True when nothing knowable is selected.
    pub fn is_empty(&self, lookup: &ItemLookup) -> bool {
        match self {
            Self::Explicit(ids) => !ids.iter().any(|id| lookup.contains(*id)),
            Self::AllExcept(excluded) => {
                known_exclusions(excluded, lookup) >= lookup.knowable_total()
            }
        }
    }
}

fn known_exclusions(excluded: &HashSet<ItemId>, lookup: &ItemLookup) -> usize {
    excluded.iter().filter(|id| lookup.contains(**id)).count()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
