//! JSON shapes exchanged with the batch service.

use serde::{Deserialize, Serialize};

use crate::engine::{ActionParams, BatchPayload};
use crate::filter::FilterCriteria;
use crate::types::{BatchResult, Item, ItemFailure, ItemId};

/// Days value the service reads as "keep forever".
pub(crate) const RETAIN_FOREVER: i64 = -1;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct BulkRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_ids: Option<&'a [ItemId]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<&'a FilterCriteria>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub excluded_item_ids: Option<&'a [ItemId]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination_project_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_days: Option<i64>,
}

impl<'a> BulkRequest<'a> {
    pub(crate) fn new(payload: &'a BatchPayload, params: ActionParams) -> Self {
        let (item_ids, filter, excluded_item_ids) = match payload {
            BatchPayload::Items(ids) => (Some(ids.as_slice()), None, None),
            BatchPayload::Filtered { filter, excluded } => {
                (None, Some(filter), Some(excluded.as_slice()))
            }
        };
        let (destination_project_id, num_days) = match params {
            ActionParams::None => (None, None),
            ActionParams::Relocate {
                destination_project_id,
            } => (Some(destination_project_id), None),
            ActionParams::LogRetention(retention) => (
                None,
                Some(retention.days.map_or(RETAIN_FOREVER, i64::from)),
            ),
        };
        Self {
            item_ids,
            filter,
            excluded_item_ids,
            destination_project_id,
            num_days,
        }
    }
}

/// One entry of a bulk response; an empty `error` means success.
#[derive(Debug, Deserialize)]
pub(crate) struct ItemOutcome {
    pub id: ItemId,
    #[serde(default)]
    pub error: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct BulkResponse {
    #[serde(default)]
    pub results: Vec<ItemOutcome>,
}

impl From<BulkResponse> for BatchResult {
    fn from(resp: BulkResponse) -> Self {
        let mut result = BatchResult::default();
        for outcome in resp.results {
            if outcome.error.is_empty() {
                result.successful.push(outcome.id);
            } else {
                result.failed.push(ItemFailure {
                    id: outcome.id,
                    reason: outcome.error,
                });
            }
        }
        result
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct SearchRequest<'a> {
    pub filter: &'a FilterCriteria,
    pub limit: usize,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SearchResponse {
    #[serde(default)]
    pub items: Vec<Item>,
    pub total: Option<usize>,
}
