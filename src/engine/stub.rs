use std::collections::HashMap;

use tokio::sync::mpsc::UnboundedReceiver;

use crate::types::{BatchResult, Item, ItemFailure, ItemId};

use super::interface::{BatchPayload, Engine, EngineHandle, Event, Request};

/// A stub engine that serves pre-loaded fixture data without any network calls.
///
/// Useful for integration tests and demos that must not require a running
/// service. Batches succeed for every targeted item except those listed in
/// `failures`; setting `transport_error` makes every batch call fail whole.
#[derive(Default)]
pub struct StubEngine {
    pub items: Vec<Item>,
    pub failures: HashMap<ItemId, String>,
    pub transport_error: Option<String>,
}

impl Engine for StubEngine {
    fn start(self) -> EngineHandle {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<Request>();
        std::thread::spawn(move || {
            let rt = tokio::runtime::Runtime::new().expect("stub tokio runtime");
            rt.block_on(self.run_loop(rx));
        });
        EngineHandle::new(tx)
    }
}

impl StubEngine {
    async fn run_loop(self, mut rx: UnboundedReceiver<Request>) {
        while let Some(req) = rx.recv().await {
            match req {
                Request::FetchItems {
                    filter,
                    limit,
                    reply_tx,
                } => {
                    let matching: Vec<Item> = self
                        .items
                        .iter()
                        .filter(|item| filter.matches(item))
                        .cloned()
                        .collect();
                    let total = matching.len();
                    let _ = reply_tx.send(Event::ItemsFetched {
                        items: matching.into_iter().take(limit).collect(),
                        total,
                    });
                }

                Request::DispatchBatch {
                    dispatch_id,
                    action,
                    reply_tx,
                    ..
                } if self.transport_error.is_some() => {
                    let _ = reply_tx.send(Event::BatchFailed {
                        dispatch_id,
                        action,
                        message: self.transport_error.clone().unwrap_or_default(),
                    });
                }

                Request::DispatchBatch {
                    dispatch_id,
                    action,
                    payload,
                    reply_tx,
                    ..
                } => {
                    let result = self.apply(&payload);
                    let _ = reply_tx.send(Event::BatchCompleted {
                        dispatch_id,
                        action,
                        result,
                    });
                }

                Request::Shutdown => break,
            }
        }
    }

    fn apply(&self, payload: &BatchPayload) -> BatchResult {
        let targets: Vec<ItemId> = match payload {
            BatchPayload::Items(ids) => ids.clone(),
            BatchPayload::Filtered { filter, excluded } => self
                .items
                .iter()
                .filter(|item| filter.matches(item) && !excluded.contains(&item.id))
                .map(|item| item.id)
                .collect(),
        };

        let mut result = BatchResult::default();
        for id in targets {
            let reason = match self.failures.get(&id) {
                Some(reason) => Some(reason.clone()),
                None if !self.items.iter().any(|item| item.id == id) => {
                    Some("not found".to_owned())
                }
                None => None,
            };
            match reason {
                Some(reason) => result.failed.push(ItemFailure { id, reason }),
                None => result.successful.push(id),
            }
        }
        result
    }
}
