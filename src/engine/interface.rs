use std::sync::mpsc::Sender;

use crate::catalog::BatchAction;
use crate::filter::FilterCriteria;
use crate::types::{BatchResult, Item, ItemId};

/// Correlates a dispatch with its reply.
pub type DispatchId = u64;

/// Handle to the backend engine held by the coordinator.
///
/// Cheaply cloneable. When the last handle is dropped the sender channel
/// closes, signalling the engine to shut down.
#[derive(Clone)]
pub struct EngineHandle {
    tx: tokio::sync::mpsc::UnboundedSender<Request>,
}

impl EngineHandle {
    pub(crate) fn new(tx: tokio::sync::mpsc::UnboundedSender<Request>) -> Self {
        Self { tx }
    }

    /// Send a request to the engine. Non-blocking.
    ///
    /// Returns `false` if the engine has already shut down.
    pub fn send(&self, req: Request) -> bool {
        self.tx.send(req).is_ok()
    }
}

/// Trait implemented by both `HttpEngine` and `StubEngine`.
pub trait Engine: Send + 'static {
    fn start(self) -> EngineHandle;
}

/// Which items a batch call targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchPayload {
    /// Concrete, already-pruned ids.
    Items(Vec<ItemId>),
    /// The service re-resolves `filter` and skips `excluded`.
    Filtered {
        filter: FilterCriteria,
        excluded: Vec<ItemId>,
    },
}

impl BatchPayload {
    pub fn item_ids(&self) -> Option<&[ItemId]> {
        match self {
            Self::Items(ids) => Some(ids),
            Self::Filtered { .. } => None,
        }
    }
}

/// Log retention period; `None` keeps logs forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retention {
    pub days: Option<u32>,
}

/// Extra arguments some actions carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActionParams {
    #[default]
    None,
    Relocate {
        destination_project_id: u64,
    },
    LogRetention(Retention),
}

/// All operations the coordinator and sub-workflows can send to the engine.
pub enum Request {
    // -----------------------------------------------------------------------
    // Fetch operations
    // -----------------------------------------------------------------------
    FetchItems {
        filter: FilterCriteria,
        limit: usize,
        reply_tx: Sender<Event>,
    },

    // -----------------------------------------------------------------------
    // Batch mutation
    // -----------------------------------------------------------------------
    DispatchBatch {
        dispatch_id: DispatchId,
        action: BatchAction,
        payload: BatchPayload,
        params: ActionParams,
        reply_tx: Sender<Event>,
    },

    // -----------------------------------------------------------------------
    // Control
    // -----------------------------------------------------------------------
    Shutdown,
}

/// All events the engine can push back.
#[derive(Debug)]
pub enum Event {
    // -----------------------------------------------------------------------
    // Fetch results
    // -----------------------------------------------------------------------
    ItemsFetched {
        items: Vec<Item>,
        /// Size of the whole filtered collection, not just this page.
        total: usize,
    },
    FetchError {
        context: String,
        message: String,
    },

    // -----------------------------------------------------------------------
    // Batch results
    // -----------------------------------------------------------------------
    /// The service answered with per-item outcomes.
    BatchCompleted {
        dispatch_id: DispatchId,
        action: BatchAction,
        result: BatchResult,
    },
    /// The call itself failed; no per-item data.
    BatchFailed {
        dispatch_id: DispatchId,
        action: BatchAction,
        message: String,
    },
}
