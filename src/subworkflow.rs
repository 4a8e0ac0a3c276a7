//! Boundary to the multi-step flows (relocation, log retention) that run
//! their own batched calls and report back which items they affected.

use std::sync::mpsc;
use std::time::Duration;

use tokio::sync::oneshot;

use crate::catalog::BatchAction;
use crate::engine::{ActionParams, BatchPayload, EngineHandle, Event, Request, Retention};
use crate::filter::FilterCriteria;
use crate::types::ItemId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubWorkflowKind {
    Relocate,
    ChangeLogRetention,
}

impl SubWorkflowKind {
    pub fn for_action(action: BatchAction) -> Option<Self> {
        match action {
            BatchAction::Relocate => Some(Self::Relocate),
            BatchAction::ChangeLogRetention => Some(Self::ChangeLogRetention),
            _ => None,
        }
    }

    pub fn action(self) -> BatchAction {
        match self {
            Self::Relocate => BatchAction::Relocate,
            Self::ChangeLogRetention => BatchAction::ChangeLogRetention,
        }
    }
}

/// What a sub-workflow is asked to act on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubWorkflowRequest {
    /// Managed, resolving ids of an explicit selection.
    pub item_ids: Vec<ItemId>,
    /// Exclusions of an "all except" selection.
    pub excluded_item_ids: Vec<ItemId>,
    /// Set for "all except" selections so the flow can re-resolve the
    /// collection server-side.
    pub filter: Option<FilterCriteria>,
}

impl SubWorkflowRequest {
    /// Payload for a batch call covering this request.
    pub fn payload(&self) -> BatchPayload {
        match &self.filter {
            Some(filter) => BatchPayload::Filtered {
                filter: filter.clone(),
                excluded: self.excluded_item_ids.clone(),
            },
            None => BatchPayload::Items(self.item_ids.clone()),
        }
    }
}

/// How a sub-workflow ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubWorkflowOutcome {
    /// The flow ran; these ids were changed.
    Applied(Vec<ItemId>),
    /// The operator backed out before anything was sent.
    Cancelled,
    /// The flow's batch call failed or never answered.
    Failed(String),
}

/// One-shot reply handle given to a sub-workflow.
///
/// Dropping it without calling `finish` counts as a cancel.
pub struct SubWorkflowCompletion {
    tx: oneshot::Sender<SubWorkflowOutcome>,
}

impl SubWorkflowCompletion {
    pub fn channel() -> (Self, oneshot::Receiver<SubWorkflowOutcome>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    /// Report the ids the flow successfully applied to.
    pub fn finish(self, successful: Vec<ItemId>) {
        let _ = self.tx.send(SubWorkflowOutcome::Applied(successful));
    }

    pub fn cancel(self) {
        let _ = self.tx.send(SubWorkflowOutcome::Cancelled);
    }

    /// Report that the flow's remote call did not go through.
    pub fn fail(self, message: impl Into<String>) {
        let _ = self.tx.send(SubWorkflowOutcome::Failed(message.into()));
    }
}

/// Opens sub-workflows on behalf of the coordinator.
pub trait SubWorkflowLauncher {
    fn open(
        &mut self,
        kind: SubWorkflowKind,
        request: SubWorkflowRequest,
        completion: SubWorkflowCompletion,
    );
}

// ---------------------------------------------------------------------------
// Headless launcher
// ---------------------------------------------------------------------------

/// Runs sub-workflows without a modal, using parameters chosen up front
/// (e.g. from command-line flags).
///
/// A flow whose parameter is missing is cancelled immediately.
pub struct HeadlessLauncher {
    engine: EngineHandle,
    pub destination_project_id: Option<u64>,
    pub retention: Option<Retention>,
    pub timeout: Duration,
}

impl HeadlessLauncher {
    pub fn new(engine: EngineHandle) -> Self {
        Self {
            engine,
            destination_project_id: None,
            retention: None,
            timeout: Duration::from_secs(60),
        }
    }

    fn params(&self, kind: SubWorkflowKind) -> Option<ActionParams> {
        match kind {
            SubWorkflowKind::Relocate => {
                self.destination_project_id
                    .map(|destination_project_id| ActionParams::Relocate {
                        destination_project_id,
                    })
            }
            SubWorkflowKind::ChangeLogRetention => self.retention.map(ActionParams::LogRetention),
        }
    }
}

impl SubWorkflowLauncher for HeadlessLauncher {
    fn open(
        &mut self,
        kind: SubWorkflowKind,
        request: SubWorkflowRequest,
        completion: SubWorkflowCompletion,
    ) {
        let Some(params) = self.params(kind) else {
            tracing::warn!("subworkflow: {kind:?} opened without parameters, cancelling");
            completion.cancel();
            return;
        };

        let action = kind.action();
        let (reply_tx, reply_rx) = mpsc::channel::<Event>();
        let sent = self.engine.send(Request::DispatchBatch {
            dispatch_id: 0,
            action,
            payload: request.payload(),
            params,
            reply_tx,
        });
        if !sent {
            tracing::warn!("subworkflow: engine is gone, failing {kind:?}");
            completion.fail("the batch engine is not running");
            return;
        }

        let timeout = self.timeout;
        std::thread::spawn(move || match reply_rx.recv_timeout(timeout) {
            Ok(Event::BatchCompleted { result, .. }) => {
                for failure in &result.failed {
                    tracing::debug!(
                        "subworkflow: {} skipped item {}: {}",
                        action.name(),
                        failure.id,
                        failure.reason
                    );
                }
                completion.finish(result.successful);
            }
            Ok(Event::BatchFailed { message, .. }) => {
                tracing::warn!("subworkflow: {} failed: {message}", action.name());
                completion.fail(message);
            }
            Ok(_) | Err(_) => {
                tracing::warn!("subworkflow: no reply for {}", action.name());
                completion.fail(format!(
                    "no reply within {}s; the batch may still be running",
                    timeout.as_secs()
                ));
            }
        });
    }
}
