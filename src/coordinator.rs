//! Dispatch & confirmation state machine for batch actions.
//!
//! The coordinator lives on the UI thread. It owns the current selection and
//! at most one in-flight batch call; replies come back over a channel and are
//! drained with [`Coordinator::poll`] or [`Coordinator::wait`].

use std::collections::BTreeSet;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::oneshot::{self, error::TryRecvError};

use crate::aggregate::{self, Expectation, Summary};
use crate::catalog::{ActionMeta, BatchAction};
use crate::eligibility::{self, PermissionView};
use crate::engine::{ActionParams, BatchPayload, DispatchId, EngineHandle, Event, Request};
use crate::filter::FilterCriteria;
use crate::notify::{BatchObserver, NotificationSink};
use crate::selection::{ResolvedTargets, Selection};
use crate::subworkflow::{
    SubWorkflowCompletion, SubWorkflowKind, SubWorkflowLauncher, SubWorkflowOutcome,
    SubWorkflowRequest,
};
use crate::types::{BatchResult, ItemId, ItemLookup};

// ---------------------------------------------------------------------------
// Inputs and outputs
// ---------------------------------------------------------------------------

/// Read-only snapshots consulted when an action is chosen.
#[derive(Clone, Copy)]
pub struct DecisionContext<'a> {
    pub lookup: &'a ItemLookup,
    pub permissions: &'a dyn PermissionView,
}

/// Where a chosen action goes next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Delegate,
    Confirm,
    Dispatch,
}

/// Transition out of routing, decided by static metadata alone.
pub fn route(meta: ActionMeta) -> Route {
    if meta.delegates_to_subworkflow {
        Route::Delegate
    } else if meta.requires_confirmation {
        Route::Confirm
    } else {
        Route::Dispatch
    }
}

/// Content of the confirmation surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationPrompt {
    pub action: BatchAction,
    pub title: String,
    pub body: String,
    pub destructive: bool,
    /// Items that will actually be sent, when known client-side.
    pub target_count: Option<usize>,
    /// Selected unmanaged items that will be left out.
    pub skipped_unmanaged: usize,
    /// Selected items whose state or permissions do not allow the action.
    pub skipped_ineligible: usize,
}

/// Result of choosing or confirming an action.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Delegated(SubWorkflowKind),
    AwaitingConfirmation(ConfirmationPrompt),
    Dispatching(DispatchId),
    /// Resolved without waiting, e.g. nothing was eligible.
    Finished(Finished),
}

/// A batch that reached its end.
#[derive(Debug, Clone, PartialEq)]
pub enum Finished {
    Aggregated {
        action: BatchAction,
        summary: Summary,
    },
    TransportFailed {
        action: BatchAction,
        message: String,
    },
    SubWorkflowCancelled {
        action: BatchAction,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordinatorError {
    #[error("a {} batch is already in flight", .0.name())]
    Busy(BatchAction),
    #[error("{} is waiting for confirmation", .0.name())]
    ConfirmationPending(BatchAction),
    #[error("nothing is selected")]
    EmptySelection,
    #[error("{} is not available for the current selection", .0.name())]
    NotAvailable(BatchAction),
    #[error("no action is waiting for confirmation")]
    NothingToConfirm,
}

/// Observable machine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    AwaitingConfirmation(BatchAction),
    Dispatching(BatchAction),
}

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct PreparedBatch {
    action: BatchAction,
    payload: BatchPayload,
    expectation: Expectation,
}

enum State {
    Idle,
    AwaitingConfirmation(PreparedBatch),
    Dispatching {
        dispatch_id: DispatchId,
        action: BatchAction,
        expectation: Expectation,
    },
}

struct PendingDelegation {
    action: BatchAction,
    expectation: Expectation,
    rx: oneshot::Receiver<SubWorkflowOutcome>,
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

pub struct Coordinator {
    engine: EngineHandle,
    reply_tx: Sender<Event>,
    reply_rx: Receiver<Event>,
    launcher: Box<dyn SubWorkflowLauncher>,
    sink: Box<dyn NotificationSink>,
    observer: Box<dyn BatchObserver>,
    label_plural: String,
    selection: Selection,
    criteria: FilterCriteria,
    state: State,
    next_dispatch_id: DispatchId,
    delegations: Vec<PendingDelegation>,
}

impl Coordinator {
    pub fn new(
        engine: EngineHandle,
        launcher: Box<dyn SubWorkflowLauncher>,
        sink: Box<dyn NotificationSink>,
        observer: Box<dyn BatchObserver>,
    ) -> Self {
        let (reply_tx, reply_rx) = mpsc::channel();
        Self {
            engine,
            reply_tx,
            reply_rx,
            launcher,
            sink,
            observer,
            label_plural: "items".to_owned(),
            selection: Selection::default(),
            criteria: FilterCriteria::default(),
            state: State::Idle,
            next_dispatch_id: 1,
            delegations: Vec::new(),
        }
    }

    /// Plural noun used in notifications ("experiments").
    pub fn with_label_plural(mut self, label: impl Into<String>) -> Self {
        self.label_plural = label.into();
        self
    }

    pub fn phase(&self) -> Phase {
        match &self.state {
            State::Idle => Phase::Idle,
            State::AwaitingConfirmation(batch) => Phase::AwaitingConfirmation(batch.action),
            State::Dispatching { action, .. } => Phase::Dispatching(*action),
        }
    }

    /// Sub-workflows opened but not yet reported back.
    pub fn pending_subworkflows(&self) -> usize {
        self.delegations.len()
    }

    // -----------------------------------------------------------------------
    // Selection (driven by UI events)
    // -----------------------------------------------------------------------

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn set_selection(&mut self, selection: Selection) {
        self.selection = selection;
    }

    pub fn toggle(&mut self, id: ItemId) {
        self.selection.toggle(id);
    }

    pub fn select_all(&mut self) {
        self.selection.select_all();
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    pub fn criteria(&self) -> &FilterCriteria {
        &self.criteria
    }

    /// Change the query defining the listed collection. A different query
    /// resets the selection.
    pub fn set_criteria(&mut self, criteria: FilterCriteria) {
        if criteria != self.criteria {
            tracing::debug!("coordinator: filter changed, resetting selection");
            self.criteria = criteria;
            self.selection.clear();
        }
    }

    /// Actions to offer for the current selection.
    pub fn available_actions(&self, ctx: DecisionContext<'_>) -> BTreeSet<BatchAction> {
        eligibility::available_actions(&self.selection, ctx.lookup, ctx.permissions, &self.criteria)
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    /// The operator picked `action` from the menu.
    pub fn request_action(
        &mut self,
        action: BatchAction,
        ctx: DecisionContext<'_>,
    ) -> Result<Outcome, CoordinatorError> {
        match &self.state {
            State::Dispatching { action: busy, .. } => {
                tracing::debug!(
                    "coordinator: refusing {} while {} is in flight",
                    action.name(),
                    busy.name()
                );
                return Err(CoordinatorError::Busy(*busy));
            }
            State::AwaitingConfirmation(batch) => {
                return Err(CoordinatorError::ConfirmationPending(batch.action));
            }
            State::Idle => {}
        }
        if self.selection.is_empty(ctx.lookup) {
            return Err(CoordinatorError::EmptySelection);
        }
        if !self.available_actions(ctx).contains(&action) {
            return Err(CoordinatorError::NotAvailable(action));
        }

        let route = route(action.meta());
        tracing::debug!("coordinator: {} routed to {route:?}", action.name());
        match route {
            Route::Delegate => self.delegate(action, ctx),
            Route::Confirm => {
                let (batch, prompt) = self.prepare(action, ctx);
                self.state = State::AwaitingConfirmation(batch);
                Ok(Outcome::AwaitingConfirmation(prompt))
            }
            Route::Dispatch => {
                let (batch, _) = self.prepare(action, ctx);
                Ok(self.dispatch(batch))
            }
        }
    }

    /// The operator accepted the confirmation surface.
    pub fn confirm(&mut self) -> Result<Outcome, CoordinatorError> {
        match std::mem::replace(&mut self.state, State::Idle) {
            State::AwaitingConfirmation(batch) => Ok(self.dispatch(batch)),
            other => {
                let err = match &other {
                    State::Dispatching { action, .. } => CoordinatorError::Busy(*action),
                    _ => CoordinatorError::NothingToConfirm,
                };
                self.state = other;
                Err(err)
            }
        }
    }

    /// The operator dismissed the confirmation surface. Nothing is sent and
    /// nothing is reported.
    pub fn cancel(&mut self) -> Result<(), CoordinatorError> {
        match &self.state {
            State::AwaitingConfirmation(batch) => {
                tracing::debug!("coordinator: {} cancelled", batch.action.name());
                self.state = State::Idle;
                Ok(())
            }
            State::Dispatching { action, .. } => Err(CoordinatorError::Busy(*action)),
            State::Idle => Err(CoordinatorError::NothingToConfirm),
        }
    }

    fn delegate(
        &mut self,
        action: BatchAction,
        ctx: DecisionContext<'_>,
    ) -> Result<Outcome, CoordinatorError> {
        let kind = SubWorkflowKind::for_action(action)
            .ok_or(CoordinatorError::NotAvailable(action))?;

        let (request, expectation) = match self.selection.resolved_targets(ctx.lookup) {
            ResolvedTargets::Items(ids) => {
                let managed: Vec<ItemId> = ids
                    .into_iter()
                    .filter(|id| ctx.lookup.get(*id).is_some_and(|item| item.managed))
                    .collect();
                if managed.is_empty() {
                    tracing::debug!("coordinator: no managed ids for {}", action.name());
                    let summary =
                        self.complete(action, &BatchResult::default(), &Expectation::Exact(managed));
                    return Ok(Outcome::Finished(Finished::Aggregated { action, summary }));
                }
                (
                    SubWorkflowRequest {
                        item_ids: managed.clone(),
                        ..SubWorkflowRequest::default()
                    },
                    Expectation::Within(managed),
                )
            }
            ResolvedTargets::Everything { excluded } => (
                SubWorkflowRequest {
                    item_ids: Vec::new(),
                    excluded_item_ids: excluded.clone(),
                    filter: Some(self.managed_criteria()),
                },
                Expectation::Open { excluded },
            ),
        };

        tracing::debug!(
            "coordinator: opening {kind:?} for {} ids",
            request.item_ids.len()
        );
        let (completion, rx) = SubWorkflowCompletion::channel();
        self.delegations.push(PendingDelegation {
            action,
            expectation,
            rx,
        });
        self.launcher.open(kind, request, completion);
        Ok(Outcome::Delegated(kind))
    }

    /// Resolve the selection into a payload for `action`, dropping stale,
    /// unmanaged and ineligible items.
    fn prepare(
        &self,
        action: BatchAction,
        ctx: DecisionContext<'_>,
    ) -> (PreparedBatch, ConfirmationPrompt) {
        let meta = action.meta();
        let label = &self.label_plural;

        let (batch, target_count, skipped_unmanaged, skipped_ineligible) =
            match self.selection.resolved_targets(ctx.lookup) {
                ResolvedTargets::Items(ids) => {
                    let mut eligible = Vec::with_capacity(ids.len());
                    let mut unmanaged = 0;
                    let mut ineligible = 0;
                    for item in ids.iter().filter_map(|id| ctx.lookup.get(*id)) {
                        if !item.managed {
                            unmanaged += 1;
                        } else if !eligibility::is_eligible(action, item, ctx.permissions) {
                            ineligible += 1;
                        } else {
                            eligible.push(item.id);
                        }
                    }
                    let count = eligible.len();
                    let batch = PreparedBatch {
                        action,
                        payload: BatchPayload::Items(eligible.clone()),
                        expectation: Expectation::Exact(eligible),
                    };
                    (batch, Some(count), unmanaged, ineligible)
                }
                ResolvedTargets::Everything { excluded } => {
                    let unmanaged = ctx
                        .lookup
                        .iter()
                        .filter(|item| !item.managed && self.selection.is_selected(item.id))
                        .count();
                    let count = self.selection.selected_count(ctx.lookup);
                    let batch = PreparedBatch {
                        action,
                        payload: BatchPayload::Filtered {
                            filter: self.managed_criteria(),
                            excluded: excluded.clone(),
                        },
                        expectation: Expectation::Open { excluded },
                    };
                    (batch, count, unmanaged, 0)
                }
            };

        let mut body = match (&batch.payload, target_count) {
            (BatchPayload::Items(_), Some(n)) => format!(
                "Are you sure you want to {} {n} selected {label}?",
                action.verb()
            ),
            (BatchPayload::Filtered { excluded, .. }, _) if !excluded.is_empty() => format!(
                "Are you sure you want to {} all {label} matching the current filter except {}?",
                action.verb(),
                excluded.len()
            ),
            _ => format!(
                "Are you sure you want to {} all {label} matching the current filter?",
                action.verb()
            ),
        };
        if skipped_unmanaged > 0 {
            body.push_str(&format!(
                " {skipped_unmanaged} unmanaged {label} will be skipped."
            ));
        }
        if skipped_ineligible > 0 {
            body.push_str(&format!(
                " {skipped_ineligible} selected {label} cannot be {} and will be skipped.",
                action.past_tense()
            ));
        }

        let prompt = ConfirmationPrompt {
            action,
            title: format!("Confirm Batch {}", action.label()),
            body,
            destructive: meta.destructive,
            target_count,
            skipped_unmanaged,
            skipped_ineligible,
        };
        (batch, prompt)
    }

    /// The filter sent for "all except" batches; the service must skip
    /// unmanaged items.
    fn managed_criteria(&self) -> FilterCriteria {
        FilterCriteria {
            managed_only: true,
            ..self.criteria.clone()
        }
    }

    fn dispatch(&mut self, batch: PreparedBatch) -> Outcome {
        let PreparedBatch {
            action,
            payload,
            expectation,
        } = batch;

        if payload.item_ids().is_some_and(|ids| ids.is_empty()) {
            tracing::debug!("coordinator: no eligible ids for {}", action.name());
            self.state = State::Idle;
            let summary = self.complete(action, &BatchResult::default(), &expectation);
            return Outcome::Finished(Finished::Aggregated { action, summary });
        }

        let dispatch_id = self.next_dispatch_id;
        self.next_dispatch_id += 1;
        let sent = self.engine.send(Request::DispatchBatch {
            dispatch_id,
            action,
            payload,
            params: ActionParams::None,
            reply_tx: self.reply_tx.clone(),
        });
        if !sent {
            self.state = State::Idle;
            let message = "the batch engine is not running".to_owned();
            self.fail(action, &message);
            return Outcome::Finished(Finished::TransportFailed { action, message });
        }

        tracing::debug!("coordinator: dispatched #{dispatch_id} {}", action.name());
        self.state = State::Dispatching {
            dispatch_id,
            action,
            expectation,
        };
        Outcome::Dispatching(dispatch_id)
    }

    // -----------------------------------------------------------------------
    // Completion
    // -----------------------------------------------------------------------

    /// Feed one engine event. Events for other dispatches are ignored.
    pub fn handle_event(&mut self, event: Event) -> Option<Finished> {
        let (dispatch_id, outcome) = match event {
            Event::BatchCompleted {
                dispatch_id,
                result,
                ..
            } => (dispatch_id, Ok(result)),
            Event::BatchFailed {
                dispatch_id,
                message,
                ..
            } => (dispatch_id, Err(message)),
            Event::ItemsFetched { .. } | Event::FetchError { .. } => return None,
        };

        let in_flight = matches!(
            &self.state,
            State::Dispatching { dispatch_id: current, .. } if *current == dispatch_id
        );
        if !in_flight {
            tracing::debug!("coordinator: ignoring reply for stale dispatch #{dispatch_id}");
            return None;
        }
        let State::Dispatching {
            action,
            expectation,
            ..
        } = std::mem::replace(&mut self.state, State::Idle)
        else {
            return None;
        };

        Some(match outcome {
            Ok(result) => {
                let summary = self.complete(action, &result, &expectation);
                Finished::Aggregated { action, summary }
            }
            Err(message) => {
                self.fail(action, &message);
                Finished::TransportFailed { action, message }
            }
        })
    }

    /// Drain ready engine replies and sub-workflow completions without
    /// blocking.
    pub fn poll(&mut self) -> Vec<Finished> {
        let mut finished = Vec::new();
        while let Ok(event) = self.reply_rx.try_recv() {
            finished.extend(self.handle_event(event));
        }
        finished.extend(self.poll_delegations());
        finished
    }

    /// Block until nothing is in flight and every sub-workflow has reported,
    /// or until `timeout` elapses.
    pub fn wait(&mut self, timeout: Duration) -> Vec<Finished> {
        let deadline = Instant::now() + timeout;
        let mut finished = self.poll();
        loop {
            let dispatching = matches!(self.state, State::Dispatching { .. });
            if !dispatching && self.delegations.is_empty() {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                tracing::debug!("coordinator: wait timed out");
                break;
            }
            let slice = (deadline - now).min(Duration::from_millis(50));
            if dispatching {
                match self.reply_rx.recv_timeout(slice) {
                    Ok(event) => finished.extend(self.handle_event(event)),
                    Err(RecvTimeoutError::Timeout) => {}
                    // Unreachable while we hold `reply_tx`.
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            } else {
                std::thread::sleep(slice.min(Duration::from_millis(10)));
            }
            finished.extend(self.poll());
        }
        finished
    }

    fn poll_delegations(&mut self) -> Vec<Finished> {
        let mut ready = Vec::new();
        let mut still_open = Vec::with_capacity(self.delegations.len());
        for mut pending in std::mem::take(&mut self.delegations) {
            match pending.rx.try_recv() {
                Ok(outcome) => ready.push((pending.action, pending.expectation, outcome)),
                Err(TryRecvError::Closed) => ready.push((
                    pending.action,
                    pending.expectation,
                    SubWorkflowOutcome::Cancelled,
                )),
                Err(TryRecvError::Empty) => still_open.push(pending),
            }
        }
        self.delegations = still_open;

        ready
            .into_iter()
            .map(|(action, expectation, outcome)| match outcome {
                SubWorkflowOutcome::Applied(ids) => {
                    let summary = self.complete(action, &BatchResult::all_ok(ids), &expectation);
                    Finished::Aggregated { action, summary }
                }
                SubWorkflowOutcome::Cancelled => {
                    tracing::debug!("coordinator: {} sub-workflow cancelled", action.name());
                    Finished::SubWorkflowCancelled { action }
                }
                SubWorkflowOutcome::Failed(message) => {
                    self.fail(action, &message);
                    Finished::TransportFailed { action, message }
                }
            })
            .collect()
    }

    fn complete(
        &mut self,
        action: BatchAction,
        result: &BatchResult,
        expectation: &Expectation,
    ) -> Summary {
        let summary = aggregate::summarize(action, result, expectation, &self.label_plural);
        tracing::debug!(
            "coordinator: {} finished ok={} failed={}",
            action.name(),
            result.successful.len(),
            result.failed.len()
        );
        self.sink.notify(summary.notification.clone());
        self.selection.deselect(&summary.successful);
        self.observer.on_batch_complete(action, &summary.successful);
        summary
    }

    fn fail(&mut self, action: BatchAction, message: &str) {
        tracing::debug!("coordinator: {} failed: {message}", action.name());
        self.sink.notify(aggregate::transport_failure(
            action,
            message,
            &self.label_plural,
        ));
        self.observer.on_batch_complete(action, &[]);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};

    use super::*;
    use crate::eligibility::{BasicPolicy, Role, WorkspaceRoles};
    use crate::notify::{NoticeKind, NotificationLog, Severity};
    use crate::types::{Item, ItemFailure, RunState, WorkspaceId};

    type Calls = Rc<RefCell<Vec<(BatchAction, Vec<ItemId>)>>>;
    type Opened = Rc<RefCell<Vec<(SubWorkflowKind, SubWorkflowRequest, SubWorkflowCompletion)>>>;

    struct RecordingLauncher(Opened);

    impl SubWorkflowLauncher for RecordingLauncher {
        fn open(
            &mut self,
            kind: SubWorkflowKind,
            request: SubWorkflowRequest,
            completion: SubWorkflowCompletion,
        ) {
            self.0.borrow_mut().push((kind, request, completion));
        }
    }

    struct Harness {
        coordinator: Coordinator,
        engine_rx: UnboundedReceiver<Request>,
        log: NotificationLog,
        calls: Calls,
        opened: Opened,
    }

    fn harness() -> Harness {
        let (tx, engine_rx) = unbounded_channel();
        let log = NotificationLog::new();
        let calls: Calls = Rc::default();
        let opened: Opened = Rc::default();
        let hook_calls = Rc::clone(&calls);
        let coordinator = Coordinator::new(
            EngineHandle::new(tx),
            Box::new(RecordingLauncher(Rc::clone(&opened))),
            Box::new(log.clone()),
            Box::new(move |action: BatchAction, ids: &[ItemId]| {
                hook_calls.borrow_mut().push((action, ids.to_vec()));
            }),
        )
        .with_label_plural("experiments");
        Harness {
            coordinator,
            engine_rx,
            log,
            calls,
            opened,
        }
    }

    fn item(id: u64, state: RunState, managed: bool) -> Item {
        Item {
            id: ItemId(id),
            name: format!("exp-{id}"),
            managed,
            workspace_id: WorkspaceId(1),
            project_id: Some(1),
            state,
            archived: false,
            owner: "alice".to_owned(),
            started_at: None,
        }
    }

    fn ids(raw: &[u64]) -> Vec<ItemId> {
        raw.iter().copied().map(ItemId).collect()
    }

    fn ctx(lookup: &ItemLookup) -> DecisionContext<'_> {
        DecisionContext {
            lookup,
            permissions: &BasicPolicy,
        }
    }

    /// Pull the single dispatched request off the engine channel.
    fn take_dispatch(rx: &mut UnboundedReceiver<Request>) -> (DispatchId, BatchAction, BatchPayload) {
        match rx.try_recv() {
            Ok(Request::DispatchBatch {
                dispatch_id,
                action,
                payload,
                ..
            }) => (dispatch_id, action, payload),
            _ => panic!("expected a DispatchBatch request"),
        }
    }

    #[test]
    fn route_follows_metadata() {
        assert_eq!(route(BatchAction::Relocate.meta()), Route::Delegate);
        assert_eq!(route(BatchAction::Kill.meta()), Route::Confirm);
        assert_eq!(route(BatchAction::OpenSession.meta()), Route::Dispatch);
    }

    #[test]
    fn explicit_archive_success_scenario() {
        let mut h = harness();
        let lookup = ItemLookup::new([
            item(7, RunState::Completed, true),
            item(8, RunState::Completed, true),
        ]);
        h.coordinator.set_selection(Selection::explicit(ids(&[7, 8])));

        let outcome = h
            .coordinator
            .request_action(BatchAction::Archive, ctx(&lookup))
            .unwrap();
        let Outcome::AwaitingConfirmation(prompt) = outcome else {
            panic!("archive must be confirmed");
        };
        assert_eq!(prompt.target_count, Some(2));
        assert!(h.engine_rx.try_recv().is_err(), "nothing sent before confirm");

        assert!(matches!(h.coordinator.confirm().unwrap(), Outcome::Dispatching(_)));
        let (dispatch_id, action, payload) = take_dispatch(&mut h.engine_rx);
        assert_eq!(action, BatchAction::Archive);
        assert_eq!(payload, BatchPayload::Items(ids(&[7, 8])));

        let finished = h.coordinator.handle_event(Event::BatchCompleted {
            dispatch_id,
            action,
            result: BatchResult::all_ok(ids(&[7, 8])),
        });
        assert!(matches!(finished, Some(Finished::Aggregated { .. })));

        let note = h.log.last().unwrap();
        assert_eq!(note.kind, NoticeKind::Success);
        assert!(note.description.contains('2'));
        assert_eq!(*h.calls.borrow(), vec![(BatchAction::Archive, ids(&[7, 8]))]);
        assert_eq!(h.coordinator.phase(), Phase::Idle);
        assert!(h.coordinator.selection().is_empty(&lookup));
    }

    #[test]
    fn all_except_kill_partial_failure_scenario() {
        let mut h = harness();
        let lookup = ItemLookup::new([
            item(1, RunState::Active, true),
            item(2, RunState::Active, true),
            item(3, RunState::Active, true),
            item(4, RunState::Completed, true),
        ]);
        h.coordinator.set_selection(Selection::all_except(ids(&[3])));

        h.coordinator
            .request_action(BatchAction::Kill, ctx(&lookup))
            .unwrap();
        h.coordinator.confirm().unwrap();
        let (dispatch_id, action, payload) = take_dispatch(&mut h.engine_rx);
        match payload {
            BatchPayload::Filtered { filter, excluded } => {
                assert!(filter.managed_only);
                assert_eq!(excluded, ids(&[3]));
            }
            BatchPayload::Items(_) => panic!("all-except must not materialize ids"),
        }

        h.coordinator.handle_event(Event::BatchCompleted {
            dispatch_id,
            action,
            result: BatchResult {
                successful: ids(&[1, 2]),
                failed: vec![ItemFailure {
                    id: ItemId(4),
                    reason: "not running".to_owned(),
                }],
            },
        });
        let note = h.log.last().unwrap();
        assert_eq!(note.kind, NoticeKind::PartialFailure);
        assert_eq!(note.severity, Severity::Warning);
        assert!(note.description.contains("2 out of 3"));
        assert_eq!(*h.calls.borrow(), vec![(BatchAction::Kill, ids(&[1, 2]))]);
    }

    #[test]
    fn relocate_delegates_without_remote_call_and_drops_unmanaged() {
        let mut h = harness();
        let lookup = ItemLookup::new([
            item(1, RunState::Completed, true),
            item(2, RunState::Completed, false),
            item(3, RunState::Completed, true),
        ]);
        h.coordinator.set_selection(Selection::explicit(ids(&[1, 2, 3])));

        let outcome = h
            .coordinator
            .request_action(BatchAction::Relocate, ctx(&lookup))
            .unwrap();
        assert_eq!(outcome, Outcome::Delegated(SubWorkflowKind::Relocate));
        assert_eq!(h.coordinator.phase(), Phase::Idle);
        assert!(h.engine_rx.try_recv().is_err(), "no direct batch call");

        let (kind, request, completion) = h.opened.borrow_mut().pop().unwrap();
        assert_eq!(kind, SubWorkflowKind::Relocate);
        assert_eq!(request.item_ids, ids(&[1, 3]));
        assert!(request.filter.is_none());

        assert!(h.coordinator.poll().is_empty());
        completion.finish(ids(&[1, 3]));
        let finished = h.coordinator.poll();
        assert_eq!(finished.len(), 1);
        assert_eq!(h.log.last().unwrap().kind, NoticeKind::Success);
        assert_eq!(*h.calls.borrow(), vec![(BatchAction::Relocate, ids(&[1, 3]))]);
        assert_eq!(h.coordinator.pending_subworkflows(), 0);
    }

    #[test]
    fn all_except_delegation_passes_filter() {
        let mut h = harness();
        let lookup = ItemLookup::new([item(1, RunState::Completed, true)]);
        h.coordinator
            .set_criteria(FilterCriteria::parse("workspace:1"));
        h.coordinator.set_selection(Selection::all_except(ids(&[5])));
        h.coordinator
            .request_action(BatchAction::ChangeLogRetention, ctx(&lookup))
            .unwrap();
        let (_, request, _) = h.opened.borrow_mut().pop().unwrap();
        let filter = request.filter.unwrap();
        assert_eq!(filter.workspace_id, Some(WorkspaceId(1)));
        assert!(filter.managed_only);
        assert_eq!(request.excluded_item_ids, ids(&[5]));
    }

    #[test]
    fn cancelled_subworkflow_reports_nothing() {
        let mut h = harness();
        let lookup = ItemLookup::new([item(1, RunState::Completed, true)]);
        h.coordinator.set_selection(Selection::explicit(ids(&[1])));
        h.coordinator
            .request_action(BatchAction::Relocate, ctx(&lookup))
            .unwrap();
        let (_, _, completion) = h.opened.borrow_mut().pop().unwrap();
        completion.cancel();
        let finished = h.coordinator.poll();
        assert_eq!(
            finished,
            vec![Finished::SubWorkflowCancelled {
                action: BatchAction::Relocate
            }]
        );
        assert!(h.log.is_empty());
        assert!(h.calls.borrow().is_empty());
    }

    #[test]
    fn explicit_payload_never_contains_unmanaged_ids() {
        let mut h = harness();
        let lookup = ItemLookup::new([
            item(1, RunState::Completed, true),
            item(2, RunState::Completed, false),
        ]);
        h.coordinator.set_selection(Selection::explicit(ids(&[1, 2])));
        let Outcome::AwaitingConfirmation(prompt) = h
            .coordinator
            .request_action(BatchAction::Delete, ctx(&lookup))
            .unwrap()
        else {
            panic!("delete must be confirmed");
        };
        assert_eq!(prompt.skipped_unmanaged, 1);
        assert!(prompt.destructive);
        assert!(prompt.body.contains("1 unmanaged experiments will be skipped"));

        h.coordinator.confirm().unwrap();
        let (_, _, payload) = take_dispatch(&mut h.engine_rx);
        assert_eq!(payload, BatchPayload::Items(ids(&[1])));
    }

    #[test]
    fn mixed_selection_skips_ineligible_items() {
        let mut h = harness();
        let lookup = ItemLookup::new([
            item(1, RunState::Paused, true),
            item(2, RunState::Completed, true),
        ]);
        h.coordinator.set_selection(Selection::explicit(ids(&[1, 2])));
        let Outcome::AwaitingConfirmation(prompt) = h
            .coordinator
            .request_action(BatchAction::Activate, ctx(&lookup))
            .unwrap()
        else {
            panic!("activate must be confirmed");
        };
        assert_eq!(prompt.skipped_ineligible, 1);
        h.coordinator.confirm().unwrap();
        let (_, _, payload) = take_dispatch(&mut h.engine_rx);
        assert_eq!(payload, BatchPayload::Items(ids(&[1])));
    }

    #[test]
    fn single_item_selection_still_requires_confirmation() {
        let mut h = harness();
        let lookup = ItemLookup::new([item(1, RunState::Active, true)]);
        h.coordinator.set_selection(Selection::explicit(ids(&[1])));
        for action in [BatchAction::Pause, BatchAction::Kill, BatchAction::Cancel] {
            let outcome = h.coordinator.request_action(action, ctx(&lookup)).unwrap();
            assert!(matches!(outcome, Outcome::AwaitingConfirmation(_)));
            assert!(h.engine_rx.try_recv().is_err());
            h.coordinator.cancel().unwrap();
        }
    }

    #[test]
    fn second_request_while_dispatching_is_rejected() {
        let mut h = harness();
        let lookup = ItemLookup::new([item(1, RunState::Completed, true)]);
        h.coordinator.set_selection(Selection::explicit(ids(&[1])));
        let Outcome::Dispatching(first) = h
            .coordinator
            .request_action(BatchAction::OpenSession, ctx(&lookup))
            .unwrap()
        else {
            panic!("open-session dispatches directly");
        };
        take_dispatch(&mut h.engine_rx);

        for action in [BatchAction::Archive, BatchAction::OpenSession] {
            assert_eq!(
                h.coordinator.request_action(action, ctx(&lookup)),
                Err(CoordinatorError::Busy(BatchAction::OpenSession))
            );
        }
        assert_eq!(
            h.coordinator.cancel(),
            Err(CoordinatorError::Busy(BatchAction::OpenSession))
        );
        assert!(h.engine_rx.try_recv().is_err(), "no second call issued");
        assert_eq!(
            h.coordinator.phase(),
            Phase::Dispatching(BatchAction::OpenSession)
        );

        h.coordinator.handle_event(Event::BatchCompleted {
            dispatch_id: first,
            action: BatchAction::OpenSession,
            result: BatchResult::all_ok(ids(&[1])),
        });
        assert_eq!(h.coordinator.phase(), Phase::Idle);
        assert_eq!(h.log.len(), 1);
    }

    #[test]
    fn cancel_returns_to_idle_without_side_effects() {
        let mut h = harness();
        let lookup = ItemLookup::new([item(1, RunState::Completed, true)]);
        h.coordinator.set_selection(Selection::explicit(ids(&[1])));
        h.coordinator
            .request_action(BatchAction::Archive, ctx(&lookup))
            .unwrap();
        assert_eq!(
            h.coordinator
                .request_action(BatchAction::Delete, ctx(&lookup)),
            Err(CoordinatorError::ConfirmationPending(BatchAction::Archive))
        );
        h.coordinator.cancel().unwrap();
        assert_eq!(h.coordinator.phase(), Phase::Idle);
        assert!(h.engine_rx.try_recv().is_err());
        assert!(h.log.is_empty());
        assert!(h.calls.borrow().is_empty());
        assert_eq!(h.coordinator.confirm(), Err(CoordinatorError::NothingToConfirm));
    }

    #[test]
    fn transport_failure_is_single_error_and_machine_stays_usable() {
        let mut h = harness();
        let lookup = ItemLookup::new([item(1, RunState::Completed, true)]);
        h.coordinator.set_selection(Selection::explicit(ids(&[1])));
        h.coordinator
            .request_action(BatchAction::OpenSession, ctx(&lookup))
            .unwrap();
        let (dispatch_id, action, _) = take_dispatch(&mut h.engine_rx);
        let finished = h.coordinator.handle_event(Event::BatchFailed {
            dispatch_id,
            action,
            message: "502 Bad Gateway".to_owned(),
        });
        assert!(matches!(finished, Some(Finished::TransportFailed { .. })));
        assert_eq!(h.log.len(), 1);
        let note = h.log.last().unwrap();
        assert_eq!(note.severity, Severity::Error);
        assert_eq!(note.kind, NoticeKind::TransportError);
        assert_eq!(*h.calls.borrow(), vec![(BatchAction::OpenSession, vec![])]);
        // Selection untouched, next action accepted.
        assert!(h.coordinator.selection().is_selected(ItemId(1)));
        assert!(
            h.coordinator
                .request_action(BatchAction::Archive, ctx(&lookup))
                .is_ok()
        );
    }

    #[test]
    fn malformed_result_is_full_failure() {
        let mut h = harness();
        let lookup = ItemLookup::new([
            item(7, RunState::Completed, true),
            item(8, RunState::Completed, true),
        ]);
        h.coordinator.set_selection(Selection::explicit(ids(&[7, 8])));
        h.coordinator
            .request_action(BatchAction::Archive, ctx(&lookup))
            .unwrap();
        h.coordinator.confirm().unwrap();
        let (dispatch_id, action, _) = take_dispatch(&mut h.engine_rx);
        h.coordinator.handle_event(Event::BatchCompleted {
            dispatch_id,
            action,
            result: BatchResult::all_ok(ids(&[7])),
        });
        assert_eq!(h.log.last().unwrap().kind, NoticeKind::Failure);
        assert_eq!(*h.calls.borrow(), vec![(BatchAction::Archive, vec![])]);
        // Nothing trusted, so nothing deselected.
        assert!(h.coordinator.selection().is_selected(ItemId(7)));
    }

    #[test]
    fn stale_reply_is_ignored() {
        let mut h = harness();
        let lookup = ItemLookup::new([item(1, RunState::Completed, true)]);
        h.coordinator.set_selection(Selection::explicit(ids(&[1])));
        h.coordinator
            .request_action(BatchAction::OpenSession, ctx(&lookup))
            .unwrap();
        let (dispatch_id, action, _) = take_dispatch(&mut h.engine_rx);
        let stale = h.coordinator.handle_event(Event::BatchCompleted {
            dispatch_id: dispatch_id + 100,
            action,
            result: BatchResult::default(),
        });
        assert!(stale.is_none());
        assert_eq!(h.coordinator.phase(), Phase::Dispatching(action));
    }

    #[test]
    fn only_unmanaged_targets_finish_without_call() {
        let mut h = harness();
        let lookup = ItemLookup::new([item(1, RunState::Completed, false)]);
        h.coordinator.set_selection(Selection::explicit(ids(&[1])));
        h.coordinator
            .request_action(BatchAction::Archive, ctx(&lookup))
            .unwrap();
        let outcome = h.coordinator.confirm().unwrap();
        assert!(matches!(outcome, Outcome::Finished(Finished::Aggregated { .. })));
        assert!(h.engine_rx.try_recv().is_err());
        assert_eq!(h.log.last().unwrap().kind, NoticeKind::NoEligibleItems);
        assert_eq!(h.calls.borrow().len(), 1);
    }

    #[test]
    fn delegation_with_only_unmanaged_targets_opens_nothing() {
        let mut h = harness();
        let lookup = ItemLookup::new([
            item(1, RunState::Completed, true),
            item(2, RunState::Completed, false),
        ]);
        h.coordinator.set_selection(Selection::explicit(ids(&[2])));
        let outcome = h
            .coordinator
            .request_action(BatchAction::Relocate, ctx(&lookup))
            .unwrap();
        assert!(matches!(outcome, Outcome::Finished(Finished::Aggregated { .. })));
        assert!(h.opened.borrow().is_empty(), "no sub-workflow opened");
        assert!(h.engine_rx.try_recv().is_err());
        assert_eq!(h.coordinator.pending_subworkflows(), 0);
        assert_eq!(h.log.last().unwrap().kind, NoticeKind::NoEligibleItems);
        assert_eq!(*h.calls.borrow(), vec![(BatchAction::Relocate, vec![])]);
    }

    #[test]
    fn failed_subworkflow_reports_one_error() {
        let mut h = harness();
        let lookup = ItemLookup::new([item(1, RunState::Completed, true)]);
        h.coordinator.set_selection(Selection::explicit(ids(&[1])));
        h.coordinator
            .request_action(BatchAction::ChangeLogRetention, ctx(&lookup))
            .unwrap();
        let (_, _, completion) = h.opened.borrow_mut().pop().unwrap();
        completion.fail("502 Bad Gateway");

        let finished = h.coordinator.poll();
        assert_eq!(
            finished,
            vec![Finished::TransportFailed {
                action: BatchAction::ChangeLogRetention,
                message: "502 Bad Gateway".to_owned(),
            }]
        );
        let notes = h.log.drain();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].severity, Severity::Error);
        assert_eq!(notes[0].kind, NoticeKind::TransportError);
        assert_eq!(notes[0].description, "502 Bad Gateway");
        assert!(h.log.is_empty(), "drain empties the log");
        assert_eq!(
            *h.calls.borrow(),
            vec![(BatchAction::ChangeLogRetention, vec![])]
        );
        assert!(h.coordinator.selection().is_selected(ItemId(1)));
    }

    #[test]
    fn unavailable_and_empty_requests_are_rejected() {
        let mut h = harness();
        let lookup = ItemLookup::new([item(1, RunState::Completed, true)]);
        assert_eq!(
            h.coordinator
                .request_action(BatchAction::Archive, ctx(&lookup)),
            Err(CoordinatorError::EmptySelection)
        );
        h.coordinator.set_selection(Selection::explicit(ids(&[1])));
        assert_eq!(
            h.coordinator.request_action(BatchAction::Pause, ctx(&lookup)),
            Err(CoordinatorError::NotAvailable(BatchAction::Pause))
        );
        h.coordinator.select_all();
        assert_eq!(
            h.coordinator
                .request_action(BatchAction::OpenSession, ctx(&lookup)),
            Err(CoordinatorError::NotAvailable(BatchAction::OpenSession))
        );
    }

    #[test]
    fn permissions_restrict_requests() {
        let mut h = harness();
        let lookup = ItemLookup::new([item(1, RunState::Completed, true)]);
        let mut roles = WorkspaceRoles::default();
        roles.set(WorkspaceId(1), Role::Editor);
        h.coordinator.set_selection(Selection::explicit(ids(&[1])));
        let ctx = DecisionContext {
            lookup: &lookup,
            permissions: &roles,
        };
        assert_eq!(
            h.coordinator.request_action(BatchAction::Delete, ctx),
            Err(CoordinatorError::NotAvailable(BatchAction::Delete))
        );
        assert!(h.coordinator.request_action(BatchAction::Archive, ctx).is_ok());
    }

    #[test]
    fn changing_criteria_resets_selection() {
        let mut h = harness();
        h.coordinator.select_all();
        h.coordinator.set_criteria(FilterCriteria::default());
        assert!(h.coordinator.selection().is_all_except());
        h.coordinator.set_criteria(FilterCriteria::parse("state:active"));
        assert_eq!(*h.coordinator.selection(), Selection::default());
    }
}
