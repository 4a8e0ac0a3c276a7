use std::cell::RefCell;
use std::rc::Rc;

use chrono::{DateTime, Local};

use crate::catalog::BatchAction;
use crate::types::ItemId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Which outcome a notification reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    NoEligibleItems,
    Success,
    PartialFailure,
    Failure,
    /// The batch call itself failed; nothing is known per item.
    TransportError,
}

/// A user-facing toast.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub title: String,
    pub description: String,
    pub severity: Severity,
    pub dismissible: bool,
    pub kind: NoticeKind,
    pub at: DateTime<Local>,
}

/// Receives notifications for display.
pub trait NotificationSink {
    fn notify(&mut self, notification: Notification);
}

/// Shared, cloneable record of every notification, in arrival order.
#[derive(Debug, Clone, Default)]
pub struct NotificationLog {
    entries: Rc<RefCell<Vec<Notification>>>,
}

impl NotificationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<Notification> {
        self.entries.borrow().clone()
    }

    pub fn last(&self) -> Option<Notification> {
        self.entries.borrow().last().cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    /// Remove and return everything recorded so far.
    pub fn drain(&self) -> Vec<Notification> {
        std::mem::take(&mut *self.entries.borrow_mut())
    }
}

impl NotificationSink for NotificationLog {
    fn notify(&mut self, notification: Notification) {
        self.entries.borrow_mut().push(notification);
    }
}

/// Upward hook fired once per completed or delegated batch, so the listing
/// can refresh and drop applied ids from its own state.
pub trait BatchObserver {
    fn on_batch_complete(&mut self, action: BatchAction, successful: &[ItemId]);
}

impl<F> BatchObserver for F
where
    F: FnMut(BatchAction, &[ItemId]),
{
    fn on_batch_complete(&mut self, action: BatchAction, successful: &[ItemId]) {
        self(action, successful);
    }
}
