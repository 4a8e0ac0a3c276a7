//! Turns a per-item batch outcome into one categorized notification.

use std::collections::HashSet;

use chrono::Local;

use crate::catalog::BatchAction;
use crate::notify::{NoticeKind, Notification, Severity};
use crate::types::{BatchResult, ItemId};

/// What the originating request allows the result to contain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expectation {
    /// A concrete id list was submitted; each must come back exactly once.
    Exact(Vec<ItemId>),
    /// Only ids from this list may come back, but not all of them have to.
    /// Sub-workflows report successes only.
    Within(Vec<ItemId>),
    /// The service resolved the collection itself; only the exclusions
    /// are known client-side.
    Open { excluded: Vec<ItemId> },
}

impl Expectation {
    fn submitted_count(&self) -> Option<usize> {
        match self {
            Self::Exact(ids) | Self::Within(ids) => Some(ids.len()),
            Self::Open { .. } => None,
        }
    }
}

/// Aggregated outcome of one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub notification: Notification,
    /// Ids to report upward. Empty when the result could not be trusted.
    pub successful: Vec<ItemId>,
    pub malformed: bool,
}

/// Check that `result` accounts for the request; returns why it does not.
pub fn validate(result: &BatchResult, expectation: &Expectation) -> Result<(), String> {
    let mut seen = HashSet::with_capacity(result.len());
    for id in result.successful.iter().copied().chain(result.failed_ids()) {
        if !seen.insert(id) {
            return Err(format!("item {id} reported more than once"));
        }
    }

    match expectation {
        Expectation::Exact(submitted) => {
            let submitted: HashSet<ItemId> = submitted.iter().copied().collect();
            if let Some(extra) = seen.iter().find(|id| !submitted.contains(id)) {
                return Err(format!("item {extra} was not part of the request"));
            }
            if let Some(missing) = submitted.iter().find(|id| !seen.contains(id)) {
                return Err(format!("no outcome for item {missing}"));
            }
        }
        Expectation::Within(allowed) => {
            if let Some(extra) = seen.iter().find(|id| !allowed.contains(id)) {
                return Err(format!("item {extra} was not part of the request"));
            }
        }
        Expectation::Open { excluded } => {
            if let Some(id) = excluded.iter().find(|id| seen.contains(id)) {
                return Err(format!("excluded item {id} was acted on"));
            }
        }
    }
    Ok(())
}

/// Classify a batch result.
///
/// 1. nothing succeeded or failed: no eligible items
/// 2. only successes: success
/// 3. only failures: failure
/// 4. both: partial failure
///
/// A result that does not match its request is a full failure.
pub fn summarize(
    action: BatchAction,
    result: &BatchResult,
    expectation: &Expectation,
    label_plural: &str,
) -> Summary {
    if let Err(reason) = validate(result, expectation) {
        tracing::warn!("aggregate: malformed {} result: {reason}", action.verb());
        let count = expectation.submitted_count().unwrap_or(result.len());
        return Summary {
            notification: notice(
                NoticeKind::Failure,
                Severity::Warning,
                format!("{} Failure", action.label()),
                format!(
                    "Unable to {} {count} {label_plural}: the service returned an inconsistent result",
                    action.verb()
                ),
            ),
            successful: Vec::new(),
            malformed: true,
        };
    }

    let ok = result.successful.len();
    let failed = result.failed.len();
    let notification = match (ok, failed) {
        (0, 0) => notice(
            NoticeKind::NoEligibleItems,
            Severity::Info,
            format!("No eligible {label_plural}"),
            format!(
                "No selected {label_plural} were eligible for {}",
                action.label().to_lowercase()
            ),
        ),
        (ok, 0) => notice(
            NoticeKind::Success,
            Severity::Info,
            format!("{} Success", action.label()),
            format!("{} succeeded for {ok} {label_plural}", action.label()),
        ),
        (0, failed) => notice(
            NoticeKind::Failure,
            Severity::Warning,
            format!("{} Failure", action.label()),
            format!("Unable to {} {failed} {label_plural}", action.verb()),
        ),
        (ok, failed) => notice(
            NoticeKind::PartialFailure,
            Severity::Warning,
            format!("Partial {} Failure", action.label()),
            format!(
                "{} succeeded for {ok} out of {} eligible {label_plural}",
                action.label(),
                ok + failed
            ),
        ),
    };

    Summary {
        notification,
        successful: result.successful.clone(),
        malformed: false,
    }
}

/// Notification for a batch call that failed as a whole.
pub fn transport_failure(action: BatchAction, message: &str, label_plural: &str) -> Notification {
    notice(
        NoticeKind::TransportError,
        Severity::Error,
        format!(
            "Unable to {} Selected {}",
            action.label(),
            capitalize(label_plural)
        ),
        message.to_owned(),
    )
}

fn notice(kind: NoticeKind, severity: Severity, title: String, description: String) -> Notification {
    Notification {
        title,
        description,
        severity,
        dismissible: true,
        kind,
        at: Local::now(),
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
