//! Run context: cancellation, deadlines, recursion depth

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Workflows that reference each other manifest cycles as depth, so the
/// runner bounds depth instead of detecting cycles.
pub const MAX_DEPTH: usize = 64;

/// Carried through every task invocation in a run.
///
/// The deadline is the task-tree deadline; step timeouts derive child
/// deadlines that only ever shorten it.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub cancel: CancellationToken,
    pub deadline: Option<Instant>,
    pub(super) depth: usize,
}

impl RunContext {
    pub fn new(cancel: CancellationToken, timeout: Option<Duration>) -> RunContext {
        RunContext {
            cancel,
            deadline: timeout.map(|t| Instant::now() + t),
            depth: 0,
        }
    }

    /// Context for a nested task invocation.
    pub(super) fn child(&self) -> RunContext {
        RunContext {
            cancel: self.cancel.clone(),
            deadline: self.deadline,
            depth: self.depth + 1,
        }
    }

    /// Context for a nested invocation under a step timeout.
    pub(super) fn child_with_deadline(&self, deadline: Option<Instant>) -> RunContext {
        RunContext {
            cancel: self.cancel.clone(),
            deadline,
            depth: self.depth + 1,
        }
    }

    /// The effective deadline for a step: the tighter of the task-tree
    /// deadline and the step's own timeout.
    pub(super) fn step_deadline(&self, timeout: Option<Duration>) -> Option<Instant> {
        let step = timeout.map(|t| Instant::now() + t);
        match (self.deadline, step) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub(super) fn expired(&self) -> bool {
        matches!(self.deadline, Some(deadline) if Instant::now() >= deadline)
    }
}
