//! Debounce scheduler: coalesces rapid edits into one fetch trigger.

use std::time::Duration;

use tokio::time::Instant;

/// How a query change wants to be fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Wait for the quiet window (search text typing).
    Debounced,
    /// Fetch now (filters, paging, sort).
    Immediate,
}

/// One pending deadline per controller.
///
/// Pure state machine over [`Instant`]; the owner sleeps until
/// [`deadline`](Self::deadline) and then calls [`poll`](Self::poll).
#[derive(Debug)]
pub struct DebounceScheduler {
    quiet: Duration,
    deadline: Option<Instant>,
}

impl DebounceScheduler {
    pub fn new(quiet: Duration) -> Self { Self { quiet, deadline: None } }

    pub fn quiet(&self) -> Duration { self.quiet }

    /// Record a change. Returns true when a fetch must be triggered now.
    pub fn on_change(&mut self, kind: ChangeKind, now: Instant) -> bool {
        match kind {
            ChangeKind::Debounced => {
                self.deadline = Some(now + self.quiet);
                false
            }
            ChangeKind::Immediate => {
                self.deadline = None;
                true
            }
        }
    }

    /// Fires (once) when the quiet window has elapsed.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(d) if now >= d => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    pub fn deadline(&self) -> Option<Instant> { self.deadline }

    pub fn is_pending(&self) -> bool { self.deadline.is_some() }

    pub fn cancel(&mut self) { self.deadline = None; }
}
