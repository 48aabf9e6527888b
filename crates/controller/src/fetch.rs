//! Sequenced fetch bookkeeping: which responses may be committed.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use dashsync_core::QueryState;
use serde::Serialize;

/// Whether a cycle runs with no data yet on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadKind {
    Initial,
    Refresh,
}

/// Per-controller load state.
///
/// `Idle → Loading → Ready ⇄ Refreshing`; a failed `Loading` ends in
/// `ErrorInitial`, a failed `Refreshing` returns to `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadPhase {
    Idle,
    Loading,
    Ready,
    Refreshing,
    ErrorInitial,
}

impl LoadPhase {
    pub fn load_kind(self) -> Option<LoadKind> {
        match self {
            LoadPhase::Loading => Some(LoadKind::Initial),
            LoadPhase::Refreshing => Some(LoadKind::Refresh),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub sequence: u64,
    pub query: QueryState,
    pub issued_at: DateTime<Utc>,
    pub kind: LoadKind,
}

/// Verdict for an arriving response.
#[derive(Debug)]
pub enum Admission {
    /// Newest response so far; commit it. Carries the originating request.
    Current(Box<FetchRequest>),
    /// An equal or newer response was already observed.
    Stale,
}

#[derive(Debug, Default)]
pub struct FetchOrchestrator {
    last_issued: u64,
    highest_observed: u64,
    awaiting: usize,
    committed: bool,
    failed_initial: bool,
    pending: BTreeMap<u64, FetchRequest>,
}

impl FetchOrchestrator {
    pub fn new() -> Self { Self::default() }

    /// Assign the next sequence number to a snapshot of `query`.
    pub fn issue(&mut self, query: &QueryState) -> FetchRequest {
        self.last_issued += 1;
        self.awaiting += 1;
        let req = FetchRequest {
            sequence: self.last_issued,
            query: query.clone(),
            issued_at: Utc::now(),
            kind: if self.committed { LoadKind::Refresh } else { LoadKind::Initial },
        };
        self.pending.insert(req.sequence, req.clone());
        req
    }

    /// Gate a response (success or failure) for `sequence`.
    pub fn observe(&mut self, sequence: u64) -> Admission {
        self.awaiting = self.awaiting.saturating_sub(1);
        if sequence <= self.highest_observed {
            return Admission::Stale;
        }
        self.highest_observed = sequence;
        let req = self.pending.remove(&sequence);
        // everything older is superseded
        self.pending = self.pending.split_off(&sequence);
        match req {
            Some(r) => Admission::Current(Box::new(r)),
            None => Admission::Stale,
        }
    }

    pub fn mark_committed(&mut self) {
        self.committed = true;
        self.failed_initial = false;
    }

    pub fn mark_failed(&mut self) {
        if !self.committed {
            self.failed_initial = true;
        }
    }

    pub fn has_committed(&self) -> bool { self.committed }

    pub fn last_issued(&self) -> u64 { self.last_issued }

    /// Responses still expected, including ones that will be discarded.
    pub fn awaiting(&self) -> usize { self.awaiting }

    /// A request newer than anything observed is still in flight.
    pub fn in_flight(&self) -> bool { self.last_issued > self.highest_observed }

    pub fn phase(&self) -> LoadPhase {
        match (self.in_flight(), self.committed) {
            (true, false) => LoadPhase::Loading,
            (true, true) => LoadPhase::Refreshing,
            (false, true) => LoadPhase::Ready,
            (false, false) if self.failed_initial => LoadPhase::ErrorInitial,
            (false, false) => LoadPhase::Idle,
        }
    }
}
