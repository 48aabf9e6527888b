//! Summary counters fetched alongside, but independently of, the page.

use dashsync_api::ApiError;
use dashsync_core::{FilterParams, StatsSnapshot};
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsView {
    pub snapshot: Option<StatsSnapshot>,
    pub loading: bool,
    pub error: Option<ApiError>,
}

/// Sequence-gated like the page fetch, with its own loading/error state.
///
/// Counters are only exposed for the predicate of the committed page. A
/// snapshot for any other predicate (its page fetch still in flight, or
/// failed) is held back until a page with that predicate commits.
#[derive(Debug, Default)]
pub struct StatsAggregator {
    last_issued: u64,
    highest_observed: u64,
    awaiting: usize,
    snapshot: Option<StatsSnapshot>,
    held: Option<(FilterParams, StatsSnapshot)>,
    error: Option<ApiError>,
}

impl StatsAggregator {
    pub fn new() -> Self { Self::default() }

    pub fn issue(&mut self) -> u64 {
        self.last_issued += 1;
        self.awaiting += 1;
        self.last_issued
    }

    /// Apply a response computed over `params`. `page_predicate` is the
    /// predicate of the committed page, if any. Returns false when the
    /// response was stale and ignored.
    pub fn observe(
        &mut self,
        sequence: u64,
        params: FilterParams,
        result: Result<StatsSnapshot, ApiError>,
        page_predicate: Option<&FilterParams>,
    ) -> bool {
        self.awaiting = self.awaiting.saturating_sub(1);
        if sequence <= self.highest_observed {
            return false;
        }
        self.highest_observed = sequence;
        match result {
            Ok(s) if page_predicate == Some(&params) => {
                self.snapshot = Some(s);
                self.held = None;
                self.error = None;
            }
            Ok(s) => {
                self.held = Some((params, s));
                self.error = None;
            }
            // keep the last counters
            Err(e) => self.error = Some(e),
        }
        true
    }

    /// A page over `predicate` was committed; expose counters held for it.
    pub fn page_committed(&mut self, predicate: &FilterParams) {
        if self.held.as_ref().is_some_and(|(p, _)| p == predicate) {
            self.snapshot = self.held.take().map(|(_, s)| s);
        }
    }

    /// A request is in flight or counters are held for an uncommitted page.
    pub fn loading(&self) -> bool { self.last_issued > self.highest_observed || self.held.is_some() }

    pub fn awaiting(&self) -> usize { self.awaiting }

    pub fn view(&self) -> StatsView {
        StatsView { snapshot: self.snapshot.clone(), loading: self.loading(), error: self.error.clone() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(total: u64) -> StatsSnapshot {
        let mut s = StatsSnapshot::default();
        s.counters.insert("total".into(), total);
        s
    }

    fn filtered(status: &str) -> FilterParams {
        let mut p = FilterParams::default();
        p.filters.insert("status".into(), status.into());
        p
    }

    #[test]
    fn stale_stats_are_ignored_and_errors_keep_counters() {
        let all = FilterParams::default();
        let mut agg = StatsAggregator::new();
        let a = agg.issue();
        let b = agg.issue();
        assert!(agg.loading());
        assert!(agg.observe(b, all.clone(), Ok(snap(7)), Some(&all)));
        assert!(!agg.observe(a, all.clone(), Ok(snap(1)), Some(&all)));
        assert_eq!(agg.view().snapshot.and_then(|s| s.get("total")), Some(7));

        let c = agg.issue();
        assert!(agg.observe(c, all.clone(), Err(ApiError::Server("down".into())), Some(&all)));
        let v = agg.view();
        assert_eq!(v.snapshot.and_then(|s| s.get("total")), Some(7));
        assert!(v.error.is_some());
        assert!(!v.loading);
    }

    #[test]
    fn counters_wait_for_a_page_over_the_same_predicate() {
        let all = FilterParams::default();
        let sent = filtered("sent");
        let mut agg = StatsAggregator::new();
        let a = agg.issue();
        agg.observe(a, all.clone(), Ok(snap(10)), None);
        assert_eq!(agg.view().snapshot, None, "no page committed yet");
        agg.page_committed(&all);
        assert_eq!(agg.view().snapshot.and_then(|s| s.get("total")), Some(10));

        let b = agg.issue();
        agg.observe(b, sent.clone(), Ok(snap(5)), Some(&all));
        let v = agg.view();
        assert_eq!(v.snapshot.and_then(|s| s.get("total")), Some(10));
        assert!(v.loading);

        agg.page_committed(&filtered("draft"));
        assert_eq!(agg.view().snapshot.and_then(|s| s.get("total")), Some(10));
        agg.page_committed(&sent);
        assert_eq!(agg.view().snapshot.and_then(|s| s.get("total")), Some(5));
        assert!(!agg.view().loading);
    }
}
