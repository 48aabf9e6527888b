//! The list-screen sync controller.
//!
//! One controller owns one screen's query, page, selection and stats. UI
//! callbacks mutate it through `&mut self`; remote calls run as spawned tasks
//! that post [`SyncUpdate`]s back, which the owner drains with [`SyncController::pump`]
//! (per frame) or awaits with [`SyncController::next_update`].

use std::sync::Arc;
use std::time::Instant as StdInstant;

use dashsync_api::{
    ApiError, ApiResult, CollectionService, CredentialProvider, ListResponse, Notifier, RequestContext,
};
use dashsync_core::{
    BulkActionOutcome, EntityId, FilterParams, NoticeKind, PageResult, QueryError, QuerySnapshot, QueryState,
    StatsSnapshot, SyncConfig,
};
use metrics::{counter, histogram};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::bulk::{self, BulkAction};
use crate::fetch::{Admission, FetchOrchestrator, LoadKind, LoadPhase};
use crate::scheduler::{ChangeKind, DebounceScheduler};
use crate::selection::ResultSet;
use crate::stats::{StatsAggregator, StatsView};
use crate::view::{ViewHandle, ViewPublisher, ViewState};

/// Completion of a spawned remote call.
#[derive(Debug)]
pub enum SyncUpdate {
    Page { sequence: u64, result: ApiResult<PageResult>, took_ms: u64 },
    Stats { sequence: u64, params: FilterParams, result: ApiResult<StatsSnapshot> },
}

/// What the user can do about a surfaced error.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryPath {
    /// Fetch the same query again.
    Reissue(QueryState),
    /// Run the action again for the ids that failed.
    RerunBulk { action: String, ids: Vec<EntityId> },
    /// Credentials were rejected; sign in first.
    SignIn,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SurfacedError {
    pub error: ApiError,
    /// Set for fetch errors: whether data was already on screen.
    pub load: Option<LoadKind>,
    pub retry: RetryPath,
}

impl SurfacedError {
    pub fn message(&self) -> &str { self.error.message() }
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error("entity {0} is not on the current page")]
    NotOnPage(EntityId),
    #[error(transparent)]
    Api(#[from] ApiError),
}

pub struct SyncController {
    service: Arc<dyn CollectionService>,
    credentials: Arc<dyn CredentialProvider>,
    notifier: Arc<dyn Notifier>,
    config: SyncConfig,
    query: QueryState,
    scheduler: DebounceScheduler,
    fetch: FetchOrchestrator,
    results: ResultSet,
    stats: StatsAggregator,
    stats_params: Option<FilterParams>,
    /// Stats predicate of the committed page.
    page_predicate: Option<FilterParams>,
    error: Option<SurfacedError>,
    bulk_error: Option<SurfacedError>,
    updates_tx: mpsc::UnboundedSender<SyncUpdate>,
    updates_rx: mpsc::UnboundedReceiver<SyncUpdate>,
    view: ViewPublisher,
}

impl SyncController {
    pub fn new(
        service: Arc<dyn CollectionService>,
        credentials: Arc<dyn CredentialProvider>,
        notifier: Arc<dyn Notifier>,
        config: SyncConfig,
    ) -> Self {
        let config = config.normalized();
        let query = QueryState::new(config.default_per_page);
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        Self {
            service,
            credentials,
            notifier,
            scheduler: DebounceScheduler::new(config.debounce()),
            view: ViewPublisher::new(ViewState::initial(query.clone())),
            config,
            query,
            fetch: FetchOrchestrator::new(),
            results: ResultSet::new(),
            stats: StatsAggregator::new(),
            stats_params: None,
            page_predicate: None,
            error: None,
            bulk_error: None,
            updates_tx,
            updates_rx,
        }
    }

    /// Seed the query (e.g. restored from a saved view) before [`start`](Self::start).
    pub fn with_query(mut self, query: QueryState) -> Self {
        self.query = query;
        self.publish();
        self
    }

    // ---- reads ----

    pub fn view(&self) -> ViewHandle { self.view.handle() }
    pub fn config(&self) -> &SyncConfig { &self.config }
    pub fn query(&self) -> &QueryState { &self.query }
    pub fn phase(&self) -> LoadPhase { self.fetch.phase() }
    pub fn page(&self) -> Option<&PageResult> { self.results.page().map(|p| &**p) }
    pub fn error(&self) -> Option<&SurfacedError> { self.error.as_ref() }
    pub fn bulk_error(&self) -> Option<&SurfacedError> { self.bulk_error.as_ref() }
    pub fn stats(&self) -> StatsView { self.stats.view() }
    pub fn selected_ids(&self) -> Vec<EntityId> { self.results.selected_ids() }
    pub fn is_selected(&self, id: &EntityId) -> bool { self.results.is_selected(id) }

    /// No debounce pending and no response outstanding.
    pub fn is_settled(&self) -> bool {
        !self.scheduler.is_pending() && self.fetch.awaiting() == 0 && self.stats.awaiting() == 0
    }

    // ---- query callbacks ----

    /// Issue the first load. Later calls are no-ops.
    pub fn start(&mut self) {
        if self.fetch.last_issued() == 0 {
            self.trigger(true);
            self.publish();
        }
    }

    pub fn set_search_text(&mut self, text: impl Into<String>) {
        if self.query.set_search_text(text) {
            self.on_change(ChangeKind::Debounced);
        }
    }

    pub fn set_filter(&mut self, key: impl Into<String>, value: impl Into<String>) {
        if self.query.set_filter(key, value) {
            self.on_change(ChangeKind::Immediate);
        }
    }

    pub fn clear_filter(&mut self, key: &str) {
        if self.query.clear_filter(key) {
            self.on_change(ChangeKind::Immediate);
        }
    }

    pub fn set_sort(&mut self, key: Option<String>) {
        if self.query.set_sort(key) {
            self.on_change(ChangeKind::Immediate);
        }
    }

    /// Apply a submitted search/filter form in one step.
    pub fn commit(&mut self, snapshot: QuerySnapshot) {
        if self.query.apply_snapshot(snapshot) {
            self.on_change(ChangeKind::Immediate);
        }
    }

    /// Move to page `n` (`1..=last_page`). Re-selecting the current page does
    /// not fetch.
    pub fn set_page(&mut self, n: u32) -> Result<(), SyncError> {
        if self.query.set_page(n, self.results.last_page())? {
            self.on_change(ChangeKind::Immediate);
        }
        Ok(())
    }

    pub fn set_per_page(&mut self, n: u32) -> Result<(), SyncError> {
        if self.query.set_per_page(n, &self.config.allowed_per_page)? {
            self.on_change(ChangeKind::Immediate);
        }
        Ok(())
    }

    /// Fetch the current query again, counters included.
    pub fn refresh(&mut self) {
        self.scheduler.cancel();
        self.trigger(true);
        self.publish();
    }

    /// Re-issue the current query after a failed load.
    ///
    /// The query is the single source of truth, so a retry always fetches
    /// what is on screen now, even if the failed request was older.
    pub fn retry(&mut self) {
        if let Some(e) = &self.error {
            debug!(retry = ?e.retry, "fetch: retry requested");
        }
        self.refresh();
    }

    // ---- selection callbacks ----

    /// Returns the new selected state of `id`.
    pub fn toggle_select(&mut self, id: &EntityId) -> Result<bool, SyncError> {
        let state = self.results.toggle(id).ok_or_else(|| SyncError::NotOnPage(id.clone()))?;
        self.publish();
        Ok(state)
    }

    /// Toggle every id of the current page. Returns true when all are selected.
    pub fn toggle_select_all(&mut self) -> bool {
        let all = self.results.toggle_all();
        self.publish();
        all
    }

    pub fn clear_selection(&mut self) {
        self.results.clear_selection();
        self.publish();
    }

    // ---- bulk actions ----

    /// Run `action` over the eligible part of the selection.
    ///
    /// Ineligible ids are never submitted and stay selected, as do ids the
    /// server rejected; succeeded ids are deselected. A fresh fetch and stats
    /// cycle follows any submission.
    pub async fn run_bulk_action(&mut self, action: &BulkAction) -> Result<BulkActionOutcome, SyncError> {
        let part = bulk::partition(action, self.results.selected_entities());
        let ctx = RequestContext {
            token: self.credentials.token(),
            sequence: 0,
            request_id: Some(uuid::Uuid::new_v4()),
        };
        let batch = ctx.request_id.map(|u| u.to_string()).unwrap_or_default();
        info!(action = %action.name, batch = %batch, eligible = part.eligible.len(), skipped = part.skipped.len(), "bulk: start");
        let service = Arc::clone(&self.service);
        let t0 = StdInstant::now();
        match bulk::execute(service.as_ref(), &ctx, action, part).await {
            Ok(run) => {
                let failure = run.failure();
                let outcome = run.outcome;
                histogram!("sync_bulk_ms").record(t0.elapsed().as_secs_f64() * 1000.0);
                counter!("sync_bulk_items_total", "result" => "succeeded").increment(outcome.succeeded_ids.len() as u64);
                counter!("sync_bulk_items_total", "result" => "skipped").increment(outcome.skipped_ids.len() as u64);
                counter!("sync_bulk_items_total", "result" => "failed").increment(outcome.failed_ids.len() as u64);
                info!(action = %action.name, batch = %batch, summary = %outcome.summary(), "bulk: done");
                self.notifier.notify(outcome.notice_kind(), &outcome.summary());
                self.bulk_error = failure.map(|error| SurfacedError {
                    error,
                    load: None,
                    retry: RetryPath::RerunBulk { action: action.name.clone(), ids: outcome.failed_ids.clone() },
                });
                if !outcome.nothing_to_do() {
                    self.results.deselect(&outcome.succeeded_ids);
                    self.scheduler.cancel();
                    self.trigger(true);
                }
                self.publish();
                Ok(outcome)
            }
            Err(err) => {
                warn!(action = %action.name, batch = %batch, error = %err, "bulk: aborted");
                if err.is_auth() {
                    self.credentials.invalidate();
                }
                self.notifier.notify(NoticeKind::Error, &format!("{} failed: {}", action.name, err.message()));
                self.bulk_error = Some(SurfacedError { error: err.clone(), load: None, retry: RetryPath::SignIn });
                self.publish();
                Err(SyncError::Api(err))
            }
        }
    }

    // ---- event loop ----

    /// Fire a due debounce and apply every update already received.
    /// Returns how many events were handled.
    pub fn pump(&mut self) -> usize {
        let mut processed = 0usize;
        if self.scheduler.poll(Instant::now()) {
            self.trigger(false);
            processed += 1;
        }
        while let Ok(u) = self.updates_rx.try_recv() {
            self.apply_update(u);
            processed += 1;
        }
        if processed > 0 {
            self.publish();
        }
        processed
    }

    /// Wait for the next response or debounce expiry and handle it.
    ///
    /// Waits forever when [`is_settled`](Self::is_settled) is true.
    pub async fn next_update(&mut self) {
        let deadline = self.scheduler.deadline();
        tokio::select! {
            Some(u) = self.updates_rx.recv() => self.apply_update(u),
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                if self.scheduler.poll(Instant::now()) {
                    self.trigger(false);
                }
            }
        }
        while let Ok(u) = self.updates_rx.try_recv() {
            self.apply_update(u);
        }
        self.publish();
    }

    /// Drive the controller until nothing is pending.
    pub async fn settle(&mut self) {
        while !self.is_settled() {
            self.next_update().await;
        }
    }

    // ---- internals ----

    fn on_change(&mut self, kind: ChangeKind) {
        if self.scheduler.on_change(kind, Instant::now()) {
            self.trigger(false);
        } else {
            debug!(quiet_ms = self.scheduler.quiet().as_millis() as u64, "query: change debounced");
        }
        self.publish();
    }

    /// Start a page fetch, and a stats fetch when its predicate changed
    /// (or `force_stats`).
    fn trigger(&mut self, force_stats: bool) {
        self.spawn_fetch();
        let params = self.query.stats_params();
        if force_stats || self.stats_params.as_ref() != Some(&params) {
            self.spawn_stats(params);
        }
    }

    fn context(&self, sequence: u64) -> RequestContext {
        RequestContext { token: self.credentials.token(), sequence, request_id: None }
    }

    fn spawn_fetch(&mut self) {
        let req = self.fetch.issue(&self.query);
        let params = req.query.filter_params();
        let ctx = self.context(req.sequence);
        counter!("sync_fetch_issued_total").increment(1);
        info!(seq = req.sequence, kind = ?req.kind, page = req.query.page(), per_page = req.query.per_page(), search = %req.query.search_text(), "fetch: issued");
        let service = Arc::clone(&self.service);
        let tx = self.updates_tx.clone();
        tokio::spawn(async move {
            let t0 = StdInstant::now();
            let result = service.list(&ctx, &params).await.map(ListResponse::into_page_result);
            let took_ms = t0.elapsed().as_millis() as u64;
            let _ = tx.send(SyncUpdate::Page { sequence: ctx.sequence, result, took_ms });
        });
    }

    fn spawn_stats(&mut self, params: FilterParams) {
        let sequence = self.stats.issue();
        let ctx = self.context(sequence);
        self.stats_params = Some(params.clone());
        debug!(seq = sequence, "stats: issued");
        let service = Arc::clone(&self.service);
        let tx = self.updates_tx.clone();
        tokio::spawn(async move {
            let result = service.stats(&ctx, &params).await;
            let _ = tx.send(SyncUpdate::Stats { sequence: ctx.sequence, params, result });
        });
    }

    fn apply_update(&mut self, update: SyncUpdate) {
        match update {
            SyncUpdate::Page { sequence, result, took_ms } => {
                let req = match self.fetch.observe(sequence) {
                    Admission::Current(req) => req,
                    Admission::Stale => {
                        counter!("sync_fetch_stale_total").increment(1);
                        debug!(seq = sequence, took_ms, "fetch: stale response discarded");
                        return;
                    }
                };
                histogram!("sync_fetch_ms").record(took_ms as f64);
                match result {
                    Ok(page) => {
                        let (items, total, current, last) =
                            (page.items.len(), page.total, page.current_page, page.last_page.max(1));
                        let pruned = self.results.commit(page);
                        self.fetch.mark_committed();
                        self.error = None;
                        let predicate = req.query.stats_params();
                        self.stats.page_committed(&predicate);
                        self.page_predicate = Some(predicate);
                        info!(seq = sequence, items, total, page = current, pruned = pruned.len(), took_ms, "fetch: committed");
                        // set_page only knew an older last_page
                        if current > last && self.query == req.query && self.query.set_page(last, None).unwrap_or(false) {
                            info!(seq = sequence, page = current, last_page = last, "fetch: page out of range, clamping");
                            self.trigger(false);
                        }
                    }
                    Err(err) => {
                        let load = if self.fetch.has_committed() { LoadKind::Refresh } else { LoadKind::Initial };
                        self.fetch.mark_failed();
                        warn!(seq = sequence, load = ?load, error = %err, "fetch: failed");
                        let retry = if err.is_auth() {
                            self.credentials.invalidate();
                            RetryPath::SignIn
                        } else {
                            RetryPath::Reissue(req.query.clone())
                        };
                        let text = match load {
                            LoadKind::Initial => format!("Could not load: {}", err.message()),
                            LoadKind::Refresh => format!("Refresh failed: {}", err.message()),
                        };
                        self.notifier.notify(NoticeKind::Error, &text);
                        self.error = Some(SurfacedError { error: err, load: Some(load), retry });
                    }
                }
            }
            SyncUpdate::Stats { sequence, params, result } => {
                if let Err(err) = &result {
                    if err.is_auth() {
                        self.credentials.invalidate();
                    }
                }
                let failed = result.is_err();
                if !self.stats.observe(sequence, params, result, self.page_predicate.as_ref()) {
                    debug!(seq = sequence, "stats: stale response discarded");
                } else if failed {
                    warn!(seq = sequence, "stats: failed; keeping last counters");
                }
            }
        }
    }

    fn publish(&mut self) {
        let next = ViewState {
            epoch: 0,
            query: self.query.clone(),
            phase: self.fetch.phase(),
            page: self.results.page().cloned(),
            selection: self.results.selected_ids(),
            error: self.error.clone(),
            bulk_error: self.bulk_error.clone(),
            stats: self.stats.view(),
        };
        self.view.publish(next);
    }
}
