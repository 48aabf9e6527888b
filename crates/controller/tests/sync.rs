use std::sync::Arc;
use std::time::Duration;

use dashsync_api::{ApiError, MockService, RecordingNotifier, StaticCredentials};
use dashsync_controller::{BulkAction, LoadKind, LoadPhase, RetryPath, SyncController, SyncError};
use dashsync_core::{Entity, EntityId, NoticeKind, QueryError, QuerySnapshot, QueryState, SyncConfig};

struct Harness {
    svc: Arc<MockService>,
    creds: Arc<StaticCredentials>,
    notes: Arc<RecordingNotifier>,
    ctl: SyncController,
}

fn harness(entities: Vec<Entity>) -> Harness {
    let svc = Arc::new(MockService::with_entities(entities));
    let creds = Arc::new(StaticCredentials::new(Some("t0k".into())));
    let notes = Arc::new(RecordingNotifier::new());
    let ctl = SyncController::new(svc.clone(), creds.clone(), notes.clone(), SyncConfig::default());
    Harness { svc, creds, notes, ctl }
}

fn invoices(n: u64) -> Vec<Entity> {
    (1..=n)
        .map(|i| Entity::new(i).with_attr("status", if i % 2 == 0 { "sent" } else { "draft" }))
        .collect()
}

fn ids(raw: &[&str]) -> Vec<EntityId> { raw.iter().map(|s| EntityId::from(*s)).collect() }

#[tokio::test(start_paused = true)]
async fn first_load_commits_page_and_counters() {
    let mut h = harness(invoices(25));
    let view = h.ctl.view();
    assert_eq!(h.ctl.phase(), LoadPhase::Idle);
    h.ctl.start();
    assert_eq!(h.ctl.phase(), LoadPhase::Loading);
    h.ctl.settle().await;

    assert_eq!(h.ctl.phase(), LoadPhase::Ready);
    let page = h.ctl.page().expect("page");
    assert_eq!(page.items.len(), 10);
    assert_eq!(page.last_page, 3);
    assert_eq!(h.ctl.stats().snapshot.and_then(|s| s.get("total")), Some(25));

    let snap = view.current();
    assert_eq!(snap.phase, LoadPhase::Ready);
    assert!(snap.epoch >= 2);
    assert_eq!(*view.subscribe_epoch().borrow(), snap.epoch);

    // start is one-shot
    h.ctl.start();
    assert!(h.ctl.is_settled());
    assert_eq!(h.svc.list_calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn late_response_for_older_query_is_discarded() {
    let mut h = harness(invoices(6));
    h.ctl.start();
    h.ctl.settle().await;

    let gate = h.svc.hold_list(2);
    h.ctl.set_filter("status", "draft");
    h.ctl.set_filter("status", "sent");
    while h.ctl.phase() != LoadPhase::Ready {
        h.ctl.next_update().await;
    }
    let statuses = |c: &SyncController| {
        c.page().expect("page").items.iter().map(|e| e.attr_str("status").unwrap_or("").to_string()).collect::<Vec<_>>()
    };
    assert_eq!(statuses(&h.ctl), vec!["sent"; 3]);

    gate.release();
    h.ctl.settle().await;
    assert_eq!(statuses(&h.ctl), vec!["sent"; 3], "older response must not overwrite newer page");
    assert_eq!(h.svc.list_calls().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn rapid_search_edits_collapse_into_one_fetch() {
    let mut h = harness(invoices(25));
    h.ctl.start();
    h.ctl.settle().await;

    for text in ["1", "12", "123"] {
        h.ctl.set_search_text(text);
        assert_eq!(h.ctl.pump(), 0, "nothing fires inside the quiet window");
        tokio::time::advance(Duration::from_millis(100)).await;
    }
    h.ctl.settle().await;

    let calls = h.svc.list_calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].search.as_deref(), Some("123"));
    assert_eq!(calls[1].page, Some(1));
}

#[tokio::test(start_paused = true)]
async fn spaced_search_edits_each_fetch() {
    let mut h = harness(invoices(25));
    h.ctl.start();
    h.ctl.settle().await;

    h.ctl.set_search_text("1");
    h.ctl.settle().await;
    h.ctl.set_search_text("2");
    h.ctl.settle().await;

    let searches: Vec<_> = h.svc.list_calls().into_iter().map(|p| p.search).collect();
    assert_eq!(searches, vec![None, Some("1".to_string()), Some("2".to_string())]);
}

#[tokio::test(start_paused = true)]
async fn filter_change_cancels_pending_search_debounce() {
    let mut h = harness(invoices(10));
    h.ctl.start();
    h.ctl.settle().await;

    h.ctl.set_search_text("3");
    h.ctl.set_filter("status", "draft");
    h.ctl.settle().await;

    let calls = h.svc.list_calls();
    assert_eq!(calls.len(), 2, "the immediate fetch already carries the search text");
    assert_eq!(calls[1].search.as_deref(), Some("3"));
    assert_eq!(calls[1].filters.get("status").map(String::as_str), Some("draft"));
}

#[tokio::test(start_paused = true)]
async fn submitted_form_fetches_once() {
    let mut h = harness(invoices(10));
    h.ctl.start();
    h.ctl.settle().await;

    let mut filters = std::collections::BTreeMap::new();
    filters.insert("status".to_string(), "all".to_string());
    h.ctl.commit(QuerySnapshot { search_text: "7".into(), filters });
    h.ctl.settle().await;

    let calls = h.svc.list_calls();
    assert_eq!(calls.len(), 2);
    assert!(calls[1].filters.is_empty(), "\"all\" is never sent");
    assert_eq!(h.ctl.page().expect("page").ids().cloned().collect::<Vec<_>>(), ids(&["7"]));
}

#[tokio::test(start_paused = true)]
async fn set_page_validates_against_last_page() {
    let Harness { svc, creds, notes, ctl } = harness(invoices(25));
    let mut seeded = QueryState::new(10);
    seeded.set_filter("status", "all");
    let mut h = Harness { svc, creds, notes, ctl: ctl.with_query(seeded) };
    assert!(matches!(h.ctl.set_page(0), Err(SyncError::Query(QueryError::PageZero))));
    h.ctl.start();
    h.ctl.settle().await;
    assert_eq!(h.ctl.page().expect("page").total, 25);

    h.ctl.set_page(2).expect("page 2");
    h.ctl.settle().await;
    let page = h.ctl.page().expect("page");
    assert_eq!(page.current_page, 2);
    assert_eq!(page.items.len(), 10);
    let last = h.svc.list_calls().last().cloned().expect("list call");
    assert_eq!(last.page, Some(2));
    assert!(last.filters.is_empty(), "\"all\" is not sent when paging");
    assert_eq!(last.search, None);
    assert_eq!(h.ctl.query().filter("status"), Some("all"), "paging leaves filters alone");

    assert!(matches!(
        h.ctl.set_page(4),
        Err(SyncError::Query(QueryError::PageOutOfRange { page: 4, last_page: 3 }))
    ));
    h.ctl.set_page(2).expect("same page");
    assert!(h.ctl.is_settled(), "re-selecting the current page does not fetch");
    assert_eq!(h.svc.list_calls().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn per_page_change_resets_to_first_page() {
    let mut h = harness(invoices(60));
    h.ctl.start();
    h.ctl.settle().await;
    h.ctl.set_page(3).expect("page");
    h.ctl.settle().await;

    assert!(matches!(h.ctl.set_per_page(7), Err(SyncError::Query(QueryError::PerPageNotAllowed { .. }))));
    h.ctl.set_per_page(25).expect("per page");
    h.ctl.settle().await;
    let page = h.ctl.page().expect("page");
    assert_eq!((page.current_page, page.per_page, page.items.len()), (1, 25, 25));
}

#[tokio::test(start_paused = true)]
async fn refresh_prunes_selection_to_new_page() {
    let mut h = harness(invoices(3));
    h.ctl.start();
    h.ctl.settle().await;
    assert_eq!(h.ctl.toggle_select(&"1".into()).expect("on page"), true);
    h.ctl.toggle_select(&"2".into()).expect("on page");
    assert!(matches!(h.ctl.toggle_select(&"99".into()), Err(SyncError::NotOnPage(_))));

    h.svc.set_entities(invoices(3).into_iter().filter(|e| e.id.as_str() != "1").collect());
    h.ctl.refresh();
    h.ctl.settle().await;
    assert_eq!(h.ctl.selected_ids(), ids(&["2"]));
    assert_eq!(h.ctl.view().current().selection, ids(&["2"]));
}

#[tokio::test(start_paused = true)]
async fn toggle_all_selects_then_clears_the_page() {
    let mut h = harness(invoices(4));
    h.ctl.start();
    h.ctl.settle().await;
    h.ctl.toggle_select(&"3".into()).expect("on page");
    assert!(h.ctl.toggle_select_all());
    assert_eq!(h.ctl.selected_ids(), ids(&["1", "2", "3", "4"]));
    assert!(!h.ctl.toggle_select_all());
    assert!(h.ctl.selected_ids().is_empty());
}

#[tokio::test(start_paused = true)]
async fn bulk_delete_skips_ineligible_and_refreshes() {
    let mut h = harness(vec![
        Entity::new(1u64).with_attr("status", "draft"),
        Entity::new(2u64).with_attr("status", "sent"),
        Entity::new(3u64).with_attr("status", "draft"),
    ]);
    h.ctl.start();
    h.ctl.settle().await;
    h.ctl.toggle_select_all();

    let action = BulkAction::new("delete").skip_when("status", "sent");
    let out = h.ctl.run_bulk_action(&action).await.expect("outcome");
    let calls = h.svc.mutate_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].ids, ids(&["1", "3"]));
    assert_eq!(out.succeeded_ids, ids(&["1", "3"]));
    assert_eq!(out.skipped_ids, ids(&["2"]));
    assert_eq!(out.reason_per_skip[&EntityId::from("2")], "status is \"sent\"");
    assert_eq!(h.notes.notices(), vec![(NoticeKind::Warning, "delete: 2 succeeded, 1 skipped".to_string())]);

    h.ctl.settle().await;
    assert_eq!(h.ctl.page().expect("page").total, 1);
    assert_eq!(h.ctl.selected_ids(), ids(&["2"]), "ineligible ids stay selected");
    assert_eq!(h.svc.stats_calls().len(), 2, "counters refresh after a bulk action");
}

#[tokio::test(start_paused = true)]
async fn bulk_with_nothing_eligible_makes_no_call() {
    let mut h = harness(invoices(2));
    h.ctl.start();
    h.ctl.settle().await;
    h.ctl.toggle_select(&"2".into()).expect("on page");

    let out = h.ctl.run_bulk_action(&BulkAction::new("delete").skip_when("status", "sent")).await.expect("outcome");
    assert!(out.nothing_to_do());
    assert!(h.svc.mutate_calls().is_empty());
    assert!(h.ctl.is_settled(), "no refetch when nothing was submitted");
    assert_eq!(h.notes.count(NoticeKind::Info), 1);
}

#[tokio::test(start_paused = true)]
async fn bulk_item_failures_stay_selected_with_rerun_path() {
    let mut h = harness(invoices(3));
    h.svc.fail_item("3", ApiError::Validation("locked".into()));
    h.ctl.start();
    h.ctl.settle().await;
    h.ctl.toggle_select_all();

    let out = h.ctl.run_bulk_action(&BulkAction::new("delete")).await.expect("outcome");
    assert_eq!(out.failed_ids, ids(&["3"]));
    let err = h.ctl.bulk_error().expect("bulk error");
    assert_eq!(err.retry, RetryPath::RerunBulk { action: "delete".into(), ids: ids(&["3"]) });
    h.ctl.settle().await;
    assert_eq!(h.ctl.selected_ids(), ids(&["3"]));
}

#[tokio::test(start_paused = true)]
async fn bulk_auth_failure_invalidates_credentials() {
    let mut h = harness(invoices(2));
    h.ctl.start();
    h.ctl.settle().await;
    h.ctl.toggle_select_all();
    h.svc.fail_next_mutate(ApiError::Auth("expired".into()));

    let err = h.ctl.run_bulk_action(&BulkAction::new("delete")).await.expect_err("auth");
    assert!(matches!(err, SyncError::Api(ApiError::Auth(_))));
    assert!(!h.creds.is_valid());
    assert_eq!(h.ctl.bulk_error().map(|e| &e.retry), Some(&RetryPath::SignIn));
    assert_eq!(h.ctl.selected_ids().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn refresh_failure_keeps_page_and_notifies() {
    let mut h = harness(invoices(5));
    h.ctl.start();
    h.ctl.settle().await;

    h.svc.fail_next_list(ApiError::Server("maintenance".into()));
    h.ctl.refresh();
    assert_eq!(h.ctl.phase(), LoadPhase::Refreshing);
    h.ctl.settle().await;

    assert_eq!(h.ctl.phase(), LoadPhase::Ready);
    assert_eq!(h.ctl.page().expect("page kept").items.len(), 5);
    let err = h.ctl.error().expect("error");
    assert_eq!(err.load, Some(LoadKind::Refresh));
    assert_eq!(err.message(), "maintenance");
    assert_eq!(h.notes.count(NoticeKind::Error), 1);
}

#[tokio::test(start_paused = true)]
async fn initial_failure_is_recoverable_with_retry() {
    let mut h = harness(invoices(5));
    h.svc.fail_next_list(ApiError::Network("connection refused".into()));
    h.ctl.start();
    h.ctl.settle().await;

    assert_eq!(h.ctl.phase(), LoadPhase::ErrorInitial);
    assert!(h.ctl.page().is_none());
    let err = h.ctl.error().expect("error");
    assert_eq!(err.load, Some(LoadKind::Initial));
    assert!(matches!(err.retry, RetryPath::Reissue(_)));

    h.ctl.retry();
    assert_eq!(h.ctl.phase(), LoadPhase::Loading);
    h.ctl.settle().await;
    assert_eq!(h.ctl.phase(), LoadPhase::Ready);
    assert!(h.ctl.error().is_none());
}

#[tokio::test(start_paused = true)]
async fn auth_failure_on_fetch_routes_to_sign_in() {
    let mut h = harness(invoices(2));
    h.svc.fail_next_list(ApiError::Auth("token expired".into()));
    h.ctl.start();
    h.ctl.settle().await;

    assert!(!h.creds.is_valid());
    assert_eq!(h.ctl.error().map(|e| &e.retry), Some(&RetryPath::SignIn));
}

#[tokio::test(start_paused = true)]
async fn stats_failure_does_not_block_the_list() {
    let mut h = harness(invoices(4));
    h.svc.fail_next_stats(ApiError::Server("stats down".into()));
    h.ctl.start();
    h.ctl.settle().await;

    assert_eq!(h.ctl.phase(), LoadPhase::Ready);
    assert_eq!(h.ctl.page().expect("page").items.len(), 4);
    let stats = h.ctl.stats();
    assert!(stats.snapshot.is_none());
    assert!(stats.error.is_some());
    assert_eq!(h.notes.count(NoticeKind::Error), 0);
}

#[tokio::test(start_paused = true)]
async fn paging_does_not_refetch_counters() {
    let mut h = harness(invoices(25));
    h.ctl.start();
    h.ctl.settle().await;
    h.ctl.set_page(2).expect("page");
    h.ctl.set_sort(Some("-status".into()));
    h.ctl.settle().await;
    assert_eq!(h.svc.stats_calls().len(), 1);

    h.ctl.set_filter("status", "sent");
    h.ctl.settle().await;
    assert_eq!(h.svc.stats_calls().len(), 2);
    assert_eq!(h.ctl.stats().snapshot.and_then(|s| s.get("sent")), Some(12));
}

#[tokio::test(start_paused = true)]
async fn page_out_of_range_for_new_search_is_clamped() {
    let mut h = harness(invoices(25));
    h.ctl.start();
    h.ctl.settle().await;
    assert_eq!(h.ctl.page().expect("page").last_page, 3);

    // "2" matches ids 2, 12 and 20..=25: one page
    h.ctl.set_search_text("2");
    h.ctl.set_page(3).expect("in range of the committed page");
    h.ctl.settle().await;

    assert_eq!(h.ctl.query().page(), 1);
    let page = h.ctl.page().expect("page");
    assert_eq!((page.current_page, page.last_page), (1, 1));
    assert_eq!(page.items.len(), 8);
    let pages: Vec<_> = h.svc.list_calls().into_iter().map(|p| p.page).collect();
    assert_eq!(pages, vec![Some(1), Some(3), Some(1)]);
}

#[tokio::test(start_paused = true)]
async fn counters_follow_the_committed_page_predicate() {
    let mut h = harness(invoices(10));
    h.ctl.start();
    h.ctl.settle().await;

    h.svc.fail_next_list(ApiError::Server("down".into()));
    h.ctl.set_filter("status", "sent");
    h.ctl.settle().await;
    assert_eq!(h.ctl.page().expect("page kept").total, 10);
    assert!(h.ctl.error().is_some());
    let stats = h.ctl.stats();
    assert_eq!(stats.snapshot.and_then(|s| s.get("total")), Some(10), "counters match the page on screen");
    assert!(stats.loading);

    h.ctl.retry();
    h.ctl.settle().await;
    assert_eq!(h.ctl.page().expect("page").total, 5);
    assert_eq!(h.ctl.stats().snapshot.and_then(|s| s.get("total")), Some(5));
}

#[tokio::test(start_paused = true)]
async fn late_failure_of_older_request_is_silent() {
    let mut h = harness(invoices(6));
    h.ctl.start();
    h.ctl.settle().await;

    let gate = h.svc.hold_list(2);
    h.svc.fail_list_at(2, ApiError::Server("slow and broken".into()));
    h.ctl.set_filter("status", "draft");
    h.ctl.set_filter("status", "sent");
    while h.ctl.phase() != LoadPhase::Ready {
        h.ctl.next_update().await;
    }
    gate.release();
    h.ctl.settle().await;

    assert_eq!(h.ctl.phase(), LoadPhase::Ready);
    assert!(h.ctl.error().is_none());
    assert!(h.notes.notices().is_empty());
    assert_eq!(h.ctl.page().expect("page").total, 3);
    assert!(h.ctl.view().current().error.is_none());
}

#[tokio::test(start_paused = true)]
async fn batch_transport_failure_keeps_its_kind() {
    let mut h = harness(invoices(3));
    h.ctl.start();
    h.ctl.settle().await;
    h.ctl.toggle_select_all();
    h.svc.fail_next_mutate(ApiError::Network("connection reset".into()));

    let out = h.ctl.run_bulk_action(&BulkAction::new("delete")).await.expect("outcome");
    assert_eq!(out.failed_ids.len(), 3);
    let err = h.ctl.bulk_error().expect("bulk error");
    assert_eq!(err.error, ApiError::Network("connection reset".into()));
    assert_eq!(h.notes.count(NoticeKind::Error), 1);
}
