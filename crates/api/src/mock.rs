//! In-memory collection used by tests and demos.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use dashsync_core::{Entity, EntityId, FilterParams, StatsSnapshot};
use tokio::sync::oneshot;
use tracing::debug;

use crate::{ApiError, ApiResult, CollectionService, ItemFailure, ListResponse, MutateResponse, RequestContext};

const MOCK_DEFAULT_PER_PAGE: u32 = 10;

/// A recorded `mutate` invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct MutateCall {
    pub ids: Vec<EntityId>,
    pub action: String,
    pub payload: serde_json::Value,
}

/// Releases a held `list` call so tests can force out-of-order completion.
pub struct ReleaseGate {
    tx: oneshot::Sender<()>,
}

impl ReleaseGate {
    pub fn release(self) { let _ = self.tx.send(()); }
}

#[derive(Default)]
struct MockState {
    entities: Vec<Entity>,
    list_calls: Vec<FilterParams>,
    stats_calls: Vec<FilterParams>,
    mutate_calls: Vec<MutateCall>,
    list_failures: VecDeque<ApiError>,
    list_failures_at: HashMap<u64, ApiError>,
    stats_failures: VecDeque<ApiError>,
    mutate_failures: VecDeque<ApiError>,
    item_failures: HashMap<EntityId, ApiError>,
    list_gates: HashMap<u64, oneshot::Receiver<()>>,
}

/// Collection backed by a vector of entities.
///
/// Search is a case-insensitive substring match over the id and string
/// attributes; filters match attributes exactly; `sort` takes an attribute
/// name, prefixed with `-` for descending order. `delete` removes entities,
/// every other action merges its object payload into the targeted entities.
#[derive(Default)]
pub struct MockService {
    state: Mutex<MockState>,
}

impl MockService {
    pub fn new() -> Self { Self::default() }

    pub fn with_entities(entities: Vec<Entity>) -> Self {
        let svc = Self::default();
        svc.state().entities = entities;
        svc
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn entities(&self) -> Vec<Entity> { self.state().entities.clone() }
    pub fn set_entities(&self, entities: Vec<Entity>) { self.state().entities = entities; }
    pub fn list_calls(&self) -> Vec<FilterParams> { self.state().list_calls.clone() }
    pub fn stats_calls(&self) -> Vec<FilterParams> { self.state().stats_calls.clone() }
    pub fn mutate_calls(&self) -> Vec<MutateCall> { self.state().mutate_calls.clone() }

    pub fn fail_next_list(&self, err: ApiError) { self.state().list_failures.push_back(err); }
    pub fn fail_next_stats(&self, err: ApiError) { self.state().stats_failures.push_back(err); }
    pub fn fail_next_mutate(&self, err: ApiError) { self.state().mutate_failures.push_back(err); }

    /// Fail the `list` call carrying `sequence`, regardless of call order.
    pub fn fail_list_at(&self, sequence: u64, err: ApiError) { self.state().list_failures_at.insert(sequence, err); }

    /// Make every mutation of `id` fail with `err`.
    pub fn fail_item(&self, id: impl Into<EntityId>, err: ApiError) {
        self.state().item_failures.insert(id.into(), err);
    }

    /// Hold the `list` call carrying `sequence` until the gate is released.
    pub fn hold_list(&self, sequence: u64) -> ReleaseGate {
        let (tx, rx) = oneshot::channel();
        self.state().list_gates.insert(sequence, rx);
        ReleaseGate { tx }
    }

    fn matching(entities: &[Entity], params: &FilterParams) -> Vec<Entity> {
        let needle = params.search.as_deref().map(str::to_lowercase);
        let mut out: Vec<Entity> = entities
            .iter()
            .filter(|e| {
                params.filters.iter().all(|(k, v)| match e.attr(k) {
                    Some(serde_json::Value::String(s)) => s == v,
                    Some(other) => other.to_string() == *v,
                    None => false,
                })
            })
            .filter(|e| match &needle {
                None => true,
                Some(n) => {
                    e.id.as_str().to_lowercase().contains(n.as_str())
                        || e.attributes.values().any(|v| v.as_str().is_some_and(|s| s.to_lowercase().contains(n.as_str())))
                }
            })
            .cloned()
            .collect();
        if let Some(sort) = params.sort.as_deref() {
            let (key, desc) = match sort.strip_prefix('-') {
                Some(k) => (k, true),
                None => (sort, false),
            };
            out.sort_by(|a, b| {
                let av = a.attr(key).map(|v| v.to_string()).unwrap_or_default();
                let bv = b.attr(key).map(|v| v.to_string()).unwrap_or_default();
                if desc { bv.cmp(&av) } else { av.cmp(&bv) }
            });
        }
        out
    }
}

#[async_trait::async_trait]
impl CollectionService for MockService {
    async fn list(&self, ctx: &RequestContext, params: &FilterParams) -> ApiResult<ListResponse> {
        let (result, gate) = {
            let mut st = self.state();
            st.list_calls.push(params.clone());
            let gate = st.list_gates.remove(&ctx.sequence);
            let failure = st.list_failures_at.remove(&ctx.sequence).or_else(|| st.list_failures.pop_front());
            let result = match failure {
                Some(err) => Err(err),
                None => {
                    let all = Self::matching(&st.entities, params);
                    let per_page = params.per_page.unwrap_or(MOCK_DEFAULT_PER_PAGE).max(1);
                    let page = params.page.unwrap_or(1).max(1);
                    let total = all.len() as u64;
                    let last_page = (all.len() as u32).div_ceil(per_page).max(1);
                    let start = ((page - 1) * per_page) as usize;
                    let items = all.into_iter().skip(start).take(per_page as usize).collect();
                    Ok(ListResponse { items, page, per_page, total, last_page })
                }
            };
            (result, gate)
        };
        if let Some(rx) = gate {
            debug!(seq = ctx.sequence, "mock: list held");
            let _ = rx.await;
        }
        result
    }

    async fn mutate(
        &self,
        _ctx: &RequestContext,
        ids: &[EntityId],
        action: &str,
        payload: &serde_json::Value,
    ) -> ApiResult<MutateResponse> {
        let mut st = self.state();
        st.mutate_calls.push(MutateCall { ids: ids.to_vec(), action: action.to_string(), payload: payload.clone() });
        if let Some(err) = st.mutate_failures.pop_front() {
            return Err(err);
        }
        if let Some(err) = ids.iter().filter_map(|id| st.item_failures.get(id)).find(|e| e.is_auth()) {
            return Err(err.clone());
        }
        let mut resp = MutateResponse::default();
        for id in ids {
            if let Some(err) = st.item_failures.get(id) {
                let message = err.message().to_string();
                resp.failed.push(ItemFailure { id: id.clone(), message });
                continue;
            }
            let Some(pos) = st.entities.iter().position(|e| &e.id == id) else {
                resp.failed.push(ItemFailure { id: id.clone(), message: "not found".into() });
                continue;
            };
            if action == "delete" {
                st.entities.remove(pos);
            } else if let Some(obj) = payload.as_object() {
                for (k, v) in obj {
                    st.entities[pos].attributes.insert(k.clone(), v.clone());
                }
            }
            resp.succeeded.push(id.clone());
        }
        resp.message = Some(format!("{} {} of {}", action, resp.succeeded.len(), ids.len()));
        Ok(resp)
    }

    async fn stats(&self, _ctx: &RequestContext, params: &FilterParams) -> ApiResult<StatsSnapshot> {
        let mut st = self.state();
        st.stats_calls.push(params.clone());
        if let Some(err) = st.stats_failures.pop_front() {
            return Err(err);
        }
        let all = Self::matching(&st.entities, params);
        let mut snap = StatsSnapshot::default();
        snap.counters.insert("total".into(), all.len() as u64);
        for e in &all {
            if let Some(status) = e.attr_str("status") {
                *snap.counters.entry(status.to_string()).or_insert(0) += 1;
            }
        }
        Ok(snap)
    }
}
