//! Bulk mutating actions over the current selection.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use dashsync_api::{ApiError, CollectionService, RequestContext};
use dashsync_core::{BulkActionOutcome, Entity, EntityId};
use futures::future::join_all;
use tracing::{debug, info};

/// Result of an eligibility check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Eligibility {
    Eligible,
    Ineligible(String),
}

type Predicate = Arc<dyn Fn(&Entity) -> Eligibility + Send + Sync>;

/// How eligible ids are submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BulkStrategy {
    /// One `mutate` call carrying every id.
    #[default]
    Batch,
    /// One call per id, issued concurrently.
    PerItem,
}

/// A named mutating action plus the rule deciding which entities it may target.
#[derive(Clone)]
pub struct BulkAction {
    pub name: String,
    pub payload: serde_json::Value,
    pub strategy: BulkStrategy,
    rules: Vec<Predicate>,
}

impl fmt::Debug for BulkAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BulkAction")
            .field("name", &self.name)
            .field("payload", &self.payload)
            .field("strategy", &self.strategy)
            .field("rules", &self.rules.len())
            .finish()
    }
}

impl BulkAction {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), payload: serde_json::Value::Null, strategy: BulkStrategy::Batch, rules: Vec::new() }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_strategy(mut self, strategy: BulkStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Add an eligibility rule; an entity must pass every rule.
    pub fn with_eligibility(mut self, rule: impl Fn(&Entity) -> Eligibility + Send + Sync + 'static) -> Self {
        self.rules.push(Arc::new(rule));
        self
    }

    /// Skip entities whose `key` attribute equals `value`.
    pub fn skip_when(self, key: &str, value: &str) -> Self {
        let (key, value) = (key.to_string(), value.to_string());
        self.with_eligibility(move |e| {
            if e.attr_str(&key) == Some(value.as_str()) {
                Eligibility::Ineligible(format!("{} is \"{}\"", key, value))
            } else {
                Eligibility::Eligible
            }
        })
    }

    pub fn check(&self, entity: &Entity) -> Eligibility {
        for rule in &self.rules {
            if let Eligibility::Ineligible(reason) = rule(entity) {
                return Eligibility::Ineligible(reason);
            }
        }
        Eligibility::Eligible
    }
}

/// Selection split by eligibility, in page order.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Partition {
    pub eligible: Vec<EntityId>,
    pub skipped: Vec<(EntityId, String)>,
}

pub fn partition<'a>(action: &BulkAction, selected: impl IntoIterator<Item = &'a Entity>) -> Partition {
    let mut out = Partition::default();
    for e in selected {
        match action.check(e) {
            Eligibility::Eligible => out.eligible.push(e.id.clone()),
            Eligibility::Ineligible(reason) => out.skipped.push((e.id.clone(), reason)),
        }
    }
    out
}

/// Outcome of [`execute`] plus the error behind each failed id.
#[derive(Debug, Default)]
pub struct BulkRun {
    pub outcome: BulkActionOutcome,
    pub causes: Vec<ApiError>,
}

impl BulkRun {
    fn fail(&mut self, id: &EntityId, err: ApiError) {
        self.outcome.failed_ids.push(id.clone());
        self.outcome.error_per_failure.insert(id.clone(), err.message().to_string());
        self.causes.push(err);
    }

    /// One error summarising the failures, or `None` when nothing failed.
    ///
    /// Keeps the shared kind (and message, if identical) when every failure
    /// has the same kind; mixed kinds yield [`ApiError::Partial`].
    pub fn failure(&self) -> Option<ApiError> {
        let first = self.causes.first()?;
        if self.causes.iter().all(|e| e == first) {
            return Some(first.clone());
        }
        let summary = format!("{} item(s) failed", self.causes.len());
        let same_kind = self.causes.iter().all(|e| std::mem::discriminant(e) == std::mem::discriminant(first));
        Some(match first {
            _ if !same_kind => ApiError::Partial(summary),
            ApiError::Network(_) => ApiError::Network(summary),
            ApiError::Auth(_) => ApiError::Auth(summary),
            ApiError::Validation(_) => ApiError::Validation(summary),
            ApiError::Permission(_) => ApiError::Permission(summary),
            ApiError::NotFound(_) => ApiError::NotFound(summary),
            ApiError::Server(_) => ApiError::Server(summary),
            ApiError::Partial(_) => ApiError::Partial(summary),
        })
    }
}

/// Submit `part.eligible` and build the per-id outcome.
///
/// Any `Auth` error fails the whole run; every other error is attributed to
/// the ids it concerned. Items the server rejects in a `200` response count
/// as `Validation` failures.
pub async fn execute(
    service: &dyn CollectionService,
    ctx: &RequestContext,
    action: &BulkAction,
    part: Partition,
) -> Result<BulkRun, ApiError> {
    let mut run = BulkRun::default();
    run.outcome.action = action.name.clone();
    for (id, reason) in part.skipped {
        run.outcome.reason_per_skip.insert(id.clone(), reason);
        run.outcome.skipped_ids.push(id);
    }
    if part.eligible.is_empty() {
        debug!(action = %action.name, "bulk: nothing eligible, no call made");
        return Ok(run);
    }
    info!(action = %action.name, eligible = part.eligible.len(), skipped = run.outcome.skipped_ids.len(), strategy = ?action.strategy, "bulk: submitting");
    match action.strategy {
        BulkStrategy::Batch => {
            match service.mutate(ctx, &part.eligible, &action.name, &action.payload).await {
                Ok(resp) => {
                    let submitted: BTreeSet<&EntityId> = part.eligible.iter().collect();
                    let ok: BTreeSet<&EntityId> = resp.succeeded.iter().filter(|id| submitted.contains(id)).collect();
                    for id in &part.eligible {
                        if ok.contains(id) {
                            run.outcome.succeeded_ids.push(id.clone());
                            continue;
                        }
                        let err = match resp.failed.iter().find(|f| &f.id == id) {
                            Some(f) => ApiError::Validation(f.message.clone()),
                            None => ApiError::Server("not confirmed by server".to_string()),
                        };
                        run.fail(id, err);
                    }
                    run.outcome.message = resp.message;
                }
                Err(e) if e.is_auth() => return Err(e),
                Err(e) => {
                    for id in &part.eligible {
                        run.fail(id, e.clone());
                    }
                    run.outcome.message = Some(e.to_string());
                }
            }
        }
        BulkStrategy::PerItem => {
            let calls = part.eligible.iter().map(|id| async move {
                let res = service.mutate(ctx, std::slice::from_ref(id), &action.name, &action.payload).await;
                (id, res)
            });
            let results = join_all(calls).await;
            if let Some(e) = results.iter().find_map(|(_, r)| r.as_ref().err().filter(|e| e.is_auth())) {
                return Err(e.clone());
            }
            for (id, res) in results {
                match res {
                    Ok(resp) if resp.succeeded.contains(id) => run.outcome.succeeded_ids.push(id.clone()),
                    Ok(resp) => {
                        let err = match resp.failed.into_iter().next().map(|f| f.message).or(resp.message) {
                            Some(msg) => ApiError::Validation(msg),
                            None => ApiError::Server("not confirmed by server".to_string()),
                        };
                        run.fail(id, err);
                    }
                    Err(e) => run.fail(id, e),
                }
            }
        }
    }
    Ok(run)
}
