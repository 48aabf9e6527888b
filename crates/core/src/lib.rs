//! dashsync core types
//!
//! Plain data shared by the API façade, the sync controller and frontends.
//! Nothing in this crate performs I/O.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

pub mod config;
pub mod query;

pub use config::SyncConfig;
pub use query::{FilterParams, QueryError, QuerySnapshot, QueryState};

/// Server-assigned entity identifier.
///
/// Remote collections disagree on whether ids are numbers or strings; both
/// decode into the same textual form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

impl From<&str> for EntityId {
    fn from(v: &str) -> Self { Self(v.to_string()) }
}

impl From<String> for EntityId {
    fn from(v: String) -> Self { Self(v) }
}

impl From<u64> for EntityId {
    fn from(v: u64) -> Self { Self(v.to_string()) }
}

impl<'de> Deserialize<'de> for EntityId {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Unsigned(u64),
            Signed(i64),
        }
        Ok(match Raw::deserialize(d)? {
            Raw::Text(s) => EntityId(s),
            Raw::Unsigned(n) => EntityId(n.to_string()),
            Raw::Signed(n) => EntityId(n.to_string()),
        })
    }
}

/// A row of a remote collection (transaction, notification, user, report…).
///
/// List screens are heterogeneous, so everything but the id stays a JSON
/// attribute bag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    #[serde(flatten)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

impl Entity {
    pub fn new(id: impl Into<EntityId>) -> Self {
        Self { id: id.into(), attributes: serde_json::Map::new() }
    }

    pub fn with_attr(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    pub fn attr(&self, key: &str) -> Option<&serde_json::Value> { self.attributes.get(key) }

    pub fn attr_str(&self, key: &str) -> Option<&str> { self.attr(key).and_then(|v| v.as_str()) }
}

/// One committed page of a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageResult {
    pub items: Vec<Entity>,
    pub current_page: u32,
    pub last_page: u32,
    pub per_page: u32,
    pub total: u64,
}

impl PageResult {
    pub fn empty(per_page: u32) -> Self {
        Self { items: Vec::new(), current_page: 1, last_page: 1, per_page, total: 0 }
    }

    pub fn ids(&self) -> impl Iterator<Item = &EntityId> + '_ { self.items.iter().map(|e| &e.id) }

    pub fn contains(&self, id: &EntityId) -> bool { self.items.iter().any(|e| &e.id == id) }

    pub fn get(&self, id: &EntityId) -> Option<&Entity> { self.items.iter().find(|e| &e.id == id) }

    /// Truncate items to `per_page`, returning how many were dropped.
    pub fn enforce_capacity(&mut self) -> usize {
        let cap = self.per_page as usize;
        if cap == 0 || self.items.len() <= cap {
            return 0;
        }
        let dropped = self.items.len() - cap;
        self.items.truncate(cap);
        dropped
    }
}

/// Aggregate counters over the active filter predicate (pagination ignored).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    #[serde(flatten)]
    pub counters: BTreeMap<String, u64>,
}

impl StatsSnapshot {
    pub fn get(&self, key: &str) -> Option<u64> { self.counters.get(key).copied() }
}

/// Per-id report of a bulk mutating action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkActionOutcome {
    pub action: String,
    pub succeeded_ids: Vec<EntityId>,
    pub skipped_ids: Vec<EntityId>,
    pub reason_per_skip: BTreeMap<EntityId, String>,
    /// Submitted ids the server rejected.
    pub failed_ids: Vec<EntityId>,
    pub error_per_failure: BTreeMap<EntityId, String>,
    pub message: Option<String>,
}

impl BulkActionOutcome {
    /// True when no id was eligible and nothing was submitted.
    pub fn nothing_to_do(&self) -> bool { self.succeeded_ids.is_empty() && self.failed_ids.is_empty() }

    pub fn notice_kind(&self) -> NoticeKind {
        if self.nothing_to_do() {
            NoticeKind::Info
        } else if self.succeeded_ids.is_empty() {
            NoticeKind::Error
        } else if self.failed_ids.is_empty() && self.skipped_ids.is_empty() {
            NoticeKind::Success
        } else {
            NoticeKind::Warning
        }
    }

    pub fn summary(&self) -> String {
        if self.nothing_to_do() {
            return format!("{}: nothing to do ({} skipped)", self.action, self.skipped_ids.len());
        }
        let mut s = format!("{}: {} succeeded", self.action, self.succeeded_ids.len());
        if !self.skipped_ids.is_empty() {
            s.push_str(&format!(", {} skipped", self.skipped_ids.len()));
        }
        if !self.failed_ids.is_empty() {
            s.push_str(&format!(", {} failed", self.failed_ids.len()));
        }
        s
    }
}

/// Kind of a user-facing notice. Presentation is up to the frontend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeKind {
    Info,
    Success,
    Warning,
    Error,
}

impl NoticeKind {
    pub fn label(self) -> &'static str {
        match self {
            NoticeKind::Info => "info",
            NoticeKind::Success => "success",
            NoticeKind::Warning => "warning",
            NoticeKind::Error => "error",
        }
    }

    /// How long a frontend should keep the notice on screen.
    pub fn duration_ms(self) -> u64 {
        match self {
            NoticeKind::Error => 5000,
            NoticeKind::Warning => 4000,
            _ => 3000,
        }
    }
}

pub mod prelude {
    pub use super::{
        BulkActionOutcome, Entity, EntityId, FilterParams, NoticeKind, PageResult, QuerySnapshot,
        QueryState, StatsSnapshot, SyncConfig,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_id_accepts_numbers_and_strings() {
        let e: Entity = serde_json::from_value(serde_json::json!({"id": 42, "status": "sent"})).expect("decode");
        assert_eq!(e.id, EntityId::from("42"));
        assert_eq!(e.attr_str("status"), Some("sent"));
        let e: Entity = serde_json::from_value(serde_json::json!({"id": "tx-9"})).expect("decode");
        assert_eq!(e.id.as_str(), "tx-9");
    }

    #[test]
    fn enforce_capacity_truncates_surplus() {
        let mut p = PageResult {
            items: (0..5u64).map(Entity::new).collect(),
            current_page: 1,
            last_page: 1,
            per_page: 3,
            total: 5,
        };
        assert_eq!(p.enforce_capacity(), 2);
        assert_eq!(p.items.len(), 3);
        assert_eq!(p.enforce_capacity(), 0);
    }

    #[test]
    fn outcome_notice_kind_reflects_partial_results() {
        let mut o = BulkActionOutcome { action: "delete".into(), ..Default::default() };
        assert_eq!(o.notice_kind(), NoticeKind::Info);
        o.succeeded_ids.push("1".into());
        assert_eq!(o.notice_kind(), NoticeKind::Success);
        o.skipped_ids.push("2".into());
        assert_eq!(o.notice_kind(), NoticeKind::Warning);
        assert_eq!(o.summary(), "delete: 1 succeeded, 1 skipped");
    }
}
