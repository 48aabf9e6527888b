//! dashsync API façade.
//!
//! This crate defines the traits and wire types the sync controller depends on:
//! the remote collection service, the credential source and the notification
//! sink. Implementations are remote (HTTP) or in-memory (tests, demos).

#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex};

use arc_swap::ArcSwapOption;
use dashsync_core::{Entity, EntityId, FilterParams, NoticeKind, PageResult, StatsSnapshot};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

mod http;
mod mock;

pub use http::HttpService;
pub use mock::{MockService, MutateCall, ReleaseGate};

/// Errors returned by collection calls; cloneable so views can hold them.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum ApiError {
    /// No response reached us.
    #[error("network: {0}")]
    Network(String),
    /// 401; the session is no longer valid.
    #[error("auth: {0}")]
    Auth(String),
    /// 400/409/422; e.g. the action is not allowed for the entity's state.
    #[error("validation: {0}")]
    Validation(String),
    #[error("permission: {0}")]
    Permission(String),
    #[error("not_found: {0}")]
    NotFound(String),
    /// 5xx and anything unclassified.
    #[error("server: {0}")]
    Server(String),
    /// Summary of a bulk run whose items failed for different reasons.
    #[error("partial: {0}")]
    Partial(String),
}

impl ApiError {
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            400 | 409 | 422 => ApiError::Validation(message),
            401 => ApiError::Auth(message),
            403 => ApiError::Permission(message),
            404 => ApiError::NotFound(message),
            _ => ApiError::Server(message),
        }
    }

    pub fn is_auth(&self) -> bool { matches!(self, ApiError::Auth(_)) }

    /// Short human-readable text without the kind prefix.
    pub fn message(&self) -> &str {
        match self {
            ApiError::Network(m)
            | ApiError::Auth(m)
            | ApiError::Validation(m)
            | ApiError::Permission(m)
            | ApiError::NotFound(m)
            | ApiError::Server(m)
            | ApiError::Partial(m) => m,
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Per-call context handed to the service by the controller.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub token: Option<String>,
    /// Controller-side sequence number of the request (0 for mutations).
    pub sequence: u64,
    pub request_id: Option<uuid::Uuid>,
}

/// `list` response as served by the collection endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListResponse {
    #[serde(alias = "data")]
    pub items: Vec<Entity>,
    #[serde(alias = "current_page")]
    pub page: u32,
    pub per_page: u32,
    pub total: u64,
    pub last_page: u32,
}

impl ListResponse {
    pub fn into_page_result(self) -> PageResult {
        PageResult {
            items: self.items,
            current_page: self.page,
            last_page: self.last_page,
            per_page: self.per_page,
            total: self.total,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutateRequest {
    pub ids: Vec<EntityId>,
    pub action: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub id: EntityId,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutateResponse {
    #[serde(default)]
    pub succeeded: Vec<EntityId>,
    #[serde(default)]
    pub failed: Vec<ItemFailure>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Remote collection surface consumed by list screens.
#[async_trait::async_trait]
pub trait CollectionService: Send + Sync {
    /// One page of entities matching `params`.
    async fn list(&self, ctx: &RequestContext, params: &FilterParams) -> ApiResult<ListResponse>;

    /// Apply `action` to `ids`. The server reports success per id.
    async fn mutate(
        &self,
        ctx: &RequestContext,
        ids: &[EntityId],
        action: &str,
        payload: &serde_json::Value,
    ) -> ApiResult<MutateResponse>;

    /// Aggregate counters over `params` (pagination fields are ignored).
    async fn stats(&self, ctx: &RequestContext, params: &FilterParams) -> ApiResult<StatsSnapshot>;
}

/// Source of the bearer token; injected instead of read from ambient storage.
pub trait CredentialProvider: Send + Sync {
    fn token(&self) -> Option<String>;
    /// Called when the server rejected the token.
    fn invalidate(&self);
}

/// Token held in memory until invalidated.
#[derive(Default)]
pub struct StaticCredentials {
    token: ArcSwapOption<String>,
}

impl StaticCredentials {
    pub fn new(token: Option<String>) -> Self { Self { token: ArcSwapOption::from(token.map(Arc::new)) } }

    pub fn set(&self, token: Option<String>) { self.token.store(token.map(Arc::new)); }

    pub fn is_valid(&self) -> bool { self.token.load().is_some() }
}

impl CredentialProvider for StaticCredentials {
    fn token(&self) -> Option<String> { self.token.load_full().map(|t| (*t).clone()) }

    fn invalidate(&self) {
        if self.token.swap(None).is_some() {
            info!("credentials invalidated");
        }
    }
}

/// Sink for user-facing notices.
pub trait Notifier: Send + Sync {
    fn notify(&self, kind: NoticeKind, message: &str);
}

/// Notifier that only logs.
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, kind: NoticeKind, message: &str) {
        match kind {
            NoticeKind::Error => error!(kind = kind.label(), "{}", message),
            NoticeKind::Warning => warn!(kind = kind.label(), "{}", message),
            _ => info!(kind = kind.label(), "{}", message),
        }
    }
}

/// Notifier that keeps every notice, for tests and headless runs.
#[derive(Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<(NoticeKind, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self { Self::default() }

    pub fn notices(&self) -> Vec<(NoticeKind, String)> {
        self.notices.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn count(&self, kind: NoticeKind) -> usize {
        self.notices().iter().filter(|(k, _)| *k == kind).count()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, kind: NoticeKind, message: &str) {
        if let Ok(mut v) = self.notices.lock() {
            v.push((kind, message.to_string()));
        }
    }
}
