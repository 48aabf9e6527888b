//! Collection service over HTTP/JSON.
//!
//! Endpoints, relative to `base_url/collection`:
//! - `GET  ` with query-string filters → [`ListResponse`]
//! - `POST /bulk` with a [`MutateRequest`] body → [`MutateResponse`]
//! - `GET  /stats` with query-string filters → counters object

use std::time::{Duration, Instant};

use dashsync_core::{EntityId, FilterParams, StatsSnapshot};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::{ApiError, ApiResult, CollectionService, ListResponse, MutateRequest, MutateResponse, RequestContext};

const MAX_ERROR_BODY: usize = 200;

#[derive(Clone)]
pub struct HttpService {
    http: reqwest::Client,
    base_url: String,
    collection: String,
}

impl HttpService {
    /// `timeout` is unset by default: a hung request stays in flight.
    pub fn new(base_url: impl Into<String>, collection: impl Into<String>, timeout: Option<Duration>) -> ApiResult<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(t) = timeout {
            builder = builder.timeout(t);
        }
        let http = builder.build().map_err(|e| ApiError::Network(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            collection: collection.into().trim_matches('/').to_string(),
        })
    }

    fn url(&self, suffix: &str) -> String {
        if suffix.is_empty() {
            format!("{}/{}", self.base_url, self.collection)
        } else {
            format!("{}/{}/{}", self.base_url, self.collection, suffix)
        }
    }

    fn headers(ctx: &RequestContext) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(token) = ctx.token.as_deref() {
            if let Ok(v) = HeaderValue::from_str(&format!("Bearer {}", token)) {
                headers.insert(AUTHORIZATION, v);
            }
        }
        if let Some(id) = ctx.request_id {
            if let Ok(v) = HeaderValue::from_str(&id.to_string()) {
                headers.insert("x-request-id", v);
            }
        }
        headers
    }

    async fn read<T: DeserializeOwned>(what: &str, resp: reqwest::Response) -> ApiResult<T> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let message = error_message(&body).unwrap_or_else(|| {
                status.canonical_reason().unwrap_or("request failed").to_string()
            });
            debug!(what, status = status.as_u16(), "http: error response");
            return Err(ApiError::from_status(status.as_u16(), message));
        }
        resp.json::<T>()
            .await
            .map_err(|e| ApiError::Server(format!("{}: invalid response body: {}", what, e)))
    }
}

/// Prefer a JSON `message`/`error` field, else a trimmed body.
fn error_message(body: &str) -> Option<String> {
    if let Ok(v) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(m) = v.get("message").or_else(|| v.get("error")).and_then(|m| m.as_str()) {
            return Some(m.to_string());
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.chars().take(MAX_ERROR_BODY).collect())
}

fn network(e: reqwest::Error) -> ApiError { ApiError::Network(e.to_string()) }

#[async_trait::async_trait]
impl CollectionService for HttpService {
    async fn list(&self, ctx: &RequestContext, params: &FilterParams) -> ApiResult<ListResponse> {
        let t0 = Instant::now();
        let resp = self
            .http
            .get(self.url(""))
            .headers(Self::headers(ctx))
            .query(&params.to_pairs())
            .send()
            .await
            .map_err(network)?;
        let out: ListResponse = Self::read("list", resp).await?;
        info!(collection = %self.collection, seq = ctx.sequence, items = out.items.len(), took_ms = %t0.elapsed().as_millis(), "http: list ok");
        Ok(out)
    }

    async fn mutate(
        &self,
        ctx: &RequestContext,
        ids: &[EntityId],
        action: &str,
        payload: &serde_json::Value,
    ) -> ApiResult<MutateResponse> {
        let t0 = Instant::now();
        let body = MutateRequest { ids: ids.to_vec(), action: action.to_string(), payload: payload.clone() };
        let resp = self
            .http
            .post(self.url("bulk"))
            .headers(Self::headers(ctx))
            .json(&body)
            .send()
            .await
            .map_err(network)?;
        let out: MutateResponse = Self::read("mutate", resp).await?;
        info!(collection = %self.collection, action, ids = ids.len(), succeeded = out.succeeded.len(), took_ms = %t0.elapsed().as_millis(), "http: mutate ok");
        Ok(out)
    }

    async fn stats(&self, ctx: &RequestContext, params: &FilterParams) -> ApiResult<StatsSnapshot> {
        let t0 = Instant::now();
        let mut params = params.clone();
        params.page = None;
        params.per_page = None;
        let resp = self
            .http
            .get(self.url("stats"))
            .headers(Self::headers(ctx))
            .query(&params.to_pairs())
            .send()
            .await
            .map_err(network)?;
        let out: StatsSnapshot = Self::read("stats", resp).await?;
        info!(collection = %self.collection, counters = out.counters.len(), took_ms = %t0.elapsed().as_millis(), "http: stats ok");
        Ok(out)
    }
}
