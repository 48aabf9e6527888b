//! Query state: what the next fetch should ask for.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Filter value meaning "no constraint"; never sent to the server.
pub const FILTER_ALL: &str = "all";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("page must be at least 1")]
    PageZero,
    #[error("page {page} is out of range 1..={last_page}")]
    PageOutOfRange { page: u32, last_page: u32 },
    #[error("{per_page} rows per page is not one of {allowed:?}")]
    PerPageNotAllowed { per_page: u32, allowed: Vec<u32> },
}

/// Immutable snapshot of a search/filter form, applied in one step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuerySnapshot {
    pub search_text: String,
    pub filters: BTreeMap<String, String>,
}

/// Search text, filters, pagination and sort for one list screen.
///
/// Every mutator returns whether the state actually changed. Changing the
/// search text, a filter, the page size or the sort key resets `page` to 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryState {
    search_text: String,
    filters: BTreeMap<String, String>,
    page: u32,
    per_page: u32,
    sort_key: Option<String>,
}

impl QueryState {
    pub fn new(per_page: u32) -> Self {
        Self { search_text: String::new(), filters: BTreeMap::new(), page: 1, per_page, sort_key: None }
    }

    pub fn search_text(&self) -> &str { &self.search_text }
    pub fn filters(&self) -> &BTreeMap<String, String> { &self.filters }
    pub fn filter(&self, key: &str) -> Option<&str> { self.filters.get(key).map(String::as_str) }
    pub fn page(&self) -> u32 { self.page }
    pub fn per_page(&self) -> u32 { self.per_page }
    pub fn sort_key(&self) -> Option<&str> { self.sort_key.as_deref() }

    pub fn set_search_text(&mut self, text: impl Into<String>) -> bool {
        let text = text.into();
        if text == self.search_text {
            return false;
        }
        self.search_text = text;
        self.page = 1;
        true
    }

    pub fn set_filter(&mut self, key: impl Into<String>, value: impl Into<String>) -> bool {
        let (key, value) = (key.into(), value.into());
        if self.filters.get(&key) == Some(&value) {
            return false;
        }
        self.filters.insert(key, value);
        self.page = 1;
        true
    }

    pub fn clear_filter(&mut self, key: &str) -> bool {
        if self.filters.remove(key).is_none() {
            return false;
        }
        self.page = 1;
        true
    }

    /// Move to page `n`. `last_page` is unknown until a page was committed.
    pub fn set_page(&mut self, n: u32, last_page: Option<u32>) -> Result<bool, QueryError> {
        if n == 0 {
            return Err(QueryError::PageZero);
        }
        if let Some(last_page) = last_page {
            if n > last_page.max(1) {
                return Err(QueryError::PageOutOfRange { page: n, last_page });
            }
        }
        if n == self.page {
            return Ok(false);
        }
        self.page = n;
        Ok(true)
    }

    pub fn set_per_page(&mut self, n: u32, allowed: &[u32]) -> Result<bool, QueryError> {
        if !allowed.contains(&n) {
            return Err(QueryError::PerPageNotAllowed { per_page: n, allowed: allowed.to_vec() });
        }
        if n == self.per_page {
            return Ok(false);
        }
        self.per_page = n;
        self.page = 1;
        Ok(true)
    }

    pub fn set_sort(&mut self, key: Option<String>) -> bool {
        if key == self.sort_key {
            return false;
        }
        self.sort_key = key;
        self.page = 1;
        true
    }

    /// Replace search text and all filters from a form snapshot.
    pub fn apply_snapshot(&mut self, snapshot: QuerySnapshot) -> bool {
        if snapshot.search_text == self.search_text && snapshot.filters == self.filters {
            return false;
        }
        self.search_text = snapshot.search_text;
        self.filters = snapshot.filters;
        self.page = 1;
        true
    }

    /// Parameters for a page fetch.
    pub fn filter_params(&self) -> FilterParams {
        FilterParams {
            page: Some(self.page),
            per_page: Some(self.per_page),
            sort: self.sort_key.clone(),
            ..self.stats_params()
        }
    }

    /// Same predicate as [`filter_params`](Self::filter_params) without
    /// pagination or ordering.
    pub fn stats_params(&self) -> FilterParams {
        let search = self.search_text.trim();
        FilterParams {
            search: if search.is_empty() { None } else { Some(search.to_string()) },
            filters: self
                .filters
                .iter()
                .filter(|(_, v)| !v.is_empty() && v.as_str() != FILTER_ALL)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            page: None,
            per_page: None,
            sort: None,
        }
    }
}

/// Wire-level parameters for `list`/`stats` calls.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterParams {
    pub search: Option<String>,
    pub filters: BTreeMap<String, String>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    pub sort: Option<String>,
}

impl FilterParams {
    /// Flatten into query-string pairs in a stable order.
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        let mut out = Vec::with_capacity(self.filters.len() + 4);
        if let Some(s) = &self.search {
            out.push(("search".to_string(), s.clone()));
        }
        for (k, v) in &self.filters {
            out.push((k.clone(), v.clone()));
        }
        if let Some(p) = self.page {
            out.push(("page".to_string(), p.to_string()));
        }
        if let Some(n) = self.per_page {
            out.push(("per_page".to_string(), n.to_string()));
        }
        if let Some(s) = &self.sort {
            out.push(("sort".to_string(), s.clone()));
        }
        out
    }
}
