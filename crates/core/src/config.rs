//! Controller tunables with environment overrides.

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_DEBOUNCE_MS: u64 = 500;
pub const DEFAULT_PER_PAGE_OPTIONS: [u32; 4] = [10, 25, 50, 100];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Quiet window for debounced edits (search text).
    pub debounce_ms: u64,
    pub allowed_per_page: Vec<u32>,
    pub default_per_page: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            allowed_per_page: DEFAULT_PER_PAGE_OPTIONS.to_vec(),
            default_per_page: DEFAULT_PER_PAGE_OPTIONS[0],
        }
    }
}

impl SyncConfig {
    /// Defaults overridden by `DASHSYNC_DEBOUNCE_MS`, `DASHSYNC_PER_PAGE_OPTIONS`
    /// (comma separated) and `DASHSYNC_PER_PAGE`.
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();
        if let Some(ms) = get("DASHSYNC_DEBOUNCE_MS").and_then(|s| s.trim().parse::<u64>().ok()) {
            cfg.debounce_ms = ms;
        }
        if let Some(raw) = get("DASHSYNC_PER_PAGE_OPTIONS") {
            let mut opts: Vec<u32> = raw
                .split(',')
                .filter_map(|s| s.trim().parse::<u32>().ok())
                .filter(|n| *n > 0)
                .collect();
            opts.sort_unstable();
            opts.dedup();
            if !opts.is_empty() {
                cfg.allowed_per_page = opts;
            }
        }
        if let Some(n) = get("DASHSYNC_PER_PAGE").and_then(|s| s.trim().parse::<u32>().ok()) {
            cfg.default_per_page = n;
        }
        cfg.normalized()
    }

    /// Ensure the default page size is one of the allowed sizes.
    pub fn normalized(mut self) -> Self {
        if self.allowed_per_page.is_empty() {
            self.allowed_per_page = DEFAULT_PER_PAGE_OPTIONS.to_vec();
        }
        if !self.allowed_per_page.contains(&self.default_per_page) {
            self.default_per_page = self.allowed_per_page[0];
        }
        self
    }

    pub fn debounce(&self) -> Duration { Duration::from_millis(self.debounce_ms) }
}
