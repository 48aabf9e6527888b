//! Current page and the selection derived from it.

use std::sync::Arc;

use dashsync_core::{Entity, EntityId, PageResult};
use rustc_hash::FxHashSet;
use tracing::{debug, warn};

/// Owns the committed page and a selection that never leaves it.
#[derive(Debug, Default)]
pub struct ResultSet {
    page: Option<Arc<PageResult>>,
    selection: FxHashSet<EntityId>,
}

impl ResultSet {
    pub fn new() -> Self { Self::default() }

    pub fn page(&self) -> Option<&Arc<PageResult>> { self.page.as_ref() }

    pub fn last_page(&self) -> Option<u32> { self.page.as_ref().map(|p| p.last_page) }

    /// Replace the page and prune the selection to its ids.
    /// Returns the ids dropped from the selection.
    pub fn commit(&mut self, mut page: PageResult) -> Vec<EntityId> {
        let truncated = page.enforce_capacity();
        if truncated > 0 {
            warn!(truncated, per_page = page.per_page, "page: server returned more items than per_page");
        }
        let keep: FxHashSet<&EntityId> = page.ids().collect();
        let mut pruned: Vec<EntityId> = self.selection.iter().filter(|id| !keep.contains(id)).cloned().collect();
        pruned.sort();
        for id in &pruned {
            self.selection.remove(id);
        }
        if !pruned.is_empty() {
            debug!(pruned = pruned.len(), "selection: pruned ids missing from new page");
        }
        self.page = Some(Arc::new(page));
        pruned
    }

    pub fn is_selected(&self, id: &EntityId) -> bool { self.selection.contains(id) }

    pub fn selection_len(&self) -> usize { self.selection.len() }

    /// Toggle `id`. Returns the new selected state, or `None` when the id is
    /// not on the current page.
    pub fn toggle(&mut self, id: &EntityId) -> Option<bool> {
        let on_page = self.page.as_ref().is_some_and(|p| p.contains(id));
        if !on_page {
            return None;
        }
        if self.selection.remove(id) {
            Some(false)
        } else {
            self.selection.insert(id.clone());
            Some(true)
        }
    }

    /// Select every id of the current page, or clear them if all already are.
    /// Returns true when the page ended up fully selected.
    pub fn toggle_all(&mut self) -> bool {
        let Some(page) = self.page.as_ref() else { return false };
        if page.items.is_empty() {
            return false;
        }
        let all = page.ids().all(|id| self.selection.contains(id));
        if all {
            for id in page.ids() {
                self.selection.remove(id);
            }
            false
        } else {
            self.selection.extend(page.ids().cloned());
            true
        }
    }

    pub fn clear_selection(&mut self) { self.selection.clear(); }

    pub fn deselect(&mut self, ids: &[EntityId]) {
        for id in ids {
            self.selection.remove(id);
        }
    }

    /// Selected entities in page order.
    pub fn selected_entities(&self) -> Vec<&Entity> {
        match self.page.as_ref() {
            Some(p) => p.items.iter().filter(|e| self.selection.contains(&e.id)).collect(),
            None => Vec::new(),
        }
    }

    /// Selected ids in page order.
    pub fn selected_ids(&self) -> Vec<EntityId> {
        self.selected_entities().into_iter().map(|e| e.id.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(ids: &[u64]) -> PageResult {
        PageResult {
            items: ids.iter().map(|i| Entity::new(*i)).collect(),
            current_page: 1,
            last_page: 1,
            per_page: 10,
            total: ids.len() as u64,
        }
    }

    #[test]
    fn commit_prunes_selection_to_page() {
        let mut rs = ResultSet::new();
        rs.commit(page(&[1, 2, 3]));
        rs.toggle(&"1".into());
        rs.toggle(&"3".into());
        let pruned = rs.commit(page(&[2, 3, 4]));
        assert_eq!(pruned, vec![EntityId::from("1")]);
        assert_eq!(rs.selected_ids(), vec![EntityId::from("3")]);
    }

    #[test]
    fn toggle_refuses_ids_off_page() {
        let mut rs = ResultSet::new();
        assert_eq!(rs.toggle(&"1".into()), None);
        rs.commit(page(&[1]));
        assert_eq!(rs.toggle(&"9".into()), None);
        assert_eq!(rs.toggle(&"1".into()), Some(true));
        assert_eq!(rs.toggle(&"1".into()), Some(false));
    }

    #[test]
    fn toggle_all_covers_exactly_the_page() {
        let mut rs = ResultSet::new();
        rs.commit(page(&[1, 2, 3]));
        rs.toggle(&"2".into());
        assert!(rs.toggle_all());
        assert_eq!(rs.selection_len(), 3);
        assert!(!rs.toggle_all());
        assert_eq!(rs.selection_len(), 0);
    }
}
