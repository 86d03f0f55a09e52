//! Page Model: what the presentation layer renders
//!
//! Items keep scan discovery order. Scans replace or extend the list;
//! dispatcher outcomes edit single records in place.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::browser::scan_state::ScanState;
use crate::browser::types::{KeyRecord, KeyType};

#[derive(Clone, Debug, Default)]
pub struct PageModel {
    items: Vec<KeyRecord>,
    /// Keys of `items`, for O(1) membership while pages accumulate.
    listed: HashSet<String>,
    loading: bool,
    exhausted: bool,
    total_estimate: u64,
    selected: Option<String>,
    refreshed_at: Option<DateTime<Utc>>,
}

impl PageModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> &[KeyRecord] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn total_estimate(&self) -> u64 {
        self.total_estimate
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn get(&self, key: &str) -> Option<&KeyRecord> {
        self.items.iter().find(|record| record.key == key)
    }

    pub fn position(&self, key: &str) -> Option<usize> {
        self.items.iter().position(|record| record.key == key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.listed.contains(key)
    }

    pub fn set_loading(&mut self, loading: bool) {
        self.loading = loading;
    }

    // ========================================
    // SCAN RECONCILIATION
    // ========================================

    /// First page of an epoch. Selection survives only if its key is listed again.
    pub fn replace(&mut self, records: Vec<KeyRecord>, exhausted: bool, total_estimate: Option<u64>) {
        self.items.clear();
        self.listed.clear();
        for record in records {
            if self.listed.insert(record.key.clone()) {
                self.items.push(record);
            }
        }
        self.finish_round(exhausted, total_estimate);
        if let Some(selected) = &self.selected {
            if !self.contains(selected) {
                self.selected = None;
            }
        }
    }

    /// Next page of the same epoch. Keys already listed are skipped; returns
    /// how many records were added.
    pub fn append(&mut self, records: Vec<KeyRecord>, exhausted: bool, total_estimate: Option<u64>) -> usize {
        let before = self.items.len();
        for record in records {
            if self.listed.insert(record.key.clone()) {
                self.items.push(record);
            }
        }
        self.finish_round(exhausted, total_estimate);
        self.items.len() - before
    }

    fn finish_round(&mut self, exhausted: bool, total_estimate: Option<u64>) {
        self.loading = false;
        self.exhausted = exhausted;
        if let Some(total) = total_estimate {
            self.total_estimate = total;
        }
        self.refreshed_at = Some(Utc::now());
    }

    // ========================================
    // COMMAND RECONCILIATION
    // ========================================

    /// Removes the record for `key`, clearing the selection if it pointed there.
    pub fn remove(&mut self, key: &str) -> Option<KeyRecord> {
        let index = self.position(key)?;
        let record = self.items.remove(index);
        self.listed.remove(key);
        if self.selected.as_deref() == Some(key) {
            self.selected = None;
        }
        self.total_estimate = self.total_estimate.saturating_sub(1);
        Some(record)
    }

    /// Renames in place, keeping the record's position (and the selection).
    pub fn rename(&mut self, old_key: &str, new_key: &str) -> bool {
        let Some(index) = self.position(old_key) else {
            return false;
        };
        if old_key == new_key {
            return true;
        }
        // A stale listing of the new name would now be a duplicate.
        if let Some(dup) = self.position(new_key) {
            self.items.remove(dup);
        }
        let index = self.position(old_key).unwrap_or(index);
        self.items[index].key = new_key.to_string();
        self.listed.remove(old_key);
        self.listed.insert(new_key.to_string());
        if self.selected.as_deref() == Some(old_key) {
            self.selected = Some(new_key.to_string());
        }
        true
    }

    pub fn set_ttl(&mut self, key: &str, ttl: i64) -> bool {
        match self.items.iter_mut().find(|record| record.key == key) {
            Some(record) => {
                record.ttl = ttl;
                true
            }
            None => false,
        }
    }

    pub fn update_details(&mut self, key: &str, key_type: KeyType, ttl: i64) -> bool {
        match self.items.iter_mut().find(|record| record.key == key) {
            Some(record) => {
                record.key_type = key_type;
                record.ttl = ttl;
                true
            }
            None => false,
        }
    }

    /// Empties the page, e.g. after a flush or a database switch.
    pub fn clear(&mut self) {
        self.items.clear();
        self.listed.clear();
        self.exhausted = false;
        self.total_estimate = 0;
        self.selected = None;
    }

    // ========================================
    // SELECTION
    // ========================================

    pub fn select(&mut self, key: &str) -> bool {
        if self.contains(key) {
            self.selected = Some(key.to_string());
            true
        } else {
            false
        }
    }

    pub fn clear_selection(&mut self) {
        self.selected = None;
    }

    pub fn snapshot(&self, state: &ScanState) -> PageSnapshot {
        PageSnapshot {
            epoch: state.epoch(),
            database: state.database(),
            pattern: state.pattern().to_string(),
            type_filter: state.type_filter(),
            items: self.items.clone(),
            loading: self.loading,
            exhausted: self.exhausted,
            total_estimate: self.total_estimate,
            selected: self.selected.clone(),
            refreshed_at: self.refreshed_at,
        }
    }
}

/// Point-in-time copy of a session's page, safe to hand to other tasks.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PageSnapshot {
    pub epoch: u64,
    pub database: u32,
    pub pattern: String,
    pub type_filter: Option<KeyType>,
    pub items: Vec<KeyRecord>,
    pub loading: bool,
    pub exhausted: bool,
    pub total_estimate: u64,
    pub selected: Option<String>,
    pub refreshed_at: Option<DateTime<Utc>>,
}

impl PageSnapshot {
    pub fn keys(&self) -> Vec<&str> {
        self.items.iter().map(|record| record.key.as_str()).collect()
    }

    pub fn get(&self, key: &str) -> Option<&KeyRecord> {
        self.items.iter().find(|record| record.key == key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records(keys: &[&str]) -> Vec<KeyRecord> {
        keys.iter().map(|k| KeyRecord::new(*k, KeyType::String)).collect()
    }

    fn keys(page: &PageModel) -> Vec<&str> {
        page.items().iter().map(|r| r.key.as_str()).collect()
    }

    #[test]
    fn replace_then_append_keeps_discovery_order() {
        let mut page = PageModel::new();
        page.set_loading(true);
        page.replace(records(&["b", "a"]), false, Some(10));
        assert!(!page.is_loading());

        let added = page.append(records(&["a", "c"]), true, None);
        assert_eq!(added, 1);
        assert_eq!(keys(&page), vec!["b", "a", "c"]);
        assert!(page.is_exhausted());
        assert_eq!(page.total_estimate(), 10);
    }

    #[test]
    fn remove_clears_matching_selection() {
        let mut page = PageModel::new();
        page.replace(records(&["u:1", "u:2"]), true, Some(2));
        assert!(page.select("u:1"));

        let removed = page.remove("u:1").unwrap();
        assert_eq!(removed.key, "u:1");
        assert_eq!(page.selected(), None);
        assert_eq!(keys(&page), vec!["u:2"]);
        assert_eq!(page.total_estimate(), 1);
        assert!(page.remove("u:1").is_none());
    }

    #[test]
    fn remove_keeps_other_selection() {
        let mut page = PageModel::new();
        page.replace(records(&["u:1", "u:2"]), true, None);
        page.select("u:2");
        page.remove("u:1");
        assert_eq!(page.selected(), Some("u:2"));
    }

    #[test]
    fn rename_keeps_position_and_follows_selection() {
        let mut page = PageModel::new();
        page.replace(records(&["a", "b", "c"]), true, None);
        page.select("b");

        assert!(page.rename("b", "z"));
        assert_eq!(keys(&page), vec!["a", "z", "c"]);
        assert_eq!(page.selected(), Some("z"));
    }

    #[test]
    fn rename_drops_stale_duplicate() {
        let mut page = PageModel::new();
        page.replace(records(&["a", "b", "c"]), true, None);

        assert!(page.rename("c", "a"));
        assert_eq!(keys(&page), vec!["b", "a"]);
    }

    #[test]
    fn replace_drops_selection_that_is_no_longer_listed() {
        let mut page = PageModel::new();
        page.replace(records(&["a"]), true, None);
        page.select("a");
        page.replace(records(&["b"]), true, None);
        assert_eq!(page.selected(), None);
    }

    #[test]
    fn set_ttl_and_details_in_place() {
        let mut page = PageModel::new();
        page.replace(records(&["a"]), true, None);

        assert!(page.set_ttl("a", 30));
        assert_eq!(page.get("a").unwrap().ttl, 30);

        assert!(page.update_details("a", KeyType::Hash, -1));
        let record = page.get("a").unwrap();
        assert_eq!(record.key_type, KeyType::Hash);
        assert_eq!(record.ttl, -1);

        assert!(!page.set_ttl("missing", 1));
    }

    #[test]
    fn membership_follows_every_edit() {
        let mut page = PageModel::new();
        page.replace(records(&["a", "b", "a"]), false, None);
        assert_eq!(keys(&page), vec!["a", "b"]);

        page.rename("a", "x");
        assert!(!page.contains("a"));
        assert!(page.contains("x"));

        page.remove("b");
        assert!(!page.contains("b"));
        assert_eq!(page.append(records(&["b", "x"]), true, None), 1);
        assert_eq!(keys(&page), vec!["x", "b"]);

        page.clear();
        assert!(!page.contains("x"));
    }

    #[test]
    fn append_over_large_listing_stays_deduplicated() {
        let mut page = PageModel::new();
        let batch: Vec<String> = (0..5_000).map(|i| format!("key:{}", i)).collect();
        let refs: Vec<&str> = batch.iter().map(String::as_str).collect();

        page.replace(records(&refs[..2_500]), false, None);
        assert_eq!(page.append(records(&refs[2_000..]), true, None), 2_500);
        assert_eq!(page.len(), 5_000);
    }

    #[test]
    fn clear_resets_everything_but_loading() {
        let mut page = PageModel::new();
        page.replace(records(&["a"]), true, Some(5));
        page.select("a");
        page.clear();

        assert!(page.is_empty());
        assert!(!page.is_exhausted());
        assert_eq!(page.total_estimate(), 0);
        assert_eq!(page.selected(), None);
    }
}
