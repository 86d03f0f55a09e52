//! Scan State: cursor + filter for one search session over one database
//!
//! A cursor only means something together with the epoch it was produced
//! under. Every filter or database change starts a new epoch with the cursor
//! back at start; results tagged with an older epoch are rejected.

use serde::Serialize;

use crate::browser::types::KeyType;
use crate::store::Cursor;

pub const MATCH_ALL: &str = "*";

/// Immutable description of one scan round, tagged with its epoch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanRequest {
    pub epoch: u64,
    pub cursor: Cursor,
    pub pattern: String,
    pub type_filter: Option<KeyType>,
    pub batch_size: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ScanState {
    cursor: Cursor,
    pattern: String,
    type_filter: Option<KeyType>,
    database: u32,
    batch_size: usize,
    epoch: u64,
    exhausted: bool,
}

impl ScanState {
    pub fn new(database: u32, batch_size: usize) -> Self {
        Self {
            cursor: Cursor::start(),
            pattern: MATCH_ALL.to_string(),
            type_filter: None,
            database,
            batch_size: batch_size.max(1),
            epoch: 1,
            exhausted: false,
        }
    }

    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn type_filter(&self) -> Option<KeyType> {
        self.type_filter
    }

    pub fn database(&self) -> u32 {
        self.database
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn is_current(&self, epoch: u64) -> bool {
        self.epoch == epoch
    }

    /// New filter. A blank pattern matches everything.
    pub fn reset(&mut self, pattern: &str, type_filter: Option<KeyType>) -> u64 {
        self.pattern = if pattern.trim().is_empty() {
            MATCH_ALL.to_string()
        } else {
            pattern.to_string()
        };
        self.type_filter = type_filter;
        self.restart()
    }

    pub fn change_database(&mut self, database: u32) -> u64 {
        self.database = database;
        self.restart()
    }

    /// Fresh pass over the keyspace with the current filter.
    pub fn restart(&mut self) -> u64 {
        self.cursor = Cursor::start();
        self.exhausted = false;
        self.bump()
    }

    /// New epoch for the uncommitted position: whatever is in flight becomes
    /// stale, the cursor stays where the last committed round left it.
    pub fn retag(&mut self) -> u64 {
        self.bump()
    }

    fn bump(&mut self) -> u64 {
        self.epoch += 1;
        self.epoch
    }

    pub fn request(&self) -> ScanRequest {
        ScanRequest {
            epoch: self.epoch,
            cursor: self.cursor.clone(),
            pattern: self.pattern.clone(),
            type_filter: self.type_filter,
            batch_size: self.batch_size,
        }
    }

    /// Stores the position reached by a finished round. Returns `false` (and
    /// changes nothing) when the round belongs to another epoch.
    pub fn commit(&mut self, epoch: u64, next_cursor: Cursor, exhausted: bool) -> bool {
        if !self.is_current(epoch) {
            return false;
        }
        self.cursor = next_cursor;
        self.exhausted = exhausted;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_state_starts_at_cursor_start() {
        let state = ScanState::new(0, 100);
        assert!(state.cursor().is_start());
        assert_eq!(state.pattern(), "*");
        assert_eq!(state.epoch(), 1);
        assert!(!state.is_exhausted());
    }

    #[test]
    fn reset_bumps_epoch_and_rewinds_cursor() {
        let mut state = ScanState::new(0, 100);
        assert!(state.commit(1, Cursor::new("6b"), false));

        let epoch = state.reset("u:*", Some(KeyType::Hash));
        assert_eq!(epoch, 2);
        assert!(state.cursor().is_start());
        assert_eq!(state.pattern(), "u:*");
        assert_eq!(state.type_filter(), Some(KeyType::Hash));
    }

    #[test]
    fn blank_pattern_matches_all() {
        let mut state = ScanState::new(0, 100);
        state.reset("   ", None);
        assert_eq!(state.pattern(), MATCH_ALL);
    }

    #[test]
    fn stale_commit_is_rejected() {
        let mut state = ScanState::new(0, 100);
        let stale = state.request();
        state.reset("other*", None);

        assert!(!state.commit(stale.epoch, Cursor::new("6b"), true));
        assert!(state.cursor().is_start());
        assert!(!state.is_exhausted());
    }

    #[test]
    fn retag_keeps_cursor() {
        let mut state = ScanState::new(0, 100);
        assert!(state.commit(1, Cursor::new("6b"), false));

        let epoch = state.retag();
        assert_eq!(epoch, 2);
        assert_eq!(state.cursor(), &Cursor::new("6b"));
        assert!(!state.commit(1, Cursor::start(), true));
    }

    #[test]
    fn database_change_resets() {
        let mut state = ScanState::new(0, 100);
        state.commit(1, Cursor::start(), true);

        state.change_database(3);
        assert_eq!(state.database(), 3);
        assert!(!state.is_exhausted());
        assert!(state.cursor().is_start());
    }
}
