//! Keyspace Scanner: turns cursor iteration into pages
//!
//! One `scan` call issues iteration rounds until the page is full, the store
//! hands back the start cursor (full pass), or the round cap is hit. Sparse
//! filters over huge keyspaces can return empty batches for a long time, so
//! the cap ends the pass instead of failing it.
//!
//! A round can overshoot the page size; the surplus is kept because the
//! cursor has already moved past those keys.

use std::collections::HashSet;

use futures_util::future::join_all;
use tracing::{debug, warn};

use crate::browser::scan_state::ScanRequest;
use crate::browser::types::{KeyRecord, KeyType};
use crate::config::BrowserConfig;
use crate::error::{BrowserError, Result, StoreError};
use crate::store::{Cursor, StoreCapability};

/// Result of one scan, still tagged with the epoch it was issued under.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanOutcome {
    pub epoch: u64,
    pub records: Vec<KeyRecord>,
    pub next_cursor: Cursor,
    pub exhausted: bool,
    pub rounds: usize,
    pub total_estimate: Option<u64>,
}

#[derive(Clone, Debug)]
pub struct KeyspaceScanner {
    page_size: usize,
    max_rounds: usize,
    resolve_types: bool,
}

impl KeyspaceScanner {
    pub fn new(config: &BrowserConfig) -> Self {
        Self {
            page_size: config.page_size.max(1),
            max_rounds: config.max_scan_rounds.max(1),
            resolve_types: config.resolve_types,
        }
    }

    pub async fn scan<S>(&self, store: &S, request: &ScanRequest) -> Result<ScanOutcome>
    where
        S: StoreCapability + ?Sized,
    {
        let mut cursor = request.cursor.clone();
        let mut keys: Vec<String> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut rounds = 0;

        let exhausted = loop {
            if keys.len() >= self.page_size {
                break false;
            }
            if rounds >= self.max_rounds {
                warn!(
                    "Scanner: round cap {} reached for pattern '{}' (epoch {}), ending pass",
                    self.max_rounds, request.pattern, request.epoch
                );
                break true;
            }

            let batch = store
                .iterate(&cursor, &request.pattern, request.type_filter, request.batch_size)
                .await
                .map_err(BrowserError::from)?;
            rounds += 1;

            for key in batch.keys {
                if seen.insert(key.clone()) {
                    keys.push(key);
                }
            }
            cursor = batch.next_cursor;

            if cursor.is_start() {
                break true;
            }
        };

        debug!(
            "Scanner: epoch {} collected {} keys in {} rounds (exhausted={})",
            request.epoch,
            keys.len(),
            rounds,
            exhausted
        );

        let records = self.classify(store, keys, request.type_filter).await?;
        let total_estimate = match store.db_size().await {
            Ok(size) => Some(size),
            Err(e) => {
                warn!("Scanner: db size unavailable: {}", e);
                None
            }
        };

        Ok(ScanOutcome {
            epoch: request.epoch,
            records,
            next_cursor: cursor,
            exhausted,
            rounds,
            total_estimate,
        })
    }

    async fn classify<S>(
        &self,
        store: &S,
        keys: Vec<String>,
        type_filter: Option<KeyType>,
    ) -> Result<Vec<KeyRecord>>
    where
        S: StoreCapability + ?Sized,
    {
        if let Some(filter) = type_filter {
            return Ok(keys.into_iter().map(|key| KeyRecord::new(key, filter)).collect());
        }
        if !self.resolve_types {
            return Ok(keys
                .into_iter()
                .map(|key| KeyRecord::new(key, KeyType::Unknown))
                .collect());
        }

        let types = join_all(keys.iter().map(|key| store.type_of(key))).await;

        let mut records = Vec::with_capacity(keys.len());
        for (key, resolved) in keys.into_iter().zip(types) {
            match resolved {
                Ok(raw) => match KeyType::classify(&raw) {
                    Some(key_type) => records.push(KeyRecord::new(key, key_type)),
                    None => debug!("Scanner: '{}' vanished before its type was read", key),
                },
                Err(StoreError::Unavailable { reason }) => {
                    return Err(BrowserError::StoreUnavailable { reason });
                }
                Err(e) => {
                    warn!("Scanner: type of '{}' unavailable: {}", key, e);
                    records.push(KeyRecord::new(key, KeyType::Unknown));
                }
            }
        }
        Ok(records)
    }
}
