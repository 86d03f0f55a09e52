//! Memory Store: in-process `StoreCapability` with cursor iteration
//!
//! - Several logical databases, selected per connection handle
//! - Ordered keys; the cursor is the hex-encoded last examined key
//! - Lazy expiration (checked on access, purged while iterating)
//! - Client table with kill support
//! - Test controls: availability, per-operation pause, injected failures,
//!   call counters

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;

use crate::browser::types::KeyType;
use crate::error::StoreError;
use crate::store::glob::PatternCache;
use crate::store::types::{ClientInfo, Cursor, ScanBatch};
use crate::store::{StoreCapability, StoreResult};

pub const DEFAULT_DATABASES: usize = 16;

// ========================================
// VALUE TYPES
// ========================================

#[derive(Clone, Debug)]
pub enum MemoryValue {
    String(Bytes),
    Hash(HashMap<String, Bytes>),
    List(VecDeque<Bytes>),
    Set(HashSet<Bytes>),
    ZSet(Vec<(Bytes, f64)>),
    /// Any type the browser has no dedicated variant for (e.g. "stream").
    Other(String),
}

impl MemoryValue {
    pub fn string(value: impl Into<Bytes>) -> Self {
        Self::String(value.into())
    }

    pub fn type_name(&self) -> &str {
        match self {
            Self::String(_) => "string",
            Self::Hash(_) => "hash",
            Self::List(_) => "list",
            Self::Set(_) => "set",
            Self::ZSet(_) => "zset",
            Self::Other(name) => name,
        }
    }
}

#[derive(Clone, Debug)]
struct Entry {
    value: MemoryValue,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |expiry| expiry > now)
    }
}

type Keyspace = BTreeMap<String, Entry>;

/// Operations counted and pausable by tests.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Iterate,
    TypeOf,
    TtlOf,
    Delete,
    Rename,
    Expire,
    Persist,
    FlushAll,
    ListClients,
    KillClient,
    DbSize,
    Select,
}

// ========================================
// SHARED STATE
// ========================================

struct Shared {
    databases: RwLock<Vec<Keyspace>>,
    clients: RwLock<BTreeMap<u64, ClientInfo>>,
    next_client_id: AtomicU64,
    available: AtomicBool,
    paused: watch::Sender<HashSet<StoreOp>>,
    failures: Mutex<HashMap<StoreOp, VecDeque<StoreError>>>,
    calls: DashMap<StoreOp, usize>,
    patterns: PatternCache,
}

// ========================================
// MEMORY STORE (one connection handle)
// ========================================

pub struct MemoryStore {
    shared: Arc<Shared>,
    client_id: u64,
    db: AtomicU32,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_databases(DEFAULT_DATABASES)
    }

    pub fn with_databases(count: usize) -> Self {
        let (paused, _) = watch::channel(HashSet::new());
        let shared = Arc::new(Shared {
            databases: RwLock::new(vec![Keyspace::new(); count.max(1)]),
            clients: RwLock::new(BTreeMap::new()),
            next_client_id: AtomicU64::new(1),
            available: AtomicBool::new(true),
            paused,
            failures: Mutex::new(HashMap::new()),
            calls: DashMap::new(),
            patterns: PatternCache::new(),
        });
        Self::attach(shared)
    }

    /// Opens another connection handle onto the same data, starting on db 0.
    pub fn connect(&self) -> Self {
        Self::attach(Arc::clone(&self.shared))
    }

    fn attach(shared: Arc<Shared>) -> Self {
        let client_id = shared.next_client_id.fetch_add(1, Ordering::Relaxed);
        let mut info = ClientInfo::new(client_id, format!("127.0.0.1:{}", 50000 + client_id));
        info.cmd = "client|list".to_string();
        shared.clients.write().insert(client_id, info);

        Self {
            shared,
            client_id,
            db: AtomicU32::new(0),
        }
    }

    pub fn client_addr(&self) -> String {
        self.shared
            .clients
            .read()
            .get(&self.client_id)
            .map(|c| c.addr.clone())
            .unwrap_or_default()
    }

    pub fn database(&self) -> u32 {
        self.db.load(Ordering::Relaxed)
    }

    // ========================================
    // SEEDING
    // ========================================

    pub fn insert(&self, key: impl Into<String>, value: MemoryValue) {
        self.put(key.into(), value, None);
    }

    pub fn insert_with_ttl(&self, key: impl Into<String>, value: MemoryValue, ttl: Duration) {
        self.put(key.into(), value, Some(Instant::now() + ttl));
    }

    pub fn set_string(&self, key: impl Into<String>, value: impl Into<Bytes>) {
        self.insert(key, MemoryValue::String(value.into()));
    }

    fn put(&self, key: String, value: MemoryValue, expires_at: Option<Instant>) {
        let db = self.database() as usize;
        let mut databases = self.shared.databases.write();
        if let Some(keyspace) = databases.get_mut(db) {
            keyspace.insert(key, Entry { value, expires_at });
        }
    }

    pub fn exists(&self, key: &str) -> bool {
        let now = Instant::now();
        let databases = self.shared.databases.read();
        databases
            .get(self.database() as usize)
            .and_then(|keyspace| keyspace.get(key))
            .is_some_and(|entry| entry.is_live(now))
    }

    pub fn add_client(&self, addr: impl Into<String>, name: impl Into<String>) -> u64 {
        let id = self.shared.next_client_id.fetch_add(1, Ordering::Relaxed);
        let mut info = ClientInfo::new(id, addr);
        info.name = name.into();
        self.shared.clients.write().insert(id, info);
        id
    }

    // ========================================
    // TEST CONTROLS
    // ========================================

    pub fn set_available(&self, available: bool) {
        self.shared.available.store(available, Ordering::SeqCst);
    }

    /// Calls of `op` block (after being counted) until `resume(op)`.
    pub fn pause(&self, op: StoreOp) {
        self.shared.paused.send_modify(|set| {
            set.insert(op);
        });
    }

    pub fn resume(&self, op: StoreOp) {
        self.shared.paused.send_modify(|set| {
            set.remove(&op);
        });
    }

    /// The next call of `op` fails with `err` instead of executing.
    pub fn fail_next(&self, op: StoreOp, err: StoreError) {
        self.shared.failures.lock().entry(op).or_default().push_back(err);
    }

    pub fn calls(&self, op: StoreOp) -> usize {
        self.shared.calls.get(&op).map(|c| *c).unwrap_or(0)
    }

    async fn enter(&self, op: StoreOp) -> StoreResult<()> {
        *self.shared.calls.entry(op).or_insert(0) += 1;

        let mut paused = self.shared.paused.subscribe();
        loop {
            let blocked = paused.borrow_and_update().contains(&op);
            if !blocked || paused.changed().await.is_err() {
                break;
            }
        }

        if !self.shared.available.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("connection refused"));
        }
        if !self.shared.clients.read().contains_key(&self.client_id) {
            return Err(StoreError::unavailable("connection closed by server"));
        }
        if let Some(err) = self
            .shared
            .failures
            .lock()
            .get_mut(&op)
            .and_then(VecDeque::pop_front)
        {
            return Err(err);
        }
        Ok(())
    }

    fn with_keyspace<T>(&self, f: impl FnOnce(&mut Keyspace, Instant) -> T) -> StoreResult<T> {
        let db = self.database() as usize;
        let mut databases = self.shared.databases.write();
        let keyspace = databases
            .get_mut(db)
            .ok_or_else(|| StoreError::command("ERR DB index is out of range"))?;
        Ok(f(keyspace, Instant::now()))
    }
}

fn decode_cursor(cursor: &Cursor) -> StoreResult<Option<String>> {
    if cursor.is_start() {
        return Ok(None);
    }
    let bytes = hex::decode(cursor.as_str()).map_err(|_| StoreError::command("ERR invalid cursor"))?;
    String::from_utf8(bytes)
        .map(Some)
        .map_err(|_| StoreError::command("ERR invalid cursor"))
}

/// Removes `key` if its expiry has passed; returns the live entry otherwise.
fn live_entry<'a>(keyspace: &'a mut Keyspace, key: &str, now: Instant) -> Option<&'a mut Entry> {
    if keyspace.get(key).is_some_and(|entry| !entry.is_live(now)) {
        keyspace.remove(key);
    }
    keyspace.get_mut(key)
}

#[async_trait]
impl StoreCapability for MemoryStore {
    async fn iterate(
        &self,
        cursor: &Cursor,
        pattern: &str,
        type_filter: Option<KeyType>,
        count: usize,
    ) -> StoreResult<ScanBatch> {
        self.enter(StoreOp::Iterate).await?;
        let after = decode_cursor(cursor)?;
        let count = count.max(1);
        let matcher = self.shared.patterns.get(pattern);

        self.with_keyspace(|keyspace, now| {
            let lower = match &after {
                Some(last) => Bound::Excluded(last.clone()),
                None => Bound::Unbounded,
            };

            let examined: Vec<String> = keyspace
                .range::<String, _>((lower, Bound::Unbounded))
                .take(count)
                .map(|(key, _)| key.clone())
                .collect();

            let mut keys = Vec::new();
            for key in &examined {
                let Some(entry) = live_entry(keyspace, key, now) else {
                    continue;
                };
                if let Some(filter) = type_filter {
                    if entry.value.type_name() != filter.as_str() {
                        continue;
                    }
                }
                if matcher.is_match(key) {
                    keys.push(key.clone());
                }
            }

            let next_cursor = match examined.last() {
                Some(last) if examined.len() == count => {
                    let more = keyspace
                        .range::<String, _>((Bound::Excluded(last.clone()), Bound::Unbounded))
                        .next()
                        .is_some();
                    if more {
                        Cursor::new(hex::encode(last.as_bytes()))
                    } else {
                        Cursor::start()
                    }
                }
                _ => Cursor::start(),
            };

            ScanBatch { keys, next_cursor }
        })
    }

    async fn type_of(&self, key: &str) -> StoreResult<String> {
        self.enter(StoreOp::TypeOf).await?;
        self.with_keyspace(|keyspace, now| {
            live_entry(keyspace, key, now)
                .map(|entry| entry.value.type_name().to_string())
                .unwrap_or_else(|| "none".to_string())
        })
    }

    async fn ttl_of(&self, key: &str) -> StoreResult<i64> {
        self.enter(StoreOp::TtlOf).await?;
        self.with_keyspace(|keyspace, now| match live_entry(keyspace, key, now) {
            None => -2,
            Some(Entry { expires_at: None, .. }) => -1,
            Some(Entry { expires_at: Some(expiry), .. }) => {
                let remaining = expiry.saturating_duration_since(now).as_millis() as i64;
                (remaining + 500) / 1000
            }
        })
    }

    async fn delete(&self, key: &str) -> StoreResult<u64> {
        self.enter(StoreOp::Delete).await?;
        self.with_keyspace(|keyspace, now| match keyspace.remove(key) {
            Some(entry) if entry.is_live(now) => 1,
            _ => 0,
        })
    }

    async fn rename(&self, old_key: &str, new_key: &str) -> StoreResult<bool> {
        self.enter(StoreOp::Rename).await?;
        self.with_keyspace(|keyspace, now| {
            if live_entry(keyspace, old_key, now).is_none() {
                return Err(StoreError::NoSuchKey { key: old_key.to_string() });
            }
            if live_entry(keyspace, new_key, now).is_some() {
                return Ok(false);
            }
            if let Some(entry) = keyspace.remove(old_key) {
                keyspace.insert(new_key.to_string(), entry);
            }
            Ok(true)
        })?
    }

    async fn expire(&self, key: &str, seconds: i64) -> StoreResult<bool> {
        self.enter(StoreOp::Expire).await?;
        self.with_keyspace(|keyspace, now| {
            if live_entry(keyspace, key, now).is_none() {
                return false;
            }
            if seconds <= 0 {
                keyspace.remove(key);
            } else if let Some(entry) = keyspace.get_mut(key) {
                entry.expires_at = Some(now + Duration::from_secs(seconds as u64));
            }
            true
        })
    }

    async fn persist(&self, key: &str) -> StoreResult<bool> {
        self.enter(StoreOp::Persist).await?;
        self.with_keyspace(|keyspace, now| match live_entry(keyspace, key, now) {
            Some(entry) => entry.expires_at.take().is_some(),
            None => false,
        })
    }

    async fn flush_all(&self) -> StoreResult<()> {
        self.enter(StoreOp::FlushAll).await?;
        let mut databases = self.shared.databases.write();
        for keyspace in databases.iter_mut() {
            keyspace.clear();
        }
        Ok(())
    }

    async fn list_clients(&self) -> StoreResult<Vec<ClientInfo>> {
        self.enter(StoreOp::ListClients).await?;
        Ok(self.shared.clients.read().values().cloned().collect())
    }

    async fn kill_client(&self, addr: &str) -> StoreResult<()> {
        self.enter(StoreOp::KillClient).await?;
        let mut clients = self.shared.clients.write();
        let id = clients
            .values()
            .find(|client| client.addr == addr)
            .map(|client| client.id)
            .ok_or_else(|| StoreError::command("ERR No such client"))?;
        clients.remove(&id);
        Ok(())
    }

    async fn db_size(&self) -> StoreResult<u64> {
        self.enter(StoreOp::DbSize).await?;
        self.with_keyspace(|keyspace, now| {
            keyspace.retain(|_, entry| entry.is_live(now));
            keyspace.len() as u64
        })
    }

    async fn select(&self, db: u32) -> StoreResult<()> {
        self.enter(StoreOp::Select).await?;
        if db as usize >= self.shared.databases.read().len() {
            return Err(StoreError::command("ERR DB index is out of range"));
        }
        self.db.store(db, Ordering::Relaxed);
        if let Some(client) = self.shared.clients.write().get_mut(&self.client_id) {
            client.db = db;
        }
        Ok(())
    }
}
