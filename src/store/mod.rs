//! Store boundary: the capability set a browsing session needs from the
//! remote key-value store.
//!
//! A wire-protocol client implements `StoreCapability`; the core never
//! speaks the protocol itself. `MemoryStore` is an in-process implementation
//! used by the demo binary and the tests.

pub mod glob;
pub mod memory;
pub mod types;

pub use memory::{MemoryStore, MemoryValue, StoreOp};
pub use types::{ClientInfo, Cursor, ScanBatch};

use async_trait::async_trait;

use crate::browser::types::KeyType;
use crate::error::StoreError;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Operations the browser issues against one store connection.
///
/// Calls may take arbitrarily long; the core imposes no timeout of its own.
#[async_trait]
pub trait StoreCapability: Send + Sync {
    /// One cursor iteration step. `next_cursor == Cursor::start()` ends the pass.
    async fn iterate(
        &self,
        cursor: &Cursor,
        pattern: &str,
        type_filter: Option<KeyType>,
        count: usize,
    ) -> StoreResult<ScanBatch>;

    /// Raw type name as reported by the store (`"none"` when missing).
    async fn type_of(&self, key: &str) -> StoreResult<String>;

    /// Remaining seconds, `-1` without expiry, `-2` when missing.
    async fn ttl_of(&self, key: &str) -> StoreResult<i64>;

    /// Number of keys removed; `0` when the key did not exist.
    async fn delete(&self, key: &str) -> StoreResult<u64>;

    /// `false` when `new_key` already exists. A missing `old_key` is
    /// reported as `StoreError::NoSuchKey`.
    async fn rename(&self, old_key: &str, new_key: &str) -> StoreResult<bool>;

    /// `false` when the key does not exist.
    async fn expire(&self, key: &str, seconds: i64) -> StoreResult<bool>;

    /// Drops the expiry. `false` when the key is missing or had none.
    async fn persist(&self, key: &str) -> StoreResult<bool>;

    async fn flush_all(&self) -> StoreResult<()>;

    async fn list_clients(&self) -> StoreResult<Vec<ClientInfo>>;

    async fn kill_client(&self, addr: &str) -> StoreResult<()>;

    /// Advisory key count for the selected database.
    async fn db_size(&self) -> StoreResult<u64>;

    /// Switches the connection to another logical database.
    async fn select(&self, db: u32) -> StoreResult<()>;
}

// Blanket implementation for Arc<T>
#[async_trait]
impl<T: StoreCapability + ?Sized> StoreCapability for std::sync::Arc<T> {
    async fn iterate(
        &self,
        cursor: &Cursor,
        pattern: &str,
        type_filter: Option<KeyType>,
        count: usize,
    ) -> StoreResult<ScanBatch> {
        (**self).iterate(cursor, pattern, type_filter, count).await
    }

    async fn type_of(&self, key: &str) -> StoreResult<String> {
        (**self).type_of(key).await
    }

    async fn ttl_of(&self, key: &str) -> StoreResult<i64> {
        (**self).ttl_of(key).await
    }

    async fn delete(&self, key: &str) -> StoreResult<u64> {
        (**self).delete(key).await
    }

    async fn rename(&self, old_key: &str, new_key: &str) -> StoreResult<bool> {
        (**self).rename(old_key, new_key).await
    }

    async fn expire(&self, key: &str, seconds: i64) -> StoreResult<bool> {
        (**self).expire(key, seconds).await
    }

    async fn persist(&self, key: &str) -> StoreResult<bool> {
        (**self).persist(key).await
    }

    async fn flush_all(&self) -> StoreResult<()> {
        (**self).flush_all().await
    }

    async fn list_clients(&self) -> StoreResult<Vec<ClientInfo>> {
        (**self).list_clients().await
    }

    async fn kill_client(&self, addr: &str) -> StoreResult<()> {
        (**self).kill_client(addr).await
    }

    async fn db_size(&self) -> StoreResult<u64> {
        (**self).db_size().await
    }

    async fn select(&self, db: u32) -> StoreResult<()> {
        (**self).select(db).await
    }
}
