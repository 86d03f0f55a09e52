//! Session Registry: open browsing sessions by id
//!
//! Each session owns one store connection and the database it has selected,
//! so sessions never share scan state. A session poisoned by a lost store is
//! replaced through `reopen` with a fresh connection.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{info, warn};
use uuid::Uuid;

use crate::browser::session::BrowserSession;
use crate::config::BrowserConfig;
use crate::error::{BrowserError, Result};
use crate::store::StoreCapability;

pub struct SessionRegistry {
    sessions: DashMap<Uuid, BrowserSession>,
    config: BrowserConfig,
}

impl SessionRegistry {
    pub fn new(config: BrowserConfig) -> Self {
        Self {
            sessions: DashMap::new(),
            config,
        }
    }

    /// Opens a session on `store`, moving it to `database` first when needed.
    pub async fn open(&self, store: Arc<dyn StoreCapability>, database: u32) -> Result<BrowserSession> {
        let session = BrowserSession::open(store, &self.config);
        if database != 0 {
            if let Err(e) = session.select_database(database).await {
                let _ = session.close().await;
                return Err(e);
            }
        }
        info!("Registry: opened session {} on db {}", session.id(), database);
        self.sessions.insert(session.id(), session.clone());
        Ok(session)
    }

    pub fn get(&self, id: &Uuid) -> Option<BrowserSession> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    /// Closes and forgets a session. Returns `false` for unknown ids.
    pub async fn close(&self, id: &Uuid) -> bool {
        let Some((_, session)) = self.sessions.remove(id) else {
            return false;
        };
        match session.close().await {
            Ok(()) | Err(BrowserError::SessionClosed) => {}
            Err(e) => warn!("Registry: closing session {} failed: {}", id, e),
        }
        info!("Registry: closed session {}", id);
        true
    }

    /// Replaces a session with a new one on a fresh connection, keeping the
    /// database it was browsing.
    pub async fn reopen(&self, id: &Uuid, store: Arc<dyn StoreCapability>) -> Result<BrowserSession> {
        let database = match self.get(id) {
            Some(old) => old.snapshot().await.map(|snapshot| snapshot.database).unwrap_or(0),
            None => return Err(BrowserError::SessionClosed),
        };
        self.close(id).await;
        self.open(store, database).await
    }

    pub fn ids(&self) -> Vec<Uuid> {
        self.sessions.iter().map(|entry| *entry.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
