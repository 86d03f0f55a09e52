//! Browser Session: cloneable handle to one session actor
//!
//! Every method sends a command and awaits the actor's confirmation. A
//! dropped or closed actor surfaces as `SessionClosed`.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::browser::actor::{SessionActor, SessionCommand, SessionEvent};
use crate::browser::dispatcher::{CommandOutcome, CommandRequest};
use crate::browser::page::PageSnapshot;
use crate::browser::scan_state::ScanState;
use crate::browser::scanner::KeyspaceScanner;
use crate::browser::types::{KeyRecord, KeyType, PendingOperation};
use crate::config::BrowserConfig;
use crate::error::{BrowserError, Result};
use crate::store::{ClientInfo, StoreCapability};

#[derive(Clone)]
pub struct BrowserSession {
    id: Uuid,
    tx: mpsc::Sender<SessionCommand>,
}

impl BrowserSession {
    /// Spawns the session actor on the current runtime. The store handle is
    /// expected to be on database 0; use `select_database` to move.
    pub fn open(store: Arc<dyn StoreCapability>, config: &BrowserConfig) -> Self {
        let config = config.clone().normalized();
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(config.actor_channel_capacity);

        let actor = SessionActor::new(
            id,
            store,
            KeyspaceScanner::new(&config),
            ScanState::new(0, config.scan_batch_size),
            rx,
        );
        tokio::spawn(actor.run());

        Self { id, tx }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> SessionCommand) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| BrowserError::SessionClosed)?;
        rx.await.map_err(|_| BrowserError::SessionClosed)
    }

    // ==========================================
    // LISTING
    // ==========================================

    /// Starts a new search and resolves with its first page. A blank
    /// pattern lists every key.
    pub async fn search(&self, pattern: &str, type_filter: Option<KeyType>) -> Result<PageSnapshot> {
        let pattern = pattern.to_string();
        self.request(|reply| SessionCommand::Search { pattern, type_filter, reply })
            .await?
    }

    /// Appends the next page. A no-op once the pass is exhausted.
    pub async fn next_page(&self) -> Result<PageSnapshot> {
        self.request(|reply| SessionCommand::NextPage { reply }).await?
    }

    /// Lists again from the first page with the current filter.
    pub async fn refresh(&self) -> Result<PageSnapshot> {
        self.request(|reply| SessionCommand::Refresh { reply }).await?
    }

    pub async fn select_database(&self, db: u32) -> Result<PageSnapshot> {
        self.request(|reply| SessionCommand::SelectDatabase { db, reply })
            .await?
    }

    /// Selects a listed key, or clears the selection with `None`.
    pub async fn select(&self, key: Option<&str>) -> Result<()> {
        let key = key.map(str::to_string);
        self.request(|reply| SessionCommand::Select { key, reply }).await?
    }

    /// Reads a key's type and TTL and refreshes its record if listed.
    pub async fn load_details(&self, key: &str) -> Result<KeyRecord> {
        let key = key.to_string();
        self.request(|reply| SessionCommand::LoadDetails { key, reply })
            .await?
    }

    pub async fn snapshot(&self) -> Result<PageSnapshot> {
        self.request(|reply| SessionCommand::Snapshot { reply }).await
    }

    pub async fn pending(&self) -> Result<Vec<PendingOperation>> {
        self.request(|reply| SessionCommand::Pending { reply }).await
    }

    pub async fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<SessionEvent>> {
        self.request(|reply| SessionCommand::Subscribe { reply }).await
    }

    // ==========================================
    // COMMANDS
    // ==========================================

    pub async fn execute(&self, request: CommandRequest) -> Result<CommandOutcome> {
        self.request(|reply| SessionCommand::Execute { request, reply })
            .await?
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        self.execute(CommandRequest::Delete { key: key.to_string() })
            .await
            .map(|_| ())
    }

    /// Returns the name the key ended up with (surrounding whitespace trimmed).
    pub async fn rename(&self, old_key: &str, new_key: &str) -> Result<String> {
        let outcome = self
            .execute(CommandRequest::Rename {
                old_key: old_key.to_string(),
                new_key: new_key.to_string(),
            })
            .await?;
        match outcome {
            CommandOutcome::Renamed { new_key, .. } => Ok(new_key),
            other => Err(unexpected(other)),
        }
    }

    /// Sets a TTL in seconds; `-1` removes the expiry.
    pub async fn expire(&self, key: &str, ttl: i64) -> Result<()> {
        self.execute(CommandRequest::Expire { key: key.to_string(), ttl })
            .await
            .map(|_| ())
    }

    pub async fn flush_all(&self) -> Result<()> {
        self.execute(CommandRequest::FlushAll).await.map(|_| ())
    }

    pub async fn list_clients(&self) -> Result<Vec<ClientInfo>> {
        match self.execute(CommandRequest::ListClients).await? {
            CommandOutcome::Clients(clients) => Ok(clients),
            other => Err(unexpected(other)),
        }
    }

    pub async fn kill_client(&self, addr: &str) -> Result<()> {
        self.execute(CommandRequest::KillClient { addr: addr.to_string() })
            .await
            .map(|_| ())
    }

    /// Stops the actor. Later calls on any clone fail with `SessionClosed`.
    pub async fn close(&self) -> Result<()> {
        self.request(|reply| SessionCommand::Close { reply }).await
    }
}

fn unexpected(outcome: CommandOutcome) -> BrowserError {
    BrowserError::Store {
        key: None,
        reason: format!("unexpected command outcome: {:?}", outcome),
    }
}
