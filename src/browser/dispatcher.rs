//! Command Dispatcher: mutating and administrative store commands
//!
//! `begin` reserves the `(target, kind)` slot synchronously and hands back a
//! `Flight`; the reservation is released when the flight finishes or is
//! dropped. A second request for an occupied slot fails immediately with
//! `OperationInProgress`. Requests for different slots run concurrently.
//!
//! The dispatcher never asks for confirmation and never retries; it only
//! reports what happened. Page reconciliation is up to the session.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use crate::browser::types::{KeyType, OperationKind, PendingOperation, ALL_KEYS, TTL_NONE, TTL_UNKNOWN};
use crate::error::{BrowserError, Result};
use crate::store::{ClientInfo, StoreCapability};

// ==========================================
// REQUESTS / OUTCOMES
// ==========================================

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandRequest {
    Delete { key: String },
    Rename { old_key: String, new_key: String },
    /// `ttl == -1` removes the expiry.
    Expire { key: String, ttl: i64 },
    FlushAll,
    ListClients,
    KillClient { addr: String },
}

impl CommandRequest {
    /// Single-flight slot of this request.
    pub fn target(&self) -> (&str, OperationKind) {
        match self {
            Self::Delete { key } => (key, OperationKind::Delete),
            Self::Rename { old_key, .. } => (old_key, OperationKind::Rename),
            Self::Expire { key, .. } => (key, OperationKind::Expire),
            Self::FlushAll => (ALL_KEYS, OperationKind::Flush),
            Self::ListClients => (ALL_KEYS, OperationKind::ListClients),
            Self::KillClient { addr } => (addr, OperationKind::KillClient),
        }
    }

    fn validate(&self) -> Result<()> {
        match self {
            Self::Delete { key } | Self::Expire { key, .. } if key.is_empty() => {
                Err(BrowserError::invalid("key must not be empty"))
            }
            Self::Rename { new_key, .. } if new_key.trim().is_empty() => {
                Err(BrowserError::invalid("new key name must not be empty"))
            }
            Self::Expire { ttl, .. } if *ttl != TTL_NONE && *ttl <= 0 => Err(BrowserError::invalid(
                format!("ttl must be positive or {} to persist, got {}", TTL_NONE, ttl),
            )),
            Self::KillClient { addr } if addr.is_empty() => {
                Err(BrowserError::invalid("client address must not be empty"))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandOutcome {
    Deleted { key: String },
    Renamed { old_key: String, new_key: String },
    ExpiryUpdated { key: String, ttl: i64 },
    Flushed,
    Clients(Vec<ClientInfo>),
    ClientKilled { addr: String },
}

// ==========================================
// DISPATCHER
// ==========================================

type Slot = (String, OperationKind);

pub struct CommandDispatcher {
    store: Arc<dyn StoreCapability>,
    pending: Arc<DashMap<Slot, PendingOperation>>,
}

impl CommandDispatcher {
    pub fn new(store: Arc<dyn StoreCapability>) -> Self {
        Self {
            store,
            pending: Arc::new(DashMap::new()),
        }
    }

    /// Validates the request and claims its slot.
    pub fn begin(&self, request: CommandRequest, epoch: u64) -> Result<Flight> {
        request.validate()?;

        let (target, kind) = request.target();
        let slot = (target.to_string(), kind);
        match self.pending.entry(slot.clone()) {
            Entry::Occupied(_) => {
                debug!("Dispatcher: rejected duplicate {} for '{}'", kind, target);
                return Err(BrowserError::OperationInProgress {
                    key: target.to_string(),
                    kind,
                });
            }
            Entry::Vacant(vacant) => {
                vacant.insert(PendingOperation {
                    target_key: target.to_string(),
                    kind,
                    epoch,
                });
            }
        }

        Ok(Flight {
            store: Arc::clone(&self.store),
            request,
            reservation: Reservation {
                pending: Arc::clone(&self.pending),
                slot,
            },
        })
    }

    pub async fn execute(&self, request: CommandRequest, epoch: u64) -> Result<CommandOutcome> {
        self.begin(request, epoch)?.run().await
    }

    pub fn is_pending(&self, target: &str, kind: OperationKind) -> bool {
        self.pending.contains_key(&(target.to_string(), kind))
    }

    pub fn pending(&self) -> Vec<PendingOperation> {
        self.pending.iter().map(|entry| entry.value().clone()).collect()
    }
}

/// Releases a single-flight slot on drop.
struct Reservation {
    pending: Arc<DashMap<Slot, PendingOperation>>,
    slot: Slot,
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.pending.remove(&self.slot);
    }
}

/// A reserved command, ready to run on any task.
pub struct Flight {
    store: Arc<dyn StoreCapability>,
    request: CommandRequest,
    reservation: Reservation,
}

impl Flight {
    pub async fn run(self) -> Result<CommandOutcome> {
        let Flight { store, request, reservation } = self;
        let outcome = Self::dispatch(store.as_ref(), request).await;
        drop(reservation);
        outcome
    }

    async fn dispatch(store: &dyn StoreCapability, request: CommandRequest) -> Result<CommandOutcome> {
        match request {
            CommandRequest::Delete { key } => {
                debug!("Dispatcher: DEL '{}'", key);
                let removed = store
                    .delete(&key)
                    .await
                    .map_err(|e| BrowserError::from_store(e, Some(&key)))?;
                if removed == 0 {
                    return Err(BrowserError::NotFound { key });
                }
                Ok(CommandOutcome::Deleted { key })
            }

            CommandRequest::Rename { old_key, new_key } => {
                let new_key = new_key.trim().to_string();
                if new_key == old_key {
                    let raw = store
                        .type_of(&old_key)
                        .await
                        .map_err(|e| BrowserError::from_store(e, Some(&old_key)))?;
                    if KeyType::classify(&raw).is_none() {
                        return Err(BrowserError::NotFound { key: old_key });
                    }
                    return Ok(CommandOutcome::Renamed { old_key, new_key });
                }
                debug!("Dispatcher: RENAME '{}' -> '{}'", old_key, new_key);
                let renamed = store
                    .rename(&old_key, &new_key)
                    .await
                    .map_err(|e| BrowserError::from_store(e, Some(&old_key)))?;
                if !renamed {
                    return Err(BrowserError::Conflict { key: new_key });
                }
                Ok(CommandOutcome::Renamed { old_key, new_key })
            }

            CommandRequest::Expire { key, ttl } if ttl == TTL_NONE => {
                debug!("Dispatcher: PERSIST '{}'", key);
                let map_err = |e| BrowserError::from_store(e, Some(&key));
                if !store.persist(&key).await.map_err(map_err)? {
                    // false is also the answer for a key that never had a TTL
                    let current = store.ttl_of(&key).await.map_err(map_err)?;
                    if current == TTL_UNKNOWN {
                        return Err(BrowserError::NotFound { key });
                    }
                }
                Ok(CommandOutcome::ExpiryUpdated { key, ttl: TTL_NONE })
            }

            CommandRequest::Expire { key, ttl } => {
                debug!("Dispatcher: EXPIRE '{}' {}", key, ttl);
                let updated = store
                    .expire(&key, ttl)
                    .await
                    .map_err(|e| BrowserError::from_store(e, Some(&key)))?;
                if !updated {
                    return Err(BrowserError::NotFound { key });
                }
                Ok(CommandOutcome::ExpiryUpdated { key, ttl })
            }

            CommandRequest::FlushAll => {
                debug!("Dispatcher: FLUSHALL");
                store.flush_all().await.map_err(BrowserError::from)?;
                Ok(CommandOutcome::Flushed)
            }

            CommandRequest::ListClients => {
                let clients = store.list_clients().await.map_err(BrowserError::from)?;
                debug!("Dispatcher: CLIENT LIST -> {} clients", clients.len());
                Ok(CommandOutcome::Clients(clients))
            }

            CommandRequest::KillClient { addr } => {
                debug!("Dispatcher: CLIENT KILL {}", addr);
                store
                    .kill_client(&addr)
                    .await
                    .map_err(|e| BrowserError::from_store(e, Some(&addr)))?;
                Ok(CommandOutcome::ClientKilled { addr })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, StoreOp};

    fn dispatcher() -> (Arc<MemoryStore>, CommandDispatcher) {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = CommandDispatcher::new(store.clone());
        (store, dispatcher)
    }

    #[tokio::test]
    async fn duplicate_request_is_rejected_while_pending() {
        let (store, dispatcher) = dispatcher();
        store.set_string("k", "v");

        let flight = dispatcher
            .begin(CommandRequest::Delete { key: "k".into() }, 1)
            .unwrap();
        assert!(dispatcher.is_pending("k", OperationKind::Delete));

        let second = dispatcher.begin(CommandRequest::Delete { key: "k".into() }, 1);
        assert!(matches!(
            second,
            Err(BrowserError::OperationInProgress { kind: OperationKind::Delete, .. })
        ));

        // a different kind on the same key is a different slot
        let expire = dispatcher.begin(CommandRequest::Expire { key: "k".into(), ttl: 10 }, 1);
        assert!(expire.is_ok());
        drop(expire);

        flight.run().await.unwrap();
        assert!(!dispatcher.is_pending("k", OperationKind::Delete));
        assert_eq!(store.calls(StoreOp::Delete), 1);
    }

    #[tokio::test]
    async fn dropped_flight_releases_slot() {
        let (_store, dispatcher) = dispatcher();
        let flight = dispatcher.begin(CommandRequest::FlushAll, 1).unwrap();
        assert_eq!(dispatcher.pending().len(), 1);
        drop(flight);
        assert!(dispatcher.pending().is_empty());
    }

    #[tokio::test]
    async fn invalid_requests_never_reach_the_store() {
        let (store, dispatcher) = dispatcher();

        let rename = dispatcher
            .execute(CommandRequest::Rename { old_key: "a".into(), new_key: "  ".into() }, 1)
            .await;
        assert!(matches!(rename, Err(BrowserError::InvalidArgument { .. })));

        let expire = dispatcher
            .execute(CommandRequest::Expire { key: "a".into(), ttl: 0 }, 1)
            .await;
        assert!(matches!(expire, Err(BrowserError::InvalidArgument { .. })));

        assert_eq!(store.calls(StoreOp::Rename), 0);
        assert_eq!(store.calls(StoreOp::Expire), 0);
        assert!(dispatcher.pending().is_empty());
    }

    #[tokio::test]
    async fn rename_to_same_name_is_a_noop() {
        let (store, dispatcher) = dispatcher();
        store.set_string("a", "1");

        let outcome = dispatcher
            .execute(CommandRequest::Rename { old_key: "a".into(), new_key: "a".into() }, 1)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            CommandOutcome::Renamed { old_key: "a".into(), new_key: "a".into() }
        );
        assert_eq!(store.calls(StoreOp::Rename), 0);
    }

    #[tokio::test]
    async fn rename_of_vanished_key_to_same_name_is_not_found() {
        let (store, dispatcher) = dispatcher();

        let err = dispatcher
            .execute(CommandRequest::Rename { old_key: "gone".into(), new_key: " gone ".into() }, 1)
            .await
            .unwrap_err();
        assert_eq!(err, BrowserError::NotFound { key: "gone".into() });
        assert_eq!(store.calls(StoreOp::TypeOf), 1);
        assert_eq!(store.calls(StoreOp::Rename), 0);
        assert!(dispatcher.pending().is_empty());
    }
}
