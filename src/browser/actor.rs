//! Session Actor: owns one browsing session's ScanState and PageModel
//!
//! Commands are handled one at a time on the actor task, so page and scan
//! state have a single writer and need no locks. Store calls never run on
//! the actor itself: they are spawned, and their completions come back
//! through an internal channel and are applied here, in arrival order.
//!
//! Scan policy: a new search supersedes the one in flight. Its result is
//! still delivered but discarded because its epoch is stale; whoever was
//! waiting on it gets the superseding page instead.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::browser::dispatcher::{CommandDispatcher, CommandOutcome, CommandRequest};
use crate::browser::page::{PageModel, PageSnapshot};
use crate::browser::scan_state::ScanState;
use crate::browser::scanner::{KeyspaceScanner, ScanOutcome};
use crate::browser::types::{KeyRecord, KeyType, OperationKind, PendingOperation};
use crate::error::{BrowserError, Result};
use crate::store::StoreCapability;

// ==========================================
// ACTOR COMMANDS
// ==========================================

pub(crate) enum SessionCommand {
    Search {
        pattern: String,
        type_filter: Option<KeyType>,
        reply: oneshot::Sender<Result<PageSnapshot>>,
    },
    NextPage {
        reply: oneshot::Sender<Result<PageSnapshot>>,
    },
    Refresh {
        reply: oneshot::Sender<Result<PageSnapshot>>,
    },
    SelectDatabase {
        db: u32,
        reply: oneshot::Sender<Result<PageSnapshot>>,
    },
    Select {
        key: Option<String>,
        reply: oneshot::Sender<Result<()>>,
    },
    LoadDetails {
        key: String,
        reply: oneshot::Sender<Result<KeyRecord>>,
    },
    Execute {
        request: CommandRequest,
        reply: oneshot::Sender<Result<CommandOutcome>>,
    },
    Snapshot {
        reply: oneshot::Sender<PageSnapshot>,
    },
    Pending {
        reply: oneshot::Sender<Vec<PendingOperation>>,
    },
    Subscribe {
        reply: oneshot::Sender<mpsc::UnboundedReceiver<SessionEvent>>,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
}

/// Change notifications, emitted only where the page actually changes.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    PageReplaced { epoch: u64, count: usize, exhausted: bool },
    PageAppended { epoch: u64, added: usize, exhausted: bool },
    RecordRemoved { key: String },
    RecordRenamed { old_key: String, new_key: String },
    RecordUpdated { record: KeyRecord },
    SelectionChanged { key: Option<String> },
    Cleared { epoch: u64 },
    Failed { message: String, fatal: bool },
}

// ==========================================
// INTERNAL COMPLETIONS
// ==========================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ScanMode {
    Replace,
    Append,
}

#[derive(Clone, Copy, Debug)]
struct InFlightScan {
    epoch: u64,
    mode: ScanMode,
}

enum Completion {
    Scan {
        epoch: u64,
        mode: ScanMode,
        result: Result<ScanOutcome>,
    },
    Command {
        database: u32,
        result: Result<CommandOutcome>,
        reply: oneshot::Sender<Result<CommandOutcome>>,
    },
    Details {
        database: u32,
        key: String,
        result: Result<(Option<KeyType>, i64)>,
        reply: oneshot::Sender<Result<KeyRecord>>,
    },
    DatabaseSelected {
        db: u32,
        result: Result<()>,
        reply: oneshot::Sender<Result<PageSnapshot>>,
    },
}

// ==========================================
// SESSION ACTOR
// ==========================================

pub(crate) struct SessionActor {
    id: Uuid,
    store: Arc<dyn StoreCapability>,
    scanner: Arc<KeyspaceScanner>,
    dispatcher: Arc<CommandDispatcher>,
    state: ScanState,
    page: PageModel,
    in_flight: Option<InFlightScan>,
    waiters: Vec<oneshot::Sender<Result<PageSnapshot>>>,
    switching_to: Option<u32>,
    lookups: usize,
    poisoned: Option<String>,
    closing: Option<oneshot::Sender<()>>,
    subscribers: Vec<mpsc::UnboundedSender<SessionEvent>>,
    rx: mpsc::Receiver<SessionCommand>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,
}

impl SessionActor {
    pub(crate) fn new(
        id: Uuid,
        store: Arc<dyn StoreCapability>,
        scanner: KeyspaceScanner,
        state: ScanState,
        rx: mpsc::Receiver<SessionCommand>,
    ) -> Self {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let dispatcher = Arc::new(CommandDispatcher::new(Arc::clone(&store)));

        Self {
            id,
            store,
            scanner: Arc::new(scanner),
            dispatcher,
            state,
            page: PageModel::new(),
            in_flight: None,
            waiters: Vec::new(),
            switching_to: None,
            lookups: 0,
            poisoned: None,
            closing: None,
            subscribers: Vec::new(),
            rx,
            completions_tx,
            completions_rx,
        }
    }

    pub(crate) async fn run(mut self) {
        info!("Session {}: started on db {}", self.id, self.state.database());

        loop {
            tokio::select! {
                maybe_cmd = self.rx.recv() => {
                    match maybe_cmd {
                        Some(cmd) => {
                            if !self.handle_command(cmd) {
                                break;
                            }
                        }
                        None => break, // every handle dropped
                    }
                }
                Some(done) = self.completions_rx.recv() => {
                    self.handle_completion(done);
                }
            }
        }

        info!("Session {}: stopped", self.id);
        // Waiters see their reply channel close, which surfaces as SessionClosed.
        self.waiters.clear();
        if let Some(reply) = self.closing.take() {
            let _ = reply.send(());
        }
    }

    // ==========================================
    // COMMANDS
    // ==========================================

    /// Returns `false` once the session should stop.
    fn handle_command(&mut self, cmd: SessionCommand) -> bool {
        match cmd {
            SessionCommand::Search { pattern, type_filter, reply } => {
                if let Err(e) = self.ensure_ready() {
                    let _ = reply.send(Err(e));
                    return true;
                }
                let epoch = self.state.reset(&pattern, type_filter);
                debug!(
                    "Session {}: search '{}' type={:?} -> epoch {}",
                    self.id,
                    self.state.pattern(),
                    type_filter,
                    epoch
                );
                self.start_scan(ScanMode::Replace, Some(reply));
            }

            SessionCommand::NextPage { reply } => {
                if let Err(e) = self.ensure_ready() {
                    let _ = reply.send(Err(e));
                    return true;
                }
                if self.in_flight.is_some() {
                    let _ = reply.send(Err(BrowserError::OperationInProgress {
                        key: self.state.pattern().to_string(),
                        kind: OperationKind::Scan,
                    }));
                    return true;
                }
                if self.state.is_exhausted() {
                    let _ = reply.send(Ok(self.snapshot()));
                    return true;
                }
                let mode = if self.state.cursor().is_start() {
                    ScanMode::Replace
                } else {
                    ScanMode::Append
                };
                self.start_scan(mode, Some(reply));
            }

            SessionCommand::Refresh { reply } => {
                if let Err(e) = self.ensure_ready() {
                    let _ = reply.send(Err(e));
                    return true;
                }
                self.state.restart();
                self.start_scan(ScanMode::Replace, Some(reply));
            }

            SessionCommand::SelectDatabase { db, reply } => {
                if let Err(e) = self.ensure_ready() {
                    let _ = reply.send(Err(e));
                    return true;
                }
                // Flights already issued would land on the new database.
                if let Some(op) = self.dispatcher.pending().into_iter().next() {
                    let _ = reply.send(Err(BrowserError::OperationInProgress {
                        key: op.target_key,
                        kind: op.kind,
                    }));
                    return true;
                }
                if self.lookups > 0 {
                    let _ = reply.send(Err(BrowserError::OperationInProgress {
                        key: db.to_string(),
                        kind: OperationKind::SelectDatabase,
                    }));
                    return true;
                }
                debug!("Session {}: switching to db {}", self.id, db);
                self.switching_to = Some(db);
                // Anything scanned from here on may come from either database.
                self.state.retag();
                self.in_flight = None;
                self.page.set_loading(true);

                let store = Arc::clone(&self.store);
                let tx = self.completions_tx.clone();
                tokio::spawn(async move {
                    let result = store.select(db).await.map_err(BrowserError::from);
                    let _ = tx.send(Completion::DatabaseSelected { db, result, reply });
                });
            }

            SessionCommand::Select { key, reply } => {
                let result = match &key {
                    Some(k) if !self.page.select(k) => Err(BrowserError::NotFound { key: k.clone() }),
                    Some(_) => Ok(()),
                    None => {
                        self.page.clear_selection();
                        Ok(())
                    }
                };
                if result.is_ok() {
                    self.emit(SessionEvent::SelectionChanged { key });
                }
                let _ = reply.send(result);
            }

            SessionCommand::LoadDetails { key, reply } => {
                if let Err(e) = self.ensure_ready() {
                    let _ = reply.send(Err(e));
                    return true;
                }
                self.lookups += 1;
                let database = self.state.database();
                let store = Arc::clone(&self.store);
                let tx = self.completions_tx.clone();
                tokio::spawn(async move {
                    let (key_type, ttl) = tokio::join!(store.type_of(&key), store.ttl_of(&key));
                    let result = match (key_type, ttl) {
                        (Ok(raw), Ok(ttl)) => Ok((KeyType::classify(&raw), ttl)),
                        (Err(e), _) | (_, Err(e)) => Err(BrowserError::from_store(e, Some(&key))),
                    };
                    let _ = tx.send(Completion::Details { database, key, result, reply });
                });
            }

            SessionCommand::Execute { request, reply } => {
                if let Err(e) = self.ensure_ready() {
                    let _ = reply.send(Err(e));
                    return true;
                }
                match self.dispatcher.begin(request, self.state.epoch()) {
                    Ok(flight) => {
                        let database = self.state.database();
                        let tx = self.completions_tx.clone();
                        tokio::spawn(async move {
                            let result = flight.run().await;
                            let _ = tx.send(Completion::Command { database, result, reply });
                        });
                    }
                    Err(e) => {
                        let _ = reply.send(Err(e));
                    }
                }
            }

            SessionCommand::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }

            SessionCommand::Pending { reply } => {
                let _ = reply.send(self.dispatcher.pending());
            }

            SessionCommand::Subscribe { reply } => {
                let (tx, rx) = mpsc::unbounded_channel();
                self.subscribers.push(tx);
                let _ = reply.send(rx);
            }

            SessionCommand::Close { reply } => {
                self.closing = Some(reply);
                return false;
            }
        }
        true
    }

    fn ensure_ready(&self) -> Result<()> {
        if let Some(reason) = &self.poisoned {
            return Err(BrowserError::StoreUnavailable { reason: reason.clone() });
        }
        if let Some(db) = self.switching_to {
            return Err(BrowserError::OperationInProgress {
                key: db.to_string(),
                kind: OperationKind::SelectDatabase,
            });
        }
        Ok(())
    }

    fn start_scan(&mut self, mode: ScanMode, waiter: Option<oneshot::Sender<Result<PageSnapshot>>>) {
        if let Some(waiter) = waiter {
            self.waiters.push(waiter);
        }
        if let Some(previous) = self.in_flight {
            debug!(
                "Session {}: epoch {} supersedes in-flight scan of epoch {}",
                self.id,
                self.state.epoch(),
                previous.epoch
            );
        }

        let request = self.state.request();
        self.in_flight = Some(InFlightScan { epoch: request.epoch, mode });
        self.page.set_loading(true);

        let scanner = Arc::clone(&self.scanner);
        let store = Arc::clone(&self.store);
        let tx = self.completions_tx.clone();
        tokio::spawn(async move {
            let result = scanner.scan(store.as_ref(), &request).await;
            let _ = tx.send(Completion::Scan {
                epoch: request.epoch,
                mode,
                result,
            });
        });
    }

    // ==========================================
    // COMPLETIONS
    // ==========================================

    fn handle_completion(&mut self, done: Completion) {
        match done {
            Completion::Scan { epoch, mode, result } => self.on_scan(epoch, mode, result),
            Completion::Command { database, result, reply } => self.on_command(database, result, reply),
            Completion::Details { database, key, result, reply } => {
                self.lookups = self.lookups.saturating_sub(1);
                self.on_details(database, key, result, reply)
            }
            Completion::DatabaseSelected { db, result, reply } => self.on_database(db, result, reply),
        }
    }

    fn on_scan(&mut self, epoch: u64, mode: ScanMode, result: Result<ScanOutcome>) {
        if !self.state.is_current(epoch) || self.poisoned.is_some() {
            debug!(
                "Session {}: discarding scan result of stale epoch {} (current {})",
                self.id,
                epoch,
                self.state.epoch()
            );
            return;
        }
        self.in_flight = None;

        match result {
            Ok(outcome) => {
                self.state.commit(epoch, outcome.next_cursor, outcome.exhausted);
                let event = match mode {
                    ScanMode::Replace => {
                        let count = outcome.records.len();
                        self.page.replace(outcome.records, outcome.exhausted, outcome.total_estimate);
                        SessionEvent::PageReplaced { epoch, count, exhausted: outcome.exhausted }
                    }
                    ScanMode::Append => {
                        let added = self.page.append(outcome.records, outcome.exhausted, outcome.total_estimate);
                        SessionEvent::PageAppended { epoch, added, exhausted: outcome.exhausted }
                    }
                };
                self.emit(event);

                let snapshot = self.snapshot();
                for waiter in self.waiters.drain(..) {
                    let _ = waiter.send(Ok(snapshot.clone()));
                }
            }
            Err(e) => {
                warn!("Session {}: scan of epoch {} failed: {}", self.id, epoch, e);
                self.page.set_loading(false);
                self.fail(&e);
                for waiter in self.waiters.drain(..) {
                    let _ = waiter.send(Err(e.clone()));
                }
            }
        }
    }

    fn on_command(
        &mut self,
        database: u32,
        result: Result<CommandOutcome>,
        reply: oneshot::Sender<Result<CommandOutcome>>,
    ) {
        match result {
            Ok(outcome) if database != self.state.database() => {
                warn!(
                    "Session {}: command issued on db {} finished after a switch to db {}, page left as is",
                    self.id,
                    database,
                    self.state.database()
                );
                let _ = reply.send(Ok(outcome));
            }
            Ok(outcome) => {
                self.apply(&outcome);
                let _ = reply.send(Ok(outcome));
            }
            Err(e) => {
                warn!("Session {}: command failed: {}", self.id, e);
                self.fail(&e);
                if let BrowserError::NotFound { .. } = e {
                    self.refresh_after_vanished_key();
                }
                let _ = reply.send(Err(e));
            }
        }
    }

    fn apply(&mut self, outcome: &CommandOutcome) {
        match outcome {
            CommandOutcome::Deleted { key } => {
                if self.page.remove(key).is_some() {
                    self.emit(SessionEvent::RecordRemoved { key: key.clone() });
                }
                self.invalidate_in_flight();
            }
            CommandOutcome::Renamed { old_key, new_key } => {
                if old_key == new_key {
                    return;
                }
                if self.page.rename(old_key, new_key) {
                    self.emit(SessionEvent::RecordRenamed {
                        old_key: old_key.clone(),
                        new_key: new_key.clone(),
                    });
                }
                self.invalidate_in_flight();
            }
            CommandOutcome::ExpiryUpdated { key, ttl } => {
                if self.page.set_ttl(key, *ttl) {
                    if let Some(record) = self.page.get(key).cloned() {
                        self.emit(SessionEvent::RecordUpdated { record });
                    }
                }
                self.invalidate_in_flight();
            }
            CommandOutcome::Flushed => {
                info!("Session {}: keyspace flushed, rescanning", self.id);
                self.page.clear();
                let epoch = self.state.restart();
                self.emit(SessionEvent::Cleared { epoch });
                self.start_scan(ScanMode::Replace, None);
            }
            CommandOutcome::Clients(_) | CommandOutcome::ClientKilled { .. } => {}
        }
    }

    /// A successful mutation makes any scan issued before it suspect: retag
    /// the epoch and reissue the scan from the last committed cursor.
    fn invalidate_in_flight(&mut self) {
        self.state.retag();
        if let Some(previous) = self.in_flight.take() {
            self.start_scan(previous.mode, None);
        }
    }

    fn refresh_after_vanished_key(&mut self) {
        if self.poisoned.is_some() || self.switching_to.is_some() {
            return;
        }
        self.state.restart();
        self.start_scan(ScanMode::Replace, None);
    }

    fn on_details(
        &mut self,
        database: u32,
        key: String,
        result: Result<(Option<KeyType>, i64)>,
        reply: oneshot::Sender<Result<KeyRecord>>,
    ) {
        let current = database == self.state.database();
        match result {
            Ok((Some(key_type), ttl)) => {
                if current && self.page.update_details(&key, key_type, ttl) {
                    if let Some(record) = self.page.get(&key).cloned() {
                        self.emit(SessionEvent::RecordUpdated { record });
                    }
                }
                let record = KeyRecord { key, key_type, ttl };
                let _ = reply.send(Ok(record));
            }
            Ok((None, _)) => {
                let e = BrowserError::NotFound { key };
                self.fail(&e);
                if current {
                    self.refresh_after_vanished_key();
                }
                let _ = reply.send(Err(e));
            }
            Err(e) => {
                self.fail(&e);
                if let BrowserError::NotFound { .. } = e {
                    self.refresh_after_vanished_key();
                }
                let _ = reply.send(Err(e));
            }
        }
    }

    fn on_database(&mut self, db: u32, result: Result<()>, reply: oneshot::Sender<Result<PageSnapshot>>) {
        self.switching_to = None;
        match result {
            Ok(()) => {
                info!("Session {}: now on db {}", self.id, db);
                self.page.clear();
                let epoch = self.state.change_database(db);
                self.emit(SessionEvent::Cleared { epoch });
                self.start_scan(ScanMode::Replace, Some(reply));
            }
            Err(e) => {
                warn!("Session {}: switching to db {} failed: {}", self.id, db, e);
                self.fail(&e);
                let _ = reply.send(Err(e));
                if self.poisoned.is_none() {
                    // the scan discarded by the switch has to be redone
                    self.state.restart();
                    self.start_scan(ScanMode::Replace, None);
                }
            }
        }
    }

    // ==========================================
    // HELPERS
    // ==========================================

    /// Reports a failure to subscribers; a lost store poisons the session.
    fn fail(&mut self, e: &BrowserError) {
        let fatal = e.is_session_fatal();
        self.emit(SessionEvent::Failed {
            message: e.to_string(),
            fatal,
        });
        if let (true, BrowserError::StoreUnavailable { reason }) = (fatal, e) {
            error!("Session {}: store unavailable, session must be reopened: {}", self.id, reason);
            self.poisoned = Some(reason.clone());
            self.in_flight = None;
            self.page.set_loading(false);
            for waiter in self.waiters.drain(..) {
                let _ = waiter.send(Err(e.clone()));
            }
        }
    }

    fn emit(&mut self, event: SessionEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn snapshot(&self) -> PageSnapshot {
        self.page.snapshot(&self.state)
    }
}
