//! keyscope: paginated browsing and administration of a remote key-value
//! store's keyspace.
//!
//! A `BrowserSession` lists keys page by page through a cursor scan and runs
//! the mutating commands (delete, rename, expire, flush, client kill) against
//! the store, keeping its page consistent with what the store confirmed.

pub mod browser;
pub mod config;
pub mod error;
pub mod store;

pub use browser::{BrowserSession, PageSnapshot, SessionEvent, SessionRegistry};
pub use config::Config;
pub use error::{BrowserError, Result, StoreError};
pub use store::{MemoryStore, StoreCapability};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
