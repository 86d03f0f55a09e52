//! Keyspace browsing: scan state, pages, commands and the session actor
//! that ties them together.

pub mod actor;
pub mod dispatcher;
pub mod page;
pub mod registry;
pub mod scan_state;
pub mod scanner;
pub mod session;
pub mod types;

pub use actor::SessionEvent;
pub use dispatcher::{CommandDispatcher, CommandOutcome, CommandRequest};
pub use page::{PageModel, PageSnapshot};
pub use registry::SessionRegistry;
pub use scan_state::{ScanRequest, ScanState};
pub use scanner::{KeyspaceScanner, ScanOutcome};
pub use session::BrowserSession;
pub use types::{KeyRecord, KeyType, OperationKind, PendingOperation, TTL_NONE, TTL_UNKNOWN};
