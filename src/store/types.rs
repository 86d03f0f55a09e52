use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

// ========================================
// CURSOR
// ========================================

/// Opaque iteration token. `"0"` both starts a pass and, when handed back
/// by the store, marks its end.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct Cursor(String);

impl Cursor {
    pub const START: &'static str = "0";

    pub fn start() -> Self {
        Self(Self::START.to_string())
    }

    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn is_start(&self) -> bool {
        self.0 == Self::START
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Cursor {
    fn default() -> Self {
        Self::start()
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of one iteration call
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScanBatch {
    pub keys: Vec<String>,
    pub next_cursor: Cursor,
}

// ========================================
// CLIENTS
// ========================================

/// One connected client as reported by the store.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ClientInfo {
    pub id: u64,
    pub addr: String,
    pub name: String,
    pub age_secs: u64,
    pub idle_secs: u64,
    pub db: u32,
    pub cmd: String,
    /// Fields without a dedicated slot, kept verbatim.
    pub extra: BTreeMap<String, String>,
}

impl ClientInfo {
    pub fn new(id: u64, addr: impl Into<String>) -> Self {
        Self {
            id,
            addr: addr.into(),
            ..Self::default()
        }
    }

    /// Parses the `CLIENT LIST` reply: one client per line, space separated
    /// `field=value` pairs. Lines without an `addr` are skipped.
    pub fn parse_list(raw: &str) -> Vec<ClientInfo> {
        raw.lines().filter_map(Self::parse_line).collect()
    }

    pub fn parse_line(line: &str) -> Option<ClientInfo> {
        let mut info = ClientInfo::default();
        let mut has_addr = false;

        for pair in line.split_whitespace() {
            let Some((field, value)) = pair.split_once('=') else {
                continue;
            };
            match field {
                "id" => info.id = value.parse().unwrap_or_default(),
                "addr" => {
                    info.addr = value.to_string();
                    has_addr = !value.is_empty();
                }
                "name" => info.name = value.to_string(),
                "age" => info.age_secs = value.parse().unwrap_or_default(),
                "idle" => info.idle_secs = value.parse().unwrap_or_default(),
                "db" => info.db = value.parse().unwrap_or_default(),
                "cmd" => info.cmd = value.to_string(),
                _ => {
                    info.extra.insert(field.to_string(), value.to_string());
                }
            }
        }

        has_addr.then_some(info)
    }
}
