use std::fmt;

use serde::Serialize;

/// TTL of a key without expiry.
pub const TTL_NONE: i64 = -1;
/// TTL not fetched yet (or the key is gone).
pub const TTL_UNKNOWN: i64 = -2;

// ========================================
// KEY TYPE
// ========================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    String,
    Hash,
    List,
    Set,
    ZSet,
    /// Reported by the store but not one of the browsable types.
    Unknown,
}

impl KeyType {
    /// Maps a store type name. `"none"` (the key does not exist) yields
    /// `None`; anything unrecognised yields `Unknown`.
    pub fn classify(raw: &str) -> Option<KeyType> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "none" | "" => None,
            "string" => Some(Self::String),
            "hash" => Some(Self::Hash),
            "list" => Some(Self::List),
            "set" => Some(Self::Set),
            "zset" => Some(Self::ZSet),
            _ => Some(Self::Unknown),
        }
    }

    /// Store-side name, also used for TYPE filters.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Hash => "hash",
            Self::List => "list",
            Self::Set => "set",
            Self::ZSet => "zset",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ========================================
// KEY RECORD
// ========================================

/// One listed key. Identity is `key`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct KeyRecord {
    pub key: String,
    #[serde(rename = "type")]
    pub key_type: KeyType,
    pub ttl: i64,
}

impl KeyRecord {
    pub fn new(key: impl Into<String>, key_type: KeyType) -> Self {
        Self {
            key: key.into(),
            key_type,
            ttl: TTL_UNKNOWN,
        }
    }

    pub fn has_expiry(&self) -> bool {
        self.ttl >= 0
    }
}

// ========================================
// OPERATIONS
// ========================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Scan,
    Delete,
    Rename,
    Expire,
    Flush,
    ListClients,
    KillClient,
    SelectDatabase,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scan => "scan",
            Self::Delete => "delete",
            Self::Rename => "rename",
            Self::Expire => "expire",
            Self::Flush => "flush",
            Self::ListClients => "client list",
            Self::KillClient => "client kill",
            Self::SelectDatabase => "database switch",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Target used for operations that are not about a single key.
pub const ALL_KEYS: &str = "*";

/// An in-flight mutating call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PendingOperation {
    pub target_key: String,
    pub kind: OperationKind,
    pub epoch: u64,
}
