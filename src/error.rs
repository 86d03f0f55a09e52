//! Error types for keyscope
//!
//! `StoreError` is what a `StoreCapability` implementation reports.
//! `BrowserError` is what sessions and the dispatcher surface to callers;
//! every variant carries enough context (kind + key) to render a message.

use thiserror::Error;

use crate::browser::types::OperationKind;

/// Result type alias using BrowserError
pub type Result<T> = std::result::Result<T, BrowserError>;

/// Failure reported by the store boundary
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Connection lost or never established
    #[error("store unavailable: {reason}")]
    Unavailable { reason: String },

    /// The store rejected the command (wrong type, bad argument, ...)
    #[error("store command failed: {reason}")]
    Command { reason: String },

    /// The command targeted a key that does not exist
    #[error("no such key: {key}")]
    NoSuchKey { key: String },
}

impl StoreError {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable { reason: reason.into() }
    }

    pub fn command(reason: impl Into<String>) -> Self {
        Self::Command { reason: reason.into() }
    }
}

/// Unified error type for browsing sessions
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrowserError {
    // -------------------------------------------------------------------------
    // Store failures
    // -------------------------------------------------------------------------
    #[error("store unavailable: {reason}")]
    StoreUnavailable { reason: String },

    #[error("store error{}: {reason}", key_suffix(.key))]
    Store { key: Option<String>, reason: String },

    // -------------------------------------------------------------------------
    // Key state
    // -------------------------------------------------------------------------
    #[error("key not found: {key}")]
    NotFound { key: String },

    #[error("key already exists: {key}")]
    Conflict { key: String },

    // -------------------------------------------------------------------------
    // Request state
    // -------------------------------------------------------------------------
    #[error("{kind} already in progress for {key}")]
    OperationInProgress { key: String, kind: OperationKind },

    #[error("invalid argument: {reason}")]
    InvalidArgument { reason: String },

    #[error("session closed")]
    SessionClosed,
}

fn key_suffix(key: &Option<String>) -> String {
    match key {
        Some(key) => format!(" on {}", key),
        None => String::new(),
    }
}

impl BrowserError {
    /// Lifts a store failure, tagging it with the key the command targeted.
    pub fn from_store(err: StoreError, key: Option<&str>) -> Self {
        match err {
            StoreError::Unavailable { reason } => Self::StoreUnavailable { reason },
            StoreError::Command { reason } => Self::Store {
                key: key.map(str::to_string),
                reason,
            },
            StoreError::NoSuchKey { key } => Self::NotFound { key },
        }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidArgument { reason: reason.into() }
    }

    /// The session cannot continue and must be re-established.
    pub fn is_session_fatal(&self) -> bool {
        matches!(self, Self::StoreUnavailable { .. } | Self::SessionClosed)
    }

    pub fn is_recoverable(&self) -> bool {
        !self.is_session_fatal()
    }
}

impl From<StoreError> for BrowserError {
    fn from(err: StoreError) -> Self {
        Self::from_store(err, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_keeps_target_key() {
        let err = BrowserError::from_store(StoreError::command("WRONGTYPE"), Some("user:1"));
        assert_eq!(
            err,
            BrowserError::Store {
                key: Some("user:1".to_string()),
                reason: "WRONGTYPE".to_string()
            }
        );
        assert_eq!(err.to_string(), "store error on user:1: WRONGTYPE");
    }

    #[test]
    fn no_such_key_maps_to_not_found() {
        let err: BrowserError = StoreError::NoSuchKey { key: "gone".to_string() }.into();
        assert_eq!(err, BrowserError::NotFound { key: "gone".to_string() });
        assert!(err.is_recoverable());
    }

    #[test]
    fn unavailable_is_session_fatal() {
        let err: BrowserError = StoreError::unavailable("connection reset").into();
        assert!(err.is_session_fatal());
        assert_eq!(err.to_string(), "store unavailable: connection reset");
    }

    #[test]
    fn in_progress_display_names_kind_and_key() {
        let err = BrowserError::OperationInProgress {
            key: "k".to_string(),
            kind: OperationKind::Delete,
        };
        assert_eq!(err.to_string(), "delete already in progress for k");
    }
}
