use thiserror::Error;

use crate::types::UserId;

/// Top-level error type for the Trellis platform.
#[derive(Error, Debug)]
pub enum TrellisError {
    /// A live lock is held by another user. Callers present a read-only view.
    #[error("Locked by {username} ({holder}) for {age_secs}s")]
    AlreadyLocked {
        holder: UserId,
        username: String,
        age_secs: i64,
    },

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Document is not editable in status {status}")]
    NotEditable { status: String },

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TrellisError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, TrellisError>;
