//! Error taxonomy for ledger operations.

use activetime_protocol::{codes, ErrorInfo, SessionId};

use crate::session::SessionStatus;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("{0}")]
    Validation(String),

    #[error("Session {session_id} is {status}, expected paused")]
    InvalidTransition {
        session_id: SessionId,
        status: SessionStatus,
    },

    #[error("Session not found: {0}")]
    NotFound(SessionId),

    #[error("{0}")]
    Storage(String),
}

impl LedgerError {
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::Validation(_) => codes::VALIDATION_ERROR,
            LedgerError::InvalidTransition { .. } => codes::INVALID_TRANSITION,
            LedgerError::NotFound(_) => codes::NOT_FOUND,
            LedgerError::Storage(_) => codes::STORAGE_ERROR,
        }
    }

    pub fn to_error_info(&self) -> ErrorInfo {
        ErrorInfo::new(self.code(), self.to_string())
    }
}

/// Wraps a rusqlite failure with the operation that produced it.
pub fn storage(context: &'static str) -> impl FnOnce(rusqlite::Error) -> LedgerError {
    move |err| LedgerError::Storage(format!("{}: {}", context, err))
}
