//! Client-side error taxonomy.

use activetime_protocol::{codes, ErrorInfo};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The ledger was unreachable or did not answer in time.
    #[error("Failed to reach ledger at {addr}: {message}")]
    Connection { addr: String, message: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed, unexpected or server-side failure responses.
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ClientError {
    pub fn connection(addr: impl Into<String>, message: impl Into<String>) -> Self {
        ClientError::Connection {
            addr: addr.into(),
            message: message.into(),
        }
    }

    pub fn is_connection(&self) -> bool {
        matches!(self, ClientError::Connection { .. })
    }
}

impl From<ErrorInfo> for ClientError {
    fn from(info: ErrorInfo) -> Self {
        match info.code.as_str() {
            codes::VALIDATION_ERROR | codes::INVALID_PARAMS => ClientError::Validation(info.message),
            codes::INVALID_TRANSITION => ClientError::InvalidTransition(info.message),
            codes::NOT_FOUND => ClientError::NotFound(info.message),
            _ => ClientError::Protocol(info.to_string()),
        }
    }
}
