//! RPC error types.

use thiserror::Error;

/// Daemon code for an unknown transaction, block or spent index entry.
pub const RPC_INVALID_ADDRESS_OR_KEY: i64 = -5;

/// Daemon code returned while the daemon is still loading its indexes.
pub const RPC_IN_WARMUP: i64 = -28;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RpcError {
    /// The daemon answered with an `{error: {code, message}}` body.
    #[error("{message}")]
    Daemon { code: i64, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl RpcError {
    pub fn daemon(code: i64, message: impl Into<String>) -> Self {
        Self::Daemon {
            code,
            message: message.into(),
        }
    }

    /// Daemon error code, if the daemon produced this error.
    pub fn code(&self) -> Option<i64> {
        match self {
            Self::Daemon { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.code() == Some(RPC_INVALID_ADDRESS_OR_KEY)
    }

    pub fn is_warmup(&self) -> bool {
        self.code() == Some(RPC_IN_WARMUP)
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(e: serde_json::Error) -> Self {
        RpcError::InvalidResponse(e.to_string())
    }
}

impl From<reqwest::Error> for RpcError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RpcError::Transport(format!("request timed out: {e}"))
        } else if e.is_connect() {
            RpcError::Transport(format!("connection failed: {e}"))
        } else if e.is_decode() {
            RpcError::InvalidResponse(e.to_string())
        } else {
            RpcError::Transport(e.to_string())
        }
    }
}
