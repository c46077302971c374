//! Error types for the OpenOCD RPC client

use thiserror::Error;

/// Main error type for RPC sessions
#[derive(Error, Debug)]
pub enum RpcError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Connection closed by remote")]
    ConnectionClosed,

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Decode failed: {0}")]
    DecodeFailed(String),

    #[error("Command timeout")]
    Timeout,

    #[error("Session is closed")]
    SessionClosed,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl RpcError {
    /// True for failures that happen during a framed exchange.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            RpcError::WriteFailed(_)
                | RpcError::ConnectionClosed
                | RpcError::ReadFailed(_)
                | RpcError::DecodeFailed(_)
                | RpcError::Timeout
        )
    }

    /// True when the byte stream can no longer be trusted to be on a frame boundary.
    pub(crate) fn desynchronizes(&self) -> bool {
        matches!(
            self,
            RpcError::WriteFailed(_)
                | RpcError::ConnectionClosed
                | RpcError::ReadFailed(_)
                | RpcError::Timeout
        )
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, RpcError>;
