//! Session error types.

use thiserror::Error;

/// Streaming session error types.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Connection closed by server: code={code}, reason={reason}")]
    ConnectionClosed { code: u16, reason: String },

    /// Reconnect attempt cap hit; the connection has entered Stopped.
    #[error("Reconnect attempts exhausted after {attempts} tries")]
    ReconnectExhausted { attempts: u32 },

    /// The exchange rejected the authentication handshake.
    #[error("Stream authentication rejected: {0}")]
    AuthRejected(String),

    #[error("Stream message parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// The event channel consumer is gone; the session has no caller
    /// left to serve.
    #[error("Session event channel closed")]
    EventChannelClosed,
}

impl SessionError {
    /// Faults inside the streaming loop are load-bearing for every
    /// downstream decision; these demand a process restart rather than
    /// a best-effort continue with stale data.
    pub fn requires_restart(&self) -> bool {
        matches!(
            self,
            Self::ReconnectExhausted { .. } | Self::AuthRejected(_) | Self::EventChannelClosed
        )
    }
}

/// Result type alias for session operations.
pub type SessionResult<T> = Result<T, SessionError>;
