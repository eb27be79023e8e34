//! Error taxonomy for trade-API execution.
//!
//! Transient network/exchange faults are retried locally up to a budget;
//! anything beyond the budget, or any non-recoverable condition, surfaces
//! to the top level, which either re-raises to a caller that asked for it
//! or terminates the process for external supervision to restart cleanly.

use thiserror::Error;

/// Execution error types.
#[derive(Debug, Error)]
pub enum ExecError {
    /// HTTP 401. Cannot be fixed by retrying; the process must restart
    /// with corrected credentials.
    #[error("Authentication failure: {0}")]
    AuthenticationFailure(String),

    /// HTTP 404 on a non-delete call. The resource is simply not there.
    #[error("Not found: {verb} {path}")]
    NotFound { verb: String, path: String },

    /// Duplicate clOrdID recovery fetched an order that does not match
    /// the submitted payload. A consistency violation, never retried.
    #[error("Duplicate clOrdID recovery mismatch; submitted: {submitted}, returned: {returned}")]
    DuplicateMismatch { submitted: String, returned: String },

    /// HTTP 400 "insufficient available balance".
    #[error("Insufficient balance: {0}")]
    InsufficientBalance(String),

    /// Retry budget exhausted. Carries the endpoint and payload for
    /// operator diagnostics.
    #[error("Max retry amount of {max_retries} on {path} ({payload}) hit")]
    MaxRetriesExceeded {
        max_retries: u32,
        path: String,
        payload: String,
    },

    /// Any HTTP status the policy table has no rule for.
    #[error("Unhandled HTTP {status} on {verb} {path}: {body}")]
    UnhandledStatus {
        status: u16,
        verb: String,
        path: String,
        body: String,
    },

    /// The caller opted into error propagation (`rethrow`); the inner
    /// fault no longer demands a process restart.
    #[error("{0}")]
    Propagated(#[source] Box<ExecError>),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error(transparent)]
    Core(#[from] pmm_core::CoreError),
}

impl ExecError {
    /// Whether this fault should terminate the process with the restart
    /// exit status rather than be handled in-process.
    pub fn requires_restart(&self) -> bool {
        match self {
            Self::AuthenticationFailure(_)
            | Self::DuplicateMismatch { .. }
            | Self::InsufficientBalance(_)
            | Self::MaxRetriesExceeded { .. }
            | Self::UnhandledStatus { .. }
            | Self::NotFound { .. } => true,
            Self::Propagated(_) => false,
            _ => false,
        }
    }
}

/// Result type alias for executor operations.
pub type ExecResult<T> = Result<T, ExecError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restart_classification() {
        assert!(ExecError::AuthenticationFailure("bad key".into()).requires_restart());
        assert!(ExecError::InsufficientBalance("out of funds".into()).requires_restart());
        assert!(ExecError::NotFound {
            verb: "GET".into(),
            path: "instrument".into()
        }
        .requires_restart());
        assert!(!ExecError::InvalidResponse("truncated".into()).requires_restart());
    }

    #[test]
    fn test_propagated_downgrades_restart() {
        let inner = ExecError::UnhandledStatus {
            status: 502,
            verb: "PUT".into(),
            path: "order/bulk".into(),
            body: String::new(),
        };
        assert!(inner.requires_restart());
        assert!(!ExecError::Propagated(Box::new(inner)).requires_restart());
    }
}
