//! Quoting errors.

use thiserror::Error;

/// Quoting engine error types.
#[derive(Debug, Error)]
pub enum QuoteError {
    /// Order book has no mid price; cannot quote this cycle.
    #[error("Order book empty for {0}, orders not sent")]
    MarketEmpty(String),

    /// Instrument is not in a fillable state.
    #[error("Market {symbol} is not open/fillable: state={state}")]
    MarketClosed { symbol: String, state: String },

    /// The session has not yet delivered the data needed to quote.
    #[error("Missing market data for {symbol}: {what}")]
    MissingData { symbol: String, what: &'static str },

    #[error(transparent)]
    Exec(#[from] pmm_exec::ExecError),
}

impl QuoteError {
    /// Pre-flight rejections skip the cycle; execution faults follow
    /// the executor's restart policy.
    pub fn skips_cycle(&self) -> bool {
        matches!(
            self,
            Self::MarketEmpty(_) | Self::MarketClosed { .. } | Self::MissingData { .. }
        )
    }
}

/// Result type alias for quoting operations.
pub type QuoteResult<T> = Result<T, QuoteError>;
