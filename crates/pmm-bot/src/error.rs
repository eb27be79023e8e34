//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Core error: {0}")]
    Core(#[from] pmm_core::CoreError),

    #[error("Executor error: {0}")]
    Exec(#[from] pmm_exec::ExecError),

    #[error("Session error: {0}")]
    Session(#[from] pmm_session::SessionError),

    #[error("Risk error: {0}")]
    Risk(#[from] pmm_risk::RiskError),

    #[error("Quote error: {0}")]
    Quote(#[from] pmm_quote::QuoteError),

    #[error("Session terminated: {0}")]
    SessionTerminated(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// Whether the process should exit with the restart status so the
    /// external supervisor brings up a clean instance.
    pub fn requires_restart(&self) -> bool {
        match self {
            Self::Exec(err) => err.requires_restart(),
            Self::Session(err) => err.requires_restart(),
            Self::Quote(pmm_quote::QuoteError::Exec(err)) => err.requires_restart(),
            // A band-table gap is a configuration defect; quoting must
            // not continue on stale parameters.
            Self::Risk(_) => true,
            Self::SessionTerminated(_) => true,
            _ => false,
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn test_restart_classification() {
        let auth = AppError::Exec(pmm_exec::ExecError::AuthenticationFailure(
            "401".to_string(),
        ));
        assert!(auth.requires_restart());

        let band = AppError::Risk(pmm_risk::RiskError::NoMatchingBand {
            distance_pct: Decimal::ZERO,
            usage_pct: Decimal::ZERO,
        });
        assert!(band.requires_restart());

        assert!(!AppError::Config("bad toml".to_string()).requires_restart());

        let skip = AppError::Quote(pmm_quote::QuoteError::MarketEmpty("XBTUSD".to_string()));
        assert!(!skip.requires_restart());
    }
}
