//! Risk engine errors.

use rust_decimal::Decimal;
use thiserror::Error;

/// Risk engine error types.
#[derive(Debug, Error)]
pub enum RiskError {
    /// No configured band contains the point. The band table is assumed
    /// complete; a gap is a configuration defect, not an expected
    /// runtime case.
    #[error(
        "No risk band matches distance_to_avg_price_pct={distance_pct}, \
         deposit_usage_pct={usage_pct}"
    )]
    NoMatchingBand {
        distance_pct: Decimal,
        usage_pct: Decimal,
    },

    /// A band names a profile id the profile table does not define.
    #[error("Risk band references unknown profile id {0:?}")]
    UnknownProfile(String),
}

/// Result type alias for risk operations.
pub type RiskResult<T> = Result<T, RiskError>;
