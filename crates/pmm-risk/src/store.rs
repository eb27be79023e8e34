//! Collaborator stores consumed as black boxes.

use crate::profile::{RiskBand, RiskProfile};
use pmm_core::VolatilitySnapshot;

/// Source of the band and profile tables.
pub trait RiskStore: Send + Sync {
    fn risk_bands(&self) -> &[RiskBand];
    fn risk_profiles(&self) -> &[RiskProfile];
}

/// Source of realized-volatility snapshots per market.
pub trait SnapshotStore: Send + Sync {
    fn latest(&self, exchange: &str, symbol: &str) -> Option<VolatilitySnapshot>;
}

/// Risk tables loaded once from configuration.
#[derive(Debug, Clone)]
pub struct StaticRiskStore {
    bands: Vec<RiskBand>,
    profiles: Vec<RiskProfile>,
}

impl StaticRiskStore {
    pub fn new(bands: Vec<RiskBand>, profiles: Vec<RiskProfile>) -> Self {
        Self { bands, profiles }
    }
}

impl RiskStore for StaticRiskStore {
    fn risk_bands(&self) -> &[RiskBand] {
        &self.bands
    }

    fn risk_profiles(&self) -> &[RiskProfile] {
        &self.profiles
    }
}
