//! Recompute discipline around the dynamic settings.
//!
//! Settings are only recomputed when the resolved profile id changes or
//! a caller forces it; otherwise the previous parameters remain
//! authoritative so that noise in the distance/usage inputs does not
//! churn orders.

use crate::dynamic::{DynamicConfig, DynamicSettings};
use crate::error::RiskResult;
use crate::profile::resolve_profile;
use crate::store::{RiskStore, SnapshotStore};
use chrono::{DateTime, Utc};
use pmm_core::{Margin, Position, Ticker};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tracing::debug;

/// Inputs the engine pulls per update, assembled by the caller from the
/// shared market state.
#[derive(Debug, Clone)]
pub struct RiskInputs {
    pub ticker: Ticker,
    pub margin: Margin,
    pub position: Position,
}

/// Resolves risk profiles and owns the active [`DynamicSettings`].
pub struct RiskEngine {
    config: DynamicConfig,
    exchange: String,
    symbol: String,
    risk_store: Arc<dyn RiskStore>,
    snapshot_store: Arc<dyn SnapshotStore>,
    /// Position bounds used for deposit-usage until the first compute;
    /// replaced by the computed bounds afterwards.
    bootstrap_min_position: Decimal,
    bootstrap_max_position: Decimal,
    current: Option<DynamicSettings>,
    current_profile_id: Option<String>,
    last_update: Option<DateTime<Utc>>,
    distance_to_avg_price_pct: Decimal,
    deposit_usage_pct: Decimal,
}

impl RiskEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: DynamicConfig,
        exchange: impl Into<String>,
        symbol: impl Into<String>,
        risk_store: Arc<dyn RiskStore>,
        snapshot_store: Arc<dyn SnapshotStore>,
        bootstrap_min_position: Decimal,
        bootstrap_max_position: Decimal,
    ) -> Self {
        Self {
            config,
            exchange: exchange.into(),
            symbol: symbol.into(),
            risk_store,
            snapshot_store,
            bootstrap_min_position,
            bootstrap_max_position,
            current: None,
            current_profile_id: None,
            last_update: None,
            distance_to_avg_price_pct: Decimal::ZERO,
            deposit_usage_pct: Decimal::ZERO,
        }
    }

    /// Currently active settings, if the first compute has happened.
    pub fn settings(&self) -> Option<&DynamicSettings> {
        self.current.as_ref()
    }

    pub fn distance_to_avg_price_pct(&self) -> Decimal {
        self.distance_to_avg_price_pct
    }

    pub fn deposit_usage_pct(&self) -> Decimal {
        self.deposit_usage_pct
    }

    /// When the settings were last recomputed.
    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.last_update
    }

    /// Seed min/max position with a first forced computation before the
    /// quoting loop starts.
    pub fn initialize(&mut self, inputs: &RiskInputs) -> RiskResult<()> {
        self.update_parameters(inputs, true)?;
        Ok(())
    }

    /// Resolve the profile for the current inputs and recompute the
    /// settings when it changed (or on `force`). Returns whether a
    /// recompute happened.
    pub fn update_parameters(&mut self, inputs: &RiskInputs, force: bool) -> RiskResult<bool> {
        let last_price = inputs.ticker.last.inner();
        self.distance_to_avg_price_pct = distance_to_avg_price_pct(
            inputs.position.quantity.inner(),
            inputs.position.avg_entry_price.inner(),
            last_price,
        );
        self.deposit_usage_pct = deposit_usage_pct(
            inputs.position.quantity.inner(),
            self.min_position(),
            self.max_position(),
        );

        let profile = resolve_profile(
            self.risk_store.risk_bands(),
            self.risk_store.risk_profiles(),
            self.distance_to_avg_price_pct,
            self.deposit_usage_pct,
        )?;

        let profile_changed = self.current_profile_id.as_deref() != Some(profile.id.as_str());
        if !force && !profile_changed {
            debug!(profile = %profile.id, "Risk profile unchanged, keeping parameters");
            return Ok(false);
        }

        let atr_pct_1m = self
            .snapshot_store
            .latest(&self.exchange, &self.symbol)
            .map(|s| s.atr_pct_1m)
            .unwrap_or(Decimal::ZERO);

        let settings = DynamicSettings::compute(
            &self.config,
            profile,
            inputs.margin.wallet_balance,
            last_price,
            atr_pct_1m,
        );
        settings.log_params(
            self.distance_to_avg_price_pct,
            self.deposit_usage_pct,
            last_price,
        );
        self.current_profile_id = Some(settings.profile_id.clone());
        self.current = Some(settings);
        self.last_update = Some(Utc::now());
        Ok(true)
    }

    fn min_position(&self) -> Decimal {
        self.current
            .as_ref()
            .map(|s| s.min_position)
            .unwrap_or(self.bootstrap_min_position)
    }

    fn max_position(&self) -> Decimal {
        self.current
            .as_ref()
            .map(|s| s.max_position)
            .unwrap_or(self.bootstrap_max_position)
    }
}

/// `|last - avg_entry| × 100 / last` for an open position, zero flat.
pub fn distance_to_avg_price_pct(
    current_qty: Decimal,
    avg_entry_price: Decimal,
    last_price: Decimal,
) -> Decimal {
    if current_qty.is_zero() || last_price.is_zero() {
        Decimal::ZERO
    } else {
        ((last_price - avg_entry_price) * dec!(100) / last_price).abs()
    }
}

/// Fraction of the permitted position actually used, against the short
/// bound when short and the long bound otherwise.
pub fn deposit_usage_pct(
    current_qty: Decimal,
    min_position: Decimal,
    max_position: Decimal,
) -> Decimal {
    let bound = if current_qty < Decimal::ZERO {
        min_position
    } else {
        max_position
    };
    if bound.is_zero() {
        Decimal::ZERO
    } else {
        (current_qty / bound).abs() * dec!(100)
    }
}
