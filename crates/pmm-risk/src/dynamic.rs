//! Dynamic quoting parameters derived from wallet, price, volatility,
//! and the active risk profile.
//!
//! The computation pipeline is identical in structure across margin
//! models; only the price factor differs: instruments quoted in the
//! margin currency multiply by price, linear contracts divide by it.

use crate::profile::RiskProfile;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::info;

const MIN_SPREAD_ADJUSTMENT_FACTOR: Decimal = dec!(0.6);
const RELIST_INTERVAL_ADJUSTMENT_FACTOR: Decimal = dec!(1.2);

const INVERSE_DEFAULT_LEVERAGE: Decimal = dec!(100);
const INVERSE_INITIAL_MARGIN_BASE_PCT: Decimal = dec!(0.01);
const INVERSE_TAKER_FEE_PCT: Decimal = dec!(0.00075);

const LINEAR_DEFAULT_LEVERAGE: Decimal = dec!(5);
const LINEAR_MAINTENANCE_RATIO_PCT: Decimal = dec!(0.15);
const LINEAR_DISTANCE_TO_LIQUIDATION_PCT: Decimal = dec!(0.25);
const LINEAR_POSITION_MARGIN_ADJUST_RATIO: Decimal = dec!(0.45);
const LINEAR_MAX_ORDER_PAIRS: u32 = 5;

/// How the exchange margins the traded contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarginModel {
    /// Contracts quoted in the margin currency; position bounds carry a
    /// short-side ratio derived from leverage and margin ratio.
    Inverse,
    /// Linear contracts; sizes are denominated in the base asset.
    Linear,
}

/// Static knobs for the dynamic computation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DynamicConfig {
    pub margin_model: MarginModel,
    /// Wallet fraction committed to position margin (inverse model).
    pub position_margin_pct: Decimal,
    /// Wallet fraction committed to order margin (inverse model).
    pub order_margin_pct: Decimal,
    /// Fallback interval when no ATR data is available yet.
    pub static_interval_pct: Decimal,
    /// Global multiplier applied on top of the profile's ATR factor.
    pub interval_adjust_mult: Decimal,
}

/// Computed quoting parameters. Owned by the risk engine, read-only to
/// everyone else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicSettings {
    pub profile_id: String,
    pub risk_level: u32,
    pub leverage: Decimal,
    pub initial_margin_base_pct: Decimal,
    pub taker_fee_pct: Decimal,
    pub interval_pct: Decimal,
    pub min_spread_pct: Decimal,
    pub relist_interval_pct: Decimal,
    pub order_pairs: u32,
    pub max_number_dca_orders: u32,
    pub position_margin_amount: Decimal,
    pub order_margin_amount: Decimal,
    pub max_possible_position_margin: Decimal,
    pub max_short_position_ratio: Decimal,
    pub min_position: Decimal,
    pub max_position: Decimal,
    pub order_step_size: Decimal,
    pub order_start_size: Decimal,
    pub deposit_usage_intensity: Decimal,
    pub deposit_usage_intensity_pct: Decimal,
}

impl DynamicSettings {
    /// Derive the full parameter set. Pure: identical inputs always
    /// yield identical outputs.
    pub fn compute(
        config: &DynamicConfig,
        profile: &RiskProfile,
        wallet_balance: Decimal,
        last_price: Decimal,
        atr_pct_1m: Decimal,
    ) -> Self {
        let interval_pct = if atr_pct_1m > Decimal::ZERO {
            profile.interval_atr_mult * atr_pct_1m * config.interval_adjust_mult
        } else {
            config.static_interval_pct
        };
        let min_spread_pct =
            (interval_pct * dec!(2) * MIN_SPREAD_ADJUSTMENT_FACTOR).round_dp(8);
        let relist_interval_pct = (interval_pct * RELIST_INTERVAL_ADJUSTMENT_FACTOR).round_dp(8);

        match config.margin_model {
            MarginModel::Inverse => Self::compute_inverse(
                config,
                profile,
                wallet_balance,
                last_price,
                interval_pct,
                min_spread_pct,
                relist_interval_pct,
            ),
            MarginModel::Linear => Self::compute_linear(
                profile,
                wallet_balance,
                last_price,
                interval_pct,
                min_spread_pct,
                relist_interval_pct,
            ),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn compute_inverse(
        config: &DynamicConfig,
        profile: &RiskProfile,
        wallet_balance: Decimal,
        last_price: Decimal,
        interval_pct: Decimal,
        min_spread_pct: Decimal,
        relist_interval_pct: Decimal,
    ) -> Self {
        let leverage = INVERSE_DEFAULT_LEVERAGE;
        let position_margin_amount = (wallet_balance * config.position_margin_pct).round_dp(8);
        let order_margin_amount = (wallet_balance * config.order_margin_pct).round_dp(8);
        let max_possible_position_margin =
            (position_margin_amount * leverage * last_price).round();
        let max_short_position_ratio =
            (Decimal::ONE + Decimal::ONE / (config.position_margin_pct * leverage)).round_dp(8);
        let min_position = (-max_possible_position_margin * max_short_position_ratio).round();
        let max_position = max_possible_position_margin.round();

        let dca = Decimal::from(profile.max_number_dca_orders);
        let order_step_size = order_step_size_stub();
        let order_start_size = (max_possible_position_margin / dca
            - order_step_size * (dca - Decimal::ONE) / dec!(2))
        .round();
        let (deposit_usage_intensity, deposit_usage_intensity_pct) = usage_intensity(
            order_start_size,
            interval_pct,
            max_possible_position_margin,
            8,
        );

        Self {
            profile_id: profile.id.clone(),
            risk_level: profile.risk_level,
            leverage,
            initial_margin_base_pct: INVERSE_INITIAL_MARGIN_BASE_PCT,
            taker_fee_pct: INVERSE_TAKER_FEE_PCT,
            interval_pct,
            min_spread_pct,
            relist_interval_pct,
            order_pairs: profile.order_pairs,
            max_number_dca_orders: profile.max_number_dca_orders,
            position_margin_amount,
            order_margin_amount,
            max_possible_position_margin,
            max_short_position_ratio,
            min_position,
            max_position,
            order_step_size,
            order_start_size,
            deposit_usage_intensity,
            deposit_usage_intensity_pct,
        }
    }

    fn compute_linear(
        profile: &RiskProfile,
        wallet_balance: Decimal,
        last_price: Decimal,
        interval_pct: Decimal,
        min_spread_pct: Decimal,
        relist_interval_pct: Decimal,
    ) -> Self {
        let leverage = LINEAR_DEFAULT_LEVERAGE;
        let position_margin_pct = (Decimal::ONE - LINEAR_DISTANCE_TO_LIQUIDATION_PCT)
            * LINEAR_POSITION_MARGIN_ADJUST_RATIO
            / (Decimal::ONE - LINEAR_MAINTENANCE_RATIO_PCT);
        let position_margin_amount = (wallet_balance * position_margin_pct).round_dp(8);
        let max_possible_position_margin = (position_margin_amount * leverage).round();
        let min_position = (-max_possible_position_margin / last_price).round_dp(8);
        let max_position = (max_possible_position_margin / last_price).round_dp(8);

        let order_pairs = profile.order_pairs.min(LINEAR_MAX_ORDER_PAIRS);
        let dca = Decimal::from(profile.max_number_dca_orders);
        let order_step_size = order_step_size_stub();
        let order_start_size = (max_possible_position_margin / (last_price * dca)
            - order_step_size * (dca - Decimal::ONE) / dec!(2))
        .round_dp(8);
        let (deposit_usage_intensity, deposit_usage_intensity_pct) = usage_intensity(
            order_start_size * last_price,
            interval_pct,
            max_possible_position_margin,
            2,
        );

        Self {
            profile_id: profile.id.clone(),
            risk_level: profile.risk_level,
            leverage,
            initial_margin_base_pct: Decimal::ZERO,
            taker_fee_pct: Decimal::ZERO,
            interval_pct,
            min_spread_pct,
            relist_interval_pct,
            order_pairs,
            max_number_dca_orders: profile.max_number_dca_orders,
            position_margin_amount,
            order_margin_amount: Decimal::ZERO,
            max_possible_position_margin,
            max_short_position_ratio: Decimal::ONE,
            min_position,
            max_position,
            order_step_size,
            order_start_size,
            deposit_usage_intensity,
            deposit_usage_intensity_pct,
        }
    }

    /// Multi-line operator dump emitted on every recompute.
    pub fn log_params(
        &self,
        distance_to_avg_price_pct: Decimal,
        deposit_usage_pct: Decimal,
        last_price: Decimal,
    ) {
        info!(
            "Dynamic parameters have been updated:\n\
             interval_pct (RP) = {}% ({})\n\
             min/max position = {}/{}\n\
             order_start_size = {}\n\
             distance_to_avg_price_pct = {}%\n\
             deposit_usage_pct = {}%\n\
             deposit_usage_intensity (USD/1% interval) = ${}\n\
             deposit_usage_intensity (USD/1% interval), % = {}%\n\
             ---------------------\n\
             Last Price = {}",
            (self.interval_pct * dec!(100)).round_dp(2),
            self.profile_id,
            self.min_position,
            self.max_position,
            self.order_start_size,
            distance_to_avg_price_pct.round_dp(2),
            deposit_usage_pct.round_dp(2),
            self.deposit_usage_intensity,
            self.deposit_usage_intensity_pct.round_dp(2),
            last_price,
        );
    }
}

/// Ladder step sizing model is not implemented yet; callers must
/// tolerate a zero step.
fn order_step_size_stub() -> Decimal {
    Decimal::ZERO
}

fn usage_intensity(
    start_size_value: Decimal,
    interval_pct: Decimal,
    max_possible_position_margin: Decimal,
    dp: u32,
) -> (Decimal, Decimal) {
    let intensity = if interval_pct.is_zero() {
        Decimal::ZERO
    } else {
        (start_size_value / (dec!(100) * interval_pct)).round_dp(dp)
    };
    let intensity_pct = if max_possible_position_margin.is_zero() {
        Decimal::ZERO
    } else {
        intensity * dec!(100) / max_possible_position_margin
    };
    (intensity, intensity_pct)
}
