//! Order-maker strategy: exit pair for open positions, entry ladder
//! when flat.

use pmm_core::{
    ExecInstructions, Instrument, Order, OrderSide, OrderType, Position, Price, QuotingSide, Size,
    Ticker,
};
use pmm_session::LiveOrder;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::debug;

const SL_ATR_MULT: Decimal = dec!(2);
const RR_RATIO: Decimal = dec!(3);
const INTERVAL_ATR_MULT: Decimal = dec!(0.5);
const RELIST_INTERVAL_ATR_MULT: Decimal = dec!(0.55);

/// Entry size used when trading real money; simulated mode sizes from
/// the computed position bounds instead.
const LIVE_ENTRY_SIZE: Decimal = dec!(100);

const MAX_ORDERS_OPEN_POSITION: usize = 2;

/// Everything a strategy needs to quote one symbol for one cycle.
#[derive(Debug, Clone)]
pub struct QuoteContext {
    pub instrument: Instrument,
    pub ticker: Ticker,
    pub position: Position,
    /// Realized 5-minute ATR %, driving exit distances and ladder
    /// spacing.
    pub atr_pct_5m: Decimal,
    pub quoting_side: QuotingSide,
    /// True when trading real money.
    pub live_mode: bool,
    /// Computed short-side position bound (negative).
    pub min_position: Decimal,
    /// Computed long-side position bound.
    pub max_position: Decimal,
}

/// A quoting strategy: build the target order list and decide whether
/// the live set already matches it.
pub trait Strategy: Send + Sync {
    fn build_target_orders(&self, ctx: &QuoteContext) -> Vec<Order>;

    /// Whether the live robot orders already realize the target. A
    /// false here triggers a full cancel-and-replace.
    fn validate(&self, live: &[LiveOrder], ctx: &QuoteContext) -> bool;
}

/// TP/SL exit pair for open positions, a ±1 entry ladder when flat.
#[derive(Debug, Default)]
pub struct OrderMakerStrategy;

impl OrderMakerStrategy {
    pub fn new() -> Self {
        Self
    }

    /// Stop-loss distance as a price fraction.
    fn stop_loss_pct(ctx: &QuoteContext) -> Decimal {
        SL_ATR_MULT * ctx.atr_pct_5m
    }

    /// Take-profit price: entry offset by stop-loss-% × reward:risk in
    /// the profitable direction.
    fn tp_price(ctx: &QuoteContext, is_long: bool) -> Price {
        let take_profit_pct = Self::stop_loss_pct(ctx) * RR_RATIO;
        let factor = if is_long {
            Decimal::ONE + take_profit_pct
        } else {
            Decimal::ONE - take_profit_pct
        };
        (ctx.position.avg_entry_price * factor).round_to_tick(ctx.instrument.tick_size)
    }

    /// Stop price: entry offset by stop-loss-% in the adverse direction.
    fn sl_price(ctx: &QuoteContext, is_long: bool) -> Price {
        let stop_loss_pct = Self::stop_loss_pct(ctx);
        let factor = if is_long {
            Decimal::ONE - stop_loss_pct
        } else {
            Decimal::ONE + stop_loss_pct
        };
        (ctx.position.avg_entry_price * factor).round_to_tick(ctx.instrument.tick_size)
    }

    /// Ladder price at a signed index from last.
    fn ladder_price(ctx: &QuoteContext, index: i32) -> Price {
        let offset = Decimal::from(index) * INTERVAL_ATR_MULT * ctx.atr_pct_5m;
        (ctx.ticker.last * (Decimal::ONE + offset)).round_to_tick(ctx.instrument.tick_size)
    }

    /// Entry size for a flat-position quote.
    fn entry_quantity(ctx: &QuoteContext, side: OrderSide) -> Size {
        if ctx.live_mode {
            Size::new(LIVE_ENTRY_SIZE)
        } else {
            let bound = match side {
                OrderSide::Buy => ctx.max_position,
                OrderSide::Sell => ctx.min_position,
            };
            Size::new(bound).round_quantity().abs()
        }
    }

    fn exit_pair(ctx: &QuoteContext) -> Vec<Order> {
        let is_long = ctx.position.is_long();
        let exit_side = if is_long { OrderSide::Sell } else { OrderSide::Buy };
        let quantity = ctx.position.quantity.abs();
        vec![
            Order::limit(
                &ctx.instrument.symbol,
                exit_side,
                quantity,
                Self::tp_price(ctx, is_long),
                ExecInstructions::exit_limit(),
            ),
            Order::stop(
                &ctx.instrument.symbol,
                exit_side,
                quantity,
                Self::sl_price(ctx, is_long),
                ExecInstructions::exit_stop(),
            ),
        ]
    }

    fn entry_ladder(ctx: &QuoteContext) -> Vec<Order> {
        let mut orders = Vec::new();
        if ctx.quoting_side.allows(OrderSide::Buy) {
            orders.push(Order::limit(
                &ctx.instrument.symbol,
                OrderSide::Buy,
                Self::entry_quantity(ctx, OrderSide::Buy),
                Self::ladder_price(ctx, -1),
                ExecInstructions::post_only(),
            ));
        }
        if ctx.quoting_side.allows(OrderSide::Sell) {
            orders.push(Order::limit(
                &ctx.instrument.symbol,
                OrderSide::Sell,
                Self::entry_quantity(ctx, OrderSide::Sell),
                Self::ladder_price(ctx, 1),
                ExecInstructions::post_only(),
            ));
        }
        orders
    }

    fn find_order<'a>(
        live: &'a [LiveOrder],
        quantity: Size,
        side: OrderSide,
        order_type: OrderType,
    ) -> Option<&'a LiveOrder> {
        live.iter()
            .find(|o| o.quantity == quantity && o.side == side && o.order_type == order_type)
    }

    /// Whether two prices differ by more than the given fraction of the
    /// first.
    fn price_diff_exceeds(price: Price, desired: Price, pct: Decimal) -> bool {
        price
            .pct_distance(desired)
            .map(|diff| diff > pct)
            .unwrap_or(true)
    }

    fn validate_open_position(&self, live: &[LiveOrder], ctx: &QuoteContext) -> bool {
        let is_long = ctx.position.is_long();
        let exit_side = if is_long { OrderSide::Sell } else { OrderSide::Buy };
        let quantity = ctx.position.quantity.abs();

        let Some(tp) = Self::find_order(live, quantity, exit_side, OrderType::Limit) else {
            return false;
        };
        let Some(sl) = Self::find_order(live, quantity, exit_side, OrderType::Stop) else {
            return false;
        };

        // A position's exit orders are price-exact; no tolerance.
        if tp.price != Some(Self::tp_price(ctx, is_long)) {
            return false;
        }
        if sl.stop_price != Some(Self::sl_price(ctx, is_long)) {
            return false;
        }
        true
    }

    fn validate_flat(&self, live: &[LiveOrder], ctx: &QuoteContext) -> bool {
        let relist_pct = RELIST_INTERVAL_ATR_MULT * ctx.atr_pct_5m;
        let buy_qty = Self::entry_quantity(ctx, OrderSide::Buy);
        let sell_qty = Self::entry_quantity(ctx, OrderSide::Sell);
        let buy = Self::find_order(live, buy_qty, OrderSide::Buy, OrderType::Limit);
        let sell = Self::find_order(live, sell_qty, OrderSide::Sell, OrderType::Limit);

        if ctx.quoting_side.allows(OrderSide::Buy) && buy.is_none() {
            return false;
        }
        if ctx.quoting_side.allows(OrderSide::Sell) && sell.is_none() {
            return false;
        }

        // Continuous re-listing on every tick would be wasteful; only
        // a drift past the relist interval invalidates a resting quote.
        if let Some(buy) = buy {
            let desired = Self::ladder_price(ctx, -1);
            match buy.price {
                Some(price) if !Self::price_diff_exceeds(price, desired, relist_pct) => {}
                _ => return false,
            }
        }
        if let Some(sell) = sell {
            let desired = Self::ladder_price(ctx, 1);
            match sell.price {
                Some(price) if !Self::price_diff_exceeds(price, desired, relist_pct) => {}
                _ => return false,
            }
        }
        true
    }
}

impl Strategy for OrderMakerStrategy {
    fn build_target_orders(&self, ctx: &QuoteContext) -> Vec<Order> {
        if ctx.position.is_flat() {
            Self::entry_ladder(ctx)
        } else {
            Self::exit_pair(ctx)
        }
    }

    fn validate(&self, live: &[LiveOrder], ctx: &QuoteContext) -> bool {
        // Count check comes first; any mismatch fails immediately.
        let expected = if ctx.position.is_flat() {
            ctx.quoting_side.expected_order_count()
        } else {
            MAX_ORDERS_OPEN_POSITION
        };
        if live.len() != expected {
            debug!(
                live = live.len(),
                expected, "Live order count mismatch, replacing"
            );
            return false;
        }

        if ctx.position.is_flat() {
            self.validate_flat(live, ctx)
        } else {
            self.validate_open_position(live, ctx)
        }
    }
}
