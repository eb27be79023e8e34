//! Convergence driver: pre-flight, validate, replace-all.

use crate::error::{QuoteError, QuoteResult};
use crate::strategy::{QuoteContext, Strategy};
use dashmap::DashMap;
use pmm_core::QuotingSide;
use pmm_exec::TradeClient;
use pmm_session::MarketState;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Per-cycle quoting inputs the caller assembles from the risk engine.
#[derive(Debug, Clone)]
pub struct QuoteParams {
    pub quoting_side: QuotingSide,
    pub live_mode: bool,
    pub atr_pct_5m: Decimal,
    pub min_position: Decimal,
    pub max_position: Decimal,
}

/// Reconciles live robot orders to the strategy's target list.
pub struct QuotingEngine<S: Strategy> {
    strategy: S,
    client: Arc<TradeClient>,
    market: Arc<MarketState>,
    /// One in-flight reconciliation per symbol; two concurrent passes
    /// would issue conflicting create/cancel pairs.
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl<S: Strategy> QuotingEngine<S> {
    pub fn new(strategy: S, client: Arc<TradeClient>, market: Arc<MarketState>) -> Self {
        Self {
            strategy,
            client,
            market,
            locks: DashMap::new(),
        }
    }

    fn symbol_lock(&self, symbol: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(symbol.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// One quoting cycle for a symbol: pre-flight, build the target,
    /// validate the live set, and replace it wholesale when it does not
    /// match. Returns whether orders were replaced.
    pub async fn run_cycle(&self, symbol: &str, params: &QuoteParams) -> QuoteResult<bool> {
        let lock = self.symbol_lock(symbol);
        let _guard = lock.lock().await;

        let ctx = self.build_context(symbol, params)?;
        self.sanity_check(&ctx);

        let live = self
            .market
            .open_robot_orders(symbol, self.client.order_id_prefix().as_str());

        if self.strategy.validate(&live, &ctx) {
            debug!(symbol, live = live.len(), "Live orders match target");
            return Ok(false);
        }

        let target = self.strategy.build_target_orders(&ctx);

        // All-or-nothing replace: a partial patch could leave a state
        // matching neither the old nor the new target.
        let to_cancel: Vec<String> = live.iter().map(|o| o.order_id.clone()).collect();
        if !to_cancel.is_empty() {
            self.client.cancel_orders(&to_cancel).await?;
        }
        let created = self.client.create_bulk_orders(&target).await?;
        info!(
            symbol,
            cancelled = to_cancel.len(),
            created = created.len(),
            "Converged orders"
        );
        Ok(true)
    }

    /// Pre-flight: an empty book or a non-fillable instrument skips the
    /// cycle.
    fn build_context(&self, symbol: &str, params: &QuoteParams) -> QuoteResult<QuoteContext> {
        let instrument = self
            .market
            .instrument(symbol)
            .ok_or(QuoteError::MissingData {
                symbol: symbol.to_string(),
                what: "instrument",
            })?;
        let ticker = self.market.ticker(symbol).ok_or(QuoteError::MissingData {
            symbol: symbol.to_string(),
            what: "ticker",
        })?;

        if !ticker.has_mid() {
            return Err(QuoteError::MarketEmpty(symbol.to_string()));
        }
        if !instrument.state.is_fillable() {
            return Err(QuoteError::MarketClosed {
                symbol: symbol.to_string(),
                state: instrument.state.to_string(),
            });
        }

        Ok(QuoteContext {
            instrument,
            ticker,
            position: self.market.position(symbol),
            atr_pct_5m: params.atr_pct_5m,
            quoting_side: params.quoting_side,
            live_mode: params.live_mode,
            min_position: params.min_position,
            max_position: params.max_position,
        })
    }

    /// Position-limit advisories. Logged, never suppressing orders.
    fn sanity_check(&self, ctx: &QuoteContext) {
        let qty = ctx.position.quantity.inner();
        if qty >= ctx.max_position {
            debug!(
                current = %qty,
                maximum = %ctx.max_position,
                "Long delta limit exceeded"
            );
        }
        if qty <= ctx.min_position {
            debug!(
                current = %qty,
                minimum = %ctx.min_position,
                "Short delta limit exceeded"
            );
        }
    }
}
