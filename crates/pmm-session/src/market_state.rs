//! Shared market state written by the streaming session.
//!
//! The session task is the only writer; the risk and quoting engines
//! read concurrently. Mutation discipline is last-writer-wins per field;
//! the exchange is the source of truth and staleness is bounded by feed
//! latency, not by locking.

use crate::message::{InstrumentRow, MarginRow, OrderRow, PositionRow, TableAction, TableMessage};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use pmm_core::{
    ExecInstructions, Instrument, InstrumentState, Margin, OrderSide, OrderType, Position, Price,
    Size, Ticker,
};
use serde_json::Value;
use std::str::FromStr;
use tracing::{debug, warn};

/// Live order as reported over the order stream.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveOrder {
    pub order_id: String,
    pub cl_ord_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Size,
    pub price: Option<Price>,
    pub stop_price: Option<Price>,
    pub order_type: OrderType,
    pub exec_insts: ExecInstructions,
}

/// Per-symbol state container.
#[derive(Debug, Default)]
struct SymbolEntry {
    instrument: Option<Instrument>,
    ticker: Option<Ticker>,
    position: Option<Position>,
    last_update: Option<DateTime<Utc>>,
}

/// Aggregated session state.
#[derive(Default)]
pub struct MarketState {
    symbols: DashMap<String, SymbolEntry>,
    margin: RwLock<Option<Margin>>,
    /// Order cache keyed by exchange order id. Exchange-owned truth; the
    /// cache is invalidated wholesale on table partials.
    orders: DashMap<String, LiveOrder>,
}

impl MarketState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route one table push into the per-field stores.
    pub fn apply(&self, msg: &TableMessage) {
        match msg.table.as_str() {
            "instrument" => self.apply_instrument(msg),
            "position" => self.apply_position(msg),
            "margin" => self.apply_margin(msg),
            "order" => self.apply_order(msg),
            other => debug!(table = other, "Ignoring unrouted table"),
        }
    }

    fn apply_instrument(&self, msg: &TableMessage) {
        for row in typed_rows::<InstrumentRow>(&msg.data, "instrument") {
            let mut entry = self.symbols.entry(row.symbol.clone()).or_default();

            if let Some(state_str) = &row.state {
                let state = parse_instrument_state(state_str);
                match (&entry.instrument, row.tick_size) {
                    (_, Some(tick)) => {
                        entry.instrument =
                            Some(Instrument::new(&row.symbol, Price::new(tick), state));
                    }
                    (Some(existing), None) => {
                        entry.instrument =
                            Some(Instrument::new(&row.symbol, existing.tick_size, state));
                    }
                    (None, None) => {}
                }
            } else if let (Some(existing), Some(tick)) = (&entry.instrument, row.tick_size) {
                let state = existing.state;
                entry.instrument = Some(Instrument::new(&row.symbol, Price::new(tick), state));
            }

            // Ticker fields ride on the instrument table; update only
            // the fields present, keeping the rest current.
            let prev = entry.ticker;
            let last = row.last_price.map(Price::new).or(prev.map(|t| t.last));
            let buy = row.bid_price.map(Price::new).or(prev.map(|t| t.buy));
            let sell = row.ask_price.map(Price::new).or(prev.map(|t| t.sell));
            let mid = match row.mid_price {
                Some(m) => Some(Price::new(m)),
                None => prev.and_then(|t| t.mid),
            };
            if let (Some(last), Some(buy), Some(sell)) = (last, buy, sell) {
                entry.ticker = Some(Ticker {
                    last,
                    buy,
                    sell,
                    mid,
                });
            }
            entry.last_update = Some(Utc::now());
        }
    }

    fn apply_position(&self, msg: &TableMessage) {
        for row in typed_rows::<PositionRow>(&msg.data, "position") {
            let mut entry = self.symbols.entry(row.symbol.clone()).or_default();
            let prev = entry.position.take().unwrap_or_else(|| Position::flat(&row.symbol));
            let quantity = row.current_qty.map(Size::new).unwrap_or(prev.quantity);
            let avg_entry_price = row
                .avg_entry_price
                .map(Price::new)
                .unwrap_or(prev.avg_entry_price);
            entry.position = Some(Position {
                symbol: row.symbol.clone(),
                quantity,
                avg_entry_price,
            });
            entry.last_update = Some(Utc::now());
        }
    }

    fn apply_margin(&self, msg: &TableMessage) {
        for row in typed_rows::<MarginRow>(&msg.data, "margin") {
            if let Some(balance) = row.wallet_balance {
                *self.margin.write() = Some(Margin {
                    wallet_balance: balance,
                });
            }
        }
    }

    fn apply_order(&self, msg: &TableMessage) {
        if msg.action == TableAction::Partial {
            // Partial is the authoritative full image; drop the cache.
            self.orders.clear();
        }
        for row in typed_rows::<OrderRow>(&msg.data, "order") {
            match msg.action {
                TableAction::Delete => {
                    self.orders.remove(&row.order_id);
                }
                _ if row.is_terminal() => {
                    self.orders.remove(&row.order_id);
                }
                TableAction::Partial | TableAction::Insert => {
                    if let Some(order) = live_order_from_row(&row) {
                        self.orders.insert(row.order_id.clone(), order);
                    }
                }
                TableAction::Update => {
                    if let Some(mut existing) =
                        self.orders.get_mut(&row.order_id).map(|o| o.clone())
                    {
                        merge_order_update(&mut existing, &row);
                        self.orders.insert(row.order_id.clone(), existing);
                    } else if let Some(order) = live_order_from_row(&row) {
                        self.orders.insert(row.order_id.clone(), order);
                    }
                }
            }
        }
    }

    pub fn instrument(&self, symbol: &str) -> Option<Instrument> {
        self.symbols.get(symbol)?.instrument.clone()
    }

    pub fn ticker(&self, symbol: &str) -> Option<Ticker> {
        self.symbols.get(symbol)?.ticker
    }

    /// Position for the symbol; absent rows mean flat.
    pub fn position(&self, symbol: &str) -> Position {
        self.symbols
            .get(symbol)
            .and_then(|e| e.position.clone())
            .unwrap_or_else(|| Position::flat(symbol))
    }

    pub fn margin(&self) -> Option<Margin> {
        *self.margin.read()
    }

    /// Live orders for a symbol whose clOrdID starts with the given
    /// prefix.
    pub fn open_robot_orders(&self, symbol: &str, prefix: &str) -> Vec<LiveOrder> {
        self.orders
            .iter()
            .filter(|o| o.symbol == symbol && o.cl_ord_id.starts_with(prefix))
            .map(|o| o.clone())
            .collect()
    }
}

fn typed_rows<'a, T: serde::de::DeserializeOwned + 'a>(
    data: &'a [Value],
    table: &'static str,
) -> impl Iterator<Item = T> + 'a {
    data.iter().filter_map(move |row| {
        match serde_json::from_value::<T>(row.clone()) {
            Ok(parsed) => Some(parsed),
            Err(err) => {
                warn!(table, %err, "Dropping malformed stream row");
                None
            }
        }
    })
}

fn parse_instrument_state(s: &str) -> InstrumentState {
    match s {
        "Open" => InstrumentState::Open,
        "Closed" => InstrumentState::Closed,
        _ => InstrumentState::Unlisted,
    }
}

fn live_order_from_row(row: &OrderRow) -> Option<LiveOrder> {
    let side = OrderSide::from_str(row.side.as_deref()?).ok()?;
    let order_type = match row.ord_type.as_deref() {
        Some("Stop") | Some("StopLimit") => OrderType::Stop,
        _ => OrderType::Limit,
    };
    Some(LiveOrder {
        order_id: row.order_id.clone(),
        cl_ord_id: row.cl_ord_id.clone().unwrap_or_default(),
        symbol: row.symbol.clone()?,
        side,
        quantity: Size::new(row.order_qty?),
        price: row.price.map(Price::new),
        stop_price: row.stop_px.map(Price::new),
        order_type,
        exec_insts: row
            .exec_inst
            .as_deref()
            .map(ExecInstructions::from_wire)
            .unwrap_or_default(),
    })
}

fn merge_order_update(order: &mut LiveOrder, row: &OrderRow) {
    if let Some(qty) = row.order_qty {
        order.quantity = Size::new(qty);
    }
    if let Some(price) = row.price {
        order.price = Some(Price::new(price));
    }
    if let Some(stop) = row.stop_px {
        order.stop_price = Some(Price::new(stop));
    }
}
