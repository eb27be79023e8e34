//! Market and account snapshot types.
//!
//! These are the values the streaming session keeps current and the
//! risk/quoting engines read. An absent mid price is a distinct,
//! checkable condition (empty order book), not zero.

use crate::decimal::{Price, Size};
use crate::order::OrderSide;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Instrument lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstrumentState {
    Open,
    Closed,
    Unlisted,
}

impl InstrumentState {
    /// Closed instruments still fill resting orders; only unlisted ones
    /// are dead for quoting purposes.
    pub fn is_fillable(&self) -> bool {
        matches!(self, Self::Open | Self::Closed)
    }
}

impl fmt::Display for InstrumentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "Open"),
            Self::Closed => write!(f, "Closed"),
            Self::Unlisted => write!(f, "Unlisted"),
        }
    }
}

/// Instrument metadata, immutable per snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    pub symbol: String,
    pub tick_size: Price,
    /// log10 of the tick size, i.e. number of decimal places.
    pub tick_log: u32,
    pub state: InstrumentState,
}

impl Instrument {
    pub fn new(symbol: impl Into<String>, tick_size: Price, state: InstrumentState) -> Self {
        let tick_log = tick_size.inner().normalize().scale();
        Self {
            symbol: symbol.into(),
            tick_size,
            tick_log,
            state,
        }
    }
}

/// Ticker for a symbol.
///
/// `mid` is None when the order book is empty.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub last: Price,
    pub buy: Price,
    pub sell: Price,
    pub mid: Option<Price>,
}

impl Ticker {
    /// Whether the book has a usable midpoint.
    pub fn has_mid(&self) -> bool {
        self.mid.is_some()
    }
}

/// Open position for a symbol.
///
/// Quantity is signed: positive long, negative short, zero flat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub quantity: Size,
    pub avg_entry_price: Price,
}

impl Position {
    pub fn flat(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            quantity: Size::ZERO,
            avg_entry_price: Price::ZERO,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.quantity.is_zero()
    }

    pub fn is_long(&self) -> bool {
        self.quantity.is_positive()
    }

    pub fn is_short(&self) -> bool {
        self.quantity.is_negative()
    }

    /// The side an order must take to flatten this position.
    pub fn exit_side(&self) -> Option<OrderSide> {
        if self.is_long() {
            Some(OrderSide::Sell)
        } else if self.is_short() {
            Some(OrderSide::Buy)
        } else {
            None
        }
    }
}

/// Account margin summary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Margin {
    pub wallet_balance: Decimal,
}

/// Derived volatility measure for a symbol, retrieved from an external
/// store. Read-only input to the risk and quoting engines.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolatilitySnapshot {
    /// Average-true-range percentage over a 1-minute horizon.
    pub atr_pct_1m: Decimal,
    /// Average-true-range percentage over a 5-minute horizon.
    pub atr_pct_5m: Decimal,
    /// When the snapshot was taken.
    pub taken_at: DateTime<Utc>,
}

impl VolatilitySnapshot {
    pub fn new(atr_pct_1m: Decimal, atr_pct_5m: Decimal) -> Self {
        Self {
            atr_pct_1m,
            atr_pct_5m,
            taken_at: Utc::now(),
        }
    }

    /// ATR is usable only when strictly positive; no data yet shows up
    /// as zero or negative.
    pub fn has_atr_1m(&self) -> bool {
        self.atr_pct_1m > Decimal::ZERO
    }

    pub fn has_atr_5m(&self) -> bool {
        self.atr_pct_5m > Decimal::ZERO
    }
}

/// Which sides the robot is allowed to quote when flat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotingSide {
    #[default]
    Both,
    Buy,
    Sell,
}

impl QuotingSide {
    pub fn allows(&self, side: OrderSide) -> bool {
        match self {
            Self::Both => true,
            Self::Buy => side == OrderSide::Buy,
            Self::Sell => side == OrderSide::Sell,
        }
    }

    /// Number of entry orders expected when the position is flat.
    pub fn expected_order_count(&self) -> usize {
        match self {
            Self::Both => 2,
            Self::Buy | Self::Sell => 1,
        }
    }
}
