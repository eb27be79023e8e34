//! Core domain types for the perp market-making robot.
//!
//! This crate provides the fundamental types used throughout the system:
//! - `Price`, `Size`: precision-safe numeric types with tick rounding
//! - `Order`, `OrderSide`, `OrderType`, `ExecInstructions`: order model
//! - `ClientOrderId`, `OrderIdPrefix`: robot order ownership
//! - `Instrument`, `Ticker`, `Position`, `Margin`: market/account snapshot
//! - `VolatilitySnapshot`: ATR-derived volatility input
//! - `QuotingSide`: per-side quoting policy

pub mod decimal;
pub mod error;
pub mod market;
pub mod order;

pub use decimal::{Price, Size};
pub use error::{CoreError, Result};
pub use market::{
    Instrument, InstrumentState, Margin, Position, QuotingSide, Ticker, VolatilitySnapshot,
};
pub use order::{ClientOrderId, ExecInstructions, Order, OrderIdPrefix, OrderSide, OrderType};
