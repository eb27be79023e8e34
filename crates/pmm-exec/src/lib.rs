//! Trade-API request executor.
//!
//! The only path that mutates exchange-side order state. Provides:
//! - Authenticated request signing (HMAC-SHA256 over verb+path+expiry+body)
//! - A fault-aware retry/backoff state machine per call
//! - Duplicate-clOrdID idempotency recovery
//! - Rate-limit handling with a defensive cancel of all robot orders
//! - A typed bulk order API with client-side prefix filtering

pub mod api;
pub mod client;
pub mod error;
pub mod signature;

pub use api::ExchangeOrder;
pub use client::{ApiCall, ExecutorConfig, TradeClient};
pub use error::{ExecError, ExecResult};
