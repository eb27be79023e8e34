//! Quoting engine: target order construction and convergence.
//!
//! Translates position, dynamic parameters, and the ticker into a
//! target order list, then reconciles the exchange's live robot orders
//! to it. Reconciliation is all-or-nothing: when the live set fails
//! validation, every robot order is cancelled and the full target list
//! is created, never a partial patch.

pub mod engine;
pub mod error;
pub mod strategy;

pub use engine::{QuoteParams, QuotingEngine};
pub use error::{QuoteError, QuoteResult};
pub use strategy::{OrderMakerStrategy, QuoteContext, Strategy};
