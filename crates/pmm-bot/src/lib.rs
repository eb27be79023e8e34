//! Perp market-making robot process shell.
//!
//! Wires the subsystems together:
//! - Streaming session feeding the shared market state
//! - Risk engine deriving the quoting parameters
//! - Quoting engine converging live orders to the strategy's target
//! - Trade client executing order mutations
//! - Operator notifications and structured logging

pub mod app;
pub mod config;
pub mod error;
pub mod notify;
pub mod telemetry;

pub use app::Application;
pub use config::AppConfig;
pub use error::{AppError, AppResult};
pub use notify::{LogNotifier, Notifier};
