//! Risk engine: band-driven profile resolution and dynamic parameter
//! computation.
//!
//! Maps (distance to average entry price, deposit usage) onto a
//! configured risk profile, and derives the quoting parameters
//! (interval, spread, position bounds, ladder sizing) from the wallet
//! balance, last price, and realized volatility. Parameters are only
//! recomputed when the resolved profile changes, to avoid order churn
//! from noise in the inputs.

pub mod dynamic;
pub mod engine;
pub mod error;
pub mod profile;
pub mod store;

pub use dynamic::{DynamicConfig, DynamicSettings, MarginModel};
pub use engine::{RiskEngine, RiskInputs};
pub use error::{RiskError, RiskResult};
pub use profile::{resolve_profile, RiskBand, RiskProfile};
pub use store::{RiskStore, SnapshotStore, StaticRiskStore};
