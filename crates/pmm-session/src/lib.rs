//! Streaming session layer.
//!
//! Maintains long-lived websocket connections delivering ticker,
//! instrument, position, margin, and order updates, and exposes the
//! latest values through [`MarketState`]. Disconnects are survived
//! transparently: a fixed-interval reconnect loop with a capped attempt
//! counter, reset on success, runs per connection until shutdown.

pub mod connection;
pub mod error;
pub mod manager;
pub mod market_state;
pub mod message;

pub use connection::{Connection, ConnectionConfig, ConnectionState};
pub use error::{SessionError, SessionResult};
pub use manager::{SessionEvent, SessionManager};
pub use market_state::{LiveOrder, MarketState};

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Install the process-wide TLS crypto provider. Must run before the
/// first connection is opened.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
