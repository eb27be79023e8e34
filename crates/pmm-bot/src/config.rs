//! Application configuration.
//!
//! Loaded from a TOML file; the API secret is never stored in the file
//! and comes from an environment variable instead.

use crate::error::{AppError, AppResult};
use pmm_core::{OrderIdPrefix, QuotingSide, VolatilitySnapshot};
use pmm_exec::ExecutorConfig;
use pmm_risk::{DynamicConfig, MarginModel, RiskBand, RiskProfile, SnapshotStore};
use pmm_session::ConnectionConfig;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Exchange name used for snapshot lookups and logging.
    #[serde(default = "default_exchange")]
    pub exchange: String,
    /// Symbol this robot quotes.
    pub symbol: String,
    /// REST base URL including the API path prefix.
    pub base_url: String,
    /// Streaming endpoint URL.
    pub ws_url: String,
    /// API key identifying the account.
    pub api_key: String,
    /// Environment variable holding the API secret.
    #[serde(default = "default_api_secret_env")]
    pub api_secret_env: String,
    /// clOrdID prefix scoping which live orders belong to this robot.
    #[serde(default = "default_order_id_prefix")]
    pub order_id_prefix: String,
    /// Apply post-only to every created order.
    #[serde(default)]
    pub post_only: bool,
    /// Which sides to quote when flat.
    #[serde(default)]
    pub quoting_side: QuotingSide,
    /// Live sizing instead of the simulated entry size.
    #[serde(default)]
    pub live: bool,
    /// Quoting loop interval (seconds).
    #[serde(default = "default_loop_interval_secs")]
    pub loop_interval_secs: u64,
    /// Request executor tuning.
    #[serde(default)]
    pub executor: ExecutorTuning,
    /// Streaming session tuning.
    #[serde(default)]
    pub session: SessionTuning,
    /// Risk model, band table, and profile table.
    pub risk: RiskSection,
    /// Pinned volatility inputs until a snapshot feed exists.
    #[serde(default)]
    pub volatility: VolatilitySection,
}

fn default_exchange() -> String {
    "bitmex".to_string()
}

fn default_api_secret_env() -> String {
    "PMM_API_SECRET".to_string()
}

fn default_order_id_prefix() -> String {
    "mm_robot_".to_string()
}

fn default_loop_interval_secs() -> u64 {
    5
}

/// Request executor tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorTuning {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Retry budget for idempotent calls.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay between generic retries (seconds).
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    /// Delay after HTTP 503 (seconds).
    #[serde(default = "default_service_unavailable_delay_secs")]
    pub service_unavailable_delay_secs: u64,
    /// Delay after a connection fault (seconds).
    #[serde(default = "default_connection_fault_delay_secs")]
    pub connection_fault_delay_secs: u64,
}

fn default_timeout_secs() -> u64 {
    7
}

fn default_max_retries() -> u32 {
    24
}

fn default_retry_delay_secs() -> u64 {
    300
}

fn default_service_unavailable_delay_secs() -> u64 {
    3
}

fn default_connection_fault_delay_secs() -> u64 {
    1
}

impl Default for ExecutorTuning {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay_secs(),
            service_unavailable_delay_secs: default_service_unavailable_delay_secs(),
            connection_fault_delay_secs: default_connection_fault_delay_secs(),
        }
    }
}

/// Streaming session tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTuning {
    /// Fixed delay between reconnect attempts (seconds).
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
    /// Consecutive failed attempts tolerated before giving up.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
}

fn default_reconnect_delay_secs() -> u64 {
    5
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

impl Default for SessionTuning {
    fn default() -> Self {
        Self {
            reconnect_delay_secs: default_reconnect_delay_secs(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
        }
    }
}

/// Risk model and tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskSection {
    pub margin_model: MarginModel,
    /// Wallet fraction committed to position margin (inverse model).
    pub position_margin_pct: Decimal,
    /// Wallet fraction committed to order margin (inverse model).
    pub order_margin_pct: Decimal,
    /// Fallback interval when no ATR data is available.
    pub static_interval_pct: Decimal,
    /// Global multiplier applied on top of the profile's ATR factor.
    #[serde(default = "default_interval_adjust_mult")]
    pub interval_adjust_mult: Decimal,
    /// Position bounds used for deposit usage before the first compute.
    #[serde(default)]
    pub bootstrap_min_position: Decimal,
    #[serde(default)]
    pub bootstrap_max_position: Decimal,
    /// Band table; a gap is fatal at runtime.
    pub bands: Vec<RiskBand>,
    /// Profile table; every band must name a profile in it.
    pub profiles: Vec<RiskProfile>,
}

fn default_interval_adjust_mult() -> Decimal {
    Decimal::ONE
}

/// Volatility inputs pinned in configuration. Stands in for a market
/// snapshot feed; zero ATR falls back to the static interval.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VolatilitySection {
    #[serde(default)]
    pub atr_pct_1m: Decimal,
    #[serde(default)]
    pub atr_pct_5m: Decimal,
}

/// [`SnapshotStore`] backed by the pinned volatility section.
#[derive(Debug, Clone)]
pub struct PinnedSnapshotStore {
    snapshot: VolatilitySnapshot,
}

impl PinnedSnapshotStore {
    pub fn new(section: &VolatilitySection) -> Self {
        Self {
            snapshot: VolatilitySnapshot::new(section.atr_pct_1m, section.atr_pct_5m),
        }
    }
}

impl SnapshotStore for PinnedSnapshotStore {
    fn latest(&self, _exchange: &str, _symbol: &str) -> Option<VolatilitySnapshot> {
        Some(self.snapshot)
    }
}

impl AppConfig {
    /// Load from a TOML file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;
        toml::from_str(&content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))
    }

    /// Resolve the API secret from the configured environment variable.
    pub fn api_secret(&self) -> AppResult<String> {
        std::env::var(&self.api_secret_env).map_err(|_| {
            AppError::Config(format!(
                "API secret environment variable {} is not set",
                self.api_secret_env
            ))
        })
    }

    /// Build the request executor configuration.
    pub fn executor_config(&self, api_secret: &str) -> AppResult<ExecutorConfig> {
        let prefix = OrderIdPrefix::new(&self.order_id_prefix)?;
        let mut cfg = ExecutorConfig::new(&self.base_url, &self.api_key, api_secret, prefix);
        cfg.post_only = self.post_only;
        cfg.timeout = Duration::from_secs(self.executor.timeout_secs);
        cfg.max_retries = self.executor.max_retries;
        cfg.retry_delay = Duration::from_secs(self.executor.retry_delay_secs);
        cfg.service_unavailable_delay =
            Duration::from_secs(self.executor.service_unavailable_delay_secs);
        cfg.connection_fault_delay =
            Duration::from_secs(self.executor.connection_fault_delay_secs);
        Ok(cfg)
    }

    /// Build the streaming connection configuration.
    pub fn connection_config(&self, api_secret: &str) -> ConnectionConfig {
        ConnectionConfig {
            url: self.ws_url.clone(),
            symbols: vec![self.symbol.clone()],
            api_key: Some(self.api_key.clone()),
            api_secret: Some(api_secret.to_string()),
            reconnect_delay: Duration::from_secs(self.session.reconnect_delay_secs),
            max_reconnect_attempts: self.session.max_reconnect_attempts,
        }
    }

    /// Build the dynamic-settings configuration.
    pub fn dynamic_config(&self) -> DynamicConfig {
        DynamicConfig {
            margin_model: self.risk.margin_model,
            position_margin_pct: self.risk.position_margin_pct,
            order_margin_pct: self.risk.order_margin_pct,
            static_interval_pct: self.risk.static_interval_pct,
            interval_adjust_mult: self.risk.interval_adjust_mult,
        }
    }

    pub fn loop_interval(&self) -> Duration {
        Duration::from_secs(self.loop_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const FULL_CONFIG: &str = r#"
        symbol = "XBTUSD"
        base_url = "https://testnet.example.com/api/v1/"
        ws_url = "wss://testnet.example.com/realtime"
        api_key = "key"
        quoting_side = "buy"

        [risk]
        margin_model = "inverse"
        position_margin_pct = "0.1"
        order_margin_pct = "0.2"
        static_interval_pct = "0.004"

        [[risk.bands]]
        distance_start = "0"
        distance_end = "100"
        usage_start = "0"
        usage_end = "100"
        profile_id = "calm"

        [[risk.profiles]]
        id = "calm"
        risk_level = 1
        interval_atr_mult = "0.5"
        max_number_dca_orders = 10
        order_pairs = 1
    "#;

    #[test]
    fn test_full_config_parses() {
        let config: AppConfig = toml::from_str(FULL_CONFIG).unwrap();
        assert_eq!(config.symbol, "XBTUSD");
        assert_eq!(config.quoting_side, QuotingSide::Buy);
        assert_eq!(config.risk.bands.len(), 1);
        assert_eq!(config.risk.profiles[0].max_number_dca_orders, 10);
        assert_eq!(config.risk.position_margin_pct, dec!(0.1));
        // Defaults fill everything not present.
        assert_eq!(config.exchange, "bitmex");
        assert_eq!(config.order_id_prefix, "mm_robot_");
        assert_eq!(config.loop_interval_secs, 5);
        assert_eq!(config.executor.max_retries, 24);
        assert_eq!(config.session.max_reconnect_attempts, 5);
        assert!(!config.live);
        assert!(!config.post_only);
    }

    #[test]
    fn test_executor_config_mapping() {
        let config: AppConfig = toml::from_str(FULL_CONFIG).unwrap();
        let exec = config.executor_config("secret").unwrap();
        assert_eq!(exec.base_url, "https://testnet.example.com/api/v1/");
        assert_eq!(exec.timeout, Duration::from_secs(7));
        assert_eq!(exec.max_retries, 24);
        assert_eq!(exec.order_id_prefix.as_str(), "mm_robot_");
    }

    #[test]
    fn test_connection_config_carries_credentials() {
        let config: AppConfig = toml::from_str(FULL_CONFIG).unwrap();
        let conn = config.connection_config("secret");
        assert_eq!(conn.symbols, vec!["XBTUSD".to_string()]);
        assert_eq!(conn.api_key.as_deref(), Some("key"));
        assert_eq!(conn.reconnect_delay, Duration::from_secs(5));
    }

    #[test]
    fn test_pinned_snapshot_store() {
        let store = PinnedSnapshotStore::new(&VolatilitySection {
            atr_pct_1m: dec!(0.001),
            atr_pct_5m: dec!(0.002),
        });
        let snap = store.latest("bitmex", "XBTUSD").unwrap();
        assert_eq!(snap.atr_pct_1m, dec!(0.001));
        assert_eq!(snap.atr_pct_5m, dec!(0.002));
    }

    #[test]
    fn test_missing_risk_section_fails() {
        let result: Result<AppConfig, _> = toml::from_str(
            r#"
            symbol = "XBTUSD"
            base_url = "u"
            ws_url = "w"
            api_key = "k"
            "#,
        );
        assert!(result.is_err());
    }
}
