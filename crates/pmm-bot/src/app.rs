//! Main application orchestration.
//!
//! Owns the top-level scheduling loop: the streaming session writes the
//! shared market state on its own tasks, while this loop periodically
//! refreshes the risk parameters and runs one quoting cycle. Fatal
//! faults surface to the caller, which maps them to the restart exit
//! status.

use crate::config::{AppConfig, PinnedSnapshotStore};
use crate::error::{AppError, AppResult};
use crate::notify::{LogNotifier, Notifier};
use pmm_exec::TradeClient;
use pmm_quote::{OrderMakerStrategy, QuoteParams, QuotingEngine};
use pmm_risk::{DynamicSettings, RiskEngine, RiskInputs, SnapshotStore, StaticRiskStore};
use pmm_session::{MarketState, SessionEvent, SessionManager};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// How long to wait for the first full market snapshot after connect.
const MARKET_DATA_DEADLINE: Duration = Duration::from_secs(30);

/// What the scheduling loop decided to do next.
enum LoopStep {
    Quote,
    Event(Option<SessionEvent>),
    Shutdown,
}

/// Main application.
pub struct Application {
    config: AppConfig,
    client: Arc<TradeClient>,
    sessions: SessionManager,
    events: tokio::sync::mpsc::Receiver<SessionEvent>,
    market: Arc<MarketState>,
    risk: RiskEngine,
    quoter: QuotingEngine<OrderMakerStrategy>,
    snapshots: Arc<PinnedSnapshotStore>,
    notifier: Arc<dyn Notifier>,
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application").finish_non_exhaustive()
    }
}

impl Application {
    pub fn new(config: AppConfig) -> AppResult<Self> {
        let api_secret = config.api_secret()?;

        let client = Arc::new(TradeClient::new(config.executor_config(&api_secret)?)?);

        let (sessions, events) =
            SessionManager::new(vec![config.connection_config(&api_secret)]);
        let market = sessions.market();

        let risk_store = Arc::new(StaticRiskStore::new(
            config.risk.bands.clone(),
            config.risk.profiles.clone(),
        ));
        let snapshots = Arc::new(PinnedSnapshotStore::new(&config.volatility));
        let risk = RiskEngine::new(
            config.dynamic_config(),
            &config.exchange,
            &config.symbol,
            risk_store,
            snapshots.clone(),
            config.risk.bootstrap_min_position,
            config.risk.bootstrap_max_position,
        );

        let quoter = QuotingEngine::new(OrderMakerStrategy::new(), client.clone(), market.clone());

        Ok(Self {
            config,
            client,
            sessions,
            events,
            market,
            risk,
            quoter,
            snapshots,
            notifier: Arc::new(LogNotifier),
        })
    }

    /// Replace the log-backed notifier with another transport.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Run until shutdown or a fatal fault.
    pub async fn run(mut self) -> AppResult<()> {
        info!(symbol = %self.config.symbol, live = self.config.live, "Starting application");

        self.sessions.spawn();
        self.sessions.wait_until_connected(0).await?;
        self.wait_for_market_data().await?;

        let inputs = self
            .risk_inputs()
            .ok_or_else(|| AppError::SessionTerminated("market data lost".to_string()))?;
        self.risk.initialize(&inputs)?;

        self.notifier
            .notify(&format!("Market maker started for {}", self.config.symbol))
            .await;

        let mut interval = tokio::time::interval(self.config.loop_interval());
        let result = loop {
            let step = tokio::select! {
                _ = interval.tick() => LoopStep::Quote,
                event = self.events.recv() => LoopStep::Event(event),
                _ = tokio::signal::ctrl_c() => LoopStep::Shutdown,
            };
            match step {
                LoopStep::Quote => {
                    if let Err(err) = self.tick().await {
                        if err.requires_restart() {
                            break Err(err);
                        }
                        warn!(%err, "Quoting cycle failed");
                    }
                }
                LoopStep::Event(Some(SessionEvent::Disconnected { connection })) => {
                    warn!(connection, "Stream disconnected, reconnect pending");
                    self.notifier.notify("Market data stream disconnected").await;
                }
                LoopStep::Event(Some(SessionEvent::Stopped { connection })) => {
                    break Err(AppError::SessionTerminated(format!(
                        "connection {connection} exhausted its reconnect attempts"
                    )));
                }
                LoopStep::Event(Some(SessionEvent::Fatal { reason })) => {
                    break Err(AppError::SessionTerminated(reason));
                }
                LoopStep::Event(Some(SessionEvent::Done)) | LoopStep::Event(None) => {
                    break Ok(());
                }
                LoopStep::Shutdown => {
                    info!("Shutdown signal received");
                    break Ok(());
                }
            }
        };

        self.shutdown().await;

        if let Err(ref err) = result {
            error!(%err, "Terminating on fatal fault");
            self.notifier
                .notify(&format!("Market maker terminating: {err}"))
                .await;
        }
        result
    }

    /// One pass of the scheduling loop: refresh risk parameters from the
    /// latest market state and converge live orders.
    async fn tick(&mut self) -> AppResult<()> {
        if self.sessions.is_any_disconnected() {
            debug!("Stream degraded, skipping quoting cycle");
            return Ok(());
        }
        let Some(inputs) = self.risk_inputs() else {
            debug!("Market data incomplete, skipping quoting cycle");
            return Ok(());
        };

        self.risk.update_parameters(&inputs, false)?;
        let Some(settings) = self.risk.settings() else {
            return Ok(());
        };

        let atr_pct_5m = self
            .snapshots
            .latest(&self.config.exchange, &self.config.symbol)
            .map(|s| s.atr_pct_5m)
            .unwrap_or(Decimal::ZERO);
        let params = quote_params(&self.config, settings, atr_pct_5m);

        match self.quoter.run_cycle(&self.config.symbol, &params).await {
            Ok(replaced) => {
                if replaced {
                    info!(symbol = %self.config.symbol, "Live orders replaced");
                }
                Ok(())
            }
            Err(err) if err.skips_cycle() => {
                debug!(%err, "Skipping quoting cycle");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Latest ticker, margin, and position from the stream cache, once
    /// all three have arrived.
    fn risk_inputs(&self) -> Option<RiskInputs> {
        let ticker = self.market.ticker(&self.config.symbol)?;
        let margin = self.market.margin()?;
        let position = self.market.position(&self.config.symbol);
        Some(RiskInputs {
            ticker,
            margin,
            position,
        })
    }

    /// Poll until the stream has delivered ticker and margin data.
    async fn wait_for_market_data(&self) -> AppResult<()> {
        let mut poll = tokio::time::interval(Duration::from_millis(100));
        let wait = async {
            loop {
                if self.risk_inputs().is_some() {
                    return;
                }
                poll.tick().await;
            }
        };
        tokio::time::timeout(MARKET_DATA_DEADLINE, wait)
            .await
            .map_err(|_| {
                AppError::SessionTerminated(
                    "market data did not arrive before the deadline".to_string(),
                )
            })
    }

    /// Close the session and withdraw every resting robot order.
    async fn shutdown(&mut self) {
        self.sessions.shutdown().await;
        if let Err(err) = self.client.cancel_all_robot_orders().await {
            warn!(%err, "Failed to cancel robot orders during shutdown");
        }
        self.notifier
            .notify(&format!("Market maker stopped for {}", self.config.symbol))
            .await;
    }
}

/// Quoting parameters for one cycle, assembled from configuration and
/// the active risk settings.
fn quote_params(config: &AppConfig, settings: &DynamicSettings, atr_pct_5m: Decimal) -> QuoteParams {
    QuoteParams {
        quoting_side: config.quoting_side,
        live_mode: config.live,
        atr_pct_5m,
        min_position: settings.min_position,
        max_position: settings.max_position,
    }
}
