//! Session manager: owns the streaming connections and the shared
//! market state.

use crate::connection::{Connection, ConnectionConfig, ConnectionState};
use crate::error::{SessionError, SessionResult};
use crate::market_state::MarketState;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Lifecycle notification emitted on the bounded event channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A connection dropped and will attempt to reconnect.
    Disconnected { connection: usize },
    /// A connection gave up after exhausting its reconnect attempts.
    Stopped { connection: usize },
    /// All connections are shut down; no further events follow.
    Done,
    /// A load-bearing fault that demands a process restart.
    Fatal { reason: String },
}

/// Owns the streaming connections; writes [`MarketState`], which the
/// risk and quoting engines read.
pub struct SessionManager {
    connections: Vec<Arc<Connection>>,
    market: Arc<MarketState>,
    events_tx: mpsc::Sender<SessionEvent>,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl SessionManager {
    /// Create a manager with one connection per config entry. Returns
    /// the manager and the receiving end of the event channel.
    pub fn new(configs: Vec<ConnectionConfig>) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (events_tx, events_rx) = mpsc::channel(64);
        let market = Arc::new(MarketState::new());
        let shutdown = CancellationToken::new();
        let connections = configs
            .into_iter()
            .enumerate()
            .map(|(id, cfg)| {
                Arc::new(Connection::new(
                    id,
                    cfg,
                    market.clone(),
                    events_tx.clone(),
                    shutdown.child_token(),
                ))
            })
            .collect();
        (
            Self {
                connections,
                market,
                events_tx,
                shutdown,
                tasks: Vec::new(),
            },
            events_rx,
        )
    }

    pub fn market(&self) -> Arc<MarketState> {
        self.market.clone()
    }

    /// Spawn each connection's read loop on its own task so one
    /// connection's fault cannot block another's.
    pub fn spawn(&mut self) {
        for conn in &self.connections {
            let conn = conn.clone();
            let events = self.events_tx.clone();
            self.tasks.push(tokio::spawn(async move {
                if let Err(err) = conn.run().await {
                    error!(connection = conn.id, %err, "Session loop terminated with fault");
                    let _ = events
                        .send(SessionEvent::Fatal {
                            reason: err.to_string(),
                        })
                        .await;
                }
            }));
        }
        info!(connections = self.connections.len(), "Session tasks spawned");
    }

    /// Block until the given connection is streaming, or shutdown is
    /// requested.
    pub async fn wait_until_connected(&self, connection: usize) -> SessionResult<()> {
        let conn = self
            .connections
            .get(connection)
            .ok_or(SessionError::EventChannelClosed)?;
        let mut poll = tokio::time::interval(Duration::from_millis(50));
        loop {
            if matches!(
                conn.state(),
                ConnectionState::Connected
                    | ConnectionState::Authenticated
                    | ConnectionState::Streaming
            ) {
                return Ok(());
            }
            if conn.state() == ConnectionState::Stopped || self.shutdown.is_cancelled() {
                return Err(SessionError::ReconnectExhausted { attempts: 0 });
            }
            poll.tick().await;
        }
    }

    /// First connection that completed the auth handshake, if any.
    pub fn authenticated_connection(&self) -> Option<&Arc<Connection>> {
        self.connections.iter().find(|c| c.is_authenticated())
    }

    /// Degraded-status check for operators and pre-quote sanity.
    pub fn is_any_disconnected(&self) -> bool {
        self.connections.iter().any(|c| c.is_disconnected())
    }

    /// Flip the retry-suppression flag, close all sockets, and emit the
    /// terminal `Done` event. No reconnect starts after this; in-flight
    /// connect attempts have their results discarded.
    pub async fn shutdown(&mut self) {
        info!("Session shutdown requested");
        self.shutdown.cancel();
        for task in self.tasks.drain(..) {
            if let Err(err) = task.await {
                warn!(%err, "Session task panicked during shutdown");
            }
        }
        let _ = self.events_tx.send(SessionEvent::Done).await;
    }
}
