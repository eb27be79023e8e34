//! One streaming connection: connect, authenticate, subscribe, stream.
//!
//! Lifecycle per connection:
//! `Disconnected -> Connecting -> Connected -> [Authenticated] ->
//! Streaming -> Disconnected (on fault) -> Reconnecting -> ...`,
//! terminating in `Stopped` only on explicit shutdown or an exhausted
//! attempt cap.

use crate::error::{SessionError, SessionResult};
use crate::manager::SessionEvent;
use crate::market_state::MarketState;
use crate::message::{StreamMessage, StreamRequest};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use pmm_exec::signature;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// WebSocket URL.
    pub url: String,
    /// Symbols whose market channels this connection carries.
    pub symbols: Vec<String>,
    /// Credentials for account-scoped channels. None skips the auth
    /// handshake and the private subscriptions.
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    /// Fixed delay between reconnect attempts.
    pub reconnect_delay: Duration,
    /// Consecutive failed attempts tolerated before giving up.
    pub max_reconnect_attempts: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            symbols: Vec::new(),
            api_key: None,
            api_secret: None,
            reconnect_delay: Duration::from_secs(5),
            max_reconnect_attempts: 5,
        }
    }
}

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Authenticated,
    Streaming,
    Stopped,
}

/// A single managed streaming connection.
pub struct Connection {
    pub(crate) id: usize,
    config: ConnectionConfig,
    state: Arc<RwLock<ConnectionState>>,
    authenticated: AtomicBool,
    market: Arc<MarketState>,
    events: mpsc::Sender<SessionEvent>,
    shutdown: CancellationToken,
}

impl Connection {
    pub fn new(
        id: usize,
        config: ConnectionConfig,
        market: Arc<MarketState>,
        events: mpsc::Sender<SessionEvent>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            id,
            config,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            authenticated: AtomicBool::new(false),
            market,
            events,
            shutdown,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Whether the auth handshake completed on the current connection.
    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::Acquire) && !self.is_disconnected()
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(
            self.state(),
            ConnectionState::Disconnected | ConnectionState::Stopped
        )
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
    }

    async fn emit(&self, event: SessionEvent) {
        if self.events.send(event).await.is_err() {
            warn!(connection = self.id, "Session event receiver dropped");
        }
    }

    /// Run the connect/stream/reconnect loop until shutdown or the
    /// attempt cap. The suppression flag is checked before every retry
    /// decision; no reconnect starts after shutdown is requested.
    pub async fn run(&self) -> SessionResult<()> {
        let mut attempt = 0u32;

        loop {
            if self.shutdown.is_cancelled() {
                info!(connection = self.id, "Shutdown requested, exiting session loop");
                self.set_state(ConnectionState::Stopped);
                return Ok(());
            }

            self.set_state(ConnectionState::Connecting);

            match self.stream_once().await {
                Ok(()) => {
                    // Clean close only happens on shutdown.
                    self.set_state(ConnectionState::Stopped);
                    return Ok(());
                }
                Err(err) if err.requires_restart() => {
                    error!(connection = self.id, %err, "Fatal fault in streaming loop");
                    self.set_state(ConnectionState::Stopped);
                    return Err(err);
                }
                Err(err) => {
                    // A connection that made it past the handshake resets
                    // the attempt counter; only consecutive failures count.
                    if self.state() != ConnectionState::Connecting {
                        attempt = 0;
                    }
                    warn!(connection = self.id, %err, "Streaming connection lost");
                }
            }

            self.set_state(ConnectionState::Disconnected);
            self.emit(SessionEvent::Disconnected { connection: self.id })
                .await;

            if self.shutdown.is_cancelled() {
                info!(connection = self.id, "Shutdown requested after disconnect");
                self.set_state(ConnectionState::Stopped);
                return Ok(());
            }

            attempt += 1;
            if attempt > self.config.max_reconnect_attempts {
                error!(
                    connection = self.id,
                    attempts = attempt - 1,
                    "Reconnect attempts exhausted"
                );
                self.set_state(ConnectionState::Stopped);
                self.emit(SessionEvent::Stopped { connection: self.id })
                    .await;
                return Err(SessionError::ReconnectExhausted {
                    attempts: attempt - 1,
                });
            }

            warn!(
                connection = self.id,
                attempt,
                delay_s = self.config.reconnect_delay.as_secs(),
                "Reconnecting"
            );
            tokio::select! {
                () = tokio::time::sleep(self.config.reconnect_delay) => {}
                () = self.shutdown.cancelled() => {
                    info!(connection = self.id, "Shutdown requested during backoff");
                    self.set_state(ConnectionState::Stopped);
                    return Ok(());
                }
            }
        }
    }

    /// One connect-to-disconnect cycle. Returns Ok only on shutdown.
    async fn stream_once(&self) -> SessionResult<()> {
        info!(connection = self.id, url = %self.config.url, "Connecting to stream");
        let (ws, _response) = connect_async(&self.config.url).await?;
        let (mut write, mut read) = ws.split();

        self.authenticated.store(false, Ordering::Release);
        self.set_state(ConnectionState::Connected);
        info!(connection = self.id, "Stream connected");

        if let (Some(key), Some(secret)) = (&self.config.api_key, &self.config.api_secret) {
            let expires = Utc::now().timestamp() + 10;
            let sig = signature::sign_ws_auth(secret, expires);
            let auth = StreamRequest::auth(key, expires, &sig);
            write
                .send(Message::Text(serde_json::to_string(&auth)?))
                .await?;
            debug!(connection = self.id, "Auth handshake sent");
        }

        let channels = self.subscription_channels();
        let sub = StreamRequest::subscribe(&channels);
        write
            .send(Message::Text(serde_json::to_string(&sub)?))
            .await?;
        info!(connection = self.id, count = channels.len(), "Subscriptions sent");

        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => {
                    info!(connection = self.id, "Shutdown signal in stream loop");
                    if let Err(err) = write.send(Message::Close(None)).await {
                        warn!(connection = self.id, %err, "Failed to send close frame");
                    }
                    return Ok(());
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_frame(&text)?;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason) = frame
                                .map(|f| (f.code.into(), f.reason.to_string()))
                                .unwrap_or((1000, "Normal close".to_string()));
                            warn!(connection = self.id, code, %reason, "Stream closed by server");
                            return Err(SessionError::ConnectionClosed { code, reason });
                        }
                        Some(Err(err)) => {
                            error!(connection = self.id, %err, "Stream read error");
                            return Err(err.into());
                        }
                        None => {
                            warn!(connection = self.id, "Stream ended");
                            return Err(SessionError::ConnectionClosed {
                                code: 1006,
                                reason: "Stream ended".to_string(),
                            });
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    fn handle_frame(&self, text: &str) -> SessionResult<()> {
        match StreamMessage::parse(text)? {
            StreamMessage::Welcome => {}
            StreamMessage::AuthAck { success: true } => {
                info!(connection = self.id, "Stream authenticated");
                self.authenticated.store(true, Ordering::Release);
                self.set_state(ConnectionState::Authenticated);
            }
            StreamMessage::AuthAck { success: false } => {
                return Err(SessionError::AuthRejected(
                    "exchange rejected authKeyExpires".to_string(),
                ));
            }
            StreamMessage::SubscribeAck { channel, success } => {
                if success {
                    debug!(connection = self.id, %channel, "Subscription acknowledged");
                    self.set_state(ConnectionState::Streaming);
                } else {
                    warn!(connection = self.id, %channel, "Subscription rejected");
                }
            }
            StreamMessage::Error(text) => {
                // Auth errors arrive on the error channel, not as a
                // failed ack.
                if text.to_lowercase().contains("signature") {
                    return Err(SessionError::AuthRejected(text));
                }
                warn!(connection = self.id, error = %text, "Stream operation error");
            }
            StreamMessage::Table(table) => {
                self.market.apply(&table);
            }
        }
        Ok(())
    }

    /// Channel list: per-symbol market data, plus account channels when
    /// credentials are configured.
    fn subscription_channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self
            .config
            .symbols
            .iter()
            .map(|s| format!("instrument:{s}"))
            .collect();
        if self.config.api_key.is_some() {
            channels.push("position".to_string());
            channels.push("margin".to_string());
            channels.push("order".to_string());
        }
        channels
    }
}
