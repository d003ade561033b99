//! Backend Channel Client
//!
//! One WebSocket connection loop, shared by all three backend channels.
//! The client forwards outbound text frames from a channel-specific queue,
//! surfaces inbound text frames and connection transitions as events, and
//! reconnects with exponential backoff when the socket drops.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::infrastructure::metrics;

// =============================================================================
// Error Type
// =============================================================================

/// Errors terminating a channel client.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Server closed the connection.
    #[error("connection closed")]
    ConnectionClosed,

    /// Maximum reconnection attempts exceeded.
    #[error("maximum reconnection attempts exceeded")]
    MaxReconnectAttemptsExceeded,
}

// =============================================================================
// Events
// =============================================================================

/// Events surfaced to the channel's owner.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// The connection is up.
    Connected,
    /// The connection dropped; a reconnect attempt follows.
    Disconnected,
    /// One inbound text frame, not yet decoded.
    Frame(String),
}

// =============================================================================
// Client
// =============================================================================

/// Configuration for one channel client.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Stable channel label for logs and metrics.
    pub name: &'static str,
    /// WebSocket URL.
    pub url: String,
    /// Reconnection policy configuration.
    pub reconnect: ReconnectConfig,
}

/// WebSocket client for one backend channel.
pub struct ChannelClient {
    config: ChannelConfig,
    outbound: mpsc::Receiver<String>,
    events: mpsc::Sender<ChannelEvent>,
    cancel: CancellationToken,
}

impl ChannelClient {
    /// Create a client.
    #[must_use]
    pub const fn new(
        config: ChannelConfig,
        outbound: mpsc::Receiver<String>,
        events: mpsc::Sender<ChannelEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            outbound,
            events,
            cancel,
        }
    }

    /// Run the connection loop until cancelled or attempts are exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::MaxReconnectAttemptsExceeded`] when the
    /// reconnect policy gives up.
    pub async fn run(mut self) -> Result<(), ChannelError> {
        let mut policy = ReconnectPolicy::new(self.config.reconnect.clone());

        loop {
            if self.cancel.is_cancelled() {
                tracing::info!(channel = self.config.name, "Channel client cancelled");
                return Ok(());
            }

            match self.connect_and_run(&mut policy).await {
                Ok(()) => return Ok(()),
                Err(error) => {
                    tracing::warn!(channel = self.config.name, %error, "Channel connection error");
                    let _ = self.events.send(ChannelEvent::Disconnected).await;

                    let Some(delay) = policy.next_delay() else {
                        return Err(ChannelError::MaxReconnectAttemptsExceeded);
                    };
                    metrics::incr_reconnects(self.config.name);
                    tracing::info!(
                        channel = self.config.name,
                        attempt = policy.attempt_count(),
                        delay_ms = delay.as_millis(),
                        "Reconnecting channel"
                    );

                    tokio::select! {
                        () = self.cancel.cancelled() => return Ok(()),
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn connect_and_run(&mut self, policy: &mut ReconnectPolicy) -> Result<(), ChannelError> {
        tracing::info!(channel = self.config.name, url = %self.config.url, "Connecting channel");
        let (stream, _response) = tokio_tungstenite::connect_async(&self.config.url).await?;
        let (mut write, mut read) = stream.split();

        policy.reset();
        let _ = self.events.send(ChannelEvent::Connected).await;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                frame = self.outbound.recv() => {
                    match frame {
                        Some(text) => write.send(Message::Text(text.into())).await?,
                        None => return Ok(()),
                    }
                }
                message = read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            let _ = self
                                .events
                                .send(ChannelEvent::Frame(text.to_string()))
                                .await;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(_))) => {
                            tracing::info!(channel = self.config.name, "Server sent close frame");
                            return Err(ChannelError::ConnectionClosed);
                        }
                        Some(Ok(_)) => {}
                        Some(Err(error)) => return Err(error.into()),
                        None => return Err(ChannelError::ConnectionClosed),
                    }
                }
            }
        }
    }
}
