//! Heartbeat Monitor
//!
//! Watches the dedicated heartbeat channel. Both sides beat at a fixed
//! cadence; the monitor counts consecutive intervals in which no backend
//! beat arrived. Three misses degrade the connection, and the configured
//! maximum declares the backend down.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::health::ConnectionHealth;
use crate::infrastructure::config::ConnectionSettings;
use crate::infrastructure::metrics;

/// Consecutive misses before the connection is reported degraded.
const DEGRADED_AFTER_MISSES: u32 = 3;

/// Configuration for heartbeat behavior.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Beat cadence, for both sending and expecting beats.
    pub interval: Duration,
    /// Consecutive misses before the backend is declared down.
    pub max_missed: u32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_missed: 10,
        }
    }
}

impl From<&ConnectionSettings> for HeartbeatConfig {
    fn from(settings: &ConnectionSettings) -> Self {
        Self {
            interval: settings.heartbeat_interval,
            max_missed: settings.max_missed_heartbeats,
        }
    }
}

/// Events emitted by the heartbeat monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// Time to send our own beat.
    SendBeat,
    /// Three consecutive intervals elapsed without a backend beat.
    Degraded {
        /// Current consecutive miss count.
        missed: u32,
    },
    /// The miss limit was reached; treat the backend as down.
    BackendDown {
        /// Consecutive misses at the moment of declaration.
        missed: u32,
    },
    /// Beats resumed after the connection was degraded or down.
    Recovered,
}

/// Miss-counting heartbeat monitor.
///
/// Owns its counters; backend beats arrive as notifications on a channel
/// from the heartbeat channel reader. Beat arrival times and the current
/// miss count are mirrored onto the health board for operators.
pub struct HeartbeatMonitor {
    config: HeartbeatConfig,
    beats: mpsc::Receiver<()>,
    events: mpsc::Sender<HeartbeatEvent>,
    health: Arc<ConnectionHealth>,
    cancel: CancellationToken,
}

impl HeartbeatMonitor {
    /// Create a monitor.
    #[must_use]
    pub const fn new(
        config: HeartbeatConfig,
        beats: mpsc::Receiver<()>,
        events: mpsc::Sender<HeartbeatEvent>,
        health: Arc<ConnectionHealth>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            beats,
            events,
            health,
            cancel,
        }
    }

    /// Run until cancelled.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let mut last_beat = Instant::now();
        let mut missed: u32 = 0;
        let mut impaired = false;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                received = self.beats.recv() => {
                    if received.is_none() {
                        break;
                    }
                    last_beat = Instant::now();
                    missed = 0;
                    self.health.record_heartbeat();
                    if impaired {
                        impaired = false;
                        tracing::info!("Backend heartbeat recovered");
                        let _ = self.events.send(HeartbeatEvent::Recovered).await;
                    }
                }
                _ = ticker.tick() => {
                    let _ = self.events.send(HeartbeatEvent::SendBeat).await;

                    if last_beat.elapsed() <= self.config.interval {
                        continue;
                    }
                    missed += 1;
                    metrics::incr_missed_heartbeats();
                    self.health.record_missed_heartbeat(missed);
                    tracing::debug!(missed, "Missed backend heartbeat");

                    if missed == DEGRADED_AFTER_MISSES {
                        impaired = true;
                        tracing::warn!(missed, "Backend heartbeat degraded");
                        let _ = self.events.send(HeartbeatEvent::Degraded { missed }).await;
                    }
                    if missed == self.config.max_missed {
                        impaired = true;
                        tracing::error!(missed, "Backend heartbeat lost; declaring backend down");
                        let _ = self.events.send(HeartbeatEvent::BackendDown { missed }).await;
                    }
                }
            }
        }
    }
}
