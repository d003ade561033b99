//! Connection Health Board
//!
//! Tracks the state of each backend channel plus the overall backend
//! liveness derived from the heartbeat monitor. Read by the send gate and
//! by operators; written by the channel tasks and the heartbeat handler.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::infrastructure::metrics;

/// Health of one channel or of the backend as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    /// Connected and exchanging frames.
    Connected,
    /// Heartbeats are being missed; the connection may be failing.
    Degraded,
    /// Not connected.
    Disconnected,
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Connected => "connected",
            Self::Degraded => "degraded",
            Self::Disconnected => "disconnected",
        })
    }
}

/// Backend channel identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// Command request/reply channel.
    Command,
    /// Market data publish/subscribe channel.
    MarketData,
    /// Heartbeat channel.
    Heartbeat,
}

impl Channel {
    /// Stable label for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Command => "command",
            Self::MarketData => "market_data",
            Self::Heartbeat => "heartbeat",
        }
    }
}

#[derive(Debug)]
struct HealthInner {
    command: HealthState,
    market_data: HealthState,
    heartbeat: HealthState,
    backend: HealthState,
    last_heartbeat_at: Option<DateTime<Utc>>,
    consecutive_missed: u32,
    reconnects: u64,
}

/// Point-in-time view of the health board, for operators and stats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthSnapshot {
    /// Command channel state.
    pub command: HealthState,
    /// Market data channel state.
    pub market_data: HealthState,
    /// Heartbeat channel state.
    pub heartbeat: HealthState,
    /// Overall backend liveness.
    pub backend: HealthState,
    /// When the last backend heartbeat arrived, if any has.
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    /// Consecutive heartbeat intervals with no backend beat.
    pub consecutive_missed_heartbeats: u32,
    /// Connection drops that entered the reconnect path, across channels.
    pub reconnects: u64,
}

/// Shared health board.
#[derive(Debug)]
pub struct ConnectionHealth {
    inner: RwLock<HealthInner>,
}

impl Default for ConnectionHealth {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionHealth {
    /// All channels start disconnected.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HealthInner {
                command: HealthState::Disconnected,
                market_data: HealthState::Disconnected,
                heartbeat: HealthState::Disconnected,
                backend: HealthState::Disconnected,
                last_heartbeat_at: None,
                consecutive_missed: 0,
                reconnects: 0,
            }),
        }
    }

    /// Record a channel state change.
    ///
    /// A drop from `Connected` to `Disconnected` counts as one reconnect
    /// cycle, since the channel client immediately enters its backoff
    /// loop.
    pub fn set_channel(&self, channel: Channel, state: HealthState) {
        {
            let mut inner = self.inner.write();
            let slot = match channel {
                Channel::Command => &mut inner.command,
                Channel::MarketData => &mut inner.market_data,
                Channel::Heartbeat => &mut inner.heartbeat,
            };
            let was_connected = *slot == HealthState::Connected;
            *slot = state;
            if was_connected && state == HealthState::Disconnected {
                inner.reconnects += 1;
            }
        }
        metrics::set_channel_connected(channel.as_str(), state == HealthState::Connected);
        tracing::info!(channel = channel.as_str(), %state, "Channel health changed");
    }

    /// Record overall backend liveness as seen by the heartbeat monitor.
    pub fn set_backend(&self, state: HealthState) {
        self.inner.write().backend = state;
        metrics::set_channel_connected("backend", state == HealthState::Connected);
    }

    /// Record a backend heartbeat, resetting the miss count.
    pub fn record_heartbeat(&self) {
        let mut inner = self.inner.write();
        inner.last_heartbeat_at = Some(Utc::now());
        inner.consecutive_missed = 0;
    }

    /// Record the current consecutive-miss count from the heartbeat
    /// monitor.
    pub fn record_missed_heartbeat(&self, missed: u32) {
        self.inner.write().consecutive_missed = missed;
    }

    /// Current state of one channel.
    #[must_use]
    pub fn channel(&self, channel: Channel) -> HealthState {
        let inner = self.inner.read();
        match channel {
            Channel::Command => inner.command,
            Channel::MarketData => inner.market_data,
            Channel::Heartbeat => inner.heartbeat,
        }
    }

    /// Overall backend liveness.
    ///
    /// Disconnected if the heartbeat monitor declared the backend down or
    /// any channel is disconnected; degraded if anything is degraded.
    #[must_use]
    pub fn backend(&self) -> HealthState {
        Self::worst_of(&self.inner.read())
    }

    /// Snapshot the whole board.
    #[must_use]
    pub fn snapshot(&self) -> HealthSnapshot {
        let inner = self.inner.read();
        HealthSnapshot {
            command: inner.command,
            market_data: inner.market_data,
            heartbeat: inner.heartbeat,
            backend: Self::worst_of(&inner),
            last_heartbeat_at: inner.last_heartbeat_at,
            consecutive_missed_heartbeats: inner.consecutive_missed,
            reconnects: inner.reconnects,
        }
    }

    fn worst_of(inner: &HealthInner) -> HealthState {
        let states = [
            inner.backend,
            inner.command,
            inner.market_data,
            inner.heartbeat,
        ];
        if states.contains(&HealthState::Disconnected) {
            HealthState::Disconnected
        } else if states.contains(&HealthState::Degraded) {
            HealthState::Degraded
        } else {
            HealthState::Connected
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_connected() -> ConnectionHealth {
        let health = ConnectionHealth::new();
        health.set_channel(Channel::Command, HealthState::Connected);
        health.set_channel(Channel::MarketData, HealthState::Connected);
        health.set_channel(Channel::Heartbeat, HealthState::Connected);
        health.set_backend(HealthState::Connected);
        health
    }

    #[test]
    fn starts_disconnected() {
        let health = ConnectionHealth::new();
        assert_eq!(health.backend(), HealthState::Disconnected);
    }

    #[test]
    fn worst_channel_state_wins() {
        let health = all_connected();
        assert_eq!(health.backend(), HealthState::Connected);

        health.set_backend(HealthState::Degraded);
        assert_eq!(health.backend(), HealthState::Degraded);

        health.set_channel(Channel::Command, HealthState::Disconnected);
        assert_eq!(health.backend(), HealthState::Disconnected);
    }

    #[test]
    fn snapshot_carries_heartbeat_liveness() {
        let health = all_connected();
        let before = health.snapshot();
        assert_eq!(before.last_heartbeat_at, None);
        assert_eq!(before.consecutive_missed_heartbeats, 0);

        health.record_missed_heartbeat(2);
        assert_eq!(health.snapshot().consecutive_missed_heartbeats, 2);

        health.record_heartbeat();
        let after = health.snapshot();
        assert!(after.last_heartbeat_at.is_some());
        assert_eq!(after.consecutive_missed_heartbeats, 0);
        assert_eq!(after.backend, HealthState::Connected);
    }

    #[test]
    fn connection_drops_count_reconnect_cycles() {
        let health = all_connected();
        assert_eq!(health.snapshot().reconnects, 0);

        health.set_channel(Channel::MarketData, HealthState::Disconnected);
        health.set_channel(Channel::MarketData, HealthState::Connected);
        health.set_channel(Channel::MarketData, HealthState::Disconnected);
        assert_eq!(health.snapshot().reconnects, 2);

        // Repeated disconnect reports for an already-down channel do not
        // inflate the count.
        health.set_channel(Channel::MarketData, HealthState::Disconnected);
        assert_eq!(health.snapshot().reconnects, 2);
    }
}
