//! Market Data Types
//!
//! Core domain types for market data: topics, ticks, and snapshots.
//! These types are codec-agnostic and represent the canonical internal
//! representation of a backend market-data update.
//!
//! A tick is immutable once constructed. Ownership moves from the
//! sequencer (validation) to the topic router (fan-out); nothing mutates
//! a tick after creation.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub mod sequencer;

pub use sequencer::{Accepted, Replay, Sequencer};

// =============================================================================
// Topic
// =============================================================================

/// Addressing key for market data: one instrument on one exchange.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Topic {
    /// Instrument symbol (e.g. `AAPL`).
    pub symbol: String,
    /// Exchange identifier (e.g. `XNAS`).
    pub exchange: String,
}

impl Topic {
    /// Create a new topic.
    #[must_use]
    pub fn new(symbol: impl Into<String>, exchange: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            exchange: exchange.into(),
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.symbol, self.exchange)
    }
}

// =============================================================================
// Tick
// =============================================================================

/// Side of the book a delta applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// Bid side.
    Bid,
    /// Ask side.
    Ask,
}

/// Price/size deltas carried by a tick or snapshot.
///
/// All fields are optional: the backend sends only what changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickFields {
    /// Price level the delta applies to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,
    /// New size at the level (zero removes the level).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<Decimal>,
    /// Book side of the delta.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub side: Option<Side>,
}

/// One market-data update for a topic at a point in sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketDataTick {
    /// Topic the tick belongs to.
    pub topic: Topic,
    /// Per-topic strictly increasing sequence number.
    pub sequence: u64,
    /// Price/size/side deltas.
    pub fields: TickFields,
    /// When the bridge received the tick.
    pub received_at: DateTime<Utc>,
}

impl MarketDataTick {
    /// Construct a tick stamped with the current receive time.
    #[must_use]
    pub fn new(topic: Topic, sequence: u64, fields: TickFields) -> Self {
        Self {
            topic,
            sequence,
            fields,
            received_at: Utc::now(),
        }
    }
}

// =============================================================================
// Snapshot
// =============================================================================

/// Full state for a topic, fetched during resynchronization.
///
/// Carries the sequence number the snapshot was taken at; buffered ticks
/// at or below it are superseded and must be discarded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicSnapshot {
    /// Topic the snapshot covers.
    pub topic: Topic,
    /// Sequence number the snapshot was taken at.
    pub sequence: u64,
    /// Full field state at that sequence.
    pub fields: TickFields,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_display() {
        let topic = Topic::new("AAPL", "XNAS");
        assert_eq!(topic.to_string(), "AAPL@XNAS");
    }

    #[test]
    fn topics_equal_by_value() {
        assert_eq!(Topic::new("AAPL", "XNAS"), Topic::new("AAPL", "XNAS"));
        assert_ne!(Topic::new("AAPL", "XNAS"), Topic::new("AAPL", "ARCX"));
    }

    #[test]
    fn tick_fields_roundtrip() {
        let fields = TickFields {
            price: Some(Decimal::new(15005, 2)),
            size: Some(Decimal::from(100)),
            side: Some(Side::Bid),
        };
        let json = serde_json::to_string(&fields).unwrap();
        let back: TickFields = serde_json::from_str(&json).unwrap();
        assert_eq!(fields, back);
    }

    #[test]
    fn tick_fields_omit_empty() {
        let json = serde_json::to_string(&TickFields::default()).unwrap();
        assert_eq!(json, "{}");
    }
}
