//! Per-Topic Sequence Validation
//!
//! Validates the strictly increasing per-topic sequence numbers carried by
//! inbound ticks, detects gaps and duplicates, and manages the buffering
//! needed during a snapshot resynchronization cycle.
//!
//! # Contract
//!
//! - A tick at or below the last-seen sequence is a duplicate and is
//!   dropped silently (the backend delivers at-least-once).
//! - A tick more than one ahead of last-seen opens a gap: delivery for the
//!   topic is suppressed and the caller must fetch a snapshot. Ticks that
//!   arrive while the gap is open are buffered.
//! - Applying the snapshot replays buffered ticks in sequence order,
//!   discarding any at or below the snapshot's own sequence.
//!
//! The sequencer is single-writer state: it is owned by the market-data
//! pipeline worker and never shared across tasks.

use std::collections::HashMap;

use super::{MarketDataTick, Topic, TopicSnapshot};

// =============================================================================
// Outcomes
// =============================================================================

/// Result of offering one tick to the sequencer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Accepted {
    /// Tick is next in sequence; release it to the router.
    Deliver(MarketDataTick),
    /// Tick was already seen; drop silently.
    Duplicate,
    /// Tick is ahead of the expected sequence. The tick is buffered and a
    /// snapshot resync must be requested for the topic.
    Gap {
        /// First missing sequence number.
        expected_from: u64,
        /// Last missing sequence number.
        expected_to: u64,
    },
    /// A resync is already in flight for the topic; tick buffered.
    Buffered,
}

/// Ordered replay produced by applying a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replay {
    /// The snapshot itself, delivered first.
    pub snapshot: TopicSnapshot,
    /// Buffered ticks above the snapshot sequence, consecutive and in order.
    pub ticks: Vec<MarketDataTick>,
    /// A gap that remains after the replay, if the buffer was not
    /// consecutive. The topic stays in resync and the caller must request
    /// another snapshot.
    pub residual_gap: Option<(u64, u64)>,
}

// =============================================================================
// Sequencer
// =============================================================================

#[derive(Debug, Default)]
struct TopicState {
    last_seen: u64,
    seen_any: bool,
    /// `Some` while a snapshot resync is in flight; holds buffered ticks.
    pending: Option<Vec<MarketDataTick>>,
}

/// Tracks per-topic sequence state for every topic observed on the
/// market-data channel.
#[derive(Debug, Default)]
pub struct Sequencer {
    topics: HashMap<Topic, TopicState>,
}

impl Sequencer {
    /// Create an empty sequencer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer one inbound tick for validation.
    pub fn accept(&mut self, tick: MarketDataTick) -> Accepted {
        let state = self.topics.entry(tick.topic.clone()).or_default();

        if let Some(buffer) = state.pending.as_mut() {
            if state.seen_any && tick.sequence <= state.last_seen {
                return Accepted::Duplicate;
            }
            buffer.push(tick);
            return Accepted::Buffered;
        }

        // First tick for a topic establishes the baseline: a bridge that
        // joins mid-stream must not resync the world.
        if !state.seen_any {
            state.seen_any = true;
            state.last_seen = tick.sequence;
            return Accepted::Deliver(tick);
        }

        if tick.sequence <= state.last_seen {
            return Accepted::Duplicate;
        }

        if tick.sequence == state.last_seen + 1 {
            state.last_seen = tick.sequence;
            return Accepted::Deliver(tick);
        }

        let expected_from = state.last_seen + 1;
        let expected_to = tick.sequence - 1;
        state.pending = Some(vec![tick]);
        Accepted::Gap {
            expected_from,
            expected_to,
        }
    }

    /// Apply a snapshot for a topic, closing its resync cycle.
    ///
    /// Buffered ticks are sorted, deduplicated, and replayed from the
    /// snapshot sequence upward. If a hole remains in the buffer the topic
    /// stays in resync and the replay reports the residual gap.
    pub fn apply_snapshot(&mut self, snapshot: TopicSnapshot) -> Replay {
        let state = self.topics.entry(snapshot.topic.clone()).or_default();

        let mut buffered = state.pending.take().unwrap_or_default();
        buffered.sort_by_key(|t| t.sequence);
        buffered.dedup_by_key(|t| t.sequence);
        buffered.retain(|t| t.sequence > snapshot.sequence);

        let mut ticks = Vec::with_capacity(buffered.len());
        let mut next = snapshot.sequence + 1;
        let mut residual_gap = None;
        let mut leftover = Vec::new();

        for tick in buffered {
            if residual_gap.is_none() && tick.sequence == next {
                next += 1;
                ticks.push(tick);
            } else {
                if residual_gap.is_none() {
                    residual_gap = Some((next, tick.sequence - 1));
                }
                leftover.push(tick);
            }
        }

        state.seen_any = true;
        state.last_seen = next - 1;
        if residual_gap.is_some() {
            // Stay in resync; keep the non-consecutive tail buffered.
            state.pending = Some(leftover);
        }

        Replay {
            snapshot,
            ticks,
            residual_gap,
        }
    }

    /// Whether a resync is currently in flight for the topic.
    #[must_use]
    pub fn is_resyncing(&self, topic: &Topic) -> bool {
        self.topics
            .get(topic)
            .is_some_and(|state| state.pending.is_some())
    }

    /// Last delivered sequence for a topic, if any tick has been seen.
    #[must_use]
    pub fn last_seen(&self, topic: &Topic) -> Option<u64> {
        self.topics
            .get(topic)
            .filter(|state| state.seen_any)
            .map(|state| state.last_seen)
    }

    /// Force every tracked topic into resync after a reconnect.
    ///
    /// Returns all topics now needing a snapshot request, including topics
    /// that were already mid-resync (their in-flight request may have been
    /// lost with the connection). Last-seen counters are kept so replays of
    /// already-delivered ticks still drop as duplicates.
    pub fn force_resync_all(&mut self) -> Vec<Topic> {
        let mut topics = Vec::new();
        for (topic, state) in &mut self.topics {
            if state.seen_any {
                state.pending.get_or_insert_with(Vec::new);
                topics.push(topic.clone());
            }
        }
        topics
    }

    /// Drop all state for a topic (last subscriber went away upstream).
    pub fn forget(&mut self, topic: &Topic) {
        self.topics.remove(topic);
    }

    /// Number of topics currently tracked.
    #[must_use]
    pub fn tracked_topics(&self) -> usize {
        self.topics.len()
    }
}
