//! Domain layer: core bridge types with no transport dependencies.

/// Market-data topics, ticks, snapshots, and sequence validation.
pub mod market_data;

/// Order lifecycle states, events, and records.
pub mod order;

/// Topic subscription tracking.
pub mod subscription;
