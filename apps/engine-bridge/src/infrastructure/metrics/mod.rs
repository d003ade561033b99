//! Prometheus Metrics Module
//!
//! Exposes bridge metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Feed**: Ticks validated, gaps, duplicates, overruns, snapshots
//! - **Fan-out**: Deliveries to sessions and dropped sessions
//! - **Commands**: Pending commands, timeouts, late responses
//! - **Orders**: Events applied, out-of-order reports, reconciliation
//! - **Connections**: Per-channel connection state and reconnects

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if the recorder cannot be installed.
#[allow(clippy::expect_used)]
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Feed counters
    describe_counter!(
        "engine_bridge_sequence_gaps_total",
        "Sequence gaps detected on the market-data channel"
    );
    describe_counter!(
        "engine_bridge_duplicate_ticks_total",
        "Duplicate ticks dropped by the sequencer"
    );
    describe_counter!(
        "engine_bridge_feed_overruns_total",
        "Ticks dropped because the pipeline fell behind the feed"
    );
    describe_counter!(
        "engine_bridge_snapshots_applied_total",
        "Snapshots applied to close a resynchronization cycle"
    );

    // Fan-out
    describe_counter!(
        "engine_bridge_ticks_fanned_out_total",
        "Tick and snapshot deliveries to subscribed sessions"
    );
    describe_counter!(
        "engine_bridge_sessions_dropped_total",
        "Sessions dropped from topics after a failed delivery"
    );
    describe_gauge!(
        "engine_bridge_active_topics",
        "Topics with at least one subscriber"
    );
    describe_gauge!(
        "engine_bridge_active_sessions",
        "Sessions holding at least one subscription"
    );

    // Commands
    describe_gauge!(
        "engine_bridge_pending_commands",
        "Commands awaiting a backend response"
    );
    describe_counter!(
        "engine_bridge_command_timeouts_total",
        "Commands whose outcome became indeterminate"
    );
    describe_counter!(
        "engine_bridge_late_responses_total",
        "Responses that arrived after the command deadline"
    );

    // Orders
    describe_counter!(
        "engine_bridge_order_events_applied_total",
        "Order lifecycle transitions applied"
    );
    describe_counter!(
        "engine_bridge_out_of_order_events_total",
        "Order events rejected for demanding an illegal transition"
    );
    describe_counter!(
        "engine_bridge_orders_reconciled_total",
        "Orders moved by a synthesized reconciliation transition"
    );
    describe_counter!(
        "engine_bridge_amnesia_expirations_total",
        "Orders expired because the backend no longer knew them"
    );

    // Connections
    describe_gauge!(
        "engine_bridge_channel_connected",
        "Per-channel connection state (1 connected, 0 otherwise)"
    );
    describe_counter!(
        "engine_bridge_reconnects_total",
        "Reconnection attempts per channel"
    );
    describe_counter!(
        "engine_bridge_missed_heartbeats_total",
        "Heartbeat intervals that elapsed without a backend beat"
    );
    describe_counter!(
        "engine_bridge_protocol_violations_total",
        "Frames that failed to decode, per channel"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a detected sequence gap.
pub fn incr_sequence_gaps() {
    counter!("engine_bridge_sequence_gaps_total").increment(1);
}

/// Record a duplicate tick dropped by the sequencer.
pub fn incr_duplicate_ticks() {
    counter!("engine_bridge_duplicate_ticks_total").increment(1);
}

/// Record ticks lost to a feed overrun.
pub fn incr_feed_overruns(dropped: u64) {
    counter!("engine_bridge_feed_overruns_total").increment(dropped);
}

/// Record an applied snapshot.
pub fn incr_snapshots_applied() {
    counter!("engine_bridge_snapshots_applied_total").increment(1);
}

/// Record deliveries to subscribed sessions.
pub fn incr_ticks_fanned_out(delivered: usize) {
    counter!("engine_bridge_ticks_fanned_out_total").increment(delivered as u64);
}

/// Record a session dropped after a failed delivery.
pub fn incr_sessions_dropped() {
    counter!("engine_bridge_sessions_dropped_total").increment(1);
}

/// Update subscription totals.
#[allow(clippy::cast_precision_loss)]
pub fn set_subscription_stats(topics: usize, sessions: usize) {
    gauge!("engine_bridge_active_topics").set(topics as f64);
    gauge!("engine_bridge_active_sessions").set(sessions as f64);
}

/// Update the pending-command gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_pending_commands(count: usize) {
    gauge!("engine_bridge_pending_commands").set(count as f64);
}

/// Record a command whose outcome became indeterminate.
pub fn incr_command_timeouts() {
    counter!("engine_bridge_command_timeouts_total").increment(1);
}

/// Record a response that arrived after its command timed out.
pub fn incr_late_responses() {
    counter!("engine_bridge_late_responses_total").increment(1);
}

/// Record an applied order transition.
pub fn incr_order_events_applied() {
    counter!("engine_bridge_order_events_applied_total").increment(1);
}

/// Record an out-of-order event report.
pub fn incr_out_of_order_events() {
    counter!("engine_bridge_out_of_order_events_total").increment(1);
}

/// Record a synthesized reconciliation transition.
pub fn incr_orders_reconciled() {
    counter!("engine_bridge_orders_reconciled_total").increment(1);
}

/// Record an amnesia expiration.
pub fn incr_amnesia_expirations() {
    counter!("engine_bridge_amnesia_expirations_total").increment(1);
}

/// Update the connection gauge for a channel.
pub fn set_channel_connected(channel: &'static str, connected: bool) {
    gauge!("engine_bridge_channel_connected", "channel" => channel)
        .set(if connected { 1.0 } else { 0.0 });
}

/// Record a reconnection attempt for a channel.
pub fn incr_reconnects(channel: &'static str) {
    counter!("engine_bridge_reconnects_total", "channel" => channel).increment(1);
}

/// Record a missed heartbeat interval.
pub fn incr_missed_heartbeats() {
    counter!("engine_bridge_missed_heartbeats_total").increment(1);
}

/// Record an undecodable frame on a channel.
pub fn incr_protocol_violations(channel: &'static str) {
    counter!("engine_bridge_protocol_violations_total", "channel" => channel).increment(1);
}
