//! Command Correlator
//!
//! Matches outbound order commands to their eventual backend responses by
//! correlation id. A submit registers a pending entry and returns a handle
//! immediately; the handle resolves when a matching response frame arrives
//! or the per-command deadline fires.
//!
//! A late response for a timed-out command is advisory only: it is logged
//! and counted, never reapplied — the caller was already told the outcome
//! is indeterminate and must reconcile via a status query.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::application::ports::{CommandError, CommandResult};
use crate::domain::market_data::TopicSnapshot;
use crate::domain::order::OrderStatusReport;
use crate::infrastructure::metrics;

/// Advisory tombstones retained for timed-out commands.
const TOMBSTONE_CAPACITY: usize = 1024;

// =============================================================================
// Replies
// =============================================================================

/// A resolved backend reply, routed to the waiting command handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandReply {
    /// Order submit/cancel outcome.
    Result(CommandResult),
    /// Snapshot response for a resync request.
    Snapshot(TopicSnapshot),
    /// Bulk order status reports.
    StatusReports(Vec<OrderStatusReport>),
    /// The command failed locally (disconnect, caller cancel).
    Failed(CommandError),
}

// =============================================================================
// Correlator
// =============================================================================

#[derive(Debug, Default)]
struct PendingState {
    pending: HashMap<Uuid, oneshot::Sender<CommandReply>>,
    timed_out: HashMap<Uuid, Instant>,
}

/// Pending-command table keyed by correlation id.
///
/// Transport-agnostic: the wire adapter calls [`CommandCorrelator::resolve`]
/// for every inbound response frame; command issuers register entries and
/// await their handles.
#[derive(Debug, Default)]
pub struct CommandCorrelator {
    state: Mutex<PendingState>,
}

impl CommandCorrelator {
    /// Create an empty correlator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending entry for a correlation id.
    ///
    /// Returns a handle that the caller awaits. The call itself never
    /// blocks.
    ///
    /// # Errors
    ///
    /// Fails fast with [`CommandError::DuplicateCorrelation`] if the id is
    /// already pending; the backend is not contacted.
    pub fn register(
        self: &Arc<Self>,
        correlation_id: Uuid,
    ) -> Result<CommandHandle, CommandError> {
        let mut state = self.state.lock();
        if state.pending.contains_key(&correlation_id) {
            return Err(CommandError::DuplicateCorrelation(correlation_id));
        }

        let (tx, rx) = oneshot::channel();
        state.pending.insert(correlation_id, tx);
        metrics::set_pending_commands(state.pending.len());

        Ok(CommandHandle {
            correlation_id,
            rx,
            correlator: Arc::clone(self),
        })
    }

    /// Resolve a pending entry with a backend reply.
    ///
    /// Unmatched replies are advisory: a reply for a timed-out command is
    /// logged and dropped, and a reply for an unknown correlation id is
    /// logged at warn level.
    pub fn resolve(&self, correlation_id: Uuid, reply: CommandReply) {
        let mut state = self.state.lock();

        if let Some(tx) = state.pending.remove(&correlation_id) {
            metrics::set_pending_commands(state.pending.len());
            drop(state);
            // Receiver dropped means the caller went away; nothing to do.
            let _ = tx.send(reply);
            return;
        }

        if state.timed_out.remove(&correlation_id).is_some() {
            metrics::incr_late_responses();
            tracing::info!(
                correlation_id = %correlation_id,
                "Late response for timed-out command; advisory only"
            );
            return;
        }

        tracing::warn!(
            correlation_id = %correlation_id,
            "Response for unknown correlation id"
        );
    }

    /// Cancel a pending command on the caller's behalf.
    ///
    /// A race with an in-flight response is fine: whichever resolves the
    /// oneshot first wins, and order state is only ever decided by backend
    /// event sequence.
    pub fn cancel(&self, correlation_id: Uuid) {
        let tx = self.state.lock().pending.remove(&correlation_id);
        if let Some(tx) = tx {
            let _ = tx.send(CommandReply::Failed(CommandError::Cancelled(
                correlation_id,
            )));
        }
    }

    /// Fail every pending command, used when the backend disconnects.
    pub fn fail_all(&self, error: &CommandError) {
        let drained: Vec<_> = {
            let mut state = self.state.lock();
            let drained = state.pending.drain().collect();
            metrics::set_pending_commands(0);
            drained
        };
        let count = drained.len();
        for (_, tx) in drained {
            let _ = tx.send(CommandReply::Failed(error.clone()));
        }
        if count > 0 {
            tracing::warn!(count, error = %error, "Failed all pending commands");
        }
    }

    /// Number of commands currently awaiting resolution.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    fn mark_timed_out(&self, correlation_id: Uuid) {
        let mut state = self.state.lock();
        state.pending.remove(&correlation_id);
        metrics::set_pending_commands(state.pending.len());

        if state.timed_out.len() >= TOMBSTONE_CAPACITY {
            // Evict the oldest tombstone; very late responses for it will
            // then surface as unknown-correlation warnings, which is fine.
            if let Some(oldest) = state
                .timed_out
                .iter()
                .min_by_key(|(_, at)| **at)
                .map(|(id, _)| *id)
            {
                state.timed_out.remove(&oldest);
            }
        }
        state.timed_out.insert(correlation_id, Instant::now());
    }
}

// =============================================================================
// Handle
// =============================================================================

/// Waiting side of a registered command.
#[derive(Debug)]
pub struct CommandHandle {
    correlation_id: Uuid,
    rx: oneshot::Receiver<CommandReply>,
    correlator: Arc<CommandCorrelator>,
}

impl CommandHandle {
    /// Correlation id this handle waits on.
    #[must_use]
    pub const fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    /// Await the reply, bounded by the per-command deadline.
    ///
    /// # Errors
    ///
    /// - [`CommandError::CommandTimeout`] when the deadline elapses; the
    ///   entry becomes an advisory tombstone so a late response is logged
    ///   rather than resurrected.
    /// - The inner [`CommandError`] when the command failed locally.
    pub async fn await_reply(self, timeout: Duration) -> Result<CommandReply, CommandError> {
        match tokio::time::timeout(timeout, self.rx).await {
            Ok(Ok(CommandReply::Failed(error))) => Err(error),
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_closed)) => Err(CommandError::BackendUnavailable),
            Err(_elapsed) => {
                self.correlator.mark_timed_out(self.correlation_id);
                metrics::incr_command_timeouts();
                Err(CommandError::CommandTimeout(self.correlation_id))
            }
        }
    }
}
