//! Port Interfaces
//!
//! Interfaces (ports) between the bridge core and its collaborators,
//! following the hexagonal layering of the codebase.
//!
//! ## Driven Ports (Outbound)
//!
//! - [`SessionRegistry`]: push delivery to the external session layer
//! - [`BackendCommands`]: correlated request/reply commands to the engine
//!
//! The session layer itself (HTTP, auth, persistence) lives outside this
//! crate; the core only ever sees these contracts.

use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::market_data::{MarketDataTick, Topic, TopicSnapshot};
use crate::domain::order::{OrderCommand, OrderId, OrderState, OrderStatusReport};
use crate::domain::subscription::SessionId;

// =============================================================================
// Session-facing payloads
// =============================================================================

/// Compact order view pushed to the owning session on every accepted
/// transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderUpdate {
    /// Backend order identifier.
    pub order_id: OrderId,
    /// Caller-visible order identifier.
    pub client_order_id: String,
    /// Current lifecycle state.
    pub state: OrderState,
    /// Quantity filled so far.
    pub filled_quantity: Decimal,
    /// Volume-weighted average fill price.
    pub average_fill_price: Option<Decimal>,
    /// Highest applied event sequence.
    pub last_event_seq: u64,
}

/// Operator-visible anomaly surfaced to the session layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnomalyNotice {
    /// Order the anomaly concerns.
    pub order_id: OrderId,
    /// Human-readable description.
    pub message: String,
}

/// Everything the bridge pushes to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionPayload {
    /// A validated market-data tick.
    Tick(MarketDataTick),
    /// A resync snapshot, delivered in place of the missed ticks.
    Snapshot(TopicSnapshot),
    /// An order lifecycle update.
    OrderUpdate(OrderUpdate),
    /// An operator-visible anomaly (e.g. backend amnesia).
    Anomaly(AnomalyNotice),
}

/// The session is gone or cannot accept the payload (backpressure).
#[derive(Debug, Clone, thiserror::Error)]
#[error("session {0} is gone")]
pub struct SessionGone(pub SessionId);

/// Push delivery to the external session layer.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionRegistry: Send + Sync {
    /// Push a payload to one session.
    ///
    /// # Errors
    ///
    /// Returns [`SessionGone`] if the session no longer exists or signals
    /// backpressure; the caller removes the subscriber and never retries.
    async fn push(&self, session: SessionId, payload: SessionPayload) -> Result<(), SessionGone>;

    /// Sessions the session layer believes are subscribed to a topic.
    fn list_subscribers(&self, topic: &Topic) -> Vec<SessionId>;

    /// Notify the session layer that a subscriber was dropped from a
    /// topic after a failed push.
    async fn subscriber_dropped(&self, session: SessionId, topic: &Topic);
}

// =============================================================================
// Backend command port
// =============================================================================

/// Failure modes of a correlated backend command.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    /// The correlation id is already pending; the backend was not
    /// contacted.
    #[error("duplicate correlation id {0}")]
    DuplicateCorrelation(Uuid),

    /// No response arrived within the configured deadline. The outcome is
    /// indeterminate: the caller must reconcile via a status query, never
    /// assume success or failure.
    #[error("command {0} timed out; outcome indeterminate, reconcile via status query")]
    CommandTimeout(Uuid),

    /// The backend channel is disconnected.
    #[error("backend unavailable")]
    BackendUnavailable,

    /// The frame could not be handed to the wire.
    #[error("send failed: {0}")]
    SendFailure(String),

    /// The command was cancelled by the caller before resolution.
    #[error("command {0} cancelled by caller")]
    Cancelled(Uuid),

    /// The backend answered with an error instead of a result.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Terminal outcome of an order command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResult {
    /// Submission accepted; the backend assigned an order id.
    Accepted {
        /// Backend order identifier.
        order_id: OrderId,
    },
    /// Command rejected.
    Rejected {
        /// Backend-supplied reason.
        reason: String,
    },
    /// Cancel request acknowledged.
    CancelAccepted,
}

/// Correlated request/reply commands to the backend engine.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BackendCommands: Send + Sync {
    /// Submit an order and await the backend's acknowledgement.
    ///
    /// # Errors
    ///
    /// See [`CommandError`]; a timeout means indeterminate, not failed.
    async fn submit_order(&self, command: OrderCommand) -> Result<CommandResult, CommandError>;

    /// Request cancellation of a working order.
    ///
    /// # Errors
    ///
    /// See [`CommandError`].
    async fn cancel_order(
        &self,
        session: SessionId,
        order_id: OrderId,
    ) -> Result<CommandResult, CommandError>;

    /// Fetch a state snapshot for one topic (gap resynchronization).
    ///
    /// # Errors
    ///
    /// See [`CommandError`].
    async fn request_snapshot(&self, topic: Topic) -> Result<TopicSnapshot, CommandError>;

    /// Bulk status query for the given orders. Orders the backend knows
    /// nothing about are simply absent from the result.
    ///
    /// # Errors
    ///
    /// See [`CommandError`].
    async fn query_orders(
        &self,
        order_ids: Vec<OrderId>,
    ) -> Result<Vec<OrderStatusReport>, CommandError>;
}
