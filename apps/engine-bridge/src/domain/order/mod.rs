//! Order Lifecycle Types
//!
//! The authoritative in-memory model of every in-flight order: lifecycle
//! states, the legal transition table, and the record that applies backend
//! events exactly once.
//!
//! # State machine
//!
//! ```text
//! New -> PendingSubmit -> { Working, Rejected }
//! Working -> { PartiallyFilled, Filled, Cancelled, Expired, Rejected }
//! PartiallyFilled -> { PartiallyFilled, Filled, Cancelled, Expired }
//! ```
//!
//! `Filled`, `Cancelled`, `Rejected`, `Expired` are terminal. Illegal
//! transition attempts are rejected and reported, never applied: the
//! authoritative transition already happened on the backend side.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::subscription::SessionId;

/// Backend-assigned order identifier.
pub type OrderId = String;

// =============================================================================
// Command vocabulary
// =============================================================================

/// Side of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSide {
    /// Buy order.
    Buy,
    /// Sell order.
    Sell,
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    /// Execute at a limit price or better.
    Limit,
    /// Execute immediately at the best available price.
    Market,
}

/// How long an order stays working.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeInForce {
    /// Valid for the trading day.
    Day,
    /// Good until cancelled.
    Gtc,
    /// Immediate or cancel.
    Ioc,
    /// Fill or kill.
    Fok,
}

/// An order command submitted by a session. Immutable; owned by the
/// command correlator until a terminal response or timeout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCommand {
    /// Caller-generated correlation identifier (must be unique).
    pub correlation_id: Uuid,
    /// Session that submitted the command.
    pub session_id: SessionId,
    /// Instrument symbol.
    pub symbol: String,
    /// Buy or sell.
    pub side: OrderSide,
    /// Limit or market.
    pub order_type: OrderType,
    /// Quantity to trade.
    pub quantity: Decimal,
    /// Limit price; `None` for market orders.
    pub price: Option<Decimal>,
    /// Time in force.
    pub time_in_force: TimeInForce,
    /// When the caller submitted the command.
    pub submitted_at: DateTime<Utc>,
}

// =============================================================================
// States
// =============================================================================

/// Order lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    /// Created locally, not yet sent.
    New,
    /// Sent to the backend, awaiting acknowledgement.
    PendingSubmit,
    /// Acknowledged and live on the book.
    Working,
    /// Partially executed, remainder still working.
    PartiallyFilled,
    /// Fully executed.
    Filled,
    /// Cancelled.
    Cancelled,
    /// Rejected by the backend.
    Rejected,
    /// Expired (time in force, or backend amnesia).
    Expired,
}

impl OrderState {
    /// Whether no further transition is legal from this state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Filled | Self::Cancelled | Self::Rejected | Self::Expired
        )
    }

    /// Check whether a transition is on a legal edge.
    #[must_use]
    pub const fn is_legal_transition(from: Self, to: Self) -> bool {
        matches!(
            (from, to),
            (Self::New, Self::PendingSubmit)
                | (Self::PendingSubmit, Self::Working | Self::Rejected)
                | (
                    Self::Working,
                    Self::PartiallyFilled
                        | Self::Filled
                        | Self::Cancelled
                        | Self::Expired
                        | Self::Rejected
                )
                | (
                    Self::PartiallyFilled,
                    Self::PartiallyFilled | Self::Filled | Self::Cancelled | Self::Expired
                )
        )
    }
}

impl std::fmt::Display for OrderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::New => "new",
            Self::PendingSubmit => "pending_submit",
            Self::Working => "working",
            Self::PartiallyFilled => "partially_filled",
            Self::Filled => "filled",
            Self::Cancelled => "cancelled",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
        };
        f.write_str(name)
    }
}

// =============================================================================
// Events
// =============================================================================

/// What a backend event does to an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OrderEventKind {
    /// Submission acknowledged; order is working.
    Accepted,
    /// Submission or order rejected.
    Rejected {
        /// Backend-supplied reason.
        reason: String,
    },
    /// Execution for part or all of the quantity.
    Fill {
        /// Executed quantity.
        quantity: Decimal,
        /// Execution price.
        price: Decimal,
    },
    /// Order cancelled.
    Cancelled,
    /// Order expired.
    Expired,
    /// Synthesized during reconciliation: jump to the backend's state,
    /// carrying the fill delta in one transition.
    Reconciled {
        /// State the backend reports.
        state: OrderState,
        /// Total filled quantity the backend reports.
        filled_quantity: Decimal,
        /// Average fill price the backend reports.
        average_fill_price: Option<Decimal>,
    },
}

/// One order lifecycle event from the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderEvent {
    /// Backend order identifier.
    pub order_id: OrderId,
    /// Per-order monotonically increasing event sequence.
    pub event_seq: u64,
    /// What happened.
    pub kind: OrderEventKind,
    /// Backend event timestamp.
    pub occurred_at: DateTime<Utc>,
}

// =============================================================================
// Record
// =============================================================================

/// The backend's view of one order, returned by a bulk status query
/// during reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderStatusReport {
    /// Backend order identifier.
    pub order_id: OrderId,
    /// State the backend holds.
    pub state: OrderState,
    /// Total filled quantity on the backend.
    pub filled_quantity: Decimal,
    /// Average fill price on the backend.
    pub average_fill_price: Option<Decimal>,
    /// Highest event sequence the backend has emitted for the order.
    pub event_seq: u64,
}

/// Why a history entry was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionCause {
    /// Ordinary backend event.
    BackendEvent,
    /// Synthesized during post-reconnect reconciliation.
    Reconciled,
    /// Backend reported no knowledge of the order after reconnect.
    BackendAmnesia,
}

/// One accepted state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionEntry {
    /// Event sequence that produced the transition.
    pub event_seq: u64,
    /// State before.
    pub from: OrderState,
    /// State after.
    pub to: OrderState,
    /// Why the entry exists.
    pub cause: TransitionCause,
    /// When the transition was applied.
    pub at: DateTime<Utc>,
}

/// Result of applying an event to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// The event moved the order to a new state.
    Transitioned {
        /// State before.
        from: OrderState,
        /// State after.
        to: OrderState,
    },
    /// The event was already applied; nothing changed.
    Duplicate,
}

/// Errors from order event application.
#[derive(Debug, Clone, thiserror::Error)]
pub enum OrderError {
    /// The event demands an illegal transition. The record is unchanged;
    /// the caller reports the event for reconciliation audit.
    #[error("out-of-order event for order {order_id}: {from} -> {to} at event seq {event_seq}")]
    OutOfOrderEvent {
        /// Order the event targeted.
        order_id: OrderId,
        /// Current state.
        from: OrderState,
        /// State the event demanded.
        to: OrderState,
        /// Sequence of the offending event.
        event_seq: u64,
    },
}

/// Authoritative in-memory record of one order.
///
/// Mutated exclusively by the order-shard worker that owns the order id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderRecord {
    /// Backend order identifier.
    pub order_id: OrderId,
    /// Caller-visible order identifier.
    pub client_order_id: String,
    /// Correlation id of the submitting command.
    pub correlation_id: Uuid,
    /// Session that owns the order.
    pub session_id: SessionId,
    /// Current lifecycle state.
    pub state: OrderState,
    /// Total quantity of the order.
    pub quantity: Decimal,
    /// Quantity filled so far.
    pub filled_quantity: Decimal,
    /// Volume-weighted average fill price.
    pub average_fill_price: Option<Decimal>,
    /// Highest applied event sequence.
    pub last_event_seq: u64,
    /// Ordered transition history.
    pub history: Vec<TransitionEntry>,
}

impl OrderRecord {
    /// Open a record for a submitted order, before the first backend
    /// acknowledgement arrives.
    #[must_use]
    pub fn open(
        order_id: OrderId,
        client_order_id: String,
        correlation_id: Uuid,
        session_id: SessionId,
        quantity: Decimal,
    ) -> Self {
        Self {
            order_id,
            client_order_id,
            correlation_id,
            session_id,
            state: OrderState::PendingSubmit,
            quantity,
            filled_quantity: Decimal::ZERO,
            average_fill_price: None,
            last_event_seq: 0,
            history: vec![TransitionEntry {
                event_seq: 0,
                from: OrderState::New,
                to: OrderState::PendingSubmit,
                cause: TransitionCause::BackendEvent,
                at: Utc::now(),
            }],
        }
    }

    /// Apply one backend event exactly once.
    ///
    /// Replays of an already-applied event sequence are no-ops. Illegal
    /// transitions leave the record untouched and are returned as errors
    /// for out-of-order reporting.
    ///
    /// # Errors
    ///
    /// Returns [`OrderError::OutOfOrderEvent`] if the event demands an
    /// illegal transition.
    pub fn apply(&mut self, event: &OrderEvent) -> Result<Applied, OrderError> {
        if event.event_seq <= self.last_event_seq {
            return Ok(Applied::Duplicate);
        }

        let (target, cause) = self.target_state(&event.kind);

        let legal = match cause {
            // Reconciliation may jump over missing intermediate states,
            // but never resurrects a terminal order.
            TransitionCause::Reconciled | TransitionCause::BackendAmnesia => {
                !self.state.is_terminal()
            }
            TransitionCause::BackendEvent => OrderState::is_legal_transition(self.state, target),
        };

        if !legal {
            return Err(OrderError::OutOfOrderEvent {
                order_id: self.order_id.clone(),
                from: self.state,
                to: target,
                event_seq: event.event_seq,
            });
        }

        match &event.kind {
            OrderEventKind::Fill { quantity, price } => {
                self.record_fill(*quantity, *price);
            }
            OrderEventKind::Reconciled {
                filled_quantity,
                average_fill_price,
                ..
            } => {
                self.filled_quantity = *filled_quantity;
                self.average_fill_price = *average_fill_price;
            }
            _ => {}
        }

        let from = self.state;
        self.state = target;
        self.last_event_seq = event.event_seq;
        self.history.push(TransitionEntry {
            event_seq: event.event_seq,
            from,
            to: target,
            cause,
            at: Utc::now(),
        });

        Ok(Applied::Transitioned { from, to: target })
    }

    /// Force the order to `Expired` because the backend reported no
    /// knowledge of it after a reconnect.
    ///
    /// # Errors
    ///
    /// Returns [`OrderError::OutOfOrderEvent`] if the order is already
    /// terminal.
    pub fn force_expire_amnesia(&mut self) -> Result<Applied, OrderError> {
        let event = OrderEvent {
            order_id: self.order_id.clone(),
            event_seq: self.last_event_seq + 1,
            kind: OrderEventKind::Reconciled {
                state: OrderState::Expired,
                filled_quantity: self.filled_quantity,
                average_fill_price: self.average_fill_price,
            },
            occurred_at: Utc::now(),
        };
        let applied = self.apply(&event)?;
        // Rewrite the cause so the audit trail names the anomaly.
        if let Some(entry) = self.history.last_mut() {
            entry.cause = TransitionCause::BackendAmnesia;
        }
        Ok(applied)
    }

    fn target_state(&self, kind: &OrderEventKind) -> (OrderState, TransitionCause) {
        match kind {
            OrderEventKind::Accepted => (OrderState::Working, TransitionCause::BackendEvent),
            OrderEventKind::Rejected { .. } => (OrderState::Rejected, TransitionCause::BackendEvent),
            OrderEventKind::Fill { quantity, .. } => {
                let target = if self.filled_quantity + *quantity >= self.quantity {
                    OrderState::Filled
                } else {
                    OrderState::PartiallyFilled
                };
                (target, TransitionCause::BackendEvent)
            }
            OrderEventKind::Cancelled => (OrderState::Cancelled, TransitionCause::BackendEvent),
            OrderEventKind::Expired => (OrderState::Expired, TransitionCause::BackendEvent),
            OrderEventKind::Reconciled { state, .. } => (*state, TransitionCause::Reconciled),
        }
    }

    fn record_fill(&mut self, quantity: Decimal, price: Decimal) {
        let prior_notional = self
            .average_fill_price
            .map_or(Decimal::ZERO, |avg| avg * self.filled_quantity);
        self.filled_quantity += quantity;
        if self.filled_quantity > Decimal::ZERO {
            self.average_fill_price =
                Some((prior_notional + price * quantity) / self.filled_quantity);
        }
    }
}
