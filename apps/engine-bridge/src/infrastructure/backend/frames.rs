//! Backend Wire Frames
//!
//! Typed JSON frames for the three backend channels. Every frame carries a
//! `type` tag; command-channel frames additionally carry the correlation id
//! that ties a reply back to its request.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::market_data::{TickFields, Topic, TopicSnapshot};
use crate::domain::order::{
    OrderCommand, OrderEvent, OrderId, OrderSide, OrderStatusReport, OrderType, TimeInForce,
};

// =============================================================================
// Command channel
// =============================================================================

/// Body of an outbound command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommandPayload {
    /// Submit a new order.
    SubmitOrder {
        /// Instrument symbol.
        symbol: String,
        /// Buy or sell.
        side: OrderSide,
        /// Limit or market.
        order_type: OrderType,
        /// Quantity to trade.
        quantity: Decimal,
        /// Limit price; absent for market orders.
        #[serde(skip_serializing_if = "Option::is_none")]
        price: Option<Decimal>,
        /// Time in force.
        time_in_force: TimeInForce,
    },
    /// Cancel a working order.
    CancelOrder {
        /// Backend order identifier.
        order_id: OrderId,
    },
    /// Bulk order status query used during reconciliation.
    QueryOrders {
        /// Orders to report on.
        order_ids: Vec<OrderId>,
    },
    /// Request a topic snapshot to close a sequence gap.
    RequestSnapshot {
        /// Topic to snapshot.
        topic: Topic,
    },
}

/// One outbound command frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRequest {
    /// Correlation id echoed by the reply.
    pub correlation_id: Uuid,
    /// The command body.
    pub command: CommandPayload,
}

impl CommandRequest {
    /// Build a submit frame from an order command.
    #[must_use]
    pub fn submit(command: &OrderCommand) -> Self {
        Self {
            correlation_id: command.correlation_id,
            command: CommandPayload::SubmitOrder {
                symbol: command.symbol.clone(),
                side: command.side,
                order_type: command.order_type,
                quantity: command.quantity,
                price: command.price,
                time_in_force: command.time_in_force,
            },
        }
    }

    /// Build a cancel frame.
    #[must_use]
    pub fn cancel(correlation_id: Uuid, order_id: OrderId) -> Self {
        Self {
            correlation_id,
            command: CommandPayload::CancelOrder { order_id },
        }
    }

    /// Build a bulk status query frame.
    #[must_use]
    pub fn query_orders(correlation_id: Uuid, order_ids: Vec<OrderId>) -> Self {
        Self {
            correlation_id,
            command: CommandPayload::QueryOrders { order_ids },
        }
    }

    /// Build a snapshot request frame.
    #[must_use]
    pub fn request_snapshot(correlation_id: Uuid, topic: Topic) -> Self {
        Self {
            correlation_id,
            command: CommandPayload::RequestSnapshot { topic },
        }
    }
}

/// Body of an inbound command reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReplyPayload {
    /// Order accepted; the backend assigned an id.
    Accepted {
        /// Backend order identifier.
        order_id: OrderId,
    },
    /// Order rejected.
    Rejected {
        /// Backend-supplied reason.
        reason: String,
    },
    /// Cancel request received.
    CancelAccepted,
    /// Snapshot response.
    Snapshot {
        /// The requested snapshot.
        snapshot: TopicSnapshot,
    },
    /// Bulk status reports. Orders the backend does not know are absent.
    OrderReports {
        /// Reports for the known orders.
        reports: Vec<OrderStatusReport>,
    },
    /// The backend could not process the command.
    Error {
        /// Backend-supplied reason.
        reason: String,
    },
}

/// One inbound command reply frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandReplyFrame {
    /// Correlation id of the originating request.
    pub correlation_id: Uuid,
    /// The reply body.
    pub reply: ReplyPayload,
}

// =============================================================================
// Market data channel
// =============================================================================

/// Frames pushed by the backend on the publish/subscribe channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushFrame {
    /// One market-data tick.
    Tick {
        /// Topic the tick belongs to.
        topic: Topic,
        /// Strictly increasing per-topic sequence number.
        sequence: u64,
        /// Tick payload.
        fields: TickFields,
    },
    /// One order lifecycle event.
    OrderEvent {
        /// The event.
        event: OrderEvent,
    },
}

/// Frames the bridge sends on the publish/subscribe channel to manage
/// upstream topic interest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InterestFrame {
    /// Start publishing a topic.
    Subscribe {
        /// Topic of interest.
        topic: Topic,
    },
    /// Stop publishing a topic.
    Unsubscribe {
        /// Topic no longer watched.
        topic: Topic,
    },
}

// =============================================================================
// Heartbeat channel
// =============================================================================

/// Heartbeat frame, sent symmetrically by both sides at a fixed cadence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HeartbeatFrame {
    /// One beat.
    Beat {
        /// Sender timestamp.
        sent_at: DateTime<Utc>,
    },
}

impl HeartbeatFrame {
    /// A beat stamped now.
    #[must_use]
    pub fn beat() -> Self {
        Self::Beat { sent_at: Utc::now() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_frame_shape() {
        let frame = CommandRequest::cancel(Uuid::nil(), "ord-1".to_string());
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["command"]["type"], "cancel_order");
        assert_eq!(json["command"]["order_id"], "ord-1");
        assert_eq!(
            json["correlation_id"],
            "00000000-0000-0000-0000-000000000000"
        );
    }

    #[test]
    fn reply_roundtrip() {
        let frame = CommandReplyFrame {
            correlation_id: Uuid::new_v4(),
            reply: ReplyPayload::Accepted {
                order_id: "ord-9".to_string(),
            },
        };
        let json = serde_json::to_string(&frame).unwrap();
        let decoded: CommandReplyFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn tick_frame_omits_absent_fields() {
        let frame = PushFrame::Tick {
            topic: Topic::new("AAPL", "XNAS"),
            sequence: 7,
            fields: TickFields::default(),
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "tick");
        assert!(json["fields"].get("price").is_none());
    }
}
