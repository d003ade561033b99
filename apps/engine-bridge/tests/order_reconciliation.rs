//! Order Reconciliation Integration Tests
//!
//! Tests order lifecycle fan-out, command timeout semantics, and the
//! reconnect reconciliation pass end to end.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use engine_bridge::application::ports::{
    BackendCommands, CommandError, CommandResult, SessionPayload, SessionRegistry,
};
use engine_bridge::application::services::{CommandCorrelator, CommandReply};
use engine_bridge::domain::order::{
    OrderCommand, OrderEvent, OrderEventKind, OrderId, OrderSide, OrderState, OrderStatusReport,
    OrderType, TimeInForce,
};
use engine_bridge::domain::subscription::SessionId;
use engine_bridge::infrastructure::backend::CommandRequest;
use engine_bridge::{BackendCommandService, ChannelSessionRegistry, CommandTransport, OrderEngine};

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

// =============================================================================
// Fakes
// =============================================================================

/// Backend fake: accepts submits with scripted order ids and answers
/// status queries from a scripted report table.
struct ScriptedBackend {
    accept_ids: Mutex<Vec<OrderId>>,
    reports: Mutex<Vec<OrderStatusReport>>,
}

impl ScriptedBackend {
    fn new(accept_ids: Vec<OrderId>) -> Arc<Self> {
        Arc::new(Self {
            accept_ids: Mutex::new(accept_ids),
            reports: Mutex::new(Vec::new()),
        })
    }

    fn set_reports(&self, reports: Vec<OrderStatusReport>) {
        *self.reports.lock() = reports;
    }
}

#[async_trait]
impl BackendCommands for ScriptedBackend {
    async fn submit_order(&self, _command: OrderCommand) -> Result<CommandResult, CommandError> {
        let mut ids = self.accept_ids.lock();
        if ids.is_empty() {
            return Err(CommandError::BackendUnavailable);
        }
        Ok(CommandResult::Accepted {
            order_id: ids.remove(0),
        })
    }

    async fn cancel_order(
        &self,
        _session: SessionId,
        _order_id: OrderId,
    ) -> Result<CommandResult, CommandError> {
        Ok(CommandResult::CancelAccepted)
    }

    async fn request_snapshot(
        &self,
        _topic: engine_bridge::Topic,
    ) -> Result<engine_bridge::TopicSnapshot, CommandError> {
        Err(CommandError::BackendUnavailable)
    }

    async fn query_orders(
        &self,
        order_ids: Vec<OrderId>,
    ) -> Result<Vec<OrderStatusReport>, CommandError> {
        Ok(self
            .reports
            .lock()
            .iter()
            .filter(|report| order_ids.contains(&report.order_id))
            .cloned()
            .collect())
    }
}

/// Transport fake that swallows frames: replies never arrive.
struct SilentTransport;

impl CommandTransport for SilentTransport {
    fn send(&self, _request: &CommandRequest) -> Result<(), CommandError> {
        Ok(())
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn command(session: SessionId, symbol: &str) -> OrderCommand {
    OrderCommand {
        correlation_id: Uuid::new_v4(),
        session_id: session,
        symbol: symbol.to_string(),
        side: OrderSide::Buy,
        order_type: OrderType::Limit,
        quantity: Decimal::from(100),
        price: Some(Decimal::from(50)),
        time_in_force: TimeInForce::Day,
        submitted_at: Utc::now(),
    }
}

fn event(order_id: &str, event_seq: u64, kind: OrderEventKind) -> OrderEvent {
    OrderEvent {
        order_id: order_id.to_string(),
        event_seq,
        kind,
        occurred_at: Utc::now(),
    }
}

fn report(
    order_id: &str,
    state: OrderState,
    filled: Decimal,
    event_seq: u64,
) -> OrderStatusReport {
    OrderStatusReport {
        order_id: order_id.to_string(),
        state,
        filled_quantity: filled,
        average_fill_price: None,
        event_seq,
    }
}

async fn next_payload(rx: &mut mpsc::Receiver<SessionPayload>) -> SessionPayload {
    timeout(RECV_TIMEOUT, rx.recv())
        .await
        .expect("payload not delivered in time")
        .expect("session queue closed")
}

/// Drain `count` payloads and index the order updates by id, keeping the
/// last state seen per order.
async fn drain_updates(
    rx: &mut mpsc::Receiver<SessionPayload>,
    count: usize,
) -> HashMap<OrderId, OrderState> {
    let mut states = HashMap::new();
    for _ in 0..count {
        if let SessionPayload::OrderUpdate(update) = next_payload(rx).await {
            states.insert(update.order_id, update.state);
        }
    }
    states
}

// =============================================================================
// Lifecycle fan-out
// =============================================================================

#[tokio::test]
async fn lifecycle_updates_reach_the_submitting_session() {
    let registry = ChannelSessionRegistry::new(32);
    let (session, mut rx) = registry.register();
    let backend = ScriptedBackend::new(vec!["ord-1".to_string()]);
    let cancel = CancellationToken::new();
    let engine = OrderEngine::new(
        4,
        Arc::clone(&registry) as Arc<dyn SessionRegistry>,
        Arc::clone(&backend) as Arc<dyn BackendCommands>,
        &cancel,
    );

    let result = engine.submit(command(session, "AAPL")).await.unwrap();
    assert_eq!(
        result,
        CommandResult::Accepted {
            order_id: "ord-1".to_string()
        }
    );

    engine.apply_event(event("ord-1", 1, OrderEventKind::Accepted));
    engine.apply_event(event(
        "ord-1",
        2,
        OrderEventKind::Fill {
            quantity: Decimal::from(100),
            price: Decimal::from(50),
        },
    ));

    let mut states = Vec::new();
    for _ in 0..3 {
        if let SessionPayload::OrderUpdate(update) = next_payload(&mut rx).await {
            states.push(update.state);
        }
    }
    assert_eq!(
        states,
        vec![OrderState::PendingSubmit, OrderState::Working, OrderState::Filled]
    );
    cancel.cancel();
}

#[tokio::test]
async fn duplicate_event_produces_no_second_update() {
    let registry = ChannelSessionRegistry::new(32);
    let (session, mut rx) = registry.register();
    let backend = ScriptedBackend::new(vec!["ord-1".to_string()]);
    let cancel = CancellationToken::new();
    let engine = OrderEngine::new(
        4,
        Arc::clone(&registry) as Arc<dyn SessionRegistry>,
        Arc::clone(&backend) as Arc<dyn BackendCommands>,
        &cancel,
    );

    engine.submit(command(session, "AAPL")).await.unwrap();
    engine.apply_event(event("ord-1", 1, OrderEventKind::Accepted));
    engine.apply_event(event("ord-1", 1, OrderEventKind::Accepted));

    let _pending = next_payload(&mut rx).await;
    let working = next_payload(&mut rx).await;
    assert!(matches!(
        working,
        SessionPayload::OrderUpdate(ref update) if update.state == OrderState::Working
    ));

    // The redelivery is dropped without another session update.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err());
    cancel.cancel();
}

// =============================================================================
// Command timeout semantics
// =============================================================================

#[tokio::test(start_paused = true)]
async fn timed_out_command_is_indeterminate_and_late_reply_advisory() {
    let correlator = Arc::new(CommandCorrelator::new());
    let service = BackendCommandService::new(
        Arc::clone(&correlator),
        Arc::new(SilentTransport) as Arc<dyn CommandTransport>,
        Duration::from_secs(2),
    );

    let cmd = command(1, "AAPL");
    let correlation_id = cmd.correlation_id;

    // The backend never answers; the deadline elapses at 2s.
    let err = service.submit_order(cmd).await.unwrap_err();
    assert_eq!(err, CommandError::CommandTimeout(correlation_id));
    assert_eq!(correlator.pending_count(), 0);

    // The response straggles in half a second later: advisory only, no
    // pending entry revived.
    tokio::time::advance(Duration::from_millis(500)).await;
    correlator.resolve(
        correlation_id,
        CommandReply::Result(CommandResult::Accepted {
            order_id: "ord-late".to_string(),
        }),
    );
    assert_eq!(correlator.pending_count(), 0);
}

// =============================================================================
// Reconnect reconciliation
// =============================================================================

#[tokio::test]
async fn reconcile_converges_orders_and_expires_amnesiacs_exactly_once() {
    let registry = ChannelSessionRegistry::new(64);
    let (session, mut rx) = registry.register();
    let backend = ScriptedBackend::new(vec![
        "ord-a".to_string(),
        "ord-b".to_string(),
        "ord-c".to_string(),
    ]);
    let cancel = CancellationToken::new();
    let engine = OrderEngine::new(
        4,
        Arc::clone(&registry) as Arc<dyn SessionRegistry>,
        Arc::clone(&backend) as Arc<dyn BackendCommands>,
        &cancel,
    );

    for symbol in ["AAPL", "MSFT", "TSLA"] {
        engine.submit(command(session, symbol)).await.unwrap();
    }
    for order_id in ["ord-a", "ord-b", "ord-c"] {
        engine.apply_event(event(order_id, 1, OrderEventKind::Accepted));
    }
    // Three PendingSubmit and three Working updates.
    let states = drain_updates(&mut rx, 6).await;
    assert!(states.values().all(|state| *state == OrderState::Working));

    // Connection lost and restored. The backend still works A unchanged,
    // saw B fill while we were away, and has no memory of C.
    backend.set_reports(vec![
        report("ord-a", OrderState::Working, Decimal::ZERO, 1),
        report("ord-b", OrderState::Filled, Decimal::from(100), 5),
    ]);
    engine.reconcile().await.unwrap();

    let mut updates = HashMap::new();
    let mut anomalies = Vec::new();
    for _ in 0..3 {
        match next_payload(&mut rx).await {
            SessionPayload::OrderUpdate(update) => {
                updates.insert(update.order_id, (update.state, update.last_event_seq));
            }
            SessionPayload::Anomaly(anomaly) => anomalies.push(anomaly),
            other => panic!("unexpected payload: {other:?}"),
        }
    }
    // A was already current, only B and C changed.
    assert!(!updates.contains_key("ord-a"));
    assert_eq!(updates["ord-b"], (OrderState::Filled, 5));
    assert_eq!(updates["ord-c"].0, OrderState::Expired);
    assert_eq!(anomalies.len(), 1);
    assert_eq!(anomalies[0].order_id, "ord-c");

    // A second pass leaves the terminal orders untouched.
    engine.reconcile().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err());
    cancel.cancel();
}
