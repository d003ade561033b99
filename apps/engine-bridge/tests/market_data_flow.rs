//! Market Data Flow Integration Tests
//!
//! Tests the full path from raw backend ticks through the sequencing
//! pipeline and topic router to registered session queues.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use engine_bridge::application::ports::{
    BackendCommands, CommandError, CommandResult, SessionPayload, SessionRegistry,
};
use engine_bridge::domain::order::{OrderCommand, OrderId, OrderStatusReport};
use engine_bridge::domain::subscription::SessionId;
use engine_bridge::{
    ChannelSessionRegistry, MarketDataPipeline, MarketDataTick, PipelineSignal, TickFields, Topic,
    TopicRouter, TopicSnapshot, UpstreamChange,
};

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// Backend fake that serves snapshots from a fixed table and counts
/// requests.
struct SnapshotBackend {
    snapshots: Mutex<Vec<TopicSnapshot>>,
    requests: AtomicUsize,
}

impl SnapshotBackend {
    fn new(snapshots: Vec<TopicSnapshot>) -> Arc<Self> {
        Arc::new(Self {
            snapshots: Mutex::new(snapshots),
            requests: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl BackendCommands for SnapshotBackend {
    async fn submit_order(&self, _command: OrderCommand) -> Result<CommandResult, CommandError> {
        Err(CommandError::BackendUnavailable)
    }

    async fn cancel_order(
        &self,
        _session: SessionId,
        _order_id: OrderId,
    ) -> Result<CommandResult, CommandError> {
        Err(CommandError::BackendUnavailable)
    }

    async fn request_snapshot(&self, topic: Topic) -> Result<TopicSnapshot, CommandError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.snapshots
            .lock()
            .iter()
            .find(|snapshot| snapshot.topic == topic)
            .cloned()
            .ok_or(CommandError::BackendUnavailable)
    }

    async fn query_orders(
        &self,
        _order_ids: Vec<OrderId>,
    ) -> Result<Vec<OrderStatusReport>, CommandError> {
        Ok(Vec::new())
    }
}

struct Harness {
    registry: Arc<ChannelSessionRegistry>,
    router: Arc<TopicRouter>,
    upstream_rx: mpsc::UnboundedReceiver<UpstreamChange>,
    tick_tx: broadcast::Sender<MarketDataTick>,
    signal_tx: mpsc::UnboundedSender<PipelineSignal>,
    backend: Arc<SnapshotBackend>,
    cancel: CancellationToken,
}

fn start_pipeline(queue_capacity: usize, snapshots: Vec<TopicSnapshot>) -> Harness {
    let registry = ChannelSessionRegistry::new(queue_capacity);
    let (router, upstream_rx) =
        TopicRouter::new(Arc::clone(&registry) as Arc<dyn SessionRegistry>);
    let router = Arc::new(router);
    let backend = SnapshotBackend::new(snapshots);

    let (tick_tx, tick_rx) = broadcast::channel(64);
    let (signal_tx, signal_rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();

    let pipeline = MarketDataPipeline::new(
        Arc::clone(&router),
        Arc::clone(&backend) as Arc<dyn BackendCommands>,
        Duration::from_millis(20),
    );
    let pipeline_cancel = cancel.clone();
    tokio::spawn(async move {
        pipeline.run(tick_rx, signal_rx, pipeline_cancel).await;
    });

    Harness {
        registry,
        router,
        upstream_rx,
        tick_tx,
        signal_tx,
        backend,
        cancel,
    }
}

fn tick(topic: &Topic, sequence: u64) -> MarketDataTick {
    MarketDataTick::new(topic.clone(), sequence, TickFields::default())
}

fn snapshot(topic: &Topic, sequence: u64) -> TopicSnapshot {
    TopicSnapshot {
        topic: topic.clone(),
        sequence,
        fields: TickFields::default(),
    }
}

async fn next_payload(rx: &mut mpsc::Receiver<SessionPayload>) -> SessionPayload {
    timeout(RECV_TIMEOUT, rx.recv())
        .await
        .expect("payload not delivered in time")
        .expect("session queue closed")
}

/// (kind, sequence) fingerprint for asserting delivery order.
fn fingerprint(payload: &SessionPayload) -> (&'static str, u64) {
    match payload {
        SessionPayload::Tick(tick) => ("tick", tick.sequence),
        SessionPayload::Snapshot(snapshot) => ("snap", snapshot.sequence),
        other => panic!("unexpected payload: {other:?}"),
    }
}

#[tokio::test]
async fn gap_is_repaired_with_a_snapshot_in_stream_order() {
    let topic = Topic::new("AAPL", "XNAS");
    let mut harness = start_pipeline(32, vec![snapshot(&topic, 4)]);

    let (session_a, mut rx_a) = harness.registry.register();
    let (session_b, mut rx_b) = harness.registry.register();
    for session in [session_a, session_b] {
        harness.registry.record_subscription(session, topic.clone());
        harness.router.subscribe(session, topic.clone());
    }

    // First subscriber announces upstream interest exactly once.
    let change = timeout(RECV_TIMEOUT, harness.upstream_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(change, UpstreamChange::Subscribe(topic.clone()));

    for sequence in [1, 2, 4, 5] {
        harness.tick_tx.send(tick(&topic, sequence)).unwrap();
    }

    for rx in [&mut rx_a, &mut rx_b] {
        let mut received = Vec::new();
        for _ in 0..4 {
            received.push(fingerprint(&next_payload(rx).await));
        }
        assert_eq!(
            received,
            vec![("tick", 1), ("tick", 2), ("snap", 4), ("tick", 5)]
        );
    }

    assert_eq!(harness.backend.requests.load(Ordering::SeqCst), 1);
    harness.cancel.cancel();
}

#[tokio::test]
async fn slow_session_is_dropped_and_interest_released() {
    let topic = Topic::new("MSFT", "XNAS");
    // Queue of one: the second undrained push signals backpressure.
    let mut harness = start_pipeline(1, Vec::new());

    let (session, _rx) = harness.registry.register();
    harness.registry.record_subscription(session, topic.clone());
    harness.router.subscribe(session, topic.clone());

    let change = timeout(RECV_TIMEOUT, harness.upstream_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(change, UpstreamChange::Subscribe(topic.clone()));

    harness.tick_tx.send(tick(&topic, 1)).unwrap();
    harness.tick_tx.send(tick(&topic, 2)).unwrap();

    // The failed push drops the last subscriber, releasing the topic.
    let change = timeout(RECV_TIMEOUT, harness.upstream_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(change, UpstreamChange::Unsubscribe(topic.clone()));

    // The session layer's subscription view was told about the drop.
    assert!(harness.registry.list_subscribers(&topic).is_empty());
    harness.cancel.cancel();
}

#[tokio::test]
async fn resynchronized_signal_refetches_tracked_topics() {
    let topic = Topic::new("TSLA", "XNAS");
    let mut harness = start_pipeline(32, vec![snapshot(&topic, 7)]);

    let (session, mut rx) = harness.registry.register();
    harness.router.subscribe(session, topic.clone());
    let _ = timeout(RECV_TIMEOUT, harness.upstream_rx.recv()).await;

    harness.tick_tx.send(tick(&topic, 1)).unwrap();
    assert_eq!(fingerprint(&next_payload(&mut rx).await), ("tick", 1));

    // Reconnect: every tracked topic is refetched before new ticks flow.
    harness.signal_tx.send(PipelineSignal::Resynchronized).unwrap();

    assert_eq!(fingerprint(&next_payload(&mut rx).await), ("snap", 7));
    assert_eq!(harness.backend.requests.load(Ordering::SeqCst), 1);

    // Post-snapshot ticks resume from the snapshot sequence.
    harness.tick_tx.send(tick(&topic, 8)).unwrap();
    assert_eq!(fingerprint(&next_payload(&mut rx).await), ("tick", 8));
    harness.cancel.cancel();
}
