//! Order Engine
//!
//! Owns every in-flight [`OrderRecord`], sharded by order id. Each shard is
//! a dedicated task with exclusive ownership of its records, so event
//! application needs no locking: an order's events are always applied by
//! the same shard, in arrival order, exactly once by event sequence.
//!
//! After a backend reconnect, [`OrderEngine::reconcile`] replays the
//! backend's authoritative view over the local records: divergence is
//! closed with a single synthesized `Reconciled` transition, and an order
//! the backend no longer knows is expired exactly once with a
//! `BackendAmnesia` audit entry.

use std::collections::{HashMap, VecDeque};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::application::ports::{
    AnomalyNotice, BackendCommands, CommandError, CommandResult, OrderUpdate, SessionPayload,
    SessionRegistry,
};
use crate::domain::order::{
    Applied, OrderCommand, OrderEvent, OrderEventKind, OrderId, OrderRecord, OrderStatusReport,
};
use crate::domain::subscription::SessionId;
use crate::infrastructure::metrics;

/// Terminal records retained per shard for late-event lookups.
const ARCHIVE_CAPACITY: usize = 256;
/// Events buffered for orders whose submit acknowledgement has not landed
/// yet, per shard.
const ORPHAN_CAPACITY: usize = 1024;

// =============================================================================
// Shard protocol
// =============================================================================

enum ShardMessage {
    /// Backend lifecycle event for an order this shard owns.
    Event(OrderEvent),
    /// Start tracking a newly acknowledged order.
    Track(Box<OrderRecord>),
    /// Ids of every non-terminal order in the shard.
    OpenOrders(oneshot::Sender<Vec<OrderId>>),
    /// Backend's authoritative view after a reconnect. Non-terminal local
    /// orders absent from the map suffered backend amnesia.
    Reconcile(Arc<HashMap<OrderId, OrderStatusReport>>),
    /// Current record for one order, live or archived.
    Get(OrderId, oneshot::Sender<Option<OrderRecord>>),
}

// =============================================================================
// Engine
// =============================================================================

/// Sharded owner of all order state.
pub struct OrderEngine {
    shards: Vec<mpsc::UnboundedSender<ShardMessage>>,
    backend: Arc<dyn BackendCommands>,
}

impl OrderEngine {
    /// Spawn `shard_count` shard workers and return the engine.
    #[must_use]
    pub fn new(
        shard_count: usize,
        sessions: Arc<dyn SessionRegistry>,
        backend: Arc<dyn BackendCommands>,
        cancel: &CancellationToken,
    ) -> Self {
        let shard_count = shard_count.max(1);
        let mut shards = Vec::with_capacity(shard_count);
        for index in 0..shard_count {
            let (tx, rx) = mpsc::unbounded_channel();
            shards.push(tx);
            tokio::spawn(run_shard(
                index,
                rx,
                Arc::clone(&sessions),
                cancel.clone(),
            ));
        }
        Self { shards, backend }
    }

    /// Submit an order command to the backend.
    ///
    /// Returns as soon as the backend responds or the command deadline
    /// fires. On acceptance the returned order id is tracked from
    /// `PendingSubmit`; lifecycle events then drive it through the state
    /// machine.
    ///
    /// # Errors
    ///
    /// Propagates [`CommandError`] from the correlator, including
    /// `DuplicateCorrelation` fail-fast and `CommandTimeout` when the
    /// outcome is indeterminate.
    pub async fn submit(&self, command: OrderCommand) -> Result<CommandResult, CommandError> {
        let result = self.backend.submit_order(command.clone()).await?;

        if let CommandResult::Accepted { order_id } = &result {
            let record = OrderRecord::open(
                order_id.clone(),
                command.correlation_id.to_string(),
                command.correlation_id,
                command.session_id,
                command.quantity,
            );
            self.send_to_shard(order_id, ShardMessage::Track(Box::new(record)));
        }

        Ok(result)
    }

    /// Ask the backend to cancel an order.
    ///
    /// The acknowledgement only means the cancel was received; the order
    /// state moves when (and if) the `Cancelled` event arrives. A fill
    /// racing the cancel is resolved by backend event sequence.
    ///
    /// # Errors
    ///
    /// Propagates [`CommandError`] from the correlator.
    pub async fn cancel(
        &self,
        session: SessionId,
        order_id: OrderId,
    ) -> Result<CommandResult, CommandError> {
        self.backend.cancel_order(session, order_id).await
    }

    /// Route one backend lifecycle event to its owning shard.
    pub fn apply_event(&self, event: OrderEvent) {
        self.send_to_shard(&event.order_id.clone(), ShardMessage::Event(event));
    }

    /// Consume the inbound order-event stream until cancelled.
    pub async fn run_dispatch(
        &self,
        mut events: mpsc::UnboundedReceiver<OrderEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                received = events.recv() => match received {
                    Some(event) => self.apply_event(event),
                    None => break,
                },
            }
        }
    }

    /// Reconcile local order state against the backend after a reconnect.
    ///
    /// Queries the backend for every non-terminal order, then pushes the
    /// authoritative view into each shard.
    ///
    /// # Errors
    ///
    /// Returns the [`CommandError`] from the status query; local state is
    /// untouched and the caller retries on the next reconnect.
    pub async fn reconcile(&self) -> Result<(), CommandError> {
        let open = self.open_orders().await;
        if open.is_empty() {
            return Ok(());
        }

        tracing::info!(orders = open.len(), "Reconciling order state after reconnect");
        let reports = self.backend.query_orders(open).await?;
        let by_id: Arc<HashMap<OrderId, OrderStatusReport>> = Arc::new(
            reports
                .into_iter()
                .map(|report| (report.order_id.clone(), report))
                .collect(),
        );

        for shard in &self.shards {
            let _ = shard.send(ShardMessage::Reconcile(Arc::clone(&by_id)));
        }
        Ok(())
    }

    /// Ids of every non-terminal order across all shards.
    pub async fn open_orders(&self) -> Vec<OrderId> {
        let mut open = Vec::new();
        for shard in &self.shards {
            let (tx, rx) = oneshot::channel();
            if shard.send(ShardMessage::OpenOrders(tx)).is_ok() {
                if let Ok(ids) = rx.await {
                    open.extend(ids);
                }
            }
        }
        open
    }

    /// Look up the current record for an order, live or archived.
    pub async fn order(&self, order_id: &OrderId) -> Option<OrderRecord> {
        let (tx, rx) = oneshot::channel();
        self.send_to_shard(order_id, ShardMessage::Get(order_id.clone(), tx));
        rx.await.ok().flatten()
    }

    fn send_to_shard(&self, order_id: &OrderId, message: ShardMessage) {
        let index = shard_index(order_id, self.shards.len());
        if self.shards[index].send(message).is_err() {
            tracing::error!(order_id, shard = index, "Order shard is gone");
        }
    }
}

fn shard_index(order_id: &OrderId, shard_count: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    order_id.hash(&mut hasher);
    (hasher.finish() % shard_count as u64) as usize
}

// =============================================================================
// Shard worker
// =============================================================================

struct Shard {
    index: usize,
    sessions: Arc<dyn SessionRegistry>,
    live: HashMap<OrderId, OrderRecord>,
    archive: VecDeque<OrderRecord>,
    /// Events that arrived before the submit acknowledgement tracked the
    /// order; drained on `Track`.
    orphans: HashMap<OrderId, Vec<OrderEvent>>,
    orphan_count: usize,
}

async fn run_shard(
    index: usize,
    mut rx: mpsc::UnboundedReceiver<ShardMessage>,
    sessions: Arc<dyn SessionRegistry>,
    cancel: CancellationToken,
) {
    let mut shard = Shard {
        index,
        sessions,
        live: HashMap::new(),
        archive: VecDeque::new(),
        orphans: HashMap::new(),
        orphan_count: 0,
    };

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            message = rx.recv() => match message {
                Some(message) => shard.handle(message).await,
                None => break,
            },
        }
    }
}

impl Shard {
    async fn handle(&mut self, message: ShardMessage) {
        match message {
            ShardMessage::Event(event) => self.handle_event(event).await,
            ShardMessage::Track(record) => self.track(*record).await,
            ShardMessage::OpenOrders(reply) => {
                let open: Vec<OrderId> = self
                    .live
                    .values()
                    .filter(|record| !record.state.is_terminal())
                    .map(|record| record.order_id.clone())
                    .collect();
                let _ = reply.send(open);
            }
            ShardMessage::Reconcile(reports) => self.reconcile(&reports).await,
            ShardMessage::Get(order_id, reply) => {
                let record = self.live.get(&order_id).cloned().or_else(|| {
                    self.archive
                        .iter()
                        .find(|record| record.order_id == order_id)
                        .cloned()
                });
                let _ = reply.send(record);
            }
        }
    }

    async fn track(&mut self, record: OrderRecord) {
        let order_id = record.order_id.clone();
        self.push_update(&record).await;
        self.live.insert(order_id.clone(), record);

        // Events can outrun the submit acknowledgement; apply anything
        // that was buffered while the order was unknown.
        if let Some(buffered) = self.orphans.remove(&order_id) {
            self.orphan_count -= buffered.len();
            for event in buffered {
                self.handle_event(event).await;
            }
        }
    }

    async fn handle_event(&mut self, event: OrderEvent) {
        let Some(record) = self.live.get_mut(&event.order_id) else {
            if self
                .archive
                .iter()
                .any(|record| record.order_id == event.order_id)
            {
                tracing::debug!(order_id = event.order_id, "Event for archived order ignored");
                return;
            }
            self.buffer_orphan(event);
            return;
        };

        match record.apply(&event) {
            Ok(Applied::Transitioned { from, to }) => {
                tracing::debug!(
                    order_id = event.order_id,
                    %from,
                    %to,
                    event_seq = event.event_seq,
                    "Order transitioned"
                );
                metrics::incr_order_events_applied();
                let snapshot = record.clone();
                self.push_update(&snapshot).await;
                self.archive_if_terminal(&event.order_id);
            }
            Ok(Applied::Duplicate) => {
                tracing::debug!(
                    order_id = event.order_id,
                    event_seq = event.event_seq,
                    "Duplicate order event dropped"
                );
            }
            Err(error) => {
                // Reported, never applied: the backend already holds the
                // authoritative transition.
                tracing::warn!(order_id = event.order_id, %error, "Out-of-order event");
                metrics::incr_out_of_order_events();
                let session = record.session_id;
                self.push_anomaly(session, &event.order_id, &error.to_string())
                    .await;
            }
        }
    }

    async fn reconcile(&mut self, reports: &HashMap<OrderId, OrderStatusReport>) {
        let open: Vec<OrderId> = self
            .live
            .values()
            .filter(|record| !record.state.is_terminal())
            .map(|record| record.order_id.clone())
            .collect();

        for order_id in open {
            match reports.get(&order_id) {
                Some(report) => self.reconcile_report(&order_id, report).await,
                None => self.expire_amnesiac(&order_id).await,
            }
        }
    }

    async fn reconcile_report(&mut self, order_id: &OrderId, report: &OrderStatusReport) {
        let Some(record) = self.live.get_mut(order_id) else {
            return;
        };
        if report.event_seq <= record.last_event_seq {
            // Nothing was missed while disconnected.
            return;
        }

        let event = OrderEvent {
            order_id: order_id.clone(),
            event_seq: report.event_seq,
            kind: OrderEventKind::Reconciled {
                state: report.state,
                filled_quantity: report.filled_quantity,
                average_fill_price: report.average_fill_price,
            },
            occurred_at: chrono::Utc::now(),
        };

        match record.apply(&event) {
            Ok(Applied::Transitioned { from, to }) => {
                tracing::info!(
                    order_id,
                    %from,
                    %to,
                    event_seq = report.event_seq,
                    "Order reconciled to backend state"
                );
                metrics::incr_orders_reconciled();
                let snapshot = record.clone();
                self.push_update(&snapshot).await;
                self.archive_if_terminal(order_id);
            }
            Ok(Applied::Duplicate) => {}
            Err(error) => {
                tracing::warn!(order_id, %error, "Reconciliation rejected");
            }
        }
    }

    async fn expire_amnesiac(&mut self, order_id: &OrderId) {
        let Some(record) = self.live.get_mut(order_id) else {
            return;
        };
        match record.force_expire_amnesia() {
            Ok(_) => {
                tracing::warn!(order_id, "Backend no longer knows order; expiring");
                metrics::incr_amnesia_expirations();
                let snapshot = record.clone();
                let session = snapshot.session_id;
                self.push_update(&snapshot).await;
                self.push_anomaly(
                    session,
                    order_id,
                    "order expired: backend reported no knowledge of it after reconnect",
                )
                .await;
                self.archive_if_terminal(order_id);
            }
            Err(error) => {
                tracing::warn!(order_id, %error, "Amnesia expiry rejected");
            }
        }
    }

    fn buffer_orphan(&mut self, event: OrderEvent) {
        if self.orphan_count >= ORPHAN_CAPACITY {
            tracing::warn!(
                shard = self.index,
                order_id = event.order_id,
                "Orphan event buffer full; event dropped"
            );
            return;
        }
        self.orphan_count += 1;
        self.orphans.entry(event.order_id.clone()).or_default().push(event);
    }

    /// Move a terminal record from the live table to the archive ring.
    ///
    /// Runs right after the terminal update was pushed. Delivery is the
    /// session layer's receipt; a failed push means the session is gone
    /// and no acknowledgement can ever arrive, so the record is archived
    /// either way and stays queryable through [`OrderEngine::order`].
    fn archive_if_terminal(&mut self, order_id: &OrderId) {
        let terminal = self
            .live
            .get(order_id)
            .is_some_and(|record| record.state.is_terminal());
        if !terminal {
            return;
        }
        if let Some(record) = self.live.remove(order_id) {
            if self.archive.len() >= ARCHIVE_CAPACITY {
                self.archive.pop_front();
            }
            self.archive.push_back(record);
        }
    }

    async fn push_update(&self, record: &OrderRecord) {
        let update = OrderUpdate {
            order_id: record.order_id.clone(),
            client_order_id: record.client_order_id.clone(),
            state: record.state,
            filled_quantity: record.filled_quantity,
            average_fill_price: record.average_fill_price,
            last_event_seq: record.last_event_seq,
        };
        if let Err(gone) = self
            .sessions
            .push(record.session_id, SessionPayload::OrderUpdate(update))
            .await
        {
            // Order state outlives the session; delivery is best effort.
            tracing::debug!(session = gone.0, order_id = record.order_id, "Update not delivered");
        }
    }

    async fn push_anomaly(&self, session: SessionId, order_id: &OrderId, message: &str) {
        let notice = AnomalyNotice {
            order_id: order_id.clone(),
            message: message.to_string(),
        };
        let _ = self
            .sessions
            .push(session, SessionPayload::Anomaly(notice))
            .await;
    }
}
