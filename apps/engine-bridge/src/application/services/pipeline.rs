//! Market Data Pipeline
//!
//! Single-writer worker that owns the [`Sequencer`]. Inbound ticks arrive
//! over a bounded broadcast channel from the wire adapter; validated ticks
//! fan out through the [`TopicRouter`]. A detected gap suppresses the topic
//! and fetches a snapshot from the backend while other topics keep flowing.
//!
//! If the worker falls behind and the broadcast channel overruns, the
//! oldest ticks are dropped and counted; the resulting sequence gaps are
//! then repaired through the normal snapshot path.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::application::ports::BackendCommands;
use crate::application::services::router::TopicRouter;
use crate::domain::market_data::{Accepted, MarketDataTick, Sequencer, Topic, TopicSnapshot};
use crate::infrastructure::metrics;

// =============================================================================
// Signals
// =============================================================================

/// Out-of-band control input for the pipeline worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineSignal {
    /// The market-data channel reconnected; every tracked topic must
    /// resync from a fresh snapshot.
    Resynchronized,
    /// The last subscriber left the topic; drop its sequence state.
    TopicDropped(Topic),
}

enum FetchOutcome {
    Fetched(TopicSnapshot),
    Refetch(Topic),
}

// =============================================================================
// Pipeline
// =============================================================================

/// Market-data pipeline worker.
pub struct MarketDataPipeline {
    sequencer: Sequencer,
    router: Arc<TopicRouter>,
    backend: Arc<dyn BackendCommands>,
    snapshot_retry: Duration,
    fetch_tx: mpsc::UnboundedSender<FetchOutcome>,
    fetch_rx: mpsc::UnboundedReceiver<FetchOutcome>,
}

impl MarketDataPipeline {
    /// Create a pipeline over the given router and backend command port.
    ///
    /// `snapshot_retry` is the pause before retrying a failed snapshot
    /// fetch.
    #[must_use]
    pub fn new(
        router: Arc<TopicRouter>,
        backend: Arc<dyn BackendCommands>,
        snapshot_retry: Duration,
    ) -> Self {
        let (fetch_tx, fetch_rx) = mpsc::unbounded_channel();
        Self {
            sequencer: Sequencer::new(),
            router,
            backend,
            snapshot_retry,
            fetch_tx,
            fetch_rx,
        }
    }

    /// Run the pipeline until cancelled.
    pub async fn run(
        mut self,
        mut ticks: broadcast::Receiver<MarketDataTick>,
        mut signals: mpsc::UnboundedReceiver<PipelineSignal>,
        cancel: CancellationToken,
    ) {
        tracing::info!("Market data pipeline started");

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::info!("Market data pipeline stopping");
                    break;
                }
                received = ticks.recv() => match received {
                    Ok(tick) => self.handle_tick(tick).await,
                    Err(broadcast::error::RecvError::Lagged(dropped)) => {
                        tracing::warn!(dropped, "Tick feed overrun; oldest ticks dropped");
                        metrics::incr_feed_overruns(dropped);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::info!("Tick feed closed; pipeline stopping");
                        break;
                    }
                },
                Some(signal) = signals.recv() => self.handle_signal(signal),
                Some(outcome) = self.fetch_rx.recv() => match outcome {
                    FetchOutcome::Fetched(snapshot) => self.handle_snapshot(snapshot).await,
                    FetchOutcome::Refetch(topic) => {
                        if self.sequencer.is_resyncing(&topic) {
                            self.spawn_fetch(topic);
                        }
                    }
                },
            }
        }
    }

    async fn handle_tick(&mut self, tick: MarketDataTick) {
        let topic = tick.topic.clone();
        match self.sequencer.accept(tick) {
            Accepted::Deliver(tick) => {
                self.router.publish_tick(&tick).await;
            }
            Accepted::Duplicate => {
                metrics::incr_duplicate_ticks();
            }
            Accepted::Gap {
                expected_from,
                expected_to,
            } => {
                tracing::warn!(
                    %topic,
                    expected_from,
                    expected_to,
                    "Sequence gap detected; requesting snapshot"
                );
                metrics::incr_sequence_gaps();
                self.spawn_fetch(topic);
            }
            Accepted::Buffered => {}
        }
    }

    fn handle_signal(&mut self, signal: PipelineSignal) {
        match signal {
            PipelineSignal::Resynchronized => {
                let topics = self.sequencer.force_resync_all();
                tracing::info!(topics = topics.len(), "Feed resynchronized; refetching snapshots");
                for topic in topics {
                    self.spawn_fetch(topic);
                }
            }
            PipelineSignal::TopicDropped(topic) => {
                self.sequencer.forget(&topic);
            }
        }
    }

    async fn handle_snapshot(&mut self, snapshot: TopicSnapshot) {
        let topic = snapshot.topic.clone();
        if !self.sequencer.is_resyncing(&topic) {
            // Topic was dropped while the fetch was in flight.
            return;
        }

        let replay = self.sequencer.apply_snapshot(snapshot);
        metrics::incr_snapshots_applied();
        self.router.publish_snapshot(&replay.snapshot).await;
        for tick in &replay.ticks {
            self.router.publish_tick(tick).await;
        }

        if let Some((from, to)) = replay.residual_gap {
            tracing::warn!(%topic, from, to, "Residual gap after snapshot; refetching");
            self.spawn_fetch(topic);
        }
    }

    fn spawn_fetch(&self, topic: Topic) {
        let backend = Arc::clone(&self.backend);
        let tx = self.fetch_tx.clone();
        let retry = self.snapshot_retry;

        tokio::spawn(async move {
            match backend.request_snapshot(topic.clone()).await {
                Ok(snapshot) => {
                    let _ = tx.send(FetchOutcome::Fetched(snapshot));
                }
                Err(error) => {
                    tracing::warn!(%topic, %error, "Snapshot fetch failed; will retry");
                    tokio::time::sleep(retry).await;
                    let _ = tx.send(FetchOutcome::Refetch(topic));
                }
            }
        });
    }
}
