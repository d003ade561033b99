//! Wire Adapter
//!
//! Owns the three backend channels and the tasks that service them:
//!
//! - **command**: encodes outbound requests, routes inbound replies to the
//!   command correlator, and fails every pending command on disconnect
//! - **market data**: decodes pushed ticks and order events, forwards
//!   upstream interest changes, and resubscribes plus signals a resync on
//!   every (re)connect
//! - **heartbeat**: beats at the configured cadence and feeds the
//!   miss-counting monitor
//!
//! Inbound ticks are handed to the sequencing pipeline over a bounded
//! broadcast channel: if the pipeline falls behind, the oldest ticks are
//! dropped and repaired later through the snapshot path, so the adapter
//! never blocks on a slow consumer.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use super::channel::{ChannelClient, ChannelConfig, ChannelEvent};
use super::codec::JsonCodec;
use super::reconnect::ReconnectConfig;
use super::frames::{
    CommandReplyFrame, CommandRequest, HeartbeatFrame, InterestFrame, PushFrame, ReplyPayload,
};
use super::health::{Channel, ConnectionHealth, HealthState};
use super::heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatMonitor};
use crate::application::ports::{CommandError, CommandResult};
use crate::application::services::correlator::{CommandCorrelator, CommandReply};
use crate::application::services::pipeline::PipelineSignal;
use crate::application::services::router::{TopicRouter, UpstreamChange};
use crate::domain::market_data::MarketDataTick;
use crate::domain::order::OrderEvent;
use crate::infrastructure::config::BridgeConfig;
use crate::infrastructure::metrics;

/// Capacity of each channel's outbound frame queue.
const OUTBOUND_CAPACITY: usize = 1_024;
/// Capacity of each channel's event queue.
const EVENT_CAPACITY: usize = 1_024;

// =============================================================================
// Signals
// =============================================================================

/// Backend-level transitions surfaced to the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendSignal {
    /// The command path is usable again; order state must be reconciled.
    Restored,
    /// Heartbeats are being missed.
    Degraded,
    /// The backend is considered down; pending commands were failed.
    Down,
}

// =============================================================================
// Adapter
// =============================================================================

/// Receiving ends handed to the rest of the bridge at spawn time.
pub struct WireAdapterHandles {
    /// The adapter itself.
    pub adapter: Arc<WireAdapter>,
    /// Validated-by-nobody raw ticks for the sequencing pipeline.
    pub ticks: broadcast::Receiver<MarketDataTick>,
    /// Order lifecycle events for the order engine.
    pub order_events: mpsc::UnboundedReceiver<OrderEvent>,
    /// Backend-level transitions for the supervisor.
    pub signals: mpsc::UnboundedReceiver<BackendSignal>,
}

/// Typed facade over the three backend channels.
pub struct WireAdapter {
    command_out: mpsc::Sender<String>,
    health: Arc<ConnectionHealth>,
    codec: JsonCodec,
}

impl WireAdapter {
    /// Spawn every channel task and return the adapter with the receiving
    /// ends of its streams.
    #[must_use]
    pub fn spawn(
        config: &BridgeConfig,
        correlator: Arc<CommandCorrelator>,
        router: Arc<TopicRouter>,
        pipeline_signals: mpsc::UnboundedSender<PipelineSignal>,
        upstream_rx: mpsc::UnboundedReceiver<UpstreamChange>,
        cancel: &CancellationToken,
    ) -> WireAdapterHandles {
        let health = Arc::new(ConnectionHealth::new());
        let codec = JsonCodec::new();
        let reconnect = ReconnectConfig::from(&config.connection);

        let (tick_tx, ticks) = broadcast::channel(config.pipeline.market_data_capacity);
        let (order_event_tx, order_events) = mpsc::unbounded_channel();
        let (signal_tx, signals) = mpsc::unbounded_channel();

        // Command channel.
        let (command_out, command_out_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let (command_events_tx, command_events) = mpsc::channel(EVENT_CAPACITY);
        tokio::spawn(
            ChannelClient::new(
                ChannelConfig {
                    name: Channel::Command.as_str(),
                    url: config.backend.command_url.clone(),
                    reconnect: reconnect.clone(),
                },
                command_out_rx,
                command_events_tx,
                cancel.clone(),
            )
            .run(),
        );
        tokio::spawn(run_command_task(
            command_events,
            Arc::clone(&correlator),
            Arc::clone(&health),
            signal_tx.clone(),
            codec.clone(),
        ));

        // Market data channel.
        let (market_out, market_out_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let (market_events_tx, market_events) = mpsc::channel(EVENT_CAPACITY);
        tokio::spawn(
            ChannelClient::new(
                ChannelConfig {
                    name: Channel::MarketData.as_str(),
                    url: config.backend.market_data_url.clone(),
                    reconnect: reconnect.clone(),
                },
                market_out_rx,
                market_events_tx,
                cancel.clone(),
            )
            .run(),
        );
        tokio::spawn(run_market_data_task(MarketDataTask {
            events: market_events,
            upstream: upstream_rx,
            out: market_out,
            router,
            tick_tx,
            order_event_tx,
            pipeline_signals,
            health: Arc::clone(&health),
            codec: codec.clone(),
        }));

        // Heartbeat channel.
        let (heartbeat_out, heartbeat_out_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let (heartbeat_events_tx, heartbeat_events) = mpsc::channel(EVENT_CAPACITY);
        tokio::spawn(
            ChannelClient::new(
                ChannelConfig {
                    name: Channel::Heartbeat.as_str(),
                    url: config.backend.heartbeat_url.clone(),
                    reconnect,
                },
                heartbeat_out_rx,
                heartbeat_events_tx,
                cancel.clone(),
            )
            .run(),
        );

        let (beat_tx, beat_rx) = mpsc::channel(16);
        let (monitor_tx, monitor_rx) = mpsc::channel(64);
        tokio::spawn(
            HeartbeatMonitor::new(
                HeartbeatConfig::from(&config.connection),
                beat_rx,
                monitor_tx,
                Arc::clone(&health),
                cancel.clone(),
            )
            .run(),
        );
        tokio::spawn(run_heartbeat_task(HeartbeatTask {
            events: heartbeat_events,
            monitor: monitor_rx,
            beats: beat_tx,
            out: heartbeat_out,
            correlator,
            health: Arc::clone(&health),
            signals: signal_tx,
            codec: codec.clone(),
        }));

        WireAdapterHandles {
            adapter: Arc::new(Self {
                command_out,
                health,
                codec,
            }),
            ticks,
            order_events,
            signals,
        }
    }

    /// Submit a command frame to the wire.
    ///
    /// # Errors
    ///
    /// - [`CommandError::BackendUnavailable`] while the command channel is
    ///   disconnected; the caller fails fast instead of queueing blindly.
    /// - [`CommandError::SendFailure`] if the frame cannot be encoded or
    ///   the outbound queue is full.
    pub fn send_command(&self, request: &CommandRequest) -> Result<(), CommandError> {
        if self.health.channel(Channel::Command) == HealthState::Disconnected {
            return Err(CommandError::BackendUnavailable);
        }
        let text = self
            .codec
            .encode(request)
            .map_err(|e| CommandError::SendFailure(e.to_string()))?;
        self.command_out
            .try_send(text)
            .map_err(|e| CommandError::SendFailure(e.to_string()))
    }

    /// Shared health board.
    #[must_use]
    pub fn health(&self) -> Arc<ConnectionHealth> {
        Arc::clone(&self.health)
    }
}

// =============================================================================
// Channel tasks
// =============================================================================

async fn run_command_task(
    mut events: mpsc::Receiver<ChannelEvent>,
    correlator: Arc<CommandCorrelator>,
    health: Arc<ConnectionHealth>,
    signals: mpsc::UnboundedSender<BackendSignal>,
    codec: JsonCodec,
) {
    while let Some(event) = events.recv().await {
        match event {
            ChannelEvent::Connected => {
                health.set_channel(Channel::Command, HealthState::Connected);
                let _ = signals.send(BackendSignal::Restored);
            }
            ChannelEvent::Disconnected => {
                health.set_channel(Channel::Command, HealthState::Disconnected);
                correlator.fail_all(&CommandError::BackendUnavailable);
            }
            ChannelEvent::Frame(text) => match codec.decode::<CommandReplyFrame>(&text) {
                Ok(frame) => {
                    correlator.resolve(frame.correlation_id, to_command_reply(frame.reply));
                }
                Err(error) => {
                    tracing::warn!(%error, "Undecodable command reply dropped");
                    metrics::incr_protocol_violations(Channel::Command.as_str());
                }
            },
        }
    }
}

pub(crate) fn to_command_reply(payload: ReplyPayload) -> CommandReply {
    match payload {
        ReplyPayload::Accepted { order_id } => {
            CommandReply::Result(CommandResult::Accepted { order_id })
        }
        ReplyPayload::Rejected { reason } => {
            CommandReply::Result(CommandResult::Rejected { reason })
        }
        ReplyPayload::CancelAccepted => CommandReply::Result(CommandResult::CancelAccepted),
        ReplyPayload::Snapshot { snapshot } => CommandReply::Snapshot(snapshot),
        ReplyPayload::OrderReports { reports } => CommandReply::StatusReports(reports),
        ReplyPayload::Error { reason } => CommandReply::Failed(CommandError::Backend(reason)),
    }
}

struct MarketDataTask {
    events: mpsc::Receiver<ChannelEvent>,
    upstream: mpsc::UnboundedReceiver<UpstreamChange>,
    out: mpsc::Sender<String>,
    router: Arc<TopicRouter>,
    tick_tx: broadcast::Sender<MarketDataTick>,
    order_event_tx: mpsc::UnboundedSender<OrderEvent>,
    pipeline_signals: mpsc::UnboundedSender<PipelineSignal>,
    health: Arc<ConnectionHealth>,
    codec: JsonCodec,
}

async fn run_market_data_task(mut task: MarketDataTask) {
    loop {
        tokio::select! {
            event = task.events.recv() => {
                let Some(event) = event else { break };
                handle_market_event(&mut task, event).await;
            }
            change = task.upstream.recv() => {
                let Some(change) = change else { break };
                handle_interest_change(&task, change).await;
            }
        }
    }
}

async fn handle_market_event(task: &mut MarketDataTask, event: ChannelEvent) {
    match event {
        ChannelEvent::Connected => {
            task.health
                .set_channel(Channel::MarketData, HealthState::Connected);
            // Re-establish upstream interest, then force every tracked
            // topic through a snapshot resync.
            for topic in task.router.active_topics() {
                send_interest(task, InterestFrame::Subscribe { topic }).await;
            }
            let _ = task.pipeline_signals.send(PipelineSignal::Resynchronized);
        }
        ChannelEvent::Disconnected => {
            task.health
                .set_channel(Channel::MarketData, HealthState::Disconnected);
        }
        ChannelEvent::Frame(text) => match task.codec.decode::<PushFrame>(&text) {
            Ok(PushFrame::Tick {
                topic,
                sequence,
                fields,
            }) => {
                let _ = task.tick_tx.send(MarketDataTick::new(topic, sequence, fields));
            }
            Ok(PushFrame::OrderEvent { event }) => {
                let _ = task.order_event_tx.send(event);
            }
            Err(error) => {
                tracing::warn!(%error, "Undecodable push frame dropped");
                metrics::incr_protocol_violations(Channel::MarketData.as_str());
            }
        },
    }
}

async fn handle_interest_change(task: &MarketDataTask, change: UpstreamChange) {
    match change {
        UpstreamChange::Subscribe(topic) => {
            send_interest(task, InterestFrame::Subscribe { topic }).await;
        }
        UpstreamChange::Unsubscribe(topic) => {
            send_interest(
                task,
                InterestFrame::Unsubscribe {
                    topic: topic.clone(),
                },
            )
            .await;
            let _ = task
                .pipeline_signals
                .send(PipelineSignal::TopicDropped(topic));
        }
    }
}

async fn send_interest(task: &MarketDataTask, frame: InterestFrame) {
    match task.codec.encode(&frame) {
        Ok(text) => {
            if task.out.send(text).await.is_err() {
                tracing::warn!("Market data channel outbound queue closed");
            }
        }
        Err(error) => tracing::error!(%error, "Failed to encode interest frame"),
    }
}

struct HeartbeatTask {
    events: mpsc::Receiver<ChannelEvent>,
    monitor: mpsc::Receiver<HeartbeatEvent>,
    beats: mpsc::Sender<()>,
    out: mpsc::Sender<String>,
    correlator: Arc<CommandCorrelator>,
    health: Arc<ConnectionHealth>,
    signals: mpsc::UnboundedSender<BackendSignal>,
    codec: JsonCodec,
}

async fn run_heartbeat_task(mut task: HeartbeatTask) {
    loop {
        tokio::select! {
            event = task.events.recv() => {
                let Some(event) = event else { break };
                match event {
                    ChannelEvent::Connected => {
                        task.health.set_channel(Channel::Heartbeat, HealthState::Connected);
                    }
                    ChannelEvent::Disconnected => {
                        task.health.set_channel(Channel::Heartbeat, HealthState::Disconnected);
                    }
                    ChannelEvent::Frame(text) => match task.codec.decode::<HeartbeatFrame>(&text) {
                        Ok(HeartbeatFrame::Beat { .. }) => {
                            let _ = task.beats.try_send(());
                        }
                        Err(error) => {
                            tracing::warn!(%error, "Undecodable heartbeat frame dropped");
                            metrics::incr_protocol_violations(Channel::Heartbeat.as_str());
                        }
                    },
                }
            }
            event = task.monitor.recv() => {
                let Some(event) = event else { break };
                match event {
                    HeartbeatEvent::SendBeat => {
                        if let Ok(text) = task.codec.encode(&HeartbeatFrame::beat()) {
                            let _ = task.out.try_send(text);
                        }
                    }
                    HeartbeatEvent::Degraded { .. } => {
                        task.health.set_backend(HealthState::Degraded);
                        let _ = task.signals.send(BackendSignal::Degraded);
                    }
                    HeartbeatEvent::BackendDown { .. } => {
                        task.health.set_backend(HealthState::Disconnected);
                        task.correlator.fail_all(&CommandError::BackendUnavailable);
                        let _ = task.signals.send(BackendSignal::Down);
                    }
                    HeartbeatEvent::Recovered => {
                        task.health.set_backend(HealthState::Connected);
                        let _ = task.signals.send(BackendSignal::Restored);
                    }
                }
            }
        }
    }
}
