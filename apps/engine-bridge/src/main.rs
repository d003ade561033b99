//! Engine Bridge Binary
//!
//! Starts the trading-engine session bridge.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin engine-bridge
//! ```
//!
//! # Environment Variables
//!
//! All optional:
//! - `ENGINE_BRIDGE_COMMAND_URL`: Command channel WebSocket URL
//! - `ENGINE_BRIDGE_MARKET_DATA_URL`: Market-data channel WebSocket URL
//! - `ENGINE_BRIDGE_HEARTBEAT_URL`: Heartbeat channel WebSocket URL
//! - `ENGINE_BRIDGE_HEARTBEAT_INTERVAL_MS`: Beat cadence (default: 1000)
//! - `ENGINE_BRIDGE_MAX_MISSED_HEARTBEATS`: Misses before the backend is
//!   declared down (default: 10)
//! - `ENGINE_BRIDGE_RECONNECT_DELAY_INITIAL_MS`: First backoff delay
//!   (default: 500)
//! - `ENGINE_BRIDGE_RECONNECT_DELAY_MAX_SECS`: Backoff cap (default: 30)
//! - `ENGINE_BRIDGE_COMMAND_TIMEOUT_MS`: Per-command deadline
//!   (default: 2000)
//! - `ENGINE_BRIDGE_ORDER_SHARDS`: Order engine shard count (default: 8)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;

use engine_bridge::application::ports::{BackendCommands, SessionRegistry};
use engine_bridge::infrastructure::backend::{
    BackendCommandService, BackendSignal, CommandTransport, WireAdapter,
};
use engine_bridge::infrastructure::sessions::ChannelSessionRegistry;
use engine_bridge::infrastructure::telemetry;
use engine_bridge::{
    BridgeConfig, CommandCorrelator, MarketDataPipeline, OrderEngine, TopicRouter, init_metrics,
};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_dotenv();

    telemetry::init();

    tracing::info!("Starting Engine Bridge");

    let _metrics_handle = init_metrics();

    let config = BridgeConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Session layer and fan-out.
    let sessions = ChannelSessionRegistry::new(config.pipeline.session_queue_capacity);
    let (router, upstream_rx) =
        TopicRouter::new(Arc::clone(&sessions) as Arc<dyn SessionRegistry>);
    let router = Arc::new(router);

    // Command correlation and the three backend channels.
    let correlator = Arc::new(CommandCorrelator::new());
    let (pipeline_signal_tx, pipeline_signal_rx) = mpsc::unbounded_channel();
    let handles = WireAdapter::spawn(
        &config,
        Arc::clone(&correlator),
        Arc::clone(&router),
        pipeline_signal_tx,
        upstream_rx,
        &shutdown_token,
    );

    let backend: Arc<dyn BackendCommands> = Arc::new(BackendCommandService::new(
        correlator,
        Arc::clone(&handles.adapter) as Arc<dyn CommandTransport>,
        config.command.command_timeout,
    ));

    // Market-data pipeline.
    let pipeline = MarketDataPipeline::new(
        Arc::clone(&router),
        Arc::clone(&backend),
        config.pipeline.snapshot_retry,
    );
    let pipeline_cancel = shutdown_token.clone();
    tokio::spawn(async move {
        pipeline
            .run(handles.ticks, pipeline_signal_rx, pipeline_cancel)
            .await;
    });

    // Order engine.
    let engine = Arc::new(OrderEngine::new(
        config.pipeline.order_shards,
        Arc::clone(&sessions) as Arc<dyn SessionRegistry>,
        Arc::clone(&backend),
        &shutdown_token,
    ));

    let dispatch_engine = Arc::clone(&engine);
    let dispatch_cancel = shutdown_token.clone();
    tokio::spawn(async move {
        dispatch_engine
            .run_dispatch(handles.order_events, dispatch_cancel)
            .await;
    });

    // Supervisor: react to backend-level transitions.
    let supervisor_engine = Arc::clone(&engine);
    let supervisor_cancel = shutdown_token.clone();
    tokio::spawn(async move {
        handle_backend_signals(handles.signals, supervisor_engine, supervisor_cancel).await;
    });

    tracing::info!("Engine bridge ready");

    await_shutdown(shutdown_token).await;

    tracing::info!("Engine bridge stopped");
    Ok(())
}

/// React to backend availability transitions reported by the adapter.
///
/// A restore may be reported more than once per outage (command channel
/// reconnect and heartbeat recovery both announce it); reconciliation is
/// idempotent, so the extra pass only costs a status query.
async fn handle_backend_signals(
    mut signals: mpsc::UnboundedReceiver<BackendSignal>,
    engine: Arc<OrderEngine>,
    cancel: CancellationToken,
) {
    loop {
        let signal = tokio::select! {
            () = cancel.cancelled() => break,
            received = signals.recv() => match received {
                Some(signal) => signal,
                None => break,
            },
        };

        match signal {
            BackendSignal::Restored => {
                tracing::info!("Backend restored, reconciling order state");
                if let Err(error) = engine.reconcile().await {
                    tracing::error!(%error, "Order reconciliation failed");
                }
            }
            BackendSignal::Degraded => {
                tracing::warn!("Backend degraded");
            }
            BackendSignal::Down => {
                tracing::error!("Backend down, commands will fail until it recovers");
            }
        }
    }
}

fn load_dotenv() {
    if dotenvy::dotenv().is_err() {
        load_dotenv_from_ancestors();
    }
}

fn load_dotenv_from_ancestors() {
    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

fn log_config(config: &BridgeConfig) {
    tracing::info!(
        command_url = %config.backend.command_url,
        market_data_url = %config.backend.market_data_url,
        heartbeat_url = %config.backend.heartbeat_url,
        "Configuration loaded"
    );
    tracing::debug!(
        heartbeat_interval_ms = config.connection.heartbeat_interval.as_millis() as u64,
        max_missed_heartbeats = config.connection.max_missed_heartbeats,
        command_timeout_ms = config.command.command_timeout.as_millis() as u64,
        order_shards = config.pipeline.order_shards,
        "Timing parameters"
    );
}

async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();
}
