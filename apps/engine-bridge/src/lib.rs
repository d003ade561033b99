#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::default_trait_access,
        clippy::items_after_statements
    )
)]

//! Engine Bridge - Trading Engine Session Multiplexer
//!
//! A bridge service that maintains single connections to an authoritative
//! trading engine (command, market-data, and heartbeat channels) and
//! multiplexes validated market data and order state to many client
//! sessions.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core bridging logic and data types
//!   - `market_data`: Topics, ticks, snapshots, and the sequencer
//!   - `order`: Order lifecycle records and the legal-transition table
//!   - `subscription`: Refcounted topic subscription tracking
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Interfaces for the session layer and backend commands
//!   - `services`: Correlator, topic router, market-data pipeline, order
//!     engine
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `backend`: WebSocket channel clients, framing, heartbeat, health
//!   - `sessions`: Channel-backed session registry
//!   - `config`: Configuration loading
//!   - `metrics`: Prometheus metrics
//!   - `telemetry`: Tracing setup
//!
//! # Data Flow
//!
//! ```text
//! Engine command WS ◄──┐
//!                      │   ┌────────────┐    ┌────────────┐
//! Engine md WS ────────┼──►│ Sequencer/ │───►│  Session   │──► Session 1
//!                      │   │   Router   │    │  Registry  │──► Session 2
//! Engine heartbeat ◄───┘   └────────────┘    └────────────┘──► Session N
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core bridging types with no external integrations.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::market_data::{
    MarketDataTick, Sequencer, TickFields, Topic, TopicSnapshot,
};
pub use domain::order::{
    OrderCommand, OrderEvent, OrderEventKind, OrderRecord, OrderState, OrderStatusReport,
};
pub use domain::subscription::{SessionId, SubscriptionStats, SubscriptionTable};

// Application services and ports
pub use application::ports::{
    BackendCommands, CommandError, CommandResult, SessionPayload, SessionRegistry,
};
pub use application::services::{
    CommandCorrelator, MarketDataPipeline, OrderEngine, PipelineSignal, TopicRouter,
    UpstreamChange,
};

// Infrastructure config
pub use infrastructure::config::{BridgeConfig, ConfigError};

// Backend adapter (for integration tests)
pub use infrastructure::backend::{
    BackendCommandService, BackendSignal, CommandTransport, ConnectionHealth, HealthSnapshot,
    HealthState, WireAdapter, WireAdapterHandles,
};

// Session registry
pub use infrastructure::sessions::ChannelSessionRegistry;

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::init as init_telemetry;
