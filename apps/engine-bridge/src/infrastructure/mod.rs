//! Infrastructure layer - Adapters and external integrations.

pub mod backend;
pub mod config;
pub mod metrics;
pub mod sessions;
pub mod telemetry;
