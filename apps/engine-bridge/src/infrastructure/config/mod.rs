//! Configuration Module
//!
//! Configuration loading for the engine bridge.

mod settings;

pub use settings::{
    BackendSettings, BridgeConfig, CommandSettings, ConfigError, ConnectionSettings,
    PipelineSettings,
};
