//! Structured Logging Setup
//!
//! Initializes the `tracing` subscriber with an environment-driven filter.
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: Standard filter directives (e.g. `engine_bridge=debug`)

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Initialize the global tracing subscriber.
///
/// Safe to call more than once; subsequent calls are no-ops.
#[allow(clippy::expect_used)]
pub fn init() {
    let env_filter = EnvFilter::from_default_env().add_directive(
        "engine_bridge=info"
            .parse()
            .expect("static directive 'engine_bridge=info' is valid"),
    );

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init();
}
