//! Structured logging initialization, shared by the binary and by tests
//! that want readable output (`RUST_LOG=agentcore=debug cargo test -- --nocapture`).

use tracing_subscriber::EnvFilter;

pub fn init_tracing(filter: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter.to_string()));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        tracing::debug!("tracing subscriber already installed, skipping");
    }
}
