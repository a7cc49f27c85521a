//! Shared test helpers

use tracing_subscriber::EnvFilter;

/// Route store logs to the test output (`RUST_LOG=frame_store=debug`)
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
