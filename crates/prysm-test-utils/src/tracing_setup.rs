//! Tracing initialisation helpers for tests.
//!
//! The subscriber is initialised at most once per process, so
//! [`init_test_tracing`] is safe to call from every test function.

use tracing_subscriber::EnvFilter;

/// Install a subscriber that writes to the test-harness writer and respects
/// `RUST_LOG` (default `info`). Later calls are ignored.
///
/// ```ignore
/// #[tokio::test]
/// async fn my_test() {
///     prysm_test_utils::init_test_tracing();
///     tracing::info!("visible when RUST_LOG=info");
/// }
/// ```
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}
