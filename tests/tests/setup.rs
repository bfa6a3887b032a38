//! Shared runtime for the integration tests.
//!
//! Tests are plain synchronous `#[rstest]` functions that drive async code
//! through `SERVER_RT.block_on`. Fixture servers spawned from one test keep
//! running on this runtime until the process exits.

use std::sync::{LazyLock, Once};

use tracing_subscriber::EnvFilter;

pub static SERVER_RT: LazyLock<tokio::runtime::Runtime> = LazyLock::new(|| {
    init_tracing();
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .expect("failed to build test runtime")
});

static TRACING: Once = Once::new();

/// Logs go to the test writer and are filtered by `RUST_LOG` (default: off).
fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}
