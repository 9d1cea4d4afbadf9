//! Integration tests for netsim.
//!
//! These tests exercise complete scenarios end to end: HTTP and HTTPS
//! fetches across simulated stacks, DNS over several transports, and the
//! censorship filters (poisoning, RST injection, blackholing, DNAT).
//!
//! Set `RUST_LOG=netsim=trace` to watch packets flow.

use std::sync::Once;

pub mod censorship;
pub mod dns;
pub mod http;
pub mod router;

static INIT: Once = Once::new();

/// Installs a test-friendly tracing subscriber once per process.
pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}
