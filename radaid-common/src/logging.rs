//! Tracing subscriber setup
//!
//! Shared by binaries and integration tests. Respects `RUST_LOG`; defaults
//! to `info` for radaid crates when unset.

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;

static INIT: OnceCell<()> = OnceCell::new();

/// Install the global tracing subscriber. Safe to call more than once;
/// subsequent calls are no-ops.
pub fn init_tracing() {
    INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,radaid_triage=debug"));
        // try_init so a subscriber installed by the host process wins
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init();
    });
}
