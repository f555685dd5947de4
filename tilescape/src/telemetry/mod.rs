//! Engine telemetry and logging setup.
//!
//! [`RenderMetrics`] collects lock-free counters from factories, queues and
//! the engine. It is created with the engine and reset on demand; there is no
//! global state. [`MetricsSnapshot`] is a point-in-time copy for display.
//!
//! ```text
//! Factories / Queue / Engine ──► RenderMetrics ──► MetricsSnapshot ──► Views
//!                                (atomic counters)  (point-in-time copy)
//! ```

mod metrics;
mod snapshot;

pub use metrics::RenderMetrics;
pub use snapshot::MetricsSnapshot;

use tracing_subscriber::EnvFilter;

/// Installs a `tracing` fmt subscriber filtered by `RUST_LOG`.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}
