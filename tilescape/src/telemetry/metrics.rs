use super::MetricsSnapshot;
use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free counters for one engine instance.
///
/// All updates use relaxed ordering; the counters are observability only and
/// never synchronize other state.
#[derive(Debug, Default)]
pub struct RenderMetrics {
    tiles_reused: AtomicU64,
    tiles_scheduled: AtomicU64,
    renders_completed: AtomicU64,
    renders_failed: AtomicU64,
    passes_scheduled: AtomicU64,
    passes_throttled: AtomicU64,
    passes_rejected: AtomicU64,
    layers_invalidated: AtomicU64,
}

impl RenderMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// A ready tile was served from the store instead of re-rendered.
    pub fn tile_reused(&self) {
        self.tiles_reused.fetch_add(1, Ordering::Relaxed);
    }

    /// A tile was queued for background rendering.
    pub fn tile_scheduled(&self) {
        self.tiles_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    /// A background render finished and attached its image.
    pub fn render_completed(&self) {
        self.renders_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// A background render failed; the tile stays pending.
    pub fn render_failed(&self) {
        self.renders_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// A pass passed validation and scheduled work.
    pub fn pass_scheduled(&self) {
        self.passes_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    /// A pass arrived inside the minimum inter-pass interval.
    pub fn pass_throttled(&self) {
        self.passes_throttled.fetch_add(1, Ordering::Relaxed);
    }

    /// A pass arrived while another pass held the lock.
    pub fn pass_rejected(&self) {
        self.passes_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// A layer's cached tiles were invalidated after a data change.
    pub fn layer_invalidated(&self) {
        self.layers_invalidated.fetch_add(1, Ordering::Relaxed);
    }

    /// Takes a point-in-time copy of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            tiles_reused: self.tiles_reused.load(Ordering::Relaxed),
            tiles_scheduled: self.tiles_scheduled.load(Ordering::Relaxed),
            renders_completed: self.renders_completed.load(Ordering::Relaxed),
            renders_failed: self.renders_failed.load(Ordering::Relaxed),
            passes_scheduled: self.passes_scheduled.load(Ordering::Relaxed),
            passes_throttled: self.passes_throttled.load(Ordering::Relaxed),
            passes_rejected: self.passes_rejected.load(Ordering::Relaxed),
            layers_invalidated: self.layers_invalidated.load(Ordering::Relaxed),
        }
    }

    /// Zeroes every counter.
    pub fn reset(&self) {
        self.tiles_reused.store(0, Ordering::Relaxed);
        self.tiles_scheduled.store(0, Ordering::Relaxed);
        self.renders_completed.store(0, Ordering::Relaxed);
        self.renders_failed.store(0, Ordering::Relaxed);
        self.passes_scheduled.store(0, Ordering::Relaxed);
        self.passes_throttled.store(0, Ordering::Relaxed);
        self.passes_rejected.store(0, Ordering::Relaxed);
        self.layers_invalidated.store(0, Ordering::Relaxed);
    }
}
