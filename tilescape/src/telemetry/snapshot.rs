/// Point-in-time copy of an engine's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Ready tiles served from the store instead of re-rendered.
    pub tiles_reused: u64,
    /// Tiles queued for background rendering.
    pub tiles_scheduled: u64,
    /// Background renders that completed and attached an image.
    pub renders_completed: u64,
    /// Background renders that failed, leaving their tile pending.
    pub renders_failed: u64,
    /// Passes that passed validation and scheduled work.
    pub passes_scheduled: u64,
    /// Passes dropped by the minimum inter-pass interval.
    pub passes_throttled: u64,
    /// Passes rejected because another pass was in progress.
    pub passes_rejected: u64,
    /// Layer invalidations after upstream data changes.
    pub layers_invalidated: u64,
}

impl MetricsSnapshot {
    /// Total tiles that were either reused or scheduled, i.e. the grid cells
    /// classified across all passes.
    pub fn tiles_touched(&self) -> u64 {
        self.tiles_reused + self.tiles_scheduled
    }
}
