//! Background render scheduling for one pass.
//!
//! A [`RenderQueue`] collects the "needs render" tiles of a single intersect
//! call, then executes them concurrently on the engine's runtime, bounded by
//! the [`RenderScheduler`]'s semaphore. The [`InFlightRegistry`] is shared
//! across all factories and passes of an engine: a key claimed there is
//! already being rendered somewhere, and a second pass wanting the same key
//! reuses the pending entity instead of scheduling a duplicate.
//!
//! Failure of a single tile render never aborts the rest of the pass. The
//! worker logs it, counts it and leaves the tile pending so that a later pass
//! retries it.

use crate::layer::RenderSource;
use crate::store::PartialStore;
use crate::telemetry::RenderMetrics;
use crate::tile::{RenderedTile, TileId};
use dashmap::DashSet;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Callback invoked once per tile as its render completes.
pub type OnTileReady = Arc<dyn Fn() + Send + Sync>;

/// Set of tile keys with a render currently in flight.
///
/// Owned by the engine and shared by every factory and queue, so that
/// concurrent passes never schedule the same key twice.
#[derive(Debug, Default)]
pub struct InFlightRegistry {
    keys: DashSet<TileId>,
}

impl InFlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims a key for rendering. Returns false when a render for the key
    /// is already in flight.
    pub fn begin(&self, id: &TileId) -> bool {
        self.keys.insert(id.clone())
    }

    /// Releases a key after its render completed or failed.
    pub fn finish(&self, id: &TileId) {
        self.keys.remove(id);
    }

    /// True while a render for the key is in flight.
    pub fn is_in_progress(&self, id: &TileId) -> bool {
        self.keys.contains(id)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Handle onto the engine's render runtime plus the concurrency bound.
///
/// The bound is resource tuning, not a correctness invariant: any positive
/// permit count renders every scheduled tile eventually.
#[derive(Debug, Clone)]
pub struct RenderScheduler {
    handle: Handle,
    permits: Arc<Semaphore>,
    max_concurrent: usize,
}

impl RenderScheduler {
    /// Creates a scheduler spawning onto `handle` with at most
    /// `max_concurrent` renders in flight.
    pub fn new(handle: Handle, max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            handle,
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    fn handle(&self) -> &Handle {
        &self.handle
    }

    fn permits(&self) -> Arc<Semaphore> {
        Arc::clone(&self.permits)
    }
}

/// The render tasks of one pass for one layer.
///
/// Created lazily by the factory when the first missing tile is found, filled
/// during grid classification, then started once. The queue does not outlive
/// its pass; completed tiles live on in the store.
pub struct RenderQueue {
    tasks: Vec<Arc<RenderedTile>>,
    source: Arc<dyn RenderSource>,
    store: Arc<PartialStore>,
    in_flight: Arc<InFlightRegistry>,
    metrics: Arc<RenderMetrics>,
    on_ready: OnTileReady,
}

impl RenderQueue {
    pub fn new(
        source: Arc<dyn RenderSource>,
        store: Arc<PartialStore>,
        in_flight: Arc<InFlightRegistry>,
        metrics: Arc<RenderMetrics>,
        on_ready: OnTileReady,
    ) -> Self {
        Self {
            tasks: Vec::new(),
            source,
            store,
            in_flight,
            metrics,
            on_ready,
        }
    }

    /// Registers a tile for rendering in this pass.
    ///
    /// Claims the key in the shared registry first; when another pass already
    /// has a render in flight for the same key, the task is dropped and the
    /// caller keeps the pending entity as a placeholder. Returns whether the
    /// tile was actually queued.
    pub fn add_task(&mut self, tile: Arc<RenderedTile>) -> bool {
        if !self.in_flight.begin(tile.id()) {
            debug!(tile = %tile.id(), "Render already in flight, not scheduling twice");
            return false;
        }
        self.metrics.tile_scheduled();
        self.tasks.push(tile);
        true
    }

    /// Number of tiles queued so far.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Spawns every queued task onto the scheduler's runtime.
    ///
    /// Each task acquires a concurrency permit, runs the render source on a
    /// blocking worker, attaches the image on success, publishes the store's
    /// ready event and invokes the pass callback. The registry claim is
    /// released in every outcome.
    pub fn start(self, scheduler: &RenderScheduler) {
        debug!(tasks = self.tasks.len(), "Starting render queue");

        for tile in self.tasks {
            let permits = scheduler.permits();
            let source = Arc::clone(&self.source);
            let store = Arc::clone(&self.store);
            let in_flight = Arc::clone(&self.in_flight);
            let metrics = Arc::clone(&self.metrics);
            let on_ready = Arc::clone(&self.on_ready);

            scheduler.handle().spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .expect("render semaphore closed");

                let envelope = tile.id().envelope();
                let (width, height) = (tile.width_px(), tile.height_px());
                let render_source = Arc::clone(&source);
                let rendered = tokio::task::spawn_blocking(move || {
                    render_source.render(&envelope, width, height)
                })
                .await;

                match rendered {
                    Ok(Ok(image)) => {
                        tile.attach(image);
                        metrics.render_completed();
                        store.publish_ready(tile.id());
                        on_ready();
                    }
                    Ok(Err(err)) => {
                        // Tile stays pending; a later pass retries it.
                        metrics.render_failed();
                        warn!(tile = %tile.id(), error = %err, "Tile render failed");
                    }
                    Err(join_err) => {
                        metrics.render_failed();
                        warn!(tile = %tile.id(), error = %join_err, "Tile render panicked");
                    }
                }

                in_flight.finish(tile.id());
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RenderError;
    use crate::geom::{Crs, Envelope};
    use crate::tile::LayerId;
    use image::{Rgba, RgbaImage};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    struct SolidSource {
        color: Rgba<u8>,
    }

    impl RenderSource for SolidSource {
        fn render(
            &self,
            _envelope: &Envelope,
            width: u32,
            height: u32,
        ) -> Result<RgbaImage, RenderError> {
            Ok(RgbaImage::from_pixel(width, height, self.color))
        }
    }

    struct FailingSource;

    impl RenderSource for FailingSource {
        fn render(
            &self,
            _envelope: &Envelope,
            _width: u32,
            _height: u32,
        ) -> Result<RgbaImage, RenderError> {
            Err(RenderError::Source("no data".to_string()))
        }
    }

    fn pending_tile(min_x: f64, min_y: f64) -> Arc<RenderedTile> {
        let envelope = Envelope::new(min_x, min_y, min_x + 2.0, min_y + 2.0, Crs::wgs84());
        let id = TileId::new(LayerId::new("roads"), &envelope);
        Arc::new(RenderedTile::new_pending(id, 64, 64))
    }

    fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if done() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        done()
    }

    fn queue_parts() -> (
        Arc<PartialStore>,
        Arc<InFlightRegistry>,
        Arc<RenderMetrics>,
    ) {
        (
            Arc::new(PartialStore::new()),
            Arc::new(InFlightRegistry::new()),
            Arc::new(RenderMetrics::new()),
        )
    }

    #[test]
    fn test_registry_claim_and_release() {
        let registry = InFlightRegistry::new();
        let tile = pending_tile(0.0, 0.0);

        assert!(!registry.is_in_progress(tile.id()));
        assert!(registry.begin(tile.id()));
        assert!(registry.is_in_progress(tile.id()));
        assert!(!registry.begin(tile.id()));

        registry.finish(tile.id());
        assert!(!registry.is_in_progress(tile.id()));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_add_task_dedupes_same_key() {
        let (store, in_flight, metrics) = queue_parts();
        let source: Arc<dyn RenderSource> = Arc::new(SolidSource {
            color: Rgba([0, 0, 0, 255]),
        });
        let on_ready: OnTileReady = Arc::new(|| {});

        let mut first = RenderQueue::new(
            Arc::clone(&source),
            Arc::clone(&store),
            Arc::clone(&in_flight),
            Arc::clone(&metrics),
            Arc::clone(&on_ready),
        );
        let mut second = RenderQueue::new(source, store, in_flight, metrics, on_ready);

        let tile = pending_tile(0.0, 0.0);
        assert!(first.add_task(Arc::clone(&tile)));
        // A concurrent pass wanting the same key must not schedule again.
        assert!(!second.add_task(tile));
        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
    }

    #[test]
    fn test_start_renders_all_tasks() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let scheduler = RenderScheduler::new(rt.handle().clone(), 2);
        let (store, in_flight, metrics) = queue_parts();

        let completions = Arc::new(AtomicUsize::new(0));
        let on_ready: OnTileReady = {
            let completions = Arc::clone(&completions);
            Arc::new(move || {
                completions.fetch_add(1, Ordering::SeqCst);
            })
        };

        let mut queue = RenderQueue::new(
            Arc::new(SolidSource {
                color: Rgba([10, 20, 30, 255]),
            }),
            Arc::clone(&store),
            Arc::clone(&in_flight),
            Arc::clone(&metrics),
            on_ready,
        );

        let tiles: Vec<_> = (0..5).map(|i| pending_tile(f64::from(i) * 2.0, 0.0)).collect();
        for tile in &tiles {
            assert!(queue.add_task(Arc::clone(tile)));
        }
        queue.start(&scheduler);

        assert!(wait_until(Duration::from_secs(5), || {
            tiles.iter().all(|t| t.is_ready())
        }));
        assert_eq!(completions.load(Ordering::SeqCst), 5);
        assert_eq!(metrics.snapshot().renders_completed, 5);
        assert!(wait_until(Duration::from_secs(1), || in_flight.is_empty()));
    }

    #[test]
    fn test_failed_render_does_not_abort_pass() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let scheduler = RenderScheduler::new(rt.handle().clone(), 2);
        let (store, in_flight, metrics) = queue_parts();
        let on_ready: OnTileReady = Arc::new(|| {});

        // One queue with a failing source, one with a working source; the
        // failure must not stop the other tile from completing.
        let failing_tile = pending_tile(0.0, 0.0);
        let mut failing_queue = RenderQueue::new(
            Arc::new(FailingSource),
            Arc::clone(&store),
            Arc::clone(&in_flight),
            Arc::clone(&metrics),
            Arc::clone(&on_ready),
        );
        assert!(failing_queue.add_task(Arc::clone(&failing_tile)));
        failing_queue.start(&scheduler);

        let good_tile = pending_tile(2.0, 0.0);
        let mut good_queue = RenderQueue::new(
            Arc::new(SolidSource {
                color: Rgba([1, 2, 3, 255]),
            }),
            Arc::clone(&store),
            Arc::clone(&in_flight),
            Arc::clone(&metrics),
            on_ready,
        );
        assert!(good_queue.add_task(Arc::clone(&good_tile)));
        good_queue.start(&scheduler);

        assert!(wait_until(Duration::from_secs(5), || good_tile.is_ready()));
        assert!(wait_until(Duration::from_secs(1), || in_flight.is_empty()));

        // The failed tile stays pending so a later pass can retry it.
        assert!(!failing_tile.is_ready());
        assert_eq!(metrics.snapshot().renders_failed, 1);
        assert_eq!(metrics.snapshot().renders_completed, 1);
    }

    #[test]
    fn test_failed_key_can_be_rescheduled() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let scheduler = RenderScheduler::new(rt.handle().clone(), 1);
        let (store, in_flight, metrics) = queue_parts();
        let on_ready: OnTileReady = Arc::new(|| {});

        let tile = pending_tile(0.0, 0.0);
        let mut queue = RenderQueue::new(
            Arc::new(FailingSource),
            Arc::clone(&store),
            Arc::clone(&in_flight),
            Arc::clone(&metrics),
            Arc::clone(&on_ready),
        );
        assert!(queue.add_task(Arc::clone(&tile)));
        queue.start(&scheduler);

        assert!(wait_until(Duration::from_secs(5), || in_flight.is_empty()));

        // The registry claim was released, so the next pass can schedule the
        // same key again.
        let mut retry = RenderQueue::new(
            Arc::new(SolidSource {
                color: Rgba([9, 9, 9, 255]),
            }),
            store,
            in_flight,
            metrics,
            on_ready,
        );
        assert!(retry.add_task(Arc::clone(&tile)));
        retry.start(&scheduler);
        assert!(wait_until(Duration::from_secs(5), || tile.is_ready()));
    }
}
