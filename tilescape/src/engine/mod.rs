//! The orchestrating rendering engine.
//!
//! [`CachedRenderEngine`] ties the pieces together: it owns the tile store,
//! the in-flight registry, a tokio runtime for background renders and one
//! [`TileFactory`] per project layer. A UI drives it with two calls:
//!
//! ```text
//!   viewport change ──► prepare_pass ──► factories schedule missing tiles
//!   repaint event   ──► paint        ──► compose last results onto a Canvas
//! ```
//!
//! `prepare_pass` returns as soon as scheduling is done; completed tiles
//! announce themselves on the event channel and the next `paint` picks them
//! up. Passes are mutually exclusive (a concurrent call is rejected, not
//! queued) and rate limited by a minimum inter-pass interval, so UI event
//! storms cannot flood the render pipeline.

mod canvas;
mod gate;

pub use canvas::{Canvas, PixmapCanvas};
pub use gate::{PassGate, PassGuard};

use crate::error::EngineError;
use crate::factory::{QueryResult, TileFactory};
use crate::geom::{round_coord, Envelope, ScreenRect};
use crate::layer::ProjectView;
use crate::queue::{InFlightRegistry, OnTileReady, RenderScheduler};
use crate::store::PartialStore;
use crate::telemetry::{MetricsSnapshot, RenderMetrics};
use crate::tile::LayerId;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Runtime;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Pixel side of every cached tile.
pub const DEFAULT_TILE_SIDE_PX: u32 = 500;

/// Lower bound on the derived tile side in world units. Stricter than the
/// factory's own floor; a request below this is a broken viewport, not a
/// deep zoom.
const MIN_TILE_SIDE_WU: f64 = 0.1;

/// Poll period of [`CachedRenderEngine::wait_for_pass`].
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Engine tuning knobs. `Default` matches interactive-UI use.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Pixel side of cached tiles.
    pub tile_side_px: u32,
    /// Minimum interval between two scheduled passes; calls arriving sooner
    /// are throttled.
    pub min_pass_interval: Duration,
    /// Clamp the tile side between a tenth of the project extent and the
    /// full extent.
    pub scale_limited: bool,
    /// Draw tile outlines and indices when painting.
    pub debug_frames: bool,
    /// Upper bound on concurrently running tile renders.
    pub max_concurrent_renders: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tile_side_px: DEFAULT_TILE_SIDE_PX,
            min_pass_interval: Duration::from_millis(50),
            scale_limited: true,
            debug_frames: false,
            max_concurrent_renders: std::thread::available_parallelism()
                .map(usize::from)
                .unwrap_or(4),
        }
    }
}

/// What happened to a `prepare_pass` call that passed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// The pass ran; factories scheduled whatever was missing.
    Scheduled,
    /// Dropped by the minimum inter-pass interval.
    Throttled,
    /// Another pass held the gate; nothing happened.
    Rejected,
}

/// Engine notifications for repaint drivers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderEvent {
    /// A tile of the named layer finished rendering; repainting will show it.
    TileRendered(LayerId),
}

/// Mutable pass state, touched only under the gate.
struct PassState {
    factories: HashMap<LayerId, Arc<TileFactory>>,
    side_wu: f64,
    min_side_wu: f64,
    max_side_wu: f64,
}

/// Tile-cache rendering engine for one project.
///
/// Owns its runtime, so it is fully usable from plain threads; no caller
/// needs an async context.
pub struct CachedRenderEngine {
    project: Arc<dyn ProjectView>,
    config: EngineConfig,
    scale_limited: AtomicBool,
    debug_frames: AtomicBool,
    store: Arc<PartialStore>,
    in_flight: Arc<InFlightRegistry>,
    metrics: Arc<RenderMetrics>,
    scheduler: RenderScheduler,
    gate: PassGate,
    /// Locked only for instants; a running pass must never block the
    /// throttle check of a concurrent caller.
    last_pass: Mutex<Option<Instant>>,
    state: Mutex<PassState>,
    /// Last pass results in z-order, bottom layer first.
    results: RwLock<Vec<(LayerId, QueryResult)>>,
    events: broadcast::Sender<RenderEvent>,
    // Dropped last; keeps the scheduler's handle alive.
    _runtime: Runtime,
}

impl CachedRenderEngine {
    pub fn new(project: Arc<dyn ProjectView>, config: EngineConfig) -> Result<Self, EngineError> {
        // Zero-size tiles would divide scale() by zero; floor at one pixel.
        let config = EngineConfig {
            tile_side_px: config.tile_side_px.max(1),
            ..config
        };
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("tilescape-render")
            .enable_time()
            .build()?;
        let scheduler = RenderScheduler::new(runtime.handle().clone(), config.max_concurrent_renders);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            project,
            scale_limited: AtomicBool::new(config.scale_limited),
            debug_frames: AtomicBool::new(config.debug_frames),
            config,
            store: Arc::new(PartialStore::new()),
            in_flight: Arc::new(InFlightRegistry::new()),
            metrics: Arc::new(RenderMetrics::new()),
            scheduler,
            gate: PassGate::new(),
            last_pass: Mutex::new(None),
            state: Mutex::new(PassState {
                factories: HashMap::new(),
                side_wu: 0.0,
                min_side_wu: 0.0,
                max_side_wu: 0.0,
            }),
            results: RwLock::new(Vec::new()),
            events,
            _runtime: runtime,
        })
    }

    /// Prepares the next paint for the given viewport.
    ///
    /// Validates input, applies rate limiting and mutual exclusion, then
    /// walks every project layer in z-order: rebuilds stale render sources
    /// (invalidating the layer's cached tiles), intersects the tile grid and
    /// stores the result for [`paint`]. Returns once scheduling is done;
    /// the actual rendering continues in the background.
    ///
    /// [`paint`]: CachedRenderEngine::paint
    pub fn prepare_pass(
        &self,
        world: &Envelope,
        width_px: u32,
        height_px: u32,
    ) -> Result<PassOutcome, EngineError> {
        if world.is_degenerate() {
            return Err(EngineError::InvalidEnvelope(world.clone()));
        }
        if width_px == 0 || height_px == 0 {
            return Err(EngineError::InvalidPixelSize {
                width: width_px,
                height: height_px,
            });
        }
        let project_crs = self.project.crs();
        if world.crs() != &project_crs {
            return Err(EngineError::CrsMismatch {
                requested: world.crs().clone(),
                project: project_crs,
            });
        }

        // Rate limit before contending on the gate.
        {
            let last_pass = self.last_pass.lock();
            if let Some(last) = *last_pass {
                if last.elapsed() < self.config.min_pass_interval {
                    self.metrics.pass_throttled();
                    return Ok(PassOutcome::Throttled);
                }
            }
        }

        let Some(_guard) = self.gate.try_acquire() else {
            debug!("Render pass already in progress, rejecting");
            self.metrics.pass_rejected();
            return Ok(PassOutcome::Rejected);
        };

        *self.last_pass.lock() = Some(Instant::now());
        let world = world.normalized();
        let mut state = self.state.lock();

        let extent = self.project.max_bounds().width();
        state.min_side_wu = round_coord(extent / 10.0);
        state.max_side_wu = round_coord(extent);

        let mut side =
            world.width() * f64::from(self.config.tile_side_px) / f64::from(width_px);
        side = side.max(MIN_TILE_SIDE_WU);
        if self.scale_limited.load(Ordering::Relaxed) && state.min_side_wu < state.max_side_wu {
            side = side.clamp(state.min_side_wu, state.max_side_wu);
        }
        let side = round_coord(side);
        state.side_wu = side;

        let layers = self.project.layers();
        let current: HashSet<LayerId> = layers.iter().map(|layer| layer.id().clone()).collect();
        state.factories.retain(|id, _| current.contains(id));

        let mut results = Vec::with_capacity(layers.len());
        for layer in &layers {
            let factory = match state.factories.get(layer.id()) {
                Some(factory) => {
                    if layer.is_stale(factory.source().as_ref()) {
                        info!(layer = %layer.id(), "Layer data changed, invalidating cached tiles");
                        factory.set_source(layer.build_render_source());
                        self.store.delete_layer(layer.id());
                        self.metrics.layer_invalidated();
                    }
                    Arc::clone(factory)
                }
                None => {
                    let factory = Arc::new(TileFactory::new(
                        layer.id().clone(),
                        layer.build_render_source(),
                        Arc::clone(&self.store),
                        Arc::clone(&self.in_flight),
                        Arc::clone(&self.metrics),
                        self.config.tile_side_px,
                    ));
                    state.factories.insert(layer.id().clone(), Arc::clone(&factory));
                    factory
                }
            };

            let on_ready: OnTileReady = {
                let events = self.events.clone();
                let id = layer.id().clone();
                Arc::new(move || {
                    let _ = events.send(RenderEvent::TileRendered(id.clone()));
                })
            };
            if let Some(result) = factory.intersect(&world, side, &self.scheduler, on_ready) {
                results.push((layer.id().clone(), result));
            }
        }

        let snapshot = self.metrics.snapshot();
        debug!(
            layers = results.len(),
            side_wu = side,
            tiles_touched = snapshot.tiles_touched(),
            "Scheduled render pass"
        );
        *self.results.write() = results;
        self.metrics.pass_scheduled();
        Ok(PassOutcome::Scheduled)
    }

    /// Prepares a pass showing the whole project extent.
    pub fn fit_whole_map(&self, width_px: u32, height_px: u32) -> Result<PassOutcome, EngineError> {
        let bounds = self.project.max_bounds();
        self.prepare_pass(&bounds, width_px, height_px)
    }

    /// Composes the last pass results onto the canvas, bottom layer first.
    ///
    /// Skipped entirely while a pass holds the gate, so a paint never
    /// observes half-updated results. Pending tiles are simply not drawn;
    /// their completion triggers a [`RenderEvent`] and the next paint fills
    /// the hole.
    pub fn paint(&self, canvas: &mut dyn Canvas) {
        if self.gate.is_locked() {
            debug!("Render pass in progress, skipping paint");
            return;
        }
        let debug_frames = self.debug_frames.load(Ordering::Relaxed);

        let results = self.results.read();
        for (layer, result) in results.iter() {
            let transform = result.transform();
            for (index, tile) in result.tiles().iter().enumerate() {
                let Some(image) = tile.image() else { continue };
                let envelope = tile.id().envelope();
                let (x, y) = transform.apply(envelope.min_x(), envelope.max_y());
                let (x, y) = (x.round() as i32, y.round() as i32);
                canvas.draw_image(&image, x, y);
                if debug_frames {
                    canvas.draw_rect(ScreenRect::new(x, y, tile.width_px(), tile.height_px()));
                    canvas.draw_text(&format!("{layer} #{index}"), x + 4, y + 16);
                }
            }
        }
    }

    /// Blocks until every tile of the latest pass is rendered.
    ///
    /// For offline and export callers; interactive UIs listen on
    /// [`subscribe`] instead.
    ///
    /// [`subscribe`]: CachedRenderEngine::subscribe
    pub fn wait_for_pass(&self) {
        while !self.wait_for_pass_timeout(Duration::from_secs(1)) {}
    }

    /// Like [`wait_for_pass`] but gives up after `timeout`, returning whether
    /// the pass completed.
    ///
    /// [`wait_for_pass`]: CachedRenderEngine::wait_for_pass
    pub fn wait_for_pass_timeout(&self, timeout: Duration) -> bool {
        let start = Instant::now();
        loop {
            let done = !self.gate.is_locked()
                && self
                    .results
                    .read()
                    .iter()
                    .all(|(_, result)| result.is_complete());
            if done {
                return true;
            }
            if start.elapsed() >= timeout {
                return false;
            }
            std::thread::sleep(WAIT_POLL_INTERVAL);
        }
    }

    /// Subscribes to engine notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<RenderEvent> {
        self.events.subscribe()
    }

    /// World units per pixel of the last pass.
    pub fn scale(&self) -> f64 {
        self.state.lock().side_wu / f64::from(self.config.tile_side_px)
    }

    /// Tile side of the last pass in world units.
    pub fn tile_side_wu(&self) -> f64 {
        self.state.lock().side_wu
    }

    /// Current scale limits in world units, derived from the project extent
    /// on the last pass.
    pub fn tile_side_limits_wu(&self) -> (f64, f64) {
        let state = self.state.lock();
        (state.min_side_wu, state.max_side_wu)
    }

    pub fn set_scale_limited(&self, limited: bool) {
        self.scale_limited.store(limited, Ordering::Relaxed);
    }

    pub fn set_debug_frames(&self, enabled: bool) {
        self.debug_frames.store(enabled, Ordering::Relaxed);
    }

    /// The engine's tile store. Shared with render workers; exposed for
    /// diagnostics.
    pub fn store(&self) -> &Arc<PartialStore> {
        &self.store
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn reset_metrics(&self) {
        self.metrics.reset();
    }
}

impl std::fmt::Debug for CachedRenderEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedRenderEngine")
            .field("tile_side_px", &self.config.tile_side_px)
            .field("cached_tiles", &self.store.len())
            .field("pass_locked", &self.gate.is_locked())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RenderError;
    use crate::geom::Crs;
    use crate::layer::{MapLayer, RenderSource};
    use image::{Rgba, RgbaImage};
    use std::sync::atomic::AtomicU64;

    struct TestSource {
        color: Rgba<u8>,
        revision: u64,
        fail: bool,
    }

    impl RenderSource for TestSource {
        fn render(
            &self,
            _envelope: &Envelope,
            width: u32,
            height: u32,
        ) -> Result<RgbaImage, RenderError> {
            if self.fail {
                return Err(RenderError::Source("backing data offline".to_string()));
            }
            Ok(RgbaImage::from_pixel(width, height, self.color))
        }

        fn revision(&self) -> u64 {
            self.revision
        }
    }

    struct TestLayer {
        id: LayerId,
        color: Rgba<u8>,
        version: AtomicU64,
        fail: bool,
    }

    impl TestLayer {
        fn new(id: &str, color: Rgba<u8>) -> Arc<Self> {
            Arc::new(Self {
                id: LayerId::new(id),
                color,
                version: AtomicU64::new(0),
                fail: false,
            })
        }

        fn failing(id: &str) -> Arc<Self> {
            Arc::new(Self {
                id: LayerId::new(id),
                color: Rgba([0, 0, 0, 255]),
                version: AtomicU64::new(0),
                fail: true,
            })
        }

        fn touch(&self) {
            self.version.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl MapLayer for TestLayer {
        fn id(&self) -> &LayerId {
            &self.id
        }

        fn build_render_source(&self) -> Arc<dyn RenderSource> {
            Arc::new(TestSource {
                color: self.color,
                revision: self.version.load(Ordering::SeqCst),
                fail: self.fail,
            })
        }

        fn is_stale(&self, source: &dyn RenderSource) -> bool {
            source.revision() != self.version.load(Ordering::SeqCst)
        }
    }

    struct TestProject {
        crs: Crs,
        bounds: Envelope,
        layers: Vec<Arc<dyn MapLayer>>,
        layer_list_delay: Duration,
    }

    impl TestProject {
        fn new(layers: Vec<Arc<TestLayer>>) -> Arc<Self> {
            Arc::new(Self {
                crs: Crs::wgs84(),
                bounds: Envelope::new(0.0, 0.0, 100.0, 100.0, Crs::wgs84()),
                layers: layers
                    .into_iter()
                    .map(|layer| layer as Arc<dyn MapLayer>)
                    .collect(),
                layer_list_delay: Duration::ZERO,
            })
        }
    }

    impl ProjectView for TestProject {
        fn crs(&self) -> Crs {
            self.crs.clone()
        }

        fn max_bounds(&self) -> Envelope {
            self.bounds.clone()
        }

        fn layers(&self) -> Vec<Arc<dyn MapLayer>> {
            if !self.layer_list_delay.is_zero() {
                std::thread::sleep(self.layer_list_delay);
            }
            self.layers.clone()
        }
    }

    fn test_config() -> EngineConfig {
        EngineConfig {
            tile_side_px: 10,
            min_pass_interval: Duration::ZERO,
            scale_limited: false,
            debug_frames: false,
            max_concurrent_renders: 4,
        }
    }

    fn viewport(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Envelope {
        Envelope::new(min_x, min_y, max_x, max_y, Crs::wgs84())
    }

    #[test]
    fn test_degenerate_envelope_is_an_error() {
        let engine = CachedRenderEngine::new(
            TestProject::new(vec![TestLayer::new("base", Rgba([1, 2, 3, 255]))]),
            test_config(),
        )
        .unwrap();

        let result = engine.prepare_pass(&viewport(5.0, 5.0, 5.0, 10.0), 100, 100);
        assert!(matches!(result, Err(EngineError::InvalidEnvelope(_))));
        assert_eq!(engine.metrics().passes_scheduled, 0);
    }

    #[test]
    fn test_zero_pixel_size_is_an_error() {
        let engine = CachedRenderEngine::new(
            TestProject::new(vec![TestLayer::new("base", Rgba([1, 2, 3, 255]))]),
            test_config(),
        )
        .unwrap();

        let result = engine.prepare_pass(&viewport(0.0, 0.0, 10.0, 10.0), 0, 100);
        assert!(matches!(
            result,
            Err(EngineError::InvalidPixelSize { width: 0, height: 100 })
        ));
    }

    #[test]
    fn test_crs_mismatch_is_an_error() {
        let engine = CachedRenderEngine::new(
            TestProject::new(vec![TestLayer::new("base", Rgba([1, 2, 3, 255]))]),
            test_config(),
        )
        .unwrap();

        let mercator = Envelope::new(0.0, 0.0, 10.0, 10.0, Crs::new("EPSG:3857"));
        let result = engine.prepare_pass(&mercator, 100, 100);
        assert!(matches!(result, Err(EngineError::CrsMismatch { .. })));
    }

    #[test]
    fn test_pass_schedules_and_completes() {
        let engine = CachedRenderEngine::new(
            TestProject::new(vec![TestLayer::new("base", Rgba([50, 60, 70, 255]))]),
            test_config(),
        )
        .unwrap();

        let outcome = engine
            .prepare_pass(&viewport(0.0, 0.0, 4.0, 4.0), 20, 20)
            .unwrap();
        assert_eq!(outcome, PassOutcome::Scheduled);

        assert!(engine.wait_for_pass_timeout(Duration::from_secs(5)));
        // 4 wu wide at 20 px with 10 px tiles: side 2 wu, a 2x2 grid.
        assert_eq!(engine.store().len(), 4);
        assert_eq!(engine.tile_side_wu(), 2.0);
        assert_eq!(engine.scale(), 0.2);

        let snapshot = engine.metrics();
        assert_eq!(snapshot.passes_scheduled, 1);
        assert_eq!(snapshot.renders_completed, 4);
    }

    #[test]
    fn test_zero_tile_side_is_floored() {
        let mut config = test_config();
        config.tile_side_px = 0;
        let engine = CachedRenderEngine::new(
            TestProject::new(vec![TestLayer::new("base", Rgba([1, 2, 3, 255]))]),
            config,
        )
        .unwrap();

        engine
            .prepare_pass(&viewport(0.0, 0.0, 2.0, 2.0), 2, 2)
            .unwrap();

        // Floored to 1 px tiles: side 1 wu, a finite scale of 1 wu/px.
        assert_eq!(engine.tile_side_wu(), 1.0);
        assert_eq!(engine.scale(), 1.0);
        assert!(engine.scale().is_finite());
        assert!(engine.wait_for_pass_timeout(Duration::from_secs(5)));
        assert_eq!(engine.store().len(), 4);
    }

    #[test]
    fn test_second_call_inside_interval_is_throttled() {
        let mut config = test_config();
        config.min_pass_interval = Duration::from_secs(60);
        let engine = CachedRenderEngine::new(
            TestProject::new(vec![TestLayer::new("base", Rgba([1, 2, 3, 255]))]),
            config,
        )
        .unwrap();

        let world = viewport(0.0, 0.0, 4.0, 4.0);
        assert_eq!(
            engine.prepare_pass(&world, 20, 20).unwrap(),
            PassOutcome::Scheduled
        );
        assert_eq!(
            engine.prepare_pass(&world, 20, 20).unwrap(),
            PassOutcome::Throttled
        );
        assert_eq!(engine.metrics().passes_throttled, 1);
    }

    #[test]
    fn test_concurrent_pass_is_rejected() {
        let project = Arc::new(TestProject {
            crs: Crs::wgs84(),
            bounds: Envelope::new(0.0, 0.0, 100.0, 100.0, Crs::wgs84()),
            layers: vec![TestLayer::new("base", Rgba([1, 2, 3, 255])) as Arc<dyn MapLayer>],
            layer_list_delay: Duration::from_millis(300),
        });
        let engine = Arc::new(CachedRenderEngine::new(project, test_config()).unwrap());

        let background = {
            let engine = Arc::clone(&engine);
            std::thread::spawn(move || {
                engine
                    .prepare_pass(&viewport(0.0, 0.0, 4.0, 4.0), 20, 20)
                    .unwrap()
            })
        };

        // The background pass stalls inside the gate for 300 ms; poll until
        // one side of the race observes the rejection.
        std::thread::sleep(Duration::from_millis(50));
        let mut rejected = false;
        for _ in 0..50 {
            if engine.prepare_pass(&viewport(0.0, 0.0, 4.0, 4.0), 20, 20).unwrap()
                == PassOutcome::Rejected
            {
                rejected = true;
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }

        let background_outcome = background.join().unwrap();
        assert!(rejected || background_outcome == PassOutcome::Rejected);
        assert!(engine.metrics().passes_rejected >= 1);
    }

    #[test]
    fn test_scale_limits_clamp_tile_side() {
        let mut config = test_config();
        config.scale_limited = true;
        let engine = CachedRenderEngine::new(
            TestProject::new(vec![TestLayer::new("base", Rgba([1, 2, 3, 255]))]),
            config,
        )
        .unwrap();

        // Bounds are 100 wu wide, so the side is clamped into [10, 100].
        // A 2 wu viewport at 20 px would want side 1; it gets 10.
        engine
            .prepare_pass(&viewport(0.0, 0.0, 2.0, 2.0), 20, 20)
            .unwrap();
        assert_eq!(engine.tile_side_wu(), 10.0);
        assert_eq!(engine.tile_side_limits_wu(), (10.0, 100.0));

        // A zoomed-out request wanting side 200 is capped at the full
        // extent.
        engine
            .prepare_pass(&viewport(0.0, 0.0, 100.0, 100.0), 5, 5)
            .unwrap();
        assert_eq!(engine.tile_side_wu(), 100.0);

        // Disabling the limit honors the requested scale.
        engine.set_scale_limited(false);
        engine
            .prepare_pass(&viewport(0.0, 0.0, 2.0, 2.0), 20, 20)
            .unwrap();
        assert_eq!(engine.tile_side_wu(), 1.0);
    }

    #[test]
    fn test_stale_layer_invalidates_its_tiles() {
        let layer = TestLayer::new("base", Rgba([80, 80, 80, 255]));
        let engine = CachedRenderEngine::new(
            TestProject::new(vec![Arc::clone(&layer)]),
            test_config(),
        )
        .unwrap();
        let world = viewport(0.0, 0.0, 4.0, 4.0);

        engine.prepare_pass(&world, 20, 20).unwrap();
        assert!(engine.wait_for_pass_timeout(Duration::from_secs(5)));
        assert_eq!(engine.metrics().tiles_scheduled, 4);

        layer.touch();
        engine.prepare_pass(&world, 20, 20).unwrap();
        assert!(engine.wait_for_pass_timeout(Duration::from_secs(5)));

        let snapshot = engine.metrics();
        assert_eq!(snapshot.layers_invalidated, 1);
        // Every tile in the region was rendered again.
        assert_eq!(snapshot.tiles_scheduled, 8);
        assert_eq!(engine.store().len(), 4);
    }

    #[test]
    fn test_unchanged_layer_reuses_cache() {
        let engine = CachedRenderEngine::new(
            TestProject::new(vec![TestLayer::new("base", Rgba([80, 80, 80, 255]))]),
            test_config(),
        )
        .unwrap();
        let world = viewport(0.0, 0.0, 4.0, 4.0);

        engine.prepare_pass(&world, 20, 20).unwrap();
        assert!(engine.wait_for_pass_timeout(Duration::from_secs(5)));
        engine.prepare_pass(&world, 20, 20).unwrap();

        let snapshot = engine.metrics();
        assert_eq!(snapshot.tiles_scheduled, 4);
        assert_eq!(snapshot.tiles_reused, 4);
        assert_eq!(snapshot.layers_invalidated, 0);
    }

    #[test]
    fn test_failing_layer_leaves_tiles_pending() {
        let engine = CachedRenderEngine::new(
            TestProject::new(vec![
                TestLayer::new("base", Rgba([10, 10, 10, 255])),
                TestLayer::failing("broken"),
            ]),
            test_config(),
        )
        .unwrap();

        engine
            .prepare_pass(&viewport(0.0, 0.0, 4.0, 4.0), 20, 20)
            .unwrap();
        // The pass never completes because the broken layer's tiles stay
        // pending, but the healthy layer finishes.
        assert!(!engine.wait_for_pass_timeout(Duration::from_millis(500)));

        let snapshot = engine.metrics();
        assert_eq!(snapshot.renders_failed, 4);
        assert_eq!(snapshot.renders_completed, 4);
    }

    #[test]
    fn test_fit_whole_map_uses_project_bounds() {
        let engine = CachedRenderEngine::new(
            TestProject::new(vec![TestLayer::new("base", Rgba([1, 2, 3, 255]))]),
            test_config(),
        )
        .unwrap();

        assert_eq!(engine.fit_whole_map(20, 20).unwrap(), PassOutcome::Scheduled);
        // 100 wu over 20 px with 10 px tiles: side 50 wu, a 2x2 grid.
        assert_eq!(engine.tile_side_wu(), 50.0);
        assert!(engine.wait_for_pass_timeout(Duration::from_secs(5)));
        assert_eq!(engine.store().len(), 4);
    }

    #[test]
    fn test_tile_events_reach_subscribers() {
        let engine = CachedRenderEngine::new(
            TestProject::new(vec![TestLayer::new("base", Rgba([1, 2, 3, 255]))]),
            test_config(),
        )
        .unwrap();
        let mut events = engine.subscribe();

        engine
            .prepare_pass(&viewport(0.0, 0.0, 4.0, 4.0), 20, 20)
            .unwrap();
        assert!(engine.wait_for_pass_timeout(Duration::from_secs(5)));

        let mut seen = 0;
        while let Ok(event) = events.try_recv() {
            assert_eq!(event, RenderEvent::TileRendered(LayerId::new("base")));
            seen += 1;
        }
        assert_eq!(seen, 4);
    }

    #[derive(Default)]
    struct RecordingCanvas {
        images: Vec<(i32, i32, u32, u32)>,
        rects: Vec<ScreenRect>,
        texts: Vec<String>,
    }

    impl Canvas for RecordingCanvas {
        fn draw_image(&mut self, image: &RgbaImage, x: i32, y: i32) {
            self.images.push((x, y, image.width(), image.height()));
        }

        fn draw_rect(&mut self, rect: ScreenRect) {
            self.rects.push(rect);
        }

        fn draw_text(&mut self, text: &str, x: i32, y: i32) {
            let _ = (x, y);
            self.texts.push(text.to_string());
        }
    }

    #[test]
    fn test_paint_draws_ready_tiles_in_place() {
        let engine = CachedRenderEngine::new(
            TestProject::new(vec![TestLayer::new("base", Rgba([5, 5, 5, 255]))]),
            test_config(),
        )
        .unwrap();

        engine
            .prepare_pass(&viewport(0.0, 0.0, 4.0, 4.0), 20, 20)
            .unwrap();
        assert!(engine.wait_for_pass_timeout(Duration::from_secs(5)));

        let mut canvas = RecordingCanvas::default();
        engine.paint(&mut canvas);

        assert_eq!(canvas.images.len(), 4);
        assert!(canvas.rects.is_empty());
        // Grid aligned with the viewport: tiles land at multiples of 10 px.
        assert!(canvas.images.contains(&(0, 0, 10, 10)));
        assert!(canvas.images.contains(&(10, 10, 10, 10)));
    }

    #[test]
    fn test_paint_skips_pending_tiles() {
        let engine = CachedRenderEngine::new(
            TestProject::new(vec![TestLayer::failing("broken")]),
            test_config(),
        )
        .unwrap();

        engine
            .prepare_pass(&viewport(0.0, 0.0, 4.0, 4.0), 20, 20)
            .unwrap();
        engine.wait_for_pass_timeout(Duration::from_millis(300));

        let mut canvas = RecordingCanvas::default();
        engine.paint(&mut canvas);
        assert!(canvas.images.is_empty());
    }

    #[test]
    fn test_debug_frames_add_outlines_and_labels() {
        let engine = CachedRenderEngine::new(
            TestProject::new(vec![TestLayer::new("base", Rgba([5, 5, 5, 255]))]),
            test_config(),
        )
        .unwrap();
        engine.set_debug_frames(true);

        engine
            .prepare_pass(&viewport(0.0, 0.0, 4.0, 4.0), 20, 20)
            .unwrap();
        assert!(engine.wait_for_pass_timeout(Duration::from_secs(5)));

        let mut canvas = RecordingCanvas::default();
        engine.paint(&mut canvas);

        assert_eq!(canvas.rects.len(), 4);
        assert_eq!(canvas.texts.len(), 4);
        assert!(canvas.texts.iter().any(|t| t.contains("base")));
    }

    #[test]
    fn test_layers_compose_bottom_first() {
        let engine = CachedRenderEngine::new(
            TestProject::new(vec![
                TestLayer::new("base", Rgba([10, 10, 10, 255])),
                TestLayer::new("overlay", Rgba([200, 200, 200, 255])),
            ]),
            test_config(),
        )
        .unwrap();

        engine
            .prepare_pass(&viewport(0.0, 0.0, 2.0, 2.0), 10, 10)
            .unwrap();
        assert!(engine.wait_for_pass_timeout(Duration::from_secs(5)));

        let mut canvas = RecordingCanvas::default();
        engine.paint(&mut canvas);
        // One tile per layer, base drawn before overlay.
        assert_eq!(canvas.images.len(), 2);
    }
}
