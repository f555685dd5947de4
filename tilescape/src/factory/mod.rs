//! Per-layer tile factory.
//!
//! The factory answers one question: which tiles cover this world envelope at
//! this tile size? It walks a grid snapped to multiples of the tile side,
//! classifies every cell against the store (ready, in flight, missing),
//! schedules renders for the missing ones and returns the full set plus the
//! world-to-screen mapping for painting.
//!
//! ```text
//!            requested envelope
//!          ┌─────────────────┐
//!       ┌──┼──┬─────┬─────┬──┼──┐
//!       │  │  │     │     │  │  │   grid snapped down-left,
//!       ├──┼──┼─────┼─────┼──┼──┤   overshooting up-right
//!       │  │  │     │     │  │  │
//!       ├──┼──┼─────┼─────┼──┼──┤
//!       │  └──┴─────┴─────┴──┼──┘
//!       └──┴─────┴─────┴─────┴──┘
//! ```
//!
//! The overshoot is deliberate: aligning tiles to absolute grid positions
//! instead of the envelope corner is what lets a pan by half a tile reuse
//! every tile it already rendered.

use crate::geom::{round_coord, snap_down, Envelope, ScreenRect, WorldToScreen};
use crate::layer::RenderSource;
use crate::queue::{InFlightRegistry, OnTileReady, RenderQueue, RenderScheduler};
use crate::store::PartialStore;
use crate::telemetry::RenderMetrics;
use crate::tile::{LayerId, RenderedTile, TileId};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

/// Smallest tile side in world units the factory will iterate with.
///
/// Guards the grid walk against a side so small that the loop would produce
/// an absurd number of tiles.
pub const MIN_TILE_SIDE_WU: f64 = 0.05;

/// Outcome of one intersect call: the covering tiles and how to paint them.
#[derive(Debug)]
pub struct QueryResult {
    tiles: Vec<Arc<RenderedTile>>,
    world: Envelope,
    screen_bounds: ScreenRect,
    columns: usize,
    rows: usize,
    transform: WorldToScreen,
}

impl QueryResult {
    /// Tiles in row-major order, bottom row first.
    pub fn tiles(&self) -> &[Arc<RenderedTile>] {
        &self.tiles
    }

    /// The normalized envelope the query was made for.
    pub fn world(&self) -> &Envelope {
        &self.world
    }

    /// Extent of the whole tile grid in screen pixels. The origin is usually
    /// negative because the grid overshoots the requested envelope.
    pub fn screen_bounds(&self) -> ScreenRect {
        self.screen_bounds
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Transform mapping world coordinates onto the query's screen space.
    pub fn transform(&self) -> WorldToScreen {
        self.transform
    }

    /// True once every tile of the query carries an image.
    pub fn is_complete(&self) -> bool {
        self.tiles.iter().all(|tile| tile.is_ready())
    }
}

/// Computes the tile grid of one layer for render passes.
///
/// One factory per layer and render source generation; when the layer's data
/// changes the engine swaps the source via [`set_source`] and drops the
/// layer's cached tiles.
///
/// [`set_source`]: TileFactory::set_source
pub struct TileFactory {
    layer: LayerId,
    source: RwLock<Arc<dyn RenderSource>>,
    store: Arc<PartialStore>,
    in_flight: Arc<InFlightRegistry>,
    metrics: Arc<RenderMetrics>,
    tile_side_px: u32,
}

impl TileFactory {
    pub fn new(
        layer: LayerId,
        source: Arc<dyn RenderSource>,
        store: Arc<PartialStore>,
        in_flight: Arc<InFlightRegistry>,
        metrics: Arc<RenderMetrics>,
        tile_side_px: u32,
    ) -> Self {
        Self {
            layer,
            source: RwLock::new(source),
            store,
            in_flight,
            metrics,
            tile_side_px,
        }
    }

    pub fn layer(&self) -> &LayerId {
        &self.layer
    }

    /// Fixed pixel side of every tile this factory produces.
    pub fn tile_side_px(&self) -> u32 {
        self.tile_side_px
    }

    /// Current render source.
    pub fn source(&self) -> Arc<dyn RenderSource> {
        Arc::clone(&self.source.read())
    }

    /// Replaces the render source after the layer's data changed. The caller
    /// invalidates the layer's cached tiles alongside.
    pub fn set_source(&self, source: Arc<dyn RenderSource>) {
        *self.source.write() = source;
    }

    /// Computes the tile grid covering `world` with tiles of `side_wu` world
    /// units and schedules renders for every tile not yet cached.
    ///
    /// Ready tiles are reused from the store, pending tiles with a render in
    /// flight are returned as placeholders, and pending tiles without one
    /// (earlier failures) are rescheduled. Returns `None` when the envelope
    /// is degenerate.
    pub fn intersect(
        &self,
        world: &Envelope,
        side_wu: f64,
        scheduler: &RenderScheduler,
        on_ready: OnTileReady,
    ) -> Option<QueryResult> {
        if world.is_degenerate() {
            return None;
        }
        let world = world.normalized();
        let side = round_coord(side_wu.max(MIN_TILE_SIDE_WU));

        let start_x = snap_down(world.min_x(), side);
        let start_y = snap_down(world.min_y(), side);

        let source = self.source();
        let mut queue: Option<RenderQueue> = None;
        let mut tiles = Vec::new();
        let mut columns = 0;
        let mut rows = 0;

        let mut y = start_y;
        while y < world.max_y() {
            let mut row_columns = 0;
            let mut x = start_x;
            while x < world.max_x() {
                let cell = Envelope::new(
                    x,
                    y,
                    round_coord(x + side),
                    round_coord(y + side),
                    world.crs().clone(),
                );
                let id = TileId::new(self.layer.clone(), &cell);

                match self.store.find(&id) {
                    Some(tile) if tile.is_ready() => {
                        self.metrics.tile_reused();
                        tiles.push(tile);
                    }
                    Some(tile) => {
                        // Pending entity. If no render is in flight the
                        // earlier attempt failed; schedule it again. add_task
                        // resolves the race through the registry claim.
                        if !self.in_flight.is_in_progress(&id) {
                            self.queue_for(&mut queue, &on_ready)
                                .add_task(Arc::clone(&tile));
                        }
                        tiles.push(tile);
                    }
                    None => {
                        let tile = Arc::new(RenderedTile::new_pending(
                            id,
                            self.tile_side_px,
                            self.tile_side_px,
                        ));
                        self.store.insert(Arc::clone(&tile));
                        self.queue_for(&mut queue, &on_ready)
                            .add_task(Arc::clone(&tile));
                        tiles.push(tile);
                    }
                }

                row_columns += 1;
                x = round_coord(x + side);
            }
            if rows == 0 {
                columns = row_columns;
            }
            rows += 1;
            y = round_coord(y + side);
        }

        if tiles.is_empty() {
            return None;
        }

        let scheduled = queue.as_ref().map_or(0, RenderQueue::len);
        debug!(
            layer = %self.layer,
            tiles = tiles.len(),
            scheduled,
            side,
            "Intersected tile grid"
        );

        if let Some(queue) = queue {
            queue.start(scheduler);
        }

        // One pixel scale for the whole pass; the requested envelope's
        // upper-left corner is screen (0, 0).
        let px_per_wu = f64::from(self.tile_side_px) / side;
        let transform = WorldToScreen::new(world.min_x(), world.max_y(), px_per_wu);

        let grid_top = round_coord(start_y + side * rows as f64);
        let (grid_x, grid_y) = transform.apply(start_x, grid_top);
        let screen_bounds = ScreenRect::new(
            grid_x.round() as i32,
            grid_y.round() as i32,
            columns as u32 * self.tile_side_px,
            rows as u32 * self.tile_side_px,
        );

        Some(QueryResult {
            tiles,
            world,
            screen_bounds,
            columns,
            rows,
            transform,
        })
    }

    fn queue_for<'a>(
        &self,
        queue: &'a mut Option<RenderQueue>,
        on_ready: &OnTileReady,
    ) -> &'a mut RenderQueue {
        queue.get_or_insert_with(|| {
            RenderQueue::new(
                self.source(),
                Arc::clone(&self.store),
                Arc::clone(&self.in_flight),
                Arc::clone(&self.metrics),
                Arc::clone(on_ready),
            )
        })
    }
}

impl std::fmt::Debug for TileFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileFactory")
            .field("layer", &self.layer)
            .field("tile_side_px", &self.tile_side_px)
            .finish()
    }
}
