//! Tile-cache rendering engine for large maps.
//!
//! Renders a map by splitting the visible world area into fixed-size square
//! tiles, rendering each tile once in the background and caching the result
//! keyed by its normalized world envelope. Panning and zooming over a region
//! reuse previously rendered tiles instead of re-rendering the whole map.
//!
//! ```text
//!  viewport change                               repaint event
//!        │                                             │
//!        ▼                                             ▼
//!  CachedRenderEngine::prepare_pass            CachedRenderEngine::paint
//!        │ per layer                                   ▲
//!        ▼                                             │
//!  TileFactory::intersect ──► PartialStore ────────────┘
//!        │ missing tiles          ▲
//!        ▼                        │ attach + TileReady
//!  RenderQueue ──► tokio workers ─┘
//! ```
//!
//! The embedding application implements three traits: [`RenderSource`] (how a
//! layer rasterizes an extent), [`MapLayer`] (identity and change detection)
//! and [`ProjectView`] (layer list, reference system, maximum bounds). The
//! engine owns its runtime, so none of the calls require an async context.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tilescape::{
//!     CachedRenderEngine, Crs, EngineConfig, Envelope, LayerId, MapLayer,
//!     PixmapCanvas, ProjectView, RenderError, RenderSource,
//! };
//!
//! struct Ocean;
//!
//! impl RenderSource for Ocean {
//!     fn render(
//!         &self,
//!         _area: &Envelope,
//!         width: u32,
//!         height: u32,
//!     ) -> Result<image::RgbaImage, RenderError> {
//!         Ok(image::RgbaImage::from_pixel(
//!             width,
//!             height,
//!             image::Rgba([20, 60, 120, 255]),
//!         ))
//!     }
//! }
//!
//! struct OceanLayer(LayerId);
//!
//! impl MapLayer for OceanLayer {
//!     fn id(&self) -> &LayerId {
//!         &self.0
//!     }
//!
//!     fn build_render_source(&self) -> Arc<dyn RenderSource> {
//!         Arc::new(Ocean)
//!     }
//!
//!     fn is_stale(&self, _source: &dyn RenderSource) -> bool {
//!         false
//!     }
//! }
//!
//! struct World;
//!
//! impl ProjectView for World {
//!     fn crs(&self) -> Crs {
//!         Crs::wgs84()
//!     }
//!
//!     fn max_bounds(&self) -> Envelope {
//!         Envelope::new(-180.0, -90.0, 180.0, 90.0, Crs::wgs84())
//!     }
//!
//!     fn layers(&self) -> Vec<Arc<dyn MapLayer>> {
//!         vec![Arc::new(OceanLayer(LayerId::new("ocean")))]
//!     }
//! }
//!
//! fn main() -> Result<(), tilescape::EngineError> {
//!     let engine = CachedRenderEngine::new(Arc::new(World), EngineConfig::default())?;
//!
//!     let viewport = Envelope::new(-10.0, -10.0, 10.0, 10.0, Crs::wgs84());
//!     engine.prepare_pass(&viewport, 800, 800)?;
//!     engine.wait_for_pass();
//!
//!     let mut canvas = PixmapCanvas::new(800, 800).expect("non-zero surface");
//!     engine.paint(&mut canvas);
//!     Ok(())
//! }
//! ```

pub mod engine;
pub mod error;
pub mod factory;
pub mod geom;
pub mod layer;
pub mod queue;
pub mod store;
pub mod telemetry;
pub mod tile;

pub use engine::{
    CachedRenderEngine, Canvas, EngineConfig, PassOutcome, PixmapCanvas, RenderEvent,
};
pub use error::{EngineError, RenderError};
pub use factory::{QueryResult, TileFactory};
pub use geom::{Crs, Envelope, ScreenRect, WorldToScreen};
pub use layer::{MapLayer, ProjectView, RenderSource};
pub use queue::{InFlightRegistry, OnTileReady, RenderQueue, RenderScheduler};
pub use store::{PartialStore, StoreEvent};
pub use telemetry::{init_logging, MetricsSnapshot, RenderMetrics};
pub use tile::{LayerId, RenderedTile, TileId};
