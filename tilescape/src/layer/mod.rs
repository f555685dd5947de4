//! External collaborator contracts: render sources, layers and the project
//! view.
//!
//! The engine treats the actual feature rendering as opaque. A layer builds a
//! [`RenderSource`]; the engine caches it, asks it to rasterize tile extents,
//! and rebuilds it (invalidating the layer's cached tiles) when the layer
//! reports that its underlying data changed.

use crate::error::RenderError;
use crate::geom::{Crs, Envelope};
use crate::tile::LayerId;
use image::RgbaImage;
use std::sync::Arc;

/// Opaque per-layer rasterizer.
///
/// `render` may block; the engine always calls it from a blocking-capable
/// worker. A stuck implementation stalls its worker slot indefinitely, which
/// is a documented risk, not actively mitigated.
pub trait RenderSource: Send + Sync {
    /// Rasterizes the given world extent into an image of exactly
    /// `width` x `height` pixels.
    fn render(&self, envelope: &Envelope, width: u32, height: u32)
        -> Result<RgbaImage, RenderError>;

    /// Revision of the layer data this source was built from. Layers compare
    /// it against their current data revision in
    /// [`MapLayer::is_stale`].
    fn revision(&self) -> u64 {
        0
    }
}

/// A map layer as seen by the rendering engine.
pub trait MapLayer: Send + Sync {
    fn id(&self) -> &LayerId;

    /// Builds a render source reflecting the layer's current data.
    fn build_render_source(&self) -> Arc<dyn RenderSource>;

    /// True when the layer's underlying data changed since `source` was
    /// built. A stale source triggers cache invalidation for the layer.
    fn is_stale(&self, source: &dyn RenderSource) -> bool;
}

/// Read access to the project the engine renders.
pub trait ProjectView: Send + Sync {
    /// The project's coordinate reference tag. Queries with a different tag
    /// are rejected.
    fn crs(&self) -> Crs;

    /// Maximum extent of the project's data, used to derive scale limits.
    fn max_bounds(&self) -> Envelope;

    /// Layers in z-order, bottom first. Called once per pass; the engine does
    /// not cache the list.
    fn layers(&self) -> Vec<Arc<dyn MapLayer>>;
}
