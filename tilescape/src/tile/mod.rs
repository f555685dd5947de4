//! Tile identity and the cached tile entity.
//!
//! A tile ("partial") is a fixed-size square of the map addressed by its
//! normalized world envelope and owning layer. Two tiles with equal
//! normalized envelopes and equal layer are the same addressable tile, which
//! is what makes cache reuse work across pans and zooms.

use crate::geom::{round_coord, Crs, Envelope, COORD_SCALE};
use image::RgbaImage;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

/// Typed identifier of a map layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerId(Arc<str>);

impl LayerId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Cache key of a rendered tile.
///
/// Coordinates are stored as integer micro-units (world coordinate times
/// 10^6), which makes the 6-decimal normalization exact and gives the key
/// `Eq` and `Hash` without floating point comparisons.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileId {
    layer: LayerId,
    min_x: i64,
    min_y: i64,
    max_x: i64,
    max_y: i64,
    crs: Crs,
}

impl TileId {
    /// Builds a key from a world envelope, normalizing coordinates to
    /// 6 decimal digits in the process.
    pub fn new(layer: LayerId, envelope: &Envelope) -> Self {
        Self {
            layer,
            min_x: to_micro(envelope.min_x()),
            min_y: to_micro(envelope.min_y()),
            max_x: to_micro(envelope.max_x()),
            max_y: to_micro(envelope.max_y()),
            crs: envelope.crs().clone(),
        }
    }

    pub fn layer(&self) -> &LayerId {
        &self.layer
    }

    pub fn crs(&self) -> &Crs {
        &self.crs
    }

    /// Reconstructs the normalized world envelope this key addresses.
    pub fn envelope(&self) -> Envelope {
        Envelope::new(
            from_micro(self.min_x),
            from_micro(self.min_y),
            from_micro(self.max_x),
            from_micro(self.max_y),
            self.crs.clone(),
        )
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@({}, {})-({}, {})",
            self.layer,
            from_micro(self.min_x),
            from_micro(self.min_y),
            from_micro(self.max_x),
            from_micro(self.max_y),
        )
    }
}

#[inline]
fn to_micro(coord: f64) -> i64 {
    (round_coord(coord) * COORD_SCALE).round() as i64
}

#[inline]
fn from_micro(micro: i64) -> f64 {
    micro as f64 / COORD_SCALE
}

/// A cached tile entity.
///
/// Created pending (no image) when first requested; transitions to ready when
/// a background render attaches its image. The [`PartialStore`] exclusively
/// owns entities; factories and the engine only hold `Arc` lookups.
///
/// [`PartialStore`]: crate::store::PartialStore
pub struct RenderedTile {
    id: TileId,
    width_px: u32,
    height_px: u32,
    image: RwLock<Option<Arc<RgbaImage>>>,
}

impl RenderedTile {
    /// Creates a pending tile with the given target pixel dimensions.
    pub fn new_pending(id: TileId, width_px: u32, height_px: u32) -> Self {
        Self {
            id,
            width_px,
            height_px,
            image: RwLock::new(None),
        }
    }

    pub fn id(&self) -> &TileId {
        &self.id
    }

    pub fn width_px(&self) -> u32 {
        self.width_px
    }

    pub fn height_px(&self) -> u32 {
        self.height_px
    }

    /// Returns the rendered image, or `None` while the tile is pending.
    pub fn image(&self) -> Option<Arc<RgbaImage>> {
        self.image.read().clone()
    }

    /// True once a render has completed for this tile.
    pub fn is_ready(&self) -> bool {
        self.image.read().is_some()
    }

    /// Attaches the rendered image, transitioning the tile to ready.
    pub fn attach(&self, image: RgbaImage) {
        *self.image.write() = Some(Arc::new(image));
    }
}

impl fmt::Debug for RenderedTile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderedTile")
            .field("id", &self.id)
            .field("width_px", &self.width_px)
            .field("height_px", &self.height_px)
            .field("ready", &self.is_ready())
            .finish()
    }
}
