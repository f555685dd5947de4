//! World-space geometry and coordinate normalization.
//!
//! Tiles are addressed by world-space envelopes, so pans and zooms that
//! revisit a region must produce bit-identical coordinates to hit the cache.
//! Two normalization rules make that happen:
//!
//! 1. Every coordinate is rounded to 6 decimal digits ([`round_coord`]).
//! 2. Grid origins are snapped down to a multiple of the current tile side
//!    ([`snap_down`]).
//!
//! Both operations are idempotent, so repeated queries over the same region
//! reuse tiles instead of duplicating them.

mod transform;

pub use transform::{ScreenRect, WorldToScreen};

use std::fmt;
use std::sync::Arc;

/// Decimal precision of normalized world coordinates (10^6 = 6 digits).
pub const COORD_SCALE: f64 = 1_000_000.0;

/// Rounds a world coordinate to 6 decimal digits.
///
/// All envelope coordinates pass through this before being used as cache
/// keys, so that floating point drift from repeated grid arithmetic cannot
/// produce distinct keys for the same tile.
#[inline]
pub fn round_coord(coord: f64) -> f64 {
    (coord * COORD_SCALE).round() / COORD_SCALE
}

/// Snaps a coordinate down to the closest multiple of `side` at or below it.
///
/// This is the grid origin for tile iteration: starting from a snapped point
/// guarantees that the same world region always maps onto the same tile
/// envelopes, regardless of where the requested envelope's corner happens to
/// fall inside a tile.
#[inline]
pub fn snap_down(coord: f64, side: f64) -> f64 {
    let mut offset = coord % side;
    if offset < 0.0 {
        offset += side;
    }
    round_coord(coord - offset)
}

/// Opaque coordinate reference tag.
///
/// The engine does not interpret reference systems; it only requires that the
/// tag of a query matches the tag of the project and of cached tiles.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Crs(Arc<str>);

impl Crs {
    /// Creates a reference tag from an arbitrary identifier.
    pub fn new(tag: impl AsRef<str>) -> Self {
        Self(Arc::from(tag.as_ref()))
    }

    /// WGS 84 geographic coordinates, the default for tests and examples.
    pub fn wgs84() -> Self {
        Self::new("EPSG:4326")
    }

    /// Returns the tag as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A rectangle in world coordinates with its coordinate reference tag.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    min_x: f64,
    min_y: f64,
    max_x: f64,
    max_y: f64,
    crs: Crs,
}

impl Envelope {
    /// Creates a new envelope. Corners are not reordered; callers are
    /// expected to pass `min <= max` and degenerate envelopes are rejected by
    /// the engine, not here.
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64, crs: Crs) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
            crs,
        }
    }

    pub fn min_x(&self) -> f64 {
        self.min_x
    }

    pub fn min_y(&self) -> f64 {
        self.min_y
    }

    pub fn max_x(&self) -> f64 {
        self.max_x
    }

    pub fn max_y(&self) -> f64 {
        self.max_y
    }

    pub fn crs(&self) -> &Crs {
        &self.crs
    }

    /// Width in world units.
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    /// Height in world units.
    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// True when the envelope has zero or negative extent on either axis.
    pub fn is_degenerate(&self) -> bool {
        self.width() <= 0.0 || self.height() <= 0.0
    }

    /// Returns a copy with every coordinate rounded to 6 decimal digits.
    pub fn normalized(&self) -> Self {
        Self {
            min_x: round_coord(self.min_x),
            min_y: round_coord(self.min_y),
            max_x: round_coord(self.max_x),
            max_y: round_coord(self.max_y),
            crs: self.crs.clone(),
        }
    }

    /// True when `point` lies inside the envelope (closed bounds).
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[({}, {}) - ({}, {}) {}]",
            self.min_x, self.min_y, self.max_x, self.max_y, self.crs
        )
    }
}
