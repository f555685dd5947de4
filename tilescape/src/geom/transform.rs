//! World-to-screen mapping for one rendering pass.

/// Affine transform from world coordinates to screen pixels.
///
/// The transform is anchored at a world-space origin (the requested
/// envelope's upper-left corner) which maps to screen `(0, 0)`. The Y axis is
/// flipped: world Y grows upward, screen Y grows downward. Tiles snapped
/// below or left of the requested envelope therefore map to negative screen
/// coordinates, which is expected; they are drawn partially off-surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorldToScreen {
    origin_x: f64,
    origin_y: f64,
    px_per_wu: f64,
}

impl WorldToScreen {
    /// Creates a transform anchored at the world point `(origin_x, origin_y)`
    /// with the given pixel-per-world-unit scale.
    pub fn new(origin_x: f64, origin_y: f64, px_per_wu: f64) -> Self {
        Self {
            origin_x,
            origin_y,
            px_per_wu,
        }
    }

    /// Maps a world point to screen coordinates.
    #[inline]
    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (x - self.origin_x) * self.px_per_wu,
            (self.origin_y - y) * self.px_per_wu,
        )
    }

    /// Pixels per world unit.
    pub fn px_per_wu(&self) -> f64 {
        self.px_per_wu
    }
}

/// An axis-aligned rectangle in screen space.
///
/// The origin may be negative: the tile grid overshoots the requested
/// envelope to the nearest tile boundary, and overshot tiles start above or
/// left of the paint surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl ScreenRect {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}
