//! Paint surface abstraction.
//!
//! The engine composes tiles onto whatever surface the embedding application
//! provides. [`PixmapCanvas`] is the bundled CPU rasterizer backend; UIs with
//! their own surface implement [`Canvas`] directly.

use crate::geom::ScreenRect;
use image::RgbaImage;
use tiny_skia::{ColorU8, Paint, PathBuilder, Pixmap, PixmapPaint, PixmapRef, Stroke, Transform};
use tracing::trace;

/// Target surface of a paint pass.
///
/// Coordinates may be negative; the tile grid overshoots the visible
/// envelope and implementations are expected to clip.
pub trait Canvas {
    /// Blits a rendered tile with its upper-left corner at `(x, y)`.
    fn draw_image(&mut self, image: &RgbaImage, x: i32, y: i32);

    /// Outlines a rectangle. Used for debug frames only.
    fn draw_rect(&mut self, rect: ScreenRect);

    /// Draws a small label. Used for debug frames only.
    fn draw_text(&mut self, text: &str, x: i32, y: i32);
}

/// CPU paint surface backed by a `tiny-skia` pixmap.
pub struct PixmapCanvas {
    pixmap: Pixmap,
}

impl PixmapCanvas {
    /// Creates a surface of the given pixel size. Returns `None` for zero
    /// dimensions.
    pub fn new(width: u32, height: u32) -> Option<Self> {
        Pixmap::new(width, height).map(|pixmap| Self { pixmap })
    }

    pub fn pixmap(&self) -> &Pixmap {
        &self.pixmap
    }

    pub fn into_pixmap(self) -> Pixmap {
        self.pixmap
    }
}

impl Canvas for PixmapCanvas {
    fn draw_image(&mut self, image: &RgbaImage, x: i32, y: i32) {
        // Tile images carry straight alpha; the pixmap works on
        // premultiplied bytes, so convert before blitting.
        let mut premultiplied = Vec::with_capacity(image.as_raw().len());
        for pixel in image.pixels() {
            let [r, g, b, a] = pixel.0;
            let color = ColorU8::from_rgba(r, g, b, a).premultiply();
            premultiplied.extend_from_slice(&[
                color.red(),
                color.green(),
                color.blue(),
                color.alpha(),
            ]);
        }
        let Some(src) = PixmapRef::from_bytes(&premultiplied, image.width(), image.height())
        else {
            trace!(x, y, "Tile image has inconsistent dimensions, not drawn");
            return;
        };
        self.pixmap
            .draw_pixmap(x, y, src, &PixmapPaint::default(), Transform::identity(), None);
    }

    fn draw_rect(&mut self, rect: ScreenRect) {
        let Some(outline) = tiny_skia::Rect::from_xywh(
            rect.x as f32,
            rect.y as f32,
            rect.width as f32,
            rect.height as f32,
        ) else {
            return;
        };
        let path = PathBuilder::from_rect(outline);
        let mut paint = Paint::default();
        paint.set_color_rgba8(220, 40, 40, 255);
        self.pixmap.stroke_path(
            &path,
            &paint,
            &Stroke::default(),
            Transform::identity(),
            None,
        );
    }

    fn draw_text(&mut self, text: &str, x: i32, y: i32) {
        // tiny-skia does not rasterize text; debug labels only show on
        // canvases whose backend has a text facility.
        trace!(text, x, y, "Text overlay skipped on pixmap canvas");
    }
}

impl std::fmt::Debug for PixmapCanvas {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixmapCanvas")
            .field("width", &self.pixmap.width())
            .field("height", &self.pixmap.height())
            .finish()
    }
}
