//! tiny-skia backed surface.

use std::path::Path;

use inkroom_core::{PenStyle, Rgba, Surface, Tool};
use kurbo::Point;
use peniko::Color;
use thiserror::Error;
use tiny_skia::{FillRule, LineCap, LineJoin, Paint, PathBuilder, Pixmap, Stroke, Transform};

/// Renderer errors.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Invalid surface size {width}x{height}")]
    InvalidSize { width: u32, height: u32 },
    #[error("PNG encoding failed: {0}")]
    Encode(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for renderer operations.
pub type RenderResult<T> = Result<T, RenderError>;

/// A bitmap surface with round caps and joins.
pub struct PixmapSurface {
    pixmap: Pixmap,
    pen: Point,
}

impl PixmapSurface {
    /// Create a transparent surface. Replaying fills the background.
    pub fn new(width: u32, height: u32) -> RenderResult<Self> {
        let pixmap =
            Pixmap::new(width, height).ok_or(RenderError::InvalidSize { width, height })?;
        Ok(Self {
            pixmap,
            pen: Point::ZERO,
        })
    }

    pub fn width(&self) -> u32 {
        self.pixmap.width()
    }

    pub fn height(&self) -> u32 {
        self.pixmap.height()
    }

    /// Raw premultiplied RGBA bytes.
    pub fn data(&self) -> &[u8] {
        self.pixmap.data()
    }

    /// Color at a pixel, unpremultiplied.
    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgba> {
        let c = self.pixmap.pixel(x, y)?.demultiply();
        Some(Rgba::new(c.red(), c.green(), c.blue(), c.alpha()))
    }

    /// Encode the current contents as PNG.
    pub fn encode_png(&self) -> RenderResult<Vec<u8>> {
        self.pixmap
            .encode_png()
            .map_err(|e| RenderError::Encode(e.to_string()))
    }

    /// Write the current contents to a PNG file.
    pub fn save_png(&self, path: impl AsRef<Path>) -> RenderResult<()> {
        let bytes = self.encode_png()?;
        std::fs::write(path, bytes)?;
        Ok(())
    }
}

fn to_skia(color: Color) -> tiny_skia::Color {
    let rgba = color.to_rgba8();
    tiny_skia::Color::from_rgba8(rgba.r, rgba.g, rgba.b, rgba.a)
}

fn paint_for(style: &PenStyle) -> Paint<'static> {
    let mut paint = Paint::default();
    paint.set_color(to_skia(style.color));
    paint.anti_alias = true;
    if style.tool == Tool::Eraser {
        // Overwrite rather than blend so erased pixels match the background.
        paint.blend_mode = tiny_skia::BlendMode::Source;
    }
    paint
}

impl Surface for PixmapSurface {
    fn size(&self) -> (u32, u32) {
        (self.pixmap.width(), self.pixmap.height())
    }

    fn fill_background(&mut self, color: Color) {
        self.pixmap.fill(to_skia(color));
    }

    fn move_to(&mut self, point: Point) {
        self.pen = point;
    }

    fn stroke_to(&mut self, point: Point, style: &PenStyle) {
        let from = self.pen;
        self.pen = point;
        if style.width <= 0.0 || !style.width.is_finite() {
            return;
        }
        let paint = paint_for(style);

        if from.distance(point) < f64::EPSILON {
            // Round cap of a zero-length segment
            let radius = (style.width / 2.0) as f32;
            if let Some(path) = PathBuilder::from_circle(point.x as f32, point.y as f32, radius) {
                self.pixmap
                    .fill_path(&path, &paint, FillRule::Winding, Transform::identity(), None);
            }
            return;
        }

        let mut pb = PathBuilder::new();
        pb.move_to(from.x as f32, from.y as f32);
        pb.line_to(point.x as f32, point.y as f32);
        let stroke = Stroke {
            width: style.width as f32,
            line_cap: LineCap::Round,
            line_join: LineJoin::Round,
            ..Default::default()
        };
        if let Some(path) = pb.finish() {
            self.pixmap
                .stroke_path(&path, &paint, &stroke, Transform::identity(), None);
        }
    }

    fn resize(&mut self, width: u32, height: u32) -> bool {
        if (width, height) == self.size() {
            return false;
        }
        match Pixmap::new(width, height) {
            Some(pixmap) => {
                self.pixmap = pixmap;
                self.pen = Point::ZERO;
                true
            }
            None => {
                log::warn!("Ignoring resize to {}x{}", width, height);
                false
            }
        }
    }
}
