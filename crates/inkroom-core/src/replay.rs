//! Deterministic canvas reconstruction from an action log.
//!
//! The same [`Replayer`] state machine drives full replays (join, resize,
//! history replacement) and live one-action updates, so a late joiner ends up
//! with exactly the segments everyone else drew incrementally.

use std::collections::HashMap;

use kurbo::Point;
use peniko::Color;

use crate::action::{Action, BrushStyle, Tool};
use crate::color::{Rgba, parse_color};

/// Alpha factor applied to highlighter strokes.
pub const HIGHLIGHTER_ALPHA: f64 = 0.35;
/// Lowest pressure honored when scaling line width.
const MIN_PRESSURE: f64 = 0.1;

/// Resolved paint for one stroked segment.
#[derive(Debug, Clone, Copy)]
pub struct PenStyle {
    pub color: Color,
    pub width: f64,
    pub tool: Tool,
}

impl PenStyle {
    /// Resolve a brush against the background, scaling width by pressure.
    pub fn resolve(brush: &BrushStyle, pressure: Option<f64>, background: Color) -> Self {
        let color = match brush.tool {
            Tool::Eraser => background,
            Tool::Highlighter => parse_color(&brush.color).fade(HIGHLIGHTER_ALPHA).into(),
            Tool::Pen => parse_color(&brush.color).into(),
        };
        let scale = pressure.map_or(1.0, |p| p.clamp(MIN_PRESSURE, 1.0));
        Self {
            color,
            width: brush.brush_size * scale,
            tool: brush.tool,
        }
    }
}

/// A drawing target.
///
/// The replayer only ever calls these in the order fill, then
/// `move_to`/`stroke_to` pairs. `stroke_to` to the current pen position must
/// still leave a visible dot.
pub trait Surface {
    /// Bitmap size in pixels.
    fn size(&self) -> (u32, u32);

    /// Wipe the whole bitmap to `color`.
    fn fill_background(&mut self, color: Color);

    /// Move the pen without drawing.
    fn move_to(&mut self, point: Point);

    /// Stroke a segment from the pen position to `point` and leave the pen there.
    fn stroke_to(&mut self, point: Point, style: &PenStyle);

    /// Change the bitmap size. Returns `true` if the contents were lost and
    /// the log must be replayed.
    fn resize(&mut self, width: u32, height: u32) -> bool {
        let _ = (width, height);
        false
    }
}

#[derive(Debug, Clone)]
struct Pen {
    position: Point,
    brush: BrushStyle,
}

/// Replay state machine with one pen per originating participant.
#[derive(Debug, Clone)]
pub struct Replayer {
    background: Color,
    pens: HashMap<Option<String>, Pen>,
}

impl Default for Replayer {
    fn default() -> Self {
        Self::new(Rgba::white().into())
    }
}

impl Replayer {
    pub fn new(background: Color) -> Self {
        Self {
            background,
            pens: HashMap::new(),
        }
    }

    pub fn background(&self) -> Color {
        self.background
    }

    /// Forget every pen.
    pub fn reset(&mut self) {
        self.pens.clear();
    }

    /// Number of participants with an open pen.
    pub fn open_pens(&self) -> usize {
        self.pens.len()
    }

    /// Clear `surface` and replay `log` from empty.
    pub fn render<S: Surface + ?Sized>(&mut self, surface: &mut S, log: &[Action]) {
        self.reset();
        surface.fill_background(self.background);
        for action in log {
            self.apply(surface, action);
        }
        log::debug!("Replayed {} actions", log.len());
    }

    /// Apply one action on top of the current surface contents.
    pub fn apply<S: Surface + ?Sized>(&mut self, surface: &mut S, action: &Action) {
        let key = action.peer().map(str::to_owned);
        match action {
            Action::Start { x, y, .. } => {
                let position = Point::new(*x, *y);
                let brush = action.brush().unwrap_or_default();
                let style = PenStyle::resolve(&brush, None, self.background);
                surface.move_to(position);
                surface.stroke_to(position, &style);
                self.pens.insert(key, Pen { position, brush });
            }
            Action::Draw { x, y, pressure, .. } => {
                let target = Point::new(*x, *y);
                match self.pens.get_mut(&key) {
                    Some(pen) => {
                        let style = PenStyle::resolve(&pen.brush, *pressure, self.background);
                        surface.move_to(pen.position);
                        surface.stroke_to(target, &style);
                        pen.position = target;
                    }
                    None => {
                        // Start was trimmed away or never seen.
                        log::debug!("Draw without open stroke for {:?}", key);
                        surface.move_to(target);
                        self.pens.insert(
                            key,
                            Pen {
                                position: target,
                                brush: BrushStyle::default(),
                            },
                        );
                    }
                }
            }
            Action::Clear { .. } => {
                surface.fill_background(self.background);
                self.reset();
            }
        }
    }
}

/// Replay `log` onto `surface` on a white background.
pub fn render<S: Surface + ?Sized>(surface: &mut S, log: &[Action]) {
    Replayer::default().render(surface, log);
}

/// One recorded surface call.
#[derive(Debug, Clone, PartialEq)]
pub enum DrawCall {
    Fill(Rgba),
    MoveTo { x: f64, y: f64 },
    StrokeTo { x: f64, y: f64, color: Rgba, width: f64 },
}

/// A surface that records calls instead of drawing.
#[derive(Debug, Clone, Default)]
pub struct RecordingSurface {
    pub width: u32,
    pub height: u32,
    pub calls: Vec<DrawCall>,
}

impl RecordingSurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            calls: Vec::new(),
        }
    }

    /// Drain the recorded calls.
    pub fn take_calls(&mut self) -> Vec<DrawCall> {
        std::mem::take(&mut self.calls)
    }

    /// Number of stroked segments (dots included).
    pub fn stroke_count(&self) -> usize {
        self.calls
            .iter()
            .filter(|c| matches!(c, DrawCall::StrokeTo { .. }))
            .count()
    }
}

impl Surface for RecordingSurface {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn fill_background(&mut self, color: Color) {
        self.calls.push(DrawCall::Fill(color.into()));
    }

    fn move_to(&mut self, point: Point) {
        self.calls.push(DrawCall::MoveTo {
            x: point.x,
            y: point.y,
        });
    }

    fn stroke_to(&mut self, point: Point, style: &PenStyle) {
        self.calls.push(DrawCall::StrokeTo {
            x: point.x,
            y: point.y,
            color: style.color.into(),
            width: style.width,
        });
    }

    fn resize(&mut self, width: u32, height: u32) -> bool {
        if (width, height) == (self.width, self.height) {
            return false;
        }
        self.width = width;
        self.height = height;
        self.calls.clear();
        true
    }
}
