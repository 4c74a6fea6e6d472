//! Pointer capture with exponential smoothing.
//!
//! Turns pointer down/move/up into `Start`/`Draw` actions. The smoothed point
//! is what gets emitted, so the local and remote copies of a stroke match.

use kurbo::Affine;
use thiserror::Error;

use crate::action::{Action, BrushStyle, Point};

/// Default smoothing factor.
pub const DEFAULT_ALPHA: f64 = 0.5;

/// Capture configuration errors.
#[derive(Debug, Error, PartialEq)]
pub enum CaptureError {
    #[error("smoothing alpha must be in (0, 1], got {0}")]
    InvalidAlpha(f64),
}

/// Capture settings.
#[derive(Debug, Clone, Copy)]
pub struct CaptureConfig {
    /// Weight of the raw sample: `smoothed = alpha * raw + (1 - alpha) * previous`.
    pub alpha: f64,
    /// Maps pointer coordinates into surface coordinates.
    pub transform: Affine,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            alpha: DEFAULT_ALPHA,
            transform: Affine::IDENTITY,
        }
    }
}

impl CaptureConfig {
    pub fn validate(&self) -> Result<(), CaptureError> {
        if self.alpha.is_finite() && self.alpha > 0.0 && self.alpha <= 1.0 {
            Ok(())
        } else {
            Err(CaptureError::InvalidAlpha(self.alpha))
        }
    }
}

/// Stroke capture state for one local pointer.
#[derive(Debug, Clone)]
pub struct StrokeCapture {
    config: CaptureConfig,
    style: BrushStyle,
    /// Last emitted point; `Some` exactly while a stroke is active.
    prev_smoothed: Option<Point>,
}

impl Default for StrokeCapture {
    fn default() -> Self {
        Self {
            config: CaptureConfig::default(),
            style: BrushStyle::default(),
            prev_smoothed: None,
        }
    }
}

impl StrokeCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: CaptureConfig) -> Result<Self, CaptureError> {
        config.validate()?;
        Ok(Self {
            config,
            ..Self::default()
        })
    }

    pub fn with_alpha(alpha: f64) -> Result<Self, CaptureError> {
        Self::with_config(CaptureConfig {
            alpha,
            ..CaptureConfig::default()
        })
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    pub fn style(&self) -> &BrushStyle {
        &self.style
    }

    /// Brush for the next stroke. An active stroke keeps its brush.
    pub fn set_style(&mut self, style: BrushStyle) {
        self.style = style;
    }

    pub fn is_active(&self) -> bool {
        self.prev_smoothed.is_some()
    }

    fn to_surface(&self, point: Point) -> Point {
        let mapped = self.config.transform * kurbo::Point::from(point);
        Point {
            x: mapped.x,
            y: mapped.y,
            pressure: point.pressure,
        }
    }

    /// Begin a stroke. Always yields a `Start`.
    pub fn pointer_down(&mut self, position: Point) -> Action {
        let start = self.to_surface(position);
        self.prev_smoothed = Some(Point::new(start.x, start.y));
        Action::start(start, &self.style)
    }

    /// Extend the active stroke with a smoothed `Draw`; `None` when no stroke is active.
    pub fn pointer_move(&mut self, position: Point) -> Option<Action> {
        let prev = self.prev_smoothed?;
        let raw = self.to_surface(position);
        let alpha = self.config.alpha;
        let smoothed = Point {
            x: alpha * raw.x + (1.0 - alpha) * prev.x,
            y: alpha * raw.y + (1.0 - alpha) * prev.y,
            pressure: raw.pressure,
        };
        self.prev_smoothed = Some(smoothed);
        Some(Action::draw(smoothed))
    }

    /// End the stroke. Returns whether one was active.
    pub fn pointer_up(&mut self) -> bool {
        self.prev_smoothed.take().is_some()
    }
}
