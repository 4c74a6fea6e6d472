//! Drawing actions, the unit of the shared room log.
//!
//! Decoding is lenient: a malformed or missing coordinate becomes `0.0` and
//! the action is still accepted, so a single sloppy client cannot stall the
//! log for everyone else.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Default stroke color for a `Start` without one.
pub const DEFAULT_COLOR: &str = "#000000";
/// Default brush size for a `Start` without a usable one.
pub const DEFAULT_BRUSH_SIZE: f64 = 1.0;

/// A sampled pointer position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    #[serde(default, deserialize_with = "lenient_f64")]
    pub x: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub y: f64,
    /// Pen pressure in `0.0..=1.0`; scales the rendered width.
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient_opt_f64")]
    pub pressure: Option<f64>,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y, pressure: None }
    }

    pub fn with_pressure(x: f64, y: f64, pressure: f64) -> Self {
        Self {
            x,
            y,
            pressure: Some(pressure),
        }
    }
}

impl From<Point> for kurbo::Point {
    fn from(point: Point) -> Self {
        kurbo::Point::new(point.x, point.y)
    }
}

impl From<kurbo::Point> for Point {
    fn from(point: kurbo::Point) -> Self {
        Point::new(point.x, point.y)
    }
}

/// Drawing tool carried on `Start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    #[default]
    Pen,
    /// Translucent wide stroke.
    Highlighter,
    /// Paints the background color.
    Eraser,
}

impl Tool {
    /// Resolve a tool by wire name; unknown names fall back to the pen.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "highlighter" => Tool::Highlighter,
            "eraser" => Tool::Eraser,
            _ => Tool::Pen,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Tool::Pen => "pen",
            Tool::Highlighter => "highlighter",
            Tool::Eraser => "eraser",
        }
    }
}

/// Brush settings chosen at pointer-down.
#[derive(Debug, Clone, PartialEq)]
pub struct BrushStyle {
    /// CSS hex color, e.g. `#ff8800`.
    pub color: String,
    pub brush_size: f64,
    pub tool: Tool,
}

impl BrushStyle {
    pub fn new(color: impl Into<String>, brush_size: f64, tool: Tool) -> Self {
        Self {
            color: color.into(),
            brush_size,
            tool,
        }
    }
}

impl Default for BrushStyle {
    fn default() -> Self {
        Self::new(DEFAULT_COLOR, DEFAULT_BRUSH_SIZE, Tool::Pen)
    }
}

/// One atomic drawing event.
///
/// `peer` is stamped by the room registry with the id of the connection that
/// sent the action. Replay keys pen state on it so that interleaved strokes
/// from different participants never join up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    /// Begin a stroke at `(x, y)`.
    Start {
        #[serde(default, deserialize_with = "lenient_f64")]
        x: f64,
        #[serde(default, deserialize_with = "lenient_f64")]
        y: f64,
        #[serde(default = "default_color", deserialize_with = "lenient_color")]
        color: String,
        #[serde(
            rename = "brushSize",
            default = "default_brush_size",
            deserialize_with = "lenient_brush_size"
        )]
        brush_size: f64,
        #[serde(default, deserialize_with = "lenient_tool")]
        tool: Tool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        peer: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient_timestamp")]
        timestamp: Option<u64>,
    },
    /// Extend the current stroke to `(x, y)`.
    Draw {
        #[serde(default, deserialize_with = "lenient_f64")]
        x: f64,
        #[serde(default, deserialize_with = "lenient_f64")]
        y: f64,
        #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient_opt_f64")]
        pressure: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        peer: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient_timestamp")]
        timestamp: Option<u64>,
    },
    /// Wipe the canvas. Kept in the log as a replay instruction.
    Clear {
        #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient_timestamp")]
        timestamp: Option<u64>,
    },
}

impl Action {
    /// Create a `Start` at `point` with the given brush.
    pub fn start(point: Point, style: &BrushStyle) -> Self {
        Action::Start {
            x: point.x,
            y: point.y,
            color: style.color.clone(),
            brush_size: style.brush_size,
            tool: style.tool,
            peer: None,
            timestamp: None,
        }
    }

    /// Create a `Draw` to `point`, keeping its pressure.
    pub fn draw(point: Point) -> Self {
        Action::Draw {
            x: point.x,
            y: point.y,
            pressure: point.pressure,
            peer: None,
            timestamp: None,
        }
    }

    pub fn clear() -> Self {
        Action::Clear { timestamp: None }
    }

    /// The position this action moves the pen to, if any.
    pub fn point(&self) -> Option<Point> {
        match self {
            Action::Start { x, y, .. } => Some(Point::new(*x, *y)),
            Action::Draw { x, y, pressure, .. } => Some(Point {
                x: *x,
                y: *y,
                pressure: *pressure,
            }),
            Action::Clear { .. } => None,
        }
    }

    /// Originating participant, when stamped.
    pub fn peer(&self) -> Option<&str> {
        match self {
            Action::Start { peer, .. } | Action::Draw { peer, .. } => peer.as_deref(),
            Action::Clear { .. } => None,
        }
    }

    /// Overwrite the originating participant.
    pub fn set_peer(&mut self, id: &str) {
        match self {
            Action::Start { peer, .. } | Action::Draw { peer, .. } => *peer = Some(id.to_string()),
            Action::Clear { .. } => {}
        }
    }

    /// Builder form of [`Action::set_peer`].
    pub fn with_peer(mut self, id: &str) -> Self {
        self.set_peer(id);
        self
    }

    pub fn timestamp(&self) -> Option<u64> {
        match self {
            Action::Start { timestamp, .. }
            | Action::Draw { timestamp, .. }
            | Action::Clear { timestamp } => *timestamp,
        }
    }

    pub fn with_timestamp(mut self, ms: u64) -> Self {
        match &mut self {
            Action::Start { timestamp, .. }
            | Action::Draw { timestamp, .. }
            | Action::Clear { timestamp } => *timestamp = Some(ms),
        }
        self
    }

    pub fn is_start(&self) -> bool {
        matches!(self, Action::Start { .. })
    }

    pub fn is_draw(&self) -> bool {
        matches!(self, Action::Draw { .. })
    }

    pub fn is_clear(&self) -> bool {
        matches!(self, Action::Clear { .. })
    }

    /// Brush of a `Start`.
    pub fn brush(&self) -> Option<BrushStyle> {
        match self {
            Action::Start {
                color,
                brush_size,
                tool,
                ..
            } => Some(BrushStyle::new(color.clone(), *brush_size, *tool)),
            _ => None,
        }
    }
}

fn default_color() -> String {
    DEFAULT_COLOR.to_string()
}

fn default_brush_size() -> f64 {
    DEFAULT_BRUSH_SIZE
}

fn number_from(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    number.filter(|n| n.is_finite())
}

fn lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(number_from(&value).unwrap_or(0.0))
}

fn lenient_opt_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(number_from(&value))
}

fn lenient_brush_size<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(number_from(&value)
        .filter(|size| *size > 0.0)
        .unwrap_or(DEFAULT_BRUSH_SIZE))
}

fn lenient_color<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::String(s) if !s.trim().is_empty() => s,
        _ => default_color(),
    })
}

fn lenient_tool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Tool, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(value.as_str().map(Tool::from_name).unwrap_or_default())
}

fn lenient_timestamp<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(value.as_u64())
}
