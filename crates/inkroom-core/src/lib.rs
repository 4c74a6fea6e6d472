//! InkRoom Core Library
//!
//! Platform-agnostic data structures and logic for InkRoom shared canvases:
//! the action log format, stroke compaction, pointer capture, deterministic
//! replay and the client side of the action channel.

pub mod action;
pub mod capture;
pub mod color;
pub mod compact;
pub mod replay;
pub mod session;
pub mod sync;

pub use action::{Action, BrushStyle, DEFAULT_BRUSH_SIZE, DEFAULT_COLOR, Point, Tool};
pub use capture::{CaptureConfig, CaptureError, DEFAULT_ALPHA, StrokeCapture};
pub use color::{Rgba, parse_color};
pub use compact::{
    DEFAULT_EPSILON, KEEP_SUFFIX, Limits, LimitsError, MAX_LOG_SIZE, compact_batch, simplify,
    trim_log,
};
pub use replay::{DrawCall, PenStyle, RecordingSurface, Replayer, Surface, render};
pub use session::{DrawingSession, SessionEvent};
pub use sync::{ChannelEvent, ClientMessage, ConnectionState, ProtocolError, ServerMessage};

#[cfg(not(target_arch = "wasm32"))]
pub use sync::{NativeWebSocket, validate_url};
