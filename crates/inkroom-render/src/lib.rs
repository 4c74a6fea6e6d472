//! InkRoom Render Library
//!
//! Raster implementation of the replay [`Surface`](inkroom_core::Surface).
//! Uses tiny-skia so canvases can be rendered and exported without a GPU.

mod pixmap;

pub use pixmap::{PixmapSurface, RenderError, RenderResult};
