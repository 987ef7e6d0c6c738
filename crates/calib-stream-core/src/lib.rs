//! Core types for the calib-stream chessboard detection pipeline.
//!
//! This crate is intentionally small. It describes what flows through the
//! pipeline (frames, pixel buffers, pattern geometry, detection results) and
//! does *not* depend on any concrete detector, capture device or thread model.

mod buffer;
mod frame;
mod logger;
mod result;
mod spec;
mod view;

pub use buffer::PixelBuffer;
pub use frame::{Frame, PixelFormat};
pub use result::DetectionResult;
pub use spec::{parse_size, PatternSpec, ResizeSpec, SizeParseError};
pub use view::{luma_from_rgb, ImageView};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::init_with_level;
