//! Real-time chessboard detection for camera calibration capture.
//!
//! Frames arrive from a capture source, are converted to a dense pixel
//! buffer, optionally downscaled, searched for a chessboard and handed to a
//! sink for display. One worker runs one cycle at a time; the source keeps
//! only the newest unprocessed frame, so a slow cycle drops frames instead of
//! building a backlog.
//!
//! ## Quickstart
//!
//! ```no_run
//! use calib_stream::chessboard::ChessboardDetector;
//! use calib_stream::config::MemoryPreferences;
//! use calib_stream::pipeline::{PipelineCoordinator, PipelineOptions, PipelineWorker};
//! use calib_stream::sink::LatestResultSink;
//! use calib_stream::source::{SyntheticBoardCamera, SyntheticOptions};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let options = PipelineOptions::default();
//! let source = options.frame_source();
//! let display = LatestResultSink::new();
//!
//! let coordinator = PipelineCoordinator::new(
//!     Arc::new(source.clone()),
//!     Arc::new(MemoryPreferences::new()),
//!     Box::new(ChessboardDetector::default()),
//! )
//! .with_sink(display.clone());
//!
//! let worker = PipelineWorker::spawn(coordinator, source.signals(), &options)?;
//! let camera = SyntheticBoardCamera::spawn(
//!     source.writer(),
//!     SyntheticOptions { frames: Some(30), ..Default::default() },
//! )?;
//! camera.join()?;
//! let stats = worker.join()?;
//! println!("{} cycles, {} detections", stats.cycles, stats.detections);
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `calib_stream::core`: frames, pixel buffers, pattern geometry, results.
//! - `calib_stream::chessboard`: the chessboard detector and corner drawing.
//! - [`convert`]: I420 to gray or RGB, bilinear resize.
//! - [`config`]: preference stores and the per-cycle [`PipelineConfig`].
//! - [`source`]: frame sources and capture threads.
//! - [`pipeline`]: the per-frame coordinator and its worker thread.
//! - [`sink`]: result consumers.

pub use calib_stream_chessboard as chessboard;
pub use calib_stream_core as core;

pub mod config;
pub mod convert;
pub mod pipeline;
pub mod sink;
pub mod source;

pub use calib_stream_chessboard::{ChessboardDetector, ChessboardParams, DetectionMode, PatternDetector};
pub use calib_stream_core::{DetectionResult, Frame, PatternSpec, PixelBuffer, PixelFormat, ResizeSpec};
pub use config::{MemoryPreferences, PipelineConfig, PreferenceStore};
pub use pipeline::{PipelineCoordinator, PipelineError, PipelineOptions, PipelineWorker};
pub use sink::{ResultSink, SinkError};
pub use source::{FrameSource, PooledFrameSource};
