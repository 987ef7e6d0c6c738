//! Chessboard inner-corner detector for live calibration capture.
//!
//! ## Quickstart
//!
//! ```
//! use calib_stream_chessboard::{ChessboardDetector, ChessboardParams, PatternDetector};
//! use calib_stream_core::{PatternSpec, PixelBuffer};
//! use image::GrayImage;
//!
//! let detector = ChessboardDetector::new(ChessboardParams::default());
//! let buffer = PixelBuffer::Gray(GrayImage::new(64, 48));
//! let result = detector.detect(&buffer, PatternSpec::new(4, 5)).unwrap();
//! assert!(!result.found);
//! ```
//!
//! Algorithm:
//! 1. Dense ChESS response on the grayscale image.
//! 2. Threshold, non-maximum suppression and sub-pixel refinement of peaks.
//! 3. Fast check: give up when there are fewer peaks than pattern corners.
//! 4. Estimate the corner spacing (median nearest-neighbour distance) and the
//!    grid axis (circular mean of neighbour directions modulo 90°).
//! 5. For each corner, keep at most one right/left/up/down neighbour with
//!    distance close to the spacing and direction close to a grid axis.
//! 6. Keep mutual edges, split into connected components and BFS integer
//!    coordinates over each one.
//! 7. Accept the component whose coordinates fill exactly `columns x rows`
//!    (in `Refined` mode, after a completion pass for missing corners) and
//!    emit the corners row-major, top-left first.

mod detector;
mod draw;
mod geom;
mod gridgraph;
mod params;
mod peaks;
mod render;
mod response;

pub use detector::{ChessboardDebug, ChessboardDetector, DetectError, PatternDetector, RejectReason};
pub use draw::{draw_chessboard_corners, ROW_COLORS};
pub use gridgraph::{GridGraph, NeighborDirection, NodeNeighbor};
pub use params::{ChessboardParams, DetectionMode, GridGraphParams};
pub use peaks::Candidate;
pub use render::BoardRender;
pub use response::{chess_response, ResponseMap};
