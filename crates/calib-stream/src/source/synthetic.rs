use super::{spawn_capture, CaptureHandle, FrameWriter};
use crate::convert::{frame_from_gray, frame_from_rgb};
use calib_stream_chessboard::BoardRender;
use calib_stream_core::PatternSpec;
use image::{Rgb, RgbImage};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// Settings for [`SyntheticBoardCamera`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticOptions {
    pub width: u32,
    pub height: u32,
    /// Pattern printed on the board.
    pub pattern: PatternSpec,
    pub square_px: f32,
    pub fps: f64,
    /// Stop after this many frames; run until stopped when `None`.
    pub frames: Option<u64>,
    /// Peak board displacement from the image centre (pixels).
    pub drift_px: f32,
    /// Peak board rotation (degrees).
    pub sway_deg: f32,
    /// Tint the light squares so colour conversion has something to do.
    pub color: bool,
}

impl Default for SyntheticOptions {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            pattern: PatternSpec::new(4, 5),
            square_px: 40.0,
            fps: 30.0,
            frames: None,
            drift_px: 60.0,
            sway_deg: 8.0,
            color: false,
        }
    }
}

/// Camera stand-in that films a chessboard slowly drifting over a plain
/// background and publishes I420 frames.
pub struct SyntheticBoardCamera;

impl SyntheticBoardCamera {
    /// Board placement for frame `index`.
    pub fn board_at(options: &SyntheticOptions, index: u64) -> BoardRender {
        let t = index as f32 * 0.05;
        let center = Point2::new(
            options.width as f32 / 2.0 + options.drift_px * t.sin(),
            options.height as f32 / 2.0 + 0.5 * options.drift_px * (0.7 * t).cos(),
        );
        BoardRender::for_pattern(options.pattern, options.square_px, options.width, options.height)
            .with_center(center)
            .with_angle(options.sway_deg.to_radians() * (0.3 * t).sin())
    }

    pub fn spawn(writer: FrameWriter, options: SyntheticOptions) -> std::io::Result<CaptureHandle> {
        let fps = options.fps;
        let limit = options.frames;
        spawn_capture("synthetic-camera", writer, fps, limit, move |index| {
            let gray = Self::board_at(&options, index).render();
            let frame = if options.color {
                let rgb = RgbImage::from_fn(gray.width(), gray.height(), |x, y| {
                    let v = gray.get_pixel(x, y).0[0];
                    Rgb([v, v.saturating_sub(10), v.saturating_sub(40)])
                });
                frame_from_rgb(index, &rgb)
            } else {
                frame_from_gray(index, &gray)
            };
            Some(frame)
        })
    }
}
