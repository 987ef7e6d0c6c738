//! Corner overlay in the style of OpenCV's `drawChessboardCorners`.
//!
//! Found boards get a circle and a cross on every corner, coloured per row,
//! plus a polyline joining consecutive corners in row-major order. Boards that
//! were not found are returned unchanged.

use calib_stream_core::{luma_from_rgb, DetectionResult, PatternSpec, PixelBuffer};
use nalgebra::Point2;

/// Row colours (RGB), cycled for boards with more rows.
pub const ROW_COLORS: [[u8; 3]; 7] = [
    [255, 0, 0],
    [255, 128, 0],
    [200, 200, 0],
    [0, 255, 0],
    [0, 200, 200],
    [0, 0, 255],
    [255, 0, 255],
];

const MARK_RADIUS: i32 = 4;

struct Canvas<'a> {
    buf: &'a mut [u8],
    width: usize,
    height: usize,
    channels: usize,
}

impl Canvas<'_> {
    /// Bounds-checked write. Gray canvases get the colour's luma.
    #[inline]
    fn set_pixel(&mut self, x: i32, y: i32, color: [u8; 3]) {
        if x < 0 || y < 0 || x as usize >= self.width || y as usize >= self.height {
            return;
        }
        let idx = (y as usize * self.width + x as usize) * self.channels;
        if self.channels == 1 {
            self.buf[idx] = luma_from_rgb(color[0], color[1], color[2]);
        } else {
            self.buf[idx..idx + 3].copy_from_slice(&color);
        }
    }

    /// Bresenham line.
    fn line(&mut self, x0: i32, y0: i32, x1: i32, y1: i32, color: [u8; 3]) {
        let dx = (x1 - x0).abs();
        let dy = -(y1 - y0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let sy = if y0 < y1 { 1 } else { -1 };
        let mut err = dx + dy;
        let (mut x, mut y) = (x0, y0);

        loop {
            self.set_pixel(x, y, color);
            if x == x1 && y == y1 {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                if x == x1 {
                    break;
                }
                err += dy;
                x += sx;
            }
            if e2 <= dx {
                if y == y1 {
                    break;
                }
                err += dx;
                y += sy;
            }
        }
    }

    /// Midpoint circle outline.
    fn circle(&mut self, cx: i32, cy: i32, r: i32, color: [u8; 3]) {
        let mut x = r;
        let mut y = 0;
        let mut err = 1 - r;
        while x >= y {
            for (px, py) in [
                (x, y),
                (y, x),
                (-y, x),
                (-x, y),
                (-x, -y),
                (-y, -x),
                (y, -x),
                (x, -y),
            ] {
                self.set_pixel(cx + px, cy + py, color);
            }
            y += 1;
            if err < 0 {
                err += 2 * y + 1;
            } else {
                x -= 1;
                err += 2 * (y - x) + 1;
            }
        }
    }

    fn cross(&mut self, cx: i32, cy: i32, r: i32, color: [u8; 3]) {
        self.line(cx - r, cy - r, cx + r, cy + r, color);
        self.line(cx - r, cy + r, cx + r, cy - r, color);
    }
}

#[inline]
fn pixel(p: &Point2<f32>) -> (i32, i32) {
    (p.x.round() as i32, p.y.round() as i32)
}

/// Copy `buffer` and draw the detection on the copy.
pub fn draw_chessboard_corners(
    buffer: &PixelBuffer,
    pattern: PatternSpec,
    result: &DetectionResult,
) -> PixelBuffer {
    let mut out = buffer.clone();
    if !result.found || result.corners.is_empty() {
        return out;
    }

    let (width, height) = out.dimensions();
    let channels = out.channels();
    let buf: &mut [u8] = match &mut out {
        PixelBuffer::Gray(img) => &mut **img,
        PixelBuffer::Rgb(img) => &mut **img,
    };
    let mut canvas = Canvas {
        buf,
        width: width as usize,
        height: height as usize,
        channels,
    };

    let mut prev: Option<(i32, i32)> = None;
    for (row, corners) in result.rows(&pattern).enumerate() {
        let color = ROW_COLORS[row % ROW_COLORS.len()];
        for p in corners {
            let (x, y) = pixel(p);
            if let Some((px, py)) = prev {
                canvas.line(px, py, x, y, color);
            }
            canvas.circle(x, y, MARK_RADIUS, color);
            canvas.cross(x, y, MARK_RADIUS - 1, color);
            prev = Some((x, y));
        }
    }

    out
}
