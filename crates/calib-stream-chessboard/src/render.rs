//! Synthetic chessboard images with known corner positions.

use calib_stream_core::PatternSpec;
use image::{GrayImage, Luma};
use nalgebra::{Point2, Rotation2, Vector2};
use serde::{Deserialize, Serialize};

/// Placement and look of a rendered board.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoardRender {
    /// Squares per row (`columns + 1` for a pattern).
    pub squares_x: u32,
    pub squares_y: u32,
    pub square_px: f32,
    /// Board centre in image pixels.
    pub center: Point2<f32>,
    /// Rotation of the board about its centre (radians, clockwise on screen).
    pub angle_rad: f32,
    pub image_width: u32,
    pub image_height: u32,
    pub dark: u8,
    pub light: u8,
    pub background: u8,
    /// Samples per pixel along each axis.
    pub supersample: u32,
}

impl BoardRender {
    /// Board for `pattern`, centred in a `width x height` image.
    pub fn for_pattern(pattern: PatternSpec, square_px: f32, width: u32, height: u32) -> Self {
        Self {
            squares_x: (pattern.columns.max(0) + 1) as u32,
            squares_y: (pattern.rows.max(0) + 1) as u32,
            square_px,
            center: Point2::new(width as f32 / 2.0, height as f32 / 2.0),
            angle_rad: 0.0,
            image_width: width,
            image_height: height,
            dark: 20,
            light: 235,
            background: 235,
            supersample: 4,
        }
    }

    pub fn with_center(mut self, center: Point2<f32>) -> Self {
        self.center = center;
        self
    }

    pub fn with_angle(mut self, angle_rad: f32) -> Self {
        self.angle_rad = angle_rad;
        self
    }

    fn half_size(&self) -> Vector2<f32> {
        Vector2::new(
            self.squares_x as f32 * self.square_px / 2.0,
            self.squares_y as f32 * self.square_px / 2.0,
        )
    }

    /// Board plane (origin at the top-left board corner) to pixel-edge
    /// coordinates.
    fn to_image(&self, u: f32, v: f32) -> Point2<f32> {
        let rot = Rotation2::new(self.angle_rad);
        self.center + rot * (Vector2::new(u, v) - self.half_size())
    }

    fn shade_at(&self, p: Point2<f32>) -> u8 {
        let rot = Rotation2::new(-self.angle_rad);
        let b = rot * (p - self.center) + self.half_size();
        let a = (b.x / self.square_px).floor();
        let c = (b.y / self.square_px).floor();
        if a < 0.0 || c < 0.0 || a >= self.squares_x as f32 || c >= self.squares_y as f32 {
            return self.background;
        }
        if (a as i64 + c as i64) % 2 == 0 {
            self.dark
        } else {
            self.light
        }
    }

    /// Inner corners in pixel-centre coordinates, row-major from the top-left.
    pub fn inner_corners(&self) -> Vec<Point2<f32>> {
        let mut out = Vec::new();
        for j in 1..self.squares_y {
            for i in 1..self.squares_x {
                let p = self.to_image(i as f32 * self.square_px, j as f32 * self.square_px);
                out.push(Point2::new(p.x - 0.5, p.y - 0.5));
            }
        }
        out
    }

    /// Anti-aliased grayscale rendering.
    pub fn render(&self) -> GrayImage {
        let n = self.supersample.max(1);
        let step = 1.0 / n as f32;
        GrayImage::from_fn(self.image_width, self.image_height, |x, y| {
            let mut acc = 0u32;
            for sy in 0..n {
                for sx in 0..n {
                    let p = Point2::new(
                        x as f32 + (sx as f32 + 0.5) * step,
                        y as f32 + (sy as f32 + 0.5) * step,
                    );
                    acc += self.shade_at(p) as u32;
                }
            }
            Luma([((acc + n * n / 2) / (n * n)) as u8])
        })
    }
}
