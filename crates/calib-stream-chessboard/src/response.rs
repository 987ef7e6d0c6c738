//! Dense ChESS ("Chess-board Extraction by Subtraction and Summation")
//! response on 8-bit grayscale images.
//!
//! Each pixel is scored from 16 samples on a ring around it:
//! `R = SR - DR - 16 * MR` where `SR` rewards opposite samples agreeing while
//! quarter-turned samples disagree (a saddle), `DR` penalises opposite samples
//! disagreeing (an edge) and `MR` penalises a ring mean far from the local
//! mean (a blob). Inner chessboard corners score strongly positive; edges,
//! outer board corners and flat regions score zero or negative.

use image::GrayImage;

/// 16 point ring, clockwise from the top. FAST-16 pattern at r=5.
pub const RING5: [(i32, i32); 16] = [
    (0, -5),
    (2, -5),
    (3, -3),
    (5, -2),
    (5, 0),
    (5, 2),
    (3, 3),
    (2, 5),
    (0, 5),
    (-2, 5),
    (-3, 3),
    (-5, 2),
    (-5, 0),
    (-5, -2),
    (-3, -3),
    (-2, -5),
];

/// Same angles at r=10, for heavier blur or larger squares.
pub const RING10: [(i32, i32); 16] = [
    (0, -10),
    (4, -10),
    (6, -6),
    (10, -4),
    (10, 0),
    (10, 4),
    (6, 6),
    (4, 10),
    (0, 10),
    (-4, 10),
    (-6, 6),
    (-10, 4),
    (-10, 0),
    (-10, -4),
    (-6, -6),
    (-4, -10),
];

#[inline]
pub fn ring_offsets(radius: u32) -> (&'static [(i32, i32); 16], usize) {
    match radius {
        10 => (&RING10, 10),
        _ => (&RING5, 5),
    }
}

/// Dense response map in row-major layout.
#[derive(Clone, Debug)]
pub struct ResponseMap {
    pub width: usize,
    pub height: usize,
    pub data: Vec<f32>,
}

impl ResponseMap {
    #[inline]
    pub fn at(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.width + x]
    }

    /// Largest finite response, if any.
    pub fn max(&self) -> Option<f32> {
        self.data
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .fold(None, |acc, v| Some(acc.map_or(v, |m: f32| m.max(v))))
    }
}

/// Compute the response for every pixel where the full ring fits.
///
/// Pixels closer than the ring radius to the border are left at zero.
pub fn chess_response(img: &GrayImage, ring_radius: u32) -> ResponseMap {
    let w = img.width() as usize;
    let h = img.height() as usize;
    let (ring, r) = ring_offsets(ring_radius);
    let mut data = vec![0.0f32; w * h];

    if w <= 2 * r || h <= 2 * r {
        return ResponseMap {
            width: w,
            height: h,
            data,
        };
    }

    let src = img.as_raw();
    for y in r..(h - r) {
        for x in r..(w - r) {
            data[y * w + x] = response_at(src, w, x as i32, y as i32, ring);
        }
    }

    ResponseMap {
        width: w,
        height: h,
        data,
    }
}

#[inline]
fn response_at(img: &[u8], w: usize, x: i32, y: i32, ring: &[(i32, i32); 16]) -> f32 {
    let px = |xx: i32, yy: i32| img[yy as usize * w + xx as usize] as i32;

    let mut s = [0i32; 16];
    for (k, &(dx, dy)) in ring.iter().enumerate() {
        s[k] = px(x + dx, y + dy);
    }

    let mut sr = 0i32;
    for k in 0..4 {
        let a = s[k] + s[k + 8];
        let b = s[k + 4] + s[k + 12];
        sr += (a - b).abs();
    }

    let mut dr = 0i32;
    for k in 0..8 {
        dr += (s[k] - s[k + 8]).abs();
    }

    let mu_ring = s.iter().sum::<i32>() as f32 / 16.0;
    let mu_local =
        (px(x, y) + px(x, y - 1) + px(x, y + 1) + px(x + 1, y) + px(x - 1, y)) as f32 / 5.0;
    let mr = (mu_ring - mu_local).abs();

    sr as f32 - dr as f32 - 16.0 * mr
}
