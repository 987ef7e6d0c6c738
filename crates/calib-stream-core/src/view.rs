/// Borrowed view over an interleaved 8-bit image.
#[derive(Clone, Copy, Debug)]
pub struct ImageView<'a> {
    pub width: usize,
    pub height: usize,
    pub channels: usize,
    pub data: &'a [u8], // row-major, len = w*h*channels
}

impl<'a> ImageView<'a> {
    pub fn new(width: usize, height: usize, channels: usize, data: &'a [u8]) -> Option<Self> {
        if channels == 0 || width.checked_mul(height)?.checked_mul(channels)? != data.len() {
            return None;
        }
        Some(Self {
            width,
            height,
            channels,
            data,
        })
    }

    /// Sample value at integer coordinates, clamped to the image border.
    #[inline]
    pub fn at_clamped(&self, x: i32, y: i32, c: usize) -> u8 {
        let xx = x.clamp(0, self.width as i32 - 1) as usize;
        let yy = y.clamp(0, self.height as i32 - 1) as usize;
        self.data[(yy * self.width + xx) * self.channels + c]
    }

    /// Bilinear sample of channel `c` at a sub-pixel position.
    ///
    /// Pixel centres sit on integer coordinates; positions outside the image
    /// replicate the border pixels.
    #[inline]
    pub fn sample_bilinear(&self, x: f32, y: f32, c: usize) -> f32 {
        let x0 = x.floor() as i32;
        let y0 = y.floor() as i32;
        let fx = x - x0 as f32;
        let fy = y - y0 as f32;

        let p00 = self.at_clamped(x0, y0, c) as f32;
        let p10 = self.at_clamped(x0 + 1, y0, c) as f32;
        let p01 = self.at_clamped(x0, y0 + 1, c) as f32;
        let p11 = self.at_clamped(x0 + 1, y0 + 1, c) as f32;

        let a = p00 + fx * (p10 - p00);
        let b = p01 + fx * (p11 - p01);
        a + fy * (b - a)
    }

    #[inline]
    pub fn sample_bilinear_u8(&self, x: f32, y: f32, c: usize) -> u8 {
        (self.sample_bilinear(x, y, c) + 0.5).clamp(0.0, 255.0) as u8
    }
}

/// Rec.601 luma of an RGB triple.
#[inline]
pub fn luma_from_rgb(r: u8, g: u8, b: u8) -> u8 {
    let y = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
    (y + 0.5).clamp(0.0, 255.0) as u8
}
