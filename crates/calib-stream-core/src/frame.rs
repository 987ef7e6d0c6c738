use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

/// Pixel layout tag carried by a captured frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    /// Planar Y, U, V with 4:2:0 chroma subsampling (YU12 / I420).
    I420,
    /// Y plane followed by interleaved V/U (NV21).
    Nv21,
    /// Packed 8-bit RGB.
    Rgb8,
    /// Packed 8-bit RGBA.
    Rgba8,
}

impl PixelFormat {
    pub fn name(self) -> &'static str {
        match self {
            PixelFormat::I420 => "I420",
            PixelFormat::Nv21 => "NV21",
            PixelFormat::Rgb8 => "RGB8",
            PixelFormat::Rgba8 => "RGBA8",
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One capture unit handed out by a frame source.
///
/// A frame exclusively owns its backing buffer. It is deliberately not
/// `Clone`: the only way to end its life inside the pipeline is to move it
/// back into the source it came from, which hands the buffer back to the
/// capture pool.
#[derive(Debug)]
pub struct Frame {
    sequence: u64,
    width: u32,
    height: u32,
    format: PixelFormat,
    data: Vec<u8>,
    captured_at: Instant,
}

impl Frame {
    pub fn new(sequence: u64, width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> Self {
        Self {
            sequence,
            width,
            height,
            format,
            data,
            captured_at: Instant::now(),
        }
    }

    /// Expected byte length of an I420 frame of the given size.
    ///
    /// Chroma planes are rounded up for odd dimensions.
    pub fn i420_len(width: u32, height: u32) -> usize {
        let w = width as usize;
        let h = height as usize;
        let cw = w.div_ceil(2);
        let ch = h.div_ceil(2);
        w * h + 2 * cw * ch
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    /// Give up the frame and return its backing buffer.
    ///
    /// Used by frame sources when a frame is released back into the pool.
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn i420_len_rounds_chroma_up() {
        assert_eq!(Frame::i420_len(640, 480), 640 * 480 * 3 / 2);
        // 3x3 luma, 2x2 chroma planes.
        assert_eq!(Frame::i420_len(3, 3), 9 + 2 * 4);
        assert_eq!(Frame::i420_len(0, 0), 0);
    }

    #[test]
    fn into_data_returns_backing_buffer() {
        let frame = Frame::new(7, 2, 2, PixelFormat::I420, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(frame.sequence(), 7);
        assert_eq!(frame.format().to_string(), "I420");
        assert_eq!(frame.into_data(), vec![1, 2, 3, 4, 5, 6]);
    }
}
