use crate::view::{luma_from_rgb, ImageView};
use image::{GrayImage, Luma, Rgb, RgbImage, Rgba, RgbaImage};
use std::borrow::Cow;

/// Dense pixel buffer produced by conversion and consumed by detection.
///
/// Owned by whichever stage produced it last; once handed to a result sink
/// the pipeline never touches it again.
#[derive(Clone, Debug, PartialEq)]
pub enum PixelBuffer {
    Gray(GrayImage),
    Rgb(RgbImage),
}

impl PixelBuffer {
    /// Build a buffer from raw interleaved bytes (1 or 3 channels).
    pub fn from_raw(width: u32, height: u32, channels: usize, data: Vec<u8>) -> Option<Self> {
        match channels {
            1 => GrayImage::from_raw(width, height, data).map(PixelBuffer::Gray),
            3 => RgbImage::from_raw(width, height, data).map(PixelBuffer::Rgb),
            _ => None,
        }
    }

    pub fn width(&self) -> u32 {
        match self {
            PixelBuffer::Gray(img) => img.width(),
            PixelBuffer::Rgb(img) => img.width(),
        }
    }

    pub fn height(&self) -> u32 {
        match self {
            PixelBuffer::Gray(img) => img.height(),
            PixelBuffer::Rgb(img) => img.height(),
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width(), self.height())
    }

    pub fn channels(&self) -> usize {
        match self {
            PixelBuffer::Gray(_) => 1,
            PixelBuffer::Rgb(_) => 3,
        }
    }

    pub fn is_gray(&self) -> bool {
        matches!(self, PixelBuffer::Gray(_))
    }

    pub fn as_raw(&self) -> &[u8] {
        match self {
            PixelBuffer::Gray(img) => img.as_raw(),
            PixelBuffer::Rgb(img) => img.as_raw(),
        }
    }

    pub fn view(&self) -> ImageView<'_> {
        ImageView {
            width: self.width() as usize,
            height: self.height() as usize,
            channels: self.channels(),
            data: self.as_raw(),
        }
    }

    /// Single-channel version of the buffer; borrows when already gray.
    pub fn to_gray(&self) -> Cow<'_, GrayImage> {
        match self {
            PixelBuffer::Gray(img) => Cow::Borrowed(img),
            PixelBuffer::Rgb(img) => Cow::Owned(GrayImage::from_fn(img.width(), img.height(), |x, y| {
                let Rgb([r, g, b]) = *img.get_pixel(x, y);
                Luma([luma_from_rgb(r, g, b)])
            })),
        }
    }

    /// Opaque RGBA copy suitable for handing to a display surface.
    pub fn to_rgba8(&self) -> RgbaImage {
        match self {
            PixelBuffer::Gray(img) => RgbaImage::from_fn(img.width(), img.height(), |x, y| {
                let Luma([v]) = *img.get_pixel(x, y);
                Rgba([v, v, v, 255])
            }),
            PixelBuffer::Rgb(img) => RgbaImage::from_fn(img.width(), img.height(), |x, y| {
                let Rgb([r, g, b]) = *img.get_pixel(x, y);
                Rgba([r, g, b, 255])
            }),
        }
    }
}

impl From<GrayImage> for PixelBuffer {
    fn from(img: GrayImage) -> Self {
        PixelBuffer::Gray(img)
    }
}

impl From<RgbImage> for PixelBuffer {
    fn from(img: RgbImage) -> Self {
        PixelBuffer::Rgb(img)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_raw_checks_channels_and_length() {
        assert!(PixelBuffer::from_raw(2, 2, 1, vec![0; 4]).is_some());
        assert!(PixelBuffer::from_raw(2, 2, 3, vec![0; 12]).is_some());
        assert!(PixelBuffer::from_raw(2, 2, 3, vec![0; 4]).is_none());
        assert!(PixelBuffer::from_raw(2, 2, 4, vec![0; 16]).is_none());
    }

    #[test]
    fn gray_view_borrows() {
        let buf = PixelBuffer::from_raw(3, 1, 1, vec![1, 2, 3]).unwrap();
        assert!(matches!(buf.to_gray(), Cow::Borrowed(_)));
        let view = buf.view();
        assert_eq!((view.width, view.height, view.channels), (3, 1, 1));
    }

    #[test]
    fn rgb_to_gray_and_rgba() {
        let buf = PixelBuffer::from_raw(1, 1, 3, vec![255, 255, 255]).unwrap();
        assert_eq!(buf.to_gray().get_pixel(0, 0).0, [255]);
        assert_eq!(buf.to_rgba8().get_pixel(0, 0).0, [255, 255, 255, 255]);
        assert_eq!(buf.channels(), 3);
        assert_eq!(buf.dimensions(), (1, 1));
    }
}
