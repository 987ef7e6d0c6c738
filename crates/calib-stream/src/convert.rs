//! Frame to pixel-buffer conversion and optional downsampling.

use calib_stream_core::{Frame, PixelBuffer, PixelFormat, ResizeSpec};
use image::{GrayImage, Luma, Rgb, RgbImage};

#[cfg(feature = "tracing")]
use tracing::instrument;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConvertError {
    #[error("unsupported pixel format {0}, expected I420")]
    UnsupportedFormat(PixelFormat),
    #[error("frame {width}x{height} carries {actual} bytes, expected {expected}")]
    InvalidFrame {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
    #[error("invalid resize target {0}")]
    InvalidResizeSpec(ResizeSpec),
}

/// I420 plane views of a validated frame.
struct Planes<'a> {
    width: usize,
    y: &'a [u8],
    u: &'a [u8],
    v: &'a [u8],
    chroma_width: usize,
}

impl<'a> Planes<'a> {
    fn split(frame: &'a Frame) -> Result<Self, ConvertError> {
        if frame.format() != PixelFormat::I420 {
            return Err(ConvertError::UnsupportedFormat(frame.format()));
        }
        let (w, h) = (frame.width(), frame.height());
        let expected = Frame::i420_len(w, h);
        let data = frame.data();
        if w == 0 || h == 0 || data.len() != expected {
            return Err(ConvertError::InvalidFrame {
                width: w,
                height: h,
                expected,
                actual: data.len(),
            });
        }

        let luma = w as usize * h as usize;
        let chroma_width = (w as usize).div_ceil(2);
        let chroma = chroma_width * (h as usize).div_ceil(2);
        let (y, rest) = data.split_at(luma);
        let (u, v) = rest.split_at(chroma);
        Ok(Self {
            width: w as usize,
            y,
            u,
            v,
            chroma_width,
        })
    }

    #[inline]
    fn yuv(&self, x: usize, y: usize) -> (u8, u8, u8) {
        let c = (y / 2) * self.chroma_width + x / 2;
        (self.y[y * self.width + x], self.u[c], self.v[c])
    }
}

/// BT.601 limited-range YUV to RGB.
#[inline]
pub fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = 1.164 * (y as f32 - 16.0);
    let d = u as f32 - 128.0;
    let e = v as f32 - 128.0;
    let clamp = |x: f32| (x + 0.5).clamp(0.0, 255.0) as u8;
    [
        clamp(c + 1.596 * e),
        clamp(c - 0.391 * d - 0.813 * e),
        clamp(c + 2.018 * d),
    ]
}

/// Convert an I420 frame into a native-resolution buffer.
///
/// Grayscale is the Y plane as-is; colour is BT.601 limited-range RGB. The
/// frame is only read.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip(frame), fields(seq = frame.sequence(), width = frame.width(), height = frame.height()))
)]
pub fn convert(frame: &Frame, grayscale: bool) -> Result<PixelBuffer, ConvertError> {
    let planes = Planes::split(frame)?;
    let (w, h) = (frame.width(), frame.height());

    if grayscale {
        let img = GrayImage::from_raw(w, h, planes.y.to_vec()).ok_or(ConvertError::InvalidFrame {
            width: w,
            height: h,
            expected: Frame::i420_len(w, h),
            actual: frame.data().len(),
        })?;
        return Ok(PixelBuffer::Gray(img));
    }

    let img = RgbImage::from_fn(w, h, |x, y| {
        let (yy, u, v) = planes.yuv(x as usize, y as usize);
        Rgb(yuv_to_rgb(yy, u, v))
    });
    Ok(PixelBuffer::Rgb(img))
}

/// Downsample (or upsample) `buffer` to `target`.
///
/// `0x0` hands the input back untouched. Otherwise bilinear interpolation
/// with half-pixel centres and replicated borders, as OpenCV's
/// `INTER_LINEAR`.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip(buffer), fields(width = buffer.width(), height = buffer.height()))
)]
pub fn resize(buffer: PixelBuffer, target: ResizeSpec) -> Result<PixelBuffer, ConvertError> {
    if target.is_passthrough() {
        return Ok(buffer);
    }
    let Some((tw, th)) = target.target() else {
        return Err(ConvertError::InvalidResizeSpec(target));
    };
    if buffer.dimensions() == (tw, th) {
        return Ok(buffer);
    }
    // Nothing to sample from; the output still has the requested size.
    if buffer.width() == 0 || buffer.height() == 0 {
        return Ok(match buffer {
            PixelBuffer::Gray(_) => PixelBuffer::Gray(GrayImage::new(tw, th)),
            PixelBuffer::Rgb(_) => PixelBuffer::Rgb(RgbImage::new(tw, th)),
        });
    }

    let view = buffer.view();
    let sx = view.width as f32 / tw as f32;
    let sy = view.height as f32 / th as f32;
    let src = |x: u32, y: u32| {
        (
            ((x as f32 + 0.5) * sx - 0.5).max(0.0),
            ((y as f32 + 0.5) * sy - 0.5).max(0.0),
        )
    };

    let out = match &buffer {
        PixelBuffer::Gray(_) => PixelBuffer::Gray(GrayImage::from_fn(tw, th, |x, y| {
            let (fx, fy) = src(x, y);
            Luma([view.sample_bilinear_u8(fx, fy, 0)])
        })),
        PixelBuffer::Rgb(_) => PixelBuffer::Rgb(RgbImage::from_fn(tw, th, |x, y| {
            let (fx, fy) = src(x, y);
            Rgb([
                view.sample_bilinear_u8(fx, fy, 0),
                view.sample_bilinear_u8(fx, fy, 1),
                view.sample_bilinear_u8(fx, fy, 2),
            ])
        })),
    };
    Ok(out)
}

/// Encode a grayscale image as an I420 frame with neutral chroma.
///
/// Gray values are stored in the Y plane as-is, without mapping to the
/// 16..=235 luma range, so the grayscale path reproduces `img` exactly. The
/// colour path reads Y as limited range and stretches such frames.
pub fn frame_from_gray(sequence: u64, img: &GrayImage) -> Frame {
    let (w, h) = img.dimensions();
    let mut data = Vec::with_capacity(Frame::i420_len(w, h));
    data.extend_from_slice(img.as_raw());
    data.resize(Frame::i420_len(w, h), 128);
    Frame::new(sequence, w, h, PixelFormat::I420, data)
}

/// Encode an RGB image as an I420 frame (BT.601 limited range, 2x2 chroma
/// averaging).
pub fn frame_from_rgb(sequence: u64, img: &RgbImage) -> Frame {
    let (w, h) = img.dimensions();
    let (wu, hu) = (w as usize, h as usize);
    let cw = wu.div_ceil(2);
    let ch = hu.div_ceil(2);
    let mut data = vec![0u8; Frame::i420_len(w, h)];
    let (y_plane, rest) = data.split_at_mut(wu * hu);
    let (u_plane, v_plane) = rest.split_at_mut(cw * ch);

    let to_u8 = |x: f32| (x + 0.5).clamp(0.0, 255.0) as u8;
    for (x, y, p) in img.enumerate_pixels() {
        let [r, g, b] = p.0.map(|c| c as f32);
        y_plane[y as usize * wu + x as usize] =
            to_u8(16.0 + 0.257 * r + 0.504 * g + 0.098 * b);
    }

    for cy in 0..ch {
        for cx in 0..cw {
            let (mut su, mut sv, mut n) = (0.0f32, 0.0f32, 0.0f32);
            for y in (2 * cy)..(2 * cy + 2).min(hu) {
                for x in (2 * cx)..(2 * cx + 2).min(wu) {
                    let [r, g, b] = img.get_pixel(x as u32, y as u32).0.map(|c| c as f32);
                    su += 128.0 - 0.148 * r - 0.291 * g + 0.439 * b;
                    sv += 128.0 + 0.439 * r - 0.368 * g - 0.071 * b;
                    n += 1.0;
                }
            }
            u_plane[cy * cw + cx] = to_u8(su / n);
            v_plane[cy * cw + cx] = to_u8(sv / n);
        }
    }

    Frame::new(sequence, w, h, PixelFormat::I420, data)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn i420(w: u32, h: u32, y: u8, u: u8, v: u8) -> Frame {
        let luma = (w * h) as usize;
        let mut data = vec![y; luma];
        let chroma = (Frame::i420_len(w, h) - luma) / 2;
        data.extend(std::iter::repeat(u).take(chroma));
        data.extend(std::iter::repeat(v).take(chroma));
        Frame::new(0, w, h, PixelFormat::I420, data)
    }

    #[test]
    fn grayscale_is_the_y_plane() {
        let frame = frame_from_gray(3, &GrayImage::from_fn(6, 4, |x, y| Luma([(x * 10 + y) as u8])));
        let buf = convert(&frame, true).unwrap();
        assert!(buf.is_gray());
        assert_eq!(buf.dimensions(), (6, 4));
        assert_eq!(buf.as_raw(), &frame.data()[..24]);
    }

    #[test]
    fn gray_frames_store_luma_unscaled() {
        let img = GrayImage::from_fn(4, 2, |x, _| Luma([[0, 20, 235, 255][x as usize]]));
        let frame = frame_from_gray(0, &img);
        assert_eq!(&frame.data()[..8], img.as_raw().as_slice());
        assert!(frame.data()[8..].iter().all(|&c| c == 128));

        // Read back as colour, the values are stretched as limited-range Y.
        let rgb = convert(&frame, false).unwrap();
        let firsts: Vec<u8> = rgb.as_raw().chunks(3).take(4).map(|p| p[0]).collect();
        assert_eq!(firsts, [0, 5, 255, 255]);
    }

    #[test]
    fn colour_uses_limited_range_bt601() {
        let buf = convert(&i420(4, 4, 235, 128, 128), false).unwrap();
        assert_eq!(buf.channels(), 3);
        assert!(buf.as_raw().iter().all(|&v| v == 255));

        let buf = convert(&i420(4, 4, 16, 128, 128), false).unwrap();
        assert!(buf.as_raw().iter().all(|&v| v == 0));

        // Strong V pushes red up and green down.
        let [r, g, b] = yuv_to_rgb(128, 128, 200);
        assert!(r > 200 && g < 100 && (b as i32 - 130).abs() <= 1);
    }

    #[test]
    fn odd_dimensions_round_chroma_up() {
        let frame = i420(5, 3, 100, 128, 128);
        assert_eq!(frame.data().len(), 15 + 2 * 3 * 2);
        let buf = convert(&frame, false).unwrap();
        assert_eq!(buf.dimensions(), (5, 3));
    }

    #[test]
    fn rejects_other_formats_and_short_frames() {
        let frame = Frame::new(0, 2, 2, PixelFormat::Nv21, vec![0; 6]);
        assert_eq!(
            convert(&frame, true),
            Err(ConvertError::UnsupportedFormat(PixelFormat::Nv21))
        );

        let frame = Frame::new(0, 4, 4, PixelFormat::I420, vec![0; 10]);
        assert!(matches!(
            convert(&frame, true),
            Err(ConvertError::InvalidFrame { expected: 24, actual: 10, .. })
        ));
    }

    #[test]
    fn zero_resize_is_identity() {
        let buf = PixelBuffer::Gray(GrayImage::from_fn(7, 5, |x, y| Luma([(x + 7 * y) as u8])));
        let out = resize(buf.clone(), ResizeSpec::NONE).unwrap();
        assert_eq!(out, buf);
    }

    #[test]
    fn resize_hits_exact_target() {
        let buf = PixelBuffer::Rgb(RgbImage::from_pixel(640, 480, Rgb([10, 20, 30])));
        let out = resize(buf, ResizeSpec::new(320, 240)).unwrap();
        assert_eq!(out.dimensions(), (320, 240));
        assert_eq!(out.channels(), 3);
        assert!(out.as_raw().chunks(3).all(|p| p == [10, 20, 30]));
    }

    #[test]
    fn empty_input_still_hits_exact_target() {
        let out = resize(PixelBuffer::Gray(GrayImage::new(0, 0)), ResizeSpec::new(320, 240)).unwrap();
        assert_eq!(out.dimensions(), (320, 240));
        assert!(out.is_gray());
        assert!(out.as_raw().iter().all(|&v| v == 0));

        let out = resize(PixelBuffer::Rgb(RgbImage::new(0, 8)), ResizeSpec::new(4, 2)).unwrap();
        assert_eq!(out.dimensions(), (4, 2));
        assert_eq!(out.channels(), 3);
    }

    #[test]
    fn halving_averages_pixel_pairs() {
        // Half-pixel centres put every output sample between two inputs.
        let buf = PixelBuffer::Gray(GrayImage::from_fn(4, 2, |x, _| Luma([if x % 2 == 0 { 0 } else { 100 }])));
        let out = resize(buf, ResizeSpec::new(2, 1)).unwrap();
        assert_eq!(out.as_raw(), &[50, 50]);
    }

    #[test]
    fn invalid_targets_are_rejected() {
        let buf = PixelBuffer::Gray(GrayImage::new(4, 4));
        for spec in [ResizeSpec::new(-1, 10), ResizeSpec::new(0, 240), ResizeSpec::new(320, 0)] {
            assert_eq!(
                resize(buf.clone(), spec),
                Err(ConvertError::InvalidResizeSpec(spec))
            );
        }
    }

    #[test]
    fn rgb_frames_round_trip_through_i420() {
        let img = RgbImage::from_pixel(8, 6, Rgb([200, 60, 30]));
        let buf = convert(&frame_from_rgb(1, &img), false).unwrap();
        for p in buf.as_raw().chunks(3) {
            assert!((p[0] as i32 - 200).abs() <= 3, "{p:?}");
            assert!((p[1] as i32 - 60).abs() <= 3, "{p:?}");
            assert!((p[2] as i32 - 30).abs() <= 3, "{p:?}");
        }
    }
}
