use super::{spawn_capture, CaptureHandle, FrameWriter};
use crate::convert::frame_from_rgb;
use calib_stream_core::Frame;
use log::{info, warn};
use std::path::{Path, PathBuf};

#[derive(Clone, Debug)]
pub struct ReplayOptions {
    pub fps: f64,
    /// Start over after the last image.
    pub looped: bool,
    pub frames: Option<u64>,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            fps: 10.0,
            looped: false,
            frames: None,
        }
    }
}

/// Replays still images as a camera stream of I420 frames.
pub struct ImageReplay;

impl ImageReplay {
    /// Image files (png, jpg, jpeg, bmp) in `dir`, sorted by name.
    pub fn list_images(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .map(|e| matches!(e.to_ascii_lowercase().as_str(), "png" | "jpg" | "jpeg" | "bmp"))
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();
        Ok(paths)
    }

    /// Load one image file as an I420 frame.
    pub fn load_frame(sequence: u64, path: &Path) -> Result<Frame, image::ImageError> {
        let rgb = image::open(path)?.to_rgb8();
        Ok(frame_from_rgb(sequence, &rgb))
    }

    pub fn spawn(
        writer: FrameWriter,
        paths: Vec<PathBuf>,
        options: ReplayOptions,
    ) -> std::io::Result<CaptureHandle> {
        info!("replaying {} images at {} fps", paths.len(), options.fps);
        let mut cursor = 0usize;
        spawn_capture("image-replay", writer, options.fps, options.frames, move |index| {
            let mut failures = 0;
            while failures < paths.len() {
                if cursor >= paths.len() {
                    if !options.looped {
                        return None;
                    }
                    cursor = 0;
                }
                let path = &paths[cursor];
                cursor += 1;
                match Self::load_frame(index, path) {
                    Ok(frame) => return Some(frame),
                    Err(err) => {
                        warn!("skipping {}: {err}", path.display());
                        failures += 1;
                    }
                }
            }
            None
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{FrameSource, PooledFrameSource};
    use image::{GrayImage, Luma};

    #[test]
    fn lists_and_replays_images_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        GrayImage::from_pixel(8, 6, Luma([10])).save(dir.path().join("b.png")).unwrap();
        GrayImage::from_pixel(8, 6, Luma([200])).save(dir.path().join("a.png")).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let paths = ImageReplay::list_images(dir.path()).unwrap();
        assert_eq!(paths.len(), 2);
        assert!(paths[0].ends_with("a.png"));

        let source = PooledFrameSource::new(2);
        let options = ReplayOptions {
            fps: 0.0,
            frames: Some(1),
            ..Default::default()
        };
        let handle = ImageReplay::spawn(source.writer(), paths, options).unwrap();
        assert_eq!(handle.join().unwrap(), 1);
        let frame = source.acquire_next_frame().unwrap().unwrap();
        assert_eq!((frame.width(), frame.height()), (8, 6));
        // Gray 200 in limited-range luma.
        assert!((frame.data()[0] as i32 - 188).abs() <= 2);
        source.release_frame(frame).unwrap();
    }

    #[test]
    fn undecodable_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let bad = dir.path().join("broken.png");
        std::fs::write(&bad, b"not a png").unwrap();
        let good = dir.path().join("good.png");
        GrayImage::new(4, 4).save(&good).unwrap();

        let source = PooledFrameSource::new(2);
        let options = ReplayOptions {
            fps: 0.0,
            ..Default::default()
        };
        let handle = ImageReplay::spawn(source.writer(), vec![bad, good], options).unwrap();
        assert_eq!(handle.join().unwrap(), 1);
    }
}
