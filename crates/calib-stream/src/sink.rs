//! Consumers of per-cycle results.

use crate::pipeline::PipelineError;
use calib_stream_core::{DetectionResult, PixelBuffer};
use crossbeam_channel::{Sender, TrySendError};
use image::RgbaImage;
use log::{debug, warn};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Receives the display buffer and result of every completed cycle.
///
/// Called from the pipeline worker; an implementation that blocks stalls the
/// pipeline.
pub trait ResultSink: Send {
    /// Ownership of both values moves to the sink.
    fn on_result(&mut self, display: PixelBuffer, result: DetectionResult);

    /// A cycle was aborted by a recoverable error.
    fn on_error(&mut self, _err: &PipelineError) {}
}

#[derive(thiserror::Error, Debug)]
pub enum SinkError {
    #[error("failed to write image {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode result: {0}")]
    Json(#[from] serde_json::Error),
}

impl<S: ResultSink + ?Sized> ResultSink for Box<S> {
    fn on_result(&mut self, display: PixelBuffer, result: DetectionResult) {
        (**self).on_result(display, result)
    }

    fn on_error(&mut self, err: &PipelineError) {
        (**self).on_error(err)
    }
}

#[derive(Default)]
struct LatestSlot {
    latest: Option<(PixelBuffer, DetectionResult)>,
    delivered: u64,
    last_error: Option<String>,
    errors: u64,
    config_error: bool,
}

/// Keeps the most recent result for a display to poll.
///
/// A failed cycle leaves the previous result in place; the error is recorded
/// next to it so a configuration problem can be shown instead of a frozen
/// picture.
#[derive(Clone, Default)]
pub struct LatestResultSink {
    slot: Arc<Mutex<LatestSlot>>,
}

impl LatestResultSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, LatestSlot> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn latest(&self) -> Option<(PixelBuffer, DetectionResult)> {
        self.lock().latest.clone()
    }

    /// The latest display buffer as an opaque RGBA bitmap, ready to blit.
    pub fn latest_bitmap(&self) -> Option<RgbaImage> {
        self.lock().latest.as_ref().map(|(display, _)| display.to_rgba8())
    }

    pub fn latest_result(&self) -> Option<DetectionResult> {
        self.lock().latest.as_ref().map(|(_, r)| r.clone())
    }

    /// Results delivered so far.
    pub fn delivered(&self) -> u64 {
        self.lock().delivered
    }

    pub fn last_error(&self) -> Option<String> {
        self.lock().last_error.clone()
    }

    pub fn error_count(&self) -> u64 {
        self.lock().errors
    }

    /// The last error was a bad preference and no result has cleared it.
    pub fn has_config_error(&self) -> bool {
        self.lock().config_error
    }
}

impl ResultSink for LatestResultSink {
    fn on_result(&mut self, display: PixelBuffer, result: DetectionResult) {
        let mut slot = self.lock();
        slot.latest = Some((display, result));
        slot.delivered += 1;
        slot.config_error = false;
    }

    fn on_error(&mut self, err: &PipelineError) {
        let mut slot = self.lock();
        slot.last_error = Some(err.to_string());
        slot.errors += 1;
        slot.config_error = err.is_config_error();
    }
}

/// Event forwarded by [`ChannelSink`].
#[derive(Clone, Debug)]
pub enum SinkEvent {
    Result {
        display: PixelBuffer,
        result: DetectionResult,
    },
    Error {
        message: String,
        config: bool,
    },
}

/// Forwards results over a crossbeam channel without blocking.
///
/// A full channel drops the event, so a slow consumer never holds up the
/// pipeline.
pub struct ChannelSink {
    tx: Sender<SinkEvent>,
    dropped: u64,
}

impl ChannelSink {
    pub fn new(tx: Sender<SinkEvent>) -> Self {
        Self { tx, dropped: 0 }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    fn send(&mut self, event: SinkEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                debug!("result channel full, dropping event");
            }
            Err(TrySendError::Disconnected(_)) => debug!("result receiver gone"),
        }
    }
}

impl ResultSink for ChannelSink {
    fn on_result(&mut self, display: PixelBuffer, result: DetectionResult) {
        self.send(SinkEvent::Result { display, result });
    }

    fn on_error(&mut self, err: &PipelineError) {
        self.send(SinkEvent::Error {
            message: err.to_string(),
            config: err.is_config_error(),
        });
    }
}

/// Writes every annotated buffer as `frame_NNNNNN.png` into a directory,
/// optionally with a `frame_NNNNNN.json` result next to it.
pub struct PngDirSink {
    dir: PathBuf,
    write_json: bool,
    next_index: u64,
    found_only: bool,
}

impl PngDirSink {
    /// Creates `dir` if needed.
    pub fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            write_json: false,
            next_index: 0,
            found_only: false,
        })
    }

    pub fn with_json(mut self, write_json: bool) -> Self {
        self.write_json = write_json;
        self
    }

    /// Skip cycles where the board was not found.
    pub fn found_only(mut self, found_only: bool) -> Self {
        self.found_only = found_only;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of frames written.
    pub fn written(&self) -> u64 {
        self.next_index
    }

    /// Write the next `frame_NNNNNN` pair and return the PNG path. The index
    /// only advances on success.
    pub fn write_frame(
        &mut self,
        display: &PixelBuffer,
        result: &DetectionResult,
    ) -> Result<PathBuf, SinkError> {
        let stem = format!("frame_{:06}", self.next_index);
        let png = self.dir.join(format!("{stem}.png"));
        let saved = match display {
            PixelBuffer::Gray(img) => img.save(&png),
            PixelBuffer::Rgb(img) => img.save(&png),
        };
        saved.map_err(|source| SinkError::Image {
            path: png.clone(),
            source,
        })?;

        if self.write_json {
            let json = self.dir.join(format!("{stem}.json"));
            let text = serde_json::to_string_pretty(result)?;
            std::fs::write(&json, text).map_err(|source| SinkError::Io { path: json, source })?;
        }
        self.next_index += 1;
        Ok(png)
    }
}

impl ResultSink for PngDirSink {
    fn on_result(&mut self, display: PixelBuffer, result: DetectionResult) {
        if self.found_only && !result.found {
            return;
        }
        match self.write_frame(&display, &result) {
            Ok(path) => debug!("wrote {}", path.display()),
            Err(err) => warn!("{err}"),
        }
    }
}
