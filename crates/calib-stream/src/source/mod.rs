//! Frame sources: the capture side of the pipeline.
//!
//! A source owns a small set of frame buffers. The pipeline borrows one
//! frame at a time with [`FrameSource::acquire_next_frame`] and must hand it
//! back with [`FrameSource::release_frame`] exactly once. Availability is
//! announced over a coalescing [`FrameSignal`] channel.

mod pooled;
mod replay;
mod synthetic;

pub use pooled::{FrameWriter, PooledFrameSource, Publish};
pub use replay::{ImageReplay, ReplayOptions};
pub use synthetic::{SyntheticBoardCamera, SyntheticOptions};

use calib_stream_core::Frame;
use log::{debug, error, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// "At least one frame may be pending." Carries no data; several
/// publications may collapse into one signal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameSignal;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("frame source closed")]
    Closed,
    #[error("capture device error: {0}")]
    Device(String),
    #[error("capture thread {thread} panicked")]
    CapturePanicked { thread: String },
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ReleaseError {
    #[error("frame {sequence} was not handed out by this source or was already released")]
    UnknownFrame { sequence: u64 },
    #[error("capture device refused frame {sequence}: {reason}")]
    Device { sequence: u64, reason: String },
}

/// Producer of camera frames.
pub trait FrameSource: Send + Sync {
    /// Take the most recent pending frame, if any.
    ///
    /// `Err(SourceError::Closed)` once the source has ended and nothing is
    /// pending.
    fn acquire_next_frame(&self) -> Result<Option<Frame>, SourceError>;

    /// Return a frame obtained from [`acquire_next_frame`](Self::acquire_next_frame).
    fn release_frame(&self, frame: Frame) -> Result<(), ReleaseError>;

    /// Frames discarded before the pipeline saw them.
    fn dropped_frames(&self) -> u64 {
        0
    }
}

impl<S: FrameSource + ?Sized> FrameSource for Arc<S> {
    fn acquire_next_frame(&self) -> Result<Option<Frame>, SourceError> {
        (**self).acquire_next_frame()
    }

    fn release_frame(&self, frame: Frame) -> Result<(), ReleaseError> {
        (**self).release_frame(frame)
    }

    fn dropped_frames(&self) -> u64 {
        (**self).dropped_frames()
    }
}

/// Running capture thread.
pub struct CaptureHandle {
    name: String,
    stop: Arc<AtomicBool>,
    thread: JoinHandle<u64>,
}

impl CaptureHandle {
    /// Ask the capture thread to stop after the current frame.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the thread; returns the number of frames it published.
    pub fn join(self) -> Result<u64, SourceError> {
        self.thread.join().map_err(|_| {
            error!("{}: capture thread panicked", self.name);
            SourceError::CapturePanicked { thread: self.name }
        })
    }
}

/// Closes the writer when the capture thread exits, unwinding included, so
/// the pipeline sees the end of the stream.
struct CloseOnExit(FrameWriter);

impl Drop for CloseOnExit {
    fn drop(&mut self) {
        self.0.close();
    }
}

/// Run `produce` at `fps` on a named thread, publishing into `writer`.
///
/// Stops when `produce` returns `None`, after `limit` frames, or on
/// [`CaptureHandle::stop`]; the writer is closed on exit.
pub(crate) fn spawn_capture<F>(
    name: &str,
    writer: FrameWriter,
    fps: f64,
    limit: Option<u64>,
    mut produce: F,
) -> std::io::Result<CaptureHandle>
where
    F: FnMut(u64) -> Option<Frame> + Send + 'static,
{
    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = Arc::clone(&stop);
    let period = if fps > 0.0 {
        Duration::from_secs_f64(1.0 / fps)
    } else {
        Duration::ZERO
    };
    let label = name.to_string();

    let thread = thread::Builder::new().name(name.to_string()).spawn(move || {
        let writer = CloseOnExit(writer);
        let mut published = 0u64;
        let mut next_due = Instant::now();
        while !stop_flag.load(Ordering::SeqCst) && limit.map_or(true, |n| published < n) {
            let Some(frame) = produce(published) else {
                break;
            };
            let outcome = writer.0.publish(frame.width(), frame.height(), frame.format(), frame.data());
            debug!("{label}: frame {published} -> {outcome:?}");
            published += 1;

            next_due += period;
            let now = Instant::now();
            if next_due > now {
                thread::sleep(next_due - now);
            } else {
                next_due = now;
            }
        }
        info!("{label}: capture finished after {published} frames");
        published
    })?;

    Ok(CaptureHandle {
        name: name.to_string(),
        stop,
        thread,
    })
}
