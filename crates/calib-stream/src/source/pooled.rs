use super::{FrameSignal, FrameSource, ReleaseError, SourceError};
use calib_stream_core::{Frame, PixelFormat};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use log::{debug, warn};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// What happened to a published frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Publish {
    /// Now pending under this sequence id.
    Queued(u64),
    /// Pending under this sequence id; an older pending frame was dropped.
    Replaced(u64),
    /// Every buffer is in use; the frame was dropped at capture.
    Dropped,
}

#[derive(Default)]
struct PoolState {
    free: Vec<Vec<u8>>,
    allocated: usize,
    pending: Option<Frame>,
    outstanding: HashSet<u64>,
    next_sequence: u64,
    closed: bool,
}

struct PoolShared {
    state: Mutex<PoolState>,
    max_frames: usize,
    signal_tx: Sender<FrameSignal>,
    signal_rx: Receiver<FrameSignal>,
    dropped: AtomicU64,
}

impl PoolShared {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn notify(&self) {
        match self.signal_tx.try_send(FrameSignal) {
            Ok(()) | Err(TrySendError::Full(_)) => {}
            Err(TrySendError::Disconnected(_)) => debug!("frame signal receiver gone"),
        }
    }
}

/// Bounded-buffer frame source in the style of a camera image reader.
///
/// At most `max_frames` buffers exist. A single slot holds the newest
/// unconsumed frame: publishing while a frame is pending replaces it, so the
/// pipeline always sees the freshest frame and no backlog builds up.
#[derive(Clone)]
pub struct PooledFrameSource {
    shared: Arc<PoolShared>,
}

/// Producer side of a [`PooledFrameSource`]; cheap to clone.
#[derive(Clone)]
pub struct FrameWriter {
    shared: Arc<PoolShared>,
}

impl PooledFrameSource {
    pub const DEFAULT_MAX_FRAMES: usize = 2;

    pub fn new(max_frames: usize) -> Self {
        let (signal_tx, signal_rx) = bounded(1);
        Self {
            shared: Arc::new(PoolShared {
                state: Mutex::new(PoolState::default()),
                max_frames: max_frames.max(1),
                signal_tx,
                signal_rx,
                dropped: AtomicU64::new(0),
            }),
        }
    }

    pub fn writer(&self) -> FrameWriter {
        FrameWriter {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Availability signals for a consumer thread.
    pub fn signals(&self) -> Receiver<FrameSignal> {
        self.shared.signal_rx.clone()
    }

    pub fn max_frames(&self) -> usize {
        self.shared.max_frames
    }

    /// Frames currently held by the consumer.
    pub fn outstanding(&self) -> usize {
        self.shared.lock().outstanding.len()
    }

    pub fn has_pending(&self) -> bool {
        self.shared.lock().pending.is_some()
    }
}

impl Default for PooledFrameSource {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_FRAMES)
    }
}

impl FrameSource for PooledFrameSource {
    fn acquire_next_frame(&self) -> Result<Option<Frame>, SourceError> {
        let mut state = self.shared.lock();
        match state.pending.take() {
            Some(frame) => {
                state.outstanding.insert(frame.sequence());
                Ok(Some(frame))
            }
            None if state.closed => Err(SourceError::Closed),
            None => Ok(None),
        }
    }

    fn release_frame(&self, frame: Frame) -> Result<(), ReleaseError> {
        let sequence = frame.sequence();
        let mut state = self.shared.lock();
        if !state.outstanding.remove(&sequence) {
            return Err(ReleaseError::UnknownFrame { sequence });
        }
        state.free.push(frame.into_data());
        Ok(())
    }

    fn dropped_frames(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

impl FrameWriter {
    /// Copy `pixels` into a pooled buffer and make it the pending frame.
    pub fn publish(&self, width: u32, height: u32, format: PixelFormat, pixels: &[u8]) -> Publish {
        let shared = &self.shared;
        let mut state = shared.lock();

        let mut replaced = false;
        if let Some(stale) = state.pending.take() {
            debug!("frame {} replaced before it was consumed", stale.sequence());
            state.free.push(stale.into_data());
            shared.dropped.fetch_add(1, Ordering::Relaxed);
            replaced = true;
        }

        let mut buffer = match state.free.pop() {
            Some(buffer) => buffer,
            None if state.allocated < shared.max_frames => {
                state.allocated += 1;
                Vec::with_capacity(pixels.len())
            }
            None => {
                drop(state);
                shared.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("all {} frame buffers in use, dropping frame", shared.max_frames);
                return Publish::Dropped;
            }
        };
        buffer.clear();
        buffer.extend_from_slice(pixels);

        let sequence = state.next_sequence;
        state.next_sequence += 1;
        state.pending = Some(Frame::new(sequence, width, height, format, buffer));
        drop(state);

        shared.notify();
        if replaced {
            Publish::Replaced(sequence)
        } else {
            Publish::Queued(sequence)
        }
    }

    /// End the stream: once the pending frame is consumed, acquiring reports
    /// [`SourceError::Closed`].
    pub fn close(&self) {
        self.shared.lock().closed = true;
        self.shared.notify();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn publish(writer: &FrameWriter, fill: u8) -> Publish {
        writer.publish(2, 2, PixelFormat::I420, &[fill; 6])
    }

    #[test]
    fn pending_slot_keeps_only_the_newest_frame() {
        let source = PooledFrameSource::new(2);
        let writer = source.writer();
        assert_eq!(publish(&writer, 1), Publish::Queued(0));
        assert_eq!(publish(&writer, 2), Publish::Replaced(1));
        assert_eq!(publish(&writer, 3), Publish::Replaced(2));
        assert_eq!(source.dropped_frames(), 2);

        let frame = source.acquire_next_frame().unwrap().unwrap();
        assert_eq!(frame.sequence(), 2);
        assert_eq!(frame.data()[0], 3);
        assert!(source.acquire_next_frame().unwrap().is_none());
        source.release_frame(frame).unwrap();
    }

    #[test]
    fn exhausted_pool_drops_at_capture() {
        let source = PooledFrameSource::new(1);
        let writer = source.writer();
        publish(&writer, 1);
        let held = source.acquire_next_frame().unwrap().unwrap();
        assert_eq!(publish(&writer, 2), Publish::Dropped);
        assert_eq!(source.dropped_frames(), 1);

        source.release_frame(held).unwrap();
        assert_eq!(publish(&writer, 3), Publish::Queued(1));
        assert_eq!(source.outstanding(), 0);
    }

    #[test]
    fn double_or_foreign_release_is_an_error() {
        let source = PooledFrameSource::new(2);
        publish(&source.writer(), 1);
        let frame = source.acquire_next_frame().unwrap().unwrap();
        source.release_frame(frame).unwrap();

        let stray = Frame::new(0, 2, 2, PixelFormat::I420, vec![0; 6]);
        assert_eq!(
            source.release_frame(stray),
            Err(ReleaseError::UnknownFrame { sequence: 0 })
        );
    }

    #[test]
    fn signals_coalesce() {
        let source = PooledFrameSource::new(2);
        let signals = source.signals();
        let writer = source.writer();
        for i in 0..5 {
            publish(&writer, i);
        }
        assert_eq!(signals.try_iter().count(), 1);
    }

    #[test]
    fn close_drains_then_reports_closed() {
        let source = PooledFrameSource::new(2);
        let writer = source.writer();
        publish(&writer, 9);
        writer.close();
        let frame = source.acquire_next_frame().unwrap().unwrap();
        assert!(matches!(source.acquire_next_frame(), Err(SourceError::Closed)));
        source.release_frame(frame).unwrap();
    }

    #[test]
    fn buffers_are_reused() {
        let source = PooledFrameSource::new(2);
        let writer = source.writer();
        for i in 0..10 {
            publish(&writer, i);
            let frame = source.acquire_next_frame().unwrap().unwrap();
            source.release_frame(frame).unwrap();
        }
        assert!(source.shared.lock().allocated <= 2);
    }
}
