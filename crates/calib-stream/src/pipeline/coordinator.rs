use super::error::PipelineError;
use super::stats::{PipelineStats, SharedStats};
use crate::config::PreferenceStore;
use crate::convert::{convert, resize};
use crate::sink::ResultSink;
use crate::source::{FrameSource, ReleaseError};
use calib_stream_chessboard::PatternDetector;
use calib_stream_core::{DetectionResult, Frame};
use log::{debug, error, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Stages of one pipeline cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CycleState {
    Idle,
    FrameAcquired,
    Converted,
    Detected,
    Released,
}

#[derive(Debug)]
pub enum CycleOutcome {
    /// Detection ran; the board may or may not have been found.
    Detected(DetectionResult),
    /// A recoverable error ended the cycle before a result was produced.
    Aborted(PipelineError),
}

/// What happened to one acquired frame.
#[derive(Debug)]
pub struct CycleReport {
    pub sequence: u64,
    pub outcome: CycleOutcome,
    /// States visited, in order. Always ends in [`CycleState::Released`].
    pub trace: Vec<CycleState>,
    pub elapsed: Duration,
}

impl CycleReport {
    pub fn result(&self) -> Option<&DetectionResult> {
        match &self.outcome {
            CycleOutcome::Detected(result) => Some(result),
            CycleOutcome::Aborted(_) => None,
        }
    }

    pub fn error(&self) -> Option<&PipelineError> {
        match &self.outcome {
            CycleOutcome::Detected(_) => None,
            CycleOutcome::Aborted(err) => Some(err),
        }
    }
}

/// Exclusive hold on an acquired frame.
///
/// The frame goes back to its source through [`release`](Self::release), or
/// on drop if the cycle unwinds first.
struct FrameLease<'a> {
    source: &'a dyn FrameSource,
    frame: Option<Frame>,
}

impl<'a> FrameLease<'a> {
    fn new(source: &'a dyn FrameSource, frame: Frame) -> Self {
        Self {
            source,
            frame: Some(frame),
        }
    }

    fn frame(&self) -> &Frame {
        match &self.frame {
            Some(frame) => frame,
            None => unreachable!("lease used after release"),
        }
    }

    fn release(mut self) -> Result<(), ReleaseError> {
        match self.frame.take() {
            Some(frame) => self.source.release_frame(frame),
            None => Ok(()),
        }
    }
}

impl Drop for FrameLease<'_> {
    fn drop(&mut self) {
        if let Some(frame) = self.frame.take() {
            let sequence = frame.sequence();
            warn!("releasing frame {sequence} from an interrupted cycle");
            if let Err(err) = self.source.release_frame(frame) {
                error!("frame {sequence} leaked: {err}");
            }
        }
    }
}

/// Runs pipeline cycles: acquire, convert, resize, detect, hand off, release.
///
/// Preferences are snapshotted at the start of every cycle. A frame is
/// released exactly once on every path; if the source refuses it the
/// coordinator halts and acquires nothing more.
pub struct PipelineCoordinator {
    source: Arc<dyn FrameSource>,
    prefs: Arc<dyn PreferenceStore>,
    detector: Box<dyn PatternDetector>,
    sink: Option<Box<dyn ResultSink>>,
    stats: Arc<SharedStats>,
    halted: bool,
}

impl PipelineCoordinator {
    pub fn new(
        source: Arc<dyn FrameSource>,
        prefs: Arc<dyn PreferenceStore>,
        detector: Box<dyn PatternDetector>,
    ) -> Self {
        Self {
            source,
            prefs,
            detector,
            sink: None,
            stats: Arc::new(SharedStats::default()),
            halted: false,
        }
    }

    /// Attach a sink; annotation only runs when one is attached.
    pub fn with_sink(mut self, sink: impl ResultSink + 'static) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    pub fn set_sink(&mut self, sink: Option<Box<dyn ResultSink>>) {
        self.sink = sink;
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats.snapshot()
    }

    pub fn shared_stats(&self) -> Arc<SharedStats> {
        Arc::clone(&self.stats)
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Run one cycle on the pending frame.
    ///
    /// `Ok(None)` when no frame is pending. Recoverable failures come back as
    /// `Ok(Some(report))` with [`CycleOutcome::Aborted`]; `Err` is reserved
    /// for source errors, resource leaks and a halted coordinator.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self)))]
    pub fn run_cycle(&mut self) -> Result<Option<CycleReport>, PipelineError> {
        if self.halted {
            return Err(PipelineError::Halted);
        }

        let started = Instant::now();
        let source = Arc::clone(&self.source);
        let Some(frame) = source.acquire_next_frame()? else {
            return Ok(None);
        };
        let lease = FrameLease::new(source.as_ref(), frame);
        let sequence = lease.frame().sequence();
        let mut trace = vec![CycleState::Idle, CycleState::FrameAcquired];

        let processed = self.process(lease.frame(), &mut trace);
        if let Err(err) = &processed {
            warn!("cycle {sequence} aborted: {err}");
            if let Some(sink) = self.sink.as_mut() {
                sink.on_error(err);
            }
        }

        let released = lease.release();
        trace.push(CycleState::Released);
        let elapsed = started.elapsed();

        if let Err(source) = released {
            self.halted = true;
            self.stats.record_leak();
            error!("frame {sequence} could not be released, halting pipeline: {source}");
            return Err(PipelineError::ResourceLeak { sequence, source });
        }

        self.stats.set_dropped(self.source.dropped_frames());
        let outcome = match processed {
            Ok(result) => {
                self.stats.record_result(result.found, elapsed);
                debug!(
                    "cycle {sequence}: found={} corners={} in {:.1} ms",
                    result.found,
                    result.corners.len(),
                    elapsed.as_secs_f64() * 1e3
                );
                CycleOutcome::Detected(result)
            }
            Err(err) => {
                self.stats.record_abort(err.is_config_error(), elapsed);
                CycleOutcome::Aborted(err)
            }
        };

        Ok(Some(CycleReport {
            sequence,
            outcome,
            trace,
            elapsed,
        }))
    }

    /// Run cycles until no frame is pending; returns how many ran.
    pub fn run_until_idle(&mut self) -> Result<usize, PipelineError> {
        let mut cycles = 0;
        while self.run_cycle()?.is_some() {
            cycles += 1;
        }
        Ok(cycles)
    }

    fn process(
        &mut self,
        frame: &Frame,
        trace: &mut Vec<CycleState>,
    ) -> Result<DetectionResult, PipelineError> {
        let config = self.prefs.snapshot()?;

        let buffer = convert(frame, config.grayscale)?;
        let buffer = resize(buffer, config.resize)?;
        trace.push(CycleState::Converted);

        let result = self.detector.detect(&buffer, config.pattern)?;
        trace.push(CycleState::Detected);

        if let Some(sink) = self.sink.as_mut() {
            let display = self.detector.annotate(&buffer, config.pattern, &result);
            sink.on_result(display, result.clone());
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MemoryPreferences, KEY_PATTERN, KEY_RESIZE};
    use crate::convert::frame_from_gray;
    use crate::source::{PooledFrameSource, SourceError};
    use calib_stream_chessboard::DetectError;
    use calib_stream_core::{PatternSpec, PixelBuffer, PixelFormat};
    use image::GrayImage;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Records what it was asked to detect and reports a fixed answer.
    struct FixedDetector {
        seen: Arc<Mutex<Vec<(u32, u32, usize)>>>,
    }

    impl PatternDetector for FixedDetector {
        fn detect(
            &self,
            buffer: &PixelBuffer,
            pattern: PatternSpec,
        ) -> Result<DetectionResult, DetectError> {
            if !pattern.is_valid() {
                return Err(DetectError::InvalidPattern {
                    columns: pattern.columns,
                    rows: pattern.rows,
                });
            }
            let (w, h) = buffer.dimensions();
            self.seen.lock().unwrap().push((w, h, buffer.channels()));
            Ok(DetectionResult::not_found())
        }
    }

    struct PanickingDetector;

    impl PatternDetector for PanickingDetector {
        fn detect(&self, _: &PixelBuffer, _: PatternSpec) -> Result<DetectionResult, DetectError> {
            panic!("detector bug");
        }
    }

    /// Pool wrapper counting releases, optionally refusing them.
    struct CountingSource {
        inner: PooledFrameSource,
        releases: AtomicUsize,
        refuse: bool,
    }

    impl FrameSource for CountingSource {
        fn acquire_next_frame(&self) -> Result<Option<Frame>, SourceError> {
            self.inner.acquire_next_frame()
        }

        fn release_frame(&self, frame: Frame) -> Result<(), ReleaseError> {
            self.releases.fetch_add(1, Ordering::SeqCst);
            if self.refuse {
                return Err(ReleaseError::Device {
                    sequence: frame.sequence(),
                    reason: "buffer queue abandoned".into(),
                });
            }
            self.inner.release_frame(frame)
        }
    }

    fn counting(refuse: bool) -> Arc<CountingSource> {
        Arc::new(CountingSource {
            inner: PooledFrameSource::new(2),
            releases: AtomicUsize::new(0),
            refuse,
        })
    }

    fn push_frame(source: &CountingSource, w: u32, h: u32) {
        let frame = frame_from_gray(0, &GrayImage::new(w, h));
        source.inner.writer().publish(w, h, PixelFormat::I420, frame.data());
    }

    fn fixed() -> (Box<dyn PatternDetector>, Arc<Mutex<Vec<(u32, u32, usize)>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        (
            Box::new(FixedDetector {
                seen: Arc::clone(&seen),
            }),
            seen,
        )
    }

    #[test]
    fn nothing_pending_is_not_a_cycle() {
        let source = counting(false);
        let (detector, _) = fixed();
        let mut coordinator =
            PipelineCoordinator::new(source, Arc::new(MemoryPreferences::new()), detector);
        assert!(coordinator.run_cycle().unwrap().is_none());
        assert_eq!(coordinator.stats().cycles, 0);
    }

    #[test]
    fn successful_cycle_visits_every_state() {
        let source = counting(false);
        push_frame(&source, 32, 24);
        let (detector, seen) = fixed();
        let mut coordinator = PipelineCoordinator::new(
            source.clone(),
            Arc::new(MemoryPreferences::new()),
            detector,
        );

        let report = coordinator.run_cycle().unwrap().unwrap();
        assert_eq!(
            report.trace,
            vec![
                CycleState::Idle,
                CycleState::FrameAcquired,
                CycleState::Converted,
                CycleState::Detected,
                CycleState::Released
            ]
        );
        assert!(!report.result().unwrap().found);
        assert_eq!(seen.lock().unwrap().as_slice(), &[(32, 24, 1)]);
        assert_eq!(source.releases.load(Ordering::SeqCst), 1);
        assert_eq!(source.inner.outstanding(), 0);
        assert_eq!(coordinator.stats().not_found, 1);
    }

    #[test]
    fn preferences_apply_from_the_next_cycle() {
        let source = counting(false);
        let prefs = Arc::new(MemoryPreferences::new());
        let (detector, seen) = fixed();
        let mut coordinator = PipelineCoordinator::new(source.clone(), prefs.clone(), detector);

        push_frame(&source, 32, 24);
        coordinator.run_cycle().unwrap();
        prefs.set_string(KEY_RESIZE, "16x12");
        push_frame(&source, 32, 24);
        coordinator.run_cycle().unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].0, 32);
        assert_eq!(seen[1].0, 16);
    }

    #[test]
    fn recoverable_errors_abort_and_still_release() {
        let source = counting(false);
        let prefs = Arc::new(MemoryPreferences::new());
        prefs.set_string(KEY_PATTERN, "abcx5");
        let (detector, seen) = fixed();
        let mut coordinator = PipelineCoordinator::new(source.clone(), prefs.clone(), detector);

        push_frame(&source, 8, 8);
        let report = coordinator.run_cycle().unwrap().unwrap();
        assert!(report.error().unwrap().is_config_error());
        assert_eq!(
            report.trace,
            vec![CycleState::Idle, CycleState::FrameAcquired, CycleState::Released]
        );

        prefs.set_string(KEY_PATTERN, "0x5");
        push_frame(&source, 8, 8);
        let report = coordinator.run_cycle().unwrap().unwrap();
        assert!(matches!(
            report.error(),
            Some(PipelineError::Detect(DetectError::InvalidPattern { columns: 0, rows: 5 }))
        ));
        assert_eq!(report.trace.last(), Some(&CycleState::Released));

        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(source.releases.load(Ordering::SeqCst), 2);
        let stats = coordinator.stats();
        assert_eq!((stats.aborted, stats.config_errors), (2, 1));
    }

    #[test]
    fn refused_release_halts_the_coordinator() {
        let source = counting(true);
        push_frame(&source, 8, 8);
        let (detector, _) = fixed();
        let mut coordinator = PipelineCoordinator::new(
            source.clone(),
            Arc::new(MemoryPreferences::new()),
            detector,
        );

        match coordinator.run_cycle() {
            Err(PipelineError::ResourceLeak { sequence: 0, .. }) => {}
            other => panic!("expected a resource leak, got {other:?}"),
        }
        assert!(coordinator.is_halted());

        push_frame(&source, 8, 8);
        assert!(matches!(coordinator.run_cycle(), Err(PipelineError::Halted)));
        assert_eq!(source.releases.load(Ordering::SeqCst), 1);
        assert!(source.inner.has_pending());
        assert_eq!(coordinator.stats().leaks, 1);
    }

    #[test]
    fn frame_is_released_when_detection_panics() {
        let source = counting(false);
        push_frame(&source, 8, 8);
        let mut coordinator = PipelineCoordinator::new(
            source.clone(),
            Arc::new(MemoryPreferences::new()),
            Box::new(PanickingDetector),
        );

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = coordinator.run_cycle();
        }));
        assert!(outcome.is_err());
        assert_eq!(source.releases.load(Ordering::SeqCst), 1);
        assert_eq!(source.inner.outstanding(), 0);
    }
}
