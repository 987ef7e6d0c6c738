use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Counters shared between the worker and observers.
#[derive(Debug, Default)]
pub struct SharedStats {
    cycles: AtomicU64,
    detections: AtomicU64,
    not_found: AtomicU64,
    aborted: AtomicU64,
    config_errors: AtomicU64,
    leaks: AtomicU64,
    dropped_frames: AtomicU64,
    last_cycle_us: AtomicU64,
}

impl SharedStats {
    pub(crate) fn record_result(&self, found: bool, elapsed: Duration) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
        if found {
            self.detections.fetch_add(1, Ordering::Relaxed);
        } else {
            self.not_found.fetch_add(1, Ordering::Relaxed);
        }
        self.set_elapsed(elapsed);
    }

    pub(crate) fn record_abort(&self, config_error: bool, elapsed: Duration) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
        self.aborted.fetch_add(1, Ordering::Relaxed);
        if config_error {
            self.config_errors.fetch_add(1, Ordering::Relaxed);
        }
        self.set_elapsed(elapsed);
    }

    pub(crate) fn record_leak(&self) {
        self.leaks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn set_dropped(&self, dropped: u64) {
        self.dropped_frames.store(dropped, Ordering::Relaxed);
    }

    fn set_elapsed(&self, elapsed: Duration) {
        let us = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.last_cycle_us.store(us, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            cycles: self.cycles.load(Ordering::Relaxed),
            detections: self.detections.load(Ordering::Relaxed),
            not_found: self.not_found.load(Ordering::Relaxed),
            aborted: self.aborted.load(Ordering::Relaxed),
            config_errors: self.config_errors.load(Ordering::Relaxed),
            leaks: self.leaks.load(Ordering::Relaxed),
            dropped_frames: self.dropped_frames.load(Ordering::Relaxed),
            last_cycle_us: self.last_cycle_us.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the pipeline counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    /// Completed cycles, aborted ones included.
    pub cycles: u64,
    pub detections: u64,
    pub not_found: u64,
    pub aborted: u64,
    /// Subset of `aborted` caused by bad preferences.
    pub config_errors: u64,
    /// Frames that could not be returned to the source.
    pub leaks: u64,
    /// Frames the source discarded before the pipeline got to them.
    pub dropped_frames: u64,
    pub last_cycle_us: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_add_up() {
        let stats = SharedStats::default();
        stats.record_result(true, Duration::from_millis(3));
        stats.record_result(false, Duration::from_millis(2));
        stats.record_abort(true, Duration::from_millis(1));
        stats.set_dropped(4);
        let snap = stats.snapshot();
        assert_eq!(snap.cycles, 3);
        assert_eq!(snap.detections + snap.not_found + snap.aborted, snap.cycles);
        assert_eq!(snap.config_errors, 1);
        assert_eq!(snap.dropped_frames, 4);
        assert_eq!(snap.last_cycle_us, 1000);
    }
}
