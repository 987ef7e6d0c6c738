use super::coordinator::PipelineCoordinator;
use super::error::PipelineError;
use super::stats::{PipelineStats, SharedStats};
use crate::source::{FrameSignal, PooledFrameSource};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use log::{error, info};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Tuning for the live pipeline.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineOptions {
    /// Frame buffers owned by the capture source.
    pub max_frames: usize,
    /// How long the worker waits for a signal before checking for shutdown.
    pub signal_timeout: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            max_frames: PooledFrameSource::DEFAULT_MAX_FRAMES,
            signal_timeout: Duration::from_millis(50),
        }
    }
}

impl PipelineOptions {
    /// A pooled source sized by these options.
    pub fn frame_source(&self) -> PooledFrameSource {
        PooledFrameSource::new(self.max_frames)
    }
}

/// Dedicated thread running one cycle at a time.
pub struct PipelineWorker;

impl PipelineWorker {
    /// Start consuming `signals`, running cycles until the source closes,
    /// [`PipelineHandle::shutdown`] is called, or a fatal error occurs.
    pub fn spawn(
        coordinator: PipelineCoordinator,
        signals: Receiver<FrameSignal>,
        options: &PipelineOptions,
    ) -> std::io::Result<PipelineHandle> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let stats = coordinator.shared_stats();
        let flag = Arc::clone(&shutdown);
        let timeout = options.signal_timeout;

        let thread = thread::Builder::new()
            .name("calib-pipeline".to_string())
            .spawn(move || run_worker(coordinator, signals, timeout, &flag))?;

        Ok(PipelineHandle {
            shutdown,
            stats,
            thread,
        })
    }
}

fn run_worker(
    mut coordinator: PipelineCoordinator,
    signals: Receiver<FrameSignal>,
    timeout: Duration,
    shutdown: &AtomicBool,
) -> Result<PipelineStats, PipelineError> {
    info!("pipeline worker started");
    while !shutdown.load(Ordering::SeqCst) {
        let disconnected = match signals.recv_timeout(timeout) {
            Ok(FrameSignal) | Err(RecvTimeoutError::Timeout) => false,
            Err(RecvTimeoutError::Disconnected) => true,
        };

        // Drain everything pending; a cycle is never interrupted.
        loop {
            match coordinator.run_cycle() {
                Ok(Some(_)) if !shutdown.load(Ordering::SeqCst) => continue,
                Ok(_) => break,
                Err(err) if err.is_end_of_stream() => {
                    info!("frame source closed, pipeline worker exiting");
                    return Ok(coordinator.stats());
                }
                Err(err) => {
                    error!("pipeline worker stopped: {err}");
                    return Err(err);
                }
            }
        }

        if disconnected {
            info!("frame signals disconnected, pipeline worker exiting");
            break;
        }
    }
    info!("pipeline worker stopped");
    Ok(coordinator.stats())
}

/// Control handle for a running [`PipelineWorker`].
pub struct PipelineHandle {
    shutdown: Arc<AtomicBool>,
    stats: Arc<SharedStats>,
    thread: JoinHandle<Result<PipelineStats, PipelineError>>,
}

impl PipelineHandle {
    /// Stop after the cycle in flight.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Live counters.
    pub fn stats(&self) -> PipelineStats {
        self.stats.snapshot()
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the worker. A resource leak or source failure that stopped
    /// it comes back as the error.
    pub fn join(self) -> Result<PipelineStats, PipelineError> {
        self.thread
            .join()
            .map_err(|_| PipelineError::WorkerPanicked)?
    }
}
