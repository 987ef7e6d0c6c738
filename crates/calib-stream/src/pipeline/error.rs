use crate::config::ConfigError;
use crate::convert::ConvertError;
use crate::source::{ReleaseError, SourceError};
use calib_stream_chessboard::DetectError;

/// Errors surfaced by the pipeline.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Convert(#[from] ConvertError),
    #[error(transparent)]
    Detect(#[from] DetectError),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Source(#[from] SourceError),
    /// A frame could not be returned to its source. Fatal.
    #[error("frame {sequence} could not be released: {source}")]
    ResourceLeak {
        sequence: u64,
        #[source]
        source: ReleaseError,
    },
    #[error("pipeline halted after a resource leak")]
    Halted,
    #[error("pipeline worker thread panicked")]
    WorkerPanicked,
}

impl PipelineError {
    /// Errors that abort one cycle and leave the pipeline running.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PipelineError::Convert(_) | PipelineError::Detect(_) | PipelineError::Config(_)
        )
    }

    pub fn is_config_error(&self) -> bool {
        matches!(self, PipelineError::Config(_))
    }

    /// The source ended normally.
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, PipelineError::Source(SourceError::Closed))
    }
}
