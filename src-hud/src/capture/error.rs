//! Error types for capture operations.

use std::fmt;

/// Error type for the GPU buffer pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// No rendering context is current on this thread
    NoContext,
    /// A transfer buffer could not be created
    AllocationFailed(String),
    /// Priming incomplete, or every map attempt failed with no cached frame
    NoDataAvailable,
    /// The pipeline was stepped before `initialize`
    NotInitialized,
    /// Destination buffer is smaller than the capture rectangle
    BufferTooSmall { needed: usize, got: usize },
    /// The device rejected a readback or transfer call
    Transfer(String),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::NoContext => write!(f, "No current rendering context"),
            PipelineError::AllocationFailed(msg) => {
                write!(f, "Transfer buffer allocation failed: {}", msg)
            }
            PipelineError::NoDataAvailable => write!(f, "No transfer data available"),
            PipelineError::NotInitialized => write!(f, "Capture pipeline not initialized"),
            PipelineError::BufferTooSmall { needed, got } => write!(
                f,
                "Destination buffer too small: expected {} bytes, got {}",
                needed, got
            ),
            PipelineError::Transfer(msg) => write!(f, "Transfer failed: {}", msg),
        }
    }
}

impl std::error::Error for PipelineError {}

/// Error type for screenshot capture operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    /// No rendering context at capture time; the pipeline stays usable
    ContextUnavailable,
    /// A harvest exhausted its retries and had no fallback
    TransferNotReady,
    /// Host or GPU memory allocation failed
    AllocationFailed(String),
    /// Neither a recording nor a camera frame is available
    NoFrameAvailable,
    /// Invalid capture parameters
    InvalidParameters(String),
    /// The image encoder rejected the frame
    EncodeFailed(String),
    /// Writing the output file failed
    IoFailed(String),
    /// Device-specific capture error
    PlatformError(String),
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::ContextUnavailable => write!(f, "Rendering context unavailable"),
            CaptureError::TransferNotReady => write!(f, "GPU transfer not ready"),
            CaptureError::AllocationFailed(msg) => write!(f, "Allocation failed: {}", msg),
            CaptureError::NoFrameAvailable => write!(f, "No valid pixel data available"),
            CaptureError::InvalidParameters(msg) => write!(f, "Invalid parameters: {}", msg),
            CaptureError::EncodeFailed(msg) => write!(f, "Encode failed: {}", msg),
            CaptureError::IoFailed(msg) => write!(f, "I/O error: {}", msg),
            CaptureError::PlatformError(msg) => write!(f, "Platform error: {}", msg),
        }
    }
}

impl std::error::Error for CaptureError {}

impl From<PipelineError> for CaptureError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::NoContext => CaptureError::ContextUnavailable,
            PipelineError::AllocationFailed(msg) => CaptureError::AllocationFailed(msg),
            PipelineError::NoDataAvailable | PipelineError::NotInitialized => {
                CaptureError::TransferNotReady
            }
            err @ PipelineError::BufferTooSmall { .. } => {
                CaptureError::InvalidParameters(err.to_string())
            }
            PipelineError::Transfer(msg) => CaptureError::PlatformError(msg),
        }
    }
}

impl From<std::io::Error> for CaptureError {
    fn from(err: std::io::Error) -> Self {
        CaptureError::IoFailed(err.to_string())
    }
}
