//! Error types for bundlegate-ingest

use bundlegate_core::{ManifestError, TransformError};
use bundlegate_state::StateError;
use thiserror::Error;

/// Errors raised while turning a submission into a reviewable build.
#[derive(Error, Debug)]
pub enum IngestError {
    /// Archive could not be opened or read
    #[error("archive unpack failed: {0}")]
    Unpack(String),

    /// Entry path would land outside the extraction root
    #[error("unsafe archive entry: {0}")]
    UnsafeEntry(String),

    /// Neither a build output nor a static root holds an index document
    #[error("no index.html found in project")]
    IndexMissing,

    /// A required output file is absent after the build
    #[error("Missing required file(s): {0}")]
    OutputMissing(String),

    /// Install or build command exited non-zero
    #[error("{step} failed with exit code {code}: {stderr}")]
    BuildFailed {
        step: String,
        code: i32,
        stderr: String,
    },

    /// Install or build command exceeded its wall-clock limit
    #[error("{step} timed out after {timeout_ms} ms")]
    BuildTimeout { step: String, timeout_ms: u64 },

    #[error("transform failed: {0}")]
    Transform(#[from] TransformError),

    #[error("manifest write failed: {0}")]
    Manifest(#[from] ManifestError),

    #[error("state error: {0}")]
    State(#[from] StateError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid submission: {0}")]
    InvalidInput(String),

    /// The worker pool is no longer accepting jobs
    #[error("job queue closed")]
    QueueClosed,
}

impl From<zip::result::ZipError> for IngestError {
    fn from(e: zip::result::ZipError) -> Self {
        IngestError::Unpack(e.to_string())
    }
}

impl IngestError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            IngestError::Unpack(_) => "ARCHIVE_UNPACK_FAILED",
            IngestError::UnsafeEntry(_) => "ARCHIVE_UNSAFE_ENTRY",
            IngestError::IndexMissing => "BUILD_REQUIRED_FILE_MISSING",
            IngestError::OutputMissing(_) => "BUILD_REQUIRED_FILE_MISSING",
            IngestError::BuildFailed { .. } => "BUILD_FAILED",
            IngestError::BuildTimeout { .. } => "BUILD_TIMEOUT",
            IngestError::Transform(e) => e.code(),
            IngestError::Manifest(_) => "MANIFEST_WRITE_FAILED",
            IngestError::State(_) => "BUILD_STATE_ERROR",
            IngestError::Io(_) => "INGEST_IO_FAILED",
            IngestError::InvalidInput(_) => "SUBMISSION_INVALID",
            IngestError::QueueClosed => "QUEUE_CLOSED",
        }
    }

    /// Whether running the same job again could succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            IngestError::InvalidInput(_) | IngestError::UnsafeEntry(_) | IngestError::QueueClosed
        )
    }

    /// Short message safe to show the submitter.
    pub fn public_message(&self) -> &'static str {
        match self {
            IngestError::Unpack(_) | IngestError::UnsafeEntry(_) => {
                "The uploaded archive could not be read."
            }
            IngestError::IndexMissing | IngestError::OutputMissing(_) => {
                "The project did not produce an index.html."
            }
            IngestError::BuildFailed { .. } => "The project build failed.",
            IngestError::BuildTimeout { .. } => "The project build took too long.",
            IngestError::Transform(_) => "The app could not be prepared for sandboxing.",
            IngestError::InvalidInput(_) => "The submission is invalid.",
            _ => "Processing failed. Please try again later.",
        }
    }
}

/// Result type for bundlegate-ingest operations
pub type IngestResult<T> = std::result::Result<T, IngestError>;
