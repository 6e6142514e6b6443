//! Muxer error types.

use thiserror::Error;

/// Errors that can occur while writing the MP4. All are fatal.
#[derive(Error, Debug)]
pub enum MuxError {
    /// The output file could not be created.
    #[error("Failed to open output file: {0}")]
    OpenFailed(std::io::Error),

    /// A write did not complete.
    #[error("Short write to output file: {0}")]
    WriteShort(std::io::Error),

    /// Repositioning the file pointer failed.
    #[error("Seek failed: {0}")]
    SeekFailed(std::io::Error),

    /// Finalize was reached without ever observing parameter sets.
    #[error("Video codec header not found.")]
    VideoHeaderMissing,

    /// An operation was attempted in the wrong muxer state.
    #[error("Invalid muxer state: {0}")]
    InvalidState(&'static str),
}

/// Convenience Result type for mux operations.
pub type MuxResult<T> = Result<T, MuxError>;
