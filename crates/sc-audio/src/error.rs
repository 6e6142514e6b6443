//! Audio encoder error types.

use thiserror::Error;

/// Errors from the audio encode path. All are fatal to the session except
/// where a method documents otherwise.
#[derive(Error, Debug)]
pub enum AudioError {
    /// The platform has no usable AAC encoder.
    #[error("AAC encoder not found.")]
    AacEncoderNotFound,

    /// The encoder transform could not be configured.
    #[error("Audio encoder initialization failed: {0}")]
    AudioInitFailed(String),

    /// A later write supplied a different (sample rate, channels) pair.
    #[error("Audio format mismatch.")]
    FormatMismatch,

    /// The transform rejected or failed an operation mid-stream.
    #[error("Audio transform failed: {0}")]
    TransformFailed(String),
}
