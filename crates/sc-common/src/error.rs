//! Central error types for the encode path (thiserror-based).
//!
//! Every variant is fatal to the session: the controller stores the display
//! string as its last error and the session moves to the closed state. The
//! two recoverable encoder signals (`NEED_MORE_INPUT`, audio stream change)
//! never surface here; they are absorbed where they occur.

use thiserror::Error;

/// GPU seam errors, produced by the caller-supplied [`crate::GpuContext`].
#[derive(Error, Debug)]
pub enum GpuError {
    #[error("Texture creation failed: {0}")]
    TextureCreate(String),

    #[error("Texture copy failed: {0}")]
    Copy(String),

    #[error("NV12 conversion unavailable: {0}")]
    ConverterUnavailable(String),

    #[error("NV12 conversion failed: {0}")]
    Convert(String),
}

/// Hardware video encoder errors.
#[derive(Error, Debug)]
pub enum EncodeError {
    /// The NVENC runtime library could not be loaded.
    #[error("NVENC driver unavailable: {0}")]
    DriverUnavailable(String),

    /// The NVENC entry point or a required symbol was missing.
    #[error("NVENC API instance creation failed: {0}")]
    ApiCreateFailed(String),

    /// `nvEncOpenEncodeSessionEx` failed.
    #[error("Failed to open encode session: {0}")]
    SessionOpenFailed(String),

    /// Configuration was rejected at initialization time.
    #[error("Encoder initialization failed: {0}")]
    EncoderInitFailed(String),

    /// A per-frame submission failed.
    #[error("Frame submission failed at frame {frame}: {reason}")]
    SubmitFailed { frame: u64, reason: String },

    /// Locking an output bitstream failed.
    #[error("Bitstream lock failed: {0}")]
    LockFailed(String),

    /// Unlocking an output bitstream failed.
    #[error("Bitstream unlock failed: {0}")]
    UnlockFailed(String),

    /// An in-flight slot did not become ready within the 5-second window.
    #[error("Timed out waiting for encoder output (slot {slot})")]
    AsyncTimeout { slot: usize },

    #[error("GPU error: {0}")]
    Gpu(#[from] GpuError),
}
