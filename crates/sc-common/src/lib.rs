//! `sc-common` — Shared types, configuration, and errors for the SwiftCap
//! recording engine.
//!
//! This crate is the foundation that all other engine crates depend on.
//! It defines the core abstractions:
//!
//! - **Types**: `Resolution`, `PixelFormat` (newtypes for safety)
//! - **Codec**: `VideoCodec` (H.264 / HEVC)
//! - **Config**: `SessionConfig` and its validation rules
//! - **GPU seam**: `GpuContext`, `InputSurface`, `VideoBackend` — the
//!   boundary between the recorder core and the caller's GPU device /
//!   surface producer
//! - **Errors**: `EncodeError`, `GpuError` (thiserror-based)

pub mod codec;
pub mod config;
pub mod error;
pub mod gpu;
pub mod types;

// Re-export commonly used items at crate root
pub use codec::VideoCodec;
pub use config::{Quality, RateControl, SessionConfig};
pub use error::{EncodeError, GpuError};
pub use gpu::{
    ConverterHandle, GpuContext, InputSurface, SessionState, TextureDesc, TextureHandle,
    VideoBackend,
};
pub use types::{PixelFormat, Resolution};
