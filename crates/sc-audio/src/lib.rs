//! `sc-audio` — AAC-LC audio encoding for the SwiftCap recorder.
//!
//! Converts an unbounded interleaved float-PCM stream into AAC-LC access
//! units of exactly 1024 samples per channel:
//!
//! ```text
//! f32 PCM -> clamp/scale to i16 -> 1024-sample framing -> AacTransform
//!                                                          (OS encoder)
//!                                                              |
//!                                                     AAC access units
//! ```
//!
//! The compression itself is delegated to the operating system's AAC
//! encoder behind the [`AacTransform`] trait — Media Foundation on
//! Windows, reported as unavailable elsewhere. Everything around it
//! (buffering, framing, timestamps, the drain protocol) lives here.

pub mod encoder;
pub mod error;
#[cfg(windows)]
pub mod mf;
pub mod transform;

pub use encoder::{AacPacket, AudioEncoder, SAMPLES_PER_FRAME};
pub use error::AudioError;
pub use transform::{
    create_system_transform, AacTransform, PullOutcome, PushOutcome, TransformFactory,
    TransformSpec,
};
