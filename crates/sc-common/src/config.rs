//! Session configuration and its validation rules.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::codec::VideoCodec;
use crate::error::EncodeError;
use crate::types::{PixelFormat, Resolution};

/// Rate-control mode for the hardware encoder.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RateControl {
    /// Constant bitrate.
    #[default]
    Cbr,
    /// Variable bitrate (target + max).
    Vbr,
}

/// Encoder speed/quality preset.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Quality {
    /// Fastest preset, lowest quality.
    Low,
    /// Balanced.
    #[default]
    Medium,
    /// Slowest preset, highest quality.
    High,
}

/// Immutable configuration of one recording session.
///
/// Validated once at create; every field is fixed for the session lifetime.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Frame size of the incoming surfaces.
    pub resolution: Resolution,
    /// Integer frame rate (frames per second).
    pub fps: u32,
    /// Video codec to encode.
    pub codec: VideoCodec,
    /// Rate-control mode.
    pub rate_control: RateControl,
    /// Target (average) bitrate in bits per second.
    pub bitrate: u32,
    /// Maximum bitrate in bits per second (VBR only; 0 = same as target).
    pub max_bitrate: u32,
    /// Encoder quality preset.
    pub quality: Quality,
    /// Pixel format of the incoming surfaces.
    pub input_format: PixelFormat,
    /// Trade quality for latency: longer GOP and the NV12 submission path.
    pub fast_preset: bool,
    /// Opt into pipelined output for HEVC (fragile on some drivers).
    pub hevc_async: bool,
    /// Output MP4 path.
    pub output_path: PathBuf,
}

impl SessionConfig {
    /// Validate the invariants that hold for every session.
    pub fn validate(&self) -> Result<(), EncodeError> {
        if self.resolution.width == 0 || self.resolution.height == 0 {
            return Err(EncodeError::EncoderInitFailed(
                "Resolution width and height must be > 0".to_string(),
            ));
        }
        if self.fps == 0 {
            return Err(EncodeError::EncoderInitFailed(
                "Frame rate must be > 0".to_string(),
            ));
        }
        if self.bitrate == 0 {
            return Err(EncodeError::EncoderInitFailed(
                "Bitrate must be > 0".to_string(),
            ));
        }
        if self.rate_control == RateControl::Vbr
            && self.max_bitrate != 0
            && self.max_bitrate < self.bitrate
        {
            return Err(EncodeError::EncoderInitFailed(format!(
                "VBR max bitrate ({}) below target bitrate ({})",
                self.max_bitrate, self.bitrate
            )));
        }
        if self.output_path.as_os_str().is_empty() {
            return Err(EncodeError::EncoderInitFailed(
                "Output path must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Keyframe interval in frames: two seconds of video, four in fast preset.
    pub fn gop_length(&self) -> u32 {
        if self.fast_preset {
            self.fps * 4
        } else {
            self.fps * 2
        }
    }
}
