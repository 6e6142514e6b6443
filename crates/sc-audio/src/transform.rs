//! The OS AAC encoder seam.
//!
//! The operating system's AAC encoder (an `IMFTransform` on Windows) is
//! modeled as a synchronous push/pull pair. The trait deliberately mirrors
//! the Media Foundation protocol so the production implementation is a
//! thin shim: `NotAccepting` maps to `MF_E_NOTACCEPTING`, `NeedMoreInput`
//! to `MF_E_TRANSFORM_NEED_MORE_INPUT`, and `StreamChange` to
//! `MF_E_TRANSFORM_STREAM_CHANGE` (after the implementation has already
//! re-adopted the new output type).

use crate::error::AudioError;

/// Fixed transform configuration, set before the first push.
#[derive(Clone, Debug)]
pub struct TransformSpec {
    pub sample_rate: u32,
    pub channels: u16,
    /// Target AAC bitrate in bits per second.
    pub bitrate: u32,
}

/// Result of pushing one PCM frame.
#[derive(Debug, PartialEq, Eq)]
pub enum PushOutcome {
    Accepted,
    /// The transform holds unread output; drain and retry once.
    NotAccepting,
}

/// Result of pulling encoded output.
#[derive(Debug, PartialEq, Eq)]
pub enum PullOutcome {
    /// One complete AAC access unit.
    Frame(Vec<u8>),
    /// Nothing buffered; feed more input.
    NeedMoreInput,
    /// The output type changed and was re-adopted; pull again.
    StreamChange,
}

/// Synchronous push/pull interface over the OS AAC encoder.
pub trait AacTransform: Send {
    /// Push one frame of interleaved 16-bit PCM.
    ///
    /// `timestamp` and `duration` are in 100-ns units.
    fn push(&mut self, pcm: &[i16], timestamp: i64, duration: i64)
        -> Result<PushOutcome, AudioError>;

    /// Pull the next available access unit.
    fn pull(&mut self) -> Result<PullOutcome, AudioError>;

    /// Tell the transform the input stream has ended; remaining output is
    /// collected with [`AacTransform::pull`].
    fn begin_drain(&mut self) -> Result<(), AudioError>;
}

/// Factory used by the controller so tests can substitute a mock.
pub type TransformFactory =
    Box<dyn Fn(&TransformSpec) -> Result<Box<dyn AacTransform>, AudioError> + Send>;

/// Create the platform AAC transform.
///
/// Windows activates the Media Foundation AAC encoder; other platforms
/// report [`AudioError::AacEncoderNotFound`].
#[cfg(windows)]
pub fn create_system_transform(spec: &TransformSpec) -> Result<Box<dyn AacTransform>, AudioError> {
    Ok(Box::new(crate::mf::MfAacTransform::new(spec)?))
}

/// Create the platform AAC transform.
///
/// Windows activates the Media Foundation AAC encoder; other platforms
/// report [`AudioError::AacEncoderNotFound`].
#[cfg(not(windows))]
pub fn create_system_transform(_spec: &TransformSpec) -> Result<Box<dyn AacTransform>, AudioError> {
    Err(AudioError::AacEncoderNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(windows))]
    #[test]
    fn no_system_transform_off_windows() {
        let spec = TransformSpec {
            sample_rate: 48_000,
            channels: 2,
            bitrate: 192_000,
        };
        assert!(matches!(
            create_system_transform(&spec),
            Err(AudioError::AacEncoderNotFound)
        ));
    }
}
