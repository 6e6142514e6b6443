//! The audio encoder: PCM accumulation, 1024-sample framing, and the
//! transform push/pull protocol.

use tracing::{debug, info};

use sc_mux::codec_config;

use crate::error::AudioError;
use crate::transform::{AacTransform, PullOutcome, PushOutcome, TransformSpec};

/// AAC-LC access unit length in samples per channel.
pub const SAMPLES_PER_FRAME: u32 = 1024;

/// Default target bitrate in bits per second.
pub const DEFAULT_BITRATE: u32 = 192_000;

/// Compact the PCM buffer once the read cursor passes this many samples.
const COMPACT_THRESHOLD: usize = 8192;

/// One encoded AAC access unit.
#[derive(Clone, Debug)]
pub struct AacPacket {
    pub data: Vec<u8>,
    /// Duration in audio-timescale units (always 1024 for AAC-LC).
    pub duration: u32,
}

/// Streaming float-PCM → AAC-LC encoder.
///
/// Owns the PCM accumulation buffer and the OS transform. Incoming floats
/// are clamped to [-1, 1], scaled to 16-bit, and sliced into frames of
/// exactly 1024 samples per channel; each pushed frame is timestamped in
/// 100-ns units and the transform's available output is drained after
/// every push.
pub struct AudioEncoder {
    transform: Box<dyn AacTransform>,
    sample_rate: u32,
    channels: u16,
    audio_specific_config: Vec<u8>,

    pcm: Vec<i16>,
    /// Read cursor into `pcm`, in samples.
    pcm_read: usize,
    frame_index: u64,
}

impl AudioEncoder {
    /// Create an encoder over the platform transform.
    pub fn new(sample_rate: u32, channels: u16) -> Result<Self, AudioError> {
        let spec = TransformSpec {
            sample_rate,
            channels,
            bitrate: DEFAULT_BITRATE,
        };
        let transform = crate::transform::create_system_transform(&spec)?;
        Ok(Self::with_transform(sample_rate, channels, transform))
    }

    /// Create an encoder over an explicit transform (tests, custom codecs).
    pub fn with_transform(
        sample_rate: u32,
        channels: u16,
        transform: Box<dyn AacTransform>,
    ) -> Self {
        info!(sample_rate, channels, "Audio encoder initialized");
        Self {
            transform,
            sample_rate,
            channels,
            audio_specific_config: codec_config::build_audio_specific_config(
                sample_rate,
                channels,
            ),
            pcm: Vec::new(),
            pcm_read: 0,
            frame_index: 0,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// The 2-byte AudioSpecificConfig for the `esds`.
    pub fn audio_specific_config(&self) -> &[u8] {
        &self.audio_specific_config
    }

    /// Whether a subsequent write matches the initialized format.
    pub fn matches_format(&self, sample_rate: u32, channels: u16) -> bool {
        self.sample_rate == sample_rate && self.channels == channels
    }

    /// Feed interleaved float samples; returns the access units that
    /// completed. `samples.len()` counts individual samples across all
    /// channels.
    pub fn write(&mut self, samples: &[f32]) -> Result<Vec<AacPacket>, AudioError> {
        let mut packets = Vec::new();
        if samples.is_empty() {
            return Ok(packets);
        }

        self.pcm.reserve(samples.len());
        for &sample in samples {
            let clamped = sample.clamp(-1.0, 1.0);
            self.pcm.push((clamped * 32767.0) as i16);
        }

        let frame_len = SAMPLES_PER_FRAME as usize * self.channels as usize;
        while self.pcm.len() - self.pcm_read >= frame_len {
            let frame: Vec<i16> = self.pcm[self.pcm_read..self.pcm_read + frame_len].to_vec();
            self.encode_frame(&frame, &mut packets)?;
            self.pcm_read += frame_len;
        }

        // Reclaim the consumed prefix once it has grown past the threshold.
        if self.pcm_read > COMPACT_THRESHOLD {
            self.pcm.drain(..self.pcm_read);
            self.pcm_read = 0;
        }

        Ok(packets)
    }

    /// Flush: zero-pad the residual partial frame, drain the transform,
    /// and collect everything it still holds.
    pub fn finish(&mut self) -> Result<Vec<AacPacket>, AudioError> {
        let mut packets = Vec::new();

        let frame_len = SAMPLES_PER_FRAME as usize * self.channels as usize;
        let residual = self.pcm.len() - self.pcm_read;
        if residual > 0 {
            let mut frame = vec![0i16; frame_len];
            let take = residual.min(frame_len);
            frame[..take].copy_from_slice(&self.pcm[self.pcm_read..self.pcm_read + take]);
            self.encode_frame(&frame, &mut packets)?;
            self.pcm_read += take;
        }

        self.transform.begin_drain()?;
        self.drain_available(&mut packets)?;

        info!(
            frames = self.frame_index,
            trailing = packets.len(),
            "Audio encoder drained"
        );
        Ok(packets)
    }

    /// Push one full frame into the transform, retrying once after a drain
    /// if the transform is not accepting, then collect available output.
    fn encode_frame(
        &mut self,
        frame: &[i16],
        packets: &mut Vec<AacPacket>,
    ) -> Result<(), AudioError> {
        let duration = SAMPLES_PER_FRAME as i64 * 10_000_000 / self.sample_rate as i64;
        let timestamp = self.frame_index as i64 * duration;
        self.frame_index += 1;

        match self.transform.push(frame, timestamp, duration)? {
            PushOutcome::Accepted => {}
            PushOutcome::NotAccepting => {
                self.drain_available(packets)?;
                match self.transform.push(frame, timestamp, duration)? {
                    PushOutcome::Accepted => {}
                    PushOutcome::NotAccepting => {
                        return Err(AudioError::TransformFailed(
                            "encoder rejected input after output drain".to_string(),
                        ));
                    }
                }
            }
        }

        self.drain_available(packets)
    }

    /// Pull until the transform reports it needs more input. A stream
    /// change is absorbed (the transform has already re-adopted its output
    /// type) and the pull retried.
    fn drain_available(&mut self, packets: &mut Vec<AacPacket>) -> Result<(), AudioError> {
        loop {
            match self.transform.pull()? {
                PullOutcome::Frame(data) => {
                    debug!(bytes = data.len(), "AAC access unit");
                    packets.push(AacPacket {
                        data,
                        duration: SAMPLES_PER_FRAME,
                    });
                }
                PullOutcome::StreamChange => {
                    debug!("Audio output type changed; re-pulling");
                }
                PullOutcome::NeedMoreInput => return Ok(()),
            }
        }
    }
}
