//! Media Foundation implementation of [`AacTransform`].
//!
//! Activates the system AAC encoder MFT for 16-bit PCM input and AAC-LC
//! output (payload type 0 = raw access units, profile-level indication
//! 0x29). The `push`/`pull`/`begin_drain` protocol is a direct mapping of
//! `ProcessInput`/`ProcessOutput`/`MFT_MESSAGE_COMMAND_DRAIN`.

use tracing::{debug, info};
use windows::core::Interface;
use windows::Win32::Media::MediaFoundation::{
    IMFActivate, IMFMediaBuffer, IMFSample, IMFTransform, MFAudioFormat_AAC, MFAudioFormat_PCM,
    MFCreateMediaType, MFCreateMemoryBuffer, MFCreateSample, MFMediaType_Audio, MFStartup,
    MFT_CATEGORY_AUDIO_ENCODER, MFT_ENUM_FLAG_ALL, MFT_MESSAGE_COMMAND_DRAIN,
    MFT_MESSAGE_NOTIFY_BEGIN_STREAMING, MFT_MESSAGE_NOTIFY_START_OF_STREAM,
    MFT_OUTPUT_DATA_BUFFER, MFT_OUTPUT_STREAM_INFO, MFT_REGISTER_TYPE_INFO,
    MF_E_TRANSFORM_NEED_MORE_INPUT, MF_E_TRANSFORM_STREAM_CHANGE,
    MF_MT_AAC_AUDIO_PROFILE_LEVEL_INDICATION, MF_MT_AAC_PAYLOAD_TYPE,
    MF_MT_AUDIO_AVG_BYTES_PER_SECOND, MF_MT_AUDIO_BITS_PER_SAMPLE, MF_MT_AUDIO_BLOCK_ALIGNMENT,
    MF_MT_AUDIO_NUM_CHANNELS, MF_MT_AUDIO_SAMPLES_PER_SECOND, MF_MT_MAJOR_TYPE, MF_MT_SUBTYPE,
    MF_SDK_VERSION, MF_API_VERSION, MFSTARTUP_FULL,
};
use windows::Win32::System::Com::{CoInitializeEx, CoTaskMemFree, COINIT_MULTITHREADED};

use crate::error::AudioError;
use crate::transform::{AacTransform, PullOutcome, PushOutcome, TransformSpec};

const MF_E_NOTACCEPTING: windows::core::HRESULT = windows::core::HRESULT(0xC00D36B5u32 as i32);

fn init_err(what: &str, err: windows::core::Error) -> AudioError {
    AudioError::AudioInitFailed(format!("{what}: {err}"))
}

fn run_err(what: &str, err: windows::core::Error) -> AudioError {
    AudioError::TransformFailed(format!("{what}: {err}"))
}

/// The system AAC encoder MFT.
pub struct MfAacTransform {
    transform: IMFTransform,
    /// Output buffer size hint from the transform.
    output_buffer_size: u32,
    channels: u16,
}

// SAFETY: The MFT is only used from the thread that owns the audio
// encoder; COM is initialized multithreaded.
unsafe impl Send for MfAacTransform {}

impl MfAacTransform {
    pub fn new(spec: &TransformSpec) -> Result<Self, AudioError> {
        // SAFETY: Standard MF/COM startup; both tolerate repeat calls.
        unsafe {
            MFStartup((MF_SDK_VERSION << 16) | MF_API_VERSION, MFSTARTUP_FULL)
                .map_err(|e| init_err("MFStartup", e))?;
            // A mode mismatch here is fine; the thread already has COM.
            let _ = CoInitializeEx(None, COINIT_MULTITHREADED);
        }

        let transform = Self::activate_encoder()?;
        Self::configure(&transform, spec)?;

        // SAFETY: the transform was successfully configured above.
        let stream_info = unsafe { transform.GetOutputStreamInfo(0) }
            .map_err(|e| init_err("GetOutputStreamInfo", e))?;
        let output_buffer_size = match stream_info {
            MFT_OUTPUT_STREAM_INFO { cbSize: 0, .. } => 4096,
            MFT_OUTPUT_STREAM_INFO { cbSize, .. } => cbSize,
        };

        // SAFETY: streaming notifications are part of the MFT protocol.
        unsafe {
            transform
                .ProcessMessage(MFT_MESSAGE_NOTIFY_BEGIN_STREAMING, 0)
                .map_err(|e| init_err("NOTIFY_BEGIN_STREAMING", e))?;
            transform
                .ProcessMessage(MFT_MESSAGE_NOTIFY_START_OF_STREAM, 0)
                .map_err(|e| init_err("NOTIFY_START_OF_STREAM", e))?;
        }

        info!(
            sample_rate = spec.sample_rate,
            channels = spec.channels,
            bitrate = spec.bitrate,
            "Media Foundation AAC encoder active"
        );
        Ok(Self {
            transform,
            output_buffer_size,
            channels: spec.channels,
        })
    }

    /// Enumerate and activate the first PCM→AAC encoder MFT.
    fn activate_encoder() -> Result<IMFTransform, AudioError> {
        let input_type = MFT_REGISTER_TYPE_INFO {
            guidMajorType: MFMediaType_Audio,
            guidSubtype: MFAudioFormat_PCM,
        };
        let output_type = MFT_REGISTER_TYPE_INFO {
            guidMajorType: MFMediaType_Audio,
            guidSubtype: MFAudioFormat_AAC,
        };

        let mut activates: *mut Option<IMFActivate> = std::ptr::null_mut();
        let mut count: u32 = 0;
        // SAFETY: out-params receive a CoTaskMem array of activates that we
        // release and free below.
        unsafe {
            windows::Win32::Media::MediaFoundation::MFTEnumEx(
                MFT_CATEGORY_AUDIO_ENCODER,
                MFT_ENUM_FLAG_ALL,
                Some(&input_type),
                Some(&output_type),
                &mut activates,
                &mut count,
            )
            .map_err(|e| init_err("MFTEnumEx", e))?;
        }
        if count == 0 || activates.is_null() {
            return Err(AudioError::AacEncoderNotFound);
        }

        // SAFETY: `activates` points to `count` activate objects.
        let result = unsafe {
            let slice = std::slice::from_raw_parts(activates, count as usize);
            let transform = slice[0]
                .as_ref()
                .ok_or(AudioError::AacEncoderNotFound)
                .and_then(|activate| {
                    activate
                        .ActivateObject::<IMFTransform>()
                        .map_err(|e| init_err("ActivateObject", e))
                });
            for activate in slice.iter().flatten() {
                let _ = activate.ShutdownObject();
            }
            CoTaskMemFree(Some(activates as *const _));
            transform
        };
        debug!(count, "Enumerated AAC encoder MFTs");
        result
    }

    fn configure(transform: &IMFTransform, spec: &TransformSpec) -> Result<(), AudioError> {
        let rate = spec.sample_rate;
        let channels = spec.channels as u32;

        // SAFETY: media type creation and attribute setting per the MFT
        // configuration protocol; input first, then output.
        unsafe {
            let in_type = MFCreateMediaType().map_err(|e| init_err("MFCreateMediaType", e))?;
            in_type
                .SetGUID(&MF_MT_MAJOR_TYPE, &MFMediaType_Audio)
                .map_err(|e| init_err("input major type", e))?;
            in_type
                .SetGUID(&MF_MT_SUBTYPE, &MFAudioFormat_PCM)
                .map_err(|e| init_err("input subtype", e))?;
            in_type
                .SetUINT32(&MF_MT_AUDIO_SAMPLES_PER_SECOND, rate)
                .map_err(|e| init_err("input sample rate", e))?;
            in_type
                .SetUINT32(&MF_MT_AUDIO_NUM_CHANNELS, channels)
                .map_err(|e| init_err("input channels", e))?;
            in_type
                .SetUINT32(&MF_MT_AUDIO_BITS_PER_SAMPLE, 16)
                .map_err(|e| init_err("input bits", e))?;
            in_type
                .SetUINT32(&MF_MT_AUDIO_BLOCK_ALIGNMENT, channels * 2)
                .map_err(|e| init_err("input block alignment", e))?;
            in_type
                .SetUINT32(&MF_MT_AUDIO_AVG_BYTES_PER_SECOND, rate * channels * 2)
                .map_err(|e| init_err("input byte rate", e))?;
            transform
                .SetInputType(0, &in_type, 0)
                .map_err(|e| init_err("SetInputType", e))?;

            let out_type = MFCreateMediaType().map_err(|e| init_err("MFCreateMediaType", e))?;
            out_type
                .SetGUID(&MF_MT_MAJOR_TYPE, &MFMediaType_Audio)
                .map_err(|e| init_err("output major type", e))?;
            out_type
                .SetGUID(&MF_MT_SUBTYPE, &MFAudioFormat_AAC)
                .map_err(|e| init_err("output subtype", e))?;
            out_type
                .SetUINT32(&MF_MT_AUDIO_SAMPLES_PER_SECOND, rate)
                .map_err(|e| init_err("output sample rate", e))?;
            out_type
                .SetUINT32(&MF_MT_AUDIO_NUM_CHANNELS, channels)
                .map_err(|e| init_err("output channels", e))?;
            out_type
                .SetUINT32(&MF_MT_AUDIO_BITS_PER_SAMPLE, 16)
                .map_err(|e| init_err("output bits", e))?;
            out_type
                .SetUINT32(&MF_MT_AUDIO_AVG_BYTES_PER_SECOND, spec.bitrate / 8)
                .map_err(|e| init_err("output byte rate", e))?;
            // Raw AAC access units, AAC-LC profile-level 0x29.
            out_type
                .SetUINT32(&MF_MT_AAC_PAYLOAD_TYPE, 0)
                .map_err(|e| init_err("payload type", e))?;
            out_type
                .SetUINT32(&MF_MT_AAC_AUDIO_PROFILE_LEVEL_INDICATION, 0x29)
                .map_err(|e| init_err("profile level", e))?;
            transform
                .SetOutputType(0, &out_type, 0)
                .map_err(|e| init_err("SetOutputType", e))?;
        }
        Ok(())
    }

    /// Re-adopt the output type after a stream change.
    fn adopt_output_type(&self) -> Result<(), AudioError> {
        // SAFETY: GetOutputAvailableType/SetOutputType per the stream
        // change protocol.
        unsafe {
            let new_type = self
                .transform
                .GetOutputAvailableType(0, 0)
                .map_err(|e| run_err("GetOutputAvailableType", e))?;
            self.transform
                .SetOutputType(0, &new_type, 0)
                .map_err(|e| run_err("SetOutputType (stream change)", e))?;
        }
        Ok(())
    }
}

impl AacTransform for MfAacTransform {
    fn push(
        &mut self,
        pcm: &[i16],
        timestamp: i64,
        duration: i64,
    ) -> Result<PushOutcome, AudioError> {
        debug_assert_eq!(pcm.len() % self.channels as usize, 0);
        let byte_count = std::mem::size_of_val(pcm) as u32;

        // SAFETY: sample/buffer creation and the lock/copy/unlock sequence
        // follow the MF sample protocol; the buffer outlives the copy.
        unsafe {
            let sample: IMFSample = MFCreateSample().map_err(|e| run_err("MFCreateSample", e))?;
            let buffer: IMFMediaBuffer = MFCreateMemoryBuffer(byte_count)
                .map_err(|e| run_err("MFCreateMemoryBuffer", e))?;

            let mut dest: *mut u8 = std::ptr::null_mut();
            buffer
                .Lock(&mut dest, None, None)
                .map_err(|e| run_err("buffer Lock", e))?;
            std::ptr::copy_nonoverlapping(pcm.as_ptr() as *const u8, dest, byte_count as usize);
            buffer.Unlock().map_err(|e| run_err("buffer Unlock", e))?;
            buffer
                .SetCurrentLength(byte_count)
                .map_err(|e| run_err("SetCurrentLength", e))?;

            sample
                .AddBuffer(&buffer)
                .map_err(|e| run_err("AddBuffer", e))?;
            sample
                .SetSampleTime(timestamp)
                .map_err(|e| run_err("SetSampleTime", e))?;
            sample
                .SetSampleDuration(duration)
                .map_err(|e| run_err("SetSampleDuration", e))?;

            match self.transform.ProcessInput(0, &sample, 0) {
                Ok(()) => Ok(PushOutcome::Accepted),
                Err(e) if e.code() == MF_E_NOTACCEPTING => Ok(PushOutcome::NotAccepting),
                Err(e) => Err(run_err("ProcessInput", e)),
            }
        }
    }

    fn pull(&mut self) -> Result<PullOutcome, AudioError> {
        // SAFETY: ProcessOutput with a caller-provided sample; the output
        // buffer is drained through Lock/Unlock before release.
        unsafe {
            let sample: IMFSample = MFCreateSample().map_err(|e| run_err("MFCreateSample", e))?;
            let buffer: IMFMediaBuffer = MFCreateMemoryBuffer(self.output_buffer_size)
                .map_err(|e| run_err("MFCreateMemoryBuffer", e))?;
            sample
                .AddBuffer(&buffer)
                .map_err(|e| run_err("AddBuffer", e))?;

            let mut output = MFT_OUTPUT_DATA_BUFFER {
                dwStreamID: 0,
                pSample: std::mem::ManuallyDrop::new(Some(sample.clone())),
                dwStatus: 0,
                pEvents: std::mem::ManuallyDrop::new(None),
            };
            let mut status: u32 = 0;
            let result = self
                .transform
                .ProcessOutput(0, std::slice::from_mut(&mut output), &mut status);
            std::mem::ManuallyDrop::drop(&mut output.pSample);
            std::mem::ManuallyDrop::drop(&mut output.pEvents);

            match result {
                Ok(()) => {}
                Err(e) if e.code() == MF_E_TRANSFORM_NEED_MORE_INPUT => {
                    return Ok(PullOutcome::NeedMoreInput);
                }
                Err(e) if e.code() == MF_E_TRANSFORM_STREAM_CHANGE => {
                    self.adopt_output_type()?;
                    return Ok(PullOutcome::StreamChange);
                }
                Err(e) => return Err(run_err("ProcessOutput", e)),
            }

            let out_buffer = sample
                .GetBufferByIndex(0)
                .map_err(|e| run_err("GetBufferByIndex", e))?;
            let mut data: *mut u8 = std::ptr::null_mut();
            let mut current: u32 = 0;
            out_buffer
                .Lock(&mut data, None, Some(&mut current))
                .map_err(|e| run_err("output Lock", e))?;
            let bytes = std::slice::from_raw_parts(data, current as usize).to_vec();
            out_buffer
                .Unlock()
                .map_err(|e| run_err("output Unlock", e))?;

            Ok(PullOutcome::Frame(bytes))
        }
    }

    fn begin_drain(&mut self) -> Result<(), AudioError> {
        // SAFETY: drain command per the MFT protocol.
        unsafe {
            self.transform
                .ProcessMessage(MFT_MESSAGE_COMMAND_DRAIN, 0)
                .map_err(|e| run_err("COMMAND_DRAIN", e))
        }
    }
}
