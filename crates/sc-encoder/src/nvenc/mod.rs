//! The NVENC encoder session state machine.
//!
//! `UNINITIALIZED → READY → RUNNING → DRAINING → CLOSED`
//!
//! The session is opened in DirectX device mode against the caller's
//! device. Output runs through a ring of bitstream slots: H.264 always
//! pipelines at depth 4, HEVC only when the session opts in (some drivers'
//! HEVC pipelining is fragile); a failed slot allocation degrades to a
//! single synchronous slot instead of failing the session.
//!
//! Slot readiness is established by polling `nvEncLockBitstream` with
//! `doNotWait` — a `LOCK_BUSY` answer means the picture is still in
//! flight, and the poll retries on a 2 ms cadence for at most 5 seconds
//! before the session fails with a timeout.

pub mod ffi;
pub mod params;

use std::ffi::c_void;
use std::ptr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use sc_common::{
    ConverterHandle, EncodeError, GpuContext, InputSurface, SessionConfig, SessionState,
    TextureDesc, TextureHandle, VideoBackend, VideoCodec,
};

use ffi::{
    check_nvenc_status, nvenc_status_name, NvEncCreateBitstreamBuffer, NvEncLockBitstream,
    NvEncMapInputResource, NvEncOpenEncodeSessionExParams, NvEncPicParams, NvEncPresetConfig,
    NvEncRegisterResource, NvEncInputResourceType, NvencLibrary, NV_ENC_DEVICE_TYPE_DIRECTX,
    NV_ENC_ERR_LOCK_BUSY, NV_ENC_ERR_NEED_MORE_INPUT, NV_ENC_PIC_FLAG_EOS,
    NV_ENC_PIC_STRUCT_FRAME, NV_ENC_SUCCESS,
};

/// Depth of the pipelined bitstream ring.
const ASYNC_DEPTH: usize = 4;

/// Poll cadence while a slot reports `LOCK_BUSY`.
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Give up on a slot after this long.
const LOCK_TIMEOUT: Duration = Duration::from_millis(5000);

/// One output bitstream slot of the ring.
struct BitstreamSlot {
    handle: *mut c_void,
    /// A picture was submitted into this slot and not yet consumed.
    pending: bool,
}

/// An input texture registered with the encoder, reused across frames.
struct RegisteredInput {
    texture: TextureHandle,
    registration: *mut c_void,
    desc: TextureDesc,
}

/// How source surfaces reach the encoder input.
enum InputPath {
    /// Copy the source into an owned staging texture, re-registering only
    /// when the source size or format changes.
    Rgb { staging: Option<RegisteredInput> },
    /// Fast preset: color-convert into an NV12 texture registered once.
    Nv12 {
        converter: ConverterHandle,
        target: RegisteredInput,
    },
}

/// NVENC encoder session implementing [`VideoBackend`].
///
/// Owns the session handle, the registered-input cache, and the output
/// bitstream slots. Used from the submission thread only.
pub struct VideoEncoder {
    lib: Arc<NvencLibrary>,
    session: *mut c_void,
    gpu: Box<dyn GpuContext>,
    state: SessionState,

    slots: Vec<BitstreamSlot>,
    /// Dedicated synchronous bitstream for the EOS picture (pipelined mode).
    eos_bitstream: Option<*mut c_void>,
    pipelined: bool,
    /// Next submission goes to slot `slot_cursor % slots.len()`.
    slot_cursor: usize,

    frame_index: u64,
    input: InputPath,
    codec: VideoCodec,
}

// SAFETY: The raw handles are only touched through the NVENC API from the
// single thread that owns the encoder. Send, not Sync.
unsafe impl Send for VideoEncoder {}

impl std::fmt::Debug for VideoEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoEncoder")
            .field("codec", &self.codec)
            .field("state", &self.state)
            .field("pipelined", &self.pipelined)
            .field("slots", &self.slots.len())
            .field("frame_index", &self.frame_index)
            .finish()
    }
}

impl VideoEncoder {
    /// Open and initialize an NVENC session for `config`.
    ///
    /// # Errors
    /// `SessionOpenFailed` if the driver rejects the device,
    /// `EncoderInitFailed` if the configuration is rejected.
    pub fn new(
        lib: Arc<NvencLibrary>,
        mut gpu: Box<dyn GpuContext>,
        config: &SessionConfig,
    ) -> Result<Self, EncodeError> {
        config.validate()?;

        // Open the session bound to the caller's D3D11 device.
        let mut open_params = NvEncOpenEncodeSessionExParams {
            device_type: NV_ENC_DEVICE_TYPE_DIRECTX,
            device: gpu.device_handle(),
            ..NvEncOpenEncodeSessionExParams::default()
        };
        let mut session: *mut c_void = ptr::null_mut();

        // SAFETY: open_params is fully initialized and the device handle is
        // valid for the GpuContext lifetime. NVENC writes the session handle.
        let status =
            unsafe { (lib.api.nvEncOpenEncodeSessionEx)(&mut open_params, &mut session) };
        check_nvenc_status(status, "nvEncOpenEncodeSessionEx")
            .map_err(EncodeError::SessionOpenFailed)?;

        // Query the preset defaults for (codec, preset, tuning), then apply
        // the session overrides on top.
        let mut preset_config = NvEncPresetConfig::default();
        // SAFETY: session is valid; NVENC fills preset_config.
        let status = unsafe {
            (lib.api.nvEncGetEncodePresetConfigEx)(
                session,
                params::codec_to_guid(config.codec),
                params::quality_to_preset(config.quality),
                params::tuning_info(),
                &mut preset_config,
            )
        };
        if let Err(reason) = check_nvenc_status(status, "nvEncGetEncodePresetConfigEx") {
            // SAFETY: session was just opened.
            unsafe { (lib.api.nvEncDestroyEncoder)(session) };
            return Err(EncodeError::EncoderInitFailed(reason));
        }

        let mut enc_config = Box::new(preset_config.preset_cfg);
        params::apply_session_overrides(&mut enc_config, config);

        let mut init_params = params::build_init_params(config);
        init_params.encode_config = &mut *enc_config;

        // SAFETY: session is valid; init_params.encode_config points to the
        // boxed config, which outlives the call.
        let status = unsafe { (lib.api.nvEncInitializeEncoder)(session, &mut init_params) };
        if let Err(reason) = check_nvenc_status(status, "nvEncInitializeEncoder") {
            // SAFETY: session was just opened.
            unsafe { (lib.api.nvEncDestroyEncoder)(session) };
            return Err(EncodeError::EncoderInitFailed(reason));
        }

        // Pipelined output: always for H.264, opt-in for HEVC.
        let want_pipelined =
            config.codec == VideoCodec::H264 || (config.codec == VideoCodec::Hevc && config.hevc_async);

        let (slots, eos_bitstream, pipelined) =
            match Self::allocate_slots(&lib, session, want_pipelined) {
                Ok(v) => v,
                Err(reason) => {
                    // SAFETY: session is valid.
                    unsafe { (lib.api.nvEncDestroyEncoder)(session) };
                    return Err(EncodeError::EncoderInitFailed(reason));
                }
            };

        // Fast preset: try the NV12 conversion path, fall back to staging
        // copies if the context cannot convert.
        let input = if config.fast_preset {
            match Self::setup_nv12_path(&lib, session, gpu.as_mut(), config) {
                Ok(path) => path,
                Err(reason) => {
                    warn!(%reason, "NV12 fast path unavailable; using staging copies");
                    InputPath::Rgb { staging: None }
                }
            }
        } else {
            InputPath::Rgb { staging: None }
        };

        info!(
            codec = config.codec.display_name(),
            width = config.resolution.width,
            height = config.resolution.height,
            fps = config.fps,
            pipelined,
            slots = slots.len(),
            gop = config.gop_length(),
            "NVENC session initialized"
        );

        Ok(Self {
            lib,
            session,
            gpu,
            state: SessionState::Ready,
            slots,
            eos_bitstream,
            pipelined,
            slot_cursor: 0,
            frame_index: 0,
            input,
            codec: config.codec,
        })
    }

    /// Allocate the output bitstream slots (plus the EOS bitstream in
    /// pipelined mode). A failed pipelined allocation degrades to a single
    /// synchronous slot rather than failing the session.
    fn allocate_slots(
        lib: &NvencLibrary,
        session: *mut c_void,
        want_pipelined: bool,
    ) -> Result<(Vec<BitstreamSlot>, Option<*mut c_void>, bool), String> {
        if want_pipelined {
            match Self::create_bitstreams(lib, session, ASYNC_DEPTH + 1) {
                Ok(mut handles) => {
                    let eos = handles.pop();
                    let slots = handles
                        .into_iter()
                        .map(|handle| BitstreamSlot {
                            handle,
                            pending: false,
                        })
                        .collect();
                    return Ok((slots, eos, true));
                }
                Err(reason) => {
                    warn!(%reason, "Pipelined slot allocation failed; degrading to sync");
                }
            }
        }

        let handles = Self::create_bitstreams(lib, session, 1)?;
        let slots = handles
            .into_iter()
            .map(|handle| BitstreamSlot {
                handle,
                pending: false,
            })
            .collect();
        Ok((slots, None, false))
    }

    fn create_bitstreams(
        lib: &NvencLibrary,
        session: *mut c_void,
        count: usize,
    ) -> Result<Vec<*mut c_void>, String> {
        let mut handles = Vec::with_capacity(count);
        for index in 0..count {
            let mut create = NvEncCreateBitstreamBuffer::default();
            // SAFETY: session is valid; NVENC writes the buffer handle.
            let status = unsafe { (lib.api.nvEncCreateBitstreamBuffer)(session, &mut create) };
            if let Err(reason) = check_nvenc_status(status, "nvEncCreateBitstreamBuffer") {
                for handle in handles {
                    // SAFETY: handle came from a successful creation above.
                    unsafe { (lib.api.nvEncDestroyBitstreamBuffer)(session, handle) };
                }
                return Err(reason);
            }
            debug!(index, "Created output bitstream buffer");
            handles.push(create.bitstream_buffer);
        }
        Ok(handles)
    }

    fn setup_nv12_path(
        lib: &NvencLibrary,
        session: *mut c_void,
        gpu: &mut dyn GpuContext,
        config: &SessionConfig,
    ) -> Result<InputPath, String> {
        let converter = gpu
            .create_nv12_converter(config.resolution)
            .map_err(|e| e.to_string())?;

        let desc = TextureDesc {
            resolution: config.resolution,
            format: sc_common::PixelFormat::Nv12,
        };
        let texture = match gpu.create_texture(&desc) {
            Ok(t) => t,
            Err(e) => {
                gpu.destroy_converter(converter);
                return Err(e.to_string());
            }
        };
        let registration = match register_texture(lib, session, texture, &desc) {
            Ok(r) => r,
            Err(reason) => {
                gpu.destroy_texture(texture);
                gpu.destroy_converter(converter);
                return Err(reason);
            }
        };

        info!(size = %config.resolution, "NV12 fast path active");
        Ok(InputPath::Nv12 {
            converter,
            target: RegisteredInput {
                texture,
                registration,
                desc,
            },
        })
    }

    /// Route the surface onto the encoder input and return the registered
    /// resource to map for this frame.
    fn prepare_input(&mut self, surface: &InputSurface) -> Result<*mut c_void, EncodeError> {
        let session = self.session;
        match &mut self.input {
            InputPath::Nv12 { converter, target } => {
                self.gpu
                    .convert_to_nv12(*converter, surface.handle, target.texture)?;
                Ok(target.registration)
            }
            InputPath::Rgb { staging } => {
                let desc = surface.desc();
                if staging.as_ref().is_some_and(|s| s.desc != desc) {
                    // Source geometry changed: drop the stale registration.
                    if let Some(old) = staging.take() {
                        debug!(old = ?old.desc, new = ?desc, "Recreating staging texture");
                        release_registration(&self.lib, session, old.registration);
                        self.gpu.destroy_texture(old.texture);
                    }
                }
                if staging.is_none() {
                    let texture = self.gpu.create_texture(&desc)?;
                    let registration = match register_texture(&self.lib, session, texture, &desc)
                    {
                        Ok(r) => r,
                        Err(reason) => {
                            self.gpu.destroy_texture(texture);
                            return Err(EncodeError::SubmitFailed {
                                frame: self.frame_index,
                                reason,
                            });
                        }
                    };
                    *staging = Some(RegisteredInput {
                        texture,
                        registration,
                        desc,
                    });
                }

                let input = staging.as_ref().expect("staging created above");
                self.gpu.copy_texture(surface.handle, input.texture)?;
                Ok(input.registration)
            }
        }
    }

    fn submit_frame(&mut self, surface: &InputSurface) -> Result<Vec<Vec<u8>>, EncodeError> {
        let registration = self.prepare_input(surface)?;

        let mut outputs = Vec::new();
        let depth = self.slots.len();
        let slot = self.slot_cursor % depth;
        // Wrapping onto a still-pending slot: consume its picture first.
        if self.slots[slot].pending {
            if let Some(bytes) = self.consume_slot(slot)? {
                outputs.push(bytes);
            }
        }

        let mut map = NvEncMapInputResource {
            registered_resource: registration,
            ..NvEncMapInputResource::default()
        };
        // SAFETY: session and registration are valid; NVENC writes the
        // mapped handle and format.
        let status = unsafe { (self.lib.api.nvEncMapInputResource)(self.session, &mut map) };
        check_nvenc_status(status, "nvEncMapInputResource").map_err(|reason| {
            EncodeError::SubmitFailed {
                frame: self.frame_index,
                reason,
            }
        })?;

        let mut pic = NvEncPicParams {
            input_width: surface.resolution.width,
            input_height: surface.resolution.height,
            input_buffer: map.mapped_resource,
            output_bitstream: self.slots[slot].handle,
            buffer_fmt: map.mapped_buffer_fmt,
            pic_struct: NV_ENC_PIC_STRUCT_FRAME,
            input_time_stamp: self.frame_index,
            input_duration: 1,
            ..NvEncPicParams::default()
        };
        self.frame_index += 1;

        // SAFETY: session is valid; pic references the mapped input and an
        // allocated bitstream slot.
        let status = unsafe { (self.lib.api.nvEncEncodePicture)(self.session, &mut pic) };

        // SAFETY: the mapped handle came from a successful map above.
        let unmap =
            unsafe { (self.lib.api.nvEncUnmapInputResource)(self.session, map.mapped_resource) };
        if unmap != NV_ENC_SUCCESS {
            warn!(status = unmap, "Failed to unmap input resource");
        }

        if status != NV_ENC_SUCCESS && status != NV_ENC_ERR_NEED_MORE_INPUT {
            return Err(EncodeError::SubmitFailed {
                frame: self.frame_index - 1,
                reason: format!(
                    "nvEncEncodePicture failed with NVENC status {status} ({})",
                    nvenc_status_name(status)
                ),
            });
        }

        if self.pipelined {
            self.slots[slot].pending = true;
            self.slot_cursor += 1;
        } else if status == NV_ENC_SUCCESS {
            if let Some(bytes) = self.consume_slot(slot)? {
                outputs.push(bytes);
            }
        }

        if self.state == SessionState::Ready {
            self.state = SessionState::Running;
        }
        Ok(outputs)
    }

    /// Consume the picture in `slot`, returning its Annex-B bytes.
    fn consume_slot(&mut self, slot: usize) -> Result<Option<Vec<u8>>, EncodeError> {
        let handle = self.slots[slot].handle;
        let bytes = self.lock_and_copy(handle, slot)?;
        self.slots[slot].pending = false;
        Ok(if bytes.is_empty() { None } else { Some(bytes) })
    }

    /// Poll-lock a bitstream, copy its payload out, and unlock it.
    ///
    /// The `doNotWait` poll is the authoritative readiness signal; a
    /// `LOCK_BUSY` answer retries every 2 ms for up to 5 seconds.
    fn lock_and_copy(&self, handle: *mut c_void, slot: usize) -> Result<Vec<u8>, EncodeError> {
        let started = Instant::now();
        loop {
            let mut lock = NvEncLockBitstream {
                do_not_wait: 1,
                output_bitstream: handle,
                ..NvEncLockBitstream::default()
            };
            // SAFETY: session and handle are valid; NVENC fills the output
            // fields on success.
            let status = unsafe { (self.lib.api.nvEncLockBitstream)(self.session, &mut lock) };

            if status == NV_ENC_ERR_LOCK_BUSY {
                if started.elapsed() >= LOCK_TIMEOUT {
                    error!(slot, "Encoder output never became ready");
                    return Err(EncodeError::AsyncTimeout { slot });
                }
                std::thread::sleep(LOCK_POLL_INTERVAL);
                continue;
            }
            check_nvenc_status(status, "nvEncLockBitstream").map_err(EncodeError::LockFailed)?;

            let bytes = if !lock.bitstream_buffer_ptr.is_null()
                && lock.bitstream_size_in_bytes > 0
            {
                // SAFETY: pointer and size were set by the successful lock
                // and stay valid until the unlock below.
                unsafe {
                    std::slice::from_raw_parts(
                        lock.bitstream_buffer_ptr as *const u8,
                        lock.bitstream_size_in_bytes as usize,
                    )
                }
                .to_vec()
            } else {
                Vec::new()
            };

            // SAFETY: the handle was successfully locked above.
            let status = unsafe { (self.lib.api.nvEncUnlockBitstream)(self.session, handle) };
            check_nvenc_status(status, "nvEncUnlockBitstream")
                .map_err(EncodeError::UnlockFailed)?;

            debug!(slot, bytes = bytes.len(), "Consumed bitstream slot");
            return Ok(bytes);
        }
    }

    fn drain_pipeline(&mut self) -> Result<Vec<Vec<u8>>, EncodeError> {
        self.state = SessionState::Draining;
        let mut outputs = Vec::new();

        // EOS picture. In pipelined mode it gets its own bitstream that is
        // consumed synchronously; in sync mode no output is attached.
        let mut pic = NvEncPicParams {
            encode_pic_flags: NV_ENC_PIC_FLAG_EOS,
            output_bitstream: self.eos_bitstream.unwrap_or(ptr::null_mut()),
            ..NvEncPicParams::default()
        };
        // SAFETY: session is valid; the EOS picture has no input buffer.
        let status = unsafe { (self.lib.api.nvEncEncodePicture)(self.session, &mut pic) };
        if status != NV_ENC_SUCCESS && status != NV_ENC_ERR_NEED_MORE_INPUT {
            return Err(EncodeError::SubmitFailed {
                frame: self.frame_index,
                reason: format!(
                    "nvEncEncodePicture (EOS) failed with NVENC status {status} ({})",
                    nvenc_status_name(status)
                ),
            });
        }

        if let Some(eos) = self.eos_bitstream {
            if status == NV_ENC_SUCCESS {
                let bytes = self.lock_and_copy(eos, self.slots.len())?;
                if !bytes.is_empty() {
                    outputs.push(bytes);
                }
            }
        }

        // Pending slots flush in index order.
        for slot in 0..self.slots.len() {
            if self.slots[slot].pending {
                if let Some(bytes) = self.consume_slot(slot)? {
                    outputs.push(bytes);
                }
            }
        }

        info!(
            flushed = outputs.len(),
            frames = self.frame_index,
            "Encoder drained"
        );
        Ok(outputs)
    }

    fn release_input(&mut self) {
        let session = self.session;
        match std::mem::replace(&mut self.input, InputPath::Rgb { staging: None }) {
            InputPath::Rgb { staging: Some(input) } => {
                release_registration(&self.lib, session, input.registration);
                self.gpu.destroy_texture(input.texture);
            }
            InputPath::Rgb { staging: None } => {}
            InputPath::Nv12 { converter, target } => {
                release_registration(&self.lib, session, target.registration);
                self.gpu.destroy_texture(target.texture);
                self.gpu.destroy_converter(converter);
            }
        }
    }
}

impl VideoBackend for VideoEncoder {
    fn submit(&mut self, surface: &InputSurface) -> Result<Vec<Vec<u8>>, EncodeError> {
        self.submit_frame(surface)
    }

    fn drain(&mut self) -> Result<Vec<Vec<u8>>, EncodeError> {
        self.drain_pipeline()
    }

    fn state(&self) -> SessionState {
        self.state
    }
}

impl Drop for VideoEncoder {
    fn drop(&mut self) {
        // Registrations are released before the session that owns them.
        self.release_input();

        for slot in &self.slots {
            if !slot.handle.is_null() {
                // SAFETY: slot handles are valid for the session lifetime.
                let status = unsafe {
                    (self.lib.api.nvEncDestroyBitstreamBuffer)(self.session, slot.handle)
                };
                if status != NV_ENC_SUCCESS {
                    warn!(status, "Failed to destroy bitstream buffer");
                }
            }
        }
        if let Some(eos) = self.eos_bitstream.take() {
            // SAFETY: the EOS bitstream is valid for the session lifetime.
            unsafe { (self.lib.api.nvEncDestroyBitstreamBuffer)(self.session, eos) };
        }

        if !self.session.is_null() {
            // SAFETY: the session came from nvEncOpenEncodeSessionEx.
            let status = unsafe { (self.lib.api.nvEncDestroyEncoder)(self.session) };
            if status != NV_ENC_SUCCESS {
                error!(status, "Failed to destroy NVENC session");
            }
            self.session = ptr::null_mut();
        }

        self.state = SessionState::Closed;
        info!(frames = self.frame_index, "NVENC session closed");
    }
}

/// Register a texture as encoder input.
fn register_texture(
    lib: &NvencLibrary,
    session: *mut c_void,
    texture: TextureHandle,
    desc: &TextureDesc,
) -> Result<*mut c_void, String> {
    let mut register = NvEncRegisterResource {
        resource_type: NvEncInputResourceType::Directx,
        width: desc.resolution.width,
        height: desc.resolution.height,
        pitch: 0,
        resource_to_register: texture.as_ptr(),
        buffer_format: params::pixel_format_to_nvenc(desc.format),
        ..NvEncRegisterResource::default()
    };
    // SAFETY: session and the texture pointer are valid; NVENC writes the
    // registered handle.
    let status = unsafe { (lib.api.nvEncRegisterResource)(session, &mut register) };
    check_nvenc_status(status, "nvEncRegisterResource")?;
    Ok(register.registered_resource)
}

/// Release a registration; failures are logged, not propagated (the caller
/// is on a teardown path).
fn release_registration(lib: &NvencLibrary, session: *mut c_void, registration: *mut c_void) {
    // SAFETY: the registration came from a successful nvEncRegisterResource
    // and is not currently mapped.
    let status = unsafe { (lib.api.nvEncUnregisterResource)(session, registration) };
    if status != NV_ENC_SUCCESS {
        warn!(status, "Failed to unregister input resource");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn async_depth_is_bounded() {
        assert!(ASYNC_DEPTH >= 2);
        assert!(ASYNC_DEPTH <= 16);
    }

    #[test]
    fn lock_poll_constants() {
        // 2 ms cadence, 5 s cap.
        assert_eq!(LOCK_POLL_INTERVAL, Duration::from_millis(2));
        assert_eq!(LOCK_TIMEOUT, Duration::from_millis(5000));
    }

    // Session-dependent tests require NVIDIA hardware and run ignored.
    #[test]
    #[ignore]
    fn load_library_on_gpu_host() {
        let lib = NvencLibrary::load();
        assert!(lib.is_ok());
    }
}
