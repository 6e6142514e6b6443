//! GPU seam abstractions.
//!
//! The recorder core never talks to the graphics API directly. The caller
//! owns the device and the source surfaces; this module defines the narrow
//! interface the encoder needs from them: opaque texture handles, a staging
//! copy, and an optional NV12 color-space conversion. Concrete
//! implementations live with the capture side.

use std::ffi::c_void;

use crate::error::{EncodeError, GpuError};
use crate::types::{PixelFormat, Resolution};

/// Opaque handle to a GPU texture (e.g. an `ID3D11Texture2D*`).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub u64);

impl TextureHandle {
    /// The raw pointer value, for handing to the encoder API.
    pub fn as_ptr(self) -> *mut c_void {
        self.0 as *mut c_void
    }
}

/// Opaque handle to a color-space converter owned by the GPU context.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConverterHandle(pub u64);

/// Description of a texture to create or match against.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TextureDesc {
    pub resolution: Resolution,
    pub format: PixelFormat,
}

/// A GPU-resident input surface owned by the caller.
#[derive(Copy, Clone, Debug)]
pub struct InputSurface {
    pub handle: TextureHandle,
    pub resolution: Resolution,
    pub format: PixelFormat,
}

impl InputSurface {
    pub fn desc(&self) -> TextureDesc {
        TextureDesc {
            resolution: self.resolution,
            format: self.format,
        }
    }
}

/// The device-side operations the encoder borrows from the caller.
///
/// One implementation wraps the caller's D3D11 device; tests substitute a
/// mock. All methods are called from the submission thread only.
pub trait GpuContext: Send {
    /// The raw device handle the encoder session binds to
    /// (an `ID3D11Device*` in DirectX mode).
    fn device_handle(&self) -> *mut c_void;

    /// Create a texture the encoder can register as its input.
    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureHandle, GpuError>;

    /// Release a texture created by [`GpuContext::create_texture`].
    fn destroy_texture(&mut self, texture: TextureHandle);

    /// Copy `src` into `dst`; both must share one description.
    fn copy_texture(&mut self, src: TextureHandle, dst: TextureHandle) -> Result<(), GpuError>;

    /// Create a converter that blts color surfaces of `size` into NV12.
    ///
    /// Implementations without video-processor support return
    /// `GpuError::ConverterUnavailable`; the encoder then stays on the
    /// staging-copy path.
    fn create_nv12_converter(&mut self, size: Resolution) -> Result<ConverterHandle, GpuError>;

    /// Release a converter created by [`GpuContext::create_nv12_converter`].
    fn destroy_converter(&mut self, converter: ConverterHandle);

    /// Convert `src` into the NV12 texture `dst`.
    fn convert_to_nv12(
        &mut self,
        converter: ConverterHandle,
        src: TextureHandle,
        dst: TextureHandle,
    ) -> Result<(), GpuError>;
}

/// Hardware encoder session state.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Ready,
    Running,
    Draining,
    Closed,
}

/// Hardware video encoder seam.
///
/// The production implementation drives NVENC; tests substitute a mock that
/// emits canned Annex-B buffers. Each returned buffer is one complete
/// encoded picture in Annex-B form.
pub trait VideoBackend: Send {
    /// Submit one surface for encoding.
    ///
    /// Returns the Annex-B pictures that completed as a result of this
    /// submission (possibly none while the pipeline fills).
    fn submit(&mut self, surface: &InputSurface) -> Result<Vec<Vec<u8>>, EncodeError>;

    /// Signal end of stream and collect every remaining picture.
    fn drain(&mut self) -> Result<Vec<Vec<u8>>, EncodeError>;

    /// Current session state.
    fn state(&self) -> SessionState;
}
