//! Raw FFI bindings for NVIDIA's NVENC (nvEncodeAPI) library.
//!
//! These bindings are loaded dynamically at runtime via `libloading`.
//! They cover the minimum API surface needed for H.264 and HEVC hardware
//! encoding in DirectX device mode.
//!
//! Reference: NVIDIA Video Codec SDK — `nvEncodeAPI.h`.

use std::ffi::c_void;

use libloading::Library;
use tracing::{debug, info};

use sc_common::EncodeError;

// ---------------------------------------------------------------------------
// NVENC status codes
// ---------------------------------------------------------------------------

/// NVENC API return type.
pub type NvencStatus = i32;

pub const NV_ENC_SUCCESS: NvencStatus = 0;
pub const NV_ENC_ERR_NO_ENCODE_DEVICE: NvencStatus = 1;
pub const NV_ENC_ERR_UNSUPPORTED_DEVICE: NvencStatus = 2;
pub const NV_ENC_ERR_INVALID_PARAM: NvencStatus = 8;
pub const NV_ENC_ERR_OUT_OF_MEMORY: NvencStatus = 10;
/// The bitstream is still being produced; retry the lock.
pub const NV_ENC_ERR_LOCK_BUSY: NvencStatus = 13;
pub const NV_ENC_ERR_INVALID_VERSION: NvencStatus = 15;
/// More input pictures are needed before output is available. Not an error.
pub const NV_ENC_ERR_NEED_MORE_INPUT: NvencStatus = 17;
pub const NV_ENC_ERR_ENCODER_BUSY: NvencStatus = 18;
pub const NV_ENC_ERR_GENERIC: NvencStatus = 20;

/// Get a human-readable name for an NVENC status code.
pub fn nvenc_status_name(status: NvencStatus) -> &'static str {
    match status {
        0 => "NV_ENC_SUCCESS",
        1 => "NV_ENC_ERR_NO_ENCODE_DEVICE",
        2 => "NV_ENC_ERR_UNSUPPORTED_DEVICE",
        3 => "NV_ENC_ERR_INVALID_ENCODERDEVICE",
        4 => "NV_ENC_ERR_INVALID_DEVICE",
        5 => "NV_ENC_ERR_DEVICE_NOT_EXIST",
        6 => "NV_ENC_ERR_INVALID_PTR",
        7 => "NV_ENC_ERR_INVALID_EVENT",
        8 => "NV_ENC_ERR_INVALID_PARAM",
        9 => "NV_ENC_ERR_INVALID_CALL",
        10 => "NV_ENC_ERR_OUT_OF_MEMORY",
        11 => "NV_ENC_ERR_ENCODER_NOT_INITIALIZED",
        12 => "NV_ENC_ERR_UNSUPPORTED_PARAM",
        13 => "NV_ENC_ERR_LOCK_BUSY",
        14 => "NV_ENC_ERR_NOT_ENOUGH_BUFFER",
        15 => "NV_ENC_ERR_INVALID_VERSION",
        16 => "NV_ENC_ERR_MAP_FAILED",
        17 => "NV_ENC_ERR_NEED_MORE_INPUT",
        18 => "NV_ENC_ERR_ENCODER_BUSY",
        19 => "NV_ENC_ERR_EVENT_NOT_REGISTERD",
        20 => "NV_ENC_ERR_GENERIC",
        21 => "NV_ENC_ERR_INCOMPATIBLE_CLIENT_KEY",
        22 => "NV_ENC_ERR_UNIMPLEMENTED",
        23 => "NV_ENC_ERR_RESOURCE_REGISTER_FAILED",
        24 => "NV_ENC_ERR_RESOURCE_NOT_REGISTERED",
        25 => "NV_ENC_ERR_RESOURCE_NOT_MAPPED",
        _ => "NV_ENC_ERR_UNKNOWN",
    }
}

/// Convert an `NvencStatus` to a Result, mapping failures to an error string.
pub fn check_nvenc_status(status: NvencStatus, function_name: &str) -> Result<(), String> {
    if status == NV_ENC_SUCCESS {
        Ok(())
    } else {
        Err(format!(
            "{function_name} failed with NVENC status {status} ({})",
            nvenc_status_name(status)
        ))
    }
}

// ---------------------------------------------------------------------------
// NVENC API version
// ---------------------------------------------------------------------------

/// NVENC API major version we target (Video Codec SDK 12.x).
pub const NVENCAPI_MAJOR_VERSION: u32 = 12;
/// NVENC API minor version.
pub const NVENCAPI_MINOR_VERSION: u32 = 2;
/// Packed API version.
pub const NVENCAPI_VERSION: u32 = NVENCAPI_MAJOR_VERSION | (NVENCAPI_MINOR_VERSION << 24);

/// Struct versioning: `(struct_ver) | (NVENCAPI_VERSION << 16)`.
pub const fn nvenc_struct_version(struct_ver: u32) -> u32 {
    struct_ver | (NVENCAPI_VERSION << 16)
}

// ---------------------------------------------------------------------------
// GUIDs
// ---------------------------------------------------------------------------

/// GUID structure matching NVENC's `GUID` type (Windows-compatible layout).
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct NvGuid {
    pub data1: u32,
    pub data2: u16,
    pub data3: u16,
    pub data4: [u8; 8],
}

/// Codec GUID: H.264.
pub const NV_ENC_CODEC_H264_GUID: NvGuid = NvGuid {
    data1: 0x6BC8_2762,
    data2: 0x4E63,
    data3: 0x4CA4,
    data4: [0xAA, 0x85, 0x1A, 0x4D, 0x14, 0x15, 0x26, 0xD2],
};

/// Codec GUID: H.265/HEVC.
pub const NV_ENC_CODEC_HEVC_GUID: NvGuid = NvGuid {
    data1: 0x790C_DC88,
    data2: 0x4522,
    data3: 0x4D7B,
    data4: [0x94, 0x25, 0xBD, 0xA9, 0x97, 0x5F, 0x76, 0x03],
};

/// Preset GUID: P1 (fastest).
pub const NV_ENC_PRESET_P1_GUID: NvGuid = NvGuid {
    data1: 0xFC0E_8692,
    data2: 0x8FF1,
    data3: 0x4C3D,
    data4: [0xBA, 0xD8, 0xF5, 0x64, 0xC0, 0x1D, 0x2A, 0xB1],
};

/// Preset GUID: P3.
pub const NV_ENC_PRESET_P3_GUID: NvGuid = NvGuid {
    data1: 0x3685_0110,
    data2: 0x3A07,
    data3: 0x441F,
    data4: [0x94, 0xD5, 0x34, 0x70, 0x63, 0x1F, 0x91, 0xF6],
};

/// Preset GUID: P7 (slowest/best quality).
pub const NV_ENC_PRESET_P7_GUID: NvGuid = NvGuid {
    data1: 0x8484_8C12,
    data2: 0x6F71,
    data3: 0x4C13,
    data4: [0x93, 0x1B, 0x53, 0xE5, 0xD9, 0x03, 0xF6, 0x03],
};

/// Tuning info for high quality.
pub const NV_ENC_TUNING_INFO_HIGH_QUALITY: u32 = 1;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Device type for session open. Matches `NV_ENC_DEVICE_TYPE`.
pub const NV_ENC_DEVICE_TYPE_DIRECTX: u32 = 0;

/// Input buffer format. Matches `NV_ENC_BUFFER_FORMAT`.
#[repr(u32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NvEncBufferFormat {
    Undefined = 0x0000_0000,
    /// Semi-planar YUV 4:2:0, 8-bit.
    Nv12 = 0x0000_0001,
    /// Interleaved ARGB (B in the lowest byte; matches BGRA memory order).
    Argb = 0x0100_0000,
    /// Interleaved ABGR (R in the lowest byte; matches RGBA memory order).
    Abgr = 0x1000_0000,
}

/// Resource type for registering external resources.
/// Matches `NV_ENC_INPUT_RESOURCE_TYPE`.
#[repr(u32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NvEncInputResourceType {
    /// DirectX texture (`ID3D11Texture2D`).
    Directx = 0,
    /// CUDA device pointer.
    CudaDeviceptr = 1,
    /// CUDA array.
    CudaArray = 2,
    /// OpenGL texture.
    OpenglTex = 3,
}

/// Rate control mode. Matches `NV_ENC_PARAMS_RC_MODE`.
#[repr(u32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NvEncRcMode {
    ConstQp = 0x0,
    Vbr = 0x1,
    Cbr = 0x2,
}

/// Progressive frame encoding. Matches `NV_ENC_PIC_STRUCT_FRAME`.
pub const NV_ENC_PIC_STRUCT_FRAME: u32 = 0x01;

/// End-of-stream flag in `NvEncPicParams::encode_pic_flags`.
/// Matches `NV_ENC_PIC_FLAG_EOS`.
pub const NV_ENC_PIC_FLAG_EOS: u32 = 0x8;

// ---------------------------------------------------------------------------
// Core NVENC structs
// ---------------------------------------------------------------------------

/// Open encode session parameters. Matches `NV_ENC_OPEN_ENCODE_SESSION_EX_PARAMS`.
#[repr(C)]
pub struct NvEncOpenEncodeSessionExParams {
    pub version: u32,
    /// Device type: [`NV_ENC_DEVICE_TYPE_DIRECTX`] for D3D11 devices.
    pub device_type: u32,
    /// Device handle (`ID3D11Device*` in DirectX mode).
    pub device: *mut c_void,
    pub reserved: *mut c_void,
    /// API version the client is compiled against.
    pub api_version: u32,
    pub reserved1: [u32; 253],
    pub reserved2: [*mut c_void; 64],
}

// SAFETY: POD struct; the device pointer is only read during session open.
unsafe impl Send for NvEncOpenEncodeSessionExParams {}

impl Default for NvEncOpenEncodeSessionExParams {
    fn default() -> Self {
        // SAFETY: All-zeros is a valid default for this POD struct.
        let mut s: Self = unsafe { std::mem::zeroed() };
        s.version = nvenc_struct_version(1);
        s.api_version = NVENCAPI_VERSION;
        s
    }
}

/// Encode initialization parameters. Matches `NV_ENC_INITIALIZE_PARAMS`.
#[repr(C)]
pub struct NvEncInitializeParams {
    pub version: u32,
    pub encode_guid: NvGuid,
    pub preset_guid: NvGuid,
    pub encode_width: u32,
    pub encode_height: u32,
    pub dar_width: u32,
    pub dar_height: u32,
    pub frame_rate_num: u32,
    pub frame_rate_den: u32,
    pub enable_encode_async: u32,
    /// Enable picture-type decision (the encoder chooses IDR placement).
    pub enable_ptd: u32,
    pub report_slice_offsets: u32,
    pub enable_sub_frame_write: u32,
    pub enable_external_me_hints: u32,
    pub enable_me_only_mode: u32,
    pub enable_weighted_prediction: u32,
    pub enable_output_in_video_mem: u32,
    pub reserved1: [u32; 233],
    /// Pointer to the codec configuration (must outlive the init call).
    pub encode_config: *mut NvEncConfig,
    pub max_encode_width: u32,
    pub max_encode_height: u32,
    pub max_me_hint_count_per_block: [u32; 2],
    pub tuning_info: u32,
    pub reserved2: [*mut c_void; 62],
}

// SAFETY: POD struct; encode_config must point to valid memory during the
// NvEncInitializeEncoder call.
unsafe impl Send for NvEncInitializeParams {}

impl Default for NvEncInitializeParams {
    fn default() -> Self {
        // SAFETY: All-zeros is valid for this POD struct.
        let mut s: Self = unsafe { std::mem::zeroed() };
        s.version = nvenc_struct_version(1);
        s.enable_ptd = 1;
        s
    }
}

/// Codec-specific configuration (simplified view of the NVENC union; the
/// fields we override sit at the front for both H.264 and HEVC).
#[repr(C)]
pub struct NvEncCodecConfig {
    /// Emit SPS/PPS (and VPS for HEVC) with every IDR picture.
    pub repeat_sps_pps: u32,
    /// IDR interval in frames.
    pub idr_period: u32,
    pub reserved: [u8; 2040],
}

impl Default for NvEncCodecConfig {
    fn default() -> Self {
        // SAFETY: All-zeros is valid for this POD struct.
        unsafe { std::mem::zeroed() }
    }
}

/// Encoder configuration. Matches `NV_ENC_CONFIG`.
#[repr(C)]
pub struct NvEncConfig {
    pub version: u32,
    pub profile_guid: NvGuid,
    /// GOP length in frames (0 = auto).
    pub gop_length: u32,
    /// P-frame interval; 1 disables B frames.
    pub frame_interval_p: i32,
    pub rc_params: NvEncRcParams,
    pub codec_config: NvEncCodecConfig,
    pub reserved: [u32; 278],
    pub reserved2: [*mut c_void; 64],
}

// SAFETY: POD struct.
unsafe impl Send for NvEncConfig {}

impl Default for NvEncConfig {
    fn default() -> Self {
        // SAFETY: All-zeros is valid for this POD struct.
        let mut s: Self = unsafe { std::mem::zeroed() };
        s.version = nvenc_struct_version(1);
        s
    }
}

/// Rate control parameters. Matches `NV_ENC_RC_PARAMS`.
#[repr(C)]
#[derive(Clone)]
pub struct NvEncRcParams {
    pub rate_control_mode: NvEncRcMode,
    pub const_qp_i: u32,
    pub const_qp_p: u32,
    pub const_qp_b: u32,
    /// Average bitrate (bits/sec).
    pub average_bitrate: u32,
    /// Maximum bitrate (bits/sec, VBR).
    pub max_bitrate: u32,
    pub vbv_buffer_size: u32,
    pub vbv_initial_delay: u32,
    pub reserved: [u32; 256],
}

impl Default for NvEncRcParams {
    fn default() -> Self {
        // SAFETY: All-zeros is valid for this POD struct (mode 0 = ConstQp).
        unsafe { std::mem::zeroed() }
    }
}

/// Picture encode parameters. Matches `NV_ENC_PIC_PARAMS`.
#[repr(C)]
pub struct NvEncPicParams {
    pub version: u32,
    pub input_width: u32,
    pub input_height: u32,
    pub input_pitch: u32,
    pub encode_pic_flags: u32,
    pub frame_idx: u32,
    pub input_time_stamp: u64,
    pub input_duration: u64,
    pub input_buffer: *mut c_void,
    pub output_bitstream: *mut c_void,
    pub completion_event: *mut c_void,
    pub buffer_fmt: NvEncBufferFormat,
    pub pic_struct: u32,
    pub pic_type: u32,
    pub codec_pic_params: [u8; 256],
    pub reserved1: [u32; 6],
    pub reserved2: [*mut c_void; 2],
    pub reserved3: [u32; 284],
    pub reserved4: [*mut c_void; 60],
}

// SAFETY: POD struct; the buffer pointers are only valid during
// NvEncEncodePicture and backed by resources that outlive the call.
unsafe impl Send for NvEncPicParams {}

impl Default for NvEncPicParams {
    fn default() -> Self {
        // SAFETY: All-zeros is valid for this POD struct.
        let mut s: Self = unsafe { std::mem::zeroed() };
        s.version = nvenc_struct_version(1);
        s
    }
}

/// Lock bitstream parameters. Matches `NV_ENC_LOCK_BITSTREAM`.
#[repr(C)]
pub struct NvEncLockBitstream {
    pub version: u32,
    /// When set, the lock returns `NV_ENC_ERR_LOCK_BUSY` instead of
    /// blocking until the output is ready.
    pub do_not_wait: u32,
    pub lkey: u32,
    pub output_bitstream: *mut c_void,
    pub slice_offsets: *mut u32,
    /// [out] Frame index.
    pub frame_idx: u32,
    /// [out] Hardware encode status.
    pub hw_encode_status: u32,
    /// [out] Number of slices.
    pub num_slices: u32,
    /// [out] Bitstream size in bytes.
    pub bitstream_size_in_bytes: u32,
    /// [out] Output timestamp.
    pub output_time_stamp: u64,
    /// [out] Output duration.
    pub output_duration: u64,
    /// [out] Pointer to the bitstream data.
    pub bitstream_buffer_ptr: *mut c_void,
    /// [out] Picture type.
    pub pic_type: u32,
    /// [out] Picture struct.
    pub pic_struct: u32,
    /// [out] Frame average QP.
    pub frame_avg_qp: u32,
    pub reserved: [u32; 236],
    pub reserved2: [*mut c_void; 64],
}

// SAFETY: POD struct.
unsafe impl Send for NvEncLockBitstream {}

impl Default for NvEncLockBitstream {
    fn default() -> Self {
        // SAFETY: All-zeros is valid for this POD struct.
        let mut s: Self = unsafe { std::mem::zeroed() };
        s.version = nvenc_struct_version(1);
        s
    }
}

/// Create bitstream buffer params. Matches `NV_ENC_CREATE_BITSTREAM_BUFFER`.
#[repr(C)]
pub struct NvEncCreateBitstreamBuffer {
    pub version: u32,
    pub reserved: u32,
    pub memory_heap: u32,
    pub reserved1: u32,
    /// [out] Bitstream buffer handle.
    pub bitstream_buffer: *mut c_void,
    /// [out] Host-visible pointer (legacy).
    pub bitstream_buffer_ptr: *mut c_void,
    pub reserved2: [u32; 58],
    pub reserved3: [*mut c_void; 64],
}

// SAFETY: POD struct.
unsafe impl Send for NvEncCreateBitstreamBuffer {}

impl Default for NvEncCreateBitstreamBuffer {
    fn default() -> Self {
        // SAFETY: All-zeros is valid for this POD struct.
        let mut s: Self = unsafe { std::mem::zeroed() };
        s.version = nvenc_struct_version(1);
        s
    }
}

/// Register external resource. Matches `NV_ENC_REGISTER_RESOURCE`.
#[repr(C)]
pub struct NvEncRegisterResource {
    pub version: u32,
    pub resource_type: NvEncInputResourceType,
    pub width: u32,
    pub height: u32,
    pub pitch: u32,
    pub sub_resource_index: u32,
    /// The external resource to register (`ID3D11Texture2D*`).
    pub resource_to_register: *mut c_void,
    /// [out] Registered resource handle.
    pub registered_resource: *mut c_void,
    pub buffer_format: NvEncBufferFormat,
    /// 0 = input image.
    pub buffer_usage: u32,
    pub reserved1: [u32; 247],
    pub reserved2: [*mut c_void; 62],
}

// SAFETY: POD struct.
unsafe impl Send for NvEncRegisterResource {}

impl Default for NvEncRegisterResource {
    fn default() -> Self {
        // SAFETY: All-zeros is valid except resource_type, set by the caller.
        let mut s: Self = unsafe { std::mem::zeroed() };
        s.version = nvenc_struct_version(1);
        s
    }
}

/// Map input resource. Matches `NV_ENC_MAP_INPUT_RESOURCE`.
#[repr(C)]
pub struct NvEncMapInputResource {
    pub version: u32,
    pub sub_resource_index: u32,
    pub input_resource: *mut c_void,
    pub registered_resource: *mut c_void,
    /// [out] Mapped handle, used as `input_buffer` in pic params.
    pub mapped_resource: *mut c_void,
    /// [out] Mapped buffer format.
    pub mapped_buffer_fmt: NvEncBufferFormat,
    pub reserved1: [u32; 251],
    pub reserved2: [*mut c_void; 63],
}

// SAFETY: POD struct.
unsafe impl Send for NvEncMapInputResource {}

impl Default for NvEncMapInputResource {
    fn default() -> Self {
        // SAFETY: All-zeros is valid for this POD struct.
        let mut s: Self = unsafe { std::mem::zeroed() };
        s.version = nvenc_struct_version(1);
        s
    }
}

/// Preset config query. Matches `NV_ENC_PRESET_CONFIG`.
#[repr(C)]
pub struct NvEncPresetConfig {
    pub version: u32,
    /// [out] The preset's default configuration.
    pub preset_cfg: NvEncConfig,
    pub reserved1: [u32; 255],
    pub reserved2: [*mut c_void; 64],
}

// SAFETY: POD struct.
unsafe impl Send for NvEncPresetConfig {}

impl Default for NvEncPresetConfig {
    fn default() -> Self {
        // SAFETY: All-zeros is valid for this POD struct.
        let mut s: Self = unsafe { std::mem::zeroed() };
        s.version = nvenc_struct_version(1);
        s.preset_cfg.version = nvenc_struct_version(1);
        s
    }
}

// ---------------------------------------------------------------------------
// Function pointer table
// ---------------------------------------------------------------------------

/// NVENC API function pointers, loaded from the runtime library.
///
/// Signatures match `NV_ENCODE_API_FUNCTION_LIST` from `nvEncodeAPI.h`.
#[allow(non_snake_case)]
pub struct NvencFunctionList {
    pub nvEncOpenEncodeSessionEx: unsafe extern "C" fn(
        params: *mut NvEncOpenEncodeSessionExParams,
        encoder: *mut *mut c_void,
    ) -> NvencStatus,

    pub nvEncGetEncodePresetConfigEx: unsafe extern "C" fn(
        encoder: *mut c_void,
        encode_guid: NvGuid,
        preset_guid: NvGuid,
        tuning_info: u32,
        preset_config: *mut NvEncPresetConfig,
    ) -> NvencStatus,

    pub nvEncInitializeEncoder:
        unsafe extern "C" fn(encoder: *mut c_void, params: *mut NvEncInitializeParams) -> NvencStatus,

    pub nvEncCreateBitstreamBuffer: unsafe extern "C" fn(
        encoder: *mut c_void,
        params: *mut NvEncCreateBitstreamBuffer,
    ) -> NvencStatus,

    pub nvEncDestroyBitstreamBuffer:
        unsafe extern "C" fn(encoder: *mut c_void, bitstream_buffer: *mut c_void) -> NvencStatus,

    pub nvEncRegisterResource:
        unsafe extern "C" fn(encoder: *mut c_void, params: *mut NvEncRegisterResource) -> NvencStatus,

    pub nvEncUnregisterResource:
        unsafe extern "C" fn(encoder: *mut c_void, registered_resource: *mut c_void) -> NvencStatus,

    pub nvEncMapInputResource:
        unsafe extern "C" fn(encoder: *mut c_void, params: *mut NvEncMapInputResource) -> NvencStatus,

    pub nvEncUnmapInputResource:
        unsafe extern "C" fn(encoder: *mut c_void, mapped_resource: *mut c_void) -> NvencStatus,

    pub nvEncEncodePicture:
        unsafe extern "C" fn(encoder: *mut c_void, params: *mut NvEncPicParams) -> NvencStatus,

    pub nvEncLockBitstream:
        unsafe extern "C" fn(encoder: *mut c_void, params: *mut NvEncLockBitstream) -> NvencStatus,

    pub nvEncUnlockBitstream:
        unsafe extern "C" fn(encoder: *mut c_void, output_bitstream: *mut c_void) -> NvencStatus,

    pub nvEncDestroyEncoder: unsafe extern "C" fn(encoder: *mut c_void) -> NvencStatus,
}

// SAFETY: The function pointers reference GPU driver entry points that are
// valid for the process lifetime once the library is loaded.
unsafe impl Send for NvencFunctionList {}
unsafe impl Sync for NvencFunctionList {}

impl std::fmt::Debug for NvencFunctionList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NvencFunctionList")
            .field("loaded", &true)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Dynamic library wrapper
// ---------------------------------------------------------------------------

/// Dynamically loaded NVENC library with the API function table.
///
/// Loaded from `nvEncodeAPI64.dll` (Windows) or `libnvidia-encode.so.1`
/// (Linux).
pub struct NvencLibrary {
    /// Keeps the shared library mapped while any symbol is in use.
    _lib: Library,
    pub api: NvencFunctionList,
}

// SAFETY: The Library stays loaded for the lifetime of this struct and the
// driver entry points are thread-safe.
unsafe impl Send for NvencLibrary {}
unsafe impl Sync for NvencLibrary {}

impl std::fmt::Debug for NvencLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NvencLibrary")
            .field("loaded", &true)
            .finish()
    }
}

/// Type of the `NvEncodeAPICreateInstance` entry point.
///
/// The single symbol the NVENC library is guaranteed to export; it fills a
/// function-list struct with the API pointers. Because the C struct layout
/// is large and version-sensitive, we verify the entry point exists and
/// then load individual functions by name, which is equivalent to what the
/// SDK wrapper does internally.
type NvEncodeApiCreateInstanceFn = unsafe extern "C" fn(function_list: *mut c_void) -> NvencStatus;

impl NvencLibrary {
    /// Load the NVENC library from the default system path.
    pub fn load() -> Result<Self, EncodeError> {
        let lib_name = Self::library_name();
        info!(library = %lib_name, "Loading NVENC library");

        // SAFETY: Loading the well-known NVIDIA driver library.
        let lib = unsafe { Library::new(lib_name) }.map_err(|e| {
            EncodeError::DriverUnavailable(format!(
                "Failed to load {lib_name}: {e}. Is the NVIDIA driver installed?"
            ))
        })?;

        Self::load_functions(lib)
    }

    fn load_functions(lib: Library) -> Result<Self, EncodeError> {
        // SAFETY: Checking for the well-known NVENC entry point.
        let _entry: libloading::Symbol<'_, NvEncodeApiCreateInstanceFn> =
            unsafe { lib.get(b"NvEncodeAPICreateInstance\0") }.map_err(|e| {
                EncodeError::ApiCreateFailed(format!("NvEncodeAPICreateInstance: {e}"))
            })?;

        macro_rules! load {
            ($name:literal, $ty:ty) => {{
                // SAFETY: Symbol lookup for a well-known NVENC API function
                // whose signature matches the official C header. The raw
                // function pointer is copied out of the Symbol.
                let symbol = unsafe { lib.get::<$ty>(concat!($name, "\0").as_bytes()) }
                    .map_err(|e| EncodeError::ApiCreateFailed(format!("{}: {e}", $name)))?;
                *symbol
            }};
        }

        let api = NvencFunctionList {
            nvEncOpenEncodeSessionEx: load!(
                "NvEncOpenEncodeSessionEx",
                unsafe extern "C" fn(
                    *mut NvEncOpenEncodeSessionExParams,
                    *mut *mut c_void,
                ) -> NvencStatus
            ),
            nvEncGetEncodePresetConfigEx: load!(
                "NvEncGetEncodePresetConfigEx",
                unsafe extern "C" fn(
                    *mut c_void,
                    NvGuid,
                    NvGuid,
                    u32,
                    *mut NvEncPresetConfig,
                ) -> NvencStatus
            ),
            nvEncInitializeEncoder: load!(
                "NvEncInitializeEncoder",
                unsafe extern "C" fn(*mut c_void, *mut NvEncInitializeParams) -> NvencStatus
            ),
            nvEncCreateBitstreamBuffer: load!(
                "NvEncCreateBitstreamBuffer",
                unsafe extern "C" fn(*mut c_void, *mut NvEncCreateBitstreamBuffer) -> NvencStatus
            ),
            nvEncDestroyBitstreamBuffer: load!(
                "NvEncDestroyBitstreamBuffer",
                unsafe extern "C" fn(*mut c_void, *mut c_void) -> NvencStatus
            ),
            nvEncRegisterResource: load!(
                "NvEncRegisterResource",
                unsafe extern "C" fn(*mut c_void, *mut NvEncRegisterResource) -> NvencStatus
            ),
            nvEncUnregisterResource: load!(
                "NvEncUnregisterResource",
                unsafe extern "C" fn(*mut c_void, *mut c_void) -> NvencStatus
            ),
            nvEncMapInputResource: load!(
                "NvEncMapInputResource",
                unsafe extern "C" fn(*mut c_void, *mut NvEncMapInputResource) -> NvencStatus
            ),
            nvEncUnmapInputResource: load!(
                "NvEncUnmapInputResource",
                unsafe extern "C" fn(*mut c_void, *mut c_void) -> NvencStatus
            ),
            nvEncEncodePicture: load!(
                "NvEncEncodePicture",
                unsafe extern "C" fn(*mut c_void, *mut NvEncPicParams) -> NvencStatus
            ),
            nvEncLockBitstream: load!(
                "NvEncLockBitstream",
                unsafe extern "C" fn(*mut c_void, *mut NvEncLockBitstream) -> NvencStatus
            ),
            nvEncUnlockBitstream: load!(
                "NvEncUnlockBitstream",
                unsafe extern "C" fn(*mut c_void, *mut c_void) -> NvencStatus
            ),
            nvEncDestroyEncoder: load!(
                "NvEncDestroyEncoder",
                unsafe extern "C" fn(*mut c_void) -> NvencStatus
            ),
        };

        debug!("All NVENC symbols loaded");
        Ok(Self { _lib: lib, api })
    }

    /// The platform-specific library filename.
    fn library_name() -> &'static str {
        if cfg!(target_os = "windows") {
            "nvEncodeAPI64.dll"
        } else {
            "libnvidia-encode.so.1"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn struct_versions_are_nonzero() {
        assert_ne!(NvEncOpenEncodeSessionExParams::default().version, 0);
        let init = NvEncInitializeParams::default();
        assert_ne!(init.version, 0);
        assert_eq!(init.enable_ptd, 1);
        assert_ne!(NvEncConfig::default().version, 0);
        assert_ne!(NvEncPicParams::default().version, 0);
        assert_ne!(NvEncLockBitstream::default().version, 0);
        assert_ne!(NvEncCreateBitstreamBuffer::default().version, 0);
    }

    #[test]
    fn struct_version_packing() {
        let ver = nvenc_struct_version(1);
        assert_eq!(ver & 0xFFFF, 1);
        assert_ne!(ver >> 16, 0);
    }

    #[test]
    fn codec_guids_differ() {
        assert_ne!(NV_ENC_CODEC_H264_GUID, NV_ENC_CODEC_HEVC_GUID);
    }

    #[test]
    fn preset_guids_are_unique() {
        let presets = [
            NV_ENC_PRESET_P1_GUID,
            NV_ENC_PRESET_P3_GUID,
            NV_ENC_PRESET_P7_GUID,
        ];
        for i in 0..presets.len() {
            for j in (i + 1)..presets.len() {
                assert_ne!(presets[i], presets[j]);
            }
        }
    }

    #[test]
    fn check_status_success_and_failure() {
        assert!(check_nvenc_status(NV_ENC_SUCCESS, "test").is_ok());
        let err = check_nvenc_status(NV_ENC_ERR_INVALID_PARAM, "nvEncTest").unwrap_err();
        assert!(err.contains("nvEncTest"));
        assert!(err.contains("INVALID_PARAM"));
    }

    #[test]
    fn status_names() {
        assert_eq!(nvenc_status_name(0), "NV_ENC_SUCCESS");
        assert_eq!(nvenc_status_name(13), "NV_ENC_ERR_LOCK_BUSY");
        assert_eq!(nvenc_status_name(17), "NV_ENC_ERR_NEED_MORE_INPUT");
        assert_eq!(nvenc_status_name(999), "NV_ENC_ERR_UNKNOWN");
    }

    #[test]
    fn eos_flag_value() {
        assert_eq!(NV_ENC_PIC_FLAG_EOS, 0x8);
    }

    #[test]
    fn buffer_format_values() {
        assert_eq!(NvEncBufferFormat::Nv12 as u32, 0x0000_0001);
        assert_eq!(NvEncBufferFormat::Argb as u32, 0x0100_0000);
        assert_eq!(NvEncBufferFormat::Abgr as u32, 0x1000_0000);
    }

    #[test]
    fn default_structs_are_zeroed_except_version() {
        let params = NvEncInitializeParams::default();
        assert_eq!(params.encode_width, 0);
        assert_eq!(params.frame_rate_num, 0);
        let lock = NvEncLockBitstream::default();
        assert_eq!(lock.do_not_wait, 0);
        assert!(lock.output_bitstream.is_null());
    }
}
