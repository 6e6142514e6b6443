//! NVENC parameter mapping.
//!
//! Maps the session configuration to NVENC GUIDs, rate-control parameters,
//! and the overrides applied on top of the queried preset defaults.

use sc_common::{PixelFormat, Quality, RateControl, SessionConfig, VideoCodec};

use super::ffi::{
    NvEncBufferFormat, NvEncConfig, NvEncInitializeParams, NvEncRcMode, NvGuid,
    NV_ENC_CODEC_H264_GUID, NV_ENC_CODEC_HEVC_GUID, NV_ENC_PRESET_P1_GUID, NV_ENC_PRESET_P3_GUID,
    NV_ENC_PRESET_P7_GUID, NV_ENC_TUNING_INFO_HIGH_QUALITY,
};

/// Map a `VideoCodec` to the NVENC codec GUID.
pub fn codec_to_guid(codec: VideoCodec) -> NvGuid {
    match codec {
        VideoCodec::H264 => NV_ENC_CODEC_H264_GUID,
        VideoCodec::Hevc => NV_ENC_CODEC_HEVC_GUID,
    }
}

/// Map the quality preset to an NVENC P-preset GUID.
pub fn quality_to_preset(quality: Quality) -> NvGuid {
    match quality {
        Quality::Low => NV_ENC_PRESET_P1_GUID,
        Quality::Medium => NV_ENC_PRESET_P3_GUID,
        Quality::High => NV_ENC_PRESET_P7_GUID,
    }
}

/// All presets run with high-quality tuning; latency is managed through
/// the GOP and the pipelining depth instead.
pub fn tuning_info() -> u32 {
    NV_ENC_TUNING_INFO_HIGH_QUALITY
}

/// Map an input pixel format to the NVENC buffer format.
pub fn pixel_format_to_nvenc(format: PixelFormat) -> NvEncBufferFormat {
    match format {
        PixelFormat::Bgra8 => NvEncBufferFormat::Argb,
        PixelFormat::Rgba8 => NvEncBufferFormat::Abgr,
        PixelFormat::Nv12 => NvEncBufferFormat::Nv12,
    }
}

/// Apply the session's rate-control and GOP overrides on top of the
/// queried preset configuration.
pub fn apply_session_overrides(enc_config: &mut NvEncConfig, config: &SessionConfig) {
    let rc = &mut enc_config.rc_params;
    match config.rate_control {
        RateControl::Cbr => {
            rc.rate_control_mode = NvEncRcMode::Cbr;
            rc.average_bitrate = config.bitrate;
            rc.max_bitrate = config.bitrate;
        }
        RateControl::Vbr => {
            rc.rate_control_mode = NvEncRcMode::Vbr;
            rc.average_bitrate = config.bitrate;
            rc.max_bitrate = if config.max_bitrate > 0 {
                config.max_bitrate
            } else {
                config.bitrate
            };
        }
    }

    enc_config.gop_length = config.gop_length();
    enc_config.frame_interval_p = 1;
    enc_config.codec_config.repeat_sps_pps = 1;
    enc_config.codec_config.idr_period = enc_config.gop_length;
}

/// Build the initialization parameter block (without the config pointer,
/// which the caller wires to a stable address).
pub fn build_init_params(config: &SessionConfig) -> NvEncInitializeParams {
    NvEncInitializeParams {
        encode_guid: codec_to_guid(config.codec),
        preset_guid: quality_to_preset(config.quality),
        encode_width: config.resolution.width,
        encode_height: config.resolution.height,
        dar_width: config.resolution.width,
        dar_height: config.resolution.height,
        max_encode_width: config.resolution.width,
        max_encode_height: config.resolution.height,
        frame_rate_num: config.fps,
        frame_rate_den: 1,
        tuning_info: tuning_info(),
        ..NvEncInitializeParams::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sc_common::Resolution;
    use std::path::PathBuf;

    fn make_config() -> SessionConfig {
        SessionConfig {
            resolution: Resolution::HD,
            fps: 30,
            codec: VideoCodec::H264,
            rate_control: RateControl::Vbr,
            bitrate: 20_000_000,
            max_bitrate: 30_000_000,
            quality: Quality::Medium,
            input_format: PixelFormat::Bgra8,
            fast_preset: false,
            hevc_async: false,
            output_path: PathBuf::from("out.mp4"),
        }
    }

    #[test]
    fn codec_mapping() {
        assert_eq!(codec_to_guid(VideoCodec::H264), NV_ENC_CODEC_H264_GUID);
        assert_eq!(codec_to_guid(VideoCodec::Hevc), NV_ENC_CODEC_HEVC_GUID);
    }

    #[test]
    fn quality_mapping() {
        assert_eq!(quality_to_preset(Quality::Low), NV_ENC_PRESET_P1_GUID);
        assert_eq!(quality_to_preset(Quality::Medium), NV_ENC_PRESET_P3_GUID);
        assert_eq!(quality_to_preset(Quality::High), NV_ENC_PRESET_P7_GUID);
    }

    #[test]
    fn pixel_format_mapping() {
        assert_eq!(
            pixel_format_to_nvenc(PixelFormat::Bgra8),
            NvEncBufferFormat::Argb
        );
        assert_eq!(
            pixel_format_to_nvenc(PixelFormat::Rgba8),
            NvEncBufferFormat::Abgr
        );
        assert_eq!(
            pixel_format_to_nvenc(PixelFormat::Nv12),
            NvEncBufferFormat::Nv12
        );
    }

    #[test]
    fn vbr_overrides() {
        let config = make_config();
        let mut enc = NvEncConfig::default();
        apply_session_overrides(&mut enc, &config);
        assert_eq!(enc.rc_params.rate_control_mode, NvEncRcMode::Vbr);
        assert_eq!(enc.rc_params.average_bitrate, 20_000_000);
        assert_eq!(enc.rc_params.max_bitrate, 30_000_000);
        assert_eq!(enc.gop_length, 60);
        assert_eq!(enc.frame_interval_p, 1);
        assert_eq!(enc.codec_config.repeat_sps_pps, 1);
        assert_eq!(enc.codec_config.idr_period, 60);
    }

    #[test]
    fn cbr_max_equals_average() {
        let mut config = make_config();
        config.rate_control = RateControl::Cbr;
        config.max_bitrate = 0;
        let mut enc = NvEncConfig::default();
        apply_session_overrides(&mut enc, &config);
        assert_eq!(enc.rc_params.rate_control_mode, NvEncRcMode::Cbr);
        assert_eq!(enc.rc_params.max_bitrate, 20_000_000);
    }

    #[test]
    fn vbr_zero_max_falls_back_to_target() {
        let mut config = make_config();
        config.max_bitrate = 0;
        let mut enc = NvEncConfig::default();
        apply_session_overrides(&mut enc, &config);
        assert_eq!(enc.rc_params.max_bitrate, 20_000_000);
    }

    #[test]
    fn fast_preset_doubles_gop() {
        let mut config = make_config();
        config.fast_preset = true;
        let mut enc = NvEncConfig::default();
        apply_session_overrides(&mut enc, &config);
        assert_eq!(enc.gop_length, 120);
        assert_eq!(enc.codec_config.idr_period, 120);
    }

    #[test]
    fn init_params_from_config() {
        let config = make_config();
        let init = build_init_params(&config);
        assert_eq!(init.encode_guid, NV_ENC_CODEC_H264_GUID);
        assert_eq!(init.preset_guid, NV_ENC_PRESET_P3_GUID);
        assert_eq!(init.encode_width, 1920);
        assert_eq!(init.encode_height, 1080);
        assert_eq!(init.frame_rate_num, 30);
        assert_eq!(init.frame_rate_den, 1);
        assert_eq!(init.enable_ptd, 1);
    }
}
