//! Decoder configuration records (ISO/IEC 14496-15) and MPEG-4 Systems
//! descriptors.
//!
//! These byte blobs are format-critical: a player that rejects the `avcC`,
//! `hvcC` or `esds` rejects the whole file, so the layouts here are covered
//! by byte-level tests.

/// Build an `AVCDecoderConfigurationRecord` from the sniffed SPS and PPS.
///
/// Returns `None` when the SPS is too short to carry the profile bytes or
/// the PPS is absent; the caller keeps sniffing subsequent samples.
pub fn build_avcc(sps: &[u8], pps: &[u8]) -> Option<Vec<u8>> {
    if sps.len() < 4 || pps.is_empty() {
        return None;
    }

    let mut avcc = Vec::with_capacity(11 + sps.len() + pps.len());
    avcc.push(1); // configurationVersion
    avcc.push(sps[1]); // AVCProfileIndication
    avcc.push(sps[2]); // profile_compatibility
    avcc.push(sps[3]); // AVCLevelIndication
    avcc.push(0xFF); // reserved | lengthSizeMinusOne = 3
    avcc.push(0xE1); // reserved | numOfSequenceParameterSets = 1
    avcc.extend_from_slice(&(sps.len() as u16).to_be_bytes());
    avcc.extend_from_slice(sps);
    avcc.push(1); // numOfPictureParameterSets
    avcc.extend_from_slice(&(pps.len() as u16).to_be_bytes());
    avcc.extend_from_slice(pps);
    Some(avcc)
}

/// Build a minimal `HEVCDecoderConfigurationRecord`.
///
/// Profile/tier/level bytes are fixed to Main profile at level 4.0; the
/// record carries one array per non-empty parameter-set kind. Returns
/// `None` without an SPS, since a record that cannot initialize a decoder
/// must not open the file.
pub fn build_hvcc(vps: &[u8], sps: &[u8], pps: &[u8]) -> Option<Vec<u8>> {
    if sps.is_empty() {
        return None;
    }

    let mut hvcc = Vec::with_capacity(64 + vps.len() + sps.len() + pps.len());
    hvcc.push(1); // configurationVersion
    hvcc.push(1); // profile_space(2) | tier(1) | profile_idc(5) = Main
    hvcc.extend_from_slice(&[0, 0, 0, 0]); // general_profile_compatibility_flags
    hvcc.extend_from_slice(&[0; 6]); // general_constraint_indicator_flags
    hvcc.push(120); // general_level_idc (level 4.0)
    hvcc.push(0xF0); // reserved | min_spatial_segmentation_idc
    hvcc.push(0);
    hvcc.push(0xFC); // reserved | parallelismType
    hvcc.push(0xFC); // reserved | chromaFormat
    hvcc.push(0xF8); // reserved | bitDepthLumaMinus8
    hvcc.push(0xF8); // reserved | bitDepthChromaMinus8
    hvcc.extend_from_slice(&[0, 0]); // avgFrameRate
    hvcc.push(0x03); // constantFrameRate(2) | numTemporalLayers(3) | temporalIdNested(1) | lengthSizeMinusOne(2)

    let mut num_arrays = 0u8;
    for set in [vps, sps, pps] {
        if !set.is_empty() {
            num_arrays += 1;
        }
    }
    hvcc.push(num_arrays);

    let mut append_array = |nal_type: u8, data: &[u8]| {
        hvcc.push(0x80 | nal_type); // array_completeness = 1 | NAL_unit_type
        hvcc.extend_from_slice(&1u16.to_be_bytes()); // numNalus
        hvcc.extend_from_slice(&(data.len() as u16).to_be_bytes());
        hvcc.extend_from_slice(data);
    };

    if !vps.is_empty() {
        append_array(32, vps);
    }
    append_array(33, sps);
    if !pps.is_empty() {
        append_array(34, pps);
    }

    Some(hvcc)
}

/// ISO/IEC 14496-3 sampling frequency index table.
const SAMPLE_RATES: [(u32, u8); 13] = [
    (96_000, 0),
    (88_200, 1),
    (64_000, 2),
    (48_000, 3),
    (44_100, 4),
    (32_000, 5),
    (24_000, 6),
    (22_050, 7),
    (16_000, 8),
    (12_000, 9),
    (11_025, 10),
    (8_000, 11),
    (7_350, 12),
];

fn sample_rate_index(sample_rate: u32) -> u8 {
    SAMPLE_RATES
        .iter()
        .find(|(rate, _)| *rate == sample_rate)
        .map(|(_, index)| *index)
        .unwrap_or(3)
}

/// Build the 2-byte AudioSpecificConfig for AAC-LC.
pub fn build_audio_specific_config(sample_rate: u32, channels: u16) -> Vec<u8> {
    let audio_object_type: u8 = 2; // AAC LC
    let rate_index = sample_rate_index(sample_rate);
    let channel_config = channels.clamp(1, 7) as u8;

    vec![
        (audio_object_type << 3) | ((rate_index & 0x0E) >> 1),
        ((rate_index & 0x01) << 7) | (channel_config << 3),
    ]
}

/// Write an MPEG-4 Systems descriptor size in the extended form:
/// 7-bit groups, high bit set on every byte but the last.
fn put_descriptor_size(out: &mut Vec<u8>, mut size: usize) {
    let mut groups = [0u8; 4];
    let mut count = 0;
    loop {
        groups[count] = (size & 0x7F) as u8;
        count += 1;
        size >>= 7;
        if size == 0 || count == 4 {
            break;
        }
    }
    for i in (0..count).rev() {
        let mut value = groups[i];
        if i != 0 {
            value |= 0x80;
        }
        out.push(value);
    }
}

fn put_descriptor(out: &mut Vec<u8>, tag: u8, payload: &[u8]) {
    out.push(tag);
    put_descriptor_size(out, payload.len());
    out.extend_from_slice(payload);
}

/// Build the `esds` box payload (version/flags plus the ES descriptor tree)
/// carrying the given AudioSpecificConfig.
pub fn build_esds(audio_specific_config: &[u8], bitrate: u32) -> Vec<u8> {
    // DecoderConfigDescriptor (0x04)
    let mut dec_config = Vec::new();
    dec_config.push(0x40); // objectTypeIndication: ISO/IEC 14496-3 audio
    dec_config.push(0x15); // streamType = audio, upStream = 0, reserved = 1
    dec_config.extend_from_slice(&[0, 0, 0]); // bufferSizeDB (24-bit)
    dec_config.extend_from_slice(&bitrate.to_be_bytes()); // maxBitrate
    dec_config.extend_from_slice(&bitrate.to_be_bytes()); // avgBitrate
    put_descriptor(&mut dec_config, 0x05, audio_specific_config); // DecoderSpecificInfo

    // ES_Descriptor (0x03)
    let mut es_desc = Vec::new();
    es_desc.extend_from_slice(&1u16.to_be_bytes()); // ES_ID
    es_desc.push(0); // flags / stream priority
    put_descriptor(&mut es_desc, 0x04, &dec_config);
    put_descriptor(&mut es_desc, 0x06, &[0x02]); // SLConfigDescriptor: MP4

    let mut esds = Vec::new();
    esds.extend_from_slice(&[0, 0, 0, 0]); // version + flags
    put_descriptor(&mut esds, 0x03, &es_desc);
    esds
}
