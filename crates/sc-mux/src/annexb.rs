//! Annex-B NAL unit scanning and the length-prefix transform.
//!
//! NVENC emits Annex-B bitstreams: NAL units separated by `00 00 01` or
//! `00 00 00 01` start codes. MP4 stores the same units length-prefixed
//! (4-byte big-endian length per unit) with parameter sets hoisted into the
//! sample entry, so every encoded picture passes through here on its way to
//! the file.

use sc_common::VideoCodec;

/// One NAL unit borrowed from an Annex-B buffer.
#[derive(Copy, Clone, Debug)]
pub struct NalUnit<'a> {
    /// Payload bytes, start code stripped.
    pub data: &'a [u8],
    /// H.264: low 5 bits of the first byte. HEVC: bits 1..6.
    pub nal_type: u8,
}

/// Whether `nal_type` is a parameter set for `codec`.
pub fn is_parameter_set(codec: VideoCodec, nal_type: u8) -> bool {
    match codec {
        VideoCodec::H264 => matches!(nal_type, 7 | 8),
        VideoCodec::Hevc => matches!(nal_type, 32 | 33 | 34),
    }
}

/// Whether `nal_type` is a keyframe slice for `codec`.
pub fn is_keyframe(codec: VideoCodec, nal_type: u8) -> bool {
    match codec {
        // IDR
        VideoCodec::H264 => nal_type == 5,
        // IDR_W_RADL, IDR_N_LP
        VideoCodec::Hevc => matches!(nal_type, 19 | 20),
    }
}

/// Find the next start code at or after `from`.
///
/// Returns `(offset, start_code_len)`. The three-byte form is accepted even
/// in buffers that also contain four-byte forms; a `00 00 00 01` is
/// detected before the inner `00 00 01` would match.
fn find_start_code(data: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut i = from;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 {
            if data[i + 2] == 1 {
                return Some((i, 3));
            }
            if i + 4 <= data.len() && data[i + 2] == 0 && data[i + 3] == 1 {
                return Some((i, 4));
            }
        }
        i += 1;
    }
    None
}

/// Split an Annex-B buffer into its NAL units.
///
/// Bytes before the first start code are ignored; empty units (two adjacent
/// start codes) are skipped.
pub fn parse_annex_b(data: &[u8], codec: VideoCodec) -> Vec<NalUnit<'_>> {
    let mut units = Vec::new();
    let mut cursor = 0;

    while let Some((start, sc_len)) = find_start_code(data, cursor) {
        let payload_start = start + sc_len;
        let payload_end = match find_start_code(data, payload_start) {
            Some((next, _)) => next,
            None => data.len(),
        };
        if payload_end > payload_start {
            let payload = &data[payload_start..payload_end];
            let nal_type = match codec {
                VideoCodec::H264 => payload[0] & 0x1F,
                VideoCodec::Hevc => (payload[0] >> 1) & 0x3F,
            };
            units.push(NalUnit {
                data: payload,
                nal_type,
            });
        }
        cursor = payload_end;
    }

    units
}

/// Concatenate NAL units as 4-byte big-endian length + payload.
///
/// Parameter-set units are dropped unless `keep_parameter_sets` is set;
/// they travel in the `avcC`/`hvcC` record instead of the sample data.
pub fn to_length_prefixed(
    units: &[NalUnit<'_>],
    codec: VideoCodec,
    keep_parameter_sets: bool,
) -> Vec<u8> {
    let total: usize = units.iter().map(|u| u.data.len() + 4).sum();
    let mut out = Vec::with_capacity(total);
    for unit in units {
        if !keep_parameter_sets && is_parameter_set(codec, unit.nal_type) {
            continue;
        }
        out.extend_from_slice(&(unit.data.len() as u32).to_be_bytes());
        out.extend_from_slice(unit.data);
    }
    out
}
