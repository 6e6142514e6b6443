//! Video codec identifiers.

use serde::{Deserialize, Serialize};

/// Video codec identifier.
///
/// Only the codecs NVENC can encode into an MP4 are listed.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VideoCodec {
    H264,
    Hevc,
}

impl VideoCodec {
    /// Human-readable name (for display/logging).
    pub fn display_name(self) -> &'static str {
        match self {
            Self::H264 => "H.264/AVC",
            Self::Hevc => "H.265/HEVC",
        }
    }

    /// The ISO-BMFF sample entry fourcc for this codec.
    pub fn sample_entry(self) -> &'static [u8; 4] {
        match self {
            Self::H264 => b"avc1",
            Self::Hevc => b"hvc1",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_display() {
        assert_eq!(VideoCodec::H264.display_name(), "H.264/AVC");
        assert_eq!(VideoCodec::Hevc.display_name(), "H.265/HEVC");
    }

    #[test]
    fn sample_entries() {
        assert_eq!(VideoCodec::H264.sample_entry(), b"avc1");
        assert_eq!(VideoCodec::Hevc.sample_entry(), b"hvc1");
    }
}
