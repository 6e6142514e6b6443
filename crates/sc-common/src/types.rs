//! Core value types with newtype pattern for type safety.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Video/surface resolution.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const HD: Self = Self {
        width: 1920,
        height: 1080,
    };
    pub const UHD: Self = Self {
        width: 3840,
        height: 2160,
    };

    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixel_count(self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Byte size for BGRA8/RGBA8 pixel data.
    pub fn rgba_byte_size(self) -> usize {
        self.width as usize * self.height as usize * 4
    }

    /// Byte size for NV12 pixel data (Y plane + interleaved UV at half res).
    pub fn nv12_byte_size(self) -> usize {
        let y_size = self.width as usize * self.height as usize;
        let uv_size = self.width as usize * (self.height as usize / 2);
        y_size + uv_size
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Pixel format of an input surface.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Interleaved BGRA, 8 bits per component (the common swapchain format).
    #[default]
    Bgra8,
    /// Interleaved RGBA, 8 bits per component.
    Rgba8,
    /// Semi-planar YUV 4:2:0, 8-bit (encoder-native).
    Nv12,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolution_byte_sizes() {
        let hd = Resolution::HD;
        assert_eq!(hd.rgba_byte_size(), 1920 * 1080 * 4);
        assert_eq!(hd.nv12_byte_size(), 1920 * 1080 + 1920 * 540);
    }

    #[test]
    fn resolution_display() {
        assert_eq!(Resolution::new(1280, 720).to_string(), "1280x720");
    }

    #[test]
    fn pixel_format_default_is_bgra() {
        assert_eq!(PixelFormat::default(), PixelFormat::Bgra8);
    }
}
