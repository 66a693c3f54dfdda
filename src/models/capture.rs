// Data structures for camera frames handed to the pose worker

use serde::{Deserialize, Serialize};

/// A raster frame supplied by the camera collaborator
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub timestamp: i64,
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
    pub format: PixelFormat,
}

impl RawFrame {
    /// Expected byte length of `data` for the frame's dimensions and format
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * self.format.bytes_per_pixel()
    }
}

/// Pixel format of captured frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    RGBA8,
    BGRA8,
    RGB8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::RGBA8 | PixelFormat::BGRA8 => 4,
            PixelFormat::RGB8 => 3,
        }
    }
}

/// Image container used on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageEncoding {
    Png,
    Jpeg,
}

/// A frame ready to embed in a detect command
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedFrame {
    pub base64: String,
    pub encoding: ImageEncoding,
    pub timestamp: i64, // capture time in ms, latency diagnostics only
}
