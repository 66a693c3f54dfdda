// Frame encoding - raster frames to base64 image payloads for detect commands

use crate::models::capture::{EncodedFrame, ImageEncoding, PixelFormat, RawFrame};
use crate::models::pose::{PoseError, PoseResult};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{DynamicImage, ImageBuffer, Rgb};

pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// Encodes camera frames for the worker
#[derive(Debug, Clone, Copy)]
pub struct FrameEncoder {
    encoding: ImageEncoding,
    jpeg_quality: u8,
}

impl FrameEncoder {
    pub fn new(encoding: ImageEncoding, jpeg_quality: u8) -> Self {
        Self {
            encoding,
            jpeg_quality: jpeg_quality.clamp(1, 100),
        }
    }

    pub fn encode(&self, frame: &RawFrame) -> PoseResult<EncodedFrame> {
        let image = to_rgb_image(frame)?;
        let mut bytes = Vec::new();

        let written = match self.encoding {
            ImageEncoding::Png => image.write_with_encoder(PngEncoder::new(&mut bytes)),
            ImageEncoding::Jpeg => {
                image.write_with_encoder(JpegEncoder::new_with_quality(&mut bytes, self.jpeg_quality))
            }
        };
        written.map_err(|e| PoseError::EncodeFailed(e.to_string()))?;

        Ok(EncodedFrame {
            base64: STANDARD.encode(&bytes),
            encoding: self.encoding,
            timestamp: frame.timestamp,
        })
    }
}

/// Drops alpha and normalizes channel order to RGB
fn to_rgb_image(frame: &RawFrame) -> PoseResult<DynamicImage> {
    if frame.width == 0 || frame.height == 0 {
        return Err(PoseError::EncodeFailed(format!(
            "empty frame {}x{}",
            frame.width, frame.height
        )));
    }
    if frame.data.len() != frame.expected_len() {
        return Err(PoseError::EncodeFailed(format!(
            "frame data is {} bytes, expected {} for {}x{} {:?}",
            frame.data.len(),
            frame.expected_len(),
            frame.width,
            frame.height,
            frame.format
        )));
    }

    let rgb_data = match frame.format {
        PixelFormat::BGRA8 => {
            let mut rgb = Vec::with_capacity(frame.width as usize * frame.height as usize * 3);
            for chunk in frame.data.chunks_exact(4) {
                rgb.push(chunk[2]); // R
                rgb.push(chunk[1]); // G
                rgb.push(chunk[0]); // B
            }
            rgb
        }
        PixelFormat::RGBA8 => {
            let mut rgb = Vec::with_capacity(frame.width as usize * frame.height as usize * 3);
            for chunk in frame.data.chunks_exact(4) {
                rgb.extend_from_slice(&chunk[..3]);
            }
            rgb
        }
        PixelFormat::RGB8 => frame.data.clone(),
    };

    let buffer: ImageBuffer<Rgb<u8>, Vec<u8>> = ImageBuffer::from_raw(frame.width, frame.height, rgb_data)
        .ok_or_else(|| PoseError::EncodeFailed("Failed to create image buffer".to_string()))?;

    Ok(DynamicImage::ImageRgb8(buffer))
}
