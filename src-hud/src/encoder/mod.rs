//! Screenshot encoding.
//!
//! The capture path hands an [`ImageProcessParams`] to an [`ImageEncoder`];
//! the default [`JpegFileEncoder`] crops, scales and writes a JPEG file.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;

use image::{ImageBuffer, Rgba};
use tracing::debug;

use crate::capture::{CaptureError, BYTES_PER_PIXEL};

/// Pixels trimmed from each edge before scaling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CropMargins {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

/// Description of one image to encode and save.
#[derive(Debug, Clone, Copy)]
pub struct ImageProcessParams<'a> {
    /// RGBA pixel data, top row first
    pub pixels: &'a [u8],
    /// Source width in pixels
    pub width: u32,
    /// Source height in pixels
    pub height: u32,
    pub crop: CropMargins,
    /// Output width after scaling
    pub target_width: u32,
    /// Output height after scaling
    pub target_height: u32,
    /// JPEG quality (1-100)
    pub quality: u8,
    pub path: &'a Path,
}

impl ImageProcessParams<'_> {
    /// Size left after cropping, or an error if the margins eat the image.
    pub fn cropped_size(&self) -> Result<(u32, u32), CaptureError> {
        let horizontal = self.crop.left as u64 + self.crop.right as u64;
        let vertical = self.crop.top as u64 + self.crop.bottom as u64;
        if horizontal >= self.width as u64 || vertical >= self.height as u64 {
            return Err(CaptureError::InvalidParameters(format!(
                "Crop {:?} leaves nothing of a {}x{} image",
                self.crop, self.width, self.height
            )));
        }
        Ok((
            self.width - horizontal as u32,
            self.height - vertical as u32,
        ))
    }
}

/// Trait for the image pipeline that writes screenshots to disk.
pub trait ImageEncoder: Send + Sync {
    fn encode_and_save(&self, params: &ImageProcessParams<'_>) -> Result<(), CaptureError>;
}

/// Encodes screenshots as JPEG files using the `image` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct JpegFileEncoder;

impl JpegFileEncoder {
    pub fn new() -> Self {
        Self
    }
}

impl ImageEncoder for JpegFileEncoder {
    fn encode_and_save(&self, params: &ImageProcessParams<'_>) -> Result<(), CaptureError> {
        let needed = params.width as usize * params.height as usize * BYTES_PER_PIXEL;
        if params.pixels.len() < needed {
            return Err(CaptureError::EncodeFailed(format!(
                "Buffer too small: expected {} bytes, got {}",
                needed,
                params.pixels.len()
            )));
        }
        if params.target_width == 0 || params.target_height == 0 {
            return Err(CaptureError::InvalidParameters(format!(
                "Target size {}x{} is empty",
                params.target_width, params.target_height
            )));
        }

        let (crop_width, crop_height) = params.cropped_size()?;
        let cropped = crop_rgba(
            params.pixels,
            params.width,
            params.crop.left,
            params.crop.top,
            crop_width,
            crop_height,
        );

        let img: ImageBuffer<Rgba<u8>, Vec<u8>> =
            ImageBuffer::from_raw(crop_width, crop_height, cropped).ok_or_else(|| {
                CaptureError::EncodeFailed("Failed to create image buffer".to_string())
            })?;

        let scaled = if (crop_width, crop_height) == (params.target_width, params.target_height) {
            img
        } else {
            image::imageops::resize(
                &img,
                params.target_width,
                params.target_height,
                image::imageops::FilterType::Triangle,
            )
        };

        // JPEG has no alpha channel
        let rgb_img = image::DynamicImage::ImageRgba8(scaled).to_rgb8();

        if let Some(parent) = params.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = File::create(params.path)?;
        let mut writer = BufWriter::new(file);

        let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(
            &mut writer,
            params.quality.clamp(1, 100),
        );
        encoder
            .encode_image(&rgb_img)
            .map_err(|e| CaptureError::EncodeFailed(format!("Failed to encode JPEG: {}", e)))?;

        debug!(
            "Encoded {}x{} JPEG (quality {}) to {}",
            params.target_width,
            params.target_height,
            params.quality,
            params.path.display()
        );
        Ok(())
    }
}

/// Copy a `width` x `height` window starting at (`x`, `y`) out of an RGBA frame.
fn crop_rgba(data: &[u8], frame_width: u32, x: u32, y: u32, width: u32, height: u32) -> Vec<u8> {
    let row_bytes = width as usize * BYTES_PER_PIXEL;
    let mut cropped = vec![0u8; row_bytes * height as usize];

    for row in 0..height as usize {
        let src_offset = ((y as usize + row) * frame_width as usize + x as usize) * BYTES_PER_PIXEL;
        let dst_offset = row * row_bytes;
        cropped[dst_offset..dst_offset + row_bytes]
            .copy_from_slice(&data[src_offset..src_offset + row_bytes]);
    }

    cropped
}
