//! Decoding sheet images into 8-bit grayscale.
//!
//! Any input size is accepted; very large scans only cost time. Callers that
//! want a bound can use [`downscale_to_max_side`] before grading.

use std::path::Path;

use image::imageops::FilterType;
use image::GrayImage;

/// Smallest accepted width or height in pixels.
pub const MIN_SIDE_PX: u32 = 10;

#[derive(Debug)]
pub enum DecodeError {
    Io(std::io::Error),
    Unreadable(image::ImageError),
    TooSmall { width: u32, height: u32 },
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "failed to read image: {}", e),
            Self::Unreadable(e) => write!(f, "not a decodable image: {}", e),
            Self::TooSmall { width, height } => write!(
                f,
                "image is {}x{}, both sides must be at least {} px",
                width, height, MIN_SIDE_PX
            ),
        }
    }
}

impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Unreadable(e) => Some(e),
            Self::TooSmall { .. } => None,
        }
    }
}

/// Decode encoded bytes (format sniffed from content) into luma.
pub fn load_bytes(bytes: &[u8]) -> Result<GrayImage, DecodeError> {
    let img = image::load_from_memory(bytes).map_err(DecodeError::Unreadable)?;
    check_dimensions(img.to_luma8())
}

/// Read and decode an image file into luma.
pub fn load_path(path: &Path) -> Result<GrayImage, DecodeError> {
    let bytes = std::fs::read(path).map_err(DecodeError::Io)?;
    load_bytes(&bytes)
}

/// Reject images with a side under [`MIN_SIDE_PX`].
pub fn check_dimensions(img: GrayImage) -> Result<GrayImage, DecodeError> {
    let (width, height) = img.dimensions();
    if width < MIN_SIDE_PX || height < MIN_SIDE_PX {
        return Err(DecodeError::TooSmall { width, height });
    }
    Ok(img)
}

/// Shrink so the longer side is at most `max_side`, keeping aspect ratio.
/// Images already within bounds are returned unchanged.
pub fn downscale_to_max_side(img: &GrayImage, max_side: u32) -> GrayImage {
    let (w, h) = img.dimensions();
    let longest = w.max(h);
    if max_side == 0 || longest <= max_side {
        return img.clone();
    }
    let scale = max_side as f64 / longest as f64;
    let nw = ((w as f64 * scale).round() as u32).max(1);
    let nh = ((h as f64 * scale).round() as u32).max(1);
    tracing::debug!("downscaling {}x{} -> {}x{}", w, h, nw, nh);
    image::imageops::resize(img, nw, nh, FilterType::Triangle)
}
