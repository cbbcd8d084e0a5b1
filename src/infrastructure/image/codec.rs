//! Stateless resize, orientation, and JPEG encode/decode helpers.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::metadata::Orientation;
use image::{DynamicImage, ImageDecoder, ImageReader};

use crate::domain::entities::Bitmap;
use crate::domain::errors::CodecError;

/// Filter used for every downscale.
const RESIZE_FILTER: FilterType = FilterType::Lanczos3;

/// Scales `bitmap` so its longer edge is at most `max_dimension`.
///
/// Uses one uniform factor `min(max / width, max / height)` clamped to 1,
/// so images that already fit are returned unchanged and nothing is ever
/// upscaled.
#[must_use]
pub fn resize(bitmap: &Bitmap, max_dimension: u32) -> Bitmap {
    let (width, height) = bitmap.dimensions();
    if bitmap.is_empty() || (width <= max_dimension && height <= max_dimension) {
        return bitmap.clone();
    }

    let scale = (f64::from(max_dimension) / f64::from(width))
        .min(f64::from(max_dimension) / f64::from(height))
        .min(1.0);
    scale_by(bitmap, scale)
}

/// Scales `bitmap` down to `max_width` if it is wider, preserving aspect ratio.
#[must_use]
pub fn fit_width(bitmap: &Bitmap, max_width: u32) -> Bitmap {
    if bitmap.is_empty() || bitmap.width() <= max_width {
        return bitmap.clone();
    }
    scale_by(bitmap, f64::from(max_width) / f64::from(bitmap.width()))
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn scale_by(bitmap: &Bitmap, scale: f64) -> Bitmap {
    let new_width = ((f64::from(bitmap.width()) * scale).round() as u32).max(1);
    let new_height = ((f64::from(bitmap.height()) * scale).round() as u32).max(1);
    let pixels = bitmap
        .pixels()
        .resize_exact(new_width, new_height, RESIZE_FILTER);
    Bitmap::with_orientation(pixels, bitmap.orientation())
}

/// Bakes any pending rotation or mirroring into the pixel data.
#[must_use]
pub fn normalize_orientation(bitmap: Bitmap) -> Bitmap {
    let orientation = bitmap.orientation();
    if orientation == Orientation::NoTransforms {
        return bitmap;
    }
    let mut pixels = bitmap.into_pixels();
    pixels.apply_orientation(orientation);
    Bitmap::new(pixels)
}

/// Encodes `bitmap` as JPEG at `quality` (1-100) after normalizing orientation.
///
/// # Errors
/// Returns `CodecError::Encode` if the bitmap has no pixels or the encoder fails.
pub fn encode(bitmap: &Bitmap, quality: u8) -> Result<Vec<u8>, CodecError> {
    if bitmap.is_empty() {
        return Err(CodecError::encode(format!(
            "bitmap has no pixels ({}x{})",
            bitmap.width(),
            bitmap.height()
        )));
    }

    // JPEG carries no alpha channel.
    let rgb = if bitmap.orientation() == Orientation::NoTransforms {
        bitmap.pixels().to_rgb8()
    } else {
        normalize_orientation(bitmap.clone()).pixels().to_rgb8()
    };

    let mut bytes = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut bytes, quality.clamp(1, 100));
    DynamicImage::ImageRgb8(rgb)
        .write_with_encoder(encoder)
        .map_err(|e| CodecError::encode(e.to_string()))?;
    Ok(bytes)
}

/// Decodes image bytes, applying any orientation tag found in the metadata.
///
/// # Errors
/// Returns `CodecError::Decode` if the bytes are malformed, truncated, or in
/// an unsupported format.
pub fn decode(bytes: &[u8]) -> Result<Bitmap, CodecError> {
    let mut decoder = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| CodecError::decode(e.to_string()))?
        .into_decoder()
        .map_err(|e| CodecError::decode(e.to_string()))?;

    let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);
    let pixels =
        DynamicImage::from_decoder(decoder).map_err(|e| CodecError::decode(e.to_string()))?;

    Ok(normalize_orientation(Bitmap::with_orientation(
        pixels,
        orientation,
    )))
}
