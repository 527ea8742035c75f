//! Image normalization before it is sent to the model.
//!
//! An upload is decoded (format sniffed from content), checked against a
//! pixel budget before any pixel buffer is allocated, rotated/flipped
//! according to its EXIF orientation, downscaled so its longest edge fits
//! the configured bound, and re-encoded for transport.

use std::io::Cursor;
use std::time::Duration;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::metadata::Orientation;
use image::{DynamicImage, GenericImageView, ImageDecoder, ImageFormat, ImageReader};
use thiserror::Error;
use tokio::time::timeout;

const JPEG_QUALITY: u8 = 85;

#[derive(Debug, Clone)]
pub struct PreprocessLimits {
    /// Longest edge after downscaling
    pub max_dimension: u32,
    /// Decompression-bomb threshold on declared width * height
    pub max_pixels: u64,
    pub decode_timeout_ms: u64,
}

impl Default for PreprocessLimits {
    fn default() -> Self {
        Self {
            max_dimension: 800,
            max_pixels: 89_478_485,
            decode_timeout_ms: 10_000,
        }
    }
}

#[derive(Error, Debug)]
pub enum PreprocessError {
    #[error("upload is empty")]
    Empty,

    #[error("unrecognized image format")]
    UnknownFormat,

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("image declares {width}x{height} pixels, over the limit of {max_pixels}")]
    TooManyPixels {
        width: u32,
        height: u32,
        max_pixels: u64,
    },

    #[error("decode timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("re-encoding failed: {0}")]
    Encode(String),

    #[error("preprocessing task failed: {0}")]
    Worker(String),
}

impl PreprocessError {
    /// True when the upload itself is at fault rather than the server.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::Encode(_) | Self::Worker(_))
    }
}

/// Normalized image ready to be sent to the model.
#[derive(Debug, Clone)]
pub struct PreparedImage {
    /// Encoded bytes (JPEG, or PNG when the source has an alpha channel)
    pub bytes: Vec<u8>,
    pub mime_type: &'static str,
    pub source_format: ImageFormat,
    pub original_width: u32,
    pub original_height: u32,
    pub width: u32,
    pub height: u32,
    pub orientation: Orientation,
}

/// Decodes and normalizes uploads off the async runtime.
#[derive(Debug, Clone)]
pub struct ImagePreprocessor {
    limits: PreprocessLimits,
}

impl ImagePreprocessor {
    pub fn new(limits: PreprocessLimits) -> Self {
        Self { limits }
    }

    /// Normalize an upload on a blocking worker, bounded by the decode timeout.
    pub async fn prepare(&self, bytes: Vec<u8>) -> Result<PreparedImage, PreprocessError> {
        let limits = self.limits.clone();
        run_blocking(limits.decode_timeout_ms, move || prepare_sync(&bytes, &limits)).await
    }
}

/// Run `work` on the blocking pool, giving up after `timeout_ms`.
async fn run_blocking<T, F>(timeout_ms: u64, work: F) -> Result<T, PreprocessError>
where
    F: FnOnce() -> Result<T, PreprocessError> + Send + 'static,
    T: Send + 'static,
{
    let task = tokio::task::spawn_blocking(work);

    match timeout(Duration::from_millis(timeout_ms), task).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(PreprocessError::Worker(e.to_string())),
        Err(_) => Err(PreprocessError::Timeout { timeout_ms }),
    }
}

/// Synchronous pipeline: decode, orient, downscale, encode.
pub fn prepare_sync(
    bytes: &[u8],
    limits: &PreprocessLimits,
) -> Result<PreparedImage, PreprocessError> {
    let decoded = decode(bytes, limits.max_pixels)?;
    let (original_width, original_height) = decoded.stored_dimensions;

    let mut image = decoded.image;
    image.apply_orientation(decoded.orientation);
    let image = fit_within(image, limits.max_dimension);
    let (width, height) = image.dimensions();

    let (bytes, mime_type) = encode_for_transport(&image)?;

    Ok(PreparedImage {
        bytes,
        mime_type,
        source_format: decoded.format,
        original_width,
        original_height,
        width,
        height,
        orientation: decoded.orientation,
    })
}

struct Decoded {
    image: DynamicImage,
    format: ImageFormat,
    stored_dimensions: (u32, u32),
    orientation: Orientation,
}

fn decode(bytes: &[u8], max_pixels: u64) -> Result<Decoded, PreprocessError> {
    if bytes.is_empty() {
        return Err(PreprocessError::Empty);
    }

    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| PreprocessError::Decode(e.to_string()))?;
    let format = reader.format().ok_or(PreprocessError::UnknownFormat)?;

    let mut decoder = reader
        .into_decoder()
        .map_err(|e| PreprocessError::Decode(e.to_string()))?;

    // Header only; no pixel data has been read yet.
    let (width, height) = decoder.dimensions();
    if u64::from(width) * u64::from(height) > max_pixels {
        return Err(PreprocessError::TooManyPixels {
            width,
            height,
            max_pixels,
        });
    }

    // Malformed EXIF is not worth rejecting the upload over.
    let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);

    let image =
        DynamicImage::from_decoder(decoder).map_err(|e| PreprocessError::Decode(e.to_string()))?;

    Ok(Decoded {
        image,
        format,
        stored_dimensions: (width, height),
        orientation,
    })
}

/// Downscale so neither side exceeds `max_dimension`, keeping aspect ratio.
///
/// Images already within bounds are returned untouched.
pub fn fit_within(image: DynamicImage, max_dimension: u32) -> DynamicImage {
    let (width, height) = image.dimensions();
    if width <= max_dimension && height <= max_dimension {
        return image;
    }
    image.resize(max_dimension, max_dimension, FilterType::Lanczos3)
}

fn encode_for_transport(image: &DynamicImage) -> Result<(Vec<u8>, &'static str), PreprocessError> {
    let mut buffer = Cursor::new(Vec::new());

    // Always 8-bit RGBA: the PNG encoder rejects float channels (EXR).
    if image.color().has_alpha() {
        DynamicImage::ImageRgba8(image.to_rgba8())
            .write_to(&mut buffer, ImageFormat::Png)
            .map_err(|e| PreprocessError::Encode(e.to_string()))?;
        return Ok((buffer.into_inner(), "image/png"));
    }

    let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
    let encoder = JpegEncoder::new_with_quality(&mut buffer, JPEG_QUALITY);
    rgb.write_with_encoder(encoder)
        .map_err(|e| PreprocessError::Encode(e.to_string()))?;
    Ok((buffer.into_inner(), "image/jpeg"))
}
