//! Turning encoded bytes into sized [`DecodedImage`]s

use std::io::Cursor;
use std::sync::Arc;

use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader, Limits, RgbaImage};
use image_loader_cache::{DecodedImage, PixelFormat};

use crate::error::DecodeError;
use crate::options::{ImageScaleType, ImageSize};

/// What the caller wants out of one decode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeRequest {
    pub target_size: ImageSize,
    pub scale_type: ImageScaleType,
    pub pixel_format: PixelFormat,
}

impl DecodeRequest {
    pub fn new(target_size: ImageSize, scale_type: ImageScaleType, pixel_format: PixelFormat) -> Self {
        Self {
            target_size,
            scale_type,
            pixel_format,
        }
    }
}

/// Decodes encoded image bytes
pub trait ImageDecoder: Send + Sync {
    /// Decode `bytes` and scale the result towards `request.target_size`.
    ///
    /// Allocation failures must be reported as [`DecodeError::OutOfMemory`]
    /// so the caller can shed memory and retry.
    fn decode(&self, bytes: &[u8], request: &DecodeRequest) -> Result<DecodedImage, DecodeError>;
}

impl<D: ImageDecoder + ?Sized> ImageDecoder for Arc<D> {
    fn decode(&self, bytes: &[u8], request: &DecodeRequest) -> Result<DecodedImage, DecodeError> {
        (**self).decode(bytes, request)
    }
}

/// Decoder backed by the `image` crate
#[derive(Debug, Clone, Default)]
pub struct DefaultImageDecoder {
    max_alloc: Option<u64>,
}

impl DefaultImageDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap the bytes a single decode may allocate. Exceeding it is reported
    /// as out of memory.
    pub fn with_max_alloc(mut self, bytes: u64) -> Self {
        self.max_alloc = Some(bytes);
        self
    }
}

impl ImageDecoder for DefaultImageDecoder {
    fn decode(&self, bytes: &[u8], request: &DecodeRequest) -> Result<DecodedImage, DecodeError> {
        let mut reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
        let mut limits = Limits::default();
        if let Some(max_alloc) = self.max_alloc {
            limits.max_alloc = Some(max_alloc);
        }
        reader.limits(limits);

        let decoded = reader.decode()?;
        let scaled = scale_image(decoded, request.target_size, request.scale_type);
        convert_pixels(scaled, request.pixel_format)
    }
}

/// Largest power-of-two subsampling factor that keeps the image at least as
/// large as `target` in every constrained dimension.
///
/// ```
/// use image_loader_core::{compute_sample_size, ImageSize};
///
/// assert_eq!(compute_sample_size(ImageSize::new(1000, 800), ImageSize::new(200, 200)), 4);
/// assert_eq!(compute_sample_size(ImageSize::new(100, 100), ImageSize::new(200, 200)), 1);
/// ```
pub fn compute_sample_size(source: ImageSize, target: ImageSize) -> u32 {
    if target.is_unbounded() {
        return 1;
    }

    let min_width = target.width.max(1);
    let min_height = target.height.max(1);
    let (mut width, mut height) = (source.width, source.height);
    let mut sample = 1;
    while width / 2 >= min_width && height / 2 >= min_height {
        width /= 2;
        height /= 2;
        sample *= 2;
    }
    sample
}

/// Size of `source` shrunk to fit inside `target`, aspect ratio preserved.
/// Never enlarges.
pub fn fit_within(source: ImageSize, target: ImageSize) -> ImageSize {
    let max_width = if target.width == 0 { u32::MAX } else { target.width };
    let max_height = if target.height == 0 { u32::MAX } else { target.height };
    if source.width <= max_width && source.height <= max_height {
        return source;
    }

    let ratio = f64::min(
        f64::from(max_width) / f64::from(source.width),
        f64::from(max_height) / f64::from(source.height),
    );
    ImageSize::new(
        ((f64::from(source.width) * ratio).round() as u32).max(1),
        ((f64::from(source.height) * ratio).round() as u32).max(1),
    )
}

fn scale_image(image: DynamicImage, target: ImageSize, scale_type: ImageScaleType) -> DynamicImage {
    if target.is_unbounded() {
        return image;
    }
    let source = ImageSize::new(image.width(), image.height());

    let scaled = match scale_type {
        ImageScaleType::None => source,
        ImageScaleType::PowerOfTwo => {
            let sample = compute_sample_size(source, target);
            ImageSize::new((source.width / sample).max(1), (source.height / sample).max(1))
        }
        ImageScaleType::Exact => fit_within(source, target),
    };

    if scaled == source {
        image
    } else {
        image.resize_exact(scaled.width, scaled.height, FilterType::Triangle)
    }
}

/// Repack into `format`. `Argb8888` keeps the R, G, B, A byte order;
/// the 16-bit formats are little endian.
fn convert_pixels(image: DynamicImage, format: PixelFormat) -> Result<DecodedImage, DecodeError> {
    let rgba = image.into_rgba8();
    let (width, height) = rgba.dimensions();

    if format == PixelFormat::Argb8888 {
        return Ok(DecodedImage::new(width, height, format, rgba.into_raw()));
    }

    let mut pixels = Vec::new();
    pixels
        .try_reserve_exact(DecodedImage::compute_byte_size(width, height, format))
        .map_err(|_| DecodeError::OutOfMemory)?;

    for pixel in rgba.pixels() {
        let [r, g, b, a] = pixel.0;
        match format {
            PixelFormat::Rgb565 => {
                let packed = (u16::from(r >> 3) << 11) | (u16::from(g >> 2) << 5) | u16::from(b >> 3);
                pixels.extend_from_slice(&packed.to_le_bytes());
            }
            PixelFormat::Argb4444 => {
                let packed = (u16::from(a >> 4) << 12)
                    | (u16::from(r >> 4) << 8)
                    | (u16::from(g >> 4) << 4)
                    | u16::from(b >> 4);
                pixels.extend_from_slice(&packed.to_le_bytes());
            }
            PixelFormat::Alpha8 => pixels.push(a),
            PixelFormat::Argb8888 => unreachable!("handled above"),
        }
    }

    Ok(DecodedImage::new(width, height, format, pixels))
}

/// Encode an `Argb8888` image as PNG
pub fn encode_png(image: &DecodedImage) -> Result<Vec<u8>, DecodeError> {
    if image.format() != PixelFormat::Argb8888 {
        return Err(DecodeError::Malformed(format!(
            "cannot encode {:?} pixels as PNG",
            image.format()
        )));
    }

    let buffer = RgbaImage::from_raw(image.width(), image.height(), image.pixels().to_vec())
        .ok_or_else(|| DecodeError::Malformed("pixel buffer does not match dimensions".into()))?;

    let mut encoded = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(buffer).write_to(&mut encoded, ImageFormat::Png)?;
    Ok(encoded.into_inner())
}
