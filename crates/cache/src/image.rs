//! Decoded image artifact
//!
//! The in-memory bitmap handed between the decoder, the caches and the
//! display targets. Cloning is cheap: all clones share the same pixel buffer.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Pixel layout of a decoded image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PixelFormat {
    /// 8 bits per channel, alpha + RGB (4 bytes per pixel)
    #[default]
    Argb8888,
    /// 5/6/5 bits RGB, no alpha (2 bytes per pixel)
    Rgb565,
    /// 4 bits per channel, alpha + RGB (2 bytes per pixel)
    Argb4444,
    /// Alpha only (1 byte per pixel)
    Alpha8,
}

impl PixelFormat {
    /// Number of bytes one pixel occupies in this format.
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Argb8888 => 4,
            PixelFormat::Rgb565 | PixelFormat::Argb4444 => 2,
            PixelFormat::Alpha8 => 1,
        }
    }
}

struct ImageData {
    width: u32,
    height: u32,
    format: PixelFormat,
    pixels: Vec<u8>,
    recycled: AtomicBool,
}

/// A decoded, display-ready image.
///
/// The byte size used for cache accounting is always
/// `width * height * bytes_per_pixel`, independent of the backing buffer.
#[derive(Clone)]
pub struct DecodedImage {
    inner: Arc<ImageData>,
}

impl DecodedImage {
    /// Wrap decoded pixel data.
    ///
    /// `pixels` is expected to hold `width * height * bytes_per_pixel` bytes.
    pub fn new(width: u32, height: u32, format: PixelFormat, pixels: Vec<u8>) -> Self {
        debug_assert_eq!(
            pixels.len(),
            Self::compute_byte_size(width, height, format),
            "pixel buffer does not match image dimensions"
        );
        Self {
            inner: Arc::new(ImageData {
                width,
                height,
                format,
                pixels,
                recycled: AtomicBool::new(false),
            }),
        }
    }

    /// Create a zero-filled image (placeholders and tests).
    pub fn blank(width: u32, height: u32, format: PixelFormat) -> Self {
        let len = Self::compute_byte_size(width, height, format);
        Self::new(width, height, format, vec![0u8; len])
    }

    /// Byte size of an image with the given dimensions and format.
    pub fn compute_byte_size(width: u32, height: u32, format: PixelFormat) -> usize {
        width as usize * height as usize * format.bytes_per_pixel()
    }

    pub fn width(&self) -> u32 {
        self.inner.width
    }

    pub fn height(&self) -> u32 {
        self.inner.height
    }

    pub fn format(&self) -> PixelFormat {
        self.inner.format
    }

    pub fn pixels(&self) -> &[u8] {
        &self.inner.pixels
    }

    /// Memory footprint used for cache accounting.
    pub fn byte_size(&self) -> usize {
        Self::compute_byte_size(self.inner.width, self.inner.height, self.inner.format)
    }

    /// Mark the image as released. Caches treat released images as absent.
    pub fn recycle(&self) {
        self.inner.recycled.store(true, Ordering::Release);
    }

    pub fn is_recycled(&self) -> bool {
        self.inner.recycled.load(Ordering::Acquire)
    }

    /// Returns true if both handles share the same pixel buffer.
    pub fn ptr_eq(&self, other: &DecodedImage) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for DecodedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedImage")
            .field("width", &self.inner.width)
            .field("height", &self.inner.height)
            .field("format", &self.inner.format)
            .field("recycled", &self.is_recycled())
            .finish()
    }
}
