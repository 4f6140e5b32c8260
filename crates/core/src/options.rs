//! Per-request display options

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use image_loader_cache::{DecodedImage, PixelFormat};
use serde::{Deserialize, Serialize};

use crate::target::{ImageDisplayer, SimpleDisplayer};

/// Width and height in pixels. A zero dimension means "unconstrained".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// True when neither dimension constrains decoding
    pub fn is_unbounded(&self) -> bool {
        self.width == 0 && self.height == 0
    }
}

impl fmt::Display for ImageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// How a decoded image is scaled towards the target size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageScaleType {
    /// Keep the source dimensions
    None,
    /// Subsample by the largest power of two that keeps the image at least
    /// as large as the target
    #[default]
    PowerOfTwo,
    /// Resize to fit inside the target, preserving aspect ratio
    Exact,
}

/// Pure transform applied to a decoded image
pub trait ImageProcessor: Send + Sync {
    fn process(&self, image: DecodedImage) -> DecodedImage;
}

impl<F> ImageProcessor for F
where
    F: Fn(DecodedImage) -> DecodedImage + Send + Sync,
{
    fn process(&self, image: DecodedImage) -> DecodedImage {
        self(image)
    }
}

/// Opaque value handed through to the downloader untouched
pub type DownloaderExtra = Arc<dyn Any + Send + Sync>;

/// Options controlling how one request is loaded and shown.
///
/// ```
/// use image_loader_core::{DisplayOptions, ImageScaleType};
/// use std::time::Duration;
///
/// let options = DisplayOptions::builder()
///     .cache_in_memory(true)
///     .cache_on_disk(true)
///     .scale_type(ImageScaleType::Exact)
///     .delay_before_loading(Duration::from_millis(100))
///     .build();
/// assert!(options.is_cache_in_memory());
/// ```
#[derive(Clone)]
pub struct DisplayOptions {
    stub_image: Option<DecodedImage>,
    image_for_empty_uri: Option<DecodedImage>,
    image_on_fail: Option<DecodedImage>,
    reset_view_before_loading: bool,
    cache_in_memory: bool,
    cache_on_disk: bool,
    scale_type: ImageScaleType,
    pixel_format: PixelFormat,
    delay_before_loading: Duration,
    extra_for_downloader: Option<DownloaderExtra>,
    pre_processor: Option<Arc<dyn ImageProcessor>>,
    post_processor: Option<Arc<dyn ImageProcessor>>,
    displayer: Arc<dyn ImageDisplayer>,
}

impl Default for DisplayOptions {
    fn default() -> Self {
        DisplayOptionsBuilder::new().build()
    }
}

impl DisplayOptions {
    pub fn builder() -> DisplayOptionsBuilder {
        DisplayOptionsBuilder::new()
    }

    /// Placeholder shown while loading
    pub fn stub_image(&self) -> Option<&DecodedImage> {
        self.stub_image.as_ref()
    }

    pub fn image_for_empty_uri(&self) -> Option<&DecodedImage> {
        self.image_for_empty_uri.as_ref()
    }

    pub fn image_on_fail(&self) -> Option<&DecodedImage> {
        self.image_on_fail.as_ref()
    }

    pub fn is_reset_view_before_loading(&self) -> bool {
        self.reset_view_before_loading
    }

    pub fn is_cache_in_memory(&self) -> bool {
        self.cache_in_memory
    }

    pub fn is_cache_on_disk(&self) -> bool {
        self.cache_on_disk
    }

    pub fn scale_type(&self) -> ImageScaleType {
        self.scale_type
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    pub fn delay_before_loading(&self) -> Duration {
        self.delay_before_loading
    }

    pub fn extra_for_downloader(&self) -> Option<&DownloaderExtra> {
        self.extra_for_downloader.as_ref()
    }

    pub fn pre_processor(&self) -> Option<&Arc<dyn ImageProcessor>> {
        self.pre_processor.as_ref()
    }

    pub fn post_processor(&self) -> Option<&Arc<dyn ImageProcessor>> {
        self.post_processor.as_ref()
    }

    pub fn displayer(&self) -> &Arc<dyn ImageDisplayer> {
        &self.displayer
    }
}

impl fmt::Debug for DisplayOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisplayOptions")
            .field("stub_image", &self.stub_image.is_some())
            .field("image_for_empty_uri", &self.image_for_empty_uri.is_some())
            .field("image_on_fail", &self.image_on_fail.is_some())
            .field("reset_view_before_loading", &self.reset_view_before_loading)
            .field("cache_in_memory", &self.cache_in_memory)
            .field("cache_on_disk", &self.cache_on_disk)
            .field("scale_type", &self.scale_type)
            .field("pixel_format", &self.pixel_format)
            .field("delay_before_loading", &self.delay_before_loading)
            .field("pre_processor", &self.pre_processor.is_some())
            .field("post_processor", &self.post_processor.is_some())
            .finish_non_exhaustive()
    }
}

/// Builder for [`DisplayOptions`]
pub struct DisplayOptionsBuilder {
    options: DisplayOptions,
}

impl Default for DisplayOptionsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DisplayOptionsBuilder {
    pub fn new() -> Self {
        Self {
            options: DisplayOptions {
                stub_image: None,
                image_for_empty_uri: None,
                image_on_fail: None,
                reset_view_before_loading: false,
                cache_in_memory: false,
                cache_on_disk: false,
                scale_type: ImageScaleType::default(),
                pixel_format: PixelFormat::default(),
                delay_before_loading: Duration::ZERO,
                extra_for_downloader: None,
                pre_processor: None,
                post_processor: None,
                displayer: Arc::new(SimpleDisplayer),
            },
        }
    }

    pub fn stub_image(mut self, image: DecodedImage) -> Self {
        self.options.stub_image = Some(image);
        self
    }

    pub fn image_for_empty_uri(mut self, image: DecodedImage) -> Self {
        self.options.image_for_empty_uri = Some(image);
        self
    }

    pub fn image_on_fail(mut self, image: DecodedImage) -> Self {
        self.options.image_on_fail = Some(image);
        self
    }

    /// Clear the target before loading when there is no stub image
    pub fn reset_view_before_loading(mut self, reset: bool) -> Self {
        self.options.reset_view_before_loading = reset;
        self
    }

    pub fn cache_in_memory(mut self, enabled: bool) -> Self {
        self.options.cache_in_memory = enabled;
        self
    }

    pub fn cache_on_disk(mut self, enabled: bool) -> Self {
        self.options.cache_on_disk = enabled;
        self
    }

    pub fn scale_type(mut self, scale_type: ImageScaleType) -> Self {
        self.options.scale_type = scale_type;
        self
    }

    pub fn pixel_format(mut self, format: PixelFormat) -> Self {
        self.options.pixel_format = format;
        self
    }

    pub fn delay_before_loading(mut self, delay: Duration) -> Self {
        self.options.delay_before_loading = delay;
        self
    }

    pub fn extra_for_downloader(mut self, extra: DownloaderExtra) -> Self {
        self.options.extra_for_downloader = Some(extra);
        self
    }

    /// Runs on the decoded image before it is stored in the memory cache
    pub fn pre_processor(mut self, processor: impl ImageProcessor + 'static) -> Self {
        self.options.pre_processor = Some(Arc::new(processor));
        self
    }

    /// Runs after memory caching, right before the image is displayed
    pub fn post_processor(mut self, processor: impl ImageProcessor + 'static) -> Self {
        self.options.post_processor = Some(Arc::new(processor));
        self
    }

    pub fn displayer(mut self, displayer: impl ImageDisplayer + 'static) -> Self {
        self.options.displayer = Arc::new(displayer);
        self
    }

    /// Copy every option from `options`
    pub fn clone_from(mut self, options: &DisplayOptions) -> Self {
        self.options = options.clone();
        self
    }

    pub fn build(self) -> DisplayOptions {
        self.options
    }
}
