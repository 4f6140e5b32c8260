//! Image Loader Core Library
//!
//! Fetches images from a pluggable byte source, decodes them to the target's
//! size, caches them in memory and on disk, and hands them to display
//! targets. Concurrent requests for the same uri share one fetch; a target
//! rebound to another uri never shows the stale image.

pub mod config;
pub mod decode;
mod dispatch;
pub mod download;
pub mod engine;
pub mod error;
pub mod listener;
pub mod loader;
pub mod logging;
pub mod options;
pub mod target;
mod task;

pub use config::{Configuration, ConfigurationBuilder, KeyNamerKind, LoaderSettings, ProcessingOrder};
pub use decode::{compute_sample_size, encode_png, fit_within, DecodeRequest, DefaultImageDecoder, ImageDecoder};
pub use dispatch::CompletionQueue;
pub use download::{
    BaseImageDownloader, ImageDownloader, ImageStream, NetworkDeniedDownloader, Scheme,
    SlowNetworkDownloader,
};
pub use engine::TaskEngine;
pub use error::{ConfigError, DecodeError, DownloadError, FailReason, FailType, LoadError};
pub use listener::{LoadingListener, NoopListener};
pub use loader::ImageLoader;
pub use logging::init_logging;
pub use options::{
    DisplayOptions, DisplayOptionsBuilder, DownloaderExtra, ImageProcessor, ImageScaleType,
    ImageSize,
};
pub use target::{next_target_id, DetachedTarget, DisplayTarget, ImageDisplayer, SimpleDisplayer, TargetId};
