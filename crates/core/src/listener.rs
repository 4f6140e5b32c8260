//! Loading lifecycle callbacks

use image_loader_cache::DecodedImage;

use crate::error::FailReason;

/// Receives the lifecycle of one request.
///
/// Every callback runs on the completion consumer. A request gets
/// `on_started` and then exactly one of `on_complete`, `on_failed` or
/// `on_cancelled`, unless the loader is stopped while it runs.
pub trait LoadingListener: Send + Sync {
    fn on_started(&self, _uri: &str) {}

    /// `image` is `None` for an empty uri
    fn on_complete(&self, _uri: &str, _image: Option<&DecodedImage>) {}

    fn on_failed(&self, _uri: &str, _reason: &FailReason) {}

    /// The target was rebound to another request before this one finished
    fn on_cancelled(&self, _uri: &str) {}
}

/// Ignores every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopListener;

impl LoadingListener for NoopListener {}
