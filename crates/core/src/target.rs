//! Display targets and displayers
//!
//! A [`DisplayTarget`] is whatever ultimately shows an image: a widget, a
//! texture slot, a test double. The loader only ever touches it from the
//! completion consumer.

use std::sync::atomic::{AtomicU64, Ordering};

use image_loader_cache::DecodedImage;

use crate::options::ImageSize;

/// Identity of a display target. Bindings are keyed by it.
pub type TargetId = u64;

static NEXT_TARGET_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a process-unique target id
pub fn next_target_id() -> TargetId {
    NEXT_TARGET_ID.fetch_add(1, Ordering::Relaxed)
}

/// Something that can show a decoded image
pub trait DisplayTarget: Send + Sync {
    /// Stable identity; reusing a target for a new request keeps its id
    fn id(&self) -> TargetId;

    /// Preferred decode size. `0x0` means "unknown".
    fn size_hint(&self) -> ImageSize {
        ImageSize::default()
    }

    /// Show `image`, or clear the target when `None`
    fn set_image(&self, image: Option<DecodedImage>);
}

/// Target with no visual side, used by `load_image`
#[derive(Debug)]
pub struct DetachedTarget {
    id: TargetId,
    size: ImageSize,
}

impl DetachedTarget {
    pub fn new(size: ImageSize) -> Self {
        Self {
            id: next_target_id(),
            size,
        }
    }
}

impl DisplayTarget for DetachedTarget {
    fn id(&self) -> TargetId {
        self.id
    }

    fn size_hint(&self) -> ImageSize {
        self.size
    }

    fn set_image(&self, _image: Option<DecodedImage>) {}
}

/// Hands the final image to a target. Returns the image actually shown.
pub trait ImageDisplayer: Send + Sync {
    fn display(&self, image: DecodedImage, target: &dyn DisplayTarget) -> DecodedImage;
}

/// Sets the image on the target as is
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleDisplayer;

impl ImageDisplayer for SimpleDisplayer {
    fn display(&self, image: DecodedImage, target: &dyn DisplayTarget) -> DecodedImage {
        target.set_image(Some(image.clone()));
        image
    }
}
