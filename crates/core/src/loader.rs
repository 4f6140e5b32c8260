//! Image loader facade
//!
//! The entry point applications hold on to. Construct one per process from
//! a [`Configuration`] and share it by reference.

use std::io;
use std::sync::Arc;

use image_loader_cache::{memory_cache_key, uri_of_key, DiskCache, MemoryCache};
use image_loader_scheduler::SchedulerStats;
use tracing::info;

use crate::config::Configuration;
use crate::dispatch::{CompletionDispatcher, CompletionEvent, CompletionQueue, CompletionThread};
use crate::engine::TaskEngine;
use crate::listener::{LoadingListener, NoopListener};
use crate::options::{DisplayOptions, ImageSize};
use crate::target::{DetachedTarget, DisplayTarget, TargetId};
use crate::task::{process_and_display, LoadingInfo};

/// Loads, caches and displays images.
///
/// ```no_run
/// use image_loader_core::{Configuration, DisplayTarget, ImageLoader, ImageSize, TargetId};
/// use image_loader_cache::DecodedImage;
/// use std::sync::Arc;
///
/// struct Thumbnail(TargetId);
///
/// impl DisplayTarget for Thumbnail {
///     fn id(&self) -> TargetId {
///         self.0
///     }
///     fn size_hint(&self) -> ImageSize {
///         ImageSize::new(128, 128)
///     }
///     fn set_image(&self, image: Option<DecodedImage>) {
///         // hand the pixels to the UI
///     }
/// }
///
/// let loader = ImageLoader::new(Configuration::builder().build()?)?;
/// loader.display_image("https://example.com/a.png", Arc::new(Thumbnail(1)));
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct ImageLoader {
    engine: Arc<TaskEngine>,
    consumer: Option<CompletionThread>,
}

impl ImageLoader {
    /// Create a loader whose completions run on a dedicated thread
    pub fn new(config: Configuration) -> io::Result<Self> {
        let (dispatcher, receiver) = CompletionDispatcher::channel();
        let engine = Arc::new(TaskEngine::new(Arc::new(config), dispatcher));
        let consumer = CompletionThread::spawn(receiver, Arc::downgrade(&engine))?;
        Ok(Self {
            engine,
            consumer: Some(consumer),
        })
    }

    /// Create a loader whose completions are applied only when the caller
    /// drains the returned queue
    pub fn with_manual_completion(config: Configuration) -> (Self, CompletionQueue) {
        let (dispatcher, receiver) = CompletionDispatcher::channel();
        let engine = Arc::new(TaskEngine::new(Arc::new(config), dispatcher));
        let queue = CompletionQueue::new(receiver, Arc::downgrade(&engine));
        (
            Self {
                engine,
                consumer: None,
            },
            queue,
        )
    }

    pub fn configuration(&self) -> &Configuration {
        self.engine.configuration()
    }

    pub fn engine(&self) -> &TaskEngine {
        &self.engine
    }

    /// Display `uri` in `target` with the default options
    pub fn display_image(&self, uri: &str, target: Arc<dyn DisplayTarget>) {
        self.display_image_with(uri, target, None, None);
    }

    /// Display `uri` in `target`.
    ///
    /// Rebinds `target` to this request; any earlier request for the same
    /// target is cancelled. An empty `uri` shows `image_for_empty_uri`.
    pub fn display_image_with(
        &self,
        uri: &str,
        target: Arc<dyn DisplayTarget>,
        options: Option<&DisplayOptions>,
        listener: Option<Arc<dyn LoadingListener>>,
    ) {
        let options = options
            .cloned()
            .unwrap_or_else(|| self.configuration().default_display_options().clone());
        let listener = listener.unwrap_or_else(|| Arc::new(NoopListener));

        if uri.is_empty() {
            self.engine.cancel_display_task_for(target.id());
            self.engine.post(CompletionEvent::EmptyUri {
                target,
                options,
                listener,
            });
            return;
        }

        let target_size = self.target_size(target.as_ref());
        let key = memory_cache_key(uri, target_size.width, target_size.height);
        self.engine.prepare_display_task_for(target.id(), key.clone());

        let info = Arc::new(LoadingInfo {
            uri: uri.to_string(),
            memory_cache_key: key,
            target,
            target_size,
            options,
            listener,
            load_lock: self.engine.lock_for(uri),
        });
        self.engine.post(CompletionEvent::Started(info.clone()));

        match self.memory_cache().get(&info.memory_cache_key) {
            Some(image) => {
                if self.configuration().logging_enabled() {
                    info!(key = %info.memory_cache_key, "Load image from memory cache");
                }
                if info.options.post_processor().is_some() {
                    let job = process_and_display(self.engine.clone(), info.clone(), image);
                    self.engine.submit_job(&info, job);
                } else {
                    self.engine.post(CompletionEvent::Display { info, image });
                }
            }
            None => self.engine.submit(info),
        }
    }

    /// Load `uri` without a visible target; the result only reaches
    /// `listener`. `size` defaults to the memory cache bound.
    pub fn load_image(
        &self,
        uri: &str,
        size: Option<ImageSize>,
        options: Option<&DisplayOptions>,
        listener: Arc<dyn LoadingListener>,
    ) -> TargetId {
        let size = size.unwrap_or_else(|| self.configuration().max_image_size_for_memory_cache());
        let target = Arc::new(DetachedTarget::new(size));
        let id = target.id();
        self.display_image_with(uri, target, options, Some(listener));
        id
    }

    /// Decode size for `target`: its hint, else the configured bound
    fn target_size(&self, target: &dyn DisplayTarget) -> ImageSize {
        let hint = target.size_hint();
        if hint.is_unbounded() {
            self.configuration().max_image_size_for_memory_cache()
        } else {
            hint
        }
    }

    /// Uri `target` is currently bound to
    pub fn loading_uri_for(&self, target: &dyn DisplayTarget) -> Option<String> {
        self.engine
            .loading_key_for(target.id())
            .map(|key| uri_of_key(&key).to_string())
    }

    /// Cancel whatever `target` is waiting for
    pub fn cancel_display_task(&self, target: &dyn DisplayTarget) {
        self.engine.cancel_display_task_for(target.id());
    }

    pub fn memory_cache(&self) -> &Arc<dyn MemoryCache> {
        self.configuration().memory_cache()
    }

    pub fn disk_cache(&self) -> &Arc<dyn DiskCache> {
        self.configuration().disk_cache()
    }

    pub fn clear_memory_cache(&self) {
        self.memory_cache().clear();
    }

    pub fn clear_disk_cache(&self) {
        self.disk_cache().clear();
    }

    pub fn deny_network_downloads(&self, deny: bool) {
        self.engine.deny_network_downloads(deny);
    }

    pub fn handle_slow_network(&self, slow: bool) {
        self.engine.handle_slow_network(slow);
    }

    pub fn pause(&self) {
        self.engine.pause();
    }

    pub fn resume(&self) {
        self.engine.resume();
    }

    /// Interrupt all loads silently. The loader stays usable.
    pub fn stop(&self) {
        self.engine.stop();
    }

    pub fn stats(&self) -> SchedulerStats {
        self.engine.stats()
    }
}

impl Drop for ImageLoader {
    fn drop(&mut self) {
        self.engine.stop();
        self.engine.post(CompletionEvent::Shutdown);
        if let Some(consumer) = self.consumer.take() {
            consumer.join();
        }
    }
}
