//! Load-and-display task
//!
//! One task per request: wait out a pause, wait out the configured delay,
//! take the uri's load lock, then serve the image from the memory cache or
//! load it from the disk cache or the downloader. The binding is rechecked
//! after every step that can take a while; a stale request is cancelled.

use std::io::Read;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use image_loader_cache::{DecodedImage, PixelFormat};
use image_loader_scheduler::{panic_message, CancellationToken, Cancelled, LoadLock, TaskFn};
use tracing::{debug, error, info, warn};

use crate::decode::{encode_png, DecodeRequest};
use crate::dispatch::CompletionEvent;
use crate::download::Scheme;
use crate::engine::TaskEngine;
use crate::error::{DecodeError, DownloadError, FailReason, FailType, LoadError};
use crate::listener::LoadingListener;
use crate::options::{DisplayOptions, ImageScaleType, ImageSize};
use crate::target::DisplayTarget;

/// Decode attempts when out-of-memory handling is on
const DECODE_ATTEMPTS: u32 = 3;

/// Everything a task needs to know about its request
pub(crate) struct LoadingInfo {
    pub(crate) uri: String,
    pub(crate) memory_cache_key: String,
    pub(crate) target: Arc<dyn DisplayTarget>,
    pub(crate) target_size: ImageSize,
    pub(crate) options: DisplayOptions,
    pub(crate) listener: Arc<dyn LoadingListener>,
    pub(crate) load_lock: LoadLock,
}

/// Why a task stopped before producing an image
#[derive(Debug)]
enum Abort {
    /// The target was rebound
    Cancelled,
    /// The engine was stopped
    Interrupted,
    Failed(FailReason),
}

impl From<Cancelled> for Abort {
    fn from(_: Cancelled) -> Self {
        Abort::Interrupted
    }
}

impl From<LoadError> for Abort {
    fn from(err: LoadError) -> Self {
        Abort::Failed(err.into())
    }
}

pub(crate) struct LoadAndDisplayTask {
    engine: Arc<TaskEngine>,
    info: Arc<LoadingInfo>,
}

impl LoadAndDisplayTask {
    pub(crate) fn new(engine: Arc<TaskEngine>, info: Arc<LoadingInfo>) -> Self {
        Self { engine, info }
    }

    /// Run to completion and post exactly one terminal event, unless
    /// interrupted
    pub(crate) fn run(self, token: &CancellationToken) {
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.load(token)))
            .unwrap_or_else(|payload| {
                let message = panic_message(&*payload);
                Err(Abort::Failed(FailReason::new(FailType::Unknown, message)))
            });

        let info = self.info;
        match result {
            Ok(image) => self.engine.post(CompletionEvent::Display { info, image }),
            Err(Abort::Cancelled) => {
                if self.engine.configuration().logging_enabled() {
                    info!(key = %info.memory_cache_key, "Target is reused for another image, task is cancelled");
                }
                self.engine.post(CompletionEvent::Cancelled(info));
            }
            Err(Abort::Interrupted) => {
                if self.engine.configuration().logging_enabled() {
                    info!(key = %info.memory_cache_key, "Task was interrupted");
                }
            }
            Err(Abort::Failed(reason)) => {
                error!(uri = %info.uri, reason = %reason, "Failed to load image");
                self.engine.post(CompletionEvent::Failed { info, reason });
            }
        }
    }

    fn log(&self, message: &str) {
        if self.engine.configuration().logging_enabled() {
            info!(key = %self.info.memory_cache_key, "{message}");
        }
    }

    fn check_task_is_actual(&self) -> Result<(), Abort> {
        if self.engine.is_binding_current(&self.info) {
            Ok(())
        } else {
            Err(Abort::Cancelled)
        }
    }

    fn load(&self, token: &CancellationToken) -> Result<DecodedImage, Abort> {
        let config = self.engine.configuration();
        let options = &self.info.options;

        let was_paused = self.engine.is_paused();
        if was_paused {
            self.log("Loader is paused, waiting");
        }
        self.engine.pause_gate().wait_while_paused(token)?;
        if was_paused {
            self.log("Resumed");
        }
        self.check_task_is_actual()?;

        let delay = options.delay_before_loading();
        if !delay.is_zero() {
            self.log(&format!("Delay {} ms before loading", delay.as_millis()));
            token.sleep(delay)?;
            self.check_task_is_actual()?;
        }

        let lock = &self.info.load_lock;
        if lock.is_locked() {
            self.log("Image is already loading, waiting");
        }

        let image = {
            let _guard = lock.lock();
            self.check_task_is_actual()?;

            match config.memory_cache().get(&self.info.memory_cache_key) {
                Some(image) => {
                    self.log("Got image from memory cache after waiting");
                    image
                }
                None => {
                    let mut image = self.try_load_image(token)?;
                    self.check_task_is_actual()?;
                    token.check()?;

                    if let Some(processor) = options.pre_processor() {
                        self.log("Pre-process image before caching in memory");
                        image = processor.process(image);
                    }
                    if options.is_cache_in_memory() {
                        self.log("Cache image in memory");
                        config
                            .memory_cache()
                            .put(&self.info.memory_cache_key, image.clone());
                    }
                    image
                }
            }
        };

        let image = match options.post_processor() {
            Some(processor) => {
                self.log("Post-process image before displaying");
                processor.process(image)
            }
            None => image,
        };

        self.check_task_is_actual()?;
        token.check()?;
        Ok(image)
    }

    /// Disk cache first, then the downloader. A cached file that no longer
    /// decodes is deleted and fetched again. Fetched bytes reach the disk
    /// cache only once they have decoded.
    fn try_load_image(&self, token: &CancellationToken) -> Result<DecodedImage, Abort> {
        let config = self.engine.configuration();
        let uri = &self.info.uri;
        let local = Scheme::of_uri(uri).is_local();

        if !local {
            if let Some(snapshot) = config.disk_cache().get(uri) {
                self.log("Load image from disk cache");
                match snapshot.into_bytes() {
                    Ok(bytes) => match self.decode(&bytes, token) {
                        Err(Abort::Failed(reason)) if reason.kind() == FailType::DecodingError => {
                            warn!(uri = %uri, reason = %reason, "Cached image does not decode, fetching again");
                            config.disk_cache().remove(uri);
                        }
                        result => return result,
                    },
                    Err(err) => {
                        warn!(uri = %uri, error = %err, "Cached image unreadable, fetching again");
                        config.disk_cache().remove(uri);
                    }
                }
            }
        }

        token.check()?;
        self.log("Load image from source");
        let bytes = self.fetch()?;
        let image = self.decode(&bytes, token)?;
        if self.info.options.is_cache_on_disk() && !local {
            self.cache_on_disk(bytes);
        }
        Ok(image)
    }

    fn fetch(&self) -> Result<Vec<u8>, Abort> {
        let mut stream = self
            .engine
            .downloader()
            .get_stream(&self.info.uri, self.info.options.extra_for_downloader())
            .map_err(LoadError::from)?;

        let mut bytes = Vec::new();
        stream
            .read_to_end(&mut bytes)
            .map_err(|err| LoadError::from(DownloadError::Io(err)))?;
        Ok(bytes)
    }

    /// Write the downloaded bytes to the disk cache, shrunk first when a
    /// disk size bound is configured
    fn cache_on_disk(&self, original: Vec<u8>) {
        let config = self.engine.configuration();
        let uri = &self.info.uri;
        self.log("Cache image on disk");

        let bound = config.max_image_size_for_disk_cache();
        let stored = if bound.is_unbounded() {
            original
        } else {
            match self.shrink_for_disk(&original, bound) {
                Ok(shrunk) => shrunk,
                Err(err) => {
                    warn!(uri = %uri, error = %err, "Can't shrink image for disk cache, storing original");
                    original
                }
            }
        };

        match config.disk_cache().put(uri, &mut stored.as_slice()) {
            Ok(true) => {}
            Ok(false) => debug!(uri = %uri, "Disk cache entry is being written elsewhere"),
            Err(err) => warn!(uri = %uri, error = %err, "Failed to write disk cache entry"),
        }
    }

    fn shrink_for_disk(&self, bytes: &[u8], bound: ImageSize) -> Result<Vec<u8>, DecodeError> {
        let request = DecodeRequest::new(bound, ImageScaleType::Exact, PixelFormat::Argb8888);
        let image = self.engine.configuration().decoder().decode(bytes, &request)?;
        encode_png(&image)
    }

    /// Decode, retrying on out-of-memory: the first retry only backs off,
    /// the second also clears the memory cache, the third failure is final.
    fn decode(&self, bytes: &[u8], token: &CancellationToken) -> Result<DecodedImage, Abort> {
        let config = self.engine.configuration();
        let options = &self.info.options;
        let request = DecodeRequest::new(
            self.info.target_size,
            options.scale_type(),
            options.pixel_format(),
        );
        let attempts = if config.handle_out_of_memory() {
            DECODE_ATTEMPTS
        } else {
            1
        };

        let mut attempt = 1;
        loop {
            match config.decoder().decode(bytes, &request) {
                Ok(image) => return Ok(image),
                Err(DecodeError::OutOfMemory) if attempt < attempts => {
                    error!(uri = %self.info.uri, attempt, "Out of memory while decoding, retrying");
                    if attempt >= 2 {
                        config.memory_cache().clear();
                    }
                    token.sleep(config.oom_retry_delay() * attempt)?;
                    attempt += 1;
                }
                Err(err) => return Err(LoadError::from(err).into()),
            }
        }
    }
}

/// Job for a memory cache hit that still needs post-processing
pub(crate) fn process_and_display(
    engine: Arc<TaskEngine>,
    info: Arc<LoadingInfo>,
    image: DecodedImage,
) -> TaskFn {
    Box::new(move |token: &CancellationToken| {
        let Some(processor) = info.options.post_processor().cloned() else {
            engine.post(CompletionEvent::Display { info, image });
            return;
        };
        if token.is_cancelled() {
            return;
        }

        match panic::catch_unwind(AssertUnwindSafe(|| processor.process(image))) {
            Ok(image) => engine.post(CompletionEvent::Display { info, image }),
            Err(payload) => {
                let reason = FailReason::new(FailType::Unknown, panic_message(&*payload));
                error!(uri = %info.uri, reason = %reason, "Post-processor panicked");
                engine.post(CompletionEvent::Failed { info, reason });
            }
        }
    })
}
