//! Test doubles shared by the engine scenario tests
#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use image_loader_cache::{DecodedImage, LruMemoryCache, MemoryCache};
use image_loader_core::{
    next_target_id, ConfigurationBuilder, DecodeError, DecodeRequest, DefaultImageDecoder,
    DisplayTarget, DownloadError, DownloaderExtra, FailReason, ImageDecoder, ImageDownloader,
    ImageSize, ImageStream, LoadingListener, TargetId,
};
use parking_lot::Mutex;
use tempfile::TempDir;

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let buffer = RgbaImage::from_pixel(width, height, Rgba([200, 100, 50, 255]));
    let mut encoded = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(buffer)
        .write_to(&mut encoded, ImageFormat::Png)
        .unwrap();
    encoded.into_inner()
}

pub fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// Serves generated PNGs, `uri -> (width, height)`, counting calls
#[derive(Default)]
pub struct FakeSource {
    images: Mutex<HashMap<String, (u32, u32)>>,
    raw: Mutex<HashMap<String, Vec<u8>>>,
    delays: Mutex<HashMap<String, Duration>>,
    calls: Mutex<HashMap<String, usize>>,
    pub total_calls: AtomicUsize,
}

impl FakeSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn serve(&self, uri: &str, width: u32, height: u32) {
        self.images.lock().insert(uri.to_string(), (width, height));
    }

    /// Serve `bytes` verbatim for `uri`
    pub fn serve_bytes(&self, uri: &str, bytes: &[u8]) {
        self.raw.lock().insert(uri.to_string(), bytes.to_vec());
    }

    /// Sleep this long before answering for `uri`
    pub fn delay(&self, uri: &str, delay: Duration) {
        self.delays.lock().insert(uri.to_string(), delay);
    }

    pub fn calls_for(&self, uri: &str) -> usize {
        self.calls.lock().get(uri).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.total_calls.load(Ordering::SeqCst)
    }
}

impl ImageDownloader for FakeSource {
    fn get_stream(
        &self,
        uri: &str,
        _extra: Option<&DownloaderExtra>,
    ) -> Result<ImageStream, DownloadError> {
        self.total_calls.fetch_add(1, Ordering::SeqCst);
        *self.calls.lock().entry(uri.to_string()).or_default() += 1;

        let delay = self.delays.lock().get(uri).copied();
        if let Some(delay) = delay {
            thread::sleep(delay);
        }

        let raw = self.raw.lock().get(uri).cloned();
        if let Some(bytes) = raw {
            return Ok(Box::new(Cursor::new(bytes)));
        }

        let size = self.images.lock().get(uri).copied();
        match size {
            Some((width, height)) => Ok(Box::new(Cursor::new(png_bytes(width, height)))),
            None => Err(DownloadError::Http {
                uri: uri.to_string(),
                status: 404,
            }),
        }
    }
}

/// Memory cache that counts `clear` calls
pub struct CountingCache {
    inner: LruMemoryCache,
    pub clears: AtomicUsize,
}

impl CountingCache {
    pub fn new(limit: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: LruMemoryCache::new(limit),
            clears: AtomicUsize::new(0),
        })
    }
}

impl MemoryCache for CountingCache {
    fn put(&self, key: &str, image: DecodedImage) -> bool {
        self.inner.put(key, image)
    }

    fn get(&self, key: &str) -> Option<DecodedImage> {
        self.inner.get(key)
    }

    fn remove(&self, key: &str) -> Option<DecodedImage> {
        self.inner.remove(key)
    }

    fn clear(&self) {
        self.clears.fetch_add(1, Ordering::SeqCst);
        self.inner.clear();
    }

    fn keys(&self) -> Vec<String> {
        self.inner.keys()
    }
}

/// Reports out of memory for the first `failures` decodes
pub struct FlakyDecoder {
    failures: usize,
    pub attempts: AtomicUsize,
    /// `clears` observed on the cache at each attempt
    pub clears_seen: Mutex<Vec<usize>>,
    cache: Arc<CountingCache>,
    inner: DefaultImageDecoder,
}

impl FlakyDecoder {
    pub fn new(failures: usize, cache: Arc<CountingCache>) -> Arc<Self> {
        Arc::new(Self {
            failures,
            attempts: AtomicUsize::new(0),
            clears_seen: Mutex::new(Vec::new()),
            cache,
            inner: DefaultImageDecoder::new(),
        })
    }
}

impl ImageDecoder for FlakyDecoder {
    fn decode(&self, bytes: &[u8], request: &DecodeRequest) -> Result<DecodedImage, DecodeError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        self.clears_seen
            .lock()
            .push(self.cache.clears.load(Ordering::SeqCst));
        if attempt < self.failures {
            return Err(DecodeError::OutOfMemory);
        }
        self.inner.decode(bytes, request)
    }
}

/// Records every lifecycle callback as text
#[derive(Default)]
pub struct Recorder {
    pub events: Mutex<Vec<String>>,
    pub images: Mutex<Vec<DecodedImage>>,
    pub failures: Mutex<Vec<FailReason>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn terminal_count(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| !event.starts_with("started"))
            .count()
    }
}

impl LoadingListener for Recorder {
    fn on_started(&self, uri: &str) {
        self.events.lock().push(format!("started {uri}"));
    }

    fn on_complete(&self, uri: &str, image: Option<&DecodedImage>) {
        if let Some(image) = image {
            self.images.lock().push(image.clone());
        }
        self.events.lock().push(format!("complete {uri}"));
    }

    fn on_failed(&self, uri: &str, reason: &FailReason) {
        self.failures.lock().push(reason.clone());
        self.events.lock().push(format!("failed {uri}"));
    }

    fn on_cancelled(&self, uri: &str) {
        self.events.lock().push(format!("cancelled {uri}"));
    }
}

/// Target that remembers everything it was asked to show
pub struct TestTarget {
    id: TargetId,
    size: ImageSize,
    pub shown: Mutex<Vec<Option<DecodedImage>>>,
}

impl TestTarget {
    pub fn new(size: ImageSize) -> Arc<Self> {
        Arc::new(Self {
            id: next_target_id(),
            size,
            shown: Mutex::new(Vec::new()),
        })
    }

    pub fn current(&self) -> Option<DecodedImage> {
        self.shown.lock().last().cloned().flatten()
    }

    pub fn shown_widths(&self) -> Vec<u32> {
        self.shown
            .lock()
            .iter()
            .flatten()
            .map(DecodedImage::width)
            .collect()
    }
}

impl DisplayTarget for TestTarget {
    fn id(&self) -> TargetId {
        self.id
    }

    fn size_hint(&self) -> ImageSize {
        self.size
    }

    fn set_image(&self, image: Option<DecodedImage>) {
        self.shown.lock().push(image);
    }
}

/// Builder with a temp disk cache and a small explicit memory budget
pub fn test_config(dir: &TempDir, source: Arc<FakeSource>) -> ConfigurationBuilder {
    ConfigurationBuilder::new()
        .disk_cache_dir(dir.path())
        .memory_cache_size(16 * 1024 * 1024)
        .thread_pool_size(3)
        .oom_retry_delay(Duration::from_millis(10))
        .downloader(source)
}
