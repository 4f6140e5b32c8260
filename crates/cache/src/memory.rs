//! In-memory image cache with LRU eviction
//!
//! Holds decoded images keyed by memory cache key (`"{uri}_{width}x{height}"`).
//! Entries are evicted least-recently-used first once the cumulative byte size
//! would exceed the configured limit.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::image::DecodedImage;

const KEY_SIZE_SEPARATOR: char = '_';
const DIMENSION_SEPARATOR: char = 'x';

/// Build the memory cache key for an identifier decoded at the given size.
pub fn memory_cache_key(uri: &str, width: u32, height: u32) -> String {
    format!("{uri}{KEY_SIZE_SEPARATOR}{width}{DIMENSION_SEPARATOR}{height}")
}

/// Strip the size suffix from a memory cache key, leaving the identifier.
pub fn uri_of_key(key: &str) -> &str {
    match key.rfind(KEY_SIZE_SEPARATOR) {
        Some(pos) => &key[..pos],
        None => key,
    }
}

/// A bounded key → decoded image store shared by all loader threads.
pub trait MemoryCache: Send + Sync {
    /// Store an image. Returns false if the image was not cached.
    fn put(&self, key: &str, image: DecodedImage) -> bool;

    /// Get a live image, or `None` if absent or already recycled.
    fn get(&self, key: &str) -> Option<DecodedImage>;

    /// Remove an entry from the table and return it.
    fn remove(&self, key: &str) -> Option<DecodedImage>;

    /// Drop every entry.
    fn clear(&self);

    /// Snapshot of the keys currently stored.
    fn keys(&self) -> Vec<String>;
}

impl<C: MemoryCache + ?Sized> MemoryCache for Arc<C> {
    fn put(&self, key: &str, image: DecodedImage) -> bool {
        (**self).put(key, image)
    }

    fn get(&self, key: &str) -> Option<DecodedImage> {
        (**self).get(key)
    }

    fn remove(&self, key: &str) -> Option<DecodedImage> {
        (**self).remove(key)
    }

    fn clear(&self) {
        (**self).clear()
    }

    fn keys(&self) -> Vec<String> {
        (**self).keys()
    }
}

/// Statistics about memory cache usage
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    /// Number of images currently in cache
    pub entry_count: usize,

    /// Total bytes used by cached images
    pub memory_used: usize,

    /// Maximum bytes allowed
    pub memory_limit: usize,

    pub hits: u64,
    pub misses: u64,

    /// Number of images evicted to make room
    pub evictions: u64,

    /// Number of puts rejected because the image alone exceeded the limit
    pub rejected: u64,
}

impl CacheStats {
    /// Calculate the cache hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Calculate memory utilization (0.0 to 1.0)
    pub fn memory_utilization(&self) -> f64 {
        if self.memory_limit == 0 {
            0.0
        } else {
            self.memory_used as f64 / self.memory_limit as f64
        }
    }
}

struct CacheState {
    images: HashMap<String, DecodedImage>,

    /// Most recently used at back, least recently used at front
    lru_queue: VecDeque<String>,

    memory_used: usize,
    memory_limit: usize,
    stats: CacheStats,
}

impl CacheState {
    fn new(memory_limit: usize) -> Self {
        Self {
            images: HashMap::new(),
            lru_queue: VecDeque::new(),
            memory_used: 0,
            memory_limit,
            stats: CacheStats {
                memory_limit,
                ..Default::default()
            },
        }
    }

    /// Move a key to the back of the LRU queue
    fn touch(&mut self, key: &str) {
        if let Some(pos) = self.lru_queue.iter().position(|k| k == key) {
            if let Some(k) = self.lru_queue.remove(pos) {
                self.lru_queue.push_back(k);
            }
        } else {
            self.lru_queue.push_back(key.to_string());
        }
    }

    fn take(&mut self, key: &str) -> Option<DecodedImage> {
        let image = self.images.remove(key)?;
        self.memory_used = self.memory_used.saturating_sub(image.byte_size());
        self.lru_queue.retain(|k| k != key);
        self.sync_stats();
        Some(image)
    }

    fn evict_lru(&mut self) -> Option<DecodedImage> {
        let key = self.lru_queue.pop_front()?;
        let image = self.images.remove(&key)?;
        self.memory_used = self.memory_used.saturating_sub(image.byte_size());
        self.stats.evictions += 1;
        self.sync_stats();
        trace!(key = %key, bytes = image.byte_size(), "Evicted image from memory cache");
        Some(image)
    }

    /// Evict images until `required_size` more bytes fit under the limit
    fn evict_to_fit(&mut self, required_size: usize) {
        while self.memory_used + required_size > self.memory_limit && !self.images.is_empty() {
            if self.evict_lru().is_none() {
                break;
            }
        }
    }

    fn sync_stats(&mut self) {
        self.stats.entry_count = self.images.len();
        self.stats.memory_used = self.memory_used;
    }
}

/// Memory cache with a byte limit and strict LRU eviction.
///
/// Recency is updated on both `get` and `put`. Eviction follows access order,
/// never size order. An image larger than the whole limit is rejected and the
/// cache is left untouched.
///
/// ```
/// use image_loader_cache::{DecodedImage, LruMemoryCache, MemoryCache, PixelFormat};
///
/// let cache = LruMemoryCache::new(1024 * 1024);
/// let image = DecodedImage::blank(64, 64, PixelFormat::Argb8888);
/// assert!(cache.put("http://example.com/a.png_64x64", image));
/// assert!(cache.get("http://example.com/a.png_64x64").is_some());
/// ```
pub struct LruMemoryCache {
    state: Mutex<CacheState>,
}

impl LruMemoryCache {
    /// Create a cache holding at most `memory_limit` bytes of decoded pixels
    pub fn new(memory_limit: usize) -> Self {
        Self {
            state: Mutex::new(CacheState::new(memory_limit)),
        }
    }

    pub fn with_mb_limit(megabytes: usize) -> Self {
        Self::new(megabytes * 1024 * 1024)
    }

    /// Check for a key without updating LRU tracking
    pub fn contains(&self, key: &str) -> bool {
        self.state.lock().images.contains_key(key)
    }

    pub fn stats(&self) -> CacheStats {
        self.state.lock().stats
    }

    /// Update the byte limit, evicting if current usage no longer fits
    pub fn set_memory_limit(&self, new_limit: usize) {
        let mut state = self.state.lock();
        state.memory_limit = new_limit;
        state.stats.memory_limit = new_limit;
        if state.memory_used > new_limit {
            state.evict_to_fit(0);
        }
    }

    pub fn memory_limit(&self) -> usize {
        self.state.lock().memory_limit
    }

    pub fn memory_used(&self) -> usize {
        self.state.lock().memory_used
    }

    pub fn len(&self) -> usize {
        self.state.lock().images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MemoryCache for LruMemoryCache {
    fn put(&self, key: &str, image: DecodedImage) -> bool {
        let mut state = self.state.lock();

        let size = image.byte_size();
        if size > state.memory_limit {
            state.stats.rejected += 1;
            trace!(key, bytes = size, limit = state.memory_limit, "Image exceeds memory cache limit");
            return false;
        }

        state.take(key);
        state.evict_to_fit(size);

        state.memory_used += size;
        state.images.insert(key.to_string(), image);
        state.touch(key);
        state.sync_stats();
        true
    }

    fn get(&self, key: &str) -> Option<DecodedImage> {
        let mut state = self.state.lock();

        match state.images.get(key).cloned() {
            Some(image) if image.is_recycled() => {
                state.take(key);
                state.stats.misses += 1;
                None
            }
            Some(image) => {
                state.touch(key);
                state.stats.hits += 1;
                Some(image)
            }
            None => {
                state.stats.misses += 1;
                None
            }
        }
    }

    fn remove(&self, key: &str) -> Option<DecodedImage> {
        self.state.lock().take(key)
    }

    fn clear(&self) {
        let mut state = self.state.lock();
        state.images.clear();
        state.lru_queue.clear();
        state.memory_used = 0;
        state.sync_stats();
    }

    fn keys(&self) -> Vec<String> {
        self.state.lock().lru_queue.iter().cloned().collect()
    }
}

impl Default for LruMemoryCache {
    /// Create a cache with a 4MB limit
    fn default() -> Self {
        Self::with_mb_limit(4)
    }
}

/// Keeps at most one decoded size per identifier.
///
/// Once a new image is stored, every other entry whose key names the same
/// identifier (ignoring the size suffix) is removed from the wrapped cache.
/// A rejected put leaves the existing sizes alone.
pub struct FuzzyKeyMemoryCache<C> {
    inner: C,
}

impl<C: MemoryCache> FuzzyKeyMemoryCache<C> {
    pub fn new(inner: C) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }
}

impl<C: MemoryCache> MemoryCache for FuzzyKeyMemoryCache<C> {
    fn put(&self, key: &str, image: DecodedImage) -> bool {
        if !self.inner.put(key, image) {
            return false;
        }
        let uri = uri_of_key(key);
        for existing in self.inner.keys() {
            if existing != key && uri_of_key(&existing) == uri {
                self.inner.remove(&existing);
            }
        }
        true
    }

    fn get(&self, key: &str) -> Option<DecodedImage> {
        self.inner.get(key)
    }

    fn remove(&self, key: &str) -> Option<DecodedImage> {
        self.inner.remove(key)
    }

    fn clear(&self) {
        self.inner.clear()
    }

    fn keys(&self) -> Vec<String> {
        self.inner.keys()
    }
}
