//! Image Loader Cache Library
//!
//! Two-tier image cache: a byte-bounded in-memory LRU of decoded images and a
//! journaled on-disk LRU of encoded bytes, plus the key namers that map
//! resource identifiers to disk cache file names.

pub mod disk;
pub mod image;
pub mod key;
pub mod memory;

pub use disk::{DiskCache, DiskCacheStats, Editor, EvictionPolicy, LruDiskCache, Snapshot};
pub use image::{DecodedImage, PixelFormat};
pub use key::{HashCodeKeyNamer, KeyNamer, Sha256KeyNamer};
pub use memory::{
    memory_cache_key, uri_of_key, CacheStats, FuzzyKeyMemoryCache, LruMemoryCache, MemoryCache,
};
