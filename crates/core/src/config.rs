//! Loader configuration
//!
//! [`LoaderSettings`] is the plain-data part: sizes, counts, flags. It can be
//! read from environment variables or a TOML file. [`ConfigurationBuilder`]
//! combines settings with pluggable components (caches, downloader,
//! decoder) into the runtime [`Configuration`] the loader runs on.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use image_loader_cache::{
    DiskCache, EvictionPolicy, FuzzyKeyMemoryCache, HashCodeKeyNamer, KeyNamer, LruDiskCache,
    LruMemoryCache, MemoryCache, Sha256KeyNamer,
};
use image_loader_scheduler::{QueueOrder, MAX_THREAD_PRIORITY, MIN_THREAD_PRIORITY};
use serde::{Deserialize, Serialize};
use sysinfo::System;
use tracing::{debug, warn};

use crate::decode::{DefaultImageDecoder, ImageDecoder};
use crate::download::{
    BaseImageDownloader, ImageDownloader, NetworkDeniedDownloader, SlowNetworkDownloader,
};
use crate::error::ConfigError;
use crate::options::{DisplayOptions, ImageSize};

pub const DEFAULT_THREAD_POOL_SIZE: usize = 4;
pub const DEFAULT_THREAD_PRIORITY: u8 = 4;
pub const DEFAULT_MEMORY_CACHE_PERCENT: u8 = 25;
/// Memory cache budget when available memory can't be determined
pub const FALLBACK_MEMORY_CACHE_SIZE: usize = 4 * 1024 * 1024;
pub const DEFAULT_OOM_RETRY_DELAY: Duration = Duration::from_millis(1000);

/// Order in which queued loads are picked up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingOrder {
    #[default]
    Fifo,
    Lifo,
}

impl From<ProcessingOrder> for QueueOrder {
    fn from(order: ProcessingOrder) -> Self {
        match order {
            ProcessingOrder::Fifo => QueueOrder::Fifo,
            ProcessingOrder::Lifo => QueueOrder::Lifo,
        }
    }
}

impl FromStr for ProcessingOrder {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "fifo" => Ok(ProcessingOrder::Fifo),
            "lifo" => Ok(ProcessingOrder::Lifo),
            _ => Err(ConfigError::InvalidValue("processing_order".to_string())),
        }
    }
}

/// Built-in disk cache file naming schemes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyNamerKind {
    #[default]
    HashCode,
    Sha256,
}

impl KeyNamerKind {
    fn create(self) -> Box<dyn KeyNamer> {
        match self {
            KeyNamerKind::HashCode => Box::new(HashCodeKeyNamer),
            KeyNamerKind::Sha256 => Box::new(Sha256KeyNamer),
        }
    }
}

/// Returns the default disk cache directory
fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|dir| dir.join("image-loader"))
        .unwrap_or_else(|| PathBuf::from("cache/image-loader"))
}

/// Plain-data loader settings.
///
/// Zero sizes and counts mean "not set".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderSettings {
    /// Explicit memory cache budget in bytes; overrides the percentage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_cache_size: Option<usize>,

    /// Share of available memory given to the memory cache, 1..=99
    pub memory_cache_percent: u8,

    /// Disk cache byte budget
    pub disk_cache_size: u64,

    /// Disk cache entry budget
    pub disk_cache_file_count: usize,

    /// Drop disk cache entries older than this
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk_cache_max_age_secs: Option<u64>,

    pub disk_cache_dir: PathBuf,

    /// Bumping this discards the existing disk cache on open
    pub app_version: u32,

    pub key_namer: KeyNamerKind,

    pub thread_pool_size: usize,

    /// Worker priority hint, clamped to 1..=10
    pub thread_priority: u8,

    pub processing_order: ProcessingOrder,

    /// Retry decodes that run out of memory, shedding cache between attempts
    pub handle_out_of_memory: bool,

    /// Base pause before an out-of-memory retry; multiplied by the attempt
    pub oom_retry_delay_ms: u64,

    /// Log per-task progress
    pub logging_enabled: bool,

    /// Keep only one decoded size per uri in the memory cache
    pub deny_multiple_sizes_in_memory: bool,

    /// Decode bound used when the target has no size hint
    pub max_image_width_for_memory_cache: u32,
    pub max_image_height_for_memory_cache: u32,

    /// When set, downloaded images are shrunk to this bound before being
    /// written to the disk cache
    pub max_image_width_for_disk_cache: u32,
    pub max_image_height_for_disk_cache: u32,
}

impl Default for LoaderSettings {
    fn default() -> Self {
        Self {
            memory_cache_size: None,
            memory_cache_percent: DEFAULT_MEMORY_CACHE_PERCENT,
            disk_cache_size: 0,
            disk_cache_file_count: 0,
            disk_cache_max_age_secs: None,
            disk_cache_dir: default_cache_dir(),
            app_version: 1,
            key_namer: KeyNamerKind::default(),
            thread_pool_size: DEFAULT_THREAD_POOL_SIZE,
            thread_priority: DEFAULT_THREAD_PRIORITY,
            processing_order: ProcessingOrder::default(),
            handle_out_of_memory: true,
            oom_retry_delay_ms: DEFAULT_OOM_RETRY_DELAY.as_millis() as u64,
            logging_enabled: false,
            deny_multiple_sizes_in_memory: false,
            max_image_width_for_memory_cache: 0,
            max_image_height_for_memory_cache: 0,
            max_image_width_for_disk_cache: 0,
            max_image_height_for_disk_cache: 0,
        }
    }
}

fn env_value<T: FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(name.to_string())),
        Err(_) => Ok(None),
    }
}

impl LoaderSettings {
    /// Defaults overridden by `IMAGE_LOADER_*` environment variables
    ///
    /// - `IMAGE_LOADER_MEMORY_CACHE_MB`
    /// - `IMAGE_LOADER_MEMORY_CACHE_PERCENT`
    /// - `IMAGE_LOADER_DISK_CACHE_MB`
    /// - `IMAGE_LOADER_DISK_CACHE_FILE_COUNT`
    /// - `IMAGE_LOADER_DISK_CACHE_MAX_AGE_SECS`
    /// - `IMAGE_LOADER_CACHE_DIR`
    /// - `IMAGE_LOADER_THREAD_POOL_SIZE`
    /// - `IMAGE_LOADER_THREAD_PRIORITY`
    /// - `IMAGE_LOADER_PROCESSING_ORDER` (`fifo` or `lifo`)
    /// - `IMAGE_LOADER_LOGGING` (`true` or `false`)
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut settings = Self::default();

        if let Some(mb) = env_value::<usize>("IMAGE_LOADER_MEMORY_CACHE_MB")? {
            settings.memory_cache_size = Some(mb * 1024 * 1024);
        }
        if let Some(percent) = env_value("IMAGE_LOADER_MEMORY_CACHE_PERCENT")? {
            settings.memory_cache_percent = percent;
        }
        if let Some(mb) = env_value::<u64>("IMAGE_LOADER_DISK_CACHE_MB")? {
            settings.disk_cache_size = mb * 1024 * 1024;
        }
        if let Some(count) = env_value("IMAGE_LOADER_DISK_CACHE_FILE_COUNT")? {
            settings.disk_cache_file_count = count;
        }
        if let Some(secs) = env_value("IMAGE_LOADER_DISK_CACHE_MAX_AGE_SECS")? {
            settings.disk_cache_max_age_secs = Some(secs);
        }
        if let Ok(dir) = std::env::var("IMAGE_LOADER_CACHE_DIR") {
            settings.disk_cache_dir = PathBuf::from(dir);
        }
        if let Some(size) = env_value("IMAGE_LOADER_THREAD_POOL_SIZE")? {
            settings.thread_pool_size = size;
        }
        if let Some(priority) = env_value("IMAGE_LOADER_THREAD_PRIORITY")? {
            settings.thread_priority = priority;
        }
        if let Some(order) = env_value("IMAGE_LOADER_PROCESSING_ORDER")? {
            settings.processing_order = order;
        }
        if let Some(enabled) = env_value("IMAGE_LOADER_LOGGING")? {
            settings.logging_enabled = enabled;
        }

        Ok(settings)
    }

    /// Load settings from a TOML file. Missing keys keep their defaults.
    ///
    /// ```toml
    /// memory_cache_percent = 20
    /// disk_cache_size = 52428800
    /// thread_pool_size = 3
    /// processing_order = "lifo"
    /// key_namer = "sha256"
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(toml_str: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml_str).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        fs::write(path.as_ref(), self.to_toml_string()?)?;
        Ok(())
    }

    /// Reject settings the loader can't run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=99).contains(&self.memory_cache_percent) {
            return Err(ConfigError::InvalidValue("memory_cache_percent".to_string()));
        }
        if self.thread_pool_size == 0 {
            return Err(ConfigError::InvalidValue("thread_pool_size".to_string()));
        }
        Ok(())
    }

    /// Memory cache budget in bytes
    pub fn memory_cache_budget(&self) -> usize {
        if let Some(bytes) = self.memory_cache_size {
            return bytes;
        }

        let mut system = System::new();
        system.refresh_memory();
        let available = system.available_memory();
        if available == 0 {
            return FALLBACK_MEMORY_CACHE_SIZE;
        }
        let budget = available / 100 * u64::from(self.memory_cache_percent);
        usize::try_from(budget).unwrap_or(usize::MAX)
    }

    /// Disk eviction policy: size wins over file count, file count over age
    pub fn disk_eviction_policy(&self) -> EvictionPolicy {
        if self.disk_cache_size > 0 {
            EvictionPolicy::TotalSize(self.disk_cache_size)
        } else if self.disk_cache_file_count > 0 {
            EvictionPolicy::FileCount(self.disk_cache_file_count)
        } else if let Some(secs) = self.disk_cache_max_age_secs {
            EvictionPolicy::MaxAge(Duration::from_secs(secs))
        } else {
            EvictionPolicy::default()
        }
    }

    pub fn thread_priority_clamped(&self) -> u8 {
        self.thread_priority.clamp(MIN_THREAD_PRIORITY, MAX_THREAD_PRIORITY)
    }
}

/// Runtime configuration shared by the loader, its engine and its tasks
pub struct Configuration {
    memory_cache: Arc<dyn MemoryCache>,
    disk_cache: Arc<dyn DiskCache>,
    downloader: Arc<dyn ImageDownloader>,
    network_denied_downloader: Arc<dyn ImageDownloader>,
    slow_network_downloader: Arc<dyn ImageDownloader>,
    decoder: Arc<dyn ImageDecoder>,
    default_display_options: DisplayOptions,
    thread_pool_size: usize,
    thread_priority: u8,
    processing_order: QueueOrder,
    handle_out_of_memory: bool,
    oom_retry_delay: Duration,
    logging_enabled: bool,
    max_image_size_for_memory_cache: ImageSize,
    max_image_size_for_disk_cache: ImageSize,
}

impl Configuration {
    pub fn builder() -> ConfigurationBuilder {
        ConfigurationBuilder::new()
    }

    pub fn memory_cache(&self) -> &Arc<dyn MemoryCache> {
        &self.memory_cache
    }

    pub fn disk_cache(&self) -> &Arc<dyn DiskCache> {
        &self.disk_cache
    }

    pub fn downloader(&self) -> &Arc<dyn ImageDownloader> {
        &self.downloader
    }

    pub fn network_denied_downloader(&self) -> &Arc<dyn ImageDownloader> {
        &self.network_denied_downloader
    }

    pub fn slow_network_downloader(&self) -> &Arc<dyn ImageDownloader> {
        &self.slow_network_downloader
    }

    pub fn decoder(&self) -> &Arc<dyn ImageDecoder> {
        &self.decoder
    }

    pub fn default_display_options(&self) -> &DisplayOptions {
        &self.default_display_options
    }

    pub fn thread_pool_size(&self) -> usize {
        self.thread_pool_size
    }

    pub fn thread_priority(&self) -> u8 {
        self.thread_priority
    }

    pub fn processing_order(&self) -> QueueOrder {
        self.processing_order
    }

    pub fn handle_out_of_memory(&self) -> bool {
        self.handle_out_of_memory
    }

    pub fn oom_retry_delay(&self) -> Duration {
        self.oom_retry_delay
    }

    pub fn logging_enabled(&self) -> bool {
        self.logging_enabled
    }

    pub fn max_image_size_for_memory_cache(&self) -> ImageSize {
        self.max_image_size_for_memory_cache
    }

    pub fn max_image_size_for_disk_cache(&self) -> ImageSize {
        self.max_image_size_for_disk_cache
    }
}

/// Builder for [`Configuration`].
///
/// ```no_run
/// use image_loader_core::{Configuration, ProcessingOrder};
///
/// let config = Configuration::builder()
///     .thread_pool_size(3)
///     .processing_order(ProcessingOrder::Lifo)
///     .memory_cache_size(8 * 1024 * 1024)
///     .disk_cache_size(50 * 1024 * 1024)
///     .build()?;
/// assert_eq!(config.thread_pool_size(), 3);
/// # Ok::<(), image_loader_core::ConfigError>(())
/// ```
pub struct ConfigurationBuilder {
    settings: LoaderSettings,
    memory_size_set: bool,
    disk_size_set: bool,
    key_namer_set: bool,
    key_namer: Option<Box<dyn KeyNamer>>,
    memory_cache: Option<Arc<dyn MemoryCache>>,
    disk_cache: Option<Arc<dyn DiskCache>>,
    downloader: Option<Arc<dyn ImageDownloader>>,
    decoder: Option<Arc<dyn ImageDecoder>>,
    default_display_options: Option<DisplayOptions>,
}

impl Default for ConfigurationBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigurationBuilder {
    pub fn new() -> Self {
        Self::from_settings(LoaderSettings::default())
    }

    pub fn from_settings(settings: LoaderSettings) -> Self {
        let defaults = LoaderSettings::default();
        let memory_size_set = settings.memory_cache_size.is_some()
            || settings.memory_cache_percent != defaults.memory_cache_percent;
        let disk_size_set = settings.disk_cache_size > 0 || settings.disk_cache_file_count > 0;
        let key_namer_set = settings.key_namer != defaults.key_namer;

        Self {
            settings,
            memory_size_set,
            disk_size_set,
            key_namer_set,
            key_namer: None,
            memory_cache: None,
            disk_cache: None,
            downloader: None,
            decoder: None,
            default_display_options: None,
        }
    }

    pub fn thread_pool_size(mut self, size: usize) -> Self {
        self.settings.thread_pool_size = size;
        self
    }

    pub fn thread_priority(mut self, priority: u8) -> Self {
        self.settings.thread_priority = priority;
        self
    }

    pub fn processing_order(mut self, order: ProcessingOrder) -> Self {
        self.settings.processing_order = order;
        self
    }

    /// Memory cache budget in bytes
    pub fn memory_cache_size(mut self, bytes: usize) -> Self {
        self.settings.memory_cache_size = Some(bytes);
        self.memory_size_set = true;
        self
    }

    /// Memory cache budget as a share of available memory
    pub fn memory_cache_percent(mut self, percent: u8) -> Self {
        self.settings.memory_cache_percent = percent;
        self.settings.memory_cache_size = None;
        self.memory_size_set = true;
        self
    }

    pub fn disk_cache_size(mut self, bytes: u64) -> Self {
        self.settings.disk_cache_size = bytes;
        self.disk_size_set = true;
        self
    }

    pub fn disk_cache_file_count(mut self, count: usize) -> Self {
        self.settings.disk_cache_file_count = count;
        self.disk_size_set = true;
        self
    }

    pub fn disk_cache_max_age(mut self, age: Duration) -> Self {
        self.settings.disk_cache_max_age_secs = Some(age.as_secs());
        self
    }

    pub fn disk_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.settings.disk_cache_dir = dir.into();
        self
    }

    pub fn app_version(mut self, version: u32) -> Self {
        self.settings.app_version = version;
        self
    }

    pub fn key_namer(mut self, namer: impl KeyNamer + 'static) -> Self {
        self.key_namer = Some(Box::new(namer));
        self.key_namer_set = true;
        self
    }

    pub fn handle_out_of_memory(mut self, enabled: bool) -> Self {
        self.settings.handle_out_of_memory = enabled;
        self
    }

    pub fn oom_retry_delay(mut self, delay: Duration) -> Self {
        self.settings.oom_retry_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn logging(mut self, enabled: bool) -> Self {
        self.settings.logging_enabled = enabled;
        self
    }

    pub fn deny_multiple_sizes_in_memory(mut self, deny: bool) -> Self {
        self.settings.deny_multiple_sizes_in_memory = deny;
        self
    }

    pub fn max_image_size_for_memory_cache(mut self, width: u32, height: u32) -> Self {
        self.settings.max_image_width_for_memory_cache = width;
        self.settings.max_image_height_for_memory_cache = height;
        self
    }

    pub fn max_image_size_for_disk_cache(mut self, width: u32, height: u32) -> Self {
        self.settings.max_image_width_for_disk_cache = width;
        self.settings.max_image_height_for_disk_cache = height;
        self
    }

    /// Use this memory cache instead of a default one
    pub fn memory_cache(mut self, cache: impl MemoryCache + 'static) -> Self {
        self.memory_cache = Some(Arc::new(cache));
        self
    }

    /// Use this disk cache instead of opening one in `disk_cache_dir`
    pub fn disk_cache(mut self, cache: impl DiskCache + 'static) -> Self {
        self.disk_cache = Some(Arc::new(cache));
        self
    }

    /// Normal byte source. The network-denied and slow-network variants wrap it.
    pub fn downloader(mut self, downloader: impl ImageDownloader + 'static) -> Self {
        self.downloader = Some(Arc::new(downloader));
        self
    }

    pub fn decoder(mut self, decoder: impl ImageDecoder + 'static) -> Self {
        self.decoder = Some(Arc::new(decoder));
        self
    }

    /// Options used by requests that don't bring their own
    pub fn default_display_options(mut self, options: DisplayOptions) -> Self {
        self.default_display_options = Some(options);
        self
    }

    pub fn build(self) -> Result<Configuration, ConfigError> {
        let settings = self.settings;
        settings.validate()?;

        let memory_cache: Arc<dyn MemoryCache> = match self.memory_cache {
            Some(cache) => {
                if self.memory_size_set {
                    warn!("Explicit memory cache set; memory cache size settings are ignored");
                }
                cache
            }
            None => {
                let budget = settings.memory_cache_budget();
                debug!(bytes = budget, "Creating memory cache");
                let cache = LruMemoryCache::new(budget);
                if settings.deny_multiple_sizes_in_memory {
                    Arc::new(FuzzyKeyMemoryCache::new(cache))
                } else {
                    Arc::new(cache)
                }
            }
        };

        let disk_cache: Arc<dyn DiskCache> = match self.disk_cache {
            Some(cache) => {
                if self.disk_size_set {
                    warn!("Explicit disk cache set; disk cache size settings are ignored");
                }
                if self.key_namer_set {
                    warn!("Explicit disk cache set; key namer setting is ignored");
                }
                cache
            }
            None => {
                let namer = self
                    .key_namer
                    .unwrap_or_else(|| settings.key_namer.create());
                let cache = LruDiskCache::open(
                    &settings.disk_cache_dir,
                    settings.app_version,
                    settings.disk_eviction_policy(),
                    namer,
                )?;
                Arc::new(cache)
            }
        };

        let downloader: Arc<dyn ImageDownloader> = self
            .downloader
            .unwrap_or_else(|| Arc::new(BaseImageDownloader::new()));
        let network_denied_downloader: Arc<dyn ImageDownloader> =
            Arc::new(NetworkDeniedDownloader::new(downloader.clone()));
        let slow_network_downloader: Arc<dyn ImageDownloader> =
            Arc::new(SlowNetworkDownloader::new(downloader.clone()));

        Ok(Configuration {
            memory_cache,
            disk_cache,
            downloader,
            network_denied_downloader,
            slow_network_downloader,
            decoder: self
                .decoder
                .unwrap_or_else(|| Arc::new(DefaultImageDecoder::new())),
            default_display_options: self.default_display_options.unwrap_or_default(),
            thread_pool_size: settings.thread_pool_size,
            thread_priority: settings.thread_priority_clamped(),
            processing_order: settings.processing_order.into(),
            handle_out_of_memory: settings.handle_out_of_memory,
            oom_retry_delay: Duration::from_millis(settings.oom_retry_delay_ms),
            logging_enabled: settings.logging_enabled,
            max_image_size_for_memory_cache: ImageSize::new(
                settings.max_image_width_for_memory_cache,
                settings.max_image_height_for_memory_cache,
            ),
            max_image_size_for_disk_cache: ImageSize::new(
                settings.max_image_width_for_disk_cache,
                settings.max_image_height_for_disk_cache,
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image_loader_cache::{memory_cache_key, DecodedImage, PixelFormat};
    use serial_test::serial;
    use tempfile::TempDir;

    const ENV_VARS: [&str; 10] = [
        "IMAGE_LOADER_MEMORY_CACHE_MB",
        "IMAGE_LOADER_MEMORY_CACHE_PERCENT",
        "IMAGE_LOADER_DISK_CACHE_MB",
        "IMAGE_LOADER_DISK_CACHE_FILE_COUNT",
        "IMAGE_LOADER_DISK_CACHE_MAX_AGE_SECS",
        "IMAGE_LOADER_CACHE_DIR",
        "IMAGE_LOADER_THREAD_POOL_SIZE",
        "IMAGE_LOADER_THREAD_PRIORITY",
        "IMAGE_LOADER_PROCESSING_ORDER",
        "IMAGE_LOADER_LOGGING",
    ];

    /// Clears the loader's environment variables and restores them on drop
    struct EnvGuard {
        saved: Vec<(&'static str, Option<String>)>,
    }

    impl EnvGuard {
        fn new() -> Self {
            let saved = ENV_VARS
                .iter()
                .map(|name| (*name, std::env::var(name).ok()))
                .collect();
            for name in ENV_VARS {
                std::env::remove_var(name);
            }
            Self { saved }
        }

        fn set(&self, name: &str, value: &str) {
            std::env::set_var(name, value);
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (name, value) in &self.saved {
                match value {
                    Some(value) => std::env::set_var(name, value),
                    None => std::env::remove_var(name),
                }
            }
        }
    }

    fn temp_builder() -> (TempDir, ConfigurationBuilder) {
        let dir = TempDir::new().unwrap();
        let builder = ConfigurationBuilder::new()
            .disk_cache_dir(dir.path())
            .memory_cache_size(1024 * 1024);
        (dir, builder)
    }

    #[test]
    fn test_default_settings() {
        let settings = LoaderSettings::default();
        assert_eq!(settings.memory_cache_percent, 25);
        assert_eq!(settings.thread_pool_size, 4);
        assert_eq!(settings.thread_priority, 4);
        assert_eq!(settings.processing_order, ProcessingOrder::Fifo);
        assert_eq!(settings.key_namer, KeyNamerKind::HashCode);
        assert!(settings.handle_out_of_memory);
        assert!(!settings.logging_enabled);
        assert!(!settings.deny_multiple_sizes_in_memory);
        assert!(settings.disk_cache_dir.ends_with("image-loader"));
        assert!(settings.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        let env = EnvGuard::new();
        env.set("IMAGE_LOADER_MEMORY_CACHE_MB", "16");
        env.set("IMAGE_LOADER_DISK_CACHE_MB", "100");
        env.set("IMAGE_LOADER_CACHE_DIR", "/tmp/image-loader-test");
        env.set("IMAGE_LOADER_THREAD_POOL_SIZE", "2");
        env.set("IMAGE_LOADER_PROCESSING_ORDER", "LIFO");
        env.set("IMAGE_LOADER_LOGGING", "true");

        let settings = LoaderSettings::from_env().unwrap();
        assert_eq!(settings.memory_cache_size, Some(16 * 1024 * 1024));
        assert_eq!(settings.disk_cache_size, 100 * 1024 * 1024);
        assert_eq!(settings.disk_cache_dir, PathBuf::from("/tmp/image-loader-test"));
        assert_eq!(settings.thread_pool_size, 2);
        assert_eq!(settings.processing_order, ProcessingOrder::Lifo);
        assert!(settings.logging_enabled);
    }

    #[test]
    #[serial]
    fn test_from_env_invalid_value() {
        let env = EnvGuard::new();
        env.set("IMAGE_LOADER_THREAD_POOL_SIZE", "many");

        match LoaderSettings::from_env() {
            Err(ConfigError::InvalidValue(name)) => {
                assert_eq!(name, "IMAGE_LOADER_THREAD_POOL_SIZE")
            }
            other => panic!("expected InvalidValue, got {other:?}"),
        }
    }

    #[test]
    #[serial]
    fn test_from_env_defaults_when_unset() {
        let _env = EnvGuard::new();
        let settings = LoaderSettings::from_env().unwrap();
        assert_eq!(settings, LoaderSettings::default());
    }

    #[test]
    fn test_toml_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("loader.toml");

        let settings = LoaderSettings {
            memory_cache_size: Some(2048),
            disk_cache_file_count: 50,
            disk_cache_max_age_secs: Some(3600),
            key_namer: KeyNamerKind::Sha256,
            processing_order: ProcessingOrder::Lifo,
            ..LoaderSettings::default()
        };
        settings.save_to_file(&path).unwrap();

        let loaded = LoaderSettings::from_file(&path).unwrap();
        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_toml_partial_and_invalid() {
        let settings = LoaderSettings::from_toml_str(
            "thread_pool_size = 3\nkey_namer = \"sha256\"\nprocessing_order = \"lifo\"\n",
        )
        .unwrap();
        assert_eq!(settings.thread_pool_size, 3);
        assert_eq!(settings.key_namer, KeyNamerKind::Sha256);
        assert_eq!(settings.memory_cache_percent, 25);

        assert!(matches!(
            LoaderSettings::from_toml_str("thread_pool_size = \"three\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_memory_percent_validation() {
        for percent in [0, 100] {
            let settings = LoaderSettings {
                memory_cache_percent: percent,
                ..LoaderSettings::default()
            };
            assert!(matches!(
                settings.validate(),
                Err(ConfigError::InvalidValue(_))
            ));
        }

        let (_dir, builder) = temp_builder();
        assert!(builder.memory_cache_percent(0).build().is_err());
    }

    #[test]
    fn test_memory_budget() {
        let explicit = LoaderSettings {
            memory_cache_size: Some(1234),
            ..LoaderSettings::default()
        };
        assert_eq!(explicit.memory_cache_budget(), 1234);

        let by_percent = LoaderSettings::default();
        assert!(by_percent.memory_cache_budget() > 0);
    }

    #[test]
    fn test_disk_policy_selection() {
        let mut settings = LoaderSettings::default();
        assert_eq!(settings.disk_eviction_policy(), EvictionPolicy::default());

        settings.disk_cache_max_age_secs = Some(60);
        assert_eq!(
            settings.disk_eviction_policy(),
            EvictionPolicy::MaxAge(Duration::from_secs(60))
        );

        settings.disk_cache_file_count = 10;
        assert_eq!(settings.disk_eviction_policy(), EvictionPolicy::FileCount(10));

        settings.disk_cache_size = 5000;
        assert_eq!(settings.disk_eviction_policy(), EvictionPolicy::TotalSize(5000));
    }

    #[test]
    fn test_build_defaults() {
        let (dir, builder) = temp_builder();
        let config = builder.thread_priority(42).build().unwrap();

        assert_eq!(config.thread_pool_size(), 4);
        assert_eq!(config.thread_priority(), MAX_THREAD_PRIORITY);
        assert_eq!(config.processing_order(), QueueOrder::Fifo);
        assert!(config.handle_out_of_memory());
        assert_eq!(config.oom_retry_delay(), DEFAULT_OOM_RETRY_DELAY);
        assert_eq!(config.disk_cache().directory(), dir.path());
        assert!(config.max_image_size_for_disk_cache().is_unbounded());
    }

    #[test]
    fn test_build_rejects_empty_pool() {
        let (_dir, builder) = temp_builder();
        assert!(matches!(
            builder.thread_pool_size(0).build(),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_build_with_explicit_memory_cache() {
        let (_dir, builder) = temp_builder();
        let cache = Arc::new(LruMemoryCache::new(500));
        let config = builder.memory_cache(cache.clone()).build().unwrap();

        let image = DecodedImage::blank(5, 5, PixelFormat::Argb8888);
        assert!(config.memory_cache().put("k", image));
        assert!(cache.contains("k"));
    }

    #[test]
    fn test_build_deny_multiple_sizes() {
        let (_dir, builder) = temp_builder();
        let config = builder.deny_multiple_sizes_in_memory(true).build().unwrap();
        let cache = config.memory_cache();

        let uri = "http://example.com/a.png";
        cache.put(
            &memory_cache_key(uri, 10, 10),
            DecodedImage::blank(10, 10, PixelFormat::Alpha8),
        );
        cache.put(
            &memory_cache_key(uri, 20, 20),
            DecodedImage::blank(20, 20, PixelFormat::Alpha8),
        );
        assert_eq!(cache.keys(), vec![memory_cache_key(uri, 20, 20)]);
    }
}
