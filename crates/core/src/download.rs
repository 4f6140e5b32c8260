//! Byte-stream sources for image uris
//!
//! The loader asks an [`ImageDownloader`] for the raw bytes behind a uri and
//! never looks at transport details itself. Which downloader is asked depends
//! on the engine's network flags: [`NetworkDeniedDownloader`] and
//! [`SlowNetworkDownloader`] wrap the normal one.

use std::fs::File;
use std::io::{self, Cursor, Read};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::error::DownloadError;
use crate::options::DownloaderExtra;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(20);

/// Readable image bytes
pub type ImageStream = Box<dyn Read + Send>;

/// Source of the encoded bytes behind a uri
pub trait ImageDownloader: Send + Sync {
    /// Open the bytes for `uri`. `extra` is the request's
    /// `extra_for_downloader` option, passed through untouched.
    fn get_stream(
        &self,
        uri: &str,
        extra: Option<&DownloaderExtra>,
    ) -> Result<ImageStream, DownloadError>;
}

impl<D: ImageDownloader + ?Sized> ImageDownloader for Arc<D> {
    fn get_stream(
        &self,
        uri: &str,
        extra: Option<&DownloaderExtra>,
    ) -> Result<ImageStream, DownloadError> {
        (**self).get_stream(uri, extra)
    }
}

/// Uri schemes the loader knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Http,
    Https,
    File,
    Content,
    Assets,
    Drawable,
    Unknown,
}

impl Scheme {
    const KNOWN: [Scheme; 6] = [
        Scheme::Http,
        Scheme::Https,
        Scheme::File,
        Scheme::Content,
        Scheme::Assets,
        Scheme::Drawable,
    ];

    /// Scheme name without the `://` separator
    pub fn name(self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
            Scheme::File => "file",
            Scheme::Content => "content",
            Scheme::Assets => "assets",
            Scheme::Drawable => "drawable",
            Scheme::Unknown => "",
        }
    }

    /// Detect the scheme of `uri`, ignoring ASCII case
    ///
    /// ```
    /// use image_loader_core::Scheme;
    ///
    /// assert_eq!(Scheme::of_uri("HTTPS://example.com/a.png"), Scheme::Https);
    /// assert_eq!(Scheme::of_uri("/tmp/a.png"), Scheme::Unknown);
    /// ```
    pub fn of_uri(uri: &str) -> Scheme {
        Self::KNOWN
            .into_iter()
            .find(|scheme| scheme.belongs_to(uri))
            .unwrap_or(Scheme::Unknown)
    }

    fn belongs_to(self, uri: &str) -> bool {
        let name = self.name();
        let Some(head) = uri.get(..name.len()) else {
            return false;
        };
        head.eq_ignore_ascii_case(name) && uri[name.len()..].starts_with("://")
    }

    /// Prefix `path` with this scheme
    pub fn wrap(self, path: &str) -> String {
        format!("{}://{}", self.name(), path)
    }

    /// Strip this scheme from `uri`
    pub fn crop(self, uri: &str) -> Result<&str, DownloadError> {
        if self == Scheme::Unknown || !self.belongs_to(uri) {
            return Err(DownloadError::UnsupportedScheme(format!(
                "{uri} does not have scheme {}",
                self.name()
            )));
        }
        Ok(&uri[self.name().len() + 3..])
    }

    /// Needs the network to fetch
    pub fn is_network(self) -> bool {
        matches!(self, Scheme::Http | Scheme::Https)
    }

    /// Served from the local machine; never worth caching on disk
    pub fn is_local(self) -> bool {
        matches!(
            self,
            Scheme::File | Scheme::Content | Scheme::Assets | Scheme::Drawable
        )
    }
}

/// Default downloader: `http(s)://` over `ureq`, `file://` from the file
/// system, `assets://` relative to an optional assets root.
pub struct BaseImageDownloader {
    agent: ureq::Agent,
    assets_root: Option<PathBuf>,
}

impl Default for BaseImageDownloader {
    fn default() -> Self {
        Self::new()
    }
}

impl BaseImageDownloader {
    pub fn new() -> Self {
        Self::with_timeouts(DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT)
    }

    pub fn with_timeouts(connect_timeout: Duration, read_timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(connect_timeout)
            .timeout_read(read_timeout)
            .build();
        Self {
            agent,
            assets_root: None,
        }
    }

    /// Serve `assets://name` from `root/name`
    pub fn with_assets_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.assets_root = Some(root.into());
        self
    }

    fn stream_from_network(&self, uri: &str) -> Result<ImageStream, DownloadError> {
        match self.agent.get(uri).call() {
            Ok(response) => Ok(Box::new(response.into_reader())),
            Err(ureq::Error::Status(status, _)) => Err(DownloadError::Http {
                uri: uri.to_string(),
                status,
            }),
            Err(ureq::Error::Transport(err)) => Err(io::Error::other(err.to_string()).into()),
        }
    }

    fn stream_from_file(&self, uri: &str) -> Result<ImageStream, DownloadError> {
        let path = Scheme::File.crop(uri)?;
        Ok(Box::new(File::open(path)?))
    }

    fn stream_from_assets(&self, uri: &str) -> Result<ImageStream, DownloadError> {
        let name = Scheme::Assets.crop(uri)?;
        let root = self
            .assets_root
            .as_ref()
            .ok_or_else(|| DownloadError::UnsupportedScheme(uri.to_string()))?;
        Ok(Box::new(File::open(root.join(name))?))
    }
}

impl ImageDownloader for BaseImageDownloader {
    fn get_stream(
        &self,
        uri: &str,
        _extra: Option<&DownloaderExtra>,
    ) -> Result<ImageStream, DownloadError> {
        match Scheme::of_uri(uri) {
            Scheme::Http | Scheme::Https => self.stream_from_network(uri),
            Scheme::File => self.stream_from_file(uri),
            Scheme::Assets => self.stream_from_assets(uri),
            Scheme::Content | Scheme::Drawable | Scheme::Unknown => {
                Err(DownloadError::UnsupportedScheme(uri.to_string()))
            }
        }
    }
}

/// Refuses network uris, delegates everything else
pub struct NetworkDeniedDownloader {
    inner: Arc<dyn ImageDownloader>,
}

impl NetworkDeniedDownloader {
    pub fn new(inner: Arc<dyn ImageDownloader>) -> Self {
        Self { inner }
    }
}

impl ImageDownloader for NetworkDeniedDownloader {
    fn get_stream(
        &self,
        uri: &str,
        extra: Option<&DownloaderExtra>,
    ) -> Result<ImageStream, DownloadError> {
        if Scheme::of_uri(uri).is_network() {
            return Err(DownloadError::NetworkDenied(uri.to_string()));
        }
        self.inner.get_stream(uri, extra)
    }
}

/// Reads network responses to the end before handing them over, so a slow
/// connection never stalls the decoder mid-image
pub struct SlowNetworkDownloader {
    inner: Arc<dyn ImageDownloader>,
}

impl SlowNetworkDownloader {
    pub fn new(inner: Arc<dyn ImageDownloader>) -> Self {
        Self { inner }
    }
}

impl ImageDownloader for SlowNetworkDownloader {
    fn get_stream(
        &self,
        uri: &str,
        extra: Option<&DownloaderExtra>,
    ) -> Result<ImageStream, DownloadError> {
        let mut stream = self.inner.get_stream(uri, extra)?;
        if !Scheme::of_uri(uri).is_network() {
            return Ok(stream);
        }

        let mut bytes = Vec::new();
        stream.read_to_end(&mut bytes)?;
        Ok(Box::new(Cursor::new(bytes)))
    }
}
