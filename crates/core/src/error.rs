//! Error types and the failure taxonomy reported to listeners

use std::fmt;
use std::io;

use thiserror::Error;

/// Failure fetching the bytes of an image
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Network access is currently denied and the uri needs the network
    #[error("network downloads are denied: {0}")]
    NetworkDenied(String),

    /// No source knows how to serve this uri
    #[error("unsupported uri scheme: {0}")]
    UnsupportedScheme(String),

    /// The server answered with a non-success status
    #[error("HTTP {status} for {uri}")]
    Http { uri: String, status: u16 },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Failure turning encoded bytes into a [`DecodedImage`](image_loader_cache::DecodedImage)
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Pixel buffer allocation failed. Retried by the load task.
    #[error("out of memory while decoding")]
    OutOfMemory,

    #[error("malformed image: {0}")]
    Malformed(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<image::ImageError> for DecodeError {
    fn from(err: image::ImageError) -> Self {
        use image::error::{ImageError, LimitErrorKind};

        match err {
            ImageError::Limits(limit) if matches!(limit.kind(), LimitErrorKind::InsufficientMemory) => {
                DecodeError::OutOfMemory
            }
            ImageError::IoError(err) => DecodeError::Io(err),
            other => DecodeError::Malformed(other.to_string()),
        }
    }
}

/// Anything that can go wrong inside a load task
#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// A panic or other fault nobody anticipated
    #[error("unexpected failure: {0}")]
    Unknown(String),
}

impl LoadError {
    pub fn fail_type(&self) -> FailType {
        match self {
            LoadError::Download(DownloadError::NetworkDenied(_)) => FailType::NetworkDenied,
            LoadError::Download(_) => FailType::IoError,
            LoadError::Decode(DecodeError::OutOfMemory) => FailType::OutOfMemory,
            LoadError::Decode(DecodeError::Malformed(_)) => FailType::DecodingError,
            LoadError::Decode(DecodeError::Io(_)) => FailType::IoError,
            LoadError::Unknown(_) => FailType::Unknown,
        }
    }
}

/// Failure category delivered to [`LoadingListener::on_failed`](crate::LoadingListener::on_failed)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailType {
    IoError,
    DecodingError,
    NetworkDenied,
    OutOfMemory,
    Unknown,
}

impl fmt::Display for FailType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailType::IoError => "IO_ERROR",
            FailType::DecodingError => "DECODING_ERROR",
            FailType::NetworkDenied => "NETWORK_DENIED",
            FailType::OutOfMemory => "OUT_OF_MEMORY",
            FailType::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

/// Why a request failed: the category plus a human readable cause
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailReason {
    kind: FailType,
    cause: String,
}

impl FailReason {
    pub fn new(kind: FailType, cause: impl Into<String>) -> Self {
        Self {
            kind,
            cause: cause.into(),
        }
    }

    pub fn kind(&self) -> FailType {
        self.kind
    }

    pub fn cause(&self) -> &str {
        &self.cause
    }
}

impl fmt::Display for FailReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.cause)
    }
}

impl From<LoadError> for FailReason {
    fn from(err: LoadError) -> Self {
        FailReason::new(err.fail_type(), err.to_string())
    }
}

/// Failure loading or validating [`LoaderSettings`](crate::LoaderSettings)
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A setting has an unusable value; carries the setting name
    #[error("invalid configuration value: {0}")]
    InvalidValue(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to parse configuration: {0}")]
    Parse(String),
}
