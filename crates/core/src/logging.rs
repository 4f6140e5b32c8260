//! Logging setup for applications embedding the loader.
//!
//! The library itself only emits `tracing` events. Call [`init_logging`] once
//! at startup to print them to stderr, filtered by `RUST_LOG`.

use std::io;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::EnvFilter;

/// Install a global `fmt` subscriber.
///
/// `default_filter` (e.g. `"image_loader_core=debug"`) applies when
/// `RUST_LOG` is unset or invalid. Fails if a global subscriber already
/// exists.
pub fn init_logging(default_filter: &str) -> Result<(), TryInitError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_target(true)
        .with_thread_names(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .try_init()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_fails_without_panicking() {
        // The first call may already have happened in another test
        let _ = init_logging("debug");
        assert!(init_logging("debug").is_err());
    }
}
