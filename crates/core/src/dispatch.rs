//! Completion delivery
//!
//! Workers never touch display targets or listeners. They post a
//! [`CompletionEvent`] into a channel, and a single consumer applies the
//! events in order: either a dedicated thread ([`CompletionThread`]) or the
//! host's own loop draining a [`CompletionQueue`].

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use image_loader_cache::DecodedImage;
use image_loader_scheduler::panic_message;
use tracing::{debug, error};

use crate::engine::TaskEngine;
use crate::error::FailReason;
use crate::listener::LoadingListener;
use crate::options::DisplayOptions;
use crate::target::DisplayTarget;
use crate::task::LoadingInfo;

/// One step of a request's lifecycle, applied on the consumer
pub(crate) enum CompletionEvent {
    /// Show the stub image and fire `on_started`
    Started(Arc<LoadingInfo>),
    /// Recheck the binding, then display or cancel
    Display {
        info: Arc<LoadingInfo>,
        image: DecodedImage,
    },
    Failed {
        info: Arc<LoadingInfo>,
        reason: FailReason,
    },
    Cancelled(Arc<LoadingInfo>),
    /// A request with an empty uri
    EmptyUri {
        target: Arc<dyn DisplayTarget>,
        options: DisplayOptions,
        listener: Arc<dyn LoadingListener>,
    },
    /// Stop the consumer thread
    Shutdown,
}

/// Sending half, shared by the engine and its tasks
#[derive(Clone)]
pub(crate) struct CompletionDispatcher {
    sender: Sender<CompletionEvent>,
}

impl CompletionDispatcher {
    pub(crate) fn channel() -> (Self, Receiver<CompletionEvent>) {
        let (sender, receiver) = mpsc::channel();
        (Self { sender }, receiver)
    }

    pub(crate) fn post(&self, event: CompletionEvent) {
        if self.sender.send(event).is_err() {
            debug!("Completion consumer is gone, dropping event");
        }
    }
}

/// Apply one event. Returns false for `Shutdown` or a dropped engine.
fn apply(engine: &Weak<TaskEngine>, event: CompletionEvent) -> bool {
    if matches!(event, CompletionEvent::Shutdown) {
        return false;
    }
    let Some(engine) = engine.upgrade() else {
        return false;
    };

    // A panicking listener must not take the consumer down with it
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| engine.handle_completion(event)));
    if let Err(payload) = outcome {
        error!(panic = %panic_message(&*payload), "Completion callback panicked");
    }
    true
}

/// Dedicated consumer thread
pub(crate) struct CompletionThread {
    handle: Option<JoinHandle<()>>,
}

impl CompletionThread {
    pub(crate) fn spawn(
        receiver: Receiver<CompletionEvent>,
        engine: Weak<TaskEngine>,
    ) -> io::Result<Self> {
        let handle = thread::Builder::new()
            .name("image-loader-completion".to_string())
            .spawn(move || {
                while let Ok(event) = receiver.recv() {
                    if !apply(&engine, event) {
                        break;
                    }
                }
                debug!("Completion consumer stopped");
            })?;

        Ok(Self {
            handle: Some(handle),
        })
    }

    /// Wait for the thread to exit. Does nothing when called from the
    /// consumer thread itself.
    pub(crate) fn join(mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            error!("Completion consumer thread panicked");
        }
    }
}

/// Completion events waiting to be applied by the host's own loop.
///
/// Returned by [`ImageLoader::with_manual_completion`](crate::ImageLoader::with_manual_completion).
/// Call [`run_pending`](Self::run_pending) from the thread that owns the
/// display targets.
pub struct CompletionQueue {
    receiver: Receiver<CompletionEvent>,
    engine: Weak<TaskEngine>,
}

impl CompletionQueue {
    pub(crate) fn new(receiver: Receiver<CompletionEvent>, engine: Weak<TaskEngine>) -> Self {
        Self { receiver, engine }
    }

    /// Apply every event already queued. Returns how many were applied.
    pub fn run_pending(&self) -> usize {
        let mut applied = 0;
        while let Ok(event) = self.receiver.try_recv() {
            if apply(&self.engine, event) {
                applied += 1;
            }
        }
        applied
    }

    /// Wait up to `timeout` for at least one event, then apply everything
    /// queued. Returns how many events were applied.
    pub fn run_for(&self, timeout: Duration) -> usize {
        match self.receiver.recv_timeout(timeout) {
            Ok(event) => usize::from(apply(&self.engine, event)) + self.run_pending(),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => 0,
        }
    }
}
