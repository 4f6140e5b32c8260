//! Cancellation token system for tasks
//!
//! Provides cancellation tokens that allow queued or running tasks to be
//! interrupted cooperatively. Tasks check the token at their checkpoints and
//! may sleep on it, in which case cancelling wakes them immediately.

use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::queue::TaskId;

/// Returned when a wait was cut short by cancellation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

impl std::fmt::Display for Cancelled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("task was cancelled")
    }
}

impl std::error::Error for Cancelled {}

struct TokenState {
    cancelled: AtomicBool,
    lock: Mutex<()>,
    wakeup: Condvar,
}

/// Cancellation token for cooperative task cancellation
///
/// All clones share the same state.
///
/// ```
/// use image_loader_scheduler::CancellationToken;
/// use std::time::Duration;
///
/// let token = CancellationToken::new();
/// let worker_token = token.clone();
///
/// token.cancel();
/// assert!(worker_token.is_cancelled());
/// assert!(worker_token.sleep(Duration::from_secs(10)).is_err());
/// ```
#[derive(Clone)]
pub struct CancellationToken {
    state: Arc<TokenState>,
}

impl CancellationToken {
    /// Create a new token in the non-cancelled state
    pub fn new() -> Self {
        Self {
            state: Arc::new(TokenState {
                cancelled: AtomicBool::new(false),
                lock: Mutex::new(()),
                wakeup: Condvar::new(),
            }),
        }
    }

    /// Cancel this token and wake anything sleeping on it. Idempotent.
    pub fn cancel(&self) {
        let _guard = self.state.lock.lock();
        self.state.cancelled.store(true, Ordering::Release);
        self.state.wakeup.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::Acquire)
    }

    /// Return `Err(Cancelled)` if the token has been cancelled
    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleep for `duration` unless cancelled first
    pub fn sleep(&self, duration: Duration) -> Result<(), Cancelled> {
        let deadline = Instant::now() + duration;
        let mut guard = self.state.lock.lock();
        while !self.is_cancelled() {
            if self.state.wakeup.wait_until(&mut guard, deadline).timed_out() {
                break;
            }
        }
        self.check()
    }

    /// Reset this token (and all clones) to the non-cancelled state
    pub fn reset(&self) {
        self.state.cancelled.store(false, Ordering::Release);
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Tracks the tokens of tasks that are queued or running
///
/// ```
/// use image_loader_scheduler::CancellationRegistry;
///
/// let registry = CancellationRegistry::new();
/// let token = registry.register(1);
///
/// registry.cancel(1);
/// assert!(token.is_cancelled());
/// ```
#[derive(Default)]
pub struct CancellationRegistry {
    tokens: Mutex<HashMap<TaskId, CancellationToken>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task and return its token
    pub fn register(&self, task_id: TaskId) -> CancellationToken {
        let token = CancellationToken::new();
        self.tokens.lock().insert(task_id, token.clone());
        token
    }

    /// Cancel a task by ID. Returns `true` if the task was registered.
    pub fn cancel(&self, task_id: TaskId) -> bool {
        match self.tokens.lock().get(&task_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every registered task, returning how many were cancelled
    pub fn cancel_all(&self) -> usize {
        let tokens = self.tokens.lock();
        for token in tokens.values() {
            token.cancel();
        }
        tokens.len()
    }

    /// Remove a task (finished or dropped from the queue)
    pub fn unregister(&self, task_id: TaskId) -> bool {
        self.tokens.lock().remove(&task_id).is_some()
    }

    pub fn get(&self, task_id: TaskId) -> Option<CancellationToken> {
        self.tokens.lock().get(&task_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.tokens.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.lock().is_empty()
    }

    /// Forget every token without cancelling it
    pub fn clear(&self) {
        self.tokens.lock().clear();
    }
}
