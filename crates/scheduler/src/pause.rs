//! Global pause flag
//!
//! While paused, tasks block at their first checkpoint instead of
//! aborting. Resuming wakes every waiter at once.

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::cancel::{CancellationToken, Cancelled};

/// How often a paused waiter rechecks its cancellation token
const CANCEL_CHECK_INTERVAL: Duration = Duration::from_millis(50);

/// Pause/resume gate shared by all workers
///
/// ```
/// use image_loader_scheduler::{CancellationToken, PauseGate};
///
/// let gate = PauseGate::new();
/// gate.pause();
/// assert!(gate.is_paused());
/// gate.resume();
/// assert!(gate.wait_while_paused(&CancellationToken::new()).is_ok());
/// ```
#[derive(Default)]
pub struct PauseGate {
    paused: Mutex<bool>,
    resumed: Condvar,
}

impl PauseGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause(&self) {
        *self.paused.lock() = true;
    }

    /// Clear the flag and wake every waiter
    pub fn resume(&self) {
        let mut paused = self.paused.lock();
        *paused = false;
        self.resumed.notify_all();
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.lock()
    }

    /// Block while the gate is paused.
    ///
    /// Returns `Err(Cancelled)` if `token` is cancelled while waiting.
    /// Returns immediately when not paused.
    pub fn wait_while_paused(&self, token: &CancellationToken) -> Result<(), Cancelled> {
        let mut paused = self.paused.lock();
        while *paused {
            token.check()?;
            self.resumed.wait_for(&mut paused, CANCEL_CHECK_INTERVAL);
        }
        Ok(())
    }
}
