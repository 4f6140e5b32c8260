//! Image Loader Scheduler Library
//!
//! Task queue, worker pool and the coordination primitives the loader
//! engine is built on: cancellation tokens, a global pause gate, and
//! per-key load locks.
//!
//! # Example
//!
//! ```
//! use image_loader_scheduler::{KeyedLocks, PauseGate, QueueOrder, TaskScheduler, WorkerPool, WorkerPoolConfig};
//! use std::sync::Arc;
//!
//! let scheduler = Arc::new(TaskScheduler::new(QueueOrder::Lifo));
//! let pool = WorkerPool::new(scheduler.clone(), WorkerPoolConfig::new(2))?;
//! let pause = Arc::new(PauseGate::new());
//! let locks = Arc::new(KeyedLocks::new());
//!
//! let (pause_task, locks_task) = (pause.clone(), locks.clone());
//! scheduler.submit(Box::new(move |token| {
//!     if pause_task.wait_while_paused(token).is_err() {
//!         return;
//!     }
//!     let lock = locks_task.lock_for("http://example.com/a.png");
//!     let _guard = lock.lock();
//!     // ... fetch, decode, cache ...
//! }));
//!
//! pool.shutdown();
//! # Ok::<(), std::io::Error>(())
//! ```

mod cancel;
mod locks;
mod pause;
mod queue;
mod scheduler;
mod worker;

pub use cancel::{CancellationRegistry, CancellationToken, Cancelled};
pub use locks::{KeyedLocks, LoadLock};
pub use pause::PauseGate;
pub use queue::{QueueOrder, Task, TaskFn, TaskId, TaskQueue};
pub use scheduler::{SchedulerStats, TaskScheduler};
pub use worker::{
    panic_message, WorkerPool, WorkerPoolConfig, MAX_THREAD_PRIORITY, MIN_THREAD_PRIORITY,
};
