//! Worker pool for parallel task execution.
//!
//! A fixed set of named threads pull tasks from the [`TaskScheduler`], run
//! them with their cancellation token, and mark them complete. A panicking
//! task is logged and does not take its worker down.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error};

use crate::scheduler::TaskScheduler;

/// Lowest accepted thread priority hint
pub const MIN_THREAD_PRIORITY: u8 = 1;
/// Highest accepted thread priority hint
pub const MAX_THREAD_PRIORITY: u8 = 10;

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker threads to spawn.
    /// Default: 4.
    pub num_workers: usize,

    /// Maximum time an idle worker waits for a task before checking shutdown.
    /// Default: 100ms.
    pub poll_interval: Duration,

    /// Scheduling priority hint in `1..=10`. Recorded and logged only; std
    /// threads have no portable priority control.
    pub thread_priority: u8,

    /// Worker thread name prefix; threads are named `{prefix}-{id}`.
    pub thread_name_prefix: String,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self::new(4)
    }
}

impl WorkerPoolConfig {
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers: num_workers.max(1),
            poll_interval: Duration::from_millis(100),
            thread_priority: 4,
            thread_name_prefix: "image-loader-worker".to_string(),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the priority hint, clamped to `1..=10`
    pub fn with_thread_priority(mut self, priority: u8) -> Self {
        self.thread_priority = priority.clamp(MIN_THREAD_PRIORITY, MAX_THREAD_PRIORITY);
        self
    }

    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }
}

/// Worker pool for parallel task execution.
///
/// ```
/// use image_loader_scheduler::{QueueOrder, TaskScheduler, WorkerPool, WorkerPoolConfig};
/// use std::sync::Arc;
///
/// let scheduler = Arc::new(TaskScheduler::new(QueueOrder::Fifo));
/// let pool = WorkerPool::new(scheduler.clone(), WorkerPoolConfig::new(2))?;
///
/// scheduler.submit(Box::new(|token| {
///     if !token.is_cancelled() {
///         // ... load something ...
///     }
/// }));
///
/// pool.shutdown();
/// # Ok::<(), std::io::Error>(())
/// ```
pub struct WorkerPool {
    workers: Vec<Worker>,
    scheduler: Arc<TaskScheduler>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Spawn the worker threads
    pub fn new(scheduler: Arc<TaskScheduler>, config: WorkerPoolConfig) -> io::Result<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut workers = Vec::with_capacity(config.num_workers);

        for id in 0..config.num_workers {
            match Worker::spawn(id, scheduler.clone(), shutdown.clone(), &config) {
                Ok(worker) => workers.push(worker),
                Err(err) => {
                    // Don't leak the threads that did start
                    shutdown.store(true, Ordering::Release);
                    scheduler.wake_workers();
                    for worker in workers {
                        worker.join();
                    }
                    return Err(err);
                }
            }
        }

        debug!(
            workers = config.num_workers,
            priority = config.thread_priority,
            order = ?scheduler.order(),
            "Started worker pool"
        );

        Ok(Self {
            workers,
            scheduler,
            shutdown,
        })
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Signal all workers to stop and wait for their current tasks to finish
    pub fn shutdown(mut self) {
        self.stop_workers();
        for worker in self.workers.drain(..) {
            worker.join();
        }
    }

    /// Signal all workers to stop without waiting for them
    pub fn shutdown_nowait(mut self) {
        self.stop_workers();
        self.workers.clear();
    }

    fn stop_workers(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.scheduler.wake_workers();
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop_workers();
    }
}

/// A single worker thread in the pool.
struct Worker {
    id: usize,
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    fn spawn(
        id: usize,
        scheduler: Arc<TaskScheduler>,
        shutdown: Arc<AtomicBool>,
        config: &WorkerPoolConfig,
    ) -> io::Result<Self> {
        let poll_interval = config.poll_interval;
        let thread = thread::Builder::new()
            .name(format!("{}-{}", config.thread_name_prefix, id))
            .spawn(move || Self::run(scheduler, shutdown, poll_interval))?;

        Ok(Self {
            id,
            thread: Some(thread),
        })
    }

    /// Pull tasks until shutdown. Tasks cancelled while queued are skipped.
    fn run(scheduler: Arc<TaskScheduler>, shutdown: Arc<AtomicBool>, poll_interval: Duration) {
        while !shutdown.load(Ordering::Acquire) {
            let Some(task) = scheduler.next_task_timeout(poll_interval) else {
                continue;
            };
            let task_id = task.id;

            if !task.token().is_cancelled() {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| task.run()));
                if let Err(payload) = outcome {
                    error!(task_id, panic = %panic_message(&*payload), "Task panicked");
                }
            }

            scheduler.complete_task(task_id);
        }
    }

    fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!(worker = self.id, "Worker thread panicked");
            }
        }
    }
}

/// Best-effort text of a panic payload
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
