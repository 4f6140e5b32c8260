//! Task scheduler
//!
//! Couples the task queue with the cancellation registry and keeps
//! submission statistics. Workers pull from it; the engine submits to it.

use std::time::Duration;

use parking_lot::Mutex;

use crate::cancel::{CancellationRegistry, CancellationToken};
use crate::queue::{QueueOrder, Task, TaskFn, TaskId, TaskQueue};

/// Scheduler statistics
#[derive(Debug, Clone, Copy, Default)]
pub struct SchedulerStats {
    pub tasks_submitted: u64,
    pub tasks_completed: u64,
    /// Tasks dropped from the queue before they started
    pub tasks_cancelled: u64,
    pub queue_size: usize,
}

impl SchedulerStats {
    /// Tasks queued or running
    pub fn pending_tasks(&self) -> u64 {
        self.tasks_submitted - self.tasks_completed - self.tasks_cancelled
    }
}

/// Task scheduler with a FIFO or LIFO queue
///
/// ```
/// use image_loader_scheduler::{QueueOrder, TaskScheduler};
///
/// let scheduler = TaskScheduler::new(QueueOrder::Fifo);
/// let (task_id, _token) = scheduler.submit(Box::new(|token| {
///     if token.is_cancelled() {
///         return;
///     }
/// }));
///
/// if let Some(task) = scheduler.next_task() {
///     assert_eq!(task.id, task_id);
///     task.run();
///     scheduler.complete_task(task_id);
/// }
/// assert_eq!(scheduler.stats().tasks_completed, 1);
/// ```
pub struct TaskScheduler {
    queue: TaskQueue,
    stats: Mutex<SchedulerStats>,
    cancellation: CancellationRegistry,
}

impl TaskScheduler {
    pub fn new(order: QueueOrder) -> Self {
        Self {
            queue: TaskQueue::new(order),
            stats: Mutex::new(SchedulerStats::default()),
            cancellation: CancellationRegistry::new(),
        }
    }

    pub fn order(&self) -> QueueOrder {
        self.queue.order()
    }

    /// Queue a task and register its cancellation token. The task carries
    /// the registered token, so whichever worker takes it sees cancellation.
    pub fn submit(&self, run: TaskFn) -> (TaskId, CancellationToken) {
        self.stats.lock().tasks_submitted += 1;
        self.queue.push_with(run, |task_id| self.cancellation.register(task_id))
    }

    /// Take the next task without blocking
    pub fn next_task(&self) -> Option<Task> {
        self.queue.pop()
    }

    /// Take the next task, waiting up to `timeout`
    pub fn next_task_timeout(&self, timeout: Duration) -> Option<Task> {
        self.queue.pop_timeout(timeout)
    }

    pub fn cancellation_token(&self, task_id: TaskId) -> Option<CancellationToken> {
        self.cancellation.get(task_id)
    }

    /// Mark a task as finished and drop its token
    pub fn complete_task(&self, task_id: TaskId) {
        self.stats.lock().tasks_completed += 1;
        self.cancellation.unregister(task_id);
    }

    /// Cancel a task. Queued tasks are dropped; running ones see their
    /// token cancelled.
    pub fn cancel_task(&self, task_id: TaskId) -> bool {
        let token_cancelled = self.cancellation.cancel(task_id);

        if self.queue.remove(task_id) {
            self.stats.lock().tasks_cancelled += 1;
            self.cancellation.unregister(task_id);
            true
        } else {
            token_cancelled
        }
    }

    /// Drop every queued task and cancel every running one
    pub fn cancel_all(&self) -> usize {
        let dropped = self.queue.drain();
        {
            let mut stats = self.stats.lock();
            stats.tasks_cancelled += dropped.len() as u64;
        }
        let cancelled = self.cancellation.cancel_all();
        for task_id in dropped {
            self.cancellation.unregister(task_id);
        }
        cancelled
    }

    /// Wake every worker blocked waiting for work
    pub fn wake_workers(&self) {
        self.queue.wake_all();
    }

    pub fn queue_size(&self) -> usize {
        self.queue.len()
    }

    pub fn stats(&self) -> SchedulerStats {
        let mut stats = *self.stats.lock();
        stats.queue_size = self.queue.len();
        stats
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new(QueueOrder::default())
    }
}
