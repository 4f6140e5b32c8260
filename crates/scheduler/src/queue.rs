//! Task queue with configurable processing order
//!
//! Tasks are boxed closures. The queue hands them out either oldest-first
//! (FIFO) or newest-first (LIFO); LIFO lets the most recent requests overtake
//! stale ones when targets are reused quickly.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::cancel::CancellationToken;

/// Unique task identifier
pub type TaskId = u64;

/// Work item executed by a pool worker. The token is cancelled when the
/// task is interrupted.
pub type TaskFn = Box<dyn FnOnce(&CancellationToken) + Send + 'static>;

/// Order in which queued tasks are handed to workers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueOrder {
    /// First submitted, first run
    #[default]
    Fifo,
    /// Last submitted, first run
    Lifo,
}

/// A queued unit of work and the token that interrupts it
pub struct Task {
    pub id: TaskId,
    token: CancellationToken,
    run: TaskFn,
}

impl Task {
    pub fn new(id: TaskId, token: CancellationToken, run: TaskFn) -> Self {
        Self { id, token, run }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Consume the task and execute it with its own token
    pub fn run(self) {
        (self.run)(&self.token)
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").field("id", &self.id).finish()
    }
}

struct QueueState {
    tasks: VecDeque<Task>,
    next_task_id: TaskId,
}

/// Thread-safe task queue
///
/// ```
/// use image_loader_scheduler::{QueueOrder, TaskQueue};
///
/// let queue = TaskQueue::new(QueueOrder::Lifo);
/// let first = queue.push(Box::new(|_| {}));
/// let second = queue.push(Box::new(|_| {}));
///
/// assert_eq!(queue.pop().map(|t| t.id), Some(second));
/// assert_eq!(queue.pop().map(|t| t.id), Some(first));
/// ```
pub struct TaskQueue {
    order: QueueOrder,
    state: Mutex<QueueState>,
    available: Condvar,
}

impl TaskQueue {
    pub fn new(order: QueueOrder) -> Self {
        Self {
            order,
            state: Mutex::new(QueueState {
                tasks: VecDeque::new(),
                next_task_id: 1,
            }),
            available: Condvar::new(),
        }
    }

    pub fn order(&self) -> QueueOrder {
        self.order
    }

    /// Enqueue a task with a fresh token and wake one waiting worker
    pub fn push(&self, run: TaskFn) -> TaskId {
        self.push_with(run, |_| CancellationToken::new()).0
    }

    /// Enqueue a task whose token comes from `make_token`. The token is
    /// created while the queue is locked, so no worker can take the task
    /// before it exists.
    pub fn push_with(
        &self,
        run: TaskFn,
        make_token: impl FnOnce(TaskId) -> CancellationToken,
    ) -> (TaskId, CancellationToken) {
        let mut state = self.state.lock();
        let id = state.next_task_id;
        state.next_task_id += 1;
        let token = make_token(id);
        state.tasks.push_back(Task::new(id, token.clone(), run));
        drop(state);

        self.available.notify_one();
        (id, token)
    }

    /// Take the next task without blocking
    pub fn pop(&self) -> Option<Task> {
        let mut state = self.state.lock();
        self.take(&mut state)
    }

    /// Take the next task, waiting up to `timeout` for one to arrive
    pub fn pop_timeout(&self, timeout: Duration) -> Option<Task> {
        let mut state = self.state.lock();
        if state.tasks.is_empty() {
            self.available.wait_for(&mut state, timeout);
        }
        self.take(&mut state)
    }

    fn take(&self, state: &mut QueueState) -> Option<Task> {
        match self.order {
            QueueOrder::Fifo => state.tasks.pop_front(),
            QueueOrder::Lifo => state.tasks.pop_back(),
        }
    }

    /// Remove a queued task by ID. Returns `true` if it was still queued.
    pub fn remove(&self, task_id: TaskId) -> bool {
        let mut state = self.state.lock();
        let before = state.tasks.len();
        state.tasks.retain(|task| task.id != task_id);
        state.tasks.len() != before
    }

    /// Drop every queued task, returning their IDs
    pub fn drain(&self) -> Vec<TaskId> {
        let mut state = self.state.lock();
        state.tasks.drain(..).map(|task| task.id).collect()
    }

    /// Wake every waiting worker (used on shutdown)
    pub fn wake_all(&self) {
        self.available.notify_all();
    }

    pub fn len(&self) -> usize {
        self.state.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().tasks.is_empty()
    }
}
