//! Task engine
//!
//! Owns the worker pool, the pause gate, the per-uri load locks and the
//! target → memory cache key bindings. Tasks consult it at every checkpoint
//! to find out whether their result is still wanted.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use image_loader_scheduler::{
    CancellationToken, KeyedLocks, LoadLock, PauseGate, SchedulerStats, TaskFn, TaskScheduler,
    WorkerPool, WorkerPoolConfig,
};
use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::config::Configuration;
use crate::dispatch::{CompletionDispatcher, CompletionEvent};
use crate::download::ImageDownloader;
use crate::error::{FailReason, FailType};
use crate::target::TargetId;
use crate::task::{LoadAndDisplayTask, LoadingInfo};

/// Schedules load tasks and tracks which request each target expects
pub struct TaskEngine {
    config: Arc<Configuration>,
    scheduler: Arc<TaskScheduler>,
    pool: Mutex<Option<WorkerPool>>,
    bindings: DashMap<TargetId, String>,
    load_locks: KeyedLocks,
    pause: PauseGate,
    network_denied: AtomicBool,
    slow_network: AtomicBool,
    dispatcher: CompletionDispatcher,
}

impl TaskEngine {
    pub(crate) fn new(config: Arc<Configuration>, dispatcher: CompletionDispatcher) -> Self {
        Self {
            scheduler: Arc::new(TaskScheduler::new(config.processing_order())),
            config,
            pool: Mutex::new(None),
            bindings: DashMap::new(),
            load_locks: KeyedLocks::new(),
            pause: PauseGate::new(),
            network_denied: AtomicBool::new(false),
            slow_network: AtomicBool::new(false),
            dispatcher,
        }
    }

    pub fn configuration(&self) -> &Configuration {
        &self.config
    }

    /// Queue a load-and-display task for `info`
    pub(crate) fn submit(self: &Arc<Self>, info: Arc<LoadingInfo>) {
        let task = LoadAndDisplayTask::new(self.clone(), info.clone());
        self.submit_job(&info, Box::new(move |token: &CancellationToken| task.run(token)));
    }

    /// Queue an arbitrary job on behalf of `info`. If the pool can't be
    /// started the request fails with `Unknown`.
    pub(crate) fn submit_job(&self, info: &Arc<LoadingInfo>, job: TaskFn) {
        if let Err(err) = self.ensure_workers() {
            error!(uri = %info.uri, error = %err, "Failed to start worker pool");
            self.post(CompletionEvent::Failed {
                info: info.clone(),
                reason: FailReason::new(FailType::Unknown, err.to_string()),
            });
            return;
        }
        self.scheduler.submit(job);
    }

    /// Start the pool on first use, and again after `stop`
    fn ensure_workers(&self) -> io::Result<()> {
        let mut pool = self.pool.lock();
        if pool.is_none() {
            let pool_config = WorkerPoolConfig::new(self.config.thread_pool_size())
                .with_thread_priority(self.config.thread_priority());
            *pool = Some(WorkerPool::new(self.scheduler.clone(), pool_config)?);
        }
        Ok(())
    }

    pub(crate) fn post(&self, event: CompletionEvent) {
        self.dispatcher.post(event);
    }

    /// Bind `target` to `memory_cache_key`, replacing any earlier binding
    pub(crate) fn prepare_display_task_for(&self, target: TargetId, memory_cache_key: String) {
        self.bindings.insert(target, memory_cache_key);
    }

    /// Forget the binding of `target`; its in-flight tasks become stale
    pub fn cancel_display_task_for(&self, target: TargetId) {
        self.bindings.remove(&target);
    }

    /// Memory cache key `target` currently expects
    pub fn loading_key_for(&self, target: TargetId) -> Option<String> {
        self.bindings.get(&target).map(|key| key.value().clone())
    }

    /// True while `info` is still the request its target expects
    pub(crate) fn is_binding_current(&self, info: &LoadingInfo) -> bool {
        self.bindings
            .get(&info.target.id())
            .is_some_and(|key| *key == info.memory_cache_key)
    }

    /// The shared lock serializing loads of `uri`
    pub fn lock_for(&self, uri: &str) -> LoadLock {
        self.load_locks.lock_for(uri)
    }

    /// Make tasks block at their first checkpoint until `resume`
    pub fn pause(&self) {
        self.pause.pause();
    }

    pub fn resume(&self) {
        self.pause.resume();
    }

    pub fn is_paused(&self) -> bool {
        self.pause.is_paused()
    }

    pub(crate) fn pause_gate(&self) -> &PauseGate {
        &self.pause
    }

    /// Fail network uris with `NetworkDenied` instead of fetching them
    pub fn deny_network_downloads(&self, deny: bool) {
        self.network_denied.store(deny, Ordering::Release);
    }

    /// Fully buffer network responses before decoding
    pub fn handle_slow_network(&self, slow: bool) {
        self.slow_network.store(slow, Ordering::Release);
    }

    pub fn is_network_denied(&self) -> bool {
        self.network_denied.load(Ordering::Acquire)
    }

    pub fn is_slow_network(&self) -> bool {
        self.slow_network.load(Ordering::Acquire)
    }

    /// Byte source matching the current network flags
    pub(crate) fn downloader(&self) -> &Arc<dyn ImageDownloader> {
        if self.is_network_denied() {
            self.config.network_denied_downloader()
        } else if self.is_slow_network() {
            self.config.slow_network_downloader()
        } else {
            self.config.downloader()
        }
    }

    /// Interrupt every task, drop the queue and forget all bindings and
    /// locks. Interrupted requests get no callback. The pool restarts on the
    /// next submission.
    pub fn stop(&self) {
        let interrupted = self.scheduler.cancel_all();
        if let Some(pool) = self.pool.lock().take() {
            pool.shutdown_nowait();
        }
        self.bindings.clear();
        self.load_locks.clear();
        debug!(interrupted, "Task engine stopped");
    }

    pub fn stats(&self) -> SchedulerStats {
        self.scheduler.stats()
    }

    /// Apply a completion event. Runs on the completion consumer.
    pub(crate) fn handle_completion(&self, event: CompletionEvent) {
        match event {
            CompletionEvent::Started(info) => {
                if self.is_binding_current(&info) {
                    let options = &info.options;
                    if let Some(stub) = options.stub_image() {
                        info.target.set_image(Some(stub.clone()));
                    } else if options.is_reset_view_before_loading() {
                        info.target.set_image(None);
                    }
                }
                info.listener.on_started(&info.uri);
            }
            CompletionEvent::Display { info, image } => {
                if !self.is_binding_current(&info) {
                    if self.config.logging_enabled() {
                        info!(key = %info.memory_cache_key, "Target is reused for another image, display cancelled");
                    }
                    info.listener.on_cancelled(&info.uri);
                    return;
                }

                if self.config.logging_enabled() {
                    info!(key = %info.memory_cache_key, "Display image in target");
                }
                let shown = info.options.displayer().display(image, info.target.as_ref());
                info.listener.on_complete(&info.uri, Some(&shown));
                // Only drop the binding if nobody rebound the target meanwhile
                self.bindings
                    .remove_if(&info.target.id(), |_, key| *key == info.memory_cache_key);
            }
            CompletionEvent::Failed { info, reason } => {
                if self.is_binding_current(&info) {
                    if let Some(image) = info.options.image_on_fail() {
                        info.target.set_image(Some(image.clone()));
                    }
                }
                info.listener.on_failed(&info.uri, &reason);
            }
            CompletionEvent::Cancelled(info) => {
                info.listener.on_cancelled(&info.uri);
            }
            CompletionEvent::EmptyUri {
                target,
                options,
                listener,
            } => {
                listener.on_started("");
                target.set_image(options.image_for_empty_uri().cloned());
                listener.on_complete("", None);
            }
            CompletionEvent::Shutdown => {}
        }
    }
}
