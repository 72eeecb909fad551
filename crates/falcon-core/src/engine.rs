//! Engine facade: owns the task manager, handler registry, event
//! dispatcher, and worker pool, and exposes the public download API.
//!
//! One engine instance per frontend; there is no process-wide state. The
//! handle is cheap to clone and share across threads.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::FalconError;
use crate::event::{DispatchMode, Event, EventDispatcher, EventListener};
use crate::handler::http::HttpHandler;
use crate::handler::ProtocolHandler;
use crate::manager::TaskManager;
use crate::pool::WorkerPool;
use crate::registry::{extract_scheme, is_valid_url, HandlerRegistry};
use crate::task::DownloadTask;
use crate::types::{
    BytesPerSecond, DownloadOptions, EngineConfig, EngineStats, TaskId, TaskStatus,
};
use crate::url_model;

struct EngineShared {
    config: Mutex<EngineConfig>,
    manager: TaskManager,
    registry: HandlerRegistry,
    dispatcher: Arc<EventDispatcher>,
    pool: WorkerPool,
}

#[derive(Clone)]
pub struct DownloadEngine {
    shared: Arc<EngineShared>,
}

impl Default for DownloadEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl DownloadEngine {
    /// Builds an engine with no handlers registered.
    pub fn new(config: EngineConfig) -> Self {
        let mode = match config.event_queue {
            None => DispatchMode::Sync,
            Some(capacity) => DispatchMode::Async {
                capacity,
                workers: 1,
            },
        };
        let shared = Arc::new(EngineShared {
            manager: TaskManager::new(config.max_concurrent_tasks),
            registry: HandlerRegistry::new(),
            dispatcher: EventDispatcher::new(mode),
            pool: WorkerPool::new(config.max_concurrent_tasks),
            config: Mutex::new(config),
        });
        Self { shared }
    }

    /// Builds an engine with the built-in HTTP/HTTPS handler registered.
    pub fn with_default_handlers(config: EngineConfig) -> Self {
        let engine = Self::new(config);
        engine.register_handler(Arc::new(HttpHandler::new()));
        engine
    }

    pub fn register_handler(&self, handler: Arc<dyn ProtocolHandler>) {
        self.shared.registry.register(handler);
    }

    pub fn supported_protocols(&self) -> Vec<String> {
        self.shared.registry.protocols()
    }

    pub fn is_url_supported(&self, url: &str) -> bool {
        self.shared.registry.is_supported(url)
    }

    pub fn add_listener(&self, listener: Arc<dyn EventListener>) {
        self.shared.dispatcher.add_listener(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn EventListener>) {
        self.shared.dispatcher.remove_listener(listener);
    }

    /// Validates the URL, resolves a handler and output path, admits the
    /// task, and starts it when auto-start is on and the cap allows.
    pub fn add_task(
        &self,
        url: &str,
        options: DownloadOptions,
    ) -> Result<Arc<DownloadTask>, FalconError> {
        if !is_valid_url(url) {
            return Err(FalconError::InvalidUrl(url.to_string()));
        }
        if self.shared.registry.find_handler(url).is_none() {
            return Err(FalconError::UnsupportedProtocol(
                extract_scheme(url).unwrap_or_default(),
            ));
        }

        let output_path = resolve_output_path(url, &options)?;

        let id = self.shared.manager.next_id();
        let task = Arc::new(DownloadTask::new(id, url, options, output_path));
        task.install_listener(Arc::clone(&self.shared.dispatcher));
        self.shared.manager.add_task(Arc::clone(&task));
        tracing::info!(task = id, url, "task admitted");

        if self.shared.config.lock().unwrap().auto_start {
            try_start_next(&self.shared);
        }

        Ok(task)
    }

    /// Admits a batch; URLs that fail admission are skipped.
    pub fn add_tasks(&self, urls: &[String], options: &DownloadOptions) -> Vec<Arc<DownloadTask>> {
        urls.iter()
            .filter_map(|url| match self.add_task(url, options.clone()) {
                Ok(task) => Some(task),
                Err(e) => {
                    tracing::warn!(url = url.as_str(), "skipping URL: {}", e);
                    None
                }
            })
            .collect()
    }

    pub fn get_task(&self, id: TaskId) -> Option<Arc<DownloadTask>> {
        self.shared.manager.get_task(id)
    }

    pub fn all_tasks(&self) -> Vec<Arc<DownloadTask>> {
        self.shared.manager.all_tasks()
    }

    pub fn tasks_by_status(&self, status: TaskStatus) -> Vec<Arc<DownloadTask>> {
        self.shared.manager.tasks_by_status(status)
    }

    pub fn active_tasks(&self) -> Vec<Arc<DownloadTask>> {
        self.shared.manager.active_tasks()
    }

    /// Starts a Pending task, subject to the admission cap. Returns false
    /// when the task is unknown, not Pending, or the cap kept it queued.
    pub fn start_task(&self, id: TaskId) -> bool {
        let Some(task) = self.shared.manager.get_task(id) else {
            return false;
        };
        if task.status() != TaskStatus::Pending {
            return false;
        }
        self.shared.manager.requeue(id);
        try_start_next(&self.shared);
        task.status() != TaskStatus::Pending
    }

    pub fn pause_task(&self, id: TaskId) -> bool {
        let Some(task) = self.shared.manager.get_task(id) else {
            return false;
        };
        let paused = match self.shared.registry.find_handler(task.url()) {
            Some(handler) => {
                handler.pause(&task);
                task.status() == TaskStatus::Paused
            }
            None => task.pause(),
        };
        self.shared.manager.notify();
        paused
    }

    /// Moves a Paused task back to Pending and re-enters the queue.
    pub fn resume_task(&self, id: TaskId) -> bool {
        let Some(task) = self.shared.manager.get_task(id) else {
            return false;
        };
        if !task.resume() {
            return false;
        }
        self.shared.manager.requeue(id);
        if self.shared.config.lock().unwrap().auto_start {
            try_start_next(&self.shared);
        }
        true
    }

    /// Flips the cancel flag; the running handler aborts at its next
    /// suspension point. Idempotent, and ignored once terminal.
    pub fn cancel_task(&self, id: TaskId) -> bool {
        let Some(task) = self.shared.manager.get_task(id) else {
            return false;
        };
        let cancelled = match self.shared.registry.find_handler(task.url()) {
            Some(handler) => {
                let before = task.status();
                handler.cancel(&task);
                !before.is_terminal() && task.status() == TaskStatus::Cancelled
            }
            None => task.cancel(),
        };
        self.shared.manager.notify();
        cancelled
    }

    pub fn pause_all(&self) {
        for task in self.shared.manager.active_tasks() {
            self.pause_task(task.id());
        }
    }

    pub fn resume_all(&self) {
        for task in self.shared.manager.tasks_by_status(TaskStatus::Paused) {
            self.resume_task(task.id());
        }
    }

    pub fn cancel_all(&self) {
        for task in self.shared.manager.all_tasks() {
            if !task.is_finished() {
                self.cancel_task(task.id());
            }
        }
    }

    /// Removes a task; only legal once it is terminal.
    pub fn remove_task(&self, id: TaskId) -> bool {
        self.shared.manager.remove_task(id)
    }

    pub fn remove_finished_tasks(&self) -> usize {
        self.shared.manager.remove_finished()
    }

    /// Blocks until every task reaches a terminal state.
    pub fn wait_all(&self) {
        self.shared.manager.wait_all();
    }

    pub fn wait_all_timeout(&self, timeout: Duration) -> bool {
        self.shared.manager.wait_all_timeout(timeout)
    }

    pub fn active_task_count(&self) -> usize {
        self.shared.manager.active_count()
    }

    pub fn total_task_count(&self) -> usize {
        self.shared.manager.total_count()
    }

    pub fn total_speed(&self) -> BytesPerSecond {
        self.shared
            .manager
            .active_tasks()
            .iter()
            .map(|t| t.speed())
            .sum()
    }

    /// Advisory aggregate budget; handlers enforce per-task limits.
    pub fn set_global_speed_limit(&self, limit: BytesPerSecond) {
        self.shared.config.lock().unwrap().global_speed_limit = limit;
    }

    pub fn set_max_concurrent_tasks(&self, max: usize) {
        self.shared.config.lock().unwrap().max_concurrent_tasks = max;
        self.shared.manager.set_max_concurrent(max);
        try_start_next(&self.shared);
    }

    /// Aggregate counters recomputed from the current task set.
    pub fn stats(&self) -> EngineStats {
        let mut stats = EngineStats {
            dropped_events: self.shared.dispatcher.dropped_events(),
            ..EngineStats::default()
        };
        for task in self.shared.manager.all_tasks() {
            match task.status() {
                TaskStatus::Preparing | TaskStatus::Downloading => {
                    stats.active_tasks += 1;
                    stats.total_speed += task.speed();
                }
                TaskStatus::Pending => stats.waiting_tasks += 1,
                TaskStatus::Paused => stats.paused_tasks += 1,
                TaskStatus::Completed => stats.completed_tasks += 1,
                TaskStatus::Failed => stats.failed_tasks += 1,
                TaskStatus::Cancelled => stats.cancelled_tasks += 1,
            }
        }
        stats
    }

    /// Cancels everything and waits for in-flight handler calls to end.
    /// Call before dropping the last engine handle for a clean teardown.
    pub fn shutdown(&self) {
        self.cancel_all();
        self.shared.pool.wait();
        self.shared.dispatcher.shutdown();
    }
}

/// Derives `{output_directory}/{output_filename}` for a new task, creating
/// the directory when asked to.
fn resolve_output_path(url: &str, options: &DownloadOptions) -> Result<PathBuf, FalconError> {
    let dir = if options.output_directory.is_empty() {
        "."
    } else {
        options.output_directory.as_str()
    };
    let filename = if options.output_filename.is_empty() {
        url_model::derive_filename(url, None)
    } else {
        options.output_filename.clone()
    };
    let dir = PathBuf::from(dir);
    if options.create_directory {
        std::fs::create_dir_all(&dir)
            .map_err(|e| FalconError::Filesystem(format!("create {}: {}", dir.display(), e)))?;
    }
    Ok(dir.join(filename))
}

/// Claims queued tasks while the admission cap allows and submits their
/// handler invocations to the worker pool.
fn try_start_next(shared: &Arc<EngineShared>) {
    while let Some(task) = shared.manager.claim_next_pending() {
        let Some(handler) = shared.registry.find_handler(task.url()) else {
            task.set_error("no handler for URL");
            task.transition(TaskStatus::Preparing);
            task.transition(TaskStatus::Failed);
            shared.manager.release_active();
            continue;
        };
        start_task_on_pool(shared, task, handler);
    }
}

fn start_task_on_pool(
    shared: &Arc<EngineShared>,
    task: Arc<DownloadTask>,
    handler: Arc<dyn ProtocolHandler>,
) {
    task.transition(TaskStatus::Preparing);
    task.mark_started();

    let shared = Arc::clone(shared);
    let submitted = shared.pool.submit({
        let shared = Arc::clone(&shared);
        let task = Arc::clone(&task);
        move || {
            let result = catch_unwind(AssertUnwindSafe(|| {
                run_download(&shared, &task, handler.as_ref())
            }));
            let result = match result {
                Ok(r) => r,
                Err(_) => Err(FalconError::Network("handler panicked".into())),
            };

            if let Err(e) = result {
                // A cancel observed inside the handler is not a failure.
                if !matches!(e, FalconError::Cancelled) && !task.is_finished() {
                    task.set_error(&e.to_string());
                    task.transition(TaskStatus::Failed);
                    shared.dispatcher.publish(Event::Error {
                        task_id: task.id(),
                        message: e.to_string(),
                    });
                    tracing::warn!(task = task.id(), "download failed: {}", e);
                }
            }

            shared.manager.release_active();
            try_start_next(&shared);
        }
    });
    if !submitted {
        task.set_error("engine is shutting down");
        task.transition(TaskStatus::Failed);
        shared.manager.release_active();
    }
}

/// Probe, transition to Downloading, and hand over to the handler, which
/// drives the task to a terminal (or Paused) state.
fn run_download(
    shared: &Arc<EngineShared>,
    task: &Arc<DownloadTask>,
    handler: &dyn ProtocolHandler,
) -> Result<(), FalconError> {
    if task.is_cancelled() || task.is_finished() {
        return Ok(());
    }

    if task.file_info().is_none() {
        let info = handler.file_info(task.url(), task.options())?;
        task.set_file_info(info.clone());
        shared.dispatcher.publish(Event::FileInfo {
            task_id: task.id(),
            info,
        });
    }

    if !task.transition(TaskStatus::Downloading) {
        return Ok(()); // cancelled between probe and start
    }
    handler.download(task, &shared.dispatcher)?;

    // Handlers normally finish the status themselves; a handler that
    // returns while still Downloading completed without saying so.
    if task.status() == TaskStatus::Downloading {
        task.transition(TaskStatus::Completed);
        shared.dispatcher.publish(Event::Completed {
            task_id: task.id(),
            path: task.output_path().to_path_buf(),
        });
    }
    Ok(())
}
