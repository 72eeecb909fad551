//! The shared download task handle.
//!
//! Callers, the manager, the running handler, and listener callbacks all
//! observe the same task through an `Arc`. Status and discovered metadata
//! live under a mutex paired with a condvar (the wait primitive); progress
//! counters are atomics; pause/cancel are cooperative flags.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::time::{Duration, Instant};

use crate::event::{Event, EventDispatcher};
use crate::types::{Bytes, BytesPerSecond, DownloadOptions, FileInfo, TaskId, TaskStatus};

/// Suffix for the single-connection temp file next to the final output.
pub const TEMP_SUFFIX: &str = ".falcon.tmp";

/// `<final>.falcon.tmp`
pub fn temp_path(final_path: &Path) -> PathBuf {
    let mut p = final_path.as_os_str().to_owned();
    p.push(TEMP_SUFFIX);
    PathBuf::from(p)
}

/// `<final>.falcon.tmp.seg<N>`
pub fn segment_temp_path(final_path: &Path, index: usize) -> PathBuf {
    let mut p = final_path.as_os_str().to_owned();
    p.push(format!("{}.seg{}", TEMP_SUFFIX, index));
    PathBuf::from(p)
}

struct TaskState {
    status: TaskStatus,
    error_message: String,
    file_info: Option<FileInfo>,
    started_at: Option<Instant>,
}

pub struct DownloadTask {
    id: TaskId,
    url: String,
    options: DownloadOptions,
    output_path: PathBuf,

    state: Mutex<TaskState>,
    changed: Condvar,

    downloaded: AtomicU64,
    total: AtomicU64,
    speed: AtomicU64,

    pause_flag: AtomicBool,
    cancel_flag: AtomicBool,

    // Installed once by the engine at admission; transitions publish
    // StatusChanged through it.
    listener: OnceLock<Arc<EventDispatcher>>,
}

impl std::fmt::Debug for DownloadTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadTask")
            .field("id", &self.id)
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

impl DownloadTask {
    pub fn new(id: TaskId, url: &str, options: DownloadOptions, output_path: PathBuf) -> Self {
        Self {
            id,
            url: url.to_string(),
            options,
            output_path,
            state: Mutex::new(TaskState {
                status: TaskStatus::Pending,
                error_message: String::new(),
                file_info: None,
                started_at: None,
            }),
            changed: Condvar::new(),
            downloaded: AtomicU64::new(0),
            total: AtomicU64::new(0),
            speed: AtomicU64::new(0),
            pause_flag: AtomicBool::new(false),
            cancel_flag: AtomicBool::new(false),
            listener: OnceLock::new(),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn options(&self) -> &DownloadOptions {
        &self.options
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn temp_path(&self) -> PathBuf {
        temp_path(&self.output_path)
    }

    pub fn segment_temp_path(&self, index: usize) -> PathBuf {
        segment_temp_path(&self.output_path, index)
    }

    pub(crate) fn install_listener(&self, dispatcher: Arc<EventDispatcher>) {
        let _ = self.listener.set(dispatcher);
    }

    pub fn status(&self) -> TaskStatus {
        self.state.lock().unwrap().status
    }

    pub fn is_finished(&self) -> bool {
        self.status().is_terminal()
    }

    pub fn is_active(&self) -> bool {
        self.status().is_active()
    }

    pub fn error_message(&self) -> String {
        self.state.lock().unwrap().error_message.clone()
    }

    pub fn set_error(&self, message: &str) {
        self.state.lock().unwrap().error_message = message.to_string();
    }

    pub fn file_info(&self) -> Option<FileInfo> {
        self.state.lock().unwrap().file_info.clone()
    }

    /// Records probe results and seeds the total-size counter.
    pub fn set_file_info(&self, info: FileInfo) {
        self.total.store(info.total_size, Ordering::Relaxed);
        self.state.lock().unwrap().file_info = Some(info);
    }

    pub fn mark_started(&self) {
        self.state.lock().unwrap().started_at = Some(Instant::now());
    }

    pub fn elapsed(&self) -> Option<Duration> {
        self.state.lock().unwrap().started_at.map(|t| t.elapsed())
    }

    pub fn downloaded_bytes(&self) -> Bytes {
        self.downloaded.load(Ordering::Relaxed)
    }

    pub fn total_bytes(&self) -> Bytes {
        self.total.load(Ordering::Relaxed)
    }

    pub fn speed(&self) -> BytesPerSecond {
        self.speed.load(Ordering::Relaxed)
    }

    /// Updates the progress counters. `downloaded` is monotonic: stale
    /// observations never move the counter backwards.
    pub fn update_progress(&self, downloaded: Bytes, total: Bytes, speed: BytesPerSecond) {
        self.downloaded.fetch_max(downloaded, Ordering::Relaxed);
        if total > 0 {
            self.total.store(total, Ordering::Relaxed);
        }
        self.speed.store(speed, Ordering::Relaxed);
    }

    pub fn is_paused(&self) -> bool {
        self.pause_flag.load(Ordering::Relaxed)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_flag.load(Ordering::Relaxed)
    }

    pub(crate) fn pause_flag(&self) -> &AtomicBool {
        &self.pause_flag
    }

    pub(crate) fn cancel_flag(&self) -> &AtomicBool {
        &self.cancel_flag
    }

    /// Requests pause. Only legal while `Downloading`; the running handler
    /// observes the flag at its next suspension point and returns without
    /// further progress events.
    pub fn pause(&self) -> bool {
        self.pause_flag.store(true, Ordering::Relaxed);
        if self.transition(TaskStatus::Paused) {
            true
        } else {
            self.pause_flag.store(false, Ordering::Relaxed);
            false
        }
    }

    /// Clears the pause flag and re-enters the pending queue's state.
    pub fn resume(&self) -> bool {
        if self.transition(TaskStatus::Pending) {
            self.pause_flag.store(false, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Requests cancellation. Idempotent; a terminal task ignores it.
    pub fn cancel(&self) -> bool {
        if self.is_finished() {
            return false;
        }
        self.cancel_flag.store(true, Ordering::Relaxed);
        self.transition(TaskStatus::Cancelled)
    }

    /// Applies a status transition if the state machine allows it, waking
    /// waiters and publishing `StatusChanged`. Returns false on an illegal
    /// transition (including any transition out of a terminal state).
    pub fn transition(&self, new: TaskStatus) -> bool {
        let old = {
            let mut state = self.state.lock().unwrap();
            let old = state.status;
            if !transition_allowed(old, new) {
                return false;
            }
            state.status = new;
            old
        };
        self.changed.notify_all();
        if let Some(listener) = self.listener.get() {
            listener.publish(Event::StatusChanged {
                task_id: self.id,
                old,
                new,
            });
        }
        true
    }

    /// Blocks until the task reaches a terminal state. With a timeout,
    /// returns false if the deadline passes first.
    pub fn wait_finished(&self, timeout: Option<Duration>) -> bool {
        let state = self.state.lock().unwrap();
        match timeout {
            None => {
                let _guard = self
                    .changed
                    .wait_while(state, |s| !s.status.is_terminal())
                    .unwrap();
                true
            }
            Some(t) => {
                let (guard, result) = self
                    .changed
                    .wait_timeout_while(state, t, |s| !s.status.is_terminal())
                    .unwrap();
                drop(guard);
                !result.timed_out()
            }
        }
    }

    /// Snapshot of the current progress counters.
    pub fn progress(&self) -> crate::types::ProgressInfo {
        crate::types::ProgressInfo {
            task_id: self.id,
            downloaded_bytes: self.downloaded_bytes(),
            total_bytes: self.total_bytes(),
            speed: self.speed(),
        }
    }
}

fn transition_allowed(from: TaskStatus, to: TaskStatus) -> bool {
    use TaskStatus::*;
    match (from, to) {
        (Pending, Preparing) => true,
        (Preparing, Downloading) => true,
        (Downloading, Paused) => true,
        (Paused, Pending) | (Paused, Preparing) => true,
        (Downloading, Completed) => true,
        (Preparing, Failed) | (Downloading, Failed) => true,
        (from, Cancelled) => !from.is_terminal(),
        _ => false,
    }
}
