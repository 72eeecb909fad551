//! Core value types: task status, file metadata, options, statistics.

use std::collections::HashMap;
use std::str::FromStr;

/// Opaque task identifier, monotonically increasing within a process.
pub type TaskId = u64;
pub type Bytes = u64;
pub type BytesPerSecond = u64;

/// Default user agent, derived from the build version.
pub const DEFAULT_USER_AGENT: &str = concat!("falcon/", env!("CARGO_PKG_VERSION"));

/// Lifecycle states of a download task. Terminal states never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    Pending,
    Preparing,
    Downloading,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Active means a handler invocation is (or is about to be) in flight.
    pub fn is_active(self) -> bool {
        matches!(self, TaskStatus::Preparing | TaskStatus::Downloading)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Preparing => "preparing",
            TaskStatus::Downloading => "downloading",
            TaskStatus::Paused => "paused",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Metadata discovered during the probe phase; read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct FileInfo {
    /// Final URL after redirects.
    pub url: String,
    /// Filename inferred from Content-Disposition or the URL path.
    pub filename: String,
    /// Total length in bytes; 0 means unknown.
    pub total_size: Bytes,
    /// True when the server advertises `Accept-Ranges: bytes`.
    pub supports_resume: bool,
    pub content_type: String,
    pub last_modified: Option<String>,
}

/// A progress observation for one task.
#[derive(Debug, Clone, Copy)]
pub struct ProgressInfo {
    pub task_id: TaskId,
    pub downloaded_bytes: Bytes,
    pub total_bytes: Bytes,
    pub speed: BytesPerSecond,
}

impl ProgressInfo {
    /// Fraction in [0, 1]; 0 while the total is unknown.
    pub fn fraction(&self) -> f64 {
        if self.total_bytes == 0 {
            0.0
        } else {
            self.downloaded_bytes as f64 / self.total_bytes as f64
        }
    }

    /// Estimated seconds remaining, when the total and speed are known.
    pub fn eta_seconds(&self) -> Option<u64> {
        if self.total_bytes == 0 || self.speed == 0 {
            return None;
        }
        Some(self.total_bytes.saturating_sub(self.downloaded_bytes) / self.speed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyType {
    Http,
    Socks4,
    Socks5,
    Socks5h,
}

impl FromStr for ProxyType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(ProxyType::Http),
            "socks4" => Ok(ProxyType::Socks4),
            "socks5" => Ok(ProxyType::Socks5),
            "socks5h" => Ok(ProxyType::Socks5h),
            other => Err(format!("unknown proxy type: {}", other)),
        }
    }
}

/// Request-shaping configuration, immutable for the life of a task.
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub output_directory: String,
    /// Empty means derive from the URL (or Content-Disposition).
    pub output_filename: String,
    pub create_directory: bool,
    pub max_connections: usize,
    pub min_segment_size: Bytes,
    /// Bytes per second; 0 = unlimited.
    pub speed_limit: BytesPerSecond,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub retry_delay_seconds: u64,
    pub resume_enabled: bool,
    pub verify_ssl: bool,
    pub follow_redirects: bool,
    pub max_redirects: u32,
    pub user_agent: String,
    pub referer: String,
    pub cookie_file: String,
    pub cookie_jar: String,
    pub http_username: String,
    pub http_password: String,
    pub proxy: String,
    pub proxy_username: String,
    pub proxy_password: String,
    pub proxy_type: ProxyType,
    pub headers: HashMap<String, String>,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            output_directory: ".".to_string(),
            output_filename: String::new(),
            create_directory: true,
            max_connections: 4,
            min_segment_size: 1024 * 1024,
            speed_limit: 0,
            timeout_seconds: 30,
            max_retries: 3,
            retry_delay_seconds: 1,
            resume_enabled: true,
            verify_ssl: true,
            follow_redirects: true,
            max_redirects: 10,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            referer: String::new(),
            cookie_file: String::new(),
            cookie_jar: String::new(),
            http_username: String::new(),
            http_password: String::new(),
            proxy: String::new(),
            proxy_username: String::new(),
            proxy_password: String::new(),
            proxy_type: ProxyType::Http,
            headers: HashMap::new(),
        }
    }
}

impl DownloadOptions {
    /// Inserts or replaces a header; the key comparison is case-insensitive.
    pub fn set_header(&mut self, name: &str, value: &str) {
        let existing = self
            .headers
            .keys()
            .find(|k| k.eq_ignore_ascii_case(name))
            .cloned();
        if let Some(k) = existing {
            self.headers.remove(&k);
        }
        self.headers.insert(name.to_string(), value.to_string());
    }
}

/// Engine-wide settings fixed at construction (except where noted).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Admission cap on in-flight Preparing/Downloading tasks.
    pub max_concurrent_tasks: usize,
    /// Start admitted tasks immediately while below the cap.
    pub auto_start: bool,
    /// Advisory aggregate budget in bytes/s; 0 = unlimited.
    pub global_speed_limit: BytesPerSecond,
    /// `None` dispatches events on the publisher's thread; `Some(capacity)`
    /// switches to the bounded non-blocking queue.
    pub event_queue: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 5,
            auto_start: true,
            global_speed_limit: 0,
            event_queue: None,
        }
    }
}

/// Aggregate counters, recomputed on demand from the task set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub active_tasks: usize,
    pub waiting_tasks: usize,
    pub paused_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub cancelled_tasks: usize,
    pub total_speed: BytesPerSecond,
    /// Events discarded by the async dispatcher since construction.
    pub dropped_events: u64,
}
